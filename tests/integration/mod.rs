//! Integration test suite for waveplan.
//!
//! These tests drive compiled plans through the coordinator against real
//! state stores and check what ends up on disk.
//!
//! # Test Categories
//!
//! - `compile_waves`: Descriptor loading, wave layering and conflict splits
//! - `execution`: Wave dispatch, failure propagation, bounds, cancellation
//! - `resume`: Restart semantics, retry and unblocking
//! - `progress_report`: Report queries and rendering
//!
//! Phase execution is scripted in-process; only the shell executor tests
//! spawn real processes.

mod fixtures;

mod compile_waves;
mod progress_report;
