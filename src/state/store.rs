//! Durable storage for the one live snapshot of a plan.
//!
//! Every mutation goes through `commit` or `reset`, which apply the change
//! to a copy of the current snapshot and publish the copy whole. Readers
//! see either the snapshot before the change or the one after it.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::snapshot::{StateSnapshot, Transition};
use crate::error::{Error, Result};
use crate::util::{blocking, write_atomic};
use crate::wlog_debug;

/// Atomic read/commit of a plan's state snapshot.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Latest committed snapshot. An empty store yields an all-pending snapshot.
    async fn load(&self) -> Result<StateSnapshot>;

    /// Apply a forward status transition and log it.
    async fn commit(&self, transition: Transition) -> Result<StateSnapshot>;

    /// Put a phase back to pending for an explicit re-run.
    async fn reset(&self, transition: Transition) -> Result<StateSnapshot>;
}

/// In-process store, for tests and embedding.
pub struct MemoryStore {
    plan: String,
    state: Mutex<Option<StateSnapshot>>,
}

impl MemoryStore {
    pub fn new(plan: &str) -> Self {
        Self {
            plan: plan.to_string(),
            state: Mutex::new(None),
        }
    }

    /// Start from an existing snapshot.
    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            plan: snapshot.plan.clone(),
            state: Mutex::new(Some(snapshot)),
        }
    }

    async fn update<F>(&self, f: F) -> Result<StateSnapshot>
    where
        F: FnOnce(&mut StateSnapshot) -> Result<()> + Send,
    {
        let mut guard = self.state.lock().await;
        let mut next = guard
            .clone()
            .unwrap_or_else(|| StateSnapshot::new(&self.plan));
        f(&mut next)?;
        *guard = Some(next.clone());
        Ok(next)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<StateSnapshot> {
        Ok(self
            .state
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| StateSnapshot::new(&self.plan)))
    }

    async fn commit(&self, transition: Transition) -> Result<StateSnapshot> {
        self.update(|s| s.apply(&transition)).await
    }

    async fn reset(&self, transition: Transition) -> Result<StateSnapshot> {
        self.update(|s| s.apply_reset(&transition)).await
    }
}

/// JSON file store. Writes go to a temp file renamed over the original,
/// keeping the previous version as `.bak`.
pub struct FileStore {
    path: PathBuf,
    plan: String,
    cache: Mutex<Option<StateSnapshot>>,
}

impl FileStore {
    pub fn new(path: &Path, plan: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            plan: plan.to_string(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path, plan: &str) -> Result<StateSnapshot> {
        if !path.exists() {
            wlog_debug!("FileStore: {} not found, starting empty", path.display());
            return Ok(StateSnapshot::new(plan));
        }
        let contents = fs::read_to_string(path)?;
        let snapshot: StateSnapshot = serde_json::from_str(&contents)?;
        if snapshot.plan != plan {
            return Err(Error::PlanMismatch {
                expected: plan.to_string(),
                found: snapshot.plan,
            });
        }
        Ok(snapshot)
    }

    async fn read_async(&self) -> Result<StateSnapshot> {
        let path = self.path.clone();
        let plan = self.plan.clone();
        blocking(move || Self::read(&path, &plan)).await
    }

    async fn update<F>(&self, f: F) -> Result<StateSnapshot>
    where
        F: FnOnce(&mut StateSnapshot) -> Result<()> + Send,
    {
        let mut cache = self.cache.lock().await;
        let mut next = match cache.as_ref() {
            Some(snapshot) => snapshot.clone(),
            None => self.read_async().await?,
        };
        f(&mut next)?;

        let contents = serde_json::to_string_pretty(&next)?;
        let path = self.path.clone();
        blocking(move || write_atomic(&path, &contents)).await?;
        wlog_debug!(
            "FileStore: committed {} events to {}",
            next.events().len(),
            self.path.display()
        );

        *cache = Some(next.clone());
        Ok(next)
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self) -> Result<StateSnapshot> {
        self.read_async().await
    }

    async fn commit(&self, transition: Transition) -> Result<StateSnapshot> {
        self.update(|s| s.apply(&transition)).await
    }

    async fn reset(&self, transition: Transition) -> Result<StateSnapshot> {
        self.update(|s| s.apply_reset(&transition)).await
    }
}
