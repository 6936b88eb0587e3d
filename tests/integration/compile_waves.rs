//! Plan compilation integration tests.
//!
//! These tests load descriptors from disk and check the resulting waves
//! against the scheduling invariants.

use std::fs;

use tempfile::TempDir;

use waveplan::plan::{compile, PhaseId, Plan, PlanDescriptor, WaveId};
use waveplan::Error;

use crate::fixtures::{decl, eight_phase_plan};

const AUTH_PLAN: &str = r#"
name = "Auth Feature"
description = "login and sessions"

[[phases]]
number = 1
name = "User model"

[[phases.tasks]]
name = "struct"
files = ["src/user.rs"]
verify = "test -f src/user.rs"

[[phases]]
number = 2
name = "Routes"

[[phases.tasks]]
name = "mount"
files = ["src/routes.rs", "./src/app.rs"]

[[phases]]
number = 3
name = "Login"
depends_on = [1]

[[phases.tasks]]
name = "handler"
files = ["src/login.rs", "src/app.rs"]

[[phases]]
number = 4
name = "Review"
depends_on = [3]

[[phases.tasks]]
name = "approve"
kind = "checkpoint"
"#;

/// Every phase lands after all of its predecessors and same-wave phases
/// never touch the same file.
fn assert_wave_invariants(plan: &Plan) {
    for phase in plan.phases() {
        for pred in &phase.depends_on {
            let pred = plan.phase(*pred).unwrap();
            assert!(
                pred.wave < phase.wave,
                "phase {} (wave {}) must follow phase {} (wave {})",
                phase.id,
                phase.wave,
                pred.id,
                pred.wave
            );
        }
    }
    for wave in plan.waves() {
        for (i, a) in wave.phases.iter().enumerate() {
            for b in &wave.phases[i + 1..] {
                let a = plan.phase(*a).unwrap().files();
                let b = plan.phase(*b).unwrap().files();
                assert!(a.is_disjoint(&b), "wave {} has overlapping phases", wave.id);
            }
        }
    }
}

/// Test: Descriptor loaded from TOML on disk
/// Given a plan where phase 3 shares a file with independent phase 2
/// When the plan is loaded and compiled
/// Then phase 3 still sits in wave 2 behind phase 1 and phase 4 in wave 3
#[test]
fn test_load_toml_plan_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("auth.toml");
    fs::write(&path, AUTH_PLAN).unwrap();

    let plan = Plan::load(&path).unwrap();
    assert_eq!(plan.id(), "auth-feature");
    assert_eq!(plan.name(), "Auth Feature");
    assert_eq!(plan.len(), 4);

    let waves: Vec<(WaveId, Vec<PhaseId>)> = plan
        .waves()
        .iter()
        .map(|w| (w.id, w.phases.clone()))
        .collect();
    assert_eq!(
        waves,
        vec![
            (WaveId(1), vec![PhaseId(1), PhaseId(2)]),
            (WaveId(2), vec![PhaseId(3)]),
            (WaveId(3), vec![PhaseId(4)]),
        ]
    );
    assert_wave_invariants(&plan);
}

/// Test: Same plan as JSON compiles identically
#[test]
fn test_json_and_toml_compile_the_same() {
    let dir = TempDir::new().unwrap();
    let desc = PlanDescriptor::from_toml(AUTH_PLAN).unwrap();
    let json_path = dir.path().join("auth.json");
    fs::write(&json_path, serde_json::to_string_pretty(&desc).unwrap()).unwrap();

    let from_json = Plan::load(&json_path).unwrap();
    let from_toml = compile(&desc).unwrap();
    assert_eq!(from_json.waves(), from_toml.waves());
    assert_eq!(from_json.phases(), from_toml.phases());
}

/// Test: Conflict splitting without predecessor edges
/// Given phases 1 and 2 touching the same file (one via "./" prefix)
/// When compiled
/// Then phase 2 is moved to wave 2
#[test]
fn test_overlapping_independent_phases_are_split() {
    let desc = PlanDescriptor::new("Split", "")
        .phase(decl(1, "first", &["src/lib.rs"], &[]))
        .phase(decl(2, "second", &["./src/lib.rs"], &[]))
        .phase(decl(3, "third", &["src/other.rs"], &[]));
    let plan = compile(&desc).unwrap();

    assert_eq!(plan.phase(PhaseId(1)).unwrap().wave, WaveId(1));
    assert_eq!(plan.phase(PhaseId(2)).unwrap().wave, WaveId(2));
    assert_eq!(plan.phase(PhaseId(3)).unwrap().wave, WaveId(1));
    assert_wave_invariants(&plan);
}

/// Test: Pinned conflict cannot be resolved
#[test]
fn test_pinned_overlap_is_file_conflict() {
    let desc = PlanDescriptor::new("Pinned", "")
        .phase(decl(1, "a", &["Cargo.toml"], &[]).pinned(2))
        .phase(decl(2, "b", &["Cargo.toml"], &[]).pinned(2));
    match compile(&desc).unwrap_err() {
        Error::FileConflict {
            first,
            second,
            wave,
            files,
        } => {
            assert_eq!((first, second, wave), (PhaseId(1), PhaseId(2), WaveId(2)));
            assert_eq!(files.len(), 1);
        }
        other => panic!("expected FileConflict, got {:?}", other),
    }
}

/// Test: Cycle scenario
/// Given phase 1 depending on phase 2 and phase 2 depending on phase 1
/// When the descriptor is loaded from disk
/// Then loading fails with a dependency cycle, so there is no plan to run
#[test]
fn test_cycle_aborts_compilation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cycle.json");
    let desc = PlanDescriptor::new("Cycle", "")
        .phase(decl(1, "A", &["a.rs"], &[2]))
        .phase(decl(2, "B", &["b.rs"], &[1]));
    fs::write(&path, serde_json::to_string(&desc).unwrap()).unwrap();

    let err = Plan::load(&path).unwrap_err();
    assert!(matches!(err, Error::DependencyCycle { .. }));
}

/// Test: Malformed descriptor is a validation error
#[test]
fn test_duplicate_phase_number_rejected_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dup.toml");
    fs::write(
        &path,
        r#"
name = "dup"

[[phases]]
number = 1
name = "a"
[[phases.tasks]]
name = "t"

[[phases]]
number = 1
name = "b"
[[phases.tasks]]
name = "t"
"#,
    )
    .unwrap();

    let err = Plan::load(&path).unwrap_err();
    assert!(matches!(err, Error::Validation(ref m) if m.contains("duplicate")));
}

/// Test: Larger plan keeps every invariant
#[test]
fn test_eight_phase_plan_waves() {
    let plan = eight_phase_plan();
    assert_eq!(plan.waves().len(), 4);
    for wave in plan.waves() {
        assert_eq!(wave.phases.len(), 2, "wave {}", wave.id);
    }
    assert_eq!(plan.phase(PhaseId(6)).unwrap().wave, WaveId(3));
    assert_wave_invariants(&plan);
}
