//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Building plan descriptors
//! - A scripted executor that records dispatches and concurrency
//! - Temporary file-backed state stores

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use waveplan::orchestration::{PhaseExecutor, PhaseOutcome};
use waveplan::plan::{compile, Phase, PhaseDecl, PhaseId, Plan, PlanDescriptor, Task};
use waveplan::state::FileStore;

/// One phase declaration touching `files`, after `after`.
pub fn decl(number: u32, name: &str, files: &[&str], after: &[u32]) -> PhaseDecl {
    PhaseDecl::new(number, name)
        .after(after)
        .task(Task::new(&format!("{} work", name)).with_files(files.iter().copied()))
}

/// Five phases in three waves:
///
/// wave 1: 1, 2
/// wave 2: 3 (after 1), 4 (after 2)
/// wave 3: 5 (after 3)
pub fn sibling_plan() -> Plan {
    let desc = PlanDescriptor::new("Sibling Failure", "failure isolation per edge")
        .phase(decl(1, "Schema", &["db/schema.sql"], &[]))
        .phase(decl(2, "Config", &["config.toml"], &[]))
        .phase(decl(3, "Migrations", &["db/migrate.sql"], &[1]))
        .phase(decl(4, "Settings UI", &["ui/settings.rs"], &[2]))
        .phase(decl(5, "Seed Data", &["db/seed.sql"], &[3]));
    compile(&desc).expect("sibling plan compiles")
}

/// Eight phases across four waves, two per wave, chained wave to wave.
pub fn eight_phase_plan() -> Plan {
    let desc = PlanDescriptor::new("Auth Feature", "login, sessions and roles")
        .phase(decl(1, "User model", &["src/user.rs"], &[]))
        .phase(decl(2, "Password hashing", &["src/hash.rs"], &[]))
        .phase(decl(3, "Login endpoint", &["src/login.rs"], &[1, 2]))
        .phase(decl(4, "Logout endpoint", &["src/logout.rs"], &[1]))
        .phase(decl(5, "Role model", &["src/role.rs"], &[3]))
        .phase(decl(6, "Session tokens", &["src/session.rs"], &[3, 4]))
        .phase(decl(7, "Admin panel", &["src/admin.rs"], &[5]))
        .phase(decl(8, "Audit log", &["src/audit.rs"], &[6]));
    compile(&desc).expect("eight phase plan compiles")
}

/// `count` independent phases with disjoint files, all in wave 1.
pub fn wide_plan(count: u32) -> Plan {
    let mut desc = PlanDescriptor::new("Wide", "");
    for n in 1..=count {
        let file = format!("src/part_{}.rs", n);
        desc = desc.phase(
            PhaseDecl::new(n, &format!("part {}", n))
                .task(Task::new("write").with_files([file])),
        );
    }
    compile(&desc).expect("wide plan compiles")
}

/// A state file inside a fresh temp directory.
pub struct TempState {
    /// Keeps the directory alive.
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TempState {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("state").join("plan.state.json");
        Self { dir, path }
    }

    pub fn store(&self, plan: &Plan) -> Arc<FileStore> {
        Arc::new(FileStore::new(&self.path, plan.id()))
    }
}

/// One entry of the executor's start/finish timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Started(PhaseId),
    Finished(PhaseId),
}

#[derive(Clone)]
enum Script {
    Fail(String),
    Hang,
    Panic,
}

/// In-process executor with scripted per-phase behaviour.
///
/// Unscripted phases succeed after the configured delay.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<PhaseId, Script>,
    delays: HashMap<PhaseId, Duration>,
    default_delay: Duration,
    recovered: HashMap<PhaseId, PhaseOutcome>,
    cancel_on_start: Option<(PhaseId, CancellationToken)>,
    timeline: Mutex<Vec<Step>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, phase: u32, reason: &str) -> Self {
        self.scripts
            .insert(PhaseId(phase), Script::Fail(reason.to_string()));
        self
    }

    /// Never finishes on its own.
    pub fn hang(mut self, phase: u32) -> Self {
        self.scripts.insert(PhaseId(phase), Script::Hang);
        self
    }

    pub fn panic_on(mut self, phase: u32) -> Self {
        self.scripts.insert(PhaseId(phase), Script::Panic);
        self
    }

    pub fn delay(mut self, phase: u32, delay: Duration) -> Self {
        self.delays.insert(PhaseId(phase), delay);
        self
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Report `outcome` for `phase` when it is found running on resume.
    pub fn recovers(mut self, phase: u32, outcome: PhaseOutcome) -> Self {
        self.recovered.insert(PhaseId(phase), outcome);
        self
    }

    /// Cancel `token` as soon as `phase` starts executing.
    pub fn cancel_when_started(mut self, phase: u32, token: CancellationToken) -> Self {
        self.cancel_on_start = Some((PhaseId(phase), token));
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Starts and finishes in the order they happened.
    pub fn timeline(&self) -> Vec<Step> {
        self.timeline.lock().unwrap().clone()
    }

    /// Phases in the order they started executing.
    pub fn started(&self) -> Vec<PhaseId> {
        self.timeline()
            .into_iter()
            .filter_map(|step| match step {
                Step::Started(id) => Some(id),
                Step::Finished(_) => None,
            })
            .collect()
    }

    /// Phases in the order they finished executing.
    pub fn finished(&self) -> Vec<PhaseId> {
        self.timeline()
            .into_iter()
            .filter_map(|step| match step {
                Step::Finished(id) => Some(id),
                Step::Started(_) => None,
            })
            .collect()
    }

    pub fn was_dispatched(&self, phase: u32) -> bool {
        self.started().contains(&PhaseId(phase))
    }

    /// Highest number of phases seen executing at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhaseExecutor for ScriptedExecutor {
    async fn execute(&self, phase: &Phase) -> PhaseOutcome {
        self.timeline.lock().unwrap().push(Step::Started(phase.id));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some((id, token)) = &self.cancel_on_start {
            if *id == phase.id {
                token.cancel();
            }
        }

        let delay = self
            .delays
            .get(&phase.id)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = match self.scripts.get(&phase.id).cloned() {
            None => PhaseOutcome::Done,
            Some(Script::Fail(reason)) => PhaseOutcome::failed(reason),
            Some(Script::Hang) => {
                std::future::pending::<()>().await;
                PhaseOutcome::Done
            }
            Some(Script::Panic) => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("scripted panic in phase {}", phase.id);
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.timeline.lock().unwrap().push(Step::Finished(phase.id));
        outcome
    }

    async fn recover(&self, phase: &Phase) -> Option<PhaseOutcome> {
        self.recovered.get(&phase.id).cloned()
    }
}
