//! Progress report integration tests.
//!
//! The report is a pure function of the plan and a loaded snapshot, so it
//! can be produced while a run is still going.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use waveplan::orchestration::{Coordinator, CoordinatorConfig};
use waveplan::plan::{PhaseId, PhaseStatus, WaveId};
use waveplan::report::Progress;
use waveplan::state::{FileStore, StateSnapshot, StateStore, Transition};

use crate::fixtures::{eight_phase_plan, sibling_plan, ScriptedExecutor, TempState};

async fn finish(store: &FileStore, phase: u32, status: PhaseStatus) {
    store
        .commit(Transition::new(PhaseId(phase), PhaseStatus::Running))
        .await
        .unwrap();
    store
        .commit(Transition::new(PhaseId(phase), status))
        .await
        .unwrap();
}

/// Test: Eight phase scenario
/// Given phases 1 to 5 done, 6 pending in wave 3 and 7, 8 pending in wave 4
/// When the report is rendered from the state file
/// Then it reads 5/8 at 62.5%, wave 3, next phase 6 and nothing blocked
#[tokio::test]
async fn test_eight_phase_report() {
    let plan = eight_phase_plan();
    let state = TempState::new();
    let store = state.store(&plan);
    for phase in 1..=5 {
        finish(&store, phase, PhaseStatus::Done).await;
    }

    let snapshot = FileStore::new(&state.path, plan.id()).load().await.unwrap();
    let progress = Progress::new(&plan, &snapshot);

    assert_eq!(progress.percent_complete(), 62.5);
    assert_eq!(progress.current_wave(), Some(WaveId(3)));
    assert_eq!(progress.next_pending_phase().unwrap().id, PhaseId(6));
    assert!(progress.blocked_phases().is_empty());
    assert_eq!(
        progress.render("Progress"),
        "## Progress: Auth Feature\n\
         Phases: 5/8 complete (62.5%)\n\
         Current wave: 3\n\
         Next phase: Phase 6 - Session tokens\n\
         Blocked: None\n"
    );
}

/// Test: Report after a degraded run lists blocked phases by name
#[tokio::test]
async fn test_report_after_failed_run() {
    let plan = eight_phase_plan();
    let state = TempState::new();
    let exec = ScriptedExecutor::new().fail(4, "logout broke").build();
    Coordinator::new(state.store(&plan), CoordinatorConfig::default())
        .run(&plan, exec, CancellationToken::new())
        .await
        .unwrap();

    let snapshot = state.store(&plan).load().await.unwrap();
    let progress = Progress::new(&plan, &snapshot);

    // 4 failed; 6 needs 4 and 8 needs 6.
    let blocked: Vec<PhaseId> = progress.blocked_phases().iter().map(|p| p.id).collect();
    assert_eq!(blocked, vec![PhaseId(6), PhaseId(8)]);
    assert_eq!(progress.done_count(), 5);
    assert!(progress.is_finished());
    assert_eq!(
        progress.render("Build Progress"),
        "## Build Progress: Auth Feature\n\
         Phases: 5/8 complete (62.5%)\n\
         Current wave: complete\n\
         Next phase: None\n\
         Blocked: Session tokens, Audit log\n"
    );
}

/// Test: Status can be read while a run is in progress
/// Given a run whose phase 1 is still executing
/// When another store instance loads the state file
/// Then the report shows wave 1 current with phase 1 running
#[tokio::test]
async fn test_report_reads_state_during_run() {
    let plan = sibling_plan();
    let state = TempState::new();
    let path = state.path.clone();

    let run = tokio::spawn(async move {
        let plan = sibling_plan();
        let store = std::sync::Arc::new(FileStore::new(&path, plan.id()));
        let exec = ScriptedExecutor::new()
            .delay(1, Duration::from_millis(300))
            .build();
        Coordinator::new(store, CoordinatorConfig::default())
            .run(&plan, exec, CancellationToken::new())
            .await
    });

    // Wait for phase 1 to be committed as running.
    let reader = FileStore::new(&state.path, plan.id());
    let mut snapshot = reader.load().await.unwrap();
    for _ in 0..100 {
        if snapshot.status(PhaseId(1)) == PhaseStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        snapshot = reader.load().await.unwrap();
    }
    assert_eq!(snapshot.status(PhaseId(1)), PhaseStatus::Running);

    let progress = Progress::new(&plan, &snapshot);
    assert_eq!(progress.current_wave(), Some(WaveId(1)));
    assert!(progress.percent_complete() < 100.0);

    let report = run.await.unwrap().unwrap();
    assert!(report.is_complete());

    let snapshot = reader.load().await.unwrap();
    let progress = Progress::new(&plan, &snapshot);
    assert_eq!(progress.percent_complete(), 100.0);
    assert!(progress
        .render("Progress")
        .contains("Phases: 5/5 complete (100.0%)"));
}

/// Test: Percent complete never goes backwards during a run
/// Given a degraded run of the eight phase plan
/// When the reporter is sampled after every coordinator event
/// And the persisted event log is replayed one commit at a time
/// Then neither sequence of percentages ever decreases
#[tokio::test]
async fn test_percent_complete_is_monotonic() {
    let plan = eight_phase_plan();
    let state = TempState::new();
    let store = state.store(&plan);
    let exec = ScriptedExecutor::new()
        .fail(4, "logout broke")
        .default_delay(Duration::from_millis(5))
        .build();

    let (tx, mut rx) = mpsc::channel(256);
    let sampler = {
        let store = Arc::clone(&store);
        let plan = eight_phase_plan();
        tokio::spawn(async move {
            let mut samples = Vec::new();
            while rx.recv().await.is_some() {
                let snapshot = store.load().await.unwrap();
                samples.push(Progress::new(&plan, &snapshot).percent_complete());
            }
            samples
        })
    };

    let coordinator =
        Coordinator::new(store.clone(), CoordinatorConfig::default()).with_events(tx);
    coordinator
        .run(&plan, exec, CancellationToken::new())
        .await
        .unwrap();
    drop(coordinator);

    let live = sampler.await.unwrap();
    assert!(!live.is_empty());
    assert!(live.windows(2).all(|w| w[0] <= w[1]), "{:?}", live);

    let persisted = store.load().await.unwrap();
    let mut replay = StateSnapshot::new(plan.id());
    let mut last = Progress::new(&plan, &replay).percent_complete();
    for event in persisted.events() {
        replay
            .apply(&Transition::new(event.phase, event.new_status))
            .unwrap();
        let now = Progress::new(&plan, &replay).percent_complete();
        assert!(now >= last, "{} fell from {} to {}", event.phase, last, now);
        last = now;
    }
    assert_eq!(last, 62.5);
}
