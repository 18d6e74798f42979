//! End-to-end runs over real ledger files with a scripted remote agent.

use queuepilot::core::deps::BlockReason;
use queuepilot::core::task::TaskId;
use queuepilot::SchedulerEvent;
use tokio::sync::mpsc;

use crate::fixtures::*;

#[tokio::test(start_paused = true)]
async fn test_dependency_chain_and_missing_dependency() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Setup", "Ready", "-"),
        (2, "Parser", "Ready", "Task 1"),
        (3, "Docs", "Ready", "Task 4"),
    ]));
    let state = FakeState::new();

    let report = scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    assert_eq!(report.completed, vec![TaskId(1), TaskId(2)]);
    assert!(report.failed.is_empty());
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].id, TaskId(3));
    assert_eq!(
        report.unresolved[0].reason,
        BlockReason::MissingDependency(vec![TaskId(4)])
    );
    assert_eq!(state.submitted(), vec![1, 2]);
    assert_eq!(report.dispatches, 2);
    // Two productive rounds, then three stalled ones.
    assert_eq!(report.rounds, 5);
    assert!(!report.is_success());

    assert_eq!(ledger.row(1), "| 1 | Setup | Core | 1h | Completed | 100% | - | Next |");
    assert_eq!(ledger.row(2), "| 2 | Parser | Core | 1h | Completed | 100% | Task 1 | Next |");
    assert_eq!(ledger.row(3), "| 3 | Docs | Core | 1h | Ready | 0% | Task 4 | Next |");
    assert!(ledger.read().ends_with("Notes below the table are preserved.\n"));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_stops_at_stall_ceiling() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Left", "Ready", "Task 2"),
        (2, "Right", "Ready", "Task 1"),
    ]));
    let state = FakeState::new();

    let report = scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    assert_eq!(report.rounds, 3);
    assert_eq!(report.dispatches, 0);
    assert_eq!(state.connects(), 0);
    let unresolved: Vec<TaskId> = report.unresolved.iter().map(|u| u.id).collect();
    assert_eq!(unresolved, vec![TaskId(1), TaskId(2)]);
    assert_eq!(report.unresolved[0].reason, BlockReason::Cycle(vec![TaskId(2)]));
    assert_eq!(report.unresolved[1].reason, BlockReason::Cycle(vec![TaskId(1)]));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_next_to_runnable_task() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Left", "Ready", "Task 2"),
        (2, "Right", "Ready", "Task 1"),
        (3, "Free", "Ready", "-"),
    ]));
    let state = FakeState::new();

    let report = scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    assert_eq!(report.completed, vec![TaskId(3)]);
    assert_eq!(report.rounds, 4);
    assert_eq!(report.unresolved.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_completed_ledger_is_untouched() {
    let content = ledger(&[
        (1, "Setup", "Completed", "-"),
        (2, "Parser", "Completed", "Task 1"),
        (3, "Docs", "Completed", "Task 2"),
    ]);
    let ledger = TestLedger::new(&content);
    let state = FakeState::new();
    let scheduler = scheduler(&state);

    for _ in 0..2 {
        let report = scheduler.run_schedule(&ledger.path).await.unwrap();
        assert_eq!(report.dispatches, 0);
        assert_eq!(report.rounds, 0);
        assert_eq!(report.already_completed.len(), 3);
        assert!(report.completed.is_empty());
        assert!(report.is_success());
    }

    assert_eq!(state.connects(), 0);
    assert_eq!(ledger.read(), content);
}

#[tokio::test(start_paused = true)]
async fn test_forced_completion_is_reported() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Setup", "Ready", "-"),
        (2, "Parser", "Ready", "-"),
    ]));
    let state = FakeState::new();
    state.reply(
        1,
        Reply::Silent("Implemented everything you asked for and the tests pass locally."),
    );
    state.reply(
        2,
        Reply::Silent("Here is a summary of the edits made to the scheduler module today."),
    );

    let report = scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    assert_eq!(report.completed, vec![TaskId(1)]);
    assert_eq!(report.forced_completions, vec![TaskId(1)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, TaskId(2));
    assert_eq!(
        report.failed[0].reason,
        "forced completion without success wording"
    );
    assert!(report.to_string().contains("Task 1 (forced)"));
}

#[tokio::test(start_paused = true)]
async fn test_progress_snapshot_written() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Setup", "Ready", "-"),
        (2, "Docs", "Ready", "Task 7"),
    ]));
    let state = FakeState::new();

    scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    let snapshot = std::fs::read_to_string(ledger.progress_path()).unwrap();
    assert!(snapshot.starts_with("# Progress"));
    assert!(snapshot.contains("| 2 | 1 | 0 | 0 | 1 | 50% |"));
    assert!(snapshot.contains("## Recent completions"));
    assert!(snapshot.contains("Task 1: Setup"));
    assert!(snapshot.contains("- Task 2: Docs (depends on missing Task 7)"));
}

#[tokio::test(start_paused = true)]
async fn test_ledger_named_like_the_snapshot_is_kept() {
    let ledger = TestLedger::named(
        "PROGRESS.md",
        &ledger(&[(1, "Setup", "Ready", "-"), (2, "Parser", "Ready", "Task 1")]),
    );
    let state = FakeState::new();

    let report = scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    assert_eq!(report.completed, vec![TaskId(1), TaskId(2)]);
    assert!(ledger.read().starts_with("# Tasks"));
    assert_eq!(ledger.row(2), "| 2 | Parser | Core | 1h | Completed | 100% | Task 1 | Next |");
    let snapshot =
        std::fs::read_to_string(ledger.temp_dir.path().join("PROGRESS.progress.md")).unwrap();
    assert!(snapshot.starts_with("# Progress"));
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_the_run() {
    let ledger = TestLedger::new(&ledger(&[(1, "Setup", "Ready", "-")]));
    let state = FakeState::new();
    let (event_tx, mut event_rx) = mpsc::channel(100);

    let scheduler = scheduler(&state).with_events(event_tx);
    scheduler.run_schedule(&ledger.path).await.unwrap();
    drop(scheduler);

    let mut events = Vec::new();
    while let Some(event) = event_rx.recv().await {
        events.push(event);
    }

    assert_eq!(
        events.first(),
        Some(&SchedulerEvent::RoundStarted {
            round: 1,
            ready: vec![TaskId(1)],
        })
    );
    assert!(events.contains(&SchedulerEvent::TaskCompleted {
        task_id: TaskId(1),
        forced: false,
    }));
    assert_eq!(
        events.last(),
        Some(&SchedulerEvent::RunFinished {
            completed: 1,
            failed: 0,
            unresolved: 0,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_single_task_ignores_unmet_dependencies() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Setup", "Ready", "-"),
        (2, "Parser", "Ready", "Task 1"),
    ]));
    let state = FakeState::new();

    let success = scheduler(&state)
        .run_single_task(&ledger.path, TaskId(2))
        .await
        .unwrap();

    assert!(success);
    assert_eq!(state.submitted(), vec![2]);
    assert_eq!(ledger.row(1), "| 1 | Setup | Core | 1h | Ready | 0% | - | Next |");
    assert_eq!(ledger.row(2), "| 2 | Parser | Core | 1h | Completed | 100% | Task 1 | Next |");
}

#[tokio::test(start_paused = true)]
async fn test_single_task_failure_returns_false() {
    let ledger = TestLedger::new(&ledger(&[(1, "Setup", "Ready", "-")]));
    let state = FakeState::new();
    state.reply(1, Reply::ErrorBanner);

    let success = scheduler(&state)
        .run_single_task(&ledger.path, TaskId(1))
        .await
        .unwrap();

    assert!(!success);
    assert_eq!(ledger.row(1), "| 1 | Setup | Core | 1h | Failed | 0% | - | Next |");
}
