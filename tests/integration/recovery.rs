//! Failure handling: per-task failures are recovered, session failures are fatal.

use std::time::Duration;

use queuepilot::core::deps::BlockReason;
use queuepilot::core::task::TaskId;
use queuepilot::orchestration::SyncOptions;
use queuepilot::Error;

use crate::fixtures::*;

#[tokio::test(start_paused = true)]
async fn test_failed_task_does_not_stop_the_run() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Setup", "Ready", "-"),
        (2, "Parser", "Ready", "-"),
        (3, "Docs", "Ready", "Task 1"),
    ]));
    let state = FakeState::new();
    state.reply(1, Reply::ErrorBanner);

    let report = scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    assert_eq!(report.completed, vec![TaskId(2)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, TaskId(1));
    assert_eq!(report.failed[0].reason, "response ended in state error");
    assert_eq!(
        report.unresolved[0].reason,
        BlockReason::FailedDependency(vec![TaskId(1)])
    );
    assert_eq!(report.blocked_by_failures().count(), 1);
    // Failed tasks are not retried within the run.
    assert_eq!(state.submitted(), vec![1, 2]);
    assert_eq!(ledger.row(1), "| 1 | Setup | Core | 1h | Failed | 0% | - | Next |");
}

#[tokio::test(start_paused = true)]
async fn test_submit_failure_reconnects_for_next_task() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Setup", "Ready", "-"),
        (2, "Parser", "Ready", "-"),
    ]));
    let state = FakeState::new();
    state.reply(1, Reply::SubmitFails);

    let report = scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    assert_eq!(report.completed, vec![TaskId(2)]);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].reason.contains("input surface detached"));
    assert_eq!(state.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_turn_times_out() {
    let ledger = TestLedger::new(&ledger(&[(1, "Setup", "Ready", "-")]));
    let state = FakeState::new();
    state.reply(1, Reply::Hang);

    let mut options = test_options();
    options.sync = SyncOptions {
        max_wait: Duration::from_secs(30),
        ..options.sync
    };
    let report = scheduler_with(&state, options)
        .run_schedule(&ledger.path)
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].reason, "response ended in state timeout");
    assert_eq!(ledger.row(1), "| 1 | Setup | Core | 1h | Failed | 0% | - | Next |");
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_endpoint_is_fatal() {
    let content = ledger(&[(1, "Setup", "Ready", "-")]);
    let ledger = TestLedger::new(&content);
    let state = FakeState::unreachable();

    let result = scheduler(&state).run_schedule(&ledger.path).await;

    assert!(matches!(result, Err(Error::Connection(_))));
    assert_eq!(state.connects(), 2);
    assert_eq!(ledger.read(), content);
}

#[tokio::test(start_paused = true)]
async fn test_previously_failed_task_is_retried_on_new_run() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Setup", "Failed", "-"),
        (2, "Parser", "Ready", "Task 1"),
    ]));
    let state = FakeState::new();

    let report = scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    assert_eq!(report.completed, vec![TaskId(1), TaskId(2)]);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_missing_ledger_is_io_error() {
    let state = FakeState::new();
    let result = scheduler(&state)
        .run_schedule(std::path::Path::new("/nonexistent/TASKS.md"))
        .await;
    assert!(matches!(result, Err(Error::Io(_))));
}

#[tokio::test(start_paused = true)]
async fn test_previous_reply_on_screen_is_not_the_new_answer() {
    let ledger = TestLedger::new(&ledger(&[
        (1, "Setup", "Ready", "-"),
        (2, "Parser", "Ready", "-"),
    ]));
    let state = FakeState::single_conversation(3);
    state.reply(
        1,
        Reply::Success("Implemented the project setup and wired the CI job. 2 files changed"),
    );
    state.reply(2, Reply::ErrorBanner);

    let report = scheduler(&state).run_schedule(&ledger.path).await.unwrap();

    // Task 1's reply is still showing while task 2 renders; it must not count.
    assert_eq!(report.completed, vec![TaskId(1)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, TaskId(2));
    assert_eq!(report.failed[0].reason, "response ended in state error");
    assert_eq!(ledger.row(2), "| 2 | Parser | Core | 1h | Failed | 0% | - | Next |");
}
