//! Round-based execution of the task ledger.
//!
//! Each round partitions the pending tasks into ready and not-ready against
//! the completed set, then dispatches the ready ones one at a time: build the
//! instruction, submit it, wait for the turn to finish, validate, persist.
//! Not-ready tasks carry over. The run stops when nothing is pending or when
//! `stall_ceiling` consecutive rounds completed nothing.
//!
//! Exactly one task is in flight and one remote session is live at a time.
//! The session is opened lazily on the first dispatch, so a run with nothing
//! to do never touches the remote endpoint.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{progress_path_for, Config};
use crate::core::deps::{is_ready, DependencyGraph};
use crate::core::ledger::Ledger;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::orchestration::prompt::{DetailLoader, FsDetailLoader, PromptBuilder, TemplatePromptBuilder};
use crate::orchestration::report::{FailedTask, RunReport, Unresolved};
use crate::orchestration::round::{RoundOutcome, RoundState};
use crate::orchestration::sync::{ResponseSynchronizer, SyncOptions, SyncOutcome, SyncState};
use crate::orchestration::validate::{Assessment, KeywordValidator, ResponseValidator};
use crate::persistence::{LedgerStore, ProgressWriter};
use crate::remote::{connect_with_retry, submit_instruction, Connector, RemoteAgent};
use crate::util::{blocking, sleep_or_cancel};
use crate::{qlog, qlog_debug, qlog_error, qlog_warn, Error, Result};

/// Events emitted while a run progresses.
///
/// The channel is bounded; the receiver must keep draining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    RoundStarted {
        round: u32,
        ready: Vec<TaskId>,
    },
    TaskStarted {
        task_id: TaskId,
        name: String,
    },
    TaskCompleted {
        task_id: TaskId,
        /// Completion came from the stability ceiling.
        forced: bool,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    RoundFinished {
        round: u32,
        completed: usize,
        stall_count: u32,
    },
    RunFinished {
        completed: usize,
        failed: usize,
        unresolved: usize,
    },
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub endpoint: String,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    /// Consecutive rounds with no completion before the run stops.
    pub stall_ceiling: u32,
    /// Pause after every dispatch, whatever the outcome.
    pub inter_task_delay: Duration,
    pub fresh_conversation: bool,
    pub sync: SyncOptions,
    /// Snapshot location; `None` puts `PROGRESS.md` beside the ledger.
    pub progress_file: Option<PathBuf>,
    pub recent_completions: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SchedulerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            connect_attempts: config.connect_attempts,
            connect_backoff: config.connect_backoff(),
            stall_ceiling: config.stall_ceiling,
            inter_task_delay: config.inter_task_delay(),
            fresh_conversation: config.fresh_conversation,
            sync: SyncOptions::from_config(config),
            progress_file: config.progress_file(),
            recent_completions: config.recent_completions,
        }
    }
}

/// Mutable state of one invocation, threaded through the round loop.
struct Run {
    store: LedgerStore,
    ledger: Ledger,
    progress: ProgressWriter,
    session: Option<Box<dyn RemoteAgent>>,
    state: RoundState,
    report: RunReport,
}

pub struct Scheduler {
    connector: Arc<dyn Connector>,
    options: SchedulerOptions,
    synchronizer: ResponseSynchronizer,
    prompt_builder: Arc<dyn PromptBuilder>,
    detail_loader: Arc<dyn DetailLoader>,
    validator: Arc<dyn ResponseValidator>,
    cancel: CancellationToken,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
}

impl Scheduler {
    pub fn new(connector: Arc<dyn Connector>, options: SchedulerOptions) -> Self {
        Self {
            connector,
            synchronizer: ResponseSynchronizer::new(options.sync.clone()),
            options,
            prompt_builder: Arc::new(TemplatePromptBuilder),
            detail_loader: Arc::new(FsDetailLoader::default()),
            validator: Arc::new(KeywordValidator::default()),
            cancel: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// Scheduler with every collaborator configured from `config`.
    pub fn from_config(connector: Arc<dyn Connector>, config: &Config) -> Self {
        Self::new(connector, SchedulerOptions::from_config(config))
            .with_detail_loader(Arc::new(FsDetailLoader::new(config.docs_dir())))
            .with_validator(Arc::new(KeywordValidator::new(config.min_response_chars)))
    }

    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    pub fn with_detail_loader(mut self, loader: Arc<dyn DetailLoader>) -> Self {
        self.detail_loader = loader;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, event_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Run the whole ledger until nothing is pending or the queue stalls.
    ///
    /// Only a failure to establish the remote session (or an I/O failure on
    /// the ledger) is returned as `Err`. Per-task failures and unresolved
    /// dependencies are reported in the `RunReport`. Cancellation yields a
    /// report with `cancelled` set.
    pub async fn run_schedule(&self, ledger_path: &Path) -> Result<RunReport> {
        let mut run = self.open_run(ledger_path).await?;
        qlog!(
            "Run started: {} tasks, {} pending, {} already completed",
            run.ledger.len(),
            run.state.pending.len(),
            run.report.already_completed.len()
        );

        let result = self.run_rounds(&mut run).await;
        self.close_session(&mut run).await;

        match result {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                qlog_warn!("Run cancelled after {} rounds", run.state.round);
                run.report.cancelled = true;
            }
            Err(e) => {
                qlog_error!("Run aborted: {}", e);
                return Err(e);
            }
        }

        self.finish_report(&mut run);
        self.write_snapshot(&run, None).await;
        self.emit(SchedulerEvent::RunFinished {
            completed: run.report.completed.len(),
            failed: run.report.failed.len(),
            unresolved: run.report.unresolved.len(),
        })
        .await;
        qlog!(
            "Run finished: {} completed, {} failed, {} unresolved in {} rounds",
            run.report.completed.len(),
            run.report.failed.len(),
            run.report.unresolved.len(),
            run.report.rounds
        );
        Ok(run.report)
    }

    /// Dispatch one task regardless of the round loop.
    ///
    /// Already completed tasks return `true` without a dispatch. Unmet
    /// dependencies are logged and the task is dispatched anyway.
    pub async fn run_single_task(&self, ledger_path: &Path, id: TaskId) -> Result<bool> {
        let mut run = self.open_run(ledger_path).await?;
        let task = run.ledger.task(id).cloned().ok_or(Error::TaskNotFound(id))?;

        if task.is_completed() {
            qlog!("Task {} already completed, nothing to do", id);
            return Ok(true);
        }
        if !is_ready(&task, &run.state.completed) {
            qlog_warn!(
                "Task {} has unmet dependencies ({}), dispatching anyway",
                id,
                task.dependencies
            );
        }

        let result = self.attempt(&mut run, id).await;
        self.close_session(&mut run).await;
        let success = result?;

        let mut outcome = RoundOutcome::default();
        outcome.record(id, success);
        run.state = std::mem::take(&mut run.state).apply(&outcome);
        self.write_snapshot(&run, None).await;
        Ok(success)
    }

    async fn open_run(&self, ledger_path: &Path) -> Result<Run> {
        let store = LedgerStore::new(ledger_path);
        let ledger = store.load().await?;
        let state = RoundState::from_ledger(&ledger);

        let mut report = RunReport::new(ledger_path.to_path_buf());
        report.duplicate_ids = ledger.duplicates.clone();
        report.already_completed = ledger
            .tasks
            .iter()
            .filter(|t| t.is_completed())
            .map(|t| t.id)
            .collect();

        let progress_path = progress_path_for(self.options.progress_file.as_deref(), ledger_path);

        Ok(Run {
            store,
            ledger,
            progress: ProgressWriter::new(progress_path, self.options.recent_completions),
            session: None,
            state,
            report,
        })
    }

    async fn run_rounds(&self, run: &mut Run) -> Result<()> {
        while !run.state.is_finished(self.options.stall_ceiling) {
            let round = run.state.round + 1;
            let ready = run.state.ready(&run.ledger);
            qlog_debug!(
                "Round {}: {} ready of {} pending (stall {}/{})",
                round,
                ready.len(),
                run.state.pending.len(),
                run.state.stall_count,
                self.options.stall_ceiling
            );
            self.emit(SchedulerEvent::RoundStarted {
                round,
                ready: ready.clone(),
            })
            .await;

            let mut outcome = RoundOutcome::default();
            let result = self.run_round(run, &ready, &mut outcome).await;
            run.state = std::mem::take(&mut run.state).apply(&outcome);
            result?;

            self.write_snapshot(run, None).await;
            self.emit(SchedulerEvent::RoundFinished {
                round,
                completed: outcome.completed.len(),
                stall_count: run.state.stall_count,
            })
            .await;
        }
        Ok(())
    }

    async fn run_round(&self, run: &mut Run, ready: &[TaskId], outcome: &mut RoundOutcome) -> Result<()> {
        for &id in ready {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let success = self.attempt(run, id).await?;
            outcome.record(id, success);
            sleep_or_cancel(self.options.inter_task_delay, &self.cancel).await?;
        }
        Ok(())
    }

    /// One dispatch of one task, with its outcome persisted.
    ///
    /// Returns `Ok(false)` for a failed attempt. `Err` means the run must
    /// stop: the session could not be established, the ledger could not be
    /// written, or the run was cancelled.
    async fn attempt(&self, run: &mut Run, id: TaskId) -> Result<bool> {
        let task = run.ledger.task(id).cloned().ok_or(Error::TaskNotFound(id))?;
        self.ensure_session(run).await?;

        let original_row = run.store.read_row(id).await?;
        self.set_status(run, &task, TaskStatus::Dispatched, &task.progress).await?;
        run.report.dispatches += 1;
        qlog!("Dispatching task {}: {}", id, task.name);
        self.emit(SchedulerEvent::TaskStarted {
            task_id: id,
            name: task.name.clone(),
        })
        .await;
        self.write_snapshot(run, Some(id)).await;

        let result = match run.session.as_deref() {
            Some(agent) => self.dispatch(agent, &task).await,
            None => Err(Error::Connection("remote session closed".to_string())),
        };

        match result {
            Err(Error::Cancelled) => {
                if let Some(agent) = run.session.as_deref() {
                    agent.cancel_turn().await;
                }
                run.store.restore_row(id, &original_row).await?;
                if let Some(entry) = run.ledger.task_mut(id) {
                    *entry = task.clone();
                }
                qlog_warn!("Task {} interrupted, ledger row restored", id);
                Err(Error::Cancelled)
            }
            Err(e) => {
                let error = e.into_dispatch(id);
                qlog_warn!("{}", error);
                self.close_session(run).await;
                self.fail_task(run, &task, error.to_string()).await?;
                Ok(false)
            }
            Ok(outcome) => self.settle(run, &task, outcome).await,
        }
    }

    async fn dispatch(&self, agent: &dyn RemoteAgent, task: &Task) -> Result<SyncOutcome> {
        let loader = Arc::clone(&self.detail_loader);
        let detail_task = task.clone();
        let details = blocking(move || loader.load(&detail_task)).await?;
        let instruction = self.prompt_builder.build(task, &details);

        let baseline =
            submit_instruction(agent, &instruction, self.options.fresh_conversation).await?;
        self.synchronizer
            .wait_for_completion(agent, baseline.as_deref(), &self.cancel)
            .await
    }

    /// Classify a finished turn and persist the result.
    async fn settle(&self, run: &mut Run, task: &Task, outcome: SyncOutcome) -> Result<bool> {
        qlog_debug!(
            "Task {} turn ended: state={} forced={} polls={} chars={}",
            task.id,
            outcome.state,
            outcome.forced,
            outcome.polls,
            outcome.text.chars().count()
        );

        let verdict = match outcome.state {
            SyncState::Complete => self.validator.assess(&outcome),
            other => Assessment::Rejected(format!("response ended in state {}", other)),
        };

        match verdict {
            Assessment::Accepted => {
                self.set_status(run, task, TaskStatus::Completed, "100%").await?;
                run.progress.record_completion(task.id, &task.name);
                if outcome.forced {
                    run.report.forced_completions.push(task.id);
                }
                qlog!(
                    "Task {} completed{}",
                    task.id,
                    if outcome.forced { " (forced)" } else { "" }
                );
                self.emit(SchedulerEvent::TaskCompleted {
                    task_id: task.id,
                    forced: outcome.forced,
                })
                .await;
                Ok(true)
            }
            Assessment::Rejected(reason) => {
                qlog_warn!("Task {} rejected: {}", task.id, reason);
                self.fail_task(run, task, reason).await?;
                Ok(false)
            }
        }
    }

    async fn fail_task(&self, run: &mut Run, task: &Task, reason: String) -> Result<()> {
        self.set_status(run, task, TaskStatus::Failed, &task.progress).await?;
        run.report.failed.push(FailedTask {
            id: task.id,
            name: task.name.clone(),
            reason: reason.clone(),
        });
        self.emit(SchedulerEvent::TaskFailed {
            task_id: task.id,
            error: reason,
        })
        .await;
        Ok(())
    }

    /// Update the in-memory ledger and the file row together.
    async fn set_status(&self, run: &mut Run, task: &Task, status: TaskStatus, progress: &str) -> Result<()> {
        if let Some(entry) = run.ledger.task_mut(task.id) {
            entry.status = status;
            entry.progress = progress.to_string();
        }
        run.store.write_status(task.id, status, progress).await?;
        Ok(())
    }

    async fn ensure_session(&self, run: &mut Run) -> Result<()> {
        if run.session.is_some() {
            return Ok(());
        }
        let agent = connect_with_retry(
            self.connector.as_ref(),
            &self.options.endpoint,
            self.options.connect_attempts,
            self.options.connect_backoff,
            &self.cancel,
        )
        .await?;
        run.session = Some(agent);
        Ok(())
    }

    async fn close_session(&self, run: &mut Run) {
        if let Some(mut agent) = run.session.take() {
            agent.disconnect().await;
        }
    }

    fn finish_report(&self, run: &mut Run) {
        let graph = DependencyGraph::build(&run.ledger.tasks);
        let state = &run.state;
        run.report.completed = state.completed_this_run.clone();
        run.report.rounds = state.round;
        run.report.unresolved = state
            .pending
            .iter()
            .filter_map(|id| run.ledger.task(*id))
            .map(|task| Unresolved {
                id: task.id,
                name: task.name.clone(),
                reason: graph.block_reason(task.id, task, &state.failed, &state.completed),
            })
            .collect();
        for unresolved in run.report.blocked_by_failures() {
            qlog_warn!(
                "Task {} can never run in this run: {}",
                unresolved.id,
                unresolved.reason
            );
        }
        run.report.finished_at = Utc::now();
    }

    /// Snapshot failures are logged, never fatal.
    async fn write_snapshot(&self, run: &Run, in_flight: Option<TaskId>) {
        if let Err(e) = run
            .progress
            .write(&run.ledger, &run.state, in_flight, &run.report.unresolved)
            .await
        {
            qlog_warn!(
                "Could not write progress snapshot {}: {}",
                run.progress.path().display(),
                e
            );
        }
    }

    async fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}
