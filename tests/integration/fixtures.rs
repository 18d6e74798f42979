//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Writing ledgers into temporary directories
//! - A scripted fake remote agent and connector
//! - Schedulers wired with fast options

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use async_trait::async_trait;
use queuepilot::core::task::{Task, TaskId};
use queuepilot::orchestration::{PromptBuilder, SchedulerOptions, SyncOptions};
use queuepilot::remote::{Connector, MarkerKind, RemoteAgent, TranscriptSource};
use queuepilot::{Error, Result, Scheduler};

pub const HEADER: &str = "\
# Tasks

| ID | Name | Category | Time | Status | Progress | Dependencies | Next Action |
|----|------|----------|------|--------|----------|--------------|-------------|
";

/// Long enough for the default validator and carrying success wording.
pub const SUCCESS_TEXT: &str = "Implemented the requested change and updated the tests. 2 files changed";

/// Build a ledger from `(id, name, status, dependencies)` rows.
pub fn ledger(rows: &[(u32, &str, &str, &str)]) -> String {
    let mut text = HEADER.to_string();
    for (id, name, status, deps) in rows {
        let progress = if *status == "Completed" { "100%" } else { "0%" };
        text.push_str(&format!(
            "| {} | {} | Core | 1h | {} | {} | {} | Next |\n",
            id, name, status, progress, deps
        ));
    }
    text.push_str("\nNotes below the table are preserved.\n");
    text
}

/// A ledger file in a temporary directory.
pub struct TestLedger {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestLedger {
    pub fn new(content: &str) -> Self {
        Self::named("TASKS.md", content)
    }

    pub fn named(file_name: &str, content: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(file_name);
        std::fs::write(&path, content).expect("Failed to write ledger");
        Self { temp_dir, path }
    }

    pub fn read(&self) -> String {
        std::fs::read_to_string(&self.path).expect("Failed to read ledger")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.temp_dir.path().join("PROGRESS.md")
    }

    /// The row for `id` as currently written.
    pub fn row(&self, id: u32) -> String {
        let prefix = format!("| {} |", id);
        self.read()
            .lines()
            .find(|l| l.starts_with(&prefix))
            .map(str::to_string)
            .unwrap_or_default()
    }
}

/// How the fake agent answers one task.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answers with text and shows a completion marker.
    Success(&'static str),
    /// Answers with text but never shows any marker.
    Silent(&'static str),
    /// Shows an error banner without producing output.
    ErrorBanner,
    /// Keeps showing the generating marker forever.
    Hang,
    /// Submission itself fails.
    SubmitFails,
}

/// State shared between the test and every fake session.
pub struct FakeState {
    replies: Mutex<HashMap<TaskId, Reply>>,
    current: Mutex<Option<Reply>>,
    pub submitted: Mutex<Vec<TaskId>>,
    pub connects: AtomicU32,
    pub cancelled_turns: AtomicU32,
    refuse_connections: bool,
    /// Keeps the previous turn on screen: no new conversations.
    reuse_conversation: bool,
    /// Reads before a submitted reply renders.
    render_delay: u32,
    /// Submitted reply not rendered yet, with reads left.
    rendering: Mutex<Option<(Reply, u32)>>,
}

impl FakeState {
    pub fn new() -> Arc<Self> {
        Self::build(false, false, 0)
    }

    /// Every connection attempt is refused.
    pub fn unreachable() -> Arc<Self> {
        Self::build(true, false, 0)
    }

    /// New conversations cannot be opened, and each reply renders only
    /// after `render_delay` transcript reads.
    pub fn single_conversation(render_delay: u32) -> Arc<Self> {
        Self::build(false, true, render_delay)
    }

    fn build(refuse_connections: bool, reuse_conversation: bool, render_delay: u32) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            connects: AtomicU32::new(0),
            cancelled_turns: AtomicU32::new(0),
            refuse_connections,
            reuse_conversation,
            render_delay,
            rendering: Mutex::new(None),
        })
    }

    /// Script the reply for a task. Unscripted tasks succeed.
    pub fn reply(&self, id: u32, reply: Reply) {
        self.replies.lock().unwrap().insert(TaskId(id), reply);
    }

    pub fn submitted(&self) -> Vec<u32> {
        self.submitted.lock().unwrap().iter().map(|id| id.0).collect()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    fn current(&self) -> Option<Reply> {
        self.current.lock().unwrap().clone()
    }

    /// Count one read against a reply that is still rendering.
    fn advance_rendering(&self) {
        let mut rendering = self.rendering.lock().unwrap();
        if let Some((reply, reads_left)) = rendering.take() {
            if reads_left <= 1 {
                *self.current.lock().unwrap() = Some(reply);
            } else {
                *rendering = Some((reply, reads_left - 1));
            }
        }
    }
}

pub struct FakeAgent {
    state: Arc<FakeState>,
}

#[async_trait]
impl TranscriptSource for FakeAgent {
    async fn read_latest(&self) -> Result<Option<String>> {
        self.state.advance_rendering();
        Ok(match self.state.current() {
            Some(Reply::Success(text)) | Some(Reply::Silent(text)) => Some(text.to_string()),
            Some(Reply::Hang) => Some("Thinking...".to_string()),
            _ => None,
        })
    }

    async fn has_marker(&self, kind: MarkerKind) -> Result<bool> {
        Ok(matches!(
            (self.state.current(), kind),
            (Some(Reply::Success(_)), MarkerKind::Completion)
                | (Some(Reply::ErrorBanner), MarkerKind::Error)
                | (Some(Reply::Hang), MarkerKind::Generating)
        ))
    }
}

#[async_trait]
impl RemoteAgent for FakeAgent {
    async fn new_conversation(&self) -> Result<()> {
        if self.state.reuse_conversation {
            return Err(Error::Remote("new chat button not found".to_string()));
        }
        *self.state.current.lock().unwrap() = None;
        Ok(())
    }

    async fn submit(&self, instruction: &str) -> Result<()> {
        let id: TaskId = instruction
            .strip_prefix("TASK-")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Remote(format!("unexpected instruction {:?}", instruction)))?;
        self.state.submitted.lock().unwrap().push(id);

        let reply = self
            .state
            .replies
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or(Reply::Success(SUCCESS_TEXT));
        if reply == Reply::SubmitFails {
            return Err(Error::Remote("input surface detached".to_string()));
        }
        if self.state.render_delay > 0 {
            *self.state.rendering.lock().unwrap() = Some((reply, self.state.render_delay));
        } else {
            *self.state.current.lock().unwrap() = Some(reply);
        }
        Ok(())
    }

    async fn cancel_turn(&self) {
        self.state.cancelled_turns.fetch_add(1, Ordering::SeqCst);
    }

    async fn disconnect(&mut self) {}
}

pub struct FakeConnector {
    state: Arc<FakeState>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _endpoint: &str) -> Result<Box<dyn RemoteAgent>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.refuse_connections {
            return Err(Error::Connection("connection refused".to_string()));
        }
        Ok(Box::new(FakeAgent {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Instruction is just the task id, so the fake agent knows what it got.
pub struct IdPromptBuilder;

impl PromptBuilder for IdPromptBuilder {
    fn build(&self, task: &Task, _details: &str) -> String {
        format!("TASK-{}", task.id)
    }
}

pub fn test_options() -> SchedulerOptions {
    SchedulerOptions {
        connect_attempts: 2,
        connect_backoff: Duration::from_secs(1),
        stall_ceiling: 3,
        inter_task_delay: Duration::from_secs(1),
        sync: SyncOptions {
            poll_interval: Duration::from_secs(1),
            stability_ceiling: 3,
            max_wait: Duration::from_secs(60),
            max_read_errors: 3,
        },
        ..Default::default()
    }
}

pub fn scheduler(state: &Arc<FakeState>) -> Scheduler {
    scheduler_with(state, test_options())
}

pub fn scheduler_with(state: &Arc<FakeState>, options: SchedulerOptions) -> Scheduler {
    let connector = Arc::new(FakeConnector {
        state: Arc::clone(state),
    });
    Scheduler::new(connector, options).with_prompt_builder(Arc::new(IdPromptBuilder))
}
