//! Task data model for the ledger-driven queue.
//!
//! A task is one row of the ledger table. Identity is the integer in the
//! first column; the dependency cell is kept as raw text and parsed on
//! demand so the ledger stays the single source of truth.

use serde::{Deserialize, Serialize};

/// Identifier of a task: the integer in the ledger's first column.
///
/// Ids follow row order but need not be contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Task status in its lifecycle.
///
/// The ledger holds free text; it is folded into this closed set on parse
/// and written back using the canonical [`TaskStatus::label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be dispatched (dependencies may or may not be met).
    #[default]
    Ready,
    /// Submitted to the remote agent and awaiting a terminal response.
    Dispatched,
    /// Finished successfully. Never re-enters the queue.
    Completed,
    /// Last attempt failed.
    Failed,
}

impl TaskStatus {
    /// Fold a free-text ledger status into the closed set.
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        if lower.contains("incomplete") || lower.contains("not done") {
            TaskStatus::Ready
        } else if lower.contains('✅') || lower.contains("complete") || lower.contains("done") {
            TaskStatus::Completed
        } else if lower.contains('❌') || lower.contains("fail") {
            TaskStatus::Failed
        } else if lower.contains("progress")
            || lower.contains("dispatch")
            || lower.contains("running")
        {
            TaskStatus::Dispatched
        } else {
            TaskStatus::Ready
        }
    }

    /// Canonical text written into the ledger's status column.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Ready => "Ready",
            TaskStatus::Dispatched => "In Progress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Dispatched => write!(f, "dispatched"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A single task parsed from a ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub category: String,
    /// Time estimate, kept verbatim.
    pub estimate: String,
    pub status: TaskStatus,
    /// Progress percentage as written in the ledger (e.g. "40%").
    pub progress: String,
    /// Raw dependency cell, e.g. "Task 2, Task 5" or "-".
    pub dependencies: String,
    pub next_action: String,
}

impl Task {
    /// Create a ready task with empty optional columns.
    pub fn new(id: u32, name: &str, dependencies: &str) -> Self {
        Self {
            id: TaskId(id),
            name: name.to_string(),
            category: String::new(),
            estimate: String::new(),
            status: TaskStatus::Ready,
            progress: "0%".to_string(),
            dependencies: dependencies.to_string(),
            next_action: String::new(),
        }
    }

    /// Mark the task as handed to the remote agent.
    pub fn dispatch(&mut self) {
        self.status = TaskStatus::Dispatched;
    }

    /// Mark the task as successfully completed.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.progress = "100%".to_string();
    }

    /// Mark the task as failed. Progress is left as it was.
    pub fn fail(&mut self) {
        self.status = TaskStatus::Failed;
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
