//! Final run report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::core::deps::BlockReason;
use crate::core::task::TaskId;

/// A task that failed during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTask {
    pub id: TaskId,
    pub name: String,
    pub reason: String,
}

/// A task that never became ready before the run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unresolved {
    pub id: TaskId,
    pub name: String,
    pub reason: BlockReason,
}

/// Everything a run did, including what it could not do.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ledger: PathBuf,
    /// Completed during this run, in completion order.
    pub completed: Vec<TaskId>,
    /// Already completed in the ledger when the run started.
    pub already_completed: Vec<TaskId>,
    pub failed: Vec<FailedTask>,
    pub unresolved: Vec<Unresolved>,
    pub rounds: u32,
    pub dispatches: u32,
    /// Completed via the stability ceiling rather than a completion marker.
    pub forced_completions: Vec<TaskId>,
    /// Ids that appeared on more than one ledger row.
    pub duplicate_ids: Vec<TaskId>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(ledger: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            ledger,
            completed: Vec::new(),
            already_completed: Vec::new(),
            failed: Vec::new(),
            unresolved: Vec::new(),
            rounds: 0,
            dispatches: 0,
            forced_completions: Vec::new(),
            duplicate_ids: Vec::new(),
            cancelled: false,
            started_at: now,
            finished_at: now,
        }
    }

    /// True when nothing failed, nothing is left unresolved and the run was
    /// not cancelled.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.unresolved.is_empty() && !self.cancelled
    }

    /// Unresolved tasks blocked by a dependency that failed in this run.
    pub fn blocked_by_failures(&self) -> impl Iterator<Item = &Unresolved> {
        self.unresolved
            .iter()
            .filter(|u| matches!(u.reason, BlockReason::FailedDependency(_)))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run report for {}", self.ledger.display())?;
        writeln!(
            f,
            "  rounds: {}, dispatches: {}, duration: {}s",
            self.rounds,
            self.dispatches,
            (self.finished_at - self.started_at).num_seconds()
        )?;
        if self.cancelled {
            writeln!(f, "  run was cancelled")?;
        }
        writeln!(
            f,
            "  completed: {} (plus {} already completed)",
            self.completed.len(),
            self.already_completed.len()
        )?;
        for id in &self.completed {
            let note = if self.forced_completions.contains(id) {
                " (forced)"
            } else {
                ""
            };
            writeln!(f, "    Task {}{}", id, note)?;
        }
        writeln!(f, "  failed: {}", self.failed.len())?;
        for failed in &self.failed {
            writeln!(f, "    Task {} {}: {}", failed.id, failed.name, failed.reason)?;
        }
        writeln!(f, "  unresolved: {}", self.unresolved.len())?;
        for unresolved in &self.unresolved {
            writeln!(
                f,
                "    Task {} {}: {}",
                unresolved.id, unresolved.name, unresolved.reason
            )?;
        }
        if !self.duplicate_ids.is_empty() {
            let ids: Vec<String> = self.duplicate_ids.iter().map(|id| id.to_string()).collect();
            writeln!(f, "  duplicate ids (last row used): {}", ids.join(", "))?;
        }
        Ok(())
    }
}
