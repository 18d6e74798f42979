//! Round bookkeeping for the scheduler.
//!
//! `RoundState` is a plain value: the scheduler runs one round of dispatches,
//! collects a [`RoundOutcome`], and gets the next state from
//! [`RoundState::apply`]. No counters live on the scheduler itself.

use std::collections::BTreeSet;

use crate::core::deps::is_ready;
use crate::core::ledger::Ledger;
use crate::core::task::{TaskId, TaskStatus};

/// What happened to the tasks dispatched in one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
}

impl RoundOutcome {
    pub fn record(&mut self, id: TaskId, success: bool) {
        if success {
            self.completed.push(id);
        } else {
            self.failed.push(id);
        }
    }
}

/// Scheduling state between rounds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundState {
    /// Rounds run so far.
    pub round: u32,
    /// Tasks still to run, in ledger order.
    pub pending: Vec<TaskId>,
    /// Everything known completed: loaded as completed or finished this run.
    pub completed: BTreeSet<TaskId>,
    /// Completed during this run, in completion order.
    pub completed_this_run: Vec<TaskId>,
    /// Failed during this run. Terminal until the run is restarted.
    pub failed: BTreeSet<TaskId>,
    /// Consecutive rounds that completed nothing.
    pub stall_count: u32,
}

impl RoundState {
    /// Initial state for a ledger: every task not already completed is
    /// pending, including ones a previous run left failed or in progress.
    pub fn from_ledger(ledger: &Ledger) -> Self {
        Self {
            pending: ledger
                .tasks
                .iter()
                .filter(|t| t.status != TaskStatus::Completed)
                .map(|t| t.id)
                .collect(),
            completed: ledger.completed_ids(),
            ..Default::default()
        }
    }

    /// Pending tasks whose dependencies are all completed, in ledger order.
    pub fn ready(&self, ledger: &Ledger) -> Vec<TaskId> {
        self.pending
            .iter()
            .copied()
            .filter(|id| {
                ledger
                    .task(*id)
                    .is_some_and(|task| is_ready(task, &self.completed))
            })
            .collect()
    }

    /// Fold one round's outcome into the next state.
    ///
    /// Completed and failed tasks leave the pending set. The stall counter
    /// increments when nothing completed and resets otherwise.
    pub fn apply(mut self, outcome: &RoundOutcome) -> Self {
        self.round += 1;
        self.pending
            .retain(|id| !outcome.completed.contains(id) && !outcome.failed.contains(id));
        for id in &outcome.completed {
            if self.completed.insert(*id) {
                self.completed_this_run.push(*id);
            }
        }
        self.failed.extend(outcome.failed.iter().copied());
        self.stall_count = if outcome.completed.is_empty() {
            self.stall_count + 1
        } else {
            0
        };
        self
    }

    /// Stop once nothing is pending or the queue stalled `stall_ceiling`
    /// rounds in a row.
    pub fn is_finished(&self, stall_ceiling: u32) -> bool {
        self.pending.is_empty() || self.stall_count >= stall_ceiling
    }
}
