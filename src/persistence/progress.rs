//! Human-readable progress snapshot, rewritten at every round boundary.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::ledger::Ledger;
use crate::core::task::TaskId;
use crate::orchestration::report::Unresolved;
use crate::orchestration::round::RoundState;
use crate::persistence::store::temp_path_for;
use crate::util::blocking;
use crate::{qlog_debug, Result};

#[derive(Debug, Clone)]
struct Completion {
    id: TaskId,
    name: String,
    at: DateTime<Local>,
}

/// Keeps the recent-completion history and writes the snapshot file.
#[derive(Debug)]
pub struct ProgressWriter {
    path: PathBuf,
    recent_limit: usize,
    recent: VecDeque<Completion>,
}

impl ProgressWriter {
    pub fn new(path: impl Into<PathBuf>, recent_limit: usize) -> Self {
        Self {
            path: path.into(),
            recent_limit,
            recent: VecDeque::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_completion(&mut self, id: TaskId, name: &str) {
        self.recent.push_front(Completion {
            id,
            name: name.to_string(),
            at: Local::now(),
        });
        self.recent.truncate(self.recent_limit);
    }

    /// Render the snapshot for the current state.
    pub fn render(
        &self,
        ledger: &Ledger,
        state: &RoundState,
        in_flight: Option<TaskId>,
        unresolved: &[Unresolved],
    ) -> String {
        let total = ledger.len();
        let completed = state.completed.len();
        let failed = state.failed.len();
        let in_flight_count = usize::from(in_flight.is_some());
        let pending = state.pending.len().saturating_sub(in_flight_count);
        let percent = if total == 0 {
            100
        } else {
            completed * 100 / total
        };

        let mut out = String::new();
        let _ = writeln!(out, "# Progress\n");
        let _ = writeln!(out, "Updated: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Round: {}\n", state.round);
        let _ = writeln!(out, "| Total | Completed | Failed | In flight | Pending | Done |");
        let _ = writeln!(out, "|-------|-----------|--------|-----------|---------|------|");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {}% |",
            total, completed, failed, in_flight_count, pending, percent
        );

        if let Some(id) = in_flight {
            let name = ledger.task(id).map(|t| t.name.as_str()).unwrap_or("");
            let _ = writeln!(out, "\n## In flight\n\n- Task {}: {}", id, name);
        }

        if !self.recent.is_empty() {
            let _ = writeln!(out, "\n## Recent completions\n");
            for c in &self.recent {
                let _ = writeln!(
                    out,
                    "- {} Task {}: {}",
                    c.at.format("%H:%M:%S"),
                    c.id,
                    c.name
                );
            }
        }

        if !state.failed.is_empty() {
            let _ = writeln!(out, "\n## Failed\n");
            for id in &state.failed {
                let name = ledger.task(*id).map(|t| t.name.as_str()).unwrap_or("");
                let _ = writeln!(out, "- Task {}: {}", id, name);
            }
        }

        if !unresolved.is_empty() {
            let _ = writeln!(out, "\n## Unresolved\n");
            for u in unresolved {
                let _ = writeln!(out, "- Task {}: {} ({})", u.id, u.name, u.reason);
            }
        }
        out
    }

    pub async fn write(
        &self,
        ledger: &Ledger,
        state: &RoundState,
        in_flight: Option<TaskId>,
        unresolved: &[Unresolved],
    ) -> Result<()> {
        let contents = self.render(ledger, state, in_flight, unresolved);
        let path = self.path.clone();
        blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }
            let temp_path = temp_path_for(&path)?;
            fs::write(&temp_path, &contents)?;
            fs::rename(&temp_path, &path)?;
            qlog_debug!("Progress snapshot written: {}", path.display());
            Ok(())
        })
        .await
    }
}
