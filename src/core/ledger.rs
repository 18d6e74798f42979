//! Markdown task ledger parsing and row rewriting.
//!
//! A task row is exactly eight pipe-delimited cells:
//! `| id | name | category | time | status | progress | dependencies | next action |`.
//! Anything else (headers, separators, prose, rows with a different cell count)
//! is skipped silently.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::qlog_warn;

/// Fixed-arity task row: numeric id followed by seven free-text cells.
static ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*\|\s*(\d+)\s*\|([^|]*)\|([^|]*)\|([^|]*)\|([^|]*)\|([^|]*)\|([^|]*)\|([^|]*)\|\s*$",
    )
    .unwrap()
});

const STATUS_GROUP: usize = 5;
const PROGRESS_GROUP: usize = 6;

/// Parsed view of a ledger file.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    /// Tasks in row order. A duplicated id keeps only its last row.
    pub tasks: Vec<Task>,
    /// Ids that appeared on more than one row.
    pub duplicates: Vec<TaskId>,
}

impl Ledger {
    pub fn parse(text: &str) -> Self {
        let mut tasks: Vec<Task> = Vec::new();
        let mut duplicates = Vec::new();

        for line in text.lines() {
            let Some(task) = parse_row(line) else {
                continue;
            };
            if let Some(pos) = tasks.iter().position(|t| t.id == task.id) {
                qlog_warn!(
                    "Ledger: duplicate task id {}, the later row wins",
                    task.id
                );
                if !duplicates.contains(&task.id) {
                    duplicates.push(task.id);
                }
                tasks[pos] = task;
                continue;
            }
            tasks.push(task);
        }

        Self { tasks, duplicates }
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Ids already marked completed in the ledger.
    pub fn completed_ids(&self) -> BTreeSet<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.is_completed())
            .map(|t| t.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn parse_row(line: &str) -> Option<Task> {
    let caps = ROW_RE.captures(line)?;
    let cell = |i: usize| caps.get(i).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
    let id: u32 = cell(1).parse().ok()?;

    Some(Task {
        id: TaskId(id),
        name: cell(2),
        category: cell(3),
        estimate: cell(4),
        status: TaskStatus::from_label(&cell(STATUS_GROUP)),
        progress: cell(PROGRESS_GROUP),
        dependencies: cell(7),
        next_action: cell(8),
    })
}

/// Rewrite the status and progress cells of the row holding `id`.
///
/// Only those two cells change; every other byte of the ledger, line endings
/// included, is preserved. When the id appears on several rows the last one
/// is rewritten, matching the parse rule. Returns `None` if no row has the id.
pub fn rewrite_row(text: &str, id: TaskId, status: &str, progress: &str) -> Option<String> {
    let content = row_text(text, id)?;
    let caps = ROW_RE.captures(content)?;
    let status_range = caps.get(STATUS_GROUP)?.range();
    let progress_range = caps.get(PROGRESS_GROUP)?.range();

    let mut row = String::with_capacity(content.len() + 16);
    row.push_str(&content[..status_range.start]);
    row.push_str(&format!(" {} ", status));
    row.push_str(&content[status_range.end..progress_range.start]);
    row.push_str(&format!(" {} ", progress));
    row.push_str(&content[progress_range.end..]);
    replace_row(text, id, &row)
}

/// The row holding `id` exactly as written, without its line ending.
///
/// On duplicate ids this is the last row, the one the parse keeps.
pub fn row_text(text: &str, id: TaskId) -> Option<&str> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    target_line(&lines, id).map(|i| strip_eol(lines[i]).0)
}

/// Replace the whole row holding `id` with `row`, keeping its line ending.
///
/// `row` must itself be a row for `id`. Returns `None` when no row holds
/// the id or `row` does not.
pub fn replace_row(text: &str, id: TaskId, row: &str) -> Option<String> {
    if row_id(row) != Some(id) {
        return None;
    }
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let target = target_line(&lines, id)?;

    let mut out = String::with_capacity(text.len() + row.len());
    for (i, line) in lines.iter().enumerate() {
        if i == target {
            out.push_str(row);
            out.push_str(strip_eol(line).1);
        } else {
            out.push_str(line);
        }
    }
    Some(out)
}

fn row_id(line: &str) -> Option<TaskId> {
    ROW_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(TaskId)
}

fn target_line(lines: &[&str], id: TaskId) -> Option<usize> {
    lines
        .iter()
        .rposition(|line| row_id(strip_eol(line).0) == Some(id))
}

fn strip_eol(line: &str) -> (&str, &str) {
    if let Some(content) = line.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = line.strip_suffix('\n') {
        (content, "\n")
    } else {
        (line, "")
    }
}
