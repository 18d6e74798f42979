//! Instruction building for dispatched tasks.
//!
//! Two collaborators: a [`DetailLoader`] fetches the implementation notes for
//! a task, and a [`PromptBuilder`] turns task + notes into the instruction
//! text submitted to the remote agent.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::task::Task;
use crate::{qlog_debug, Result};

/// Builds the instruction submitted for a task.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, task: &Task, details: &str) -> String;
}

/// Loads the implementation details for a task.
pub trait DetailLoader: Send + Sync {
    fn load(&self, task: &Task) -> Result<String>;
}

/// Default instruction layout.
#[derive(Debug, Clone, Default)]
pub struct TemplatePromptBuilder;

impl PromptBuilder for TemplatePromptBuilder {
    fn build(&self, task: &Task, details: &str) -> String {
        let mut prompt = format!("Implement Task {}: {}\n\n", task.id, task.name);
        if !task.category.is_empty() {
            prompt.push_str(&format!("Category: {}\n", task.category));
        }
        if !task.estimate.is_empty() {
            prompt.push_str(&format!("Estimated time: {}\n", task.estimate));
        }
        if !task.dependencies.is_empty() && task.dependencies != "-" {
            prompt.push_str(&format!(
                "Builds on (already completed): {}\n",
                task.dependencies
            ));
        }
        prompt.push_str("\n## Details\n\n");
        prompt.push_str(details.trim());
        prompt.push_str(
            "\n\n## When you are done\n\n\
             Apply the changes directly in the workspace. Finish with a short \
             summary of what changed and state clearly whether the task is \
             complete or what blocked it.\n",
        );
        prompt
    }
}

/// Reads `task-<id>.md` or `task-<id>-<slug>.md` from a docs directory and
/// falls back to a summary synthesized from the ledger row.
#[derive(Debug, Clone, Default)]
pub struct FsDetailLoader {
    docs_dir: Option<PathBuf>,
}

impl FsDetailLoader {
    pub fn new(docs_dir: Option<PathBuf>) -> Self {
        Self { docs_dir }
    }

    fn find_doc(dir: &Path, task: &Task) -> Result<Option<PathBuf>> {
        let exact = dir.join(format!("task-{}.md", task.id));
        if exact.is_file() {
            return Ok(Some(exact));
        }
        if !dir.is_dir() {
            return Ok(None);
        }

        let prefix = format!("task-{}-", task.id);
        let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().is_some_and(|ext| ext == "md")
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();
        candidates.sort();
        Ok(candidates.into_iter().next())
    }
}

impl DetailLoader for FsDetailLoader {
    fn load(&self, task: &Task) -> Result<String> {
        if let Some(dir) = &self.docs_dir {
            if let Some(path) = Self::find_doc(dir, task)? {
                qlog_debug!("Task {} details from {}", task.id, path.display());
                return Ok(fs::read_to_string(path)?);
            }
        }
        qlog_debug!("Task {} has no detail doc, synthesizing summary", task.id);
        Ok(synthesize_summary(task))
    }
}

fn synthesize_summary(task: &Task) -> String {
    let mut summary = format!("Task {}: {}\n", task.id, task.name);
    if !task.category.is_empty() {
        summary.push_str(&format!("- Category: {}\n", task.category));
    }
    summary.push_str(&format!("- Current progress: {}\n", task.progress));
    let next = task.next_action.trim();
    if !next.is_empty() && next != "-" {
        summary.push_str(&format!("- Next action: {}\n", next));
    }
    summary
}
