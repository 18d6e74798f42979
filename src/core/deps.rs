//! Dependency resolution over raw ledger dependency text.
//!
//! Edges are never stored: every caller re-parses the dependency cell, so the
//! ledger text stays authoritative. Readiness (`is_ready`) is the only
//! correctness mechanism for execution order. `presentation_order` is a
//! best-effort pairwise ordering for display and can leave cycles or
//! transitive gaps unresolved. `DependencyGraph` exists purely to explain why
//! tasks never became ready.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use crate::core::task::{Task, TaskId};

/// A single "Task <id>" reference (case-insensitive, optional `#`).
static TASK_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^task\s*#?\s*(\d+)$").unwrap());

/// Parse a dependency cell into the set of prerequisite ids.
///
/// Empty cells and dash placeholders yield no dependencies. Entries that are
/// not "Task <id>" references (bare numbers, prose) are ignored.
///
/// ```
/// use queuepilot::core::deps::parse_dependencies;
/// use queuepilot::core::task::TaskId;
///
/// let deps = parse_dependencies("Task 2, Task 5");
/// assert!(deps.contains(&TaskId(2)) && deps.contains(&TaskId(5)));
/// assert!(parse_dependencies("-").is_empty());
/// assert!(parse_dependencies("foo").is_empty());
/// ```
pub fn parse_dependencies(text: &str) -> BTreeSet<TaskId> {
    let trimmed = text.trim();
    if is_placeholder(trimmed) {
        return BTreeSet::new();
    }

    trimmed
        .split(',')
        .filter_map(|entry| {
            TASK_REF_RE
                .captures(entry.trim())
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .map(TaskId)
        })
        .collect()
}

fn is_placeholder(text: &str) -> bool {
    text.is_empty() || text.chars().all(|c| matches!(c, '-' | '–' | '—'))
}

/// True iff every dependency of `task` is in `completed`.
///
/// Unknown ids count as unsatisfied. A failed dependency is not treated
/// specially: the task just stays not-ready.
pub fn is_ready(task: &Task, completed: &BTreeSet<TaskId>) -> bool {
    parse_dependencies(&task.dependencies)
        .iter()
        .all(|dep| completed.contains(dep))
}

/// Pairwise comparator: a task that depends on another sorts after it,
/// otherwise order by id.
fn compare_for_display(a: &Task, b: &Task) -> Ordering {
    if parse_dependencies(&a.dependencies).contains(&b.id) {
        Ordering::Greater
    } else if parse_dependencies(&b.dependencies).contains(&a.id) {
        Ordering::Less
    } else {
        a.id.cmp(&b.id)
    }
}

/// Best-effort display ordering of tasks.
///
/// Uses a stable insertion sort driven by the pairwise comparator. The
/// comparator is not a total order (cycles, transitive gaps), so the standard
/// library sorts are avoided; this never panics and never loops, but the
/// result is not guaranteed to be topological.
pub fn presentation_order(tasks: &[Task]) -> Vec<&Task> {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    for i in 1..ordered.len() {
        let mut j = i;
        while j > 0 && compare_for_display(ordered[j - 1], ordered[j]) == Ordering::Greater {
            ordered.swap(j - 1, j);
            j -= 1;
        }
    }
    ordered
}

/// Why a task never became ready.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ids")]
pub enum BlockReason {
    /// Depends on ids that are not in the ledger.
    MissingDependency(Vec<TaskId>),
    /// Depends on tasks that failed in this run.
    FailedDependency(Vec<TaskId>),
    /// Part of a dependency cycle with these tasks.
    Cycle(Vec<TaskId>),
    /// Waiting on tasks that are themselves unresolved.
    Waiting(Vec<TaskId>),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::MissingDependency(ids) => {
                write!(f, "depends on missing {}", join_ids(ids))
            }
            BlockReason::FailedDependency(ids) => write!(f, "depends on failed {}", join_ids(ids)),
            BlockReason::Cycle(ids) => write!(f, "dependency cycle with {}", join_ids(ids)),
            BlockReason::Waiting(ids) if ids.is_empty() => write!(f, "not attempted"),
            BlockReason::Waiting(ids) => write!(f, "waiting on {}", join_ids(ids)),
        }
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(|id| format!("Task {}", id))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Dependency graph built from a ledger snapshot, used for diagnosis only.
///
/// Edges point from prerequisite to dependent. References to ids that are
/// not in the ledger are recorded separately instead of becoming nodes.
pub struct DependencyGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
    missing: HashMap<TaskId, Vec<TaskId>>,
}

impl DependencyGraph {
    pub fn build(tasks: &[Task]) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for task in tasks {
            index
                .entry(task.id)
                .or_insert_with(|| graph.add_node(task.id));
        }

        let mut missing: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for task in tasks {
            let to = index[&task.id];
            for dep in parse_dependencies(&task.dependencies) {
                match index.get(&dep) {
                    Some(&from) => {
                        graph.update_edge(from, to, ());
                    }
                    None => missing.entry(task.id).or_default().push(dep),
                }
            }
        }

        Self {
            graph,
            index,
            missing,
        }
    }

    /// Dependencies of `id` that do not exist in the ledger.
    pub fn missing_dependencies(&self, id: TaskId) -> &[TaskId] {
        self.missing.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All tasks that have at least one missing dependency.
    pub fn tasks_with_missing(&self) -> BTreeSet<TaskId> {
        self.missing.keys().copied().collect()
    }

    /// Groups of tasks that depend on each other in a cycle.
    ///
    /// Self-dependencies count as a cycle of one.
    pub fn cycles(&self) -> Vec<Vec<TaskId>> {
        let mut cycles: Vec<Vec<TaskId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some()
            })
            .map(|scc| {
                let mut ids: Vec<TaskId> = scc.iter().map(|&n| self.graph[n]).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Explain why `id` never became ready, given the run's outcome sets.
    pub fn block_reason(
        &self,
        id: TaskId,
        task: &Task,
        failed: &BTreeSet<TaskId>,
        completed: &BTreeSet<TaskId>,
    ) -> BlockReason {
        let missing = self.missing_dependencies(id);
        if !missing.is_empty() {
            return BlockReason::MissingDependency(missing.to_vec());
        }

        let deps = parse_dependencies(&task.dependencies);
        let failed_deps: Vec<TaskId> = deps.iter().filter(|d| failed.contains(d)).copied().collect();
        if !failed_deps.is_empty() {
            return BlockReason::FailedDependency(failed_deps);
        }

        if let Some(cycle) = self.cycles().into_iter().find(|c| c.contains(&id)) {
            let others: Vec<TaskId> = cycle.into_iter().filter(|c| *c != id).collect();
            return BlockReason::Cycle(if others.is_empty() { vec![id] } else { others });
        }

        BlockReason::Waiting(
            deps.into_iter()
                .filter(|d| !completed.contains(d) && self.index.contains_key(d))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(ids: &[u32]) -> BTreeSet<TaskId> {
        ids.iter().map(|&i| TaskId(i)).collect()
    }

    #[test]
    fn test_parse_dependencies_list() {
        let deps = parse_dependencies("Task 2, Task 5");
        assert_eq!(deps, completed(&[2, 5]));
    }

    #[test]
    fn test_parse_dependencies_placeholders() {
        assert!(parse_dependencies("-").is_empty());
        assert!(parse_dependencies("").is_empty());
        assert!(parse_dependencies("  —  ").is_empty());
    }

    #[test]
    fn test_parse_dependencies_ignores_free_text() {
        assert!(parse_dependencies("foo").is_empty());
        assert!(parse_dependencies("2, 5").is_empty());
        assert!(parse_dependencies("after the parser lands").is_empty());
    }

    #[test]
    fn test_parse_dependencies_mixed_entries() {
        let deps = parse_dependencies("Task 3, see notes, task 7, Task #9");
        assert_eq!(deps, completed(&[3, 7, 9]));
    }

    #[test]
    fn test_is_ready_empty_dependencies() {
        let task = Task::new(1, "a", "-");
        assert!(is_ready(&task, &BTreeSet::new()));
    }

    #[test]
    fn test_is_ready_subset() {
        let task = Task::new(3, "c", "Task 1, Task 2");
        assert!(is_ready(&task, &completed(&[1, 2, 9])));
        assert!(!is_ready(&task, &completed(&[1])));
    }

    #[test]
    fn test_is_ready_unknown_dependency_never_ready() {
        let task = Task::new(3, "c", "Task 4");
        assert!(!is_ready(&task, &completed(&[1, 2])));
    }

    #[test]
    fn test_presentation_order_places_dependency_first() {
        let tasks = vec![
            Task::new(1, "a", "Task 2"),
            Task::new(2, "b", "-"),
            Task::new(3, "c", "-"),
        ];
        let ids: Vec<u32> = presentation_order(&tasks).iter().map(|t| t.id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_presentation_order_terminates_on_cycle() {
        let tasks = vec![Task::new(1, "a", "Task 2"), Task::new(2, "b", "Task 1")];
        let ordered = presentation_order(&tasks);
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn test_graph_missing_dependencies() {
        let tasks = vec![Task::new(1, "a", "-"), Task::new(3, "c", "Task 4, Task 1")];
        let graph = DependencyGraph::build(&tasks);
        assert_eq!(graph.missing_dependencies(TaskId(3)), &[TaskId(4)]);
        assert!(graph.missing_dependencies(TaskId(1)).is_empty());
        assert_eq!(graph.tasks_with_missing(), completed(&[3]));
    }

    #[test]
    fn test_graph_cycles() {
        let tasks = vec![
            Task::new(1, "a", "Task 2"),
            Task::new(2, "b", "Task 1"),
            Task::new(3, "c", "Task 3"),
            Task::new(4, "d", "Task 1"),
        ];
        let graph = DependencyGraph::build(&tasks);
        assert_eq!(
            graph.cycles(),
            vec![vec![TaskId(1), TaskId(2)], vec![TaskId(3)]]
        );
    }

    #[test]
    fn test_block_reason_priority() {
        let tasks = vec![
            Task::new(1, "a", "-"),
            Task::new(2, "b", "Task 1"),
            Task::new(3, "c", "Task 9"),
            Task::new(4, "d", "Task 5"),
            Task::new(5, "e", "Task 4"),
            Task::new(6, "f", "Task 2"),
        ];
        let graph = DependencyGraph::build(&tasks);
        let failed = completed(&[1]);
        let done = BTreeSet::new();

        assert_eq!(
            graph.block_reason(TaskId(2), &tasks[1], &failed, &done),
            BlockReason::FailedDependency(vec![TaskId(1)])
        );
        assert_eq!(
            graph.block_reason(TaskId(3), &tasks[2], &failed, &done),
            BlockReason::MissingDependency(vec![TaskId(9)])
        );
        assert_eq!(
            graph.block_reason(TaskId(4), &tasks[3], &failed, &done),
            BlockReason::Cycle(vec![TaskId(5)])
        );
        assert_eq!(
            graph.block_reason(TaskId(6), &tasks[5], &failed, &done),
            BlockReason::Waiting(vec![TaskId(2)])
        );
    }

    #[test]
    fn test_block_reason_display() {
        let reason = BlockReason::MissingDependency(vec![TaskId(4)]);
        assert_eq!(reason.to_string(), "depends on missing Task 4");
        assert_eq!(BlockReason::Waiting(vec![]).to_string(), "not attempted");
    }
}
