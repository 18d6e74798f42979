//! Core domain models: the task ledger and dependency resolution.

pub mod deps;
pub mod ledger;
pub mod task;

pub use deps::{is_ready, parse_dependencies, presentation_order, BlockReason, DependencyGraph};
pub use ledger::{rewrite_row, Ledger};
pub use task::{Task, TaskId, TaskStatus};
