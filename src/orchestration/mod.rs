//! Orchestration layer: drives the ledger through the remote agent.
//!
//! - [`scheduler`]: the round loop and per-task dispatch
//! - [`sync`]: decides when a submitted turn has finished
//! - [`round`]: pure round bookkeeping
//! - [`prompt`] / [`validate`]: pluggable collaborators around a dispatch
//! - [`report`]: what a run did and did not do

pub mod prompt;
pub mod report;
pub mod round;
pub mod scheduler;
pub mod sync;
pub mod validate;

pub use prompt::{DetailLoader, FsDetailLoader, PromptBuilder, TemplatePromptBuilder};
pub use report::{FailedTask, RunReport, Unresolved};
pub use round::{RoundOutcome, RoundState};
pub use scheduler::{Scheduler, SchedulerEvent, SchedulerOptions};
pub use sync::{ResponseSynchronizer, SyncOptions, SyncOutcome, SyncState};
pub use validate::{Assessment, KeywordValidator, ResponseValidator};
