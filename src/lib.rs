pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod persistence;
pub mod remote;
pub mod util;

pub use error::{Error, Result};
pub use orchestration::{RunReport, Scheduler, SchedulerEvent, SchedulerOptions};
