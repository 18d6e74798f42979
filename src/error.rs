use thiserror::Error;

use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Browser protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    /// The remote endpoint or its agent surface could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single task attempt failed. Recovered by the scheduler.
    #[error("Dispatch error for task {task}: {message}")]
    Dispatch { task: TaskId, message: String },

    #[error("Remote surface error: {0}")]
    Remote(String),

    #[error("Task not found in ledger: {0}")]
    TaskNotFound(TaskId),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Wrap any error raised while a task was in flight as a dispatch error.
    ///
    /// Cancellation is passed through untouched so the scheduler can stop.
    pub fn into_dispatch(self, task: TaskId) -> Self {
        match self {
            Error::Cancelled | Error::Dispatch { .. } => self,
            other => Error::Dispatch {
                task,
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
