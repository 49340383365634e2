//! Framework error types.

use thiserror::Error;

use flotilla_api::ApiError;

/// Errors raised while opening sessions or applying statements.
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("job not found in session: {0}")]
    JobNotFound(String),

    #[error("node not found in session: {0}")]
    NodeNotFound(String),

    #[error("task {task} not found in job {job}")]
    TaskNotFound { task: String, job: String },

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid scheduler configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("effector call failed: {0}")]
    Effector(#[from] anyhow::Error),
}

pub type FrameworkResult<T> = Result<T, FrameworkError>;
