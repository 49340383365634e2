//! Cache error types.

use thiserror::Error;

use flotilla_api::ApiError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("job {0} not found in cache")]
    JobNotFound(String),

    #[error("task {task} not found in job {job}")]
    TaskNotFound { task: String, job: String },

    #[error("node {0} not found in cache")]
    NodeNotFound(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("effector call failed: {0}")]
    Effector(#[from] anyhow::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;
