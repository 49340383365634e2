//! Entity-level error types.

use thiserror::Error;

use crate::task::TaskStatus;

/// Errors raised by entity mutations.
///
/// Every mutating operation on the entity model guarantees that the entity
/// is left in its original state when one of these is returned.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid status transition for task {task}: {from:?} -> {to:?}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {namespace}/{name} already on different node {node}")]
    TaskOnOtherNode {
        namespace: String,
        name: String,
        node: String,
    },

    #[error("task {namespace}/{name} already on node {node}")]
    DuplicateTask {
        namespace: String,
        name: String,
        node: String,
    },

    #[error("task {task} not found on node {node}")]
    TaskNotOnNode { task: String, node: String },

    #[error("task {task} not found in job {job}")]
    TaskNotFound { task: String, job: String },

    #[error("insufficient idle resources on node {node}")]
    InsufficientResources { node: String },
}

pub type ApiResult<T> = Result<T, ApiError>;
