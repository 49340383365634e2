//! flotilla-api — entity model and resource algebra.
//!
//! The in-memory model the scheduler reasons about:
//!
//! - [`Resource`] — vector arithmetic over milli-CPU, memory and named scalars
//! - [`TaskInfo`] / [`TaskStatus`] — one unit of compute and its lifecycle
//! - [`JobInfo`] — a gang of tasks with a minimum-member requirement
//! - [`NodeInfo`] — per-node resource accounting (idle/used/releasing/pipelined)
//! - [`QueueInfo`] — a weighted scheduling queue
//! - [`ClusterInfo`] — a point-in-time deep clone of the whole model
//!
//! Entities never hold references to each other; cross-references are IDs
//! resolved through the arenas of the owning snapshot (`Jobs[JobId]`,
//! `Nodes[name]`, `Job.Tasks[TaskId]`).

pub mod cluster;
pub mod error;
pub mod group;
pub mod job;
pub mod node;
pub mod queue;
pub mod record;
pub mod resource;
pub mod task;

pub use cluster::ClusterInfo;
pub use error::{ApiError, ApiResult};
pub use group::{
    GroupCondition, GroupConditionKind, GroupInfo, GroupPhase, GroupRecord, GroupRecordV1,
    GroupRecordV2, GroupVersion,
};
pub use job::JobInfo;
pub use node::{NodeInfo, NodePhase, NodeState};
pub use queue::QueueInfo;
pub use record::{
    DisruptionBudget, NodeRecord, PodCondition, PodPhase, PodRecord, PriorityClassRecord,
    QueueRecord, Taint, TaintEffect, Toleration, TolerationOperator,
};
pub use resource::Resource;
pub use task::{TaskInfo, TaskStatus};

/// Unique identifier for a job (a gang of tasks), `namespace/group-name`.
pub type JobId = String;

/// Unique identifier for a task within the cluster (the pod UID).
pub type TaskId = String;

/// Unique identifier for a scheduling queue.
pub type QueueId = String;
