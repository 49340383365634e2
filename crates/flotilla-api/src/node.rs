//! Node model — per-node resource accounting.
//!
//! A node tracks four resource vectors derived from the tasks placed on
//! it: `idle`, `used`, `releasing` and `pipelined`. Releasing tasks count
//! into both `used` and `releasing`; pipelined tasks count into
//! `pipelined` only; everything else subtracts from `idle` into `used`.
//! Whenever a record is set, `idle + used == allocatable` holds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::record::NodeRecord;
use crate::resource::Resource;
use crate::task::{TaskInfo, TaskStatus};
use crate::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Ready,
    NotReady,
}

/// Current state of a node, with a reason when not ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub phase: NodePhase,
    pub reason: String,
}

/// Node-level aggregated information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    /// Backing cluster record; `None` until the node event arrives.
    pub record: Option<NodeRecord>,
    pub state: NodeState,

    /// Resources of tasks told to vacate but not yet released.
    pub releasing: Resource,
    /// Resources of tentative future placements.
    pub pipelined: Resource,
    /// Resources free for immediate allocation.
    pub idle: Resource,
    /// Resources of running and terminating tasks.
    pub used: Resource,

    pub allocatable: Resource,
    pub capability: Resource,

    /// Tasks placed on this node. The node holds copies so that session
    /// status changes do not skew node accounting.
    pub tasks: HashMap<TaskId, TaskInfo>,
}

impl NodeInfo {
    /// Create node info, empty when the record has not been seen yet.
    pub fn new(record: Option<NodeRecord>) -> NodeInfo {
        let mut ni = match record {
            Some(record) => NodeInfo {
                name: record.name.clone(),
                idle: record.allocatable.clone(),
                allocatable: record.allocatable.clone(),
                capability: record.capacity.clone(),
                record: Some(record),
                state: NodeState {
                    phase: NodePhase::NotReady,
                    reason: String::new(),
                },
                releasing: Resource::empty(),
                pipelined: Resource::empty(),
                used: Resource::empty(),
                tasks: HashMap::new(),
            },
            None => NodeInfo {
                name: String::new(),
                record: None,
                state: NodeState {
                    phase: NodePhase::NotReady,
                    reason: String::new(),
                },
                releasing: Resource::empty(),
                pipelined: Resource::empty(),
                idle: Resource::empty(),
                used: Resource::empty(),
                allocatable: Resource::empty(),
                capability: Resource::empty(),
                tasks: HashMap::new(),
            },
        };
        ni.refresh_state();
        ni
    }

    /// Whether the node accepts placements.
    pub fn ready(&self) -> bool {
        self.state.phase == NodePhase::Ready
    }

    /// Resources that will be idle once planned evictions complete:
    /// `idle + releasing − pipelined`.
    pub fn future_idle(&self) -> Resource {
        let mut r = self.idle.clone();
        r.add(&self.releasing).sub(&self.pipelined);
        r
    }

    /// Apply a (new) record, rebuilding all accounting from the task set.
    pub fn set_record(&mut self, record: NodeRecord) {
        self.name = record.name.clone();
        self.allocatable = record.allocatable.clone();
        self.capability = record.capacity.clone();
        self.record = Some(record);

        self.releasing = Resource::empty();
        self.pipelined = Resource::empty();
        self.idle = self.allocatable.clone();
        self.used = Resource::empty();

        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Releasing => {
                    self.idle.sub(&task.resreq);
                    self.releasing.add(&task.resreq);
                    self.used.add(&task.resreq);
                }
                TaskStatus::Pipelined => {
                    self.pipelined.add(&task.resreq);
                }
                _ => {
                    self.idle.sub(&task.resreq);
                    self.used.add(&task.resreq);
                }
            }
        }

        self.refresh_state();
        if !self.ready() {
            warn!(node = %self.name, reason = %self.state.reason, "node not ready");
        }
    }

    /// Place a task on this node.
    ///
    /// On error both task accounting and the node are left untouched.
    pub fn add_task(&mut self, task: &TaskInfo) -> ApiResult<()> {
        if !task.node_name.is_empty() && !self.name.is_empty() && task.node_name != self.name {
            return Err(ApiError::TaskOnOtherNode {
                namespace: task.namespace.clone(),
                name: task.name.clone(),
                node: task.node_name.clone(),
            });
        }

        if self.tasks.contains_key(&task.uid) {
            return Err(ApiError::DuplicateTask {
                namespace: task.namespace.clone(),
                name: task.name.clone(),
                node: self.name.clone(),
            });
        }

        if self.record.is_some() {
            match task.status {
                TaskStatus::Releasing => {
                    self.allocate_idle(task)?;
                    self.releasing.add(&task.resreq);
                    self.used.add(&task.resreq);
                }
                TaskStatus::Pipelined => {
                    self.pipelined.add(&task.resreq);
                }
                _ => {
                    self.allocate_idle(task)?;
                    self.used.add(&task.resreq);
                }
            }
        }

        let mut copy = task.clone();
        copy.node_name = self.name.clone();
        self.tasks.insert(copy.uid.clone(), copy);

        Ok(())
    }

    /// Remove a task from this node, releasing its accounting.
    pub fn remove_task(&mut self, uid: &TaskId) -> ApiResult<TaskInfo> {
        let Some(task) = self.tasks.remove(uid) else {
            return Err(ApiError::TaskNotOnNode {
                task: uid.clone(),
                node: self.name.clone(),
            });
        };

        if self.record.is_some() {
            match task.status {
                TaskStatus::Releasing => {
                    self.releasing.sub(&task.resreq);
                    self.idle.add(&task.resreq);
                    self.used.sub(&task.resreq);
                }
                TaskStatus::Pipelined => {
                    self.pipelined.sub(&task.resreq);
                }
                _ => {
                    self.idle.add(&task.resreq);
                    self.used.sub(&task.resreq);
                }
            }
        }

        Ok(task)
    }

    /// Re-account a task whose status changed (e.g. Running → Releasing).
    pub fn update_task(&mut self, task: &TaskInfo) -> ApiResult<()> {
        self.remove_task(&task.uid)?;
        if let Err(err) = self.add_task(task) {
            // Removal succeeded, so re-adding can only fail on a duplicate
            // introduced concurrently; surface it loudly.
            warn!(task = %task.key(), node = %self.name, %err, "failed to re-add task during update");
            return Err(err);
        }
        Ok(())
    }

    fn allocate_idle(&mut self, task: &TaskInfo) -> ApiResult<()> {
        if !task.resreq.less_equal(&self.idle) {
            return Err(ApiError::InsufficientResources {
                node: self.name.clone(),
            });
        }
        self.idle.sub(&task.resreq);
        Ok(())
    }

    fn refresh_state(&mut self) {
        let Some(record) = &self.record else {
            self.state = NodeState {
                phase: NodePhase::NotReady,
                reason: "UnInitialized".to_string(),
            };
            return;
        };

        if !self.used.less_equal(&record.allocatable) {
            self.state = NodeState {
                phase: NodePhase::NotReady,
                reason: "OutOfSync".to_string(),
            };
            return;
        }

        self.state = NodeState {
            phase: NodePhase::Ready,
            reason: String::new(),
        };
    }
}
