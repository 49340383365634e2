//! Job model — a gang of tasks scheduled under a minimum-member requirement.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::group::{GroupCondition, GroupInfo, GroupPhase};
use crate::record::DisruptionBudget;
use crate::resource::Resource;
use crate::task::{TaskInfo, TaskStatus};
use crate::{JobId, QueueId, TaskId};

/// A gang of tasks.
///
/// `status_index` partitions `tasks` by status and is maintained by every
/// task mutation; the two structures always agree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobInfo {
    pub uid: JobId,
    pub namespace: String,
    pub name: String,
    pub queue: QueueId,
    /// Resolved from the group's priority class at snapshot time.
    pub priority: i32,
    /// Gang threshold: the job makes progress only when at least this many
    /// tasks can be co-scheduled.
    pub min_available: i32,
    pub group: Option<GroupInfo>,
    pub pdb: Option<DisruptionBudget>,
    /// Unix timestamp (seconds) of the oldest task, for FIFO fallback order.
    pub creation_ts: u64,
    pub tasks: HashMap<TaskId, TaskInfo>,
    status_index: HashMap<TaskStatus, HashSet<TaskId>>,
}

impl JobInfo {
    /// An empty job placeholder; group, queue and threshold arrive with
    /// later events.
    pub fn new(uid: JobId) -> JobInfo {
        JobInfo {
            uid,
            min_available: 1,
            ..JobInfo::default()
        }
    }

    /// Attach (or replace) the gang group, adopting its queue, threshold
    /// and identity.
    pub fn set_group(&mut self, group: GroupInfo) {
        self.namespace = group.namespace.clone();
        self.name = group.name.clone();
        self.queue = group.queue.clone();
        self.min_available = group.min_members;
        self.group = Some(group);
    }

    /// Attach a disruption budget; without a group record the budget
    /// supplies the gang threshold.
    pub fn set_pdb(&mut self, pdb: DisruptionBudget) {
        if self.group.is_none() {
            self.min_available = pdb.min_available;
        }
        self.pdb = Some(pdb);
    }

    /// Insert a task. Replaces any prior entry with the same UID.
    pub fn add_task(&mut self, task: TaskInfo) {
        if self.namespace.is_empty() {
            self.namespace = task.namespace.clone();
        }
        if self.creation_ts == 0 || task.pod.creation_ts < self.creation_ts {
            self.creation_ts = task.pod.creation_ts;
        }
        self.remove_from_index(&task.uid);
        self.status_index
            .entry(task.status)
            .or_default()
            .insert(task.uid.clone());
        self.tasks.insert(task.uid.clone(), task);
    }

    /// Remove a task, returning it if present.
    pub fn delete_task(&mut self, uid: &TaskId) -> Option<TaskInfo> {
        self.remove_from_index(uid);
        self.tasks.remove(uid)
    }

    pub fn task(&self, uid: &TaskId) -> Option<&TaskInfo> {
        self.tasks.get(uid)
    }

    /// Transition a task to a new status, re-indexing it.
    ///
    /// Illegal transitions are rejected and leave the job untouched.
    pub fn update_task_status(&mut self, uid: &TaskId, status: TaskStatus) -> ApiResult<TaskInfo> {
        let task = self.tasks.get_mut(uid).ok_or_else(|| ApiError::TaskNotFound {
            task: uid.clone(),
            job: self.uid.clone(),
        })?;

        if !task.status.can_transition_to(status) {
            return Err(ApiError::InvalidTransition {
                task: task.key(),
                from: task.status,
                to: status,
            });
        }

        let old = task.status;
        task.status = status;
        let snapshot = task.clone();

        if let Some(bucket) = self.status_index.get_mut(&old) {
            bucket.remove(uid);
        }
        self.status_index.entry(status).or_default().insert(uid.clone());

        Ok(snapshot)
    }

    /// Put a task back into a previously observed status, bypassing
    /// transition validation. Only for reverting a half-applied mutation;
    /// forward progress goes through [`JobInfo::update_task_status`].
    pub fn restore_task_status(&mut self, uid: &TaskId, status: TaskStatus) -> ApiResult<TaskInfo> {
        let task = self.tasks.get_mut(uid).ok_or_else(|| ApiError::TaskNotFound {
            task: uid.clone(),
            job: self.uid.clone(),
        })?;
        let old = task.status;
        task.status = status;
        let snapshot = task.clone();

        if let Some(bucket) = self.status_index.get_mut(&old) {
            bucket.remove(uid);
        }
        self.status_index.entry(status).or_default().insert(uid.clone());

        Ok(snapshot)
    }

    /// Record the node a task is placed on.
    pub fn set_task_node(&mut self, uid: &TaskId, node_name: &str) {
        if let Some(task) = self.tasks.get_mut(uid) {
            task.node_name = node_name.to_string();
        }
    }

    /// Record the volume-assume result for a task.
    pub fn set_task_volume_ready(&mut self, uid: &TaskId, ready: bool) {
        if let Some(task) = self.tasks.get_mut(uid) {
            task.volume_ready = ready;
        }
    }

    /// Task UIDs currently in the given status.
    pub fn tasks_in(&self, status: TaskStatus) -> impl Iterator<Item = &TaskInfo> {
        self.status_index
            .get(&status)
            .into_iter()
            .flatten()
            .filter_map(|uid| self.tasks.get(uid))
    }

    pub fn count_in(&self, status: TaskStatus) -> i32 {
        self.status_index.get(&status).map_or(0, |s| s.len() as i32)
    }

    /// Tasks that still count towards the gang.
    pub fn valid_task_num(&self) -> i32 {
        self.status_index
            .iter()
            .filter(|(status, _)| status.is_valid())
            .map(|(_, set)| set.len() as i32)
            .sum()
    }

    /// Tasks occupying (or committed to) a placement.
    pub fn ready_task_num(&self) -> i32 {
        self.status_index
            .iter()
            .filter(|(status, _)| status.is_ready())
            .map(|(_, set)| set.len() as i32)
            .sum()
    }

    /// Whether the gang threshold is met by ready tasks alone.
    pub fn ready(&self) -> bool {
        self.ready_task_num() >= self.min_available
    }

    /// Whether the gang threshold is met counting pipelined placements.
    pub fn pipelined(&self) -> bool {
        self.ready_task_num() + self.count_in(TaskStatus::Pipelined) >= self.min_available
    }

    /// Whether the job has fully left the cluster.
    pub fn terminated(&self) -> bool {
        self.tasks.is_empty() && self.group.as_ref().is_none_or(|g| g.shadow)
    }

    /// Total resources requested by tasks in the given statuses.
    pub fn requested_in(&self, statuses: &[TaskStatus]) -> Resource {
        let mut total = Resource::empty();
        for status in statuses {
            for task in self.tasks_in(*status) {
                total.add(&task.resreq);
            }
        }
        total
    }

    /// Human-readable placement summary for unschedulable events,
    /// e.g. `pending 2, allocated 1, running 3`.
    pub fn fit_error(&self) -> String {
        use TaskStatus::*;
        let mut parts = Vec::new();
        for status in [Pending, Allocated, Pipelined, Binding, Bound, Running, Releasing] {
            let n = self.count_in(status);
            if n > 0 {
                parts.push(format!("{} {}", format!("{status:?}").to_lowercase(), n));
            }
        }
        parts.join(", ")
    }

    /// Append a condition to the job's group, replacing any previous
    /// condition of the same kind.
    pub fn set_group_condition(&mut self, condition: GroupCondition) {
        if let Some(group) = &mut self.group {
            group.conditions.retain(|c| c.kind != condition.kind);
            group.conditions.push(condition);
        }
    }

    /// Recompute the group phase from the task set.
    pub fn refresh_group_phase(&mut self) {
        let phase = if self.ready() {
            GroupPhase::Running
        } else {
            GroupPhase::Pending
        };
        if let Some(group) = &mut self.group {
            group.phase = phase;
        }
    }

    fn remove_from_index(&mut self, uid: &TaskId) {
        if let Some(old) = self.tasks.get(uid) {
            if let Some(bucket) = self.status_index.get_mut(&old.status) {
                bucket.remove(uid);
            }
        }
    }

    /// Verify the partition invariant: every task indexed exactly once,
    /// under its current status. Test support.
    pub fn index_consistent(&self) -> bool {
        let indexed: usize = self.status_index.values().map(|s| s.len()).sum();
        indexed == self.tasks.len()
            && self.tasks.values().all(|t| {
                self.status_index
                    .get(&t.status)
                    .is_some_and(|s| s.contains(&t.uid))
            })
    }
}
