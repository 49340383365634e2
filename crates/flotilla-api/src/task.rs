//! Task model — one pod-backed unit of compute within a gang.

use serde::{Deserialize, Serialize};

use crate::record::{PodPhase, PodRecord};
use crate::resource::Resource;
use crate::{JobId, TaskId};

/// Scheduling lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a scheduling decision.
    Pending,
    /// Tentatively placed on a node within a session.
    Allocated,
    /// Tentative future placement, contingent on planned evictions.
    Pipelined,
    /// Bind request issued to the cluster store.
    Binding,
    /// Cluster store confirmed the binding.
    Bound,
    Running,
    /// Told to vacate its node; resources not yet released.
    Releasing,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskStatus {
    /// Whether a transition from `self` to `to` is legal.
    ///
    /// `Unknown` is the informer fallback and converts freely in both
    /// directions. Same-status updates are no-ops and always allowed.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if self == to || self == Unknown || to == Unknown {
            return true;
        }
        matches!(
            (self, to),
            (Pending, Allocated)
                | (Pending, Pipelined)
                // The authoritative store never sees the session-local
                // Allocated state, so bind moves Pending straight to
                // Binding there.
                | (Pending, Binding)
                | (Allocated, Binding)
                | (Allocated, Pipelined)
                | (Allocated, Pending)
                | (Pipelined, Pending)
                | (Binding, Bound)
                | (Bound, Running)
                | (Bound, Releasing)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Releasing)
                | (Releasing, Pending)
                | (Releasing, Running)
        )
    }

    /// Statuses counted towards a gang's valid task number.
    pub fn is_valid(self) -> bool {
        use TaskStatus::*;
        matches!(
            self,
            Pending | Allocated | Pipelined | Binding | Bound | Running | Succeeded
        )
    }

    /// Statuses counted as occupying their placement.
    pub fn is_ready(self) -> bool {
        use TaskStatus::*;
        matches!(self, Allocated | Binding | Bound | Running | Succeeded)
    }

    /// Terminal statuses.
    pub fn is_terminated(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// One unit of compute within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub uid: TaskId,
    pub job: JobId,
    pub namespace: String,
    pub name: String,
    /// Assigned node, empty while unscheduled.
    pub node_name: String,
    pub status: TaskStatus,
    pub priority: i32,
    /// Requested resources.
    pub resreq: Resource,
    /// Whether volume assumption succeeded for the current placement.
    pub volume_ready: bool,
    /// Backing cluster record.
    pub pod: PodRecord,
}

impl TaskInfo {
    /// Derive a task from a pod record for the given job.
    pub fn new(job: JobId, pod: PodRecord) -> TaskInfo {
        TaskInfo {
            uid: pod.uid.clone(),
            job,
            namespace: pod.namespace.clone(),
            name: pod.name.clone(),
            node_name: pod.node_name.clone(),
            status: status_from_pod(&pod),
            priority: pod.priority,
            resreq: pod.resources.clone(),
            volume_ready: false,
            pod,
        }
    }

    /// The `namespace/name` key used in logs and events.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Map a pod record onto the initial task status.
fn status_from_pod(pod: &PodRecord) -> TaskStatus {
    match pod.phase {
        PodPhase::Running => TaskStatus::Running,
        PodPhase::Succeeded => TaskStatus::Succeeded,
        PodPhase::Failed => TaskStatus::Failed,
        PodPhase::Pending => {
            if pod.node_name.is_empty() {
                TaskStatus::Pending
            } else {
                TaskStatus::Bound
            }
        }
        PodPhase::Unknown => TaskStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn make_pod(uid: &str, node: &str, phase: PodPhase) -> PodRecord {
        PodRecord {
            uid: uid.to_string(),
            namespace: "default".to_string(),
            name: uid.to_string(),
            node_name: node.to_string(),
            phase,
            scheduler_name: "flotilla".to_string(),
            group_name: None,
            priority: 0,
            priority_class_name: String::new(),
            resources: Resource::new(1000, 1024),
            node_selector: BTreeMap::new(),
            tolerations: Vec::new(),
            creation_ts: 0,
        }
    }

    #[test]
    fn status_derivation_from_pod() {
        let t = TaskInfo::new("j".into(), make_pod("t1", "", PodPhase::Pending));
        assert_eq!(t.status, TaskStatus::Pending);

        let t = TaskInfo::new("j".into(), make_pod("t1", "n1", PodPhase::Pending));
        assert_eq!(t.status, TaskStatus::Bound);

        let t = TaskInfo::new("j".into(), make_pod("t1", "n1", PodPhase::Running));
        assert_eq!(t.status, TaskStatus::Running);

        let t = TaskInfo::new("j".into(), make_pod("t1", "n1", PodPhase::Failed));
        assert_eq!(t.status, TaskStatus::Failed);
    }

    #[test]
    fn forward_lifecycle_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Allocated));
        assert!(Allocated.can_transition_to(Binding));
        assert!(Binding.can_transition_to(Bound));
        assert!(Bound.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Releasing));
    }

    #[test]
    fn rollback_transitions() {
        use TaskStatus::*;
        assert!(Allocated.can_transition_to(Pending));
        assert!(Pipelined.can_transition_to(Pending));
        assert!(Releasing.can_transition_to(Pending));
        assert!(Releasing.can_transition_to(Running));
    }

    #[test]
    fn illegal_transitions_rejected() {
        use TaskStatus::*;
        assert!(!Pending.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Bound));
        assert!(!Bound.can_transition_to(Pending));
        assert!(!Succeeded.can_transition_to(Running));
        assert!(!Binding.can_transition_to(Allocated));
    }

    #[test]
    fn store_side_transitions() {
        use TaskStatus::*;
        // Bind in the authoritative store skips Allocated.
        assert!(Pending.can_transition_to(Binding));
        assert!(Bound.can_transition_to(Releasing));
    }

    #[test]
    fn unknown_converts_freely() {
        use TaskStatus::*;
        assert!(Unknown.can_transition_to(Running));
        assert!(Bound.can_transition_to(Unknown));
    }

    #[test]
    fn status_buckets() {
        use TaskStatus::*;
        assert!(Pending.is_valid());
        assert!(!Pending.is_ready());
        assert!(Allocated.is_ready());
        assert!(!Failed.is_valid());
        assert!(!Releasing.is_ready());
        assert!(Failed.is_terminated());
        assert!(!Running.is_terminated());
    }
}
