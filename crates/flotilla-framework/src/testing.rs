//! Test support: a recording fake cache and session/entity builders.
//!
//! Used by this crate's unit tests and by the action/plugin/scheduler
//! crates' tests; not part of the production surface.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use flotilla_api::{
    ClusterInfo, GroupInfo, JobInfo, NodeInfo, NodeRecord, PodPhase, PodRecord, QueueInfo,
    QueueRecord, Resource, TaskInfo, TaskStatus,
};

use crate::interface::SchedulerCache;
use crate::session::{Session, SessionState, SessionStats};

/// A [`SchedulerCache`] that records every committed effect.
#[derive(Default)]
pub struct FakeCache {
    /// (task key, hostname) per bind.
    pub binds: Mutex<Vec<(String, String)>>,
    /// (task key, reason) per eviction.
    pub evictions: Mutex<Vec<(String, String)>>,
    /// Job UIDs whose status was published.
    pub status_updates: Mutex<Vec<String>>,
    /// When set, `bind` fails.
    pub fail_bind: AtomicBool,
    /// When set, `assume_volumes` fails.
    pub fail_assume: AtomicBool,
}

impl SchedulerCache for FakeCache {
    fn snapshot(&self) -> ClusterInfo {
        ClusterInfo::default()
    }

    fn assume_volumes(&self, _task: &TaskInfo, _hostname: &str) -> anyhow::Result<bool> {
        if self.fail_assume.load(Ordering::Relaxed) {
            anyhow::bail!("volume assume refused");
        }
        Ok(true)
    }

    fn bind_volumes(&self, _task: &TaskInfo) -> anyhow::Result<()> {
        Ok(())
    }

    fn bind(&self, task: &TaskInfo, hostname: &str) -> anyhow::Result<()> {
        if self.fail_bind.load(Ordering::Relaxed) {
            anyhow::bail!("bind refused");
        }
        self.binds
            .lock()
            .unwrap()
            .push((task.key(), hostname.to_string()));
        Ok(())
    }

    fn evict(&self, task: &TaskInfo, reason: &str) -> anyhow::Result<()> {
        self.evictions
            .lock()
            .unwrap()
            .push((task.key(), reason.to_string()));
        Ok(())
    }

    fn update_job_status(&self, job: &JobInfo) -> anyhow::Result<()> {
        self.status_updates.lock().unwrap().push(job.uid.clone());
        Ok(())
    }
}

/// A ready node with the given allocatable millicores and memory.
pub fn make_ready_node(name: &str, cpu: i64, mem: i64) -> NodeInfo {
    NodeInfo::new(Some(NodeRecord {
        name: name.to_string(),
        labels: BTreeMap::new(),
        taints: Vec::new(),
        allocatable: Resource::new(cpu, mem),
        capacity: Resource::new(cpu, mem),
    }))
}

/// A pod record requesting 1000m / 1Gi, named after its UID.
pub fn make_pod(uid: &str, group: &str) -> PodRecord {
    PodRecord {
        uid: uid.to_string(),
        namespace: "default".to_string(),
        name: uid.to_string(),
        node_name: String::new(),
        phase: PodPhase::Pending,
        scheduler_name: "flotilla".to_string(),
        group_name: Some(group.to_string()),
        priority: 0,
        priority_class_name: String::new(),
        resources: Resource::new(1000, 1 << 30),
        node_selector: BTreeMap::new(),
        tolerations: Vec::new(),
        creation_ts: 100,
    }
}

/// A job with `min_available` and one task per status, UIDs `t0, t1, …`.
pub fn make_job_with_tasks(
    uid: &str,
    queue: &str,
    min_available: i32,
    statuses: &[TaskStatus],
) -> JobInfo {
    let (namespace, name) = uid.split_once('/').unwrap_or(("default", uid));
    let mut job = JobInfo::new(uid.to_string());
    let mut group = GroupInfo::shadow(namespace, name, queue);
    group.min_members = min_available;
    group.shadow = false;
    job.set_group(group);

    for (i, status) in statuses.iter().enumerate() {
        let pod = make_pod(&format!("t{i}"), name);
        let mut task = TaskInfo::new(uid.to_string(), pod);
        task.status = *status;
        job.add_task(task);
    }
    job
}

/// Build a session directly over the given jobs and nodes, with one
/// default queue and no plugins registered.
pub fn session_with(cache: Arc<FakeCache>, jobs: Vec<JobInfo>, nodes: Vec<NodeInfo>) -> Session {
    let mut state = SessionState {
        uid: "ssn-test".to_string(),
        jobs: HashMap::new(),
        nodes: HashMap::new(),
        queues: HashMap::new(),
    };
    for job in jobs {
        state.jobs.insert(job.uid.clone(), job);
    }
    for node in nodes {
        state.nodes.insert(node.name.clone(), node);
    }
    state.queues.insert(
        "default-queue".to_string(),
        QueueInfo::new(QueueRecord {
            name: "default-queue".to_string(),
            weight: 1,
        }),
    );

    Session::for_testing(state, SessionStats::default(), cache)
}
