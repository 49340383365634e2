//! The scheduler cache — authoritative in-memory cluster model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flotilla_api::{
    ClusterInfo, GroupInfo, GroupPhase, JobId, JobInfo, NodeInfo, PodCondition, PodRecord,
    PriorityClassRecord, QueueInfo, TaskInfo, TaskStatus,
};
use flotilla_framework::SchedulerCache;

use crate::effectors::{Binder, EventKind, Evictor, ObjectRef, PodSource, Recorder, StatusUpdater, VolumeBinder};
use crate::error::{CacheError, CacheResult};
use crate::events::ClusterEvent;
use crate::resync::{RetryQueue, RetryWorker};

/// The injected side-effect collaborators.
pub struct Effectors {
    pub binder: Arc<dyn Binder>,
    pub evictor: Arc<dyn Evictor>,
    pub status_updater: Arc<dyn StatusUpdater>,
    pub volume_binder: Arc<dyn VolumeBinder>,
    pub recorder: Arc<dyn Recorder>,
    pub pod_source: Arc<dyn PodSource>,
}

/// Arena state guarded by the cache lock.
#[derive(Default)]
struct CacheState {
    jobs: HashMap<JobId, JobInfo>,
    nodes: HashMap<String, NodeInfo>,
    queues: HashMap<String, QueueInfo>,
    priority_classes: HashMap<String, PriorityClassRecord>,
    default_priority: i32,
}

/// The scheduler cache.
///
/// All reads and mutations go through one mutex held for the whole
/// operation, so snapshots are linearizable with respect to events.
/// The detached bind/evict futures run outside the lock; their only
/// failure recovery is a resync enqueue.
pub struct Cache {
    state: Mutex<CacheState>,
    effectors: Effectors,
    resync_tasks: RetryQueue<TaskInfo>,
    deleted_jobs: RetryQueue<JobId>,
    resync_worker: Mutex<Option<RetryWorker<TaskInfo>>>,
    cleanup_worker: Mutex<Option<RetryWorker<JobId>>>,
    scheduler_name: String,
    default_queue: String,
    priority_classes_enabled: bool,
}

impl Cache {
    pub fn new(effectors: Effectors, scheduler_name: &str, default_queue: &str) -> Cache {
        let (resync_tasks, resync_worker) = RetryQueue::new();
        let (deleted_jobs, cleanup_worker) = RetryQueue::new();
        Cache {
            state: Mutex::new(CacheState::default()),
            effectors,
            resync_tasks,
            deleted_jobs,
            resync_worker: Mutex::new(Some(resync_worker)),
            cleanup_worker: Mutex::new(Some(cleanup_worker)),
            scheduler_name: scheduler_name.to_string(),
            default_queue: default_queue.to_string(),
            priority_classes_enabled: true,
        }
    }

    /// Toggle consumption of priority class events (on by default).
    pub fn with_priority_classes(mut self, enabled: bool) -> Cache {
        self.priority_classes_enabled = enabled;
        self
    }

    /// Spawn the background workers: event consumer, task resync and
    /// deleted-job cleanup. All stop when `stop` flips.
    pub fn start(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ClusterEvent>,
        stop: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let consumer = Arc::clone(self);
        let mut consumer_stop = stop.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = consumer_stop.changed() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        consumer.apply(event);
                    }
                }
            }
            info!("event consumer stopped");
        }));

        if let Some(worker) = self.resync_worker.lock().unwrap().take() {
            let cache = Arc::clone(self);
            let worker_stop = stop.clone();
            handles.push(tokio::spawn(async move {
                worker
                    .run(worker_stop, move |task: TaskInfo| {
                        let cache = cache.clone();
                        async move {
                            match cache.sync_task(&task).await {
                                Ok(()) => Ok(()),
                                Err(err) => {
                                    warn!(task = %task.key(), %err, "resync failed, retrying");
                                    Err(task)
                                }
                            }
                        }
                    })
                    .await;
            }));
        }

        if let Some(worker) = self.cleanup_worker.lock().unwrap().take() {
            let cache = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                worker
                    .run(stop, move |job_id: JobId| {
                        let cache = cache.clone();
                        async move {
                            if cache.try_cleanup_job(&job_id) {
                                Ok(())
                            } else {
                                Err(job_id)
                            }
                        }
                    })
                    .await;
            }));
        }

        handles
    }

    // ── Event ingestion ─────────────────────────────────────────────

    /// Apply one event from the watch layer. Idempotent with respect to
    /// the external event stream.
    pub fn apply(&self, event: ClusterEvent) {
        let mut state = self.state.lock().unwrap();
        match event {
            ClusterEvent::PodAdded(pod) | ClusterEvent::PodUpdated(pod) => {
                if self.responsible_for(&pod) {
                    state.upsert_pod(pod, &self.default_queue);
                }
            }
            ClusterEvent::PodDeleted(pod) => {
                // Tombstones may be stale; delete by key regardless of
                // responsibility.
                state.delete_pod(&pod, &self.deleted_jobs);
            }
            ClusterEvent::NodeAdded(record) | ClusterEvent::NodeUpdated(record) => {
                state.upsert_node(record);
            }
            ClusterEvent::NodeDeleted(name) => {
                state.nodes.remove(&name);
                debug!(node = %name, "node removed");
            }
            ClusterEvent::GroupAdded(record) | ClusterEvent::GroupUpdated(record) => {
                let group = GroupInfo::from_record(&record, &self.default_queue);
                state.upsert_group(group);
            }
            ClusterEvent::GroupDeleted(record) => {
                let group = GroupInfo::from_record(&record, &self.default_queue);
                state.delete_group(&group.job_id(), &self.deleted_jobs);
            }
            ClusterEvent::QueueAdded(record) | ClusterEvent::QueueUpdated(record) => {
                let queue = QueueInfo::new(record);
                state.queues.insert(queue.uid.clone(), queue);
            }
            ClusterEvent::QueueDeleted(name) => {
                state.queues.remove(&name);
            }
            ClusterEvent::PriorityClassAdded(record) => {
                if self.priority_classes_enabled {
                    state.priority_classes.insert(record.name.clone(), record);
                    state.refresh_default_priority();
                }
            }
            ClusterEvent::PriorityClassDeleted(name) => {
                if self.priority_classes_enabled {
                    state.priority_classes.remove(&name);
                    state.refresh_default_priority();
                }
            }
            ClusterEvent::BudgetAdded(budget) | ClusterEvent::BudgetUpdated(budget) => {
                let job_id = format!("{}/{}", budget.namespace, budget.group_name);
                let job = state
                    .jobs
                    .entry(job_id.clone())
                    .or_insert_with(|| JobInfo::new(job_id));
                job.set_pdb(budget);
            }
            ClusterEvent::BudgetDeleted(budget) => {
                let job_id = format!("{}/{}", budget.namespace, budget.group_name);
                if let Some(job) = state.jobs.get_mut(&job_id) {
                    job.pdb = None;
                }
            }
        }
    }

    /// Pods are ours when they name this scheduler, or when another
    /// scheduler already bound them (their usage still counts).
    fn responsible_for(&self, pod: &PodRecord) -> bool {
        pod.scheduler_name == self.scheduler_name || !pod.node_name.is_empty()
    }

    // ── Snapshot ────────────────────────────────────────────────────

    /// Deep-clone the model: ready nodes, all queues, and every job with
    /// a scheduling spec (group or budget) whose queue exists. Job
    /// priority resolves from the group's priority class here.
    pub fn snapshot(&self) -> ClusterInfo {
        let state = self.state.lock().unwrap();
        let mut snapshot = ClusterInfo::default();

        for node in state.nodes.values() {
            if !node.ready() {
                continue;
            }
            snapshot.nodes.insert(node.name.clone(), node.clone());
        }

        for queue in state.queues.values() {
            snapshot.queues.insert(queue.uid.clone(), queue.clone());
        }

        for job in state.jobs.values() {
            if job.group.is_none() && job.pdb.is_none() {
                debug!(job = %job.uid, "job has no scheduling spec, ignored");
                continue;
            }
            if !snapshot.queues.contains_key(&job.queue) {
                debug!(job = %job.uid, queue = %job.queue, "job queue does not exist, ignored");
                continue;
            }

            let mut cloned = job.clone();
            if let Some(group) = &cloned.group {
                cloned.priority = state
                    .priority_classes
                    .get(&group.priority_class)
                    .map(|pc| pc.value)
                    .unwrap_or(state.default_priority);
            }
            snapshot.jobs.insert(cloned.uid.clone(), cloned);
        }

        debug!(
            jobs = snapshot.jobs.len(),
            queues = snapshot.queues.len(),
            nodes = snapshot.nodes.len(),
            "snapshot taken"
        );

        snapshot
    }

    // ── Committed side-effects ──────────────────────────────────────

    /// Bind a task to a host: session-confirmed placement becomes a
    /// cluster bind request. The request itself is detached; its failure
    /// enqueues a resync.
    pub fn bind_task(&self, task_info: &TaskInfo, hostname: &str) -> CacheResult<()> {
        let (pod, task) = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;

            let job = state
                .jobs
                .get_mut(&task_info.job)
                .ok_or_else(|| CacheError::JobNotFound(task_info.job.clone()))?;
            let current = job
                .task(&task_info.uid)
                .ok_or_else(|| CacheError::TaskNotFound {
                    task: task_info.uid.clone(),
                    job: task_info.job.clone(),
                })?;
            let original = current.status;
            let uid = current.uid.clone();

            let task = job.update_task_status(&uid, TaskStatus::Binding)?;

            let Some(node) = state.nodes.get_mut(hostname) else {
                let _ = job.restore_task_status(&uid, original);
                return Err(CacheError::NodeNotFound(hostname.to_string()));
            };

            let mut placed = task.clone();
            placed.node_name = hostname.to_string();
            if let Err(err) = node.add_task(&placed) {
                if let Err(revert) = job.restore_task_status(&uid, original) {
                    warn!(task = %placed.key(), %revert, "failed to revert status, resyncing");
                    self.resync_tasks.push(placed.clone());
                }
                return Err(err.into());
            }
            job.set_task_node(&uid, hostname);

            (placed.pod.clone(), placed)
        };

        // Outside the lock: detached bind request.
        let binder = self.effectors.binder.clone();
        let recorder = self.effectors.recorder.clone();
        let resync = self.resync_tasks.clone();
        let hostname = hostname.to_string();
        tokio::spawn(async move {
            match binder.bind(&pod, &hostname).await {
                Ok(()) => {
                    recorder.event(
                        &ObjectRef::pod(&pod),
                        EventKind::Normal,
                        "Scheduled",
                        &format!(
                            "successfully assigned {}/{} to {hostname}",
                            pod.namespace, pod.name
                        ),
                    );
                }
                Err(err) => {
                    warn!(pod = %pod.key(), %err, "bind failed, resyncing task");
                    resync.push(task);
                }
            }
        });

        Ok(())
    }

    /// Evict a task from its recorded node. The cluster delete request is
    /// detached; its failure enqueues a resync.
    pub fn evict_task(&self, task_info: &TaskInfo, reason: &str) -> CacheResult<()> {
        let (pod, task, group_ref) = {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;

            let job = state
                .jobs
                .get_mut(&task_info.job)
                .ok_or_else(|| CacheError::JobNotFound(task_info.job.clone()))?;
            let current = job
                .task(&task_info.uid)
                .ok_or_else(|| CacheError::TaskNotFound {
                    task: task_info.uid.clone(),
                    job: task_info.job.clone(),
                })?;
            let uid = current.uid.clone();
            let node_name = current.node_name.clone();
            let original = current.status;

            let Some(node) = state.nodes.get_mut(&node_name) else {
                return Err(CacheError::NodeNotFound(node_name));
            };

            let task = job.update_task_status(&uid, TaskStatus::Releasing)?;

            if let Err(err) = node.update_task(&task) {
                if let Err(revert) = job.restore_task_status(&uid, original) {
                    warn!(task = %task.key(), %revert, "failed to revert status, resyncing");
                    self.resync_tasks.push(task.clone());
                }
                return Err(err.into());
            }

            let group_ref = job
                .group
                .as_ref()
                .filter(|g| !g.shadow)
                .map(|g| ObjectRef::group(&g.namespace, &g.name));

            (task.pod.clone(), task, group_ref)
        };

        if let Some(group) = group_ref {
            self.effectors
                .recorder
                .event(&group, EventKind::Normal, "Evict", reason);
        }

        let evictor = self.effectors.evictor.clone();
        let resync = self.resync_tasks.clone();
        tokio::spawn(async move {
            if let Err(err) = evictor.evict(&pod).await {
                warn!(pod = %pod.key(), %err, "evict failed, resyncing task");
                resync.push(task);
            }
        });

        Ok(())
    }

    // ── Resync and cleanup ──────────────────────────────────────────

    /// Re-read the source of truth for a task and replay it into the
    /// cache: update if present, remove if gone.
    pub async fn sync_task(&self, task: &TaskInfo) -> anyhow::Result<()> {
        match self
            .effectors
            .pod_source
            .get_pod(&task.namespace, &task.name)
            .await?
        {
            Some(pod) => {
                let mut state = self.state.lock().unwrap();
                state.remove_task(task, &self.deleted_jobs);
                if self.responsible_for(&pod) {
                    state.upsert_pod(pod, &self.default_queue);
                }
            }
            None => {
                let mut state = self.state.lock().unwrap();
                state.remove_task(task, &self.deleted_jobs);
            }
        }
        Ok(())
    }

    /// Re-check a queued job under the lock; drop it when terminated.
    /// Returns false to requeue.
    fn try_cleanup_job(&self, job_id: &JobId) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get(job_id) else {
            return true;
        };
        if job.terminated() {
            state.jobs.remove(job_id);
            debug!(job = %job_id, "job removed from cache");
            true
        } else {
            false
        }
    }

    /// Publish unschedulable pod conditions and a gang event for an
    /// unready job.
    fn record_job_unschedulable(&self, job: &JobInfo) {
        let Some(group) = &job.group else { return };
        if group.shadow {
            return;
        }

        let pending = job.count_in(TaskStatus::Pending);
        if group.phase != GroupPhase::Running && pending > 0 {
            let message = format!(
                "{pending}/{} tasks in gang unschedulable: {}",
                job.tasks.len(),
                job.fit_error()
            );
            self.effectors.recorder.event(
                &ObjectRef::group(&group.namespace, &group.name),
                EventKind::Warning,
                "Unschedulable",
                &message,
            );
        }

        let fit_error = job.fit_error();
        for status in [TaskStatus::Allocated, TaskStatus::Pending] {
            for task in job.tasks_in(status) {
                self.effectors.recorder.event(
                    &ObjectRef::pod(&task.pod),
                    EventKind::Warning,
                    "FailedScheduling",
                    &fit_error,
                );
                let condition = PodCondition {
                    kind: "PodScheduled".to_string(),
                    status: false,
                    reason: "Unschedulable".to_string(),
                    message: fit_error.clone(),
                };
                if let Err(err) = self
                    .effectors
                    .status_updater
                    .update_pod_condition(&task.pod, &condition)
                {
                    warn!(task = %task.key(), %err, "failed to update pod condition");
                }
            }
        }
    }
}

impl SchedulerCache for Cache {
    fn snapshot(&self) -> ClusterInfo {
        Cache::snapshot(self)
    }

    fn assume_volumes(&self, task: &TaskInfo, hostname: &str) -> anyhow::Result<bool> {
        self.effectors.volume_binder.assume_volumes(task, hostname)
    }

    fn bind_volumes(&self, task: &TaskInfo) -> anyhow::Result<()> {
        // Volumes already assumed bound are not bound twice.
        if task.volume_ready {
            return Ok(());
        }
        self.effectors.volume_binder.bind_volumes(task)
    }

    fn bind(&self, task: &TaskInfo, hostname: &str) -> anyhow::Result<()> {
        Ok(self.bind_task(task, hostname)?)
    }

    fn evict(&self, task: &TaskInfo, reason: &str) -> anyhow::Result<()> {
        Ok(self.evict_task(task, reason)?)
    }

    fn update_job_status(&self, job: &JobInfo) -> anyhow::Result<()> {
        if let Some(group) = job.group.as_ref().filter(|g| !g.shadow) {
            self.effectors.status_updater.update_group(&group.to_record())?;
        }
        self.record_job_unschedulable(job);
        Ok(())
    }
}

impl CacheState {
    fn job_id_for(pod: &PodRecord) -> JobId {
        match &pod.group_name {
            Some(group) => format!("{}/{group}", pod.namespace),
            None => format!("{}/{}", pod.namespace, pod.name),
        }
    }

    /// Insert or refresh a pod: remove any stale placement, then add the
    /// derived task to its job and node.
    fn upsert_pod(&mut self, pod: PodRecord, default_queue: &str) {
        let job_id = Self::job_id_for(&pod);

        // Replace any existing view of this pod.
        if let Some(job) = self.jobs.get_mut(&job_id) {
            if let Some(old) = job.delete_task(&pod.uid) {
                if !old.node_name.is_empty() {
                    if let Some(node) = self.nodes.get_mut(&old.node_name) {
                        let _ = node.remove_task(&old.uid);
                    }
                }
            }
        }

        let task = TaskInfo::new(job_id.clone(), pod.clone());

        let job = self
            .jobs
            .entry(job_id.clone())
            .or_insert_with(|| JobInfo::new(job_id.clone()));
        if job.group.is_none() && pod.group_name.is_none() {
            // Standalone pod: synthesize a shadow group so the job is
            // schedulable on its own.
            job.set_group(GroupInfo::shadow(&pod.namespace, &pod.name, default_queue));
        }
        job.add_task(task.clone());

        if !task.node_name.is_empty() {
            let node = self
                .nodes
                .entry(task.node_name.clone())
                .or_insert_with(|| NodeInfo::new(None));
            if let Err(err) = node.add_task(&task) {
                warn!(task = %task.key(), node = %task.node_name, %err, "failed to place task on node");
            }
        }

        debug!(task = %task.key(), job = %job_id, "pod applied");
    }

    fn delete_pod(&mut self, pod: &PodRecord, deleted_jobs: &RetryQueue<JobId>) {
        let job_id = Self::job_id_for(pod);
        let Some(job) = self.jobs.get_mut(&job_id) else {
            debug!(pod = %pod.key(), "delete for unknown pod ignored");
            return;
        };
        let Some(old) = job.delete_task(&pod.uid) else {
            debug!(pod = %pod.key(), "delete for unknown task ignored");
            return;
        };
        if !old.node_name.is_empty() {
            if let Some(node) = self.nodes.get_mut(&old.node_name) {
                let _ = node.remove_task(&old.uid);
            }
        }
        if job.terminated() {
            deleted_jobs.push(job_id);
        }
    }

    /// Remove the cache's view of a task (resync path: the pod record may
    /// be unavailable, so keyed off the task).
    fn remove_task(&mut self, task: &TaskInfo, deleted_jobs: &RetryQueue<JobId>) {
        let Some(job) = self.jobs.get_mut(&task.job) else {
            return;
        };
        if let Some(old) = job.delete_task(&task.uid) {
            if !old.node_name.is_empty() {
                if let Some(node) = self.nodes.get_mut(&old.node_name) {
                    let _ = node.remove_task(&old.uid);
                }
            }
        }
        if job.terminated() {
            deleted_jobs.push(task.job.clone());
        }
    }

    fn upsert_node(&mut self, record: flotilla_api::NodeRecord) {
        match self.nodes.get_mut(&record.name) {
            Some(node) => node.set_record(record),
            None => {
                let node = NodeInfo::new(Some(record));
                self.nodes.insert(node.name.clone(), node);
            }
        }
    }

    fn upsert_group(&mut self, group: GroupInfo) {
        let job_id = group.job_id();
        let job = self
            .jobs
            .entry(job_id.clone())
            .or_insert_with(|| JobInfo::new(job_id));
        job.set_group(group);
    }

    fn delete_group(&mut self, job_id: &JobId, deleted_jobs: &RetryQueue<JobId>) {
        if let Some(job) = self.jobs.get_mut(job_id) {
            job.group = None;
            deleted_jobs.push(job_id.clone());
        }
    }

    fn refresh_default_priority(&mut self) {
        self.default_priority = self
            .priority_classes
            .values()
            .find(|pc| pc.global_default)
            .map(|pc| pc.value)
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{recording_effectors, RecordingEffectors};
    use flotilla_api::{
        GroupRecord, GroupRecordV2, NodeRecord, PodPhase, QueueRecord, Resource,
    };
    use std::collections::BTreeMap;

    fn make_cache() -> (Arc<Cache>, RecordingEffectors) {
        let (effectors, recording) = recording_effectors();
        (Arc::new(Cache::new(effectors, "flotilla", "default-queue")), recording)
    }

    fn node_record(name: &str, cpu: i64, mem: i64) -> NodeRecord {
        NodeRecord {
            name: name.to_string(),
            labels: BTreeMap::new(),
            taints: Vec::new(),
            allocatable: Resource::new(cpu, mem),
            capacity: Resource::new(cpu, mem),
        }
    }

    fn pod_record(uid: &str, group: Option<&str>, node: &str, phase: PodPhase) -> PodRecord {
        PodRecord {
            uid: uid.to_string(),
            namespace: "default".to_string(),
            name: uid.to_string(),
            node_name: node.to_string(),
            phase,
            scheduler_name: "flotilla".to_string(),
            group_name: group.map(|g| g.to_string()),
            priority: 0,
            priority_class_name: String::new(),
            resources: Resource::new(1000, 2048),
            node_selector: BTreeMap::new(),
            tolerations: Vec::new(),
            creation_ts: 100,
        }
    }

    fn group_record(name: &str, queue: &str, min_members: i32) -> GroupRecord {
        GroupRecord::V2(GroupRecordV2 {
            namespace: "default".to_string(),
            name: name.to_string(),
            min_members,
            queue: queue.to_string(),
            priority_class: String::new(),
        })
    }

    #[tokio::test]
    async fn pod_lifecycle_restores_node_accounting() {
        let (cache, _rec) = make_cache();

        cache.apply(ClusterEvent::NodeAdded(node_record("n1", 4000, 8192)));
        cache.apply(ClusterEvent::PodAdded(pod_record(
            "p1",
            None,
            "n1",
            PodPhase::Running,
        )));

        {
            let state = cache.state.lock().unwrap();
            let node = &state.nodes["n1"];
            assert_eq!(node.used, Resource::new(1000, 2048));
            assert_eq!(node.tasks.len(), 1);
        }

        cache.apply(ClusterEvent::PodDeleted(pod_record(
            "p1",
            None,
            "n1",
            PodPhase::Running,
        )));

        let state = cache.state.lock().unwrap();
        let node = &state.nodes["n1"];
        assert_eq!(node.used, Resource::empty());
        assert_eq!(node.idle, Resource::new(4000, 8192));
        assert!(node.tasks.is_empty());
    }

    #[tokio::test]
    async fn duplicate_delete_is_idempotent() {
        let (cache, _rec) = make_cache();
        cache.apply(ClusterEvent::NodeAdded(node_record("n1", 4000, 8192)));
        let pod = pod_record("p1", None, "n1", PodPhase::Running);
        cache.apply(ClusterEvent::PodAdded(pod.clone()));
        cache.apply(ClusterEvent::PodDeleted(pod.clone()));
        // Stale tombstone replayed.
        cache.apply(ClusterEvent::PodDeleted(pod));

        let state = cache.state.lock().unwrap();
        assert_eq!(state.nodes["n1"].used, Resource::empty());
    }

    #[tokio::test]
    async fn snapshot_requires_ready_node_and_known_queue() {
        let (cache, _rec) = make_cache();

        cache.apply(ClusterEvent::NodeAdded(node_record("n1", 4000, 8192)));
        cache.apply(ClusterEvent::QueueAdded(QueueRecord {
            name: "default-queue".to_string(),
            weight: 1,
        }));
        cache.apply(ClusterEvent::GroupAdded(group_record("train", "default-queue", 2)));
        cache.apply(ClusterEvent::PodAdded(pod_record(
            "p1",
            Some("train"),
            "",
            PodPhase::Pending,
        )));
        // Job in a queue nobody created.
        cache.apply(ClusterEvent::GroupAdded(group_record("orphan", "missing", 1)));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.nodes.len(), 1);
        assert!(snapshot.jobs.contains_key("default/train"));
        assert!(!snapshot.jobs.contains_key("default/orphan"));
    }

    #[tokio::test]
    async fn snapshot_resolves_priority_class() {
        let (cache, _rec) = make_cache();
        cache.apply(ClusterEvent::QueueAdded(QueueRecord {
            name: "default-queue".to_string(),
            weight: 1,
        }));
        cache.apply(ClusterEvent::PriorityClassAdded(PriorityClassRecord {
            name: "high".to_string(),
            value: 100,
            global_default: false,
        }));
        cache.apply(ClusterEvent::PriorityClassAdded(PriorityClassRecord {
            name: "base".to_string(),
            value: 5,
            global_default: true,
        }));

        let mut with_class = group_record("train", "default-queue", 1);
        if let GroupRecord::V2(v2) = &mut with_class {
            v2.priority_class = "high".to_string();
        }
        cache.apply(ClusterEvent::GroupAdded(with_class));
        cache.apply(ClusterEvent::GroupAdded(group_record("other", "default-queue", 1)));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.jobs["default/train"].priority, 100);
        // Falls back to the global default class value.
        assert_eq!(snapshot.jobs["default/other"].priority, 5);
    }

    #[tokio::test]
    async fn ungrouped_pod_gets_shadow_group() {
        let (cache, _rec) = make_cache();
        cache.apply(ClusterEvent::QueueAdded(QueueRecord {
            name: "default-queue".to_string(),
            weight: 1,
        }));
        cache.apply(ClusterEvent::PodAdded(pod_record("p1", None, "", PodPhase::Pending)));

        let snapshot = cache.snapshot();
        let job = &snapshot.jobs["default/p1"];
        assert!(job.group.as_ref().unwrap().shadow);
        assert_eq!(job.min_available, 1);
        assert_eq!(job.queue, "default-queue");
    }

    #[tokio::test]
    async fn foreign_unbound_pod_is_ignored() {
        let (cache, _rec) = make_cache();
        let mut pod = pod_record("p1", None, "", PodPhase::Pending);
        pod.scheduler_name = "other-scheduler".to_string();
        cache.apply(ClusterEvent::PodAdded(pod));

        let state = cache.state.lock().unwrap();
        assert!(state.jobs.is_empty());
    }

    #[tokio::test]
    async fn foreign_bound_pod_counts_usage() {
        let (cache, _rec) = make_cache();
        cache.apply(ClusterEvent::NodeAdded(node_record("n1", 4000, 8192)));
        let mut pod = pod_record("p1", None, "n1", PodPhase::Running);
        pod.scheduler_name = "other-scheduler".to_string();
        cache.apply(ClusterEvent::PodAdded(pod));

        let state = cache.state.lock().unwrap();
        assert_eq!(state.nodes["n1"].used, Resource::new(1000, 2048));
    }

    #[tokio::test]
    async fn bind_sets_binding_and_calls_binder() {
        let (cache, rec) = make_cache();
        cache.apply(ClusterEvent::NodeAdded(node_record("n1", 4000, 8192)));
        cache.apply(ClusterEvent::QueueAdded(QueueRecord {
            name: "default-queue".to_string(),
            weight: 1,
        }));
        cache.apply(ClusterEvent::PodAdded(pod_record("p1", None, "", PodPhase::Pending)));

        let task = {
            let state = cache.state.lock().unwrap();
            state.jobs["default/p1"].task(&"p1".to_string()).unwrap().clone()
        };
        cache.bind_task(&task, "n1").unwrap();

        {
            let state = cache.state.lock().unwrap();
            let job = &state.jobs["default/p1"];
            assert_eq!(job.task(&"p1".to_string()).unwrap().status, TaskStatus::Binding);
            assert_eq!(state.nodes["n1"].used, Resource::new(1000, 2048));
        }

        // Let the detached bind future run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(rec.binder.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bind_unknown_node_reverts_status() {
        let (cache, _rec) = make_cache();
        cache.apply(ClusterEvent::PodAdded(pod_record("p1", None, "", PodPhase::Pending)));

        let task = {
            let state = cache.state.lock().unwrap();
            state.jobs["default/p1"].task(&"p1".to_string()).unwrap().clone()
        };
        let err = cache.bind_task(&task, "nowhere");
        assert!(matches!(err, Err(CacheError::NodeNotFound(_))));

        let state = cache.state.lock().unwrap();
        assert_eq!(
            state.jobs["default/p1"].task(&"p1".to_string()).unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn evict_moves_resources_to_releasing() {
        let (cache, rec) = make_cache();
        cache.apply(ClusterEvent::NodeAdded(node_record("n1", 4000, 8192)));
        cache.apply(ClusterEvent::PodAdded(pod_record("p1", None, "n1", PodPhase::Running)));

        let task = {
            let state = cache.state.lock().unwrap();
            state.jobs["default/p1"].task(&"p1".to_string()).unwrap().clone()
        };
        cache.evict_task(&task, "preempted").unwrap();

        {
            let state = cache.state.lock().unwrap();
            let node = &state.nodes["n1"];
            assert_eq!(node.releasing, Resource::new(1000, 2048));
            assert_eq!(node.used, Resource::new(1000, 2048));
            assert_eq!(
                state.jobs["default/p1"].task(&"p1".to_string()).unwrap().status,
                TaskStatus::Releasing
            );
        }

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(rec.evictor.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sync_task_replays_source_of_truth() {
        let (cache, rec) = make_cache();
        cache.apply(ClusterEvent::NodeAdded(node_record("n1", 4000, 8192)));
        cache.apply(ClusterEvent::PodAdded(pod_record("p1", None, "n1", PodPhase::Running)));

        let task = {
            let state = cache.state.lock().unwrap();
            state.jobs["default/p1"].task(&"p1".to_string()).unwrap().clone()
        };

        // Source of truth says the pod is gone.
        rec.pod_source.pods.lock().unwrap().clear();
        cache.sync_task(&task).await.unwrap();

        let state = cache.state.lock().unwrap();
        assert!(state.nodes["n1"].tasks.is_empty());
        assert_eq!(state.nodes["n1"].used, Resource::empty());
    }

    #[tokio::test]
    async fn cleanup_drops_terminated_jobs_only() {
        let (cache, _rec) = make_cache();
        cache.apply(ClusterEvent::PodAdded(pod_record("p1", None, "", PodPhase::Pending)));

        // Job still has a task: requeue.
        assert!(!cache.try_cleanup_job(&"default/p1".to_string()));

        cache.apply(ClusterEvent::PodDeleted(pod_record("p1", None, "", PodPhase::Pending)));
        assert!(cache.try_cleanup_job(&"default/p1".to_string()));

        let state = cache.state.lock().unwrap();
        assert!(state.jobs.is_empty());
    }

    #[tokio::test]
    async fn group_update_adopts_queue_and_threshold() {
        let (cache, _rec) = make_cache();
        cache.apply(ClusterEvent::PodAdded(pod_record(
            "p1",
            Some("train"),
            "",
            PodPhase::Pending,
        )));
        cache.apply(ClusterEvent::QueueAdded(QueueRecord {
            name: "research".to_string(),
            weight: 2,
        }));
        cache.apply(ClusterEvent::GroupAdded(group_record("train", "research", 4)));

        let state = cache.state.lock().unwrap();
        let job = &state.jobs["default/train"];
        assert_eq!(job.queue, "research");
        assert_eq!(job.min_available, 4);
        assert_eq!(job.tasks.len(), 1);
    }
}
