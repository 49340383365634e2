//! Scheduling sessions — one transaction per cycle.
//!
//! A session clones the snapshot into its own arenas, builds the
//! configured plugins and dispatches their registered policy functions
//! with tiered short-circuit composition: within a tier the first
//! non-equal ordering decision wins; across tiers the first deciding tier
//! wins, giving configuration authors a lexicographic policy hierarchy.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use flotilla_api::{
    ClusterInfo, GroupCondition, JobId, JobInfo, NodeInfo, QueueId, QueueInfo, TaskId, TaskInfo,
};

use crate::conf::Tier;
use crate::error::{FrameworkError, FrameworkResult};
use crate::interface::SchedulerCache;
use crate::plugins::{Plugin, PluginFactory};
use crate::statement::Statement;

/// Why a job failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateFailure {
    pub reason: String,
    pub message: String,
}

/// Why a node was rejected for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateFailure {
    pub reason: String,
}

impl std::fmt::Display for PredicateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Fired on every tentative or committed allocation/deallocation.
pub struct SchedEvent {
    pub task: TaskInfo,
}

/// Callbacks plugins register to maintain incremental state
/// (e.g. fair-share accounting).
#[derive(Default)]
pub struct EventHandler {
    pub on_allocate: Option<Box<dyn Fn(&SchedEvent)>>,
    pub on_deallocate: Option<Box<dyn Fn(&SchedEvent)>>,
}

pub type OrderFn<T> = Box<dyn Fn(&T, &T) -> Ordering>;
pub type JobValidFn = Box<dyn Fn(&JobInfo) -> Option<ValidateFailure>>;
pub type JobStateFn = Box<dyn Fn(&JobInfo) -> bool>;
pub type PredicateFn = Box<dyn Fn(&TaskInfo, &NodeInfo) -> Result<(), PredicateFailure>>;
pub type NodeOrderFn = Box<dyn Fn(&TaskInfo, &NodeInfo) -> f64>;

/// Victim selection: given the session arenas, a preemptor and candidate
/// victims, return the UIDs this plugin would allow evicting.
pub type VictimsFn = Box<dyn Fn(&SessionState, &TaskInfo, &[TaskInfo]) -> Vec<TaskId>>;

/// The session's view of the cluster: independent arenas cloned from the
/// snapshot, mutated freely by actions.
#[derive(Default)]
pub struct SessionState {
    pub uid: String,
    pub jobs: HashMap<JobId, JobInfo>,
    pub nodes: HashMap<String, NodeInfo>,
    pub queues: HashMap<QueueId, QueueInfo>,
}

/// Counters collected over one session, merged into scheduler metrics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub binds: u64,
    pub evictions: u64,
    pub pipelines: u64,
    /// Jobs that closed the session below their gang threshold.
    pub unschedulable_jobs: u64,
    /// Seconds from task creation to bind, per committed bind.
    pub schedule_latency_secs: Vec<f64>,
}

/// Per-kind tables of registered policy functions plus the tier list that
/// drives their composition.
#[derive(Default)]
pub struct PluginRegistry {
    tiers: Vec<Tier>,
    job_order_fns: HashMap<String, OrderFn<JobInfo>>,
    task_order_fns: HashMap<String, OrderFn<TaskInfo>>,
    queue_order_fns: HashMap<String, OrderFn<QueueInfo>>,
    job_valid_fns: HashMap<String, JobValidFn>,
    job_ready_fns: HashMap<String, JobStateFn>,
    job_pipelined_fns: HashMap<String, JobStateFn>,
    predicate_fns: HashMap<String, PredicateFn>,
    node_order_fns: HashMap<String, NodeOrderFn>,
    preemptable_fns: HashMap<String, VictimsFn>,
    reclaimable_fns: HashMap<String, VictimsFn>,
    event_handlers: Vec<EventHandler>,
}

/// One scheduling transaction over a snapshot.
pub struct Session {
    pub state: SessionState,
    pub stats: SessionStats,
    registry: PluginRegistry,
    plugins: Vec<Box<dyn Plugin>>,
    pub(crate) cache: Arc<dyn SchedulerCache>,
}

/// Open a session: clone the snapshot in, construct the configured
/// plugins and let each register its functions.
pub fn open_session(
    cache: Arc<dyn SchedulerCache>,
    snapshot: ClusterInfo,
    tiers: &[Tier],
    factory: &PluginFactory,
) -> FrameworkResult<Session> {
    let mut ssn = Session {
        state: SessionState {
            uid: generate_session_id(),
            jobs: snapshot.jobs,
            nodes: snapshot.nodes,
            queues: snapshot.queues,
        },
        stats: SessionStats::default(),
        registry: PluginRegistry {
            tiers: tiers.to_vec(),
            ..PluginRegistry::default()
        },
        plugins: Vec::new(),
        cache,
    };

    let mut seen = HashSet::new();
    for tier in tiers {
        for option in &tier.plugins {
            if !seen.insert(option.name.clone()) {
                continue;
            }
            let builder = factory
                .get(&option.name)
                .ok_or_else(|| FrameworkError::UnknownPlugin(option.name.clone()))?;
            let mut plugin = builder(&option.args);
            plugin.on_session_open(&mut ssn);
            ssn.plugins.push(plugin);
        }
    }

    debug!(
        session = %ssn.state.uid,
        jobs = ssn.state.jobs.len(),
        nodes = ssn.state.nodes.len(),
        queues = ssn.state.queues.len(),
        "session opened"
    );

    Ok(ssn)
}

/// Close a session: run every plugin's close hook and hand back the
/// cycle statistics.
pub fn close_session(mut ssn: Session) -> SessionStats {
    let mut plugins = std::mem::take(&mut ssn.plugins);
    for plugin in plugins.iter_mut() {
        plugin.on_session_close(&mut ssn);
    }
    debug!(session = %ssn.state.uid, "session closed");
    ssn.stats
}

impl Session {
    pub fn uid(&self) -> &str {
        &self.state.uid
    }

    /// Construct a session directly from prepared state, bypassing the
    /// plugin build step. Test support.
    pub fn for_testing(
        state: SessionState,
        stats: SessionStats,
        cache: Arc<dyn SchedulerCache>,
    ) -> Session {
        Session {
            state,
            stats,
            registry: PluginRegistry::default(),
            plugins: Vec::new(),
            cache,
        }
    }

    // ── Registration (called by plugins during on_session_open) ────

    pub fn add_job_order_fn(&mut self, plugin: &str, f: OrderFn<JobInfo>) {
        self.registry.job_order_fns.insert(plugin.to_string(), f);
    }
    pub fn add_task_order_fn(&mut self, plugin: &str, f: OrderFn<TaskInfo>) {
        self.registry.task_order_fns.insert(plugin.to_string(), f);
    }
    pub fn add_queue_order_fn(&mut self, plugin: &str, f: OrderFn<QueueInfo>) {
        self.registry.queue_order_fns.insert(plugin.to_string(), f);
    }
    pub fn add_job_valid_fn(&mut self, plugin: &str, f: JobValidFn) {
        self.registry.job_valid_fns.insert(plugin.to_string(), f);
    }
    pub fn add_job_ready_fn(&mut self, plugin: &str, f: JobStateFn) {
        self.registry.job_ready_fns.insert(plugin.to_string(), f);
    }
    pub fn add_job_pipelined_fn(&mut self, plugin: &str, f: JobStateFn) {
        self.registry.job_pipelined_fns.insert(plugin.to_string(), f);
    }
    pub fn add_predicate_fn(&mut self, plugin: &str, f: PredicateFn) {
        self.registry.predicate_fns.insert(plugin.to_string(), f);
    }
    pub fn add_node_order_fn(&mut self, plugin: &str, f: NodeOrderFn) {
        self.registry.node_order_fns.insert(plugin.to_string(), f);
    }
    pub fn add_preemptable_fn(&mut self, plugin: &str, f: VictimsFn) {
        self.registry.preemptable_fns.insert(plugin.to_string(), f);
    }
    pub fn add_reclaimable_fn(&mut self, plugin: &str, f: VictimsFn) {
        self.registry.reclaimable_fns.insert(plugin.to_string(), f);
    }

    /// Register allocate/deallocate callbacks fired on every tentative or
    /// committed placement change in this session.
    pub fn register_event_handler(&mut self, handler: EventHandler) {
        self.registry.event_handlers.push(handler);
    }

    pub(crate) fn fire_allocate(&self, task: &TaskInfo) {
        let event = SchedEvent { task: task.clone() };
        for handler in &self.registry.event_handlers {
            if let Some(f) = &handler.on_allocate {
                f(&event);
            }
        }
    }

    pub(crate) fn fire_deallocate(&self, task: &TaskInfo) {
        let event = SchedEvent { task: task.clone() };
        for handler in &self.registry.event_handlers {
            if let Some(f) = &handler.on_deallocate {
                f(&event);
            }
        }
    }

    // ── Tiered dispatch ─────────────────────────────────────────────

    /// Lexicographic job order across tiers; FIFO fallback.
    pub fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Ordering {
        for tier in &self.registry.tiers {
            for option in &tier.plugins {
                if !option.job_order_enabled() {
                    continue;
                }
                if let Some(f) = self.registry.job_order_fns.get(&option.name) {
                    let ord = f(l, r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
        l.creation_ts.cmp(&r.creation_ts).then_with(|| l.uid.cmp(&r.uid))
    }

    pub fn task_order(&self, l: &TaskInfo, r: &TaskInfo) -> Ordering {
        for tier in &self.registry.tiers {
            for option in &tier.plugins {
                if !option.task_order_enabled() {
                    continue;
                }
                if let Some(f) = self.registry.task_order_fns.get(&option.name) {
                    let ord = f(l, r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
        l.pod
            .creation_ts
            .cmp(&r.pod.creation_ts)
            .then_with(|| l.uid.cmp(&r.uid))
    }

    pub fn queue_order(&self, l: &QueueInfo, r: &QueueInfo) -> Ordering {
        for tier in &self.registry.tiers {
            for option in &tier.plugins {
                if !option.queue_order_enabled() {
                    continue;
                }
                if let Some(f) = self.registry.queue_order_fns.get(&option.name) {
                    let ord = f(l, r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
        l.uid.cmp(&r.uid)
    }

    /// First validation failure wins; `None` means the job passes.
    pub fn job_valid(&self, job: &JobInfo) -> Option<ValidateFailure> {
        for tier in &self.registry.tiers {
            for option in &tier.plugins {
                if !option.job_valid_enabled() {
                    continue;
                }
                if let Some(f) = self.registry.job_valid_fns.get(&option.name) {
                    if let Some(failure) = f(job) {
                        return Some(failure);
                    }
                }
            }
        }
        None
    }

    /// All enabled ready functions must agree.
    pub fn job_ready(&self, job: &JobInfo) -> bool {
        self.all_job_state(job, &self.registry.job_ready_fns, |o| o.job_ready_enabled())
    }

    /// All enabled pipelined functions must agree.
    pub fn job_pipelined(&self, job: &JobInfo) -> bool {
        self.all_job_state(job, &self.registry.job_pipelined_fns, |o| {
            o.job_pipelined_enabled()
        })
    }

    fn all_job_state(
        &self,
        job: &JobInfo,
        table: &HashMap<String, JobStateFn>,
        enabled: impl Fn(&crate::conf::PluginOption) -> bool,
    ) -> bool {
        for tier in &self.registry.tiers {
            for option in &tier.plugins {
                if !enabled(option) {
                    continue;
                }
                if let Some(f) = table.get(&option.name) {
                    if !f(job) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// All enabled predicates must pass for the node to be feasible.
    pub fn predicates(&self, task: &TaskInfo, node: &NodeInfo) -> Result<(), PredicateFailure> {
        for tier in &self.registry.tiers {
            for option in &tier.plugins {
                if !option.predicate_enabled() {
                    continue;
                }
                if let Some(f) = self.registry.predicate_fns.get(&option.name) {
                    f(task, node)?;
                }
            }
        }
        Ok(())
    }

    /// Node score for a task: summed across enabled plugins.
    pub fn node_order(&self, task: &TaskInfo, node: &NodeInfo) -> f64 {
        let mut score = 0.0;
        for tier in &self.registry.tiers {
            for option in &tier.plugins {
                if !option.node_order_enabled() {
                    continue;
                }
                if let Some(f) = self.registry.node_order_fns.get(&option.name) {
                    score += f(task, node);
                }
            }
        }
        score
    }

    /// Victims a preemptor may evict, composed conservatively: within a
    /// tier plugins vote by intersection; the first deciding tier fixes
    /// the candidate pool — a victim filtered there cannot be rescued by
    /// a later tier.
    pub fn preemptable(&self, preemptor: &TaskInfo, candidates: &[TaskInfo]) -> Vec<TaskInfo> {
        self.select_victims(preemptor, candidates, &self.registry.preemptable_fns, |o| {
            o.preemptable_enabled()
        })
    }

    pub fn reclaimable(&self, reclaimer: &TaskInfo, candidates: &[TaskInfo]) -> Vec<TaskInfo> {
        self.select_victims(reclaimer, candidates, &self.registry.reclaimable_fns, |o| {
            o.reclaimable_enabled()
        })
    }

    fn select_victims(
        &self,
        preemptor: &TaskInfo,
        candidates: &[TaskInfo],
        table: &HashMap<String, VictimsFn>,
        enabled: impl Fn(&crate::conf::PluginOption) -> bool,
    ) -> Vec<TaskInfo> {
        let mut live: Vec<TaskInfo> = candidates.to_vec();
        let mut chosen: Vec<TaskInfo> = Vec::new();
        let mut chosen_ids: HashSet<TaskId> = HashSet::new();

        for tier in &self.registry.tiers {
            let mut tier_selection: Option<HashSet<TaskId>> = None;
            for option in &tier.plugins {
                if !enabled(option) {
                    continue;
                }
                let Some(f) = table.get(&option.name) else {
                    continue;
                };
                let selected: HashSet<TaskId> =
                    f(&self.state, preemptor, &live).into_iter().collect();
                tier_selection = Some(match tier_selection {
                    None => selected,
                    Some(previous) => previous.intersection(&selected).cloned().collect(),
                });
            }

            if let Some(selection) = tier_selection {
                for task in &live {
                    if selection.contains(&task.uid) && chosen_ids.insert(task.uid.clone()) {
                        chosen.push(task.clone());
                    }
                }
                live.retain(|t| selection.contains(&t.uid));
            }
        }

        chosen
    }

    // ── Top-level operations (single-op statements) ─────────────────

    /// Allocate a task and commit immediately.
    pub fn allocate(
        &mut self,
        job_id: &JobId,
        task_id: &TaskId,
        hostname: &str,
    ) -> FrameworkResult<()> {
        let mut statement = Statement::new();
        statement.allocate(self, job_id, task_id, hostname)?;
        statement.commit(self);
        Ok(())
    }

    /// Pipeline a task (tentative future placement).
    pub fn pipeline(
        &mut self,
        job_id: &JobId,
        task_id: &TaskId,
        hostname: &str,
    ) -> FrameworkResult<()> {
        let mut statement = Statement::new();
        statement.pipeline(self, job_id, task_id, hostname)?;
        statement.commit(self);
        Ok(())
    }

    /// Evict a task and commit immediately.
    pub fn evict(&mut self, job_id: &JobId, task_id: &TaskId, reason: &str) -> FrameworkResult<()> {
        let mut statement = Statement::new();
        statement.evict(self, job_id, task_id, reason)?;
        statement.commit(self);
        Ok(())
    }

    // ── Committed effects ───────────────────────────────────────────

    pub(crate) fn cache(&self) -> &Arc<dyn SchedulerCache> {
        &self.cache
    }

    /// Attach a condition to a job's group and publish its status.
    pub fn update_job_condition(
        &mut self,
        job_id: &JobId,
        condition: GroupCondition,
    ) -> FrameworkResult<()> {
        let job = self
            .state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| FrameworkError::JobNotFound(job_id.clone()))?;
        job.set_group_condition(condition);
        job.refresh_group_phase();
        let snapshot = job.clone();
        if let Err(err) = self.cache.update_job_status(&snapshot) {
            warn!(job = %job_id, %err, "failed to publish job status");
        }
        Ok(())
    }
}

fn generate_session_id() -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    format!("ssn-{:08x}", hasher.finish() as u32)
}
