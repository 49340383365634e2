//! Preempt action — evict lower-priority work so stuck gangs can run.
//!
//! For every valid pending job whose gang cannot be satisfied yet, each
//! still-needed task looks for a node where evicting plugin-approved
//! victims would free enough resources. Victims are evicted tentatively,
//! the preemptor is pipelined (it binds next cycle, once the cluster
//! confirms the evictions), and the statement commits only if the job
//! reaches its pipelined threshold.

use tracing::{debug, warn};

use flotilla_api::{JobId, TaskInfo, TaskStatus};
use flotilla_framework::{Session, Statement};

use crate::util::{feasible_nodes_by_score, pending_tasks_sorted};
use crate::Action;

pub struct Preempt;

impl Action for Preempt {
    fn name(&self) -> &'static str {
        "preempt"
    }

    fn execute(&self, ssn: &mut Session) {
        let mut job_ids: Vec<JobId> = ssn
            .state
            .jobs
            .values()
            .filter(|job| job.count_in(TaskStatus::Pending) > 0)
            .filter(|job| ssn.job_valid(job).is_none())
            .filter(|job| !ssn.job_pipelined(job))
            .map(|job| job.uid.clone())
            .collect();
        job_ids.sort_by(|l, r| ssn.job_order(&ssn.state.jobs[l], &ssn.state.jobs[r]));

        for job_id in job_ids {
            preempt_job(ssn, &job_id);
        }
    }
}

fn preempt_job(ssn: &mut Session, job_id: &JobId) {
    let mut statement = Statement::new();

    for task_id in pending_tasks_sorted(ssn, job_id) {
        if ssn.job_pipelined(&ssn.state.jobs[job_id]) {
            break;
        }
        let Some(task) = ssn
            .state
            .jobs
            .get(job_id)
            .and_then(|job| job.task(&task_id))
            .cloned()
        else {
            continue;
        };
        if !preempt_for_task(ssn, &mut statement, job_id, &task) {
            debug!(task = %task.key(), "no preemption found");
        }
    }

    if statement.is_empty() {
        return;
    }

    let satisfied = ssn.job_pipelined(&ssn.state.jobs[job_id]);
    if satisfied {
        statement.commit(ssn);
    } else {
        debug!(job = %job_id, "preemption cannot satisfy gang, discarding");
        statement.discard(ssn);
    }
}

/// Try to make room for one task. Returns true once the task is
/// pipelined onto some node.
fn preempt_for_task(
    ssn: &mut Session,
    statement: &mut Statement,
    job_id: &JobId,
    task: &TaskInfo,
) -> bool {
    for hostname in feasible_nodes_by_score(ssn, task) {
        // Planned evictions may already cover this task.
        if task.resreq.less_equal(&ssn.state.nodes[&hostname].future_idle()) {
            return pipeline_onto(ssn, statement, job_id, task, &hostname);
        }

        let candidates: Vec<TaskInfo> = ssn.state.nodes[&hostname]
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .cloned()
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let mut victims = ssn.preemptable(task, &candidates);
        if victims.is_empty() {
            debug!(task = %task.key(), node = %hostname, "no permissible victims");
            continue;
        }
        // Cheapest victims first.
        victims.sort_by(|l, r| ssn.task_order(l, r).reverse());

        for victim in &victims {
            if task.resreq.less_equal(&ssn.state.nodes[&hostname].future_idle()) {
                break;
            }
            if let Err(err) = statement.evict(ssn, &victim.job, &victim.uid, "preempt") {
                warn!(victim = %victim.key(), %err, "evict failed");
            }
        }

        if task.resreq.less_equal(&ssn.state.nodes[&hostname].future_idle()) {
            return pipeline_onto(ssn, statement, job_id, task, &hostname);
        }
    }

    false
}

fn pipeline_onto(
    ssn: &mut Session,
    statement: &mut Statement,
    job_id: &JobId,
    task: &TaskInfo,
    hostname: &str,
) -> bool {
    match statement.pipeline(ssn, job_id, &task.uid, hostname) {
        Ok(()) => true,
        Err(err) => {
            warn!(task = %task.key(), node = %hostname, %err, "pipeline failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_api::{ClusterInfo, QueueInfo, QueueRecord, Resource};
    use flotilla_framework::testing::{make_job_with_tasks, make_ready_node, FakeCache};
    use flotilla_framework::{open_session, PluginOption, Session, Tier};
    use flotilla_plugins::default_factory;
    use std::sync::Arc;

    fn tiers() -> Vec<Tier> {
        Vec::from([Tier {
            plugins: vec![
                PluginOption::new("priority"),
                PluginOption::new("gang"),
                PluginOption::new("conformance"),
                PluginOption::new("predicates"),
                PluginOption::new("nodeorder"),
            ],
        }])
    }

    /// One full node running a low-priority task, one pending
    /// high-priority task that only fits after eviction.
    fn contended_snapshot() -> ClusterInfo {
        let mut snapshot = ClusterInfo::default();
        let mut node = make_ready_node("n1", 4000, 8 << 30);

        let mut low = make_job_with_tasks("default/low", "default-queue", 1, &[TaskStatus::Running]);
        low.priority = 1;
        // Allow eviction below the (met) gang threshold.
        if let Some(group) = &mut low.group {
            group.min_members = 0;
        }
        low.min_available = 0;
        for task in low.tasks.values_mut() {
            task.resreq = Resource::new(4000, 8 << 30);
            task.priority = 1;
            task.node_name = "n1".to_string();
            node.add_task(task).unwrap();
        }

        let mut high = make_job_with_tasks("default/high", "default-queue", 1, &[TaskStatus::Pending]);
        high.priority = 10;
        for task in high.tasks.values_mut() {
            task.resreq = Resource::new(4000, 8 << 30);
            task.priority = 10;
        }

        snapshot.nodes.insert(node.name.clone(), node);
        snapshot.jobs.insert(low.uid.clone(), low);
        snapshot.jobs.insert(high.uid.clone(), high);
        snapshot.queues.insert(
            "default-queue".to_string(),
            QueueInfo::new(QueueRecord {
                name: "default-queue".to_string(),
                weight: 1,
            }),
        );
        snapshot
    }

    fn open(cache: Arc<FakeCache>, snapshot: ClusterInfo) -> Session {
        open_session(cache, snapshot, &tiers(), &default_factory()).unwrap()
    }

    #[test]
    fn high_priority_task_preempts_and_pipelines() {
        let cache = Arc::new(FakeCache::default());
        let mut ssn = open(cache.clone(), contended_snapshot());

        Preempt.execute(&mut ssn);

        // Victim evicted through the cache; preemptor pipelined, not bound.
        assert_eq!(cache.evictions.lock().unwrap().len(), 1);
        assert!(cache.binds.lock().unwrap().is_empty());

        let low = &ssn.state.jobs["default/low"];
        assert_eq!(low.count_in(TaskStatus::Releasing), 1);
        let high = &ssn.state.jobs["default/high"];
        assert_eq!(high.count_in(TaskStatus::Pipelined), 1);
    }

    #[test]
    fn equal_priority_is_not_preempted() {
        let mut snapshot = contended_snapshot();
        snapshot.jobs.get_mut("default/high").unwrap().priority = 1;
        for task in snapshot
            .jobs
            .get_mut("default/high")
            .unwrap()
            .tasks
            .values_mut()
        {
            task.priority = 1;
        }

        let cache = Arc::new(FakeCache::default());
        let mut ssn = open(cache.clone(), snapshot);

        Preempt.execute(&mut ssn);

        assert!(cache.evictions.lock().unwrap().is_empty());
        let low = &ssn.state.jobs["default/low"];
        assert_eq!(low.count_in(TaskStatus::Running), 1);
    }

    #[test]
    fn gang_protects_victims_at_threshold() {
        // Victim job min_available equals its running count: gang refuses
        // both victims, preemption aborts, nothing changes.
        let mut snapshot = ClusterInfo::default();
        let mut node = make_ready_node("n1", 4000, 8 << 30);

        let mut low = make_job_with_tasks(
            "default/low",
            "default-queue",
            2,
            &[TaskStatus::Running, TaskStatus::Running],
        );
        low.priority = 1;
        for task in low.tasks.values_mut() {
            task.resreq = Resource::new(2000, 4 << 30);
            task.priority = 1;
            task.node_name = "n1".to_string();
            node.add_task(task).unwrap();
        }

        let mut high = make_job_with_tasks("default/high", "default-queue", 1, &[TaskStatus::Pending]);
        high.priority = 10;
        for task in high.tasks.values_mut() {
            task.resreq = Resource::new(4000, 8 << 30);
            task.priority = 10;
        }

        snapshot.nodes.insert(node.name.clone(), node);
        snapshot.jobs.insert(low.uid.clone(), low);
        snapshot.jobs.insert(high.uid.clone(), high);
        snapshot.queues.insert(
            "default-queue".to_string(),
            QueueInfo::new(QueueRecord {
                name: "default-queue".to_string(),
                weight: 1,
            }),
        );

        let cache = Arc::new(FakeCache::default());
        let mut ssn = open(cache.clone(), snapshot);

        Preempt.execute(&mut ssn);

        assert!(cache.evictions.lock().unwrap().is_empty());
        let low = &ssn.state.jobs["default/low"];
        assert_eq!(low.count_in(TaskStatus::Running), 2);
        let high = &ssn.state.jobs["default/high"];
        assert_eq!(high.count_in(TaskStatus::Pending), 1);
    }

    #[test]
    fn partial_gang_protection_allows_one_victim() {
        // Victim job has two running tasks, min_available 1: gang allows
        // exactly one eviction. One eviction frees enough for the
        // preemptor, so preemption succeeds with a single victim.
        let mut snapshot = ClusterInfo::default();
        let mut node = make_ready_node("n1", 4000, 8 << 30);

        let mut low = make_job_with_tasks(
            "default/low",
            "default-queue",
            1,
            &[TaskStatus::Running, TaskStatus::Running],
        );
        low.priority = 1;
        for task in low.tasks.values_mut() {
            task.resreq = Resource::new(2000, 4 << 30);
            task.priority = 1;
            task.node_name = "n1".to_string();
            node.add_task(task).unwrap();
        }

        let mut high = make_job_with_tasks("default/high", "default-queue", 1, &[TaskStatus::Pending]);
        high.priority = 10;
        for task in high.tasks.values_mut() {
            task.resreq = Resource::new(2000, 4 << 30);
            task.priority = 10;
        }

        snapshot.nodes.insert(node.name.clone(), node);
        snapshot.jobs.insert(low.uid.clone(), low);
        snapshot.jobs.insert(high.uid.clone(), high);
        snapshot.queues.insert(
            "default-queue".to_string(),
            QueueInfo::new(QueueRecord {
                name: "default-queue".to_string(),
                weight: 1,
            }),
        );

        let cache = Arc::new(FakeCache::default());
        let mut ssn = open(cache.clone(), snapshot);

        Preempt.execute(&mut ssn);

        assert_eq!(cache.evictions.lock().unwrap().len(), 1);
        let low = &ssn.state.jobs["default/low"];
        assert_eq!(low.count_in(TaskStatus::Running), 1);
        assert_eq!(low.count_in(TaskStatus::Releasing), 1);
        let high = &ssn.state.jobs["default/high"];
        assert_eq!(high.count_in(TaskStatus::Pipelined), 1);
    }

    #[test]
    fn system_critical_tasks_survive() {
        let mut snapshot = contended_snapshot();
        // Mark the victim as system-critical; conformance filters it.
        if let Some(low) = snapshot.jobs.get_mut("default/low") {
            for task in low.tasks.values_mut() {
                task.pod.priority_class_name = "system-critical".to_string();
            }
        }
        // The node's task copy carries the class too.
        if let Some(node) = snapshot.nodes.get_mut("n1") {
            for task in node.tasks.values_mut() {
                task.pod.priority_class_name = "system-critical".to_string();
            }
        }

        let cache = Arc::new(FakeCache::default());
        let mut ssn = open(cache.clone(), snapshot);

        Preempt.execute(&mut ssn);

        assert!(cache.evictions.lock().unwrap().is_empty());
    }
}
