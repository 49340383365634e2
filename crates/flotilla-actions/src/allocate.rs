//! Allocate action — place pending tasks, gang-gated per job.
//!
//! Queues are walked in queue order, jobs in job order, tasks in task
//! order. Each job gets one statement: tasks that fit a node's idle
//! resources are allocated, tasks that only fit its future idle are
//! pipelined. The statement commits only if the job's pipelined
//! predicate holds afterwards; otherwise every placement is rolled back
//! (gang discard).

use std::collections::HashMap;

use tracing::{debug, warn};

use flotilla_api::{JobId, QueueId, TaskStatus};
use flotilla_framework::{Session, Statement};

use crate::util::{pending_tasks_sorted, select_best_node};
use crate::Action;

pub struct Allocate;

impl Action for Allocate {
    fn name(&self) -> &'static str {
        "allocate"
    }

    fn execute(&self, ssn: &mut Session) {
        let mut jobs_by_queue: HashMap<QueueId, Vec<JobId>> = HashMap::new();
        for job in ssn.state.jobs.values() {
            if job.count_in(TaskStatus::Pending) == 0 {
                continue;
            }
            if let Some(failure) = ssn.job_valid(job) {
                debug!(
                    job = %job.uid,
                    reason = %failure.reason,
                    message = %failure.message,
                    "job failed validation"
                );
                continue;
            }
            if !ssn.state.queues.contains_key(&job.queue) {
                warn!(job = %job.uid, queue = %job.queue, "queue not in session, skipping job");
                continue;
            }
            jobs_by_queue
                .entry(job.queue.clone())
                .or_default()
                .push(job.uid.clone());
        }

        let mut queue_ids: Vec<QueueId> = jobs_by_queue.keys().cloned().collect();
        queue_ids.sort_by(|l, r| ssn.queue_order(&ssn.state.queues[l], &ssn.state.queues[r]));

        for queue_id in queue_ids {
            let mut job_ids = jobs_by_queue.remove(&queue_id).unwrap_or_default();
            job_ids.sort_by(|l, r| ssn.job_order(&ssn.state.jobs[l], &ssn.state.jobs[r]));

            for job_id in job_ids {
                allocate_job(ssn, &job_id);
            }
        }
    }
}

fn allocate_job(ssn: &mut Session, job_id: &JobId) {
    let mut statement = Statement::new();

    for task_id in pending_tasks_sorted(ssn, job_id) {
        let Some(task) = ssn
            .state
            .jobs
            .get(job_id)
            .and_then(|job| job.task(&task_id))
            .cloned()
        else {
            continue;
        };

        let Some(hostname) = select_best_node(ssn, &task) else {
            debug!(task = %task.key(), "no feasible node");
            continue;
        };

        let node = &ssn.state.nodes[&hostname];
        if task.resreq.less_equal(&node.idle) {
            if let Err(err) = statement.allocate(ssn, job_id, &task_id, &hostname) {
                warn!(task = %task.key(), node = %hostname, %err, "allocate failed");
            }
        } else if task.resreq.less_equal(&node.future_idle()) {
            if let Err(err) = statement.pipeline(ssn, job_id, &task_id, &hostname) {
                warn!(task = %task.key(), node = %hostname, %err, "pipeline failed");
            }
        }
    }

    if statement.is_empty() {
        return;
    }

    let satisfied = ssn.job_pipelined(&ssn.state.jobs[job_id]);
    if satisfied {
        statement.commit(ssn);
    } else {
        debug!(job = %job_id, "gang threshold not reachable, discarding placements");
        statement.discard(ssn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_api::{ClusterInfo, Resource, TaskStatus};
    use flotilla_framework::testing::{make_job_with_tasks, make_ready_node, FakeCache};
    use flotilla_framework::{open_session, PluginOption, Session, Tier};
    use flotilla_plugins::default_factory;
    use std::sync::Arc;

    fn single_tier() -> Vec<Tier> {
        Vec::from([Tier {
            plugins: vec![
                PluginOption::new("priority"),
                PluginOption::new("gang"),
                PluginOption::new("predicates"),
                PluginOption::new("nodeorder"),
            ],
        }])
    }

    fn open(cache: Arc<FakeCache>, snapshot: ClusterInfo) -> Session {
        open_session(cache, snapshot, &single_tier(), &default_factory()).unwrap()
    }

    #[test]
    fn gang_of_two_fits_two_nodes() {
        let mut snapshot = ClusterInfo::default();
        // n1: 4000m/8Gi, n2: 2000m/4Gi; tasks request 1000m/2Gi each.
        for node in [make_ready_node("n1", 4000, 8 << 30), make_ready_node("n2", 2000, 4 << 30)] {
            snapshot.nodes.insert(node.name.clone(), node);
        }
        let mut job = make_job_with_tasks(
            "default/gang",
            "default-queue",
            2,
            &[TaskStatus::Pending, TaskStatus::Pending],
        );
        for task in job.tasks.values_mut() {
            task.resreq = Resource::new(1000, 2 << 30);
        }
        snapshot.jobs.insert(job.uid.clone(), job);
        snapshot.queues.insert(
            "default-queue".to_string(),
            flotilla_api::QueueInfo::new(flotilla_api::QueueRecord {
                name: "default-queue".to_string(),
                weight: 1,
            }),
        );

        let cache = Arc::new(FakeCache::default());
        let mut ssn = open(cache.clone(), snapshot);
        Allocate.execute(&mut ssn);

        let job = &ssn.state.jobs["default/gang"];
        assert!(job.ready());
        assert_eq!(cache.binds.lock().unwrap().len(), 2);
    }

    #[test]
    fn gang_discard_when_threshold_unreachable() {
        let mut snapshot = ClusterInfo::default();
        for node in [make_ready_node("n1", 4000, 8 << 30), make_ready_node("n2", 2000, 4 << 30)] {
            snapshot.nodes.insert(node.name.clone(), node);
        }
        // Three tasks of 2000m/4Gi: only two can fit anywhere, min is 3.
        let mut job = make_job_with_tasks(
            "default/gang",
            "default-queue",
            3,
            &[TaskStatus::Pending, TaskStatus::Pending, TaskStatus::Pending],
        );
        for task in job.tasks.values_mut() {
            task.resreq = Resource::new(2000, 4 << 30);
        }
        snapshot.jobs.insert(job.uid.clone(), job);
        snapshot.queues.insert(
            "default-queue".to_string(),
            flotilla_api::QueueInfo::new(flotilla_api::QueueRecord {
                name: "default-queue".to_string(),
                weight: 1,
            }),
        );

        let before_nodes: Vec<(String, Resource)> = snapshot
            .nodes
            .values()
            .map(|n| (n.name.clone(), n.idle.clone()))
            .collect();

        let cache = Arc::new(FakeCache::default());
        let mut ssn = open(cache.clone(), snapshot);
        Allocate.execute(&mut ssn);

        // Committed state identical to initial: no binds, idle untouched,
        // every task back to Pending.
        assert!(cache.binds.lock().unwrap().is_empty());
        for (name, idle) in before_nodes {
            assert_eq!(ssn.state.nodes[&name].idle, idle, "node {name} idle changed");
        }
        let job = &ssn.state.jobs["default/gang"];
        assert_eq!(job.count_in(TaskStatus::Pending), 3);
        assert!(job.index_consistent());
    }

    #[test]
    fn invalid_job_is_skipped() {
        let mut snapshot = ClusterInfo::default();
        let node = make_ready_node("n1", 4000, 8 << 30);
        snapshot.nodes.insert(node.name.clone(), node);
        // min_available 3 but only one valid task: gang's job_valid fails.
        let job = make_job_with_tasks("default/short", "default-queue", 3, &[TaskStatus::Pending]);
        snapshot.jobs.insert(job.uid.clone(), job);
        snapshot.queues.insert(
            "default-queue".to_string(),
            flotilla_api::QueueInfo::new(flotilla_api::QueueRecord {
                name: "default-queue".to_string(),
                weight: 1,
            }),
        );

        let cache = Arc::new(FakeCache::default());
        let mut ssn = open(cache.clone(), snapshot);
        Allocate.execute(&mut ssn);

        assert!(cache.binds.lock().unwrap().is_empty());
        assert_eq!(
            ssn.state.jobs["default/short"].count_in(TaskStatus::Pending),
            1
        );
    }
}
