//! Reclaim action — cross-queue eviction driven by weighted shares.
//!
//! Each queue deserves `total × weight / Σweights` of the cluster. A
//! queue still under its deserved share may reclaim resources for its
//! pending jobs by evicting plugin-approved victims from queues running
//! over theirs. Victim approval goes through the reclaimable dispatch
//! (gang protection and the proportion plugin's overuse check compose
//! there).

use std::collections::HashMap;

use tracing::{debug, warn};

use flotilla_api::{JobId, QueueId, Resource, TaskInfo, TaskStatus};
use flotilla_framework::{Session, Statement};

use crate::util::{feasible_nodes_by_score, pending_tasks_sorted};
use crate::Action;

pub struct Reclaim;

impl Action for Reclaim {
    fn name(&self) -> &'static str {
        "reclaim"
    }

    fn execute(&self, ssn: &mut Session) {
        let mut shares = QueueShares::compute(ssn);

        let mut queue_ids: Vec<QueueId> = ssn.state.queues.keys().cloned().collect();
        queue_ids.sort_by(|l, r| ssn.queue_order(&ssn.state.queues[l], &ssn.state.queues[r]));

        for queue_id in queue_ids {
            let mut job_ids: Vec<JobId> = ssn
                .state
                .jobs
                .values()
                .filter(|job| job.queue == queue_id)
                .filter(|job| job.count_in(TaskStatus::Pending) > 0)
                .filter(|job| ssn.job_valid(job).is_none())
                .filter(|job| !ssn.job_pipelined(job))
                .map(|job| job.uid.clone())
                .collect();
            if job_ids.is_empty() {
                continue;
            }
            job_ids.sort_by(|l, r| ssn.job_order(&ssn.state.jobs[l], &ssn.state.jobs[r]));

            for job_id in job_ids {
                reclaim_job(ssn, &job_id, &queue_id, &mut shares);
            }
        }
    }
}

/// Deserved and currently-allocated resources per queue, maintained
/// locally as the action evicts and pipelines.
struct QueueShares {
    deserved: HashMap<QueueId, Resource>,
    allocated: HashMap<QueueId, Resource>,
}

impl QueueShares {
    fn compute(ssn: &Session) -> QueueShares {
        let mut total = Resource::empty();
        for node in ssn.state.nodes.values().filter(|n| n.ready()) {
            total.add(&node.allocatable);
        }
        let total_weight: i32 = ssn.state.queues.values().map(|q| q.weight).sum();

        let mut deserved = HashMap::new();
        let mut allocated = HashMap::new();
        for queue in ssn.state.queues.values() {
            let fraction = if total_weight > 0 {
                queue.weight as f64 / total_weight as f64
            } else {
                0.0
            };
            deserved.insert(queue.uid.clone(), total.scaled(fraction));
            allocated.insert(queue.uid.clone(), Resource::empty());
        }

        let occupied = [
            TaskStatus::Allocated,
            TaskStatus::Binding,
            TaskStatus::Bound,
            TaskStatus::Running,
        ];
        for job in ssn.state.jobs.values() {
            let requested = job.requested_in(&occupied);
            allocated.entry(job.queue.clone()).or_default().add(&requested);
        }

        QueueShares { deserved, allocated }
    }

    /// A queue may take `request` only while that keeps it within its
    /// deserved share.
    fn may_take(&self, queue: &QueueId, request: &Resource) -> bool {
        let (Some(allocated), Some(deserved)) =
            (self.allocated.get(queue), self.deserved.get(queue))
        else {
            return false;
        };
        let mut projected = allocated.clone();
        projected.add(request);
        projected.less_equal(deserved)
    }

    fn take(&mut self, queue: &QueueId, request: &Resource) {
        self.allocated.entry(queue.clone()).or_default().add(request);
    }

    fn release(&mut self, queue: &QueueId, request: &Resource) {
        self.allocated.entry(queue.clone()).or_default().sub(request);
    }
}

fn reclaim_job(ssn: &mut Session, job_id: &JobId, queue_id: &QueueId, shares: &mut QueueShares) {
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

        if !shares.may_take(queue_id, &task.resreq) {
            debug!(task = %task.key(), queue = %queue_id, "queue at deserved share, stopping");
            break;
        }

        if reclaim_for_task(ssn, &mut statement, job_id, queue_id, &task, shares) {
            shares.take(queue_id, &task.resreq);
        }
    }

    if statement.is_empty() {
        return;
    }

    let satisfied = ssn.job_pipelined(&ssn.state.jobs[job_id]);
    if satisfied {
        statement.commit(ssn);
    } else {
        debug!(job = %job_id, "reclaim cannot satisfy gang, discarding");
        statement.discard(ssn);
    }
}

fn reclaim_for_task(
    ssn: &mut Session,
    statement: &mut Statement,
    job_id: &JobId,
    queue_id: &QueueId,
    task: &TaskInfo,
    shares: &mut QueueShares,
) -> bool {
    for hostname in feasible_nodes_by_score(ssn, task) {
        if task.resreq.less_equal(&ssn.state.nodes[&hostname].future_idle()) {
            return pipeline_onto(ssn, statement, job_id, task, &hostname);
        }

        // Candidates: running tasks from other queues.
        let candidates: Vec<TaskInfo> = {
            let node = &ssn.state.nodes[&hostname];
            node.tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .filter(|t| {
                    ssn.state
                        .jobs
                        .get(&t.job)
                        .map(|job| &job.queue != queue_id)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };
        if candidates.is_empty() {
            continue;
        }

        let mut victims = ssn.reclaimable(task, &candidates);
        if victims.is_empty() {
            continue;
        }
        victims.sort_by(|l, r| ssn.task_order(l, r).reverse());

        for victim in &victims {
            if task.resreq.less_equal(&ssn.state.nodes[&hostname].future_idle()) {
                break;
            }
            let victim_queue = ssn.state.jobs.get(&victim.job).map(|j| j.queue.clone());
            match statement.evict(ssn, &victim.job, &victim.uid, "reclaim") {
                Ok(()) => {
                    if let Some(queue) = victim_queue {
                        shares.release(&queue, &victim.resreq);
                    }
                }
                Err(err) => {
                    warn!(victim = %victim.key(), %err, "evict failed");
                }
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
