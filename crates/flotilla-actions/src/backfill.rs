//! Backfill action — opportunistic placement for zero-request tasks.
//!
//! Tasks with no resource request cannot change node accounting, so they
//! are allocated and committed one at a time into any feasible node's
//! leftover capacity, without gang gating.

use tracing::{debug, warn};

use flotilla_api::{JobId, TaskId, TaskStatus};
use flotilla_framework::Session;

use crate::util::feasible_nodes_by_score;
use crate::Action;

pub struct Backfill;

impl Action for Backfill {
    fn name(&self) -> &'static str {
        "backfill"
    }

    fn execute(&self, ssn: &mut Session) {
        let mut backfill_tasks: Vec<(JobId, TaskId)> = Vec::new();
        for job in ssn.state.jobs.values() {
            if ssn.job_valid(job).is_some() {
                continue;
            }
            for task in job.tasks_in(TaskStatus::Pending) {
                if task.resreq.is_empty() {
                    backfill_tasks.push((job.uid.clone(), task.uid.clone()));
                }
            }
        }

        for (job_id, task_id) in backfill_tasks {
            let Some(task) = ssn
                .state
                .jobs
                .get(&job_id)
                .and_then(|job| job.task(&task_id))
                .cloned()
            else {
                continue;
            };

            let Some(hostname) = feasible_nodes_by_score(ssn, &task).into_iter().next() else {
                debug!(task = %task.key(), "no feasible node for backfill");
                continue;
            };

            if let Err(err) = ssn.allocate(&job_id, &task_id, &hostname) {
                warn!(task = %task.key(), node = %hostname, %err, "backfill failed");
            }
        }
    }
}
