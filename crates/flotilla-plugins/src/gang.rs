//! Gang plugin — enforce the minimum-member requirement.
//!
//! Validates that jobs have enough valid tasks, prefers not-yet-ready
//! jobs in ordering, protects victims whose eviction would push their
//! job below the gang threshold, and publishes unschedulable conditions
//! at session close.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, warn};

use flotilla_api::{
    GroupCondition, GroupConditionKind, JobId, TaskId, TaskInfo,
};
use flotilla_framework::{
    Plugin, PluginArgs, Session, SessionState, ValidateFailure,
};

pub fn new(_args: &PluginArgs) -> Box<dyn Plugin> {
    Box::new(GangPlugin)
}

struct GangPlugin;

impl Plugin for GangPlugin {
    fn name(&self) -> &'static str {
        "gang"
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        ssn.add_job_valid_fn(
            self.name(),
            Box::new(|job| {
                let valid = job.valid_task_num();
                if valid < job.min_available {
                    Some(ValidateFailure {
                        reason: "NotEnoughTasks".to_string(),
                        message: format!(
                            "not enough valid tasks for gang scheduling, valid: {valid}, min: {}",
                            job.min_available
                        ),
                    })
                } else {
                    None
                }
            }),
        );

        ssn.add_preemptable_fn(self.name(), Box::new(gang_victims));
        ssn.add_reclaimable_fn(self.name(), Box::new(gang_victims));

        // Jobs that are not yet ready order before jobs that already are.
        ssn.add_job_order_fn(
            self.name(),
            Box::new(|l, r| {
                let (l_ready, r_ready) = (l.ready(), r.ready());
                if l_ready == r_ready {
                    Ordering::Equal
                } else if l_ready {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }),
        );

        ssn.add_job_ready_fn(self.name(), Box::new(|job| job.ready()));
        ssn.add_job_pipelined_fn(self.name(), Box::new(|job| job.pipelined()));
    }

    fn on_session_close(&mut self, ssn: &mut Session) {
        let session_uid = ssn.uid().to_string();

        let unready: Vec<(JobId, GroupCondition)> = ssn
            .state
            .jobs
            .values()
            .filter(|job| !job.ready())
            .map(|job| {
                let missing = job.min_available - job.ready_task_num();
                let condition = GroupCondition {
                    kind: GroupConditionKind::Unschedulable,
                    transition_id: session_uid.clone(),
                    reason: "NotEnoughResources".to_string(),
                    message: format!(
                        "{missing}/{} tasks in gang unschedulable: {}",
                        job.tasks.len(),
                        job.fit_error()
                    ),
                };
                (job.uid.clone(), condition)
            })
            .collect();

        ssn.stats.unschedulable_jobs += unready.len() as u64;

        for (job_id, condition) in unready {
            if let Err(err) = ssn.update_job_condition(&job_id, condition) {
                warn!(job = %job_id, %err, "failed to update gang condition");
            }
        }
    }
}

/// Protect gangs: a candidate may only be evicted while its job keeps
/// strictly more ready tasks than its threshold.
fn gang_victims(
    state: &SessionState,
    _preemptor: &TaskInfo,
    candidates: &[TaskInfo],
) -> Vec<TaskId> {
    let mut victims = Vec::new();
    let mut occupied: HashMap<JobId, i32> = HashMap::new();

    for candidate in candidates {
        let Some(job) = state.jobs.get(&candidate.job) else {
            continue;
        };
        let remaining = occupied
            .entry(job.uid.clone())
            .or_insert_with(|| job.ready_task_num());

        if *remaining > job.min_available {
            *remaining -= 1;
            victims.push(candidate.uid.clone());
        } else {
            debug!(
                candidate = %candidate.key(),
                job = %job.uid,
                ready = *remaining,
                min_available = job.min_available,
                "not preemptable: would break gang"
            );
        }
    }

    victims
}
