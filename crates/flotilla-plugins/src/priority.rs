//! Priority plugin — order jobs and tasks by priority, preempt strictly
//! lower-priority work.

use tracing::debug;

use flotilla_api::{TaskId, TaskInfo};
use flotilla_framework::{Plugin, PluginArgs, Session, SessionState};

pub fn new(_args: &PluginArgs) -> Box<dyn Plugin> {
    Box::new(PriorityPlugin)
}

struct PriorityPlugin;

impl Plugin for PriorityPlugin {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        // Higher task priority schedules first.
        ssn.add_task_order_fn(
            self.name(),
            Box::new(|l, r| r.priority.cmp(&l.priority)),
        );

        // Higher job priority schedules first.
        ssn.add_job_order_fn(
            self.name(),
            Box::new(|l, r| r.priority.cmp(&l.priority)),
        );

        ssn.add_preemptable_fn(self.name(), Box::new(priority_victims));
    }
}

/// A preemptee is eligible only when its job's priority is strictly lower
/// than the preemptor's; within the same job, per-task priority decides.
fn priority_victims(
    state: &SessionState,
    preemptor: &TaskInfo,
    candidates: &[TaskInfo],
) -> Vec<TaskId> {
    let Some(preemptor_job) = state.jobs.get(&preemptor.job) else {
        return Vec::new();
    };

    let mut victims = Vec::new();
    for candidate in candidates {
        if candidate.job == preemptor.job {
            if candidate.priority < preemptor.priority {
                victims.push(candidate.uid.clone());
            }
            continue;
        }
        match state.jobs.get(&candidate.job) {
            Some(job) if job.priority < preemptor_job.priority => {
                victims.push(candidate.uid.clone());
            }
            _ => {
                debug!(
                    candidate = %candidate.key(),
                    "not preemptable: job priority not lower than preemptor"
                );
            }
        }
    }
    victims
}
