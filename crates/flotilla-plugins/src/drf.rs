//! DRF plugin — dominant-resource-fairness job ordering.
//!
//! Each job's share is the maximum, across resource dimensions, of its
//! allocated amount over the cluster total. Jobs with lower dominant
//! share order first; allocate/deallocate event handlers keep the shares
//! current as the session mutates.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use flotilla_api::{JobId, Resource, TaskInfo, TaskStatus};
use flotilla_framework::{EventHandler, Plugin, PluginArgs, Session};

pub fn new(_args: &PluginArgs) -> Box<dyn Plugin> {
    Box::new(DrfPlugin {
        state: Rc::new(RefCell::new(DrfState::default())),
    })
}

#[derive(Default)]
struct DrfState {
    total: Resource,
    allocated: HashMap<JobId, Resource>,
    shares: HashMap<JobId, f64>,
}

impl DrfState {
    fn recompute(&mut self, job: &JobId) {
        let allocated = self.allocated.entry(job.clone()).or_default();
        let share = dominant_share(allocated, &self.total);
        self.shares.insert(job.clone(), share);
    }

    fn on_allocate(&mut self, task: &TaskInfo) {
        self.allocated
            .entry(task.job.clone())
            .or_default()
            .add(&task.resreq);
        self.recompute(&task.job);
    }

    fn on_deallocate(&mut self, task: &TaskInfo) {
        self.allocated
            .entry(task.job.clone())
            .or_default()
            .sub(&task.resreq);
        self.recompute(&task.job);
    }
}

/// Max over dimensions of allocated/total; zero-capacity dimensions are
/// skipped.
fn dominant_share(allocated: &Resource, total: &Resource) -> f64 {
    let mut share: f64 = 0.0;
    if total.milli_cpu > 0 {
        share = share.max(allocated.milli_cpu as f64 / total.milli_cpu as f64);
    }
    if total.memory > 0 {
        share = share.max(allocated.memory as f64 / total.memory as f64);
    }
    for (name, amount) in &allocated.scalars {
        let capacity = total.scalar(name);
        if capacity > 0.0 {
            share = share.max(amount / capacity);
        }
    }
    share
}

struct DrfPlugin {
    state: Rc<RefCell<DrfState>>,
}

impl Plugin for DrfPlugin {
    fn name(&self) -> &'static str {
        "drf"
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        {
            let mut state = self.state.borrow_mut();
            let mut total = Resource::empty();
            for node in ssn.state.nodes.values().filter(|n| n.ready()) {
                total.add(&node.allocatable);
            }
            state.total = total;

            let occupied = [
                TaskStatus::Allocated,
                TaskStatus::Binding,
                TaskStatus::Bound,
                TaskStatus::Running,
            ];
            for job in ssn.state.jobs.values() {
                state
                    .allocated
                    .insert(job.uid.clone(), job.requested_in(&occupied));
                state.recompute(&job.uid);
            }
        }

        let shares = self.state.clone();
        ssn.add_job_order_fn(
            self.name(),
            Box::new(move |l, r| {
                let state = shares.borrow();
                let l_share = state.shares.get(&l.uid).copied().unwrap_or(0.0);
                let r_share = state.shares.get(&r.uid).copied().unwrap_or(0.0);
                l_share.partial_cmp(&r_share).unwrap_or(Ordering::Equal)
            }),
        );

        let preempt_state = self.state.clone();
        ssn.add_preemptable_fn(
            self.name(),
            Box::new(move |_state, preemptor, candidates| {
                let state = preempt_state.borrow();
                let preemptor_share =
                    state.shares.get(&preemptor.job).copied().unwrap_or(0.0);
                let mut victims = Vec::new();
                for candidate in candidates {
                    if candidate.job == preemptor.job {
                        continue;
                    }
                    let mut remaining = state
                        .allocated
                        .get(&candidate.job)
                        .cloned()
                        .unwrap_or_default();
                    remaining.sub(&candidate.resreq);
                    // Eviction must not invert dominance in the victim's
                    // favor.
                    if dominant_share(&remaining, &state.total) >= preemptor_share {
                        victims.push(candidate.uid.clone());
                    }
                }
                victims
            }),
        );

        let alloc_state = self.state.clone();
        let dealloc_state = self.state.clone();
        ssn.register_event_handler(EventHandler {
            on_allocate: Some(Box::new(move |event| {
                alloc_state.borrow_mut().on_allocate(&event.task);
            })),
            on_deallocate: Some(Box::new(move |event| {
                dealloc_state.borrow_mut().on_deallocate(&event.task);
            })),
        });
    }
}
