//! Proportion plugin — weighted queue shares.
//!
//! Each queue deserves `total × weight / Σweights` of the cluster.
//! Queues order by how much of their deserved share is already
//! allocated, and cross-queue reclaim may only take from queues running
//! over their deserved share.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use flotilla_api::{JobId, QueueId, Resource, TaskInfo, TaskStatus};
use flotilla_framework::{EventHandler, Plugin, PluginArgs, Session};

pub fn new(_args: &PluginArgs) -> Box<dyn Plugin> {
    Box::new(ProportionPlugin {
        state: Rc::new(RefCell::new(ProportionState::default())),
    })
}

#[derive(Default)]
struct ProportionState {
    deserved: HashMap<QueueId, Resource>,
    allocated: HashMap<QueueId, Resource>,
    job_to_queue: HashMap<JobId, QueueId>,
}

impl ProportionState {
    fn queue_of(&self, task: &TaskInfo) -> Option<&QueueId> {
        self.job_to_queue.get(&task.job)
    }

    /// How far into its deserved share a queue is (1.0 = fully used).
    fn share(&self, queue: &QueueId) -> f64 {
        let allocated = match self.allocated.get(queue) {
            Some(r) => r,
            None => return 0.0,
        };
        let deserved = match self.deserved.get(queue) {
            Some(r) => r,
            None => return 0.0,
        };
        let mut share: f64 = 0.0;
        if deserved.milli_cpu > 0 {
            share = share.max(allocated.milli_cpu as f64 / deserved.milli_cpu as f64);
        }
        if deserved.memory > 0 {
            share = share.max(allocated.memory as f64 / deserved.memory as f64);
        }
        share
    }

    /// Whether the queue is allocated beyond its deserved share.
    fn overused(&self, queue: &QueueId) -> bool {
        let (Some(allocated), Some(deserved)) =
            (self.allocated.get(queue), self.deserved.get(queue))
        else {
            return false;
        };
        !allocated.less_equal(deserved)
    }
}

struct ProportionPlugin {
    state: Rc<RefCell<ProportionState>>,
}

impl Plugin for ProportionPlugin {
    fn name(&self) -> &'static str {
        "proportion"
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        {
            let mut state = self.state.borrow_mut();

            let mut total = Resource::empty();
            for node in ssn.state.nodes.values().filter(|n| n.ready()) {
                total.add(&node.allocatable);
            }
            let total_weight: i32 = ssn.state.queues.values().map(|q| q.weight).sum();

            for queue in ssn.state.queues.values() {
                let fraction = if total_weight > 0 {
                    queue.weight as f64 / total_weight as f64
                } else {
                    0.0
                };
                state
                    .deserved
                    .insert(queue.uid.clone(), total.scaled(fraction));
                state.allocated.insert(queue.uid.clone(), Resource::empty());
            }

            let occupied = [
                TaskStatus::Allocated,
                TaskStatus::Binding,
                TaskStatus::Bound,
                TaskStatus::Running,
            ];
            for job in ssn.state.jobs.values() {
                state.job_to_queue.insert(job.uid.clone(), job.queue.clone());
                let requested = job.requested_in(&occupied);
                state
                    .allocated
                    .entry(job.queue.clone())
                    .or_default()
                    .add(&requested);
            }
        }

        let order_state = self.state.clone();
        ssn.add_queue_order_fn(
            self.name(),
            Box::new(move |l, r| {
                let state = order_state.borrow();
                let l_share = state.share(&l.uid);
                let r_share = state.share(&r.uid);
                l_share.partial_cmp(&r_share).unwrap_or(Ordering::Equal)
            }),
        );

        let reclaim_state = self.state.clone();
        ssn.add_reclaimable_fn(
            self.name(),
            Box::new(move |_state, _reclaimer, candidates| {
                let state = reclaim_state.borrow();
                candidates
                    .iter()
                    .filter(|candidate| {
                        state
                            .queue_of(candidate)
                            .map(|queue| state.overused(queue))
                            .unwrap_or(false)
                    })
                    .map(|candidate| candidate.uid.clone())
                    .collect()
            }),
        );

        let alloc_state = self.state.clone();
        let dealloc_state = self.state.clone();
        ssn.register_event_handler(EventHandler {
            on_allocate: Some(Box::new(move |event| {
                let mut state = alloc_state.borrow_mut();
                if let Some(queue) = state.queue_of(&event.task).cloned() {
                    state.allocated.entry(queue).or_default().add(&event.task.resreq);
                }
            })),
            on_deallocate: Some(Box::new(move |event| {
                let mut state = dealloc_state.borrow_mut();
                if let Some(queue) = state.queue_of(&event.task).cloned() {
                    state.allocated.entry(queue).or_default().sub(&event.task.resreq);
                }
            })),
        });
    }
}
