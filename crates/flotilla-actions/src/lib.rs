//! flotilla-actions — the stages of a scheduling cycle.
//!
//! An action is a stateless procedure over the session. The configured
//! list runs in order each cycle:
//!
//! - **allocate** — place pending tasks onto feasible nodes, gang-gated
//! - **preempt** — evict lower-priority work to pipeline stuck gangs
//! - **reclaim** — cross-queue eviction for queues under their share
//! - **backfill** — squeeze zero-request tasks into leftover capacity

pub mod allocate;
pub mod backfill;
pub mod preempt;
pub mod reclaim;
mod util;

use flotilla_framework::Session;

/// One stage of the scheduling cycle.
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, ssn: &mut Session);
}

/// Resolve an action by its configured name.
pub fn new_action(name: &str) -> Option<Box<dyn Action>> {
    match name {
        "allocate" => Some(Box::new(allocate::Allocate)),
        "preempt" => Some(Box::new(preempt::Preempt)),
        "reclaim" => Some(Box::new(reclaim::Reclaim)),
        "backfill" => Some(Box::new(backfill::Backfill)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_actions_resolve() {
        for name in ["allocate", "preempt", "reclaim", "backfill"] {
            let action = new_action(name).unwrap();
            assert_eq!(action.name(), name);
        }
        assert!(new_action("shuffle").is_none());
    }
}
