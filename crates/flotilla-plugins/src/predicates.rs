//! Predicates plugin — node feasibility filtering.
//!
//! A node is feasible for a task when it is ready, could ever fit the
//! task's request, satisfies the task's node selector and carries no
//! untolerated hard taint. Idle-versus-future fit is the action's call;
//! predicates only reject nodes that can never host the task.

use flotilla_framework::{Plugin, PluginArgs, PredicateFailure, Session};

use flotilla_api::TaintEffect;

pub fn new(_args: &PluginArgs) -> Box<dyn Plugin> {
    Box::new(PredicatesPlugin)
}

struct PredicatesPlugin;

impl Plugin for PredicatesPlugin {
    fn name(&self) -> &'static str {
        "predicates"
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        ssn.add_predicate_fn(
            self.name(),
            Box::new(|task, node| {
                if !node.ready() {
                    return Err(PredicateFailure {
                        reason: format!("node {} not ready: {}", node.name, node.state.reason),
                    });
                }

                if !task.resreq.less_equal(&node.allocatable) {
                    return Err(PredicateFailure {
                        reason: format!(
                            "node {} allocatable {} cannot fit request {}",
                            node.name, node.allocatable, task.resreq
                        ),
                    });
                }

                let Some(record) = &node.record else {
                    return Err(PredicateFailure {
                        reason: format!("node {} has no record", node.name),
                    });
                };

                for (key, value) in &task.pod.node_selector {
                    if record.labels.get(key) != Some(value) {
                        return Err(PredicateFailure {
                            reason: format!(
                                "node {} does not match selector {key}={value}",
                                node.name
                            ),
                        });
                    }
                }

                for taint in &record.taints {
                    if taint.effect == TaintEffect::PreferNoSchedule {
                        continue;
                    }
                    if !task.pod.tolerations.iter().any(|t| t.tolerates(taint)) {
                        return Err(PredicateFailure {
                            reason: format!(
                                "node {} taint {}={} not tolerated",
                                node.name, taint.key, taint.value
                            ),
                        });
                    }
                }

                Ok(())
            }),
        );
    }
}
