//! Nodeorder plugin — score nodes for a task.
//!
//! Two weighted components, both in 0..=100:
//!
//! - **least-requested**: prefer nodes with the most free capacity after
//!   placement, spreading load
//! - **balanced-usage**: prefer nodes where cpu and memory utilization
//!   stay close to each other, avoiding one-dimensional hotspots

use flotilla_api::{NodeInfo, TaskInfo};
use flotilla_framework::{Plugin, PluginArgs, Session};

pub fn new(args: &PluginArgs) -> Box<dyn Plugin> {
    let least_requested_weight = args
        .get("least_requested.weight")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1.0);
    let balanced_weight = args
        .get("balanced_usage.weight")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1.0);

    Box::new(NodeOrderPlugin {
        least_requested_weight,
        balanced_weight,
    })
}

struct NodeOrderPlugin {
    least_requested_weight: f64,
    balanced_weight: f64,
}

impl Plugin for NodeOrderPlugin {
    fn name(&self) -> &'static str {
        "nodeorder"
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        let lr_weight = self.least_requested_weight;
        let b_weight = self.balanced_weight;
        ssn.add_node_order_fn(
            self.name(),
            Box::new(move |task, node| {
                lr_weight * least_requested_score(task, node)
                    + b_weight * balanced_usage_score(task, node)
            }),
        );
    }
}

fn fraction(used: i64, request: i64, allocatable: i64) -> f64 {
    if allocatable <= 0 {
        return 1.0;
    }
    ((used + request) as f64 / allocatable as f64).clamp(0.0, 1.0)
}

/// Average free fraction across cpu and memory after placing the task.
fn least_requested_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let cpu = 1.0
        - fraction(
            node.used.milli_cpu,
            task.resreq.milli_cpu,
            node.allocatable.milli_cpu,
        );
    let mem = 1.0 - fraction(node.used.memory, task.resreq.memory, node.allocatable.memory);
    (cpu + mem) / 2.0 * 100.0
}

/// 100 minus the cpu/memory utilization skew after placement.
fn balanced_usage_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let cpu = fraction(node.used.milli_cpu, task.resreq.milli_cpu, node.allocatable.milli_cpu);
    let mem = fraction(node.used.memory, task.resreq.memory, node.allocatable.memory);
    (1.0 - (cpu - mem).abs()) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_api::{NodeRecord, PodPhase, PodRecord, Resource, TaskStatus};
    use std::collections::BTreeMap;

    fn make_node(name: &str, cpu: i64, mem: i64, used_cpu: i64, used_mem: i64) -> NodeInfo {
        let mut node = NodeInfo::new(Some(NodeRecord {
            name: name.to_string(),
            labels: BTreeMap::new(),
            taints: Vec::new(),
            allocatable: Resource::new(cpu, mem),
            capacity: Resource::new(cpu, mem),
        }));
        node.used = Resource::new(used_cpu, used_mem);
        let mut idle = node.allocatable.clone();
        idle.sub(&node.used);
        node.idle = idle;
        node
    }

    fn make_task(cpu: i64, mem: i64) -> TaskInfo {
        let pod = PodRecord {
            uid: "t".to_string(),
            namespace: "default".to_string(),
            name: "t".to_string(),
            node_name: String::new(),
            phase: PodPhase::Pending,
            scheduler_name: String::new(),
            group_name: None,
            priority: 0,
            priority_class_name: String::new(),
            resources: Resource::new(cpu, mem),
            node_selector: BTreeMap::new(),
            tolerations: Vec::new(),
            creation_ts: 0,
        };
        let mut task = TaskInfo::new("default/j".to_string(), pod);
        task.status = TaskStatus::Pending;
        task
    }

    #[test]
    fn emptier_node_scores_higher() {
        let task = make_task(1000, 1 << 30);
        let empty = make_node("n1", 8000, 8 << 30, 0, 0);
        let busy = make_node("n2", 8000, 8 << 30, 6000, 6 << 30);

        assert!(
            least_requested_score(&task, &empty) > least_requested_score(&task, &busy),
            "least-requested should prefer the emptier node"
        );
    }

    #[test]
    fn balanced_usage_penalizes_skew() {
        let task = make_task(0, 0);
        let balanced = make_node("n1", 8000, 8 << 30, 4000, 4 << 30);
        let skewed = make_node("n2", 8000, 8 << 30, 7000, 1 << 30);

        assert!(balanced_usage_score(&task, &balanced) > balanced_usage_score(&task, &skewed));
    }

    #[test]
    fn zero_allocatable_does_not_divide_by_zero() {
        let task = make_task(100, 100);
        let node = make_node("n1", 0, 0, 0, 0);
        let score = least_requested_score(&task, &node);
        assert!(score.is_finite());
    }
}
