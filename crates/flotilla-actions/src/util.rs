//! Shared selection helpers for actions.

use flotilla_api::{JobId, TaskId, TaskInfo, TaskStatus};
use flotilla_framework::Session;

/// Pending task UIDs of a job, in task order.
pub(crate) fn pending_tasks_sorted(ssn: &Session, job_id: &JobId) -> Vec<TaskId> {
    let Some(job) = ssn.state.jobs.get(job_id) else {
        return Vec::new();
    };
    let mut tasks: Vec<&TaskInfo> = job.tasks_in(TaskStatus::Pending).collect();
    tasks.sort_by(|l, r| ssn.task_order(l, r));
    tasks.into_iter().map(|t| t.uid.clone()).collect()
}

/// Nodes passing every predicate for the task, best score first.
/// Ties break on node name for determinism.
pub(crate) fn feasible_nodes_by_score(ssn: &Session, task: &TaskInfo) -> Vec<String> {
    let mut scored: Vec<(String, f64)> = ssn
        .state
        .nodes
        .values()
        .filter(|node| ssn.predicates(task, node).is_ok())
        .map(|node| (node.name.clone(), ssn.node_order(task, node)))
        .collect();
    scored.sort_by(|(l_name, l_score), (r_name, r_score)| {
        r_score
            .partial_cmp(l_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| l_name.cmp(r_name))
    });
    scored.into_iter().map(|(name, _)| name).collect()
}

/// The best node the task could occupy now or after planned evictions.
/// Among feasible nodes, immediate-fit nodes win over future-fit nodes;
/// within each class the node order score decides.
pub(crate) fn select_best_node(ssn: &Session, task: &TaskInfo) -> Option<String> {
    let ranked = feasible_nodes_by_score(ssn, task);
    let mut future_fit: Option<String> = None;
    for name in ranked {
        let node = &ssn.state.nodes[&name];
        if task.resreq.less_equal(&node.idle) {
            return Some(name);
        }
        if future_fit.is_none() && task.resreq.less_equal(&node.future_idle()) {
            future_fit = Some(name);
        }
    }
    future_fit
}
