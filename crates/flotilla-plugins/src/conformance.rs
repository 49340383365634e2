//! Conformance plugin — keep system-critical tasks off the victim list.

use flotilla_api::{TaskId, TaskInfo};
use flotilla_framework::{Plugin, PluginArgs, Session, SessionState};

const SYSTEM_NAMESPACE: &str = "flotilla-system";
const CRITICAL_CLASSES: [&str; 2] = ["system-critical", "system-node-critical"];

pub fn new(_args: &PluginArgs) -> Box<dyn Plugin> {
    Box::new(ConformancePlugin)
}

struct ConformancePlugin;

impl Plugin for ConformancePlugin {
    fn name(&self) -> &'static str {
        "conformance"
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        ssn.add_preemptable_fn(self.name(), Box::new(evictable_victims));
        ssn.add_reclaimable_fn(self.name(), Box::new(evictable_victims));
    }
}

fn evictable_victims(
    _state: &SessionState,
    _preemptor: &TaskInfo,
    candidates: &[TaskInfo],
) -> Vec<TaskId> {
    candidates
        .iter()
        .filter(|task| !is_critical(task))
        .map(|task| task.uid.clone())
        .collect()
}

fn is_critical(task: &TaskInfo) -> bool {
    task.namespace == SYSTEM_NAMESPACE
        || CRITICAL_CLASSES.contains(&task.pod.priority_class_name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_api::{PodPhase, PodRecord, Resource};
    use std::collections::BTreeMap;

    fn make_task(namespace: &str, class: &str) -> TaskInfo {
        let pod = PodRecord {
            uid: "t".to_string(),
            namespace: namespace.to_string(),
            name: "t".to_string(),
            node_name: String::new(),
            phase: PodPhase::Running,
            scheduler_name: String::new(),
            group_name: None,
            priority: 0,
            priority_class_name: class.to_string(),
            resources: Resource::empty(),
            node_selector: BTreeMap::new(),
            tolerations: Vec::new(),
            creation_ts: 0,
        };
        TaskInfo::new(format!("{namespace}/j"), pod)
    }

    #[test]
    fn system_namespace_is_protected() {
        assert!(is_critical(&make_task("flotilla-system", "")));
        assert!(!is_critical(&make_task("default", "")));
    }

    #[test]
    fn critical_classes_are_protected() {
        assert!(is_critical(&make_task("default", "system-critical")));
        assert!(is_critical(&make_task("default", "system-node-critical")));
        assert!(!is_critical(&make_task("default", "best-effort")));
    }
}
