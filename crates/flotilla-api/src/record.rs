//! Cluster object records — the payloads delivered by the event source.
//!
//! These mirror what the external cluster store holds for pods, nodes,
//! queues, priority classes and disruption budgets. They are plain data:
//! the scheduler derives its working entities (`TaskInfo`, `NodeInfo`, …)
//! from them and never mutates a record in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// Lifecycle phase reported for a pod by the cluster store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// A pod as seen by the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRecord {
    /// Cluster-wide unique identifier.
    pub uid: String,
    pub namespace: String,
    pub name: String,
    /// Node the pod is bound to; empty while unscheduled.
    #[serde(default)]
    pub node_name: String,
    pub phase: PodPhase,
    /// Scheduler responsible for this pod.
    #[serde(default)]
    pub scheduler_name: String,
    /// Gang membership annotation; pods without one get a shadow group.
    #[serde(default)]
    pub group_name: Option<String>,
    /// Resolved pod priority.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub priority_class_name: String,
    /// Summed resource requests across containers.
    pub resources: Resource,
    /// Hard node label constraints.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    /// Unix timestamp (seconds) when the pod was created.
    #[serde(default)]
    pub creation_ts: u64,
}

impl PodRecord {
    /// The `namespace/name` key used in events and logs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A node as seen by the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// Resources available for scheduling.
    pub allocatable: Resource,
    /// Total machine capacity.
    pub capacity: Resource,
}

/// Taint effects, mirroring the cluster store's scheduling semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TolerationOperator {
    Exists,
    Equal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toleration {
    pub key: String,
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    /// `None` tolerates every effect.
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    /// Whether this toleration covers the given taint.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        match self.operator {
            TolerationOperator::Exists => self.key.is_empty() || self.key == taint.key,
            TolerationOperator::Equal => self.key == taint.key && self.value == taint.value,
        }
    }
}

/// A scheduling queue as seen by the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub name: String,
    /// Relative weight for proportional share.
    pub weight: i32,
}

/// A priority class as seen by the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityClassRecord {
    pub name: String,
    pub value: i32,
    /// Whether this class supplies the cluster default priority.
    #[serde(default)]
    pub global_default: bool,
}

/// A disruption budget attached to a gang.
///
/// When present without an explicit group record, the budget's
/// `min_available` supplies the gang threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisruptionBudget {
    pub namespace: String,
    pub name: String,
    /// Gang the budget applies to.
    pub group_name: String,
    pub min_available: i32,
}

/// A pod status condition pushed through the status updater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodCondition {
    /// Condition type, e.g. `PodScheduled`.
    pub kind: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
}
