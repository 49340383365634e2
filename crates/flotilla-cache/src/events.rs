//! Cluster events — the payloads delivered by the watch layer.
//!
//! Deletes carry the last-known record; it may be stale (the watch layer
//! forwards tombstones), so delete handling is keyed and idempotent.

use flotilla_api::{
    DisruptionBudget, GroupRecord, NodeRecord, PodRecord, PriorityClassRecord, QueueRecord,
};

/// An add/update/delete notification for one watched resource kind.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    PodAdded(PodRecord),
    PodUpdated(PodRecord),
    PodDeleted(PodRecord),

    NodeAdded(NodeRecord),
    NodeUpdated(NodeRecord),
    NodeDeleted(String),

    GroupAdded(GroupRecord),
    GroupUpdated(GroupRecord),
    GroupDeleted(GroupRecord),

    QueueAdded(QueueRecord),
    QueueUpdated(QueueRecord),
    QueueDeleted(String),

    PriorityClassAdded(PriorityClassRecord),
    PriorityClassDeleted(String),

    BudgetAdded(DisruptionBudget),
    BudgetUpdated(DisruptionBudget),
    BudgetDeleted(DisruptionBudget),
}
