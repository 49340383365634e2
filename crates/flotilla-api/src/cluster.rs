//! Cluster snapshot — a coherent deep clone of the whole model.

use std::collections::HashMap;

use crate::job::JobInfo;
use crate::node::NodeInfo;
use crate::queue::QueueInfo;
use crate::resource::Resource;
use crate::{JobId, QueueId};

/// Point-in-time view handed to a scheduling session.
///
/// Everything inside is an independent deep copy; sessions mutate it
/// freely without touching the cache.
#[derive(Debug, Clone, Default)]
pub struct ClusterInfo {
    pub nodes: HashMap<String, NodeInfo>,
    pub jobs: HashMap<JobId, JobInfo>,
    pub queues: HashMap<QueueId, QueueInfo>,
}

impl ClusterInfo {
    /// Total allocatable resources across ready nodes.
    pub fn total_allocatable(&self) -> Resource {
        let mut total = Resource::empty();
        for node in self.nodes.values().filter(|n| n.ready()) {
            total.add(&node.allocatable);
        }
        total
    }
}
