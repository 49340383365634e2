//! Queue model — a weighted scheduling queue aggregating jobs.

use serde::{Deserialize, Serialize};

use crate::record::QueueRecord;
use crate::QueueId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub uid: QueueId,
    pub name: String,
    /// Relative weight for proportional share across queues.
    pub weight: i32,
    pub record: QueueRecord,
}

impl QueueInfo {
    pub fn new(record: QueueRecord) -> QueueInfo {
        QueueInfo {
            uid: record.name.clone(),
            name: record.name.clone(),
            weight: record.weight.max(1),
            record,
        }
    }
}
