//! Gang group records and the versioned schema conversion layer.
//!
//! The cluster store carries two group schema versions. Both convert into
//! the internal [`GroupInfo`] at the cache boundary; status updates
//! convert back out in the record's original version.

use serde::{Deserialize, Serialize};

/// Schema version a group record arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupVersion {
    V1,
    V2,
}

/// A group record as delivered by the event source — a tagged variant
/// over the supported schema versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "snake_case")]
pub enum GroupRecord {
    V1(GroupRecordV1),
    V2(GroupRecordV2),
}

/// First-generation schema: no queue field, jobs land in the default queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecordV1 {
    pub namespace: String,
    pub name: String,
    pub min_members: i32,
    #[serde(default)]
    pub priority_class: String,
}

/// Second-generation schema with an explicit queue assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecordV2 {
    pub namespace: String,
    pub name: String,
    pub min_members: i32,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub priority_class: String,
}

/// Aggregate scheduling phase of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPhase {
    Pending,
    Running,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupConditionKind {
    Unschedulable,
}

/// A condition published onto a group, e.g. why a gang could not schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCondition {
    pub kind: GroupConditionKind,
    /// Session that produced the transition.
    pub transition_id: String,
    pub reason: String,
    pub message: String,
}

/// Internal representation of a gang group.
///
/// `shadow` marks groups synthesized by the cache for pods that carry no
/// group annotation; shadow groups are never written back to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub namespace: String,
    pub name: String,
    pub version: GroupVersion,
    pub queue: String,
    pub min_members: i32,
    pub priority_class: String,
    pub phase: GroupPhase,
    #[serde(default)]
    pub conditions: Vec<GroupCondition>,
    #[serde(default)]
    pub shadow: bool,
}

impl GroupInfo {
    /// Convert an external record into the internal form. V1 records have
    /// no queue of their own and fall back to `default_queue`.
    pub fn from_record(record: &GroupRecord, default_queue: &str) -> GroupInfo {
        match record {
            GroupRecord::V1(v1) => GroupInfo {
                namespace: v1.namespace.clone(),
                name: v1.name.clone(),
                version: GroupVersion::V1,
                queue: default_queue.to_string(),
                min_members: v1.min_members,
                priority_class: v1.priority_class.clone(),
                phase: GroupPhase::Pending,
                conditions: Vec::new(),
                shadow: false,
            },
            GroupRecord::V2(v2) => GroupInfo {
                namespace: v2.namespace.clone(),
                name: v2.name.clone(),
                version: GroupVersion::V2,
                queue: if v2.queue.is_empty() {
                    default_queue.to_string()
                } else {
                    v2.queue.clone()
                },
                min_members: v2.min_members,
                priority_class: v2.priority_class.clone(),
                phase: GroupPhase::Pending,
                conditions: Vec::new(),
                shadow: false,
            },
        }
    }

    /// Synthesize a shadow group for an ungrouped pod.
    pub fn shadow(namespace: &str, name: &str, default_queue: &str) -> GroupInfo {
        GroupInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            version: GroupVersion::V2,
            queue: default_queue.to_string(),
            min_members: 1,
            priority_class: String::new(),
            phase: GroupPhase::Pending,
            conditions: Vec::new(),
            shadow: true,
        }
    }

    /// Convert back to a record in the group's original schema version,
    /// for the status updater.
    pub fn to_record(&self) -> GroupRecord {
        match self.version {
            GroupVersion::V1 => GroupRecord::V1(GroupRecordV1 {
                namespace: self.namespace.clone(),
                name: self.name.clone(),
                min_members: self.min_members,
                priority_class: self.priority_class.clone(),
            }),
            GroupVersion::V2 => GroupRecord::V2(GroupRecordV2 {
                namespace: self.namespace.clone(),
                name: self.name.clone(),
                min_members: self.min_members,
                queue: self.queue.clone(),
                priority_class: self.priority_class.clone(),
            }),
        }
    }

    /// The job arena key for this group.
    pub fn job_id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_lands_in_default_queue() {
        let record = GroupRecord::V1(GroupRecordV1 {
            namespace: "default".to_string(),
            name: "train".to_string(),
            min_members: 3,
            priority_class: "high".to_string(),
        });

        let info = GroupInfo::from_record(&record, "default-queue");
        assert_eq!(info.queue, "default-queue");
        assert_eq!(info.min_members, 3);
        assert_eq!(info.version, GroupVersion::V1);
        assert!(!info.shadow);
    }

    #[test]
    fn v2_keeps_explicit_queue() {
        let record = GroupRecord::V2(GroupRecordV2 {
            namespace: "default".to_string(),
            name: "train".to_string(),
            min_members: 2,
            queue: "research".to_string(),
            priority_class: String::new(),
        });

        let info = GroupInfo::from_record(&record, "default-queue");
        assert_eq!(info.queue, "research");
        assert_eq!(info.version, GroupVersion::V2);
    }

    #[test]
    fn v2_empty_queue_falls_back() {
        let record = GroupRecord::V2(GroupRecordV2 {
            namespace: "default".to_string(),
            name: "train".to_string(),
            min_members: 2,
            queue: String::new(),
            priority_class: String::new(),
        });

        let info = GroupInfo::from_record(&record, "default-queue");
        assert_eq!(info.queue, "default-queue");
    }

    #[test]
    fn round_trips_in_original_version() {
        let record = GroupRecord::V1(GroupRecordV1 {
            namespace: "ns".to_string(),
            name: "g".to_string(),
            min_members: 5,
            priority_class: "p".to_string(),
        });
        let info = GroupInfo::from_record(&record, "q");
        assert_eq!(info.to_record(), record);

        let record = GroupRecord::V2(GroupRecordV2 {
            namespace: "ns".to_string(),
            name: "g".to_string(),
            min_members: 5,
            queue: "research".to_string(),
            priority_class: String::new(),
        });
        let info = GroupInfo::from_record(&record, "q");
        assert_eq!(info.to_record(), record);
    }

    #[test]
    fn shadow_group_defaults() {
        let info = GroupInfo::shadow("default", "lone-pod", "default-queue");
        assert!(info.shadow);
        assert_eq!(info.min_members, 1);
        assert_eq!(info.job_id(), "default/lone-pod");
    }

    #[test]
    fn record_json_carries_version_tag() {
        let record = GroupRecord::V2(GroupRecordV2 {
            namespace: "ns".to_string(),
            name: "g".to_string(),
            min_members: 2,
            queue: "research".to_string(),
            priority_class: String::new(),
        });

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"version\":\"v2\""));

        let back: GroupRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
