//! Effector interfaces — the side-effecting collaborators.
//!
//! The cache never talks to the cluster store directly; binds, evictions,
//! status updates, volume operations and event recording go through these
//! injected traits. Bind and evict run as detached tasks outside the
//! cache lock, so they are async; the rest are called inline.

use async_trait::async_trait;

use flotilla_api::{GroupRecord, PodCondition, PodRecord, TaskInfo};

/// Issues bind requests to the cluster store.
#[async_trait]
pub trait Binder: Send + Sync {
    async fn bind(&self, pod: &PodRecord, hostname: &str) -> anyhow::Result<()>;
}

/// Issues delete/evict requests to the cluster store.
#[async_trait]
pub trait Evictor: Send + Sync {
    async fn evict(&self, pod: &PodRecord) -> anyhow::Result<()>;
}

/// Re-reads the source of truth for resync.
#[async_trait]
pub trait PodSource: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> anyhow::Result<Option<PodRecord>>;
}

/// Pushes status updates to the cluster store.
pub trait StatusUpdater: Send + Sync {
    fn update_pod_condition(&self, pod: &PodRecord, condition: &PodCondition)
        -> anyhow::Result<()>;

    fn update_group(&self, group: &GroupRecord) -> anyhow::Result<()>;
}

/// Volume assumption and binding.
pub trait VolumeBinder: Send + Sync {
    /// Assume volume placement; returns whether all volumes are already
    /// bound.
    fn assume_volumes(&self, task: &TaskInfo, hostname: &str) -> anyhow::Result<bool>;

    fn bind_volumes(&self, task: &TaskInfo) -> anyhow::Result<()>;
}

/// Reference to a cluster object for event recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn pod(pod: &PodRecord) -> ObjectRef {
        ObjectRef {
            kind: "Pod".to_string(),
            namespace: pod.namespace.clone(),
            name: pod.name.clone(),
        }
    }

    pub fn group(namespace: &str, name: &str) -> ObjectRef {
        ObjectRef {
            kind: "Group".to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Structured event sink keyed to a resource reference.
pub trait Recorder: Send + Sync {
    fn event(&self, object: &ObjectRef, kind: EventKind, reason: &str, message: &str);
}

/// Volume binder for workloads without volumes: everything is always
/// bound.
pub struct NullVolumeBinder;

impl VolumeBinder for NullVolumeBinder {
    fn assume_volumes(&self, _task: &TaskInfo, _hostname: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn bind_volumes(&self, _task: &TaskInfo) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Recorder that drops every event.
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn event(&self, _object: &ObjectRef, _kind: EventKind, _reason: &str, _message: &str) {}
}
