//! Test support: recording effector implementations.
//!
//! Used by this crate's unit tests and the scheduler crate's scenario
//! tests; not part of the production surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use flotilla_api::{GroupRecord, PodCondition, PodRecord};

use crate::cache::Effectors;
use crate::effectors::{
    Binder, Evictor, NullVolumeBinder, PodSource, Recorder, StatusUpdater,
};
use crate::effectors::{EventKind, ObjectRef};

/// Binder that records (pod key, hostname) pairs.
#[derive(Default)]
pub struct RecordingBinder {
    pub calls: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Binder for RecordingBinder {
    async fn bind(&self, pod: &PodRecord, hostname: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::Relaxed) {
            anyhow::bail!("bind refused");
        }
        self.calls
            .lock()
            .unwrap()
            .push((pod.key(), hostname.to_string()));
        Ok(())
    }
}

/// Evictor that records pod keys.
#[derive(Default)]
pub struct RecordingEvictor {
    pub calls: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Evictor for RecordingEvictor {
    async fn evict(&self, pod: &PodRecord) -> anyhow::Result<()> {
        if self.fail.load(Ordering::Relaxed) {
            anyhow::bail!("evict refused");
        }
        self.calls.lock().unwrap().push(pod.key());
        Ok(())
    }
}

/// Status updater that records conditions and group updates.
#[derive(Default)]
pub struct RecordingStatusUpdater {
    pub pod_conditions: Mutex<Vec<(String, PodCondition)>>,
    pub group_updates: Mutex<Vec<GroupRecord>>,
}

impl StatusUpdater for RecordingStatusUpdater {
    fn update_pod_condition(
        &self,
        pod: &PodRecord,
        condition: &PodCondition,
    ) -> anyhow::Result<()> {
        self.pod_conditions
            .lock()
            .unwrap()
            .push((pod.key(), condition.clone()));
        Ok(())
    }

    fn update_group(&self, group: &GroupRecord) -> anyhow::Result<()> {
        self.group_updates.lock().unwrap().push(group.clone());
        Ok(())
    }
}

/// Recorder that keeps (reason, message) per object key.
#[derive(Default)]
pub struct RecordingRecorder {
    pub events: Mutex<Vec<(String, String, String)>>,
}

impl Recorder for RecordingRecorder {
    fn event(&self, object: &ObjectRef, _kind: EventKind, reason: &str, message: &str) {
        self.events.lock().unwrap().push((
            format!("{}/{}", object.namespace, object.name),
            reason.to_string(),
            message.to_string(),
        ));
    }
}

/// Pod source backed by a mutable map, keyed `namespace/name`.
#[derive(Default)]
pub struct StaticPodSource {
    pub pods: Mutex<HashMap<String, PodRecord>>,
}

impl StaticPodSource {
    pub fn put(&self, pod: PodRecord) {
        self.pods.lock().unwrap().insert(pod.key(), pod);
    }
}

#[async_trait]
impl PodSource for StaticPodSource {
    async fn get_pod(&self, namespace: &str, name: &str) -> anyhow::Result<Option<PodRecord>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned())
    }
}

/// Handles to the recording effectors wired into an [`Effectors`] bundle.
pub struct RecordingEffectors {
    pub binder: Arc<RecordingBinder>,
    pub evictor: Arc<RecordingEvictor>,
    pub status_updater: Arc<RecordingStatusUpdater>,
    pub recorder: Arc<RecordingRecorder>,
    pub pod_source: Arc<StaticPodSource>,
}

/// Build an effector bundle that records every call, plus the handles to
/// inspect them.
pub fn recording_effectors() -> (Effectors, RecordingEffectors) {
    let binder = Arc::new(RecordingBinder::default());
    let evictor = Arc::new(RecordingEvictor::default());
    let status_updater = Arc::new(RecordingStatusUpdater::default());
    let recorder = Arc::new(RecordingRecorder::default());
    let pod_source = Arc::new(StaticPodSource::default());

    let effectors = Effectors {
        binder: binder.clone(),
        evictor: evictor.clone(),
        status_updater: status_updater.clone(),
        volume_binder: Arc::new(NullVolumeBinder),
        recorder: recorder.clone(),
        pod_source: pod_source.clone(),
    };

    (
        effectors,
        RecordingEffectors {
            binder,
            evictor,
            status_updater,
            recorder,
            pod_source,
        },
    )
}
