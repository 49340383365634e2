//! flotilla-cache — the authoritative in-memory cluster mirror.
//!
//! The cache consumes add/update/delete events from the external event
//! source, keeps jobs/nodes/queues coherent under one process-wide lock,
//! serves deep-cloned [`flotilla_api::ClusterInfo`] snapshots to the
//! scheduling loop and performs the committed side-effects (bind, evict,
//! status updates) through injected effectors.
//!
//! External operations that fail feed a rate-limited resync queue whose
//! worker re-reads the source of truth; jobs observed terminated go
//! through a cleanup queue that re-checks under the lock.

pub mod cache;
pub mod effectors;
pub mod error;
pub mod events;
pub mod resync;
pub mod testing;

pub use cache::{Cache, Effectors};
pub use effectors::{
    Binder, EventKind, Evictor, ObjectRef, PodSource, Recorder, StatusUpdater, VolumeBinder,
};
pub use error::{CacheError, CacheResult};
pub use events::ClusterEvent;
pub use resync::RetryQueue;
