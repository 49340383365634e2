//! The committed-effect interface between sessions and the cache.

use flotilla_api::{ClusterInfo, JobInfo, TaskInfo};

/// Operations a session performs against the authoritative cache.
///
/// Tentative work stays inside the session; only statement commits and
/// session-close status publication cross this boundary. The cache crate
/// provides the real implementation; tests use
/// [`crate::testing::FakeCache`].
pub trait SchedulerCache: Send + Sync {
    /// Build a coherent point-in-time clone of the cluster model.
    fn snapshot(&self) -> ClusterInfo;

    /// Assume volume placement for a task on a host. Returns whether all
    /// volumes are already bound.
    fn assume_volumes(&self, task: &TaskInfo, hostname: &str) -> anyhow::Result<bool>;

    /// Bind previously assumed volumes.
    fn bind_volumes(&self, task: &TaskInfo) -> anyhow::Result<()>;

    /// Bind a task to a host in the cluster store.
    fn bind(&self, task: &TaskInfo, hostname: &str) -> anyhow::Result<()>;

    /// Evict a task from its node.
    fn evict(&self, task: &TaskInfo, reason: &str) -> anyhow::Result<()>;

    /// Publish the job's group status and unschedulable conditions.
    fn update_job_status(&self, job: &JobInfo) -> anyhow::Result<()>;
}
