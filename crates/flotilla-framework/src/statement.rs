//! Statement — a journaled batch of tentative mutations with
//! commit/discard two-phase semantics.
//!
//! Operations mutate the session arenas immediately (so later decisions
//! in the same cycle see their effect) and append a journal record.
//! `commit` replays the journal against the cache in insertion order;
//! `discard` walks it in reverse applying each operation's inverse,
//! restoring every touched task status and node resource vector.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, warn};

use flotilla_api::{JobId, TaskId, TaskInfo, TaskStatus};

use crate::error::{FrameworkError, FrameworkResult};
use crate::session::Session;

#[derive(Debug, Clone)]
enum Operation {
    Allocate {
        job: JobId,
        task: TaskId,
        hostname: String,
        prev_node: String,
    },
    Pipeline {
        job: JobId,
        task: TaskId,
        hostname: String,
        prev_node: String,
    },
    Evict {
        job: JobId,
        task: TaskId,
        reason: String,
    },
}

/// A journal of tentative operations within one session.
#[derive(Default)]
pub struct Statement {
    operations: Vec<Operation>,
}

impl Statement {
    pub fn new() -> Statement {
        Statement::default()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Tentatively allocate a task onto a host.
    ///
    /// Preconditions: the task fits the node's idle resources (checked by
    /// the node) and volume assumption succeeds. On error the session is
    /// left exactly as before.
    pub fn allocate(
        &mut self,
        ssn: &mut Session,
        job_id: &JobId,
        task_id: &TaskId,
        hostname: &str,
    ) -> FrameworkResult<()> {
        let current = lookup_task(ssn, job_id, task_id)?;

        let volume_ready = ssn
            .cache()
            .assume_volumes(&current, hostname)
            .map_err(FrameworkError::Effector)?;

        let prev_node = current.node_name.clone();
        let job = ssn
            .state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| FrameworkError::JobNotFound(job_id.clone()))?;
        job.set_task_volume_ready(task_id, volume_ready);
        job.set_task_node(task_id, hostname);
        let task = match job.update_task_status(task_id, TaskStatus::Allocated) {
            Ok(task) => task,
            Err(err) => {
                job.set_task_node(task_id, &prev_node);
                return Err(err.into());
            }
        };

        let Some(node) = ssn.state.nodes.get_mut(hostname) else {
            rollback_placement(ssn, job_id, task_id, &prev_node);
            return Err(FrameworkError::NodeNotFound(hostname.to_string()));
        };
        if let Err(err) = node.add_task(&task) {
            rollback_placement(ssn, job_id, task_id, &prev_node);
            return Err(err.into());
        }

        let node = &ssn.state.nodes[hostname];
        debug!(
            task = %task.key(),
            node = %hostname,
            idle = %node.idle,
            used = %node.used,
            "task allocated"
        );

        ssn.fire_allocate(&task);
        self.operations.push(Operation::Allocate {
            job: job_id.clone(),
            task: task_id.clone(),
            hostname: hostname.to_string(),
            prev_node,
        });

        Ok(())
    }

    /// Tentatively pipeline a task onto a host that will free up after
    /// planned evictions. Consumes pipelined accounting only.
    pub fn pipeline(
        &mut self,
        ssn: &mut Session,
        job_id: &JobId,
        task_id: &TaskId,
        hostname: &str,
    ) -> FrameworkResult<()> {
        let current = lookup_task(ssn, job_id, task_id)?;
        let prev_node = current.node_name.clone();

        let job = ssn
            .state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| FrameworkError::JobNotFound(job_id.clone()))?;
        job.set_task_node(task_id, hostname);
        let task = match job.update_task_status(task_id, TaskStatus::Pipelined) {
            Ok(task) => task,
            Err(err) => {
                job.set_task_node(task_id, &prev_node);
                return Err(err.into());
            }
        };

        let Some(node) = ssn.state.nodes.get_mut(hostname) else {
            rollback_placement(ssn, job_id, task_id, &prev_node);
            return Err(FrameworkError::NodeNotFound(hostname.to_string()));
        };
        if let Err(err) = node.add_task(&task) {
            rollback_placement(ssn, job_id, task_id, &prev_node);
            return Err(err.into());
        }

        let node = &ssn.state.nodes[hostname];
        debug!(
            task = %task.key(),
            node = %hostname,
            pipelined = %node.pipelined,
            "task pipelined"
        );

        ssn.fire_allocate(&task);
        self.operations.push(Operation::Pipeline {
            job: job_id.clone(),
            task: task_id.clone(),
            hostname: hostname.to_string(),
            prev_node,
        });

        Ok(())
    }

    /// Tentatively evict a task: status moves to Releasing and its node
    /// resources shift into releasing accounting.
    pub fn evict(
        &mut self,
        ssn: &mut Session,
        job_id: &JobId,
        task_id: &TaskId,
        reason: &str,
    ) -> FrameworkResult<()> {
        let job = ssn
            .state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| FrameworkError::JobNotFound(job_id.clone()))?;
        let task = job.update_task_status(task_id, TaskStatus::Releasing)?;

        if let Some(node) = ssn.state.nodes.get_mut(&task.node_name) {
            if let Err(err) = node.update_task(&task) {
                if let Some(job) = ssn.state.jobs.get_mut(job_id) {
                    let _ = job.update_task_status(task_id, TaskStatus::Running);
                }
                return Err(err.into());
            }
        }

        debug!(task = %task.key(), node = %task.node_name, reason, "task marked releasing");

        ssn.fire_deallocate(&task);
        self.operations.push(Operation::Evict {
            job: job_id.clone(),
            task: task_id.clone(),
            reason: reason.to_string(),
        });

        Ok(())
    }

    /// Replay the journal against the cache in insertion order.
    ///
    /// Individual failures are logged; each failing operation reverts its
    /// own session-local effect, so the session stays consistent.
    pub fn commit(self, ssn: &mut Session) {
        debug!(operations = self.operations.len(), "committing statement");
        for operation in &self.operations {
            match operation {
                Operation::Allocate {
                    job,
                    task,
                    hostname,
                    ..
                } => {
                    if let Err(err) = commit_allocate(ssn, job, task, hostname) {
                        error!(%job, %task, %err, "commit allocate failed");
                    }
                }
                Operation::Evict { job, task, reason } => {
                    if let Err(err) = commit_evict(ssn, job, task, reason) {
                        error!(%job, %task, %err, "commit evict failed");
                    }
                }
                // Pipelined allocations are speculative future work; they
                // influence later actions but bind nothing now.
                Operation::Pipeline { .. } => {
                    ssn.stats.pipelines += 1;
                }
            }
        }
    }

    /// Undo the journal in reverse insertion order, restoring every
    /// touched node vector and task status to pre-statement values.
    pub fn discard(self, ssn: &mut Session) {
        debug!(operations = self.operations.len(), "discarding statement");
        for operation in self.operations.iter().rev() {
            match operation {
                Operation::Allocate {
                    job,
                    task,
                    hostname,
                    prev_node,
                } => {
                    if let Err(err) = unplace(ssn, job, task, hostname, prev_node) {
                        error!(%job, %task, %err, "discard unallocate failed");
                    }
                }
                Operation::Pipeline {
                    job,
                    task,
                    hostname,
                    prev_node,
                } => {
                    if let Err(err) = unplace(ssn, job, task, hostname, prev_node) {
                        error!(%job, %task, %err, "discard unpipeline failed");
                    }
                }
                Operation::Evict { job, task, .. } => {
                    if let Err(err) = unevict(ssn, job, task) {
                        error!(%job, %task, %err, "discard unevict failed");
                    }
                }
            }
        }
    }
}

fn lookup_task(ssn: &Session, job_id: &JobId, task_id: &TaskId) -> FrameworkResult<TaskInfo> {
    let job = ssn
        .state
        .jobs
        .get(job_id)
        .ok_or_else(|| FrameworkError::JobNotFound(job_id.clone()))?;
    job.task(task_id)
        .cloned()
        .ok_or_else(|| FrameworkError::TaskNotFound {
            task: task_id.clone(),
            job: job_id.clone(),
        })
}

/// Revert a half-applied placement: status back to Pending, node name
/// restored. The node was not touched or already rolled itself back.
fn rollback_placement(ssn: &mut Session, job_id: &JobId, task_id: &TaskId, prev_node: &str) {
    if let Some(job) = ssn.state.jobs.get_mut(job_id) {
        if let Err(err) = job.update_task_status(task_id, TaskStatus::Pending) {
            warn!(%job_id, %task_id, %err, "failed to revert task status");
        }
        job.set_task_node(task_id, prev_node);
    }
}

fn commit_allocate(
    ssn: &mut Session,
    job_id: &JobId,
    task_id: &TaskId,
    hostname: &str,
) -> FrameworkResult<()> {
    let task = lookup_task(ssn, job_id, task_id)?;

    ssn.cache()
        .bind_volumes(&task)
        .map_err(FrameworkError::Effector)?;
    ssn.cache()
        .bind(&task, hostname)
        .map_err(FrameworkError::Effector)?;

    let job = ssn
        .state
        .jobs
        .get_mut(job_id)
        .ok_or_else(|| FrameworkError::JobNotFound(job_id.clone()))?;
    job.update_task_status(task_id, TaskStatus::Binding)?;

    ssn.stats.binds += 1;
    let age = epoch_secs().saturating_sub(task.pod.creation_ts);
    ssn.stats.schedule_latency_secs.push(age as f64);

    Ok(())
}

fn commit_evict(
    ssn: &mut Session,
    job_id: &JobId,
    task_id: &TaskId,
    reason: &str,
) -> FrameworkResult<()> {
    let task = lookup_task(ssn, job_id, task_id)?;

    if let Err(err) = ssn.cache().evict(&task, reason) {
        if let Err(revert) = unevict(ssn, job_id, task_id) {
            error!(%job_id, %task_id, %revert, "failed to unevict after evict failure");
        }
        return Err(FrameworkError::Effector(err));
    }

    ssn.stats.evictions += 1;
    Ok(())
}

/// Inverse of allocate/pipeline: status back to Pending, task off the
/// node, deallocate handlers fired.
fn unplace(
    ssn: &mut Session,
    job_id: &JobId,
    task_id: &TaskId,
    hostname: &str,
    prev_node: &str,
) -> FrameworkResult<()> {
    let job = ssn
        .state
        .jobs
        .get_mut(job_id)
        .ok_or_else(|| FrameworkError::JobNotFound(job_id.clone()))?;
    job.update_task_status(task_id, TaskStatus::Pending)?;
    job.set_task_node(task_id, prev_node);
    let task = job
        .task(task_id)
        .cloned()
        .ok_or_else(|| FrameworkError::TaskNotFound {
            task: task_id.clone(),
            job: job_id.clone(),
        })?;

    if let Some(node) = ssn.state.nodes.get_mut(hostname) {
        node.remove_task(task_id)?;
    } else {
        warn!(%hostname, %task_id, "node disappeared from session during discard");
    }

    ssn.fire_deallocate(&task);
    Ok(())
}

/// Inverse of evict: status back to Running, node accounting restored,
/// allocate handlers fired.
fn unevict(ssn: &mut Session, job_id: &JobId, task_id: &TaskId) -> FrameworkResult<()> {
    let job = ssn
        .state
        .jobs
        .get_mut(job_id)
        .ok_or_else(|| FrameworkError::JobNotFound(job_id.clone()))?;
    let task = job.update_task_status(task_id, TaskStatus::Running)?;

    if let Some(node) = ssn.state.nodes.get_mut(&task.node_name) {
        node.update_task(&task)?;
    }

    ssn.fire_allocate(&task);
    Ok(())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{session_with, FakeCache};
    use flotilla_api::{NodeInfo, Resource};
    use std::sync::Arc;

    use crate::testing::{make_job_with_tasks, make_ready_node};

    fn harness(
        statuses: &[TaskStatus],
        nodes: Vec<NodeInfo>,
    ) -> (Session, Arc<FakeCache>, JobId, Vec<TaskId>) {
        let cache = Arc::new(FakeCache::default());
        let job = make_job_with_tasks("default/job-a", "default-queue", 1, statuses);
        let job_id = job.uid.clone();
        let mut task_ids: Vec<TaskId> = job.tasks.keys().cloned().collect();
        task_ids.sort();
        let ssn = session_with(cache.clone(), vec![job], nodes);
        (ssn, cache, job_id, task_ids)
    }

    #[test]
    fn allocate_updates_session_and_journal() {
        let (mut ssn, _cache, job_id, tasks) = harness(
            &[TaskStatus::Pending],
            vec![make_ready_node("n1", 4000, 8192)],
        );

        let mut statement = Statement::new();
        statement.allocate(&mut ssn, &job_id, &tasks[0], "n1").unwrap();

        let job = &ssn.state.jobs[&job_id];
        assert_eq!(job.task(&tasks[0]).unwrap().status, TaskStatus::Allocated);
        assert_eq!(job.task(&tasks[0]).unwrap().node_name, "n1");
        let node = &ssn.state.nodes["n1"];
        assert_eq!(node.idle, Resource::new(3000, 7168));
        assert!(!statement.is_empty());
    }

    #[test]
    fn allocate_insufficient_node_preserves_state() {
        let (mut ssn, _cache, job_id, tasks) = harness(
            &[TaskStatus::Pending],
            vec![make_ready_node("n1", 100, 100)],
        );

        let mut statement = Statement::new();
        let err = statement.allocate(&mut ssn, &job_id, &tasks[0], "n1");
        assert!(err.is_err());

        let job = &ssn.state.jobs[&job_id];
        assert_eq!(job.task(&tasks[0]).unwrap().status, TaskStatus::Pending);
        assert_eq!(job.task(&tasks[0]).unwrap().node_name, "");
        assert_eq!(ssn.state.nodes["n1"].idle, Resource::new(100, 100));
        assert!(statement.is_empty());
    }

    #[test]
    fn discard_restores_pre_statement_state() {
        let (mut ssn, _cache, job_id, tasks) = harness(
            &[TaskStatus::Pending, TaskStatus::Pending, TaskStatus::Running],
            vec![make_ready_node("n1", 8000, 16384)],
        );

        // Place the running task on the node first, as the cache would have.
        let running = &tasks[2];
        {
            let job = ssn.state.jobs.get_mut(&job_id).unwrap();
            job.set_task_node(running, "n1");
            let task = job.task(running).unwrap().clone();
            ssn.state.nodes.get_mut("n1").unwrap().add_task(&task).unwrap();
        }

        let before_node = ssn.state.nodes["n1"].clone();

        let mut statement = Statement::new();
        statement.allocate(&mut ssn, &job_id, &tasks[0], "n1").unwrap();
        statement.pipeline(&mut ssn, &job_id, &tasks[1], "n1").unwrap();
        statement.evict(&mut ssn, &job_id, running, "test").unwrap();
        statement.discard(&mut ssn);

        let node = &ssn.state.nodes["n1"];
        assert_eq!(node.idle, before_node.idle);
        assert_eq!(node.used, before_node.used);
        assert_eq!(node.releasing, before_node.releasing);
        assert_eq!(node.pipelined, before_node.pipelined);

        let job = &ssn.state.jobs[&job_id];
        assert_eq!(job.task(&tasks[0]).unwrap().status, TaskStatus::Pending);
        assert_eq!(job.task(&tasks[1]).unwrap().status, TaskStatus::Pending);
        assert_eq!(job.task(running).unwrap().status, TaskStatus::Running);
        assert!(job.index_consistent());
    }

    #[test]
    fn commit_binds_allocations_and_evicts() {
        let (mut ssn, cache, job_id, tasks) = harness(
            &[TaskStatus::Pending, TaskStatus::Running],
            vec![make_ready_node("n1", 8000, 16384)],
        );

        let running = &tasks[1];
        {
            let job = ssn.state.jobs.get_mut(&job_id).unwrap();
            job.set_task_node(running, "n1");
            let task = job.task(running).unwrap().clone();
            ssn.state.nodes.get_mut("n1").unwrap().add_task(&task).unwrap();
        }

        let mut statement = Statement::new();
        statement.allocate(&mut ssn, &job_id, &tasks[0], "n1").unwrap();
        statement.evict(&mut ssn, &job_id, running, "preempt").unwrap();
        statement.commit(&mut ssn);

        assert_eq!(cache.binds.lock().unwrap().len(), 1);
        assert_eq!(cache.evictions.lock().unwrap().len(), 1);

        let job = &ssn.state.jobs[&job_id];
        assert_eq!(job.task(&tasks[0]).unwrap().status, TaskStatus::Binding);
        assert_eq!(job.task(running).unwrap().status, TaskStatus::Releasing);
        assert_eq!(ssn.stats.binds, 1);
        assert_eq!(ssn.stats.evictions, 1);
    }

    #[test]
    fn pipeline_commit_has_no_side_effect() {
        let (mut ssn, cache, job_id, tasks) = harness(
            &[TaskStatus::Pending],
            vec![make_ready_node("n1", 8000, 16384)],
        );

        let mut statement = Statement::new();
        statement.pipeline(&mut ssn, &job_id, &tasks[0], "n1").unwrap();
        statement.commit(&mut ssn);

        assert!(cache.binds.lock().unwrap().is_empty());
        let job = &ssn.state.jobs[&job_id];
        assert_eq!(job.task(&tasks[0]).unwrap().status, TaskStatus::Pipelined);
        assert_eq!(ssn.stats.pipelines, 1);
    }

    #[test]
    fn event_handlers_fire_on_ops_and_inverses() {
        use std::rc::Rc;
        use std::cell::RefCell;

        let (mut ssn, _cache, job_id, tasks) = harness(
            &[TaskStatus::Pending],
            vec![make_ready_node("n1", 8000, 16384)],
        );

        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let alloc_log = log.clone();
        let dealloc_log = log.clone();
        ssn.register_event_handler(crate::session::EventHandler {
            on_allocate: Some(Box::new(move |_| alloc_log.borrow_mut().push("alloc"))),
            on_deallocate: Some(Box::new(move |_| dealloc_log.borrow_mut().push("dealloc"))),
        });

        let mut statement = Statement::new();
        statement.allocate(&mut ssn, &job_id, &tasks[0], "n1").unwrap();
        statement.discard(&mut ssn);

        assert_eq!(*log.borrow(), vec!["alloc", "dealloc"]);
    }
}
