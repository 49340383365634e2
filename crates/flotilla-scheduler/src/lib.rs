//! flotilla-scheduler — the repeating scheduling cycle.
//!
//! Wires the pieces together: every period the scheduler snapshots the
//! cache, opens a session with the configured plugin tiers, runs the
//! configured actions in order and closes the session. Cycle statistics
//! land in [`SchedulerMetrics`], rendered on demand in Prometheus text
//! exposition format.

pub mod metrics;
pub mod scheduler;

pub use metrics::SchedulerMetrics;
pub use scheduler::Scheduler;
