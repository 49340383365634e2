//! flotilla-framework — the scheduling transaction machinery.
//!
//! One scheduling cycle works through this crate:
//!
//! 1. The loop takes a snapshot and calls [`open_session`], which clones
//!    the snapshot into a [`Session`] and lets every configured plugin
//!    register its policy functions.
//! 2. Actions mutate the session through [`Statement`]s — journaled
//!    batches of tentative allocate/pipeline/evict operations with
//!    commit/discard two-phase semantics.
//! 3. [`close_session`] runs every plugin's close hook (e.g. publishing
//!    unschedulable conditions) and yields the cycle statistics.
//!
//! Committed effects reach the cluster through the [`SchedulerCache`]
//! trait, implemented by the cache crate and faked in tests.

pub mod conf;
pub mod error;
pub mod interface;
pub mod plugins;
pub mod session;
pub mod statement;
pub mod testing;

pub use conf::{PluginOption, SchedulerConf, Tier};
pub use error::{FrameworkError, FrameworkResult};
pub use interface::SchedulerCache;
pub use plugins::{Plugin, PluginArgs, PluginBuilder, PluginFactory};
pub use session::{
    close_session, open_session, EventHandler, JobStateFn, JobValidFn, NodeOrderFn, OrderFn,
    PredicateFailure, PredicateFn, SchedEvent, Session, SessionState, SessionStats,
    ValidateFailure, VictimsFn,
};
pub use statement::Statement;
