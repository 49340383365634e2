//! flotilla-plugins — the well-known policy plugins.
//!
//! Each plugin registers policy functions on session open:
//!
//! - **priority** — job/task ordering and preemption by priority
//! - **gang** — minimum-member validation, victim protection, status
//!   publication for unschedulable gangs
//! - **drf** — dominant-resource-fairness job ordering
//! - **proportion** — weighted queue shares and cross-queue reclaim
//! - **predicates** — node feasibility filtering (fit, selector, taints)
//! - **nodeorder** — node scoring (least-requested, balanced usage)
//! - **conformance** — protects system-critical tasks from eviction

pub mod conformance;
pub mod drf;
pub mod gang;
pub mod nodeorder;
pub mod predicates;
pub mod priority;
pub mod proportion;

use flotilla_framework::PluginFactory;

/// The factory with every well-known plugin registered under its name.
pub fn default_factory() -> PluginFactory {
    let mut factory = PluginFactory::new();
    factory.register("priority", priority::new);
    factory.register("gang", gang::new);
    factory.register("drf", drf::new);
    factory.register("proportion", proportion::new);
    factory.register("predicates", predicates::new);
    factory.register("nodeorder", nodeorder::new);
    factory.register("conformance", conformance::new);
    factory
}
