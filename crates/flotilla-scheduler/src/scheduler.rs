//! The scheduling loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info};

use flotilla_actions::{new_action, Action};
use flotilla_framework::{
    close_session, open_session, FrameworkError, FrameworkResult, PluginFactory, SchedulerCache,
    SchedulerConf, Tier,
};

use crate::metrics::SchedulerMetrics;

/// Drives one scheduling cycle per period against the cache.
pub struct Scheduler {
    cache: Arc<dyn SchedulerCache>,
    actions: Vec<Box<dyn Action>>,
    tiers: Vec<Tier>,
    factory: PluginFactory,
    period: Duration,
    metrics: Arc<SchedulerMetrics>,
}

impl Scheduler {
    /// Build a scheduler from a configuration document. Unknown action
    /// or plugin names are rejected here, before the first cycle.
    pub fn new(
        cache: Arc<dyn SchedulerCache>,
        conf: &SchedulerConf,
        factory: PluginFactory,
    ) -> FrameworkResult<Scheduler> {
        let mut actions = Vec::new();
        for name in conf.action_names() {
            let action =
                new_action(&name).ok_or_else(|| FrameworkError::UnknownAction(name.clone()))?;
            actions.push(action);
        }

        for tier in &conf.tiers {
            for plugin in &tier.plugins {
                if factory.get(&plugin.name).is_none() {
                    return Err(FrameworkError::UnknownPlugin(plugin.name.clone()));
                }
            }
        }

        Ok(Scheduler {
            cache,
            actions,
            tiers: conf.tiers.clone(),
            factory,
            period: Duration::from_secs(1),
            metrics: Arc::new(SchedulerMetrics::default()),
        })
    }

    /// Set the cycle period (default one second).
    pub fn with_period(mut self, period: Duration) -> Scheduler {
        self.period = period;
        self
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.metrics.clone()
    }

    /// Run cycles until the stop signal fires. An in-flight cycle always
    /// finishes; its results may simply become stale.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.period);
        info!(period = ?self.period, actions = self.actions.len(), "scheduler loop started");
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!("scheduler loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_once();
                }
            }
        }
    }

    /// One scheduling cycle: snapshot, session, actions, close.
    pub fn run_once(&self) {
        let started = Instant::now();

        let snapshot = self.cache.snapshot();
        let mut ssn = match open_session(
            self.cache.clone(),
            snapshot,
            &self.tiers,
            &self.factory,
        ) {
            Ok(ssn) => ssn,
            Err(err) => {
                error!(%err, "failed to open session");
                return;
            }
        };

        for action in &self.actions {
            debug!(action = action.name(), session = ssn.uid(), "executing action");
            action.execute(&mut ssn);
        }

        let stats = close_session(ssn);
        self.metrics.observe_cycle(started.elapsed(), &stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_framework::testing::FakeCache;
    use flotilla_plugins::default_factory;

    #[test]
    fn unknown_action_is_rejected() {
        let conf = SchedulerConf::load("actions = \"allocate, shuffle\"").unwrap();
        let err = Scheduler::new(
            Arc::new(FakeCache::default()),
            &conf,
            default_factory(),
        );
        assert!(matches!(err, Err(FrameworkError::UnknownAction(_))));
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        let document = r#"
actions = "allocate"

[[tiers]]
plugins = [{ name = "telepathy" }]
"#;
        let conf = SchedulerConf::load(document).unwrap();
        let err = Scheduler::new(
            Arc::new(FakeCache::default()),
            &conf,
            default_factory(),
        );
        assert!(matches!(err, Err(FrameworkError::UnknownPlugin(_))));
    }

    #[tokio::test]
    async fn run_once_over_empty_cluster_is_a_noop() {
        let conf = SchedulerConf::default();
        let scheduler = Scheduler::new(
            Arc::new(FakeCache::default()),
            &conf,
            default_factory(),
        )
        .unwrap();

        scheduler.run_once();
        assert_eq!(scheduler.metrics().cycles(), 1);
    }
}
