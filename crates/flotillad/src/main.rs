//! flotillad — the flotilla scheduler daemon.
//!
//! Wires the cache, the plugin factory and the scheduling loop into one
//! process. The cluster transport (watch layer and effectors) is the
//! deployment's integration point: this binary exposes the event channel
//! and ships logging effectors, so a dry-run against a replayed event
//! stream works out of the box.
//!
//! ```text
//! flotillad --scheduler-name flotilla --default-queue default-queue \
//!     --scheduler-conf /etc/flotilla/scheduler.toml --schedule-period 1
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::info;

use flotilla_api::{GroupRecord, PodCondition, PodRecord};
use flotilla_cache::effectors::NullVolumeBinder;
use flotilla_cache::{
    Binder, Cache, Effectors, EventKind, Evictor, ObjectRef, PodSource, Recorder, StatusUpdater,
};
use flotilla_framework::SchedulerConf;
use flotilla_plugins::default_factory;
use flotilla_scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "flotillad", about = "flotilla gang scheduler daemon")]
struct Cli {
    /// Scheduler name; pods naming another scheduler are ignored unless
    /// already bound.
    #[arg(long, default_value = "flotilla")]
    scheduler_name: String,

    /// Queue for jobs and groups that do not name one.
    #[arg(long, default_value = "default-queue")]
    default_queue: String,

    /// Path to the scheduler configuration document (TOML). Without it
    /// the built-in default configuration is used.
    #[arg(long)]
    scheduler_conf: Option<PathBuf>,

    /// Seconds between scheduling cycles.
    #[arg(long, default_value = "1")]
    schedule_period: u64,

    /// Whether to consume priority class events.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    enable_priority_class: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flotilla=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let conf = match &cli.scheduler_conf {
        Some(path) => SchedulerConf::load(&std::fs::read_to_string(path)?)?,
        None => SchedulerConf::default(),
    };
    info!(
        actions = %conf.actions,
        tiers = conf.tiers.len(),
        "scheduler configuration loaded"
    );

    let effectors = Effectors {
        binder: Arc::new(LogBinder),
        evictor: Arc::new(LogEvictor),
        status_updater: Arc::new(LogStatusUpdater),
        volume_binder: Arc::new(NullVolumeBinder),
        recorder: Arc::new(LogRecorder),
        pod_source: Arc::new(EmptyPodSource),
    };

    let cache = Arc::new(
        Cache::new(effectors, &cli.scheduler_name, &cli.default_queue)
            .with_priority_classes(cli.enable_priority_class),
    );

    // The watch layer feeds this channel; it stays open for the process
    // lifetime.
    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);
    let workers = cache.start(events_rx, stop_rx.clone());

    let scheduler = Scheduler::new(cache, &conf, default_factory())?
        .with_period(Duration::from_secs(cli.schedule_period.max(1)));

    tokio::select! {
        _ = scheduler.run(stop_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = stop_tx.send(true);
    for worker in workers {
        let _ = worker.await;
    }

    info!("flotillad stopped");
    Ok(())
}

// ── Logging effectors ───────────────────────────────────────────────
//
// Stand-ins for the cluster API client: every committed effect is
// visible in the logs, nothing leaves the process.

struct LogBinder;

#[async_trait]
impl Binder for LogBinder {
    async fn bind(&self, pod: &PodRecord, hostname: &str) -> anyhow::Result<()> {
        info!(pod = %pod.key(), node = %hostname, "bind");
        Ok(())
    }
}

struct LogEvictor;

#[async_trait]
impl Evictor for LogEvictor {
    async fn evict(&self, pod: &PodRecord) -> anyhow::Result<()> {
        info!(pod = %pod.key(), "evict");
        Ok(())
    }
}

struct LogStatusUpdater;

impl StatusUpdater for LogStatusUpdater {
    fn update_pod_condition(
        &self,
        pod: &PodRecord,
        condition: &PodCondition,
    ) -> anyhow::Result<()> {
        info!(pod = %pod.key(), reason = %condition.reason, "pod condition");
        Ok(())
    }

    fn update_group(&self, group: &GroupRecord) -> anyhow::Result<()> {
        info!(?group, "group status");
        Ok(())
    }
}

struct LogRecorder;

impl Recorder for LogRecorder {
    fn event(&self, object: &ObjectRef, _kind: EventKind, reason: &str, message: &str) {
        info!(
            object = %format!("{}/{}/{}", object.kind, object.namespace, object.name),
            reason,
            message,
            "event"
        );
    }
}

struct EmptyPodSource;

#[async_trait]
impl PodSource for EmptyPodSource {
    async fn get_pod(&self, _namespace: &str, _name: &str) -> anyhow::Result<Option<PodRecord>> {
        Ok(None)
    }
}
