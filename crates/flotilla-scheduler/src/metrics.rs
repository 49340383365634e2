//! Scheduler metrics — counters over cycles, rendered as Prometheus
//! text exposition format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flotilla_framework::SessionStats;

/// Cycle counters. Atomics throughout; one writer (the loop), any number
/// of scrapers.
#[derive(Default)]
pub struct SchedulerMetrics {
    cycles: AtomicU64,
    last_cycle_ms: AtomicU64,
    binds: AtomicU64,
    evictions: AtomicU64,
    pipelines: AtomicU64,
    unschedulable_jobs: AtomicU64,
    schedule_latency_sum_ms: AtomicU64,
    schedule_latency_count: AtomicU64,
}

impl SchedulerMetrics {
    /// Fold one finished cycle into the counters.
    pub fn observe_cycle(&self, elapsed: Duration, stats: &SessionStats) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.binds.fetch_add(stats.binds, Ordering::Relaxed);
        self.evictions.fetch_add(stats.evictions, Ordering::Relaxed);
        self.pipelines.fetch_add(stats.pipelines, Ordering::Relaxed);
        self.unschedulable_jobs
            .store(stats.unschedulable_jobs, Ordering::Relaxed);

        for latency in &stats.schedule_latency_secs {
            self.schedule_latency_sum_ms
                .fetch_add((latency * 1000.0) as u64, Ordering::Relaxed);
            self.schedule_latency_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Render the counters in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP flotilla_schedule_cycles_total Completed scheduling cycles.\n");
        out.push_str("# TYPE flotilla_schedule_cycles_total counter\n");
        out.push_str(&format!(
            "flotilla_schedule_cycles_total {}\n",
            self.cycles.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP flotilla_schedule_cycle_ms Duration of the last cycle.\n");
        out.push_str("# TYPE flotilla_schedule_cycle_ms gauge\n");
        out.push_str(&format!(
            "flotilla_schedule_cycle_ms {}\n",
            self.last_cycle_ms.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP flotilla_binds_total Tasks bound to nodes.\n");
        out.push_str("# TYPE flotilla_binds_total counter\n");
        out.push_str(&format!(
            "flotilla_binds_total {}\n",
            self.binds.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP flotilla_evictions_total Tasks evicted.\n");
        out.push_str("# TYPE flotilla_evictions_total counter\n");
        out.push_str(&format!(
            "flotilla_evictions_total {}\n",
            self.evictions.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP flotilla_pipelined_total Tentative future placements.\n");
        out.push_str("# TYPE flotilla_pipelined_total counter\n");
        out.push_str(&format!(
            "flotilla_pipelined_total {}\n",
            self.pipelines.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP flotilla_unschedulable_jobs Gangs below threshold after the last cycle.\n");
        out.push_str("# TYPE flotilla_unschedulable_jobs gauge\n");
        out.push_str(&format!(
            "flotilla_unschedulable_jobs {}\n",
            self.unschedulable_jobs.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP flotilla_schedule_latency_ms Sum and count of task creation-to-bind latency.\n");
        out.push_str("# TYPE flotilla_schedule_latency_ms gauge\n");
        out.push_str(&format!(
            "flotilla_schedule_latency_ms_sum {}\n",
            self.schedule_latency_sum_ms.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "flotilla_schedule_latency_ms_count {}\n",
            self.schedule_latency_count.load(Ordering::Relaxed)
        ));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_accumulates() {
        let metrics = SchedulerMetrics::default();
        let stats = SessionStats {
            binds: 2,
            evictions: 1,
            pipelines: 3,
            unschedulable_jobs: 1,
            schedule_latency_secs: vec![1.5, 0.5],
        };
        metrics.observe_cycle(Duration::from_millis(12), &stats);
        metrics.observe_cycle(Duration::from_millis(8), &stats);

        let text = metrics.render_prometheus();
        assert!(text.contains("flotilla_schedule_cycles_total 2"));
        assert!(text.contains("flotilla_binds_total 4"));
        assert!(text.contains("flotilla_evictions_total 2"));
        assert!(text.contains("flotilla_schedule_cycle_ms 8"));
        assert!(text.contains("flotilla_schedule_latency_ms_count 4"));
    }

    #[test]
    fn renders_all_metric_families() {
        let metrics = SchedulerMetrics::default();
        let text = metrics.render_prometheus();
        for family in [
            "flotilla_schedule_cycles_total",
            "flotilla_schedule_cycle_ms",
            "flotilla_binds_total",
            "flotilla_evictions_total",
            "flotilla_pipelined_total",
            "flotilla_unschedulable_jobs",
        ] {
            assert!(text.contains(family), "missing {family}");
        }
    }
}
