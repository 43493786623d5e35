//! `MetricsCollector`: intent processing duration (slice_type, status),
//! slice deployments total (slice_type, status), active slices gauge
//! (slice_type), placement decisions total (placement_type, result), and
//! per-slice TN achieved throughput/RTT. Rendered as Prometheus text
//! exposition on `GET /metrics`.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
struct Counter(AtomicU64);

impl Counter {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct Gauge(AtomicI64);

impl Gauge {
    fn set(&self, v: i64) {
        self.0.store(v, Ordering::Relaxed);
    }
    fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }
    fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct DurationHistogram {
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl DurationHistogram {
    fn observe(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
    }
}

/// Central metrics collector. Each map is keyed by the label tuple the
/// metric is declared with; values are process-local atomics, scraped by
/// an external Prometheus collector. This process only emits the points.
pub struct MetricsCollector {
    intent_duration: DashMap<(String, String), DurationHistogram>,
    slice_deployments_total: DashMap<(String, String), Counter>,
    active_slices: DashMap<String, Gauge>,
    placement_decisions_total: DashMap<(String, String), Counter>,
    tn_throughput_mbps: DashMap<String, Gauge>,
    tn_rtt_ms: DashMap<String, Gauge>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            intent_duration: DashMap::new(),
            slice_deployments_total: DashMap::new(),
            active_slices: DashMap::new(),
            placement_decisions_total: DashMap::new(),
            tn_throughput_mbps: DashMap::new(),
            tn_rtt_ms: DashMap::new(),
        }
    }

    pub fn record_intent_duration(&self, slice_type: &str, status: &str, duration_ms: u64) {
        self.intent_duration
            .entry((slice_type.to_string(), status.to_string()))
            .or_default()
            .observe(duration_ms);
    }

    pub fn record_slice_deployment(&self, slice_type: &str, status: &str) {
        self.slice_deployments_total
            .entry((slice_type.to_string(), status.to_string()))
            .or_default()
            .inc();
    }

    pub fn set_active_slices(&self, slice_type: &str, count: i64) {
        self.active_slices
            .entry(slice_type.to_string())
            .or_default()
            .set(count);
    }

    pub fn active_slices_delta(&self, slice_type: &str, delta: i64) {
        self.active_slices
            .entry(slice_type.to_string())
            .or_default()
            .add(delta);
    }

    pub fn record_placement_decision(&self, placement_type: &str, result: &str) {
        self.placement_decisions_total
            .entry((placement_type.to_string(), result.to_string()))
            .or_default()
            .inc();
    }

    pub fn record_tn_measurement(&self, slice_id: &str, achieved_mbps: f64, rtt_ms: f64) {
        self.tn_throughput_mbps
            .entry(slice_id.to_string())
            .or_default()
            .set(achieved_mbps as i64);
        self.tn_rtt_ms
            .entry(slice_id.to_string())
            .or_default()
            .set(rtt_ms as i64);
    }

    /// Render every metric as Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP slicecast_intent_processing_duration_ms_sum Cumulative intent processing duration in ms\n");
        out.push_str("# TYPE slicecast_intent_processing_duration_ms_sum counter\n");
        for entry in self.intent_duration.iter() {
            let (slice_type, status) = entry.key();
            out.push_str(&format!(
                "slicecast_intent_processing_duration_ms_sum{{slice_type=\"{slice_type}\",status=\"{status}\"}} {}\n",
                entry.value().sum_ms.load(Ordering::Relaxed)
            ));
        }

        out.push_str("# HELP slicecast_slice_deployments_total Slice deployments by type and result\n");
        out.push_str("# TYPE slicecast_slice_deployments_total counter\n");
        for entry in self.slice_deployments_total.iter() {
            let (slice_type, status) = entry.key();
            out.push_str(&format!(
                "slicecast_slice_deployments_total{{slice_type=\"{slice_type}\",status=\"{status}\"}} {}\n",
                entry.value().get()
            ));
        }

        out.push_str("# HELP slicecast_active_slices Currently active slices by type\n");
        out.push_str("# TYPE slicecast_active_slices gauge\n");
        for entry in self.active_slices.iter() {
            out.push_str(&format!(
                "slicecast_active_slices{{slice_type=\"{}\"}} {}\n",
                entry.key(),
                entry.value().get()
            ));
        }

        out.push_str("# HELP slicecast_placement_decisions_total Placement decisions by NF type and result\n");
        out.push_str("# TYPE slicecast_placement_decisions_total counter\n");
        for entry in self.placement_decisions_total.iter() {
            let (placement_type, result) = entry.key();
            out.push_str(&format!(
                "slicecast_placement_decisions_total{{placement_type=\"{placement_type}\",result=\"{result}\"}} {}\n",
                entry.value().get()
            ));
        }

        out.push_str("# HELP slicecast_tn_achieved_throughput_mbps Last probed achieved throughput per slice\n");
        out.push_str("# TYPE slicecast_tn_achieved_throughput_mbps gauge\n");
        for entry in self.tn_throughput_mbps.iter() {
            out.push_str(&format!(
                "slicecast_tn_achieved_throughput_mbps{{slice_id=\"{}\"}} {}\n",
                entry.key(),
                entry.value().get()
            ));
        }

        out.push_str("# HELP slicecast_tn_rtt_ms Last probed RTT per slice\n");
        out.push_str("# TYPE slicecast_tn_rtt_ms gauge\n");
        for entry in self.tn_rtt_ms.iter() {
            out.push_str(&format!(
                "slicecast_tn_rtt_ms{{slice_id=\"{}\"}} {}\n",
                entry.key(),
                entry.value().get()
            ));
        }

        out
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide metrics registry, the same "initialized once, no
/// per-request mutable config" discipline the logger follows — every
/// component records into this single instance, and `GET /metrics`
/// scrapes it directly.
static GLOBAL: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

pub fn global() -> &'static MetricsCollector {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_output_includes_recorded_points() {
        let collector = MetricsCollector::new();
        collector.record_intent_duration("eMBB", "ok", 5);
        collector.record_slice_deployment("eMBB", "ok");
        collector.set_active_slices("eMBB", 3);
        collector.record_placement_decision("edge", "success");
        collector.record_tn_measurement("slice-1", 4.6, 16.0);

        let rendered = collector.render_prometheus();
        assert!(rendered.contains("slicecast_intent_processing_duration_ms_sum"));
        assert!(rendered.contains("slicecast_active_slices{slice_type=\"eMBB\"} 3"));
        assert!(rendered.contains("slicecast_tn_rtt_ms{slice_id=\"slice-1\"} 16"));
    }
}
