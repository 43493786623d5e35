//! Process health checks exposed on `GET /health`. Kept intentionally
//! small: the orchestrator's liveness is "the async runtime is still
//! scheduling tasks and the placement/reconciler state is reachable",
//! not a deep per-dependency probe (those live in the external
//! observability collaborator).

use serde::Serialize;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub started_at_unix: u64,
}

pub struct HealthChecker {
    started_at_unix: u64,
    started_at: Instant,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            started_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            started_at: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            uptime_secs: self.started_at.elapsed().as_secs(),
            started_at_unix: self.started_at_unix,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_ok() {
        let checker = HealthChecker::new();
        assert_eq!(checker.snapshot().status, "ok");
    }
}
