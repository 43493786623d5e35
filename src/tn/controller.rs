//! Drives a [`TnSlice`]'s phase through the state machine declared in the
//! data model (`pending -> configuring -> active -> degraded -> failed
//! -> terminating`). Mirrors [`crate::reconciler::ClusterClient`]'s
//! shape: a small async trait in front of the real collaborator
//! ([`TnAgent`]) so the phase bookkeeping is testable without spawning
//! real `ip`/`tc`/`iperf3` processes.

use crate::error::Result;
use crate::tn::{Endpoint, Measurement, TnAgent, TnPhase, TnSlice, degraded_thresholds};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// The collaborator a [`TnSliceController`] drives: apply/remove the
/// shaping+overlay transaction, run a probe. Implemented for [`TnAgent`]
/// in production and for an in-memory fake in tests.
#[async_trait]
pub trait TnBackend: Send + Sync {
    async fn apply(&self, slice: &TnSlice, role: &Endpoint) -> Result<()>;
    async fn remove(&self, slice: &TnSlice, role: &Endpoint) -> Result<()>;
    async fn probe(&self, slice: &TnSlice, slice_type: &str) -> Result<Measurement>;
}

#[async_trait]
impl TnBackend for TnAgent {
    async fn apply(&self, slice: &TnSlice, role: &Endpoint) -> Result<()> {
        TnAgent::apply(self, slice, role).await
    }

    async fn remove(&self, slice: &TnSlice, role: &Endpoint) -> Result<()> {
        TnAgent::remove(self, slice, role).await
    }

    async fn probe(&self, slice: &TnSlice, slice_type: &str) -> Result<Measurement> {
        TnAgent::probe(self, slice, slice_type).await
    }
}

#[derive(Clone)]
struct TnSliceRecord {
    slice: TnSlice,
    role: Endpoint,
    slice_type: String,
    phase: TnPhase,
    last_measurement: Option<Measurement>,
}

/// Owns the `id -> record` table for every slice this host agent knows
/// about and drives each one's phase. One slice_id is never touched
/// concurrently by two callers thanks to `DashMap`'s per-shard locking,
/// matching the single-writer-per-key discipline the reconciler uses for
/// VNF resources.
pub struct TnSliceController<B: TnBackend> {
    backend: Arc<B>,
    slices: DashMap<String, TnSliceRecord>,
}

impl<B: TnBackend> TnSliceController<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            slices: DashMap::new(),
        }
    }

    pub fn phase_of(&self, slice_id: &str) -> Option<TnPhase> {
        self.slices.get(slice_id).map(|e| e.phase)
    }

    pub fn last_measurement(&self, slice_id: &str) -> Option<Measurement> {
        self.slices.get(slice_id).and_then(|e| e.last_measurement.clone())
    }

    /// `Pending -> Configuring -> Active` on success, `-> Failed` on
    /// apply failure. Shaping and VXLAN config are applied as the single
    /// atomic transaction `TnAgent::apply` already enforces.
    pub async fn configure(
        &self,
        slice: TnSlice,
        role: Endpoint,
        slice_type: impl Into<String>,
    ) -> Result<TnPhase> {
        slice.validate()?;
        let slice_type = slice_type.into();
        self.slices.insert(
            slice.slice_id.clone(),
            TnSliceRecord {
                slice: slice.clone(),
                role: role.clone(),
                slice_type,
                phase: TnPhase::Pending,
                last_measurement: None,
            },
        );
        self.set_phase(&slice.slice_id, TnPhase::Configuring);

        match self.backend.apply(&slice, &role).await {
            Ok(()) => {
                self.set_phase(&slice.slice_id, TnPhase::Active);
                Ok(TnPhase::Active)
            }
            Err(e) => {
                self.set_phase(&slice.slice_id, TnPhase::Failed);
                Err(e)
            }
        }
    }

    /// Run a probe and update phase: `Active -> Degraded` when the
    /// measurement crosses the slice type's degraded thresholds,
    /// `Degraded -> Active` when a later probe clears it again.
    pub async fn probe(&self, slice_id: &str) -> Result<Measurement> {
        let (slice, slice_type) = {
            let entry = self
                .slices
                .get(slice_id)
                .ok_or_else(|| crate::error::TnError::ProbeFailed {
                    reason: format!("unknown slice {slice_id}"),
                })?;
            (entry.slice.clone(), entry.slice_type.clone())
        };

        let measurement = self.backend.probe(&slice, &slice_type).await?;
        let degraded = degraded_thresholds(&slice_type)
            .map(|(bw_threshold, lat_threshold)| {
                measurement.achieved_mbps < bw_threshold * 0.9
                    || measurement.rtt_ms_avg > lat_threshold + 2.0
            })
            .unwrap_or(false);

        if let Some(mut entry) = self.slices.get_mut(slice_id) {
            entry.phase = if degraded { TnPhase::Degraded } else { TnPhase::Active };
            entry.last_measurement = Some(measurement.clone());
        }

        Ok(measurement)
    }

    /// Re-apply the shaping/VXLAN transaction for a degraded slice,
    /// clearing it back to `Active` on success. The reconciler-style
    /// control loop calls this on its next pass rather than the caller
    /// having to special-case degraded handling.
    pub async fn heal(&self, slice_id: &str) -> Result<TnPhase> {
        let (slice, role) = {
            let entry = self
                .slices
                .get(slice_id)
                .ok_or_else(|| crate::error::TnError::ProbeFailed {
                    reason: format!("unknown slice {slice_id}"),
                })?;
            (entry.slice.clone(), entry.role.clone())
        };
        self.backend.apply(&slice, &role).await?;
        self.set_phase(slice_id, TnPhase::Active);
        Ok(TnPhase::Active)
    }

    /// `* -> Terminating -> ` removed from the table once the backend
    /// confirms the footprint is gone.
    pub async fn terminate(&self, slice_id: &str) -> Result<()> {
        let (slice, role) = {
            let mut entry = self
                .slices
                .get_mut(slice_id)
                .ok_or_else(|| crate::error::TnError::ProbeFailed {
                    reason: format!("unknown slice {slice_id}"),
                })?;
            entry.phase = TnPhase::Terminating;
            (entry.slice.clone(), entry.role.clone())
        };
        self.backend.remove(&slice, &role).await?;
        self.slices.remove(slice_id);
        Ok(())
    }

    fn set_phase(&self, slice_id: &str, phase: TnPhase) {
        if let Some(mut entry) = self.slices.get_mut(slice_id) {
            entry.phase = phase;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrchestratorError, TnError};
    use crate::tn::EndpointRole;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeBackend {
        fail_apply: AtomicBool,
        measurement: Mutex<Measurement>,
    }

    impl FakeBackend {
        fn healthy(achieved_mbps: f64, rtt_ms_avg: f64) -> Self {
            Self {
                fail_apply: AtomicBool::new(false),
                measurement: Mutex::new(Measurement {
                    slice_id: "slice-1".into(),
                    achieved_mbps,
                    rtt_ms_avg,
                    jitter_ms: 0.0,
                    loss_pct: 0.0,
                }),
            }
        }

        fn set_measurement(&self, m: Measurement) {
            *self.measurement.lock().unwrap() = m;
        }
    }

    #[async_trait]
    impl TnBackend for FakeBackend {
        async fn apply(&self, _slice: &TnSlice, _role: &Endpoint) -> Result<()> {
            if self.fail_apply.load(Ordering::SeqCst) {
                Err(OrchestratorError::Tn(TnError::CommandFailed {
                    command: "tc".into(),
                    reason: "simulated failure".into(),
                }))
            } else {
                Ok(())
            }
        }

        async fn remove(&self, _slice: &TnSlice, _role: &Endpoint) -> Result<()> {
            Ok(())
        }

        async fn probe(&self, _slice: &TnSlice, _slice_type: &str) -> Result<Measurement> {
            Ok(self.measurement.lock().unwrap().clone())
        }
    }

    fn sample_slice() -> TnSlice {
        TnSlice {
            slice_id: "slice-1".into(),
            bandwidth_mbps: 2.77,
            latency_ms: 15.7,
            jitter_ms: None,
            loss_pct: None,
            priority: 3,
            endpoints: vec![
                Endpoint {
                    node: "edge01".into(),
                    ip: "10.0.1.10".into(),
                    iface: "eth0".into(),
                    role: EndpointRole::Source,
                },
                Endpoint {
                    node: "edge02".into(),
                    ip: "10.0.2.10".into(),
                    iface: "eth0".into(),
                    role: EndpointRole::Destination,
                },
            ],
            remote_site_a: "edge01".into(),
            remote_site_b: "edge02".into(),
        }
    }

    fn source_role() -> Endpoint {
        Endpoint {
            node: "edge01".into(),
            ip: "10.0.1.10".into(),
            iface: "eth0".into(),
            role: EndpointRole::Source,
        }
    }

    #[tokio::test]
    async fn configure_reaches_active_on_success() {
        let backend = Arc::new(FakeBackend::healthy(2.77, 15.7));
        let controller = TnSliceController::new(backend);
        let phase = controller
            .configure(sample_slice(), source_role(), "mMTC")
            .await
            .unwrap();
        assert_eq!(phase, TnPhase::Active);
        assert_eq!(controller.phase_of("slice-1"), Some(TnPhase::Active));
    }

    #[tokio::test]
    async fn configure_reaches_failed_when_apply_fails() {
        let backend = Arc::new(FakeBackend::healthy(2.77, 15.7));
        backend.fail_apply.store(true, Ordering::SeqCst);
        let controller = TnSliceController::new(backend);
        let result = controller
            .configure(sample_slice(), source_role(), "mMTC")
            .await;
        assert!(result.is_err());
        assert_eq!(controller.phase_of("slice-1"), Some(TnPhase::Failed));
    }

    /// Scenario D: an in-bounds probe keeps the slice active; a probe
    /// that misses the degraded thresholds flips it to Degraded, and
    /// `heal()` clears it back to Active once the backend reapplies
    /// cleanly.
    #[tokio::test]
    async fn scenario_d_degrades_then_heals() {
        let backend = Arc::new(FakeBackend::healthy(2.77, 15.7));
        let controller = TnSliceController::new(backend.clone());
        controller
            .configure(sample_slice(), source_role(), "mMTC")
            .await
            .unwrap();

        let measurement = controller.probe("slice-1").await.unwrap();
        assert!((measurement.achieved_mbps - 2.77).abs() < 0.01);
        assert_eq!(controller.phase_of("slice-1"), Some(TnPhase::Active));

        backend.set_measurement(Measurement {
            slice_id: "slice-1".into(),
            achieved_mbps: 0.5,
            rtt_ms_avg: 15.7,
            jitter_ms: 0.0,
            loss_pct: 0.0,
        });
        controller.probe("slice-1").await.unwrap();
        assert_eq!(controller.phase_of("slice-1"), Some(TnPhase::Degraded));

        backend.set_measurement(Measurement {
            slice_id: "slice-1".into(),
            achieved_mbps: 2.77,
            rtt_ms_avg: 15.7,
            jitter_ms: 0.0,
            loss_pct: 0.0,
        });
        let healed = controller.heal("slice-1").await.unwrap();
        assert_eq!(healed, TnPhase::Active);
        controller.probe("slice-1").await.unwrap();
        assert_eq!(controller.phase_of("slice-1"), Some(TnPhase::Active));
    }

    #[tokio::test]
    async fn terminate_removes_slice_from_table() {
        let backend = Arc::new(FakeBackend::healthy(2.77, 15.7));
        let controller = TnSliceController::new(backend);
        controller
            .configure(sample_slice(), source_role(), "mMTC")
            .await
            .unwrap();
        controller.terminate("slice-1").await.unwrap();
        assert_eq!(controller.phase_of("slice-1"), None);
    }
}
