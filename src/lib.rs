//! slicecast - intent-driven orchestrator for 5G/O-RAN network slices.
//!
//! Operator intent flows through [`intent`] (NL -> QoS profile),
//! [`placement`] (latency-aware site selection), [`package`] (declarative
//! deployment package rendering), [`reconciler`] (cross-cluster VNF state
//! machine), and [`tn`] (transport-network slice enforcement). [`dms`]
//! exposes a CRUD façade over the whole pipeline; [`security`] is the
//! cross-cutting sanitizer every other component calls into.

pub mod cli;
pub mod config;
pub mod dms;
pub mod error;
pub mod intent;
pub mod monitoring;
pub mod package;
pub mod placement;
pub mod reconciler;
pub mod security;
pub mod tn;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};

use std::sync::Arc;

/// Wires together one placement engine, reconciler, and TN agent per
/// process, built once from an explicit [`OrchestratorConfig`] — there is
/// no global mutable configuration.
pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub placement: Arc<placement::PlacementEngine>,
    pub reconciler: Arc<reconciler::Reconciler>,
    pub tn_agent: Arc<tn::TnAgent>,
    pub tn_slices: Arc<tn::TnSliceController<tn::TnAgent>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let placement = Arc::new(placement::PlacementEngine::new(
            config.file.placement.clone(),
        ));

        let retry_policy = reconciler::RetryPolicy::from(&config.file.reconciler);
        let reconciler = Arc::new(reconciler::Reconciler::new(
            config.file.reconciler.high_watermark,
            retry_policy,
            600,
        ));

        for (id, endpoint) in &config.file.clusters {
            let client: Arc<dyn reconciler::ClusterClient> = if endpoint.simulated {
                Arc::new(reconciler::SimulatedClusterClient::healthy())
            } else {
                Arc::new(reconciler::RestClusterClient::new(
                    endpoint.url.clone(),
                    config.file.reconciler.cluster_pool_cap,
                ))
            };
            reconciler.register_cluster(id.clone(), client);
        }

        let command_runner = Arc::new(tn::CommandRunner::new(
            config.file.tn.command_semaphore,
            config.file.tn.command_timeout_secs,
        ));
        let tn_agent = Arc::new(tn::TnAgent::new(config.file.tn.clone(), command_runner));
        let tn_slices = Arc::new(tn::TnSliceController::new(tn_agent.clone()));

        Self {
            config,
            placement,
            reconciler,
            tn_agent,
            tn_slices,
        }
    }

    /// Translate every intent line in `text` to a QoS profile, skipping
    /// comments and blanks.
    pub fn translate_intents(&self, text: &str) -> Vec<Result<intent::QosProfile>> {
        intent::parse_intents_file(text)
            .into_iter()
            .map(intent::translate)
            .collect()
    }
}
