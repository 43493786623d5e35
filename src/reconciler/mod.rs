//! VNF reconciler: drives the observed state of a VNF resource to its
//! desired spec across every target cluster. Level-triggered, idempotent,
//! and concurrent across VNFs but serialized per VNF id.

mod cluster;
mod retry;

pub use cluster::{ClusterClient, ClusterObserved, RestClusterClient, SimulatedClusterClient};
pub use retry::{RetryPolicy, backoff_delay};

use crate::error::{ReconcileError, Result};
use crate::package::DeploymentPackage;
use crate::placement::{NetworkFunction, PlacementDecision};
use crate::security;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Well-known finalizer placed on every VNF while a cluster-side footprint
/// exists. Removed only in `Deleted` once every cluster confirms absence.
pub const FINALIZER: &str = "slicecast.io/vnf-cleanup";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VnfPhase {
    Pending,
    Validating,
    Creating,
    Running,
    Updating,
    Terminating,
    Failed,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quorum {
    All,
    AtLeast(usize),
}

impl Quorum {
    fn satisfied_by(&self, ready: usize, total: usize) -> bool {
        match self {
            Quorum::All => ready == total,
            Quorum::AtLeast(n) => ready >= *n,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub r#type: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerClusterStatus {
    pub cluster_id: String,
    pub phase: String,
    pub last_applied: Option<String>,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VnfStatus {
    pub phase: VnfPhase,
    pub conditions: Vec<Condition>,
    pub observed_generation: u64,
    pub per_cluster: Vec<PerClusterStatus>,
    pub finalizers: Vec<String>,
    /// Unix timestamp after which an unready `Creating` pass fails instead
    /// of retrying. Set on entering `Creating`, cleared on leaving it.
    pub creating_deadline_unix: Option<u64>,
}

impl Default for VnfStatus {
    fn default() -> Self {
        Self {
            phase: VnfPhase::Pending,
            conditions: Vec::new(),
            observed_generation: 0,
            per_cluster: Vec::new(),
            finalizers: Vec::new(),
            creating_deadline_unix: None,
        }
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VnfResource {
    pub id: String,
    pub nf: NetworkFunction,
    pub placement: PlacementDecision,
    pub generation: u64,
    pub min_cluster_quorum: Quorum,
    pub deletion_requested: bool,
    pub status: VnfStatus,
}

impl VnfResource {
    pub fn new(nf: NetworkFunction, placement: PlacementDecision, min_cluster_quorum: Quorum) -> Self {
        Self {
            id: nf.id.clone(),
            nf,
            placement,
            generation: 1,
            min_cluster_quorum,
            deletion_requested: false,
            status: VnfStatus::default(),
        }
    }

    /// A spec edit bumps the generation. If the resource had failed,
    /// editing it resets phase to Pending and clears every condition
    /// except the finalizer marker.
    pub fn bump_generation(&mut self) {
        self.generation += 1;
        if self.status.phase == VnfPhase::Failed {
            self.status.phase = VnfPhase::Pending;
            self.status.conditions.clear();
            self.status.creating_deadline_unix = None;
        }
    }

    fn set_condition(&mut self, r#type: &str, status: bool, reason: &str, message: &str) {
        if let Some(existing) = self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.r#type == r#type)
        {
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = security::sanitize_log(message);
        } else {
            self.status.conditions.push(Condition {
                r#type: r#type.to_string(),
                status,
                reason: reason.to_string(),
                message: security::sanitize_log(message),
            });
        }
    }
}

/// Deduplicating, FIFO work queue keyed by VNF id. Enqueuing a key already
/// queued is a no-op; enqueuing a key currently being processed schedules
/// exactly one more pass after the in-flight one completes.
struct WorkQueue {
    queued: HashSet<String>,
    processing: HashSet<String>,
    rerun: HashSet<String>,
    order: VecDeque<String>,
    high_watermark: usize,
}

impl WorkQueue {
    fn new(high_watermark: usize) -> Self {
        Self {
            queued: HashSet::new(),
            processing: HashSet::new(),
            rerun: HashSet::new(),
            order: VecDeque::new(),
            high_watermark,
        }
    }

    fn enqueue(&mut self, id: &str) {
        if self.processing.contains(id) {
            self.rerun.insert(id.to_string());
            return;
        }
        if self.queued.contains(id) {
            return;
        }
        if self.queued.len() >= self.high_watermark {
            warn!(vnf_id = %id, "reconciler work queue at high watermark, enqueuing anyway");
        }
        self.queued.insert(id.to_string());
        self.order.push_back(id.to_string());
    }

    fn pop(&mut self) -> Option<String> {
        let id = self.order.pop_front()?;
        self.queued.remove(&id);
        self.processing.insert(id.clone());
        Some(id)
    }

    fn finish(&mut self, id: &str) {
        self.processing.remove(id);
        if self.rerun.remove(id) {
            self.enqueue(id);
        }
    }
}

/// Drives VNF resources to their desired state. Holds an `id -> record`
/// table (no shared pointers between resources), a striped per-VNF mutex
/// so at most one reconcile is in flight per VNF, and a deduplicating
/// work queue.
pub struct Reconciler {
    resources: DashMap<String, VnfResource>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    clusters: DashMap<String, Arc<dyn ClusterClient>>,
    queue: Mutex<WorkQueue>,
    retry_policy: RetryPolicy,
    ready_timeout_secs: u64,
}

impl Reconciler {
    pub fn new(high_watermark: usize, retry_policy: RetryPolicy, ready_timeout_secs: u64) -> Self {
        Self {
            resources: DashMap::new(),
            locks: DashMap::new(),
            clusters: DashMap::new(),
            queue: Mutex::new(WorkQueue::new(high_watermark)),
            retry_policy,
            ready_timeout_secs,
        }
    }

    pub fn register_cluster(&self, id: impl Into<String>, client: Arc<dyn ClusterClient>) {
        self.clusters.insert(id.into(), client);
    }

    /// Create (Pending) and enqueue a VNF resource.
    pub async fn submit(&self, resource: VnfResource) {
        let id = resource.id.clone();
        self.resources.insert(id.clone(), resource);
        self.enqueue(&id).await;
    }

    /// Request deletion: sets the deletion flag; the next reconcile pass
    /// moves the VNF to Terminating. Finalizer discipline means the
    /// resource is not actually removed until every cluster footprint is
    /// confirmed gone.
    pub async fn request_delete(&self, id: &str) -> Result<()> {
        let mut entry = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ReconcileError::NotFound { id: id.to_string() })?;
        entry.deletion_requested = true;
        drop(entry);
        self.enqueue(id).await;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<VnfResource> {
        self.resources.get(id).map(|e| e.clone())
    }

    /// Snapshot of every tracked VNF resource, in no particular order.
    pub fn list(&self) -> Vec<VnfResource> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn enqueue(&self, id: &str) {
        let mut queue = self.queue.lock().await;
        queue.enqueue(id);
    }

    async fn pop_work(&self) -> Option<String> {
        let mut queue = self.queue.lock().await;
        queue.pop()
    }

    async fn finish_work(&self, id: &str) {
        let mut queue = self.queue.lock().await;
        queue.finish(id);
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drain the work queue once, running one reconcile pass per queued
    /// VNF. Inter-VNF reconciles run concurrently; a given VNF id is never
    /// reconciled twice at once.
    pub async fn run_once(&self) -> Vec<Result<VnfPhase>> {
        let mut handles = Vec::new();
        while let Some(id) = self.pop_work().await {
            handles.push(id);
        }
        let mut results = Vec::new();
        for id in handles {
            results.push(self.reconcile(&id).await);
            self.finish_work(&id).await;
        }
        results
    }

    /// Run exactly one state-machine transition for `id`. Idempotent: two
    /// reconciles of an unchanged VNF perform no cluster-side mutating
    /// calls (Testable Property 7) — only the phases that actually need
    /// to act against clusters issue apply/delete calls.
    pub async fn reconcile(&self, id: &str) -> Result<VnfPhase> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut resource = self
            .resources
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| ReconcileError::NotFound { id: id.to_string() })?;

        let prior_phase = resource.status.phase;
        let next_phase = match resource.status.phase {
            VnfPhase::Pending => self.transition_pending(&mut resource),
            VnfPhase::Validating => self.transition_validating(&mut resource),
            VnfPhase::Creating => self.transition_creating(&mut resource, true).await,
            VnfPhase::Running | VnfPhase::Updating => {
                self.transition_running_or_updating(&mut resource).await
            }
            VnfPhase::Terminating => self.transition_terminating(&mut resource).await,
            VnfPhase::Failed | VnfPhase::Deleted => Ok(resource.status.phase),
        };

        let phase = next_phase?;
        resource.status.phase = phase;

        if phase != prior_phase {
            crate::monitoring::TracingConfig::default().log_phase_transition(
                id,
                id,
                &format!("{prior_phase:?}"),
                &format!("{phase:?}"),
            );
            self.record_phase_metrics(&resource.nf.qos.slice_type.to_string(), prior_phase, phase);
        }

        if phase == VnfPhase::Deleted {
            self.resources.remove(id);
            self.locks.remove(id);
        } else {
            self.resources.insert(id.to_string(), resource);
        }

        info!(vnf_id = %id, phase = ?phase, "reconcile pass complete");
        Ok(phase)
    }

    /// `slice_deployments_total{slice_type,status}` on entering a terminal
    /// or steady outcome, `active_slices{slice_type}` on entering/leaving
    /// Running so the gauge tracks currently-running VNFs only.
    fn record_phase_metrics(&self, slice_type: &str, prior: VnfPhase, next: VnfPhase) {
        let metrics = crate::monitoring::prometheus::global();
        if next == VnfPhase::Running && prior != VnfPhase::Running {
            metrics.record_slice_deployment(slice_type, "running");
            metrics.active_slices_delta(slice_type, 1);
        } else if prior == VnfPhase::Running && next != VnfPhase::Running {
            metrics.active_slices_delta(slice_type, -1);
        }
        if next == VnfPhase::Failed {
            metrics.record_slice_deployment(slice_type, "failed");
        }
    }

    fn transition_pending(&self, resource: &mut VnfResource) -> Result<VnfPhase> {
        if !resource.status.finalizers.iter().any(|f| f == FINALIZER) {
            resource.status.finalizers.push(FINALIZER.to_string());
        }
        Ok(VnfPhase::Validating)
    }

    fn transition_validating(&self, resource: &mut VnfResource) -> Result<VnfPhase> {
        if resource.nf.qos.validate().is_err() || resource.nf.target_clusters.is_empty() {
            resource.set_condition(
                "Ready",
                false,
                "InvalidSpec",
                "qos/target_clusters failed validation",
            );
            return Ok(VnfPhase::Failed);
        }
        resource.set_condition("Progressing", true, "Validated", "spec validated");
        resource.status.creating_deadline_unix = Some(now_unix() + self.ready_timeout_secs);
        Ok(VnfPhase::Creating)
    }

    fn upsert_per_cluster(resource: &mut VnfResource, status: PerClusterStatus) {
        if let Some(existing) = resource
            .status
            .per_cluster
            .iter_mut()
            .find(|p| p.cluster_id == status.cluster_id)
        {
            *existing = status;
        } else {
            resource.status.per_cluster.push(status);
        }
    }

    /// Fetch observed state from every target cluster and compare against
    /// the package that the current spec would render. Any cluster that
    /// cannot be confirmed up to date counts as drifted.
    async fn detect_drift(&self, resource: &VnfResource) -> Result<bool> {
        let package = crate::package::generate(
            &resource.nf,
            &resource.placement,
            "vnf-deployment",
            crate::package::TemplateStyle::Pipelined,
        )?;

        for cluster_id in &resource.nf.target_clusters {
            let Some(client) = self.clusters.get(cluster_id).map(|e| e.clone()) else {
                continue;
            };
            match client.fetch_observed(&resource.id).await {
                Ok(observed) => {
                    if observed.phase != "Ready"
                        || observed.applied_checksum.as_deref() != Some(package.checksum.as_str())
                    {
                        return Ok(true);
                    }
                }
                Err(_) => return Ok(true),
            }
        }
        Ok(false)
    }

    async fn apply_to_cluster(
        &self,
        cluster_id: &str,
        package: &DeploymentPackage,
    ) -> std::result::Result<(), String> {
        let client = self
            .clusters
            .get(cluster_id)
            .ok_or_else(|| format!("unknown cluster {cluster_id}"))?
            .clone();

        let mut attempt = 0u32;
        loop {
            match client.apply(package).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.retry_policy.max_attempts {
                        return Err(e);
                    }
                    let delay = backoff_delay(&self.retry_policy, attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Render the package once, then for each target cluster compare
    /// against its observed state and only call `apply` on a cluster that
    /// isn't already at the rendered checksum. `enforce_deadline` gates
    /// the "Creating -> Running within timeout" clock: it applies to the
    /// initial rollout but not to a later drift-triggered re-apply.
    async fn transition_creating(&self, resource: &mut VnfResource, enforce_deadline: bool) -> Result<VnfPhase> {
        let package = crate::package::generate(
            &resource.nf,
            &resource.placement,
            "vnf-deployment",
            crate::package::TemplateStyle::Pipelined,
        )?;

        let mut ready = 0usize;
        let mut failed_clusters = Vec::new();
        let total = resource.nf.target_clusters.len();

        for cluster_id in resource.nf.target_clusters.clone() {
            let observed = match self.clusters.get(&cluster_id).map(|e| e.clone()) {
                Some(client) => client.fetch_observed(&resource.id).await.ok(),
                None => None,
            };
            let up_to_date = observed
                .as_ref()
                .map(|o| o.phase == "Ready" && o.applied_checksum.as_deref() == Some(package.checksum.as_str()))
                .unwrap_or(false);

            let outcome = if up_to_date {
                Ok(())
            } else {
                self.apply_to_cluster(&cluster_id, &package).await
            };

            match outcome {
                Ok(()) => {
                    ready += 1;
                    Self::upsert_per_cluster(
                        resource,
                        PerClusterStatus {
                            cluster_id,
                            phase: "Ready".to_string(),
                            last_applied: Some(package.version.clone()),
                            checksum: Some(package.checksum.clone()),
                        },
                    );
                }
                Err(reason) => {
                    failed_clusters.push(cluster_id.clone());
                    Self::upsert_per_cluster(
                        resource,
                        PerClusterStatus {
                            cluster_id,
                            phase: "Failed".to_string(),
                            last_applied: None,
                            checksum: None,
                        },
                    );
                    warn!(reason = %security::sanitize_log(&reason), "cluster apply failed during Creating");
                }
            }
        }

        if resource.min_cluster_quorum.satisfied_by(ready, total) {
            if failed_clusters.is_empty() {
                resource.set_condition("Ready", true, "AllClustersReady", "every target cluster ready");
            } else {
                resource.set_condition(
                    "PartialReady",
                    true,
                    "QuorumMet",
                    &format!("failed clusters: {failed_clusters:?}"),
                );
            }
            resource.status.observed_generation = resource.generation;
            resource.status.creating_deadline_unix = None;
            return Ok(VnfPhase::Running);
        }

        if enforce_deadline {
            let deadline = resource.status.creating_deadline_unix.unwrap_or(0);
            if now_unix() >= deadline {
                resource.set_condition(
                    "ClusterUnreachable",
                    true,
                    "DeployTimeout",
                    &format!("deploy deadline exceeded, failed clusters: {failed_clusters:?}"),
                );
                resource.status.creating_deadline_unix = None;
                return Ok(VnfPhase::Failed);
            }
            resource.set_condition(
                "Progressing",
                true,
                "AwaitingClusterReady",
                &format!("failed clusters: {failed_clusters:?}, retrying before deadline"),
            );
            return Ok(VnfPhase::Creating);
        }

        resource.set_condition(
            "ClusterUnreachable",
            true,
            "QuorumNotMet",
            &format!("failed clusters: {failed_clusters:?}"),
        );
        Ok(VnfPhase::Failed)
    }

    async fn transition_running_or_updating(&self, resource: &mut VnfResource) -> Result<VnfPhase> {
        if resource.deletion_requested {
            return Ok(VnfPhase::Terminating);
        }

        if resource.status.phase == VnfPhase::Updating {
            // Already flagged as drifted on a prior pass; re-apply now.
            return self.transition_creating(resource, false).await;
        }

        if resource.status.observed_generation >= resource.generation
            && !self.detect_drift(resource).await?
        {
            return Ok(VnfPhase::Running);
        }

        resource.set_condition(
            "Progressing",
            true,
            "DriftDetected",
            "observed cluster state diverged from spec, reconciling",
        );
        Ok(VnfPhase::Updating)
    }

    async fn transition_terminating(&self, resource: &mut VnfResource) -> Result<VnfPhase> {
        let mut remaining = Vec::new();
        for cluster_id in resource.nf.target_clusters.clone() {
            if let Some(client) = self.clusters.get(&cluster_id) {
                match client.delete(&resource.id).await {
                    Ok(()) => {}
                    Err(reason) => {
                        remaining.push(cluster_id.clone());
                        warn!(cluster = %cluster_id, reason = %security::sanitize_log(&reason), "delete failed, retrying next pass");
                    }
                }
            }
        }

        if !remaining.is_empty() {
            resource.set_condition(
                "Terminating",
                true,
                "FootprintRemains",
                &format!("clusters still owning footprint: {remaining:?}"),
            );
            return Ok(VnfPhase::Terminating);
        }

        resource.status.finalizers.retain(|f| f != FINALIZER);
        Ok(VnfPhase::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{QosProfile, SliceType};
    use crate::placement::{NfType, Requirements};

    fn sample_resource(clusters: Vec<&str>, quorum: Quorum) -> VnfResource {
        let nf = NetworkFunction {
            id: "vnf-1".into(),
            nf_type: NfType::Upf,
            requirements: Requirements {
                cpu_cores: 1,
                memory_gb: 1,
                storage_gb: 1,
                bandwidth_mbps: 1.0,
            },
            qos: QosProfile {
                bandwidth: 1.0,
                latency: 9.0,
                jitter: None,
                packet_loss: None,
                reliability: None,
                slice_type: SliceType::Balanced,
            },
            target_clusters: clusters.into_iter().map(String::from).collect(),
        };
        let placement = PlacementDecision {
            nf_id: nf.id.clone(),
            site_id: "edge-1".into(),
            score: 0.1,
            expected_latency_ms: 2.0,
            expected_throughput_mbps: 10.0,
            alternatives: vec![],
        };
        VnfResource::new(nf, placement, quorum)
    }

    fn test_retry_policy() -> RetryPolicy {
        RetryPolicy {
            base_ms: 1,
            factor: 2.0,
            jitter_pct: 0.0,
            cap_ms: 10,
            max_attempts: 1,
        }
    }

    #[tokio::test]
    async fn scenario_c_quorum_at_least_one_reaches_running_partial() {
        let reconciler = Reconciler::new(10_000, test_retry_policy(), 600);
        reconciler.register_cluster("edge01", Arc::new(SimulatedClusterClient::healthy()));
        reconciler.register_cluster("edge02", Arc::new(SimulatedClusterClient::always_failing()));

        let resource = sample_resource(vec!["edge01", "edge02"], Quorum::AtLeast(1));
        reconciler.submit(resource).await;
        reconciler.reconcile("vnf-1").await.unwrap(); // Pending -> Validating
        reconciler.reconcile("vnf-1").await.unwrap(); // Validating -> Creating
        let phase = reconciler.reconcile("vnf-1").await.unwrap(); // Creating -> Running|Failed

        assert_eq!(phase, VnfPhase::Running);
        let resource = reconciler.get("vnf-1").unwrap();
        assert!(resource
            .status
            .conditions
            .iter()
            .any(|c| c.r#type == "PartialReady"));
    }

    #[tokio::test]
    async fn scenario_c_quorum_all_fails_on_partial_cluster() {
        // A zero deploy timeout means the first unready Creating pass is
        // already past its deadline, so quorum-miss fails immediately
        // instead of staying in Creating for a retry.
        let reconciler = Reconciler::new(10_000, test_retry_policy(), 0);
        reconciler.register_cluster("edge01", Arc::new(SimulatedClusterClient::healthy()));
        reconciler.register_cluster("edge02", Arc::new(SimulatedClusterClient::always_failing()));

        let resource = sample_resource(vec!["edge01", "edge02"], Quorum::All);
        reconciler.submit(resource).await;
        reconciler.reconcile("vnf-1").await.unwrap();
        reconciler.reconcile("vnf-1").await.unwrap();
        let phase = reconciler.reconcile("vnf-1").await.unwrap();

        assert_eq!(phase, VnfPhase::Failed);
    }

    #[tokio::test]
    async fn invalid_spec_goes_to_failed_without_touching_clusters() {
        let reconciler = Reconciler::new(10_000, test_retry_policy(), 600);
        let resource = sample_resource(vec![], Quorum::All);
        reconciler.submit(resource).await;
        reconciler.reconcile("vnf-1").await.unwrap(); // Pending -> Validating
        let phase = reconciler.reconcile("vnf-1").await.unwrap(); // Validating -> Failed

        assert_eq!(phase, VnfPhase::Failed);
    }

    #[tokio::test]
    async fn failed_to_pending_on_spec_edit_clears_conditions() {
        let reconciler = Reconciler::new(10_000, test_retry_policy(), 600);
        let resource = sample_resource(vec![], Quorum::All);
        reconciler.submit(resource).await;
        reconciler.reconcile("vnf-1").await.unwrap();
        reconciler.reconcile("vnf-1").await.unwrap();

        let mut resource = reconciler.get("vnf-1").unwrap();
        assert_eq!(resource.status.phase, VnfPhase::Failed);
        resource.bump_generation();
        assert_eq!(resource.status.phase, VnfPhase::Pending);
        assert!(resource.status.conditions.is_empty());
    }

    #[tokio::test]
    async fn scenario_e_deletion_retries_until_cluster_recovers() {
        let reconciler = Reconciler::new(10_000, test_retry_policy(), 600);
        let flaky = Arc::new(SimulatedClusterClient::fails_n_times(1));
        reconciler.register_cluster("edge01", flaky.clone());

        let resource = sample_resource(vec!["edge01"], Quorum::All);
        reconciler.submit(resource).await;
        reconciler.reconcile("vnf-1").await.unwrap();
        reconciler.reconcile("vnf-1").await.unwrap();
        reconciler.reconcile("vnf-1").await.unwrap();
        assert_eq!(reconciler.get("vnf-1").unwrap().status.phase, VnfPhase::Running);

        reconciler.request_delete("vnf-1").await.unwrap();
        let phase_after_delete = reconciler.reconcile("vnf-1").await.unwrap();
        assert_eq!(phase_after_delete, VnfPhase::Terminating);
        assert!(reconciler.get("vnf-1").unwrap().status.finalizers.contains(&FINALIZER.to_string()));

        let phase_final = reconciler.reconcile("vnf-1").await.unwrap();
        assert_eq!(phase_final, VnfPhase::Deleted);
        assert!(reconciler.get("vnf-1").is_none());
    }

    #[tokio::test]
    async fn duplicate_enqueue_collapses_to_single_queue_entry() {
        let reconciler = Reconciler::new(10_000, test_retry_policy(), 600);
        let resource = sample_resource(vec![], Quorum::All);
        reconciler.submit(resource).await;
        reconciler.enqueue("vnf-1").await;
        reconciler.enqueue("vnf-1").await;

        let mut queue = reconciler.queue.lock().await;
        assert_eq!(queue.order.len(), 1);
    }

    #[tokio::test]
    async fn creating_stays_in_progress_before_deadline_expires() {
        let reconciler = Reconciler::new(10_000, test_retry_policy(), 600);
        reconciler.register_cluster("edge01", Arc::new(SimulatedClusterClient::healthy()));
        reconciler.register_cluster("edge02", Arc::new(SimulatedClusterClient::always_failing()));

        let resource = sample_resource(vec!["edge01", "edge02"], Quorum::All);
        reconciler.submit(resource).await;
        reconciler.reconcile("vnf-1").await.unwrap();
        reconciler.reconcile("vnf-1").await.unwrap();
        let phase = reconciler.reconcile("vnf-1").await.unwrap();

        assert_eq!(phase, VnfPhase::Creating);
        let resource = reconciler.get("vnf-1").unwrap();
        assert!(
            resource
                .status
                .conditions
                .iter()
                .any(|c| c.reason == "AwaitingClusterReady")
        );
    }

    struct CountingClusterClient {
        inner: SimulatedClusterClient,
        apply_calls: std::sync::atomic::AtomicUsize,
    }

    impl CountingClusterClient {
        fn new() -> Self {
            Self {
                inner: SimulatedClusterClient::healthy(),
                apply_calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn apply_call_count(&self) -> usize {
            self.apply_calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ClusterClient for CountingClusterClient {
        async fn fetch_observed(&self, vnf_id: &str) -> std::result::Result<ClusterObserved, String> {
            self.inner.fetch_observed(vnf_id).await
        }

        async fn apply(&self, package: &DeploymentPackage) -> std::result::Result<(), String> {
            self.apply_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.apply(package).await
        }

        async fn delete(&self, vnf_id: &str) -> std::result::Result<(), String> {
            self.inner.delete(vnf_id).await
        }
    }

    #[tokio::test]
    async fn running_reconcile_of_unchanged_vnf_issues_no_cluster_apply_calls() {
        let reconciler = Reconciler::new(10_000, test_retry_policy(), 600);
        let client = Arc::new(CountingClusterClient::new());
        reconciler.register_cluster("edge01", client.clone());

        let resource = sample_resource(vec!["edge01"], Quorum::All);
        reconciler.submit(resource).await;
        reconciler.reconcile("vnf-1").await.unwrap(); // Pending -> Validating
        reconciler.reconcile("vnf-1").await.unwrap(); // Validating -> Creating
        let phase = reconciler.reconcile("vnf-1").await.unwrap(); // Creating -> Running
        assert_eq!(phase, VnfPhase::Running);
        assert_eq!(client.apply_call_count(), 1);

        let phase_again = reconciler.reconcile("vnf-1").await.unwrap();
        assert_eq!(phase_again, VnfPhase::Running);
        assert_eq!(
            client.apply_call_count(),
            1,
            "reconciling an unchanged VNF must not re-apply"
        );
    }

    struct DriftOnceClusterClient {
        applied: std::sync::atomic::AtomicBool,
    }

    impl DriftOnceClusterClient {
        fn new() -> Self {
            Self {
                applied: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl ClusterClient for DriftOnceClusterClient {
        async fn fetch_observed(&self, _vnf_id: &str) -> std::result::Result<ClusterObserved, String> {
            if self.applied.load(std::sync::atomic::Ordering::SeqCst) {
                Ok(ClusterObserved {
                    phase: "Drifted".to_string(),
                    applied_checksum: None,
                })
            } else {
                Ok(ClusterObserved {
                    phase: "Absent".to_string(),
                    applied_checksum: None,
                })
            }
        }

        async fn apply(&self, _package: &DeploymentPackage) -> std::result::Result<(), String> {
            self.applied.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn delete(&self, _vnf_id: &str) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    /// A cluster that never reports a matching checksum looks drifted on
    /// every pass: Running flips to Updating, then the re-apply brings it
    /// back to Running rather than looping forever in one pass.
    #[tokio::test]
    async fn drift_in_cluster_observed_state_surfaces_updating_before_reapply() {
        let reconciler = Reconciler::new(10_000, test_retry_policy(), 600);
        reconciler.register_cluster("edge01", Arc::new(DriftOnceClusterClient::new()));

        let resource = sample_resource(vec!["edge01"], Quorum::All);
        reconciler.submit(resource).await;
        reconciler.reconcile("vnf-1").await.unwrap(); // Pending -> Validating
        reconciler.reconcile("vnf-1").await.unwrap(); // Validating -> Creating
        let phase = reconciler.reconcile("vnf-1").await.unwrap(); // Creating -> Running
        assert_eq!(phase, VnfPhase::Running);

        let phase = reconciler.reconcile("vnf-1").await.unwrap(); // Running -> Updating
        assert_eq!(phase, VnfPhase::Updating);

        let phase = reconciler.reconcile("vnf-1").await.unwrap(); // Updating -> Running
        assert_eq!(phase, VnfPhase::Running);
    }
}
