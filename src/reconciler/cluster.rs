//! Cluster collaborator interface: produce a rendered package tree at a
//! given URI; the cluster's CNI/scheduling is out of scope. The
//! reconciler only needs *some* type it can fetch observed state from
//! and apply/delete against — this is that interface.

use crate::package::DeploymentPackage;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterObserved {
    pub phase: String,
    pub applied_checksum: Option<String>,
}

/// Collaborator the reconciler drives per target cluster. Concrete
/// implementations never block the dispatcher's own task — all methods
/// are async so a slow cluster only occupies its own in-flight call.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn fetch_observed(&self, vnf_id: &str) -> std::result::Result<ClusterObserved, String>;
    async fn apply(&self, package: &DeploymentPackage) -> std::result::Result<(), String>;
    async fn delete(&self, vnf_id: &str) -> std::result::Result<(), String>;
}

/// In-memory fake used by tests and `--dry-run`: tracks applied packages
/// per VNF id and can be configured to fail a fixed number of times
/// before succeeding, to exercise retry/backoff and partial-failure
/// scenarios without a real cluster.
pub struct SimulatedClusterClient {
    applied: DashMap<String, String>,
    remaining_failures: AtomicU32,
    always_fail: bool,
}

impl SimulatedClusterClient {
    pub fn healthy() -> Self {
        Self {
            applied: DashMap::new(),
            remaining_failures: AtomicU32::new(0),
            always_fail: false,
        }
    }

    pub fn always_failing() -> Self {
        Self {
            applied: DashMap::new(),
            remaining_failures: AtomicU32::new(0),
            always_fail: true,
        }
    }

    pub fn fails_n_times(n: u32) -> Self {
        Self {
            applied: DashMap::new(),
            remaining_failures: AtomicU32::new(n),
            always_fail: false,
        }
    }
}

#[async_trait]
impl ClusterClient for SimulatedClusterClient {
    async fn fetch_observed(&self, vnf_id: &str) -> std::result::Result<ClusterObserved, String> {
        // `applied` is keyed by package name (`{nf_id}-{template}`), not the
        // bare vnf id, so match on prefix the same way `delete` does.
        let entry = self
            .applied
            .iter()
            .find(|e| e.key().starts_with(vnf_id));
        Ok(ClusterObserved {
            phase: if entry.is_some() {
                "Ready".to_string()
            } else {
                "Absent".to_string()
            },
            applied_checksum: entry.map(|e| e.value().clone()),
        })
    }

    async fn apply(&self, package: &DeploymentPackage) -> std::result::Result<(), String> {
        if self.always_fail {
            return Err("simulated cluster unreachable".to_string());
        }
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err("simulated transient failure".to_string());
        }
        self.applied
            .insert(package.name.clone(), package.checksum.clone());
        Ok(())
    }

    async fn delete(&self, vnf_id: &str) -> std::result::Result<(), String> {
        if self.always_fail {
            return Err("simulated cluster unreachable".to_string());
        }
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err("simulated transient failure on delete".to_string());
        }
        self.applied.retain(|k, _| !k.starts_with(vnf_id));
        Ok(())
    }
}

/// HTTP cluster client: POSTs the rendered package to the configured
/// per-cluster endpoint. This is the GitOps package-pull agent's
/// contract seen from the orchestrator side — pushing to a Git remote is
/// explicitly out of scope; this client only records the target URI and
/// hands the bytes to whatever sits behind it.
pub struct RestClusterClient {
    endpoint: String,
    client: reqwest::Client,
    pool_permits: Arc<tokio::sync::Semaphore>,
}

impl RestClusterClient {
    pub fn new(endpoint: impl Into<String>, pool_cap: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            pool_permits: Arc::new(tokio::sync::Semaphore::new(pool_cap)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ClusterClient for RestClusterClient {
    async fn fetch_observed(&self, vnf_id: &str) -> std::result::Result<ClusterObserved, String> {
        let _permit = self.pool_permits.acquire().await.map_err(|e| e.to_string())?;
        let url = format!("{}/vnfs/{}/status", self.endpoint, vnf_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("status fetch returned {}", resp.status()));
        }
        resp.json::<ClusterObserved>().await.map_err(|e| e.to_string())
    }

    async fn apply(&self, package: &DeploymentPackage) -> std::result::Result<(), String> {
        let _permit = self.pool_permits.acquire().await.map_err(|e| e.to_string())?;
        let url = format!("{}/vnfs/{}/apply", self.endpoint, package.name);
        let resp = self
            .client
            .post(&url)
            .json(package)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("apply returned {}", resp.status()));
        }
        Ok(())
    }

    async fn delete(&self, vnf_id: &str) -> std::result::Result<(), String> {
        let _permit = self.pool_permits.acquire().await.map_err(|e| e.to_string())?;
        let url = format!("{}/vnfs/{}", self.endpoint, vnf_id);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("delete returned {}", resp.status()));
        }
        Ok(())
    }
}
