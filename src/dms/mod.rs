//! DMS front: thin CRUD façade exposing slice/NF resources.
//! Validates and sanitizes inputs, enqueues reconciliation work, and
//! serves read-only status from the reconciler's last observation.
//! Built on `warp`, one `Filter` per route, sharing an `Arc<...>` handle
//! into application state across routes.

mod rate_limit;

pub use rate_limit::RateLimiter;

use crate::intent::QosProfile;
use crate::package::DeploymentPackage;
use crate::placement::{NetworkFunction, PlacementEngine};
use crate::reconciler::{Quorum, Reconciler, VnfResource};
use crate::security;
use crate::tn::{Endpoint, TnAgent, TnSlice, TnSliceController};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

#[derive(Clone)]
pub struct DmsState {
    pub placement: Arc<PlacementEngine>,
    pub reconciler: Arc<Reconciler>,
    pub tn_slices: Arc<TnSliceController<TnAgent>>,
    pub limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSliceRequest {
    pub nf: NetworkFunction,
    #[serde(default)]
    pub min_cluster_quorum: Option<QuorumWire>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum QuorumWire {
    All,
    AtLeastOne,
}

impl From<QuorumWire> for Quorum {
    fn from(w: QuorumWire) -> Self {
        match w {
            QuorumWire::All => Quorum::All,
            QuorumWire::AtLeastOne => Quorum::AtLeast(1),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub category: String,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct SliceCreatedResponse {
    pub id: String,
    pub package: DeploymentPackage,
}

fn with_state(
    state: DmsState,
) -> impl Filter<Extract = (DmsState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn rate_limited(limiter: Arc<RateLimiter>) -> Result<(), warp::Rejection> {
    if limiter.check().await {
        Ok(())
    } else {
        Err(warp::reject::custom(RateLimited))
    }
}

#[derive(Debug)]
struct RateLimited;
impl warp::reject::Reject for RateLimited {}

async fn handle_create_slice(
    body: CreateSliceRequest,
    state: DmsState,
) -> Result<impl warp::Reply, Infallible> {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let nf = body.nf;

    if let Err(e) = nf.qos.validate() {
        return Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                category: "validation".to_string(),
                message: security::sanitize_log(&e.to_string()),
                correlation_id,
            }),
            StatusCode::UNPROCESSABLE_ENTITY,
        ));
    }

    let decision = match state.placement.place(&nf) {
        Ok(d) => d,
        Err(e) => {
            return Ok(warp::reply::with_status(
                warp::reply::json(&ErrorBody {
                    category: "validation".to_string(),
                    message: security::sanitize_log(&e.to_string()),
                    correlation_id,
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ));
        }
    };

    crate::monitoring::TracingConfig::default().log_placement_decision(
        &correlation_id,
        &nf.id,
        &decision.site_id,
        decision.score,
    );

    if let Err(e) = state.placement.reserve(&decision.site_id, &nf.requirements) {
        return Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                category: "conflict".to_string(),
                message: security::sanitize_log(&e.to_string()),
                correlation_id,
            }),
            StatusCode::CONFLICT,
        ));
    }

    let quorum: Quorum = body
        .min_cluster_quorum
        .map(Into::into)
        .unwrap_or(Quorum::All);

    let resource = VnfResource::new(nf, decision, quorum);
    let id = resource.id.clone();
    state.reconciler.submit(resource).await;

    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "id": id, "correlation_id": correlation_id })),
        StatusCode::ACCEPTED,
    ))
}

async fn handle_get_slice(id: String, state: DmsState) -> Result<impl warp::Reply, Infallible> {
    match state.reconciler.get(&id) {
        Some(resource) => Ok(warp::reply::with_status(
            warp::reply::json(&resource),
            StatusCode::OK,
        )),
        None => Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                category: "not_found".to_string(),
                message: format!("vnf {id} not found"),
                correlation_id: uuid::Uuid::new_v4().to_string(),
            }),
            StatusCode::NOT_FOUND,
        )),
    }
}

async fn handle_list_slices(state: DmsState) -> Result<impl warp::Reply, Infallible> {
    Ok(warp::reply::with_status(
        warp::reply::json(&state.reconciler.list()),
        StatusCode::OK,
    ))
}

async fn handle_nf_status(id: String, state: DmsState) -> Result<impl warp::Reply, Infallible> {
    match state.reconciler.get(&id) {
        Some(resource) => Ok(warp::reply::with_status(
            warp::reply::json(&resource.status),
            StatusCode::OK,
        )),
        None => Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                category: "not_found".to_string(),
                message: format!("vnf {id} not found"),
                correlation_id: uuid::Uuid::new_v4().to_string(),
            }),
            StatusCode::NOT_FOUND,
        )),
    }
}

async fn handle_delete_slice(id: String, state: DmsState) -> Result<impl warp::Reply, Infallible> {
    match state.reconciler.request_delete(&id).await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "id": id, "status": "terminating" })),
            StatusCode::ACCEPTED,
        )),
        Err(e) => Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                category: "not_found".to_string(),
                message: security::sanitize_log(&e.to_string()),
                correlation_id: uuid::Uuid::new_v4().to_string(),
            }),
            StatusCode::NOT_FOUND,
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfigureTnSliceRequest {
    pub slice: TnSlice,
    pub role: Endpoint,
    pub slice_type: String,
}

async fn handle_configure_tn_slice(
    body: ConfigureTnSliceRequest,
    state: DmsState,
) -> Result<impl warp::Reply, Infallible> {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    match state
        .tn_slices
        .configure(body.slice, body.role, body.slice_type)
        .await
    {
        Ok(phase) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "phase": phase, "correlation_id": correlation_id })),
            StatusCode::ACCEPTED,
        )),
        Err(e) => Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                category: "transient".to_string(),
                message: security::sanitize_log(&e.to_string()),
                correlation_id,
            }),
            StatusCode::UNPROCESSABLE_ENTITY,
        )),
    }
}

async fn handle_tn_slice_status(id: String, state: DmsState) -> Result<impl warp::Reply, Infallible> {
    match state.tn_slices.phase_of(&id) {
        Some(phase) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({
                "slice_id": id,
                "phase": phase,
                "last_measurement": state.tn_slices.last_measurement(&id),
            })),
            StatusCode::OK,
        )),
        None => Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                category: "not_found".to_string(),
                message: format!("tn slice {id} not found"),
                correlation_id: uuid::Uuid::new_v4().to_string(),
            }),
            StatusCode::NOT_FOUND,
        )),
    }
}

async fn handle_delete_tn_slice(id: String, state: DmsState) -> Result<impl warp::Reply, Infallible> {
    match state.tn_slices.terminate(&id).await {
        Ok(()) => Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "id": id, "status": "terminated" })),
            StatusCode::OK,
        )),
        Err(e) => Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                category: "not_found".to_string(),
                message: security::sanitize_log(&e.to_string()),
                correlation_id: uuid::Uuid::new_v4().to_string(),
            }),
            StatusCode::NOT_FOUND,
        )),
    }
}

async fn handle_translate(body: serde_json::Value, _state: DmsState) -> Result<impl warp::Reply, Infallible> {
    let text = body
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let correlation_id = uuid::Uuid::new_v4().to_string();
    let started = std::time::Instant::now();
    match crate::intent::translate(text) {
        Ok(profile) => {
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            let slice_type = format!("{:?}", profile.slice_type);
            crate::monitoring::TracingConfig::default().log_intent_translation(
                &correlation_id,
                &slice_type,
                duration_ms,
            );
            crate::monitoring::prometheus::global().record_intent_duration(
                &slice_type,
                "ok",
                duration_ms as u64,
            );
            Ok(warp::reply::with_status(
                warp::reply::json(&profile),
                StatusCode::OK,
            ))
        }
        Err(e) => {
            crate::monitoring::prometheus::global().record_intent_duration(
                "unknown",
                "error",
                started.elapsed().as_secs_f64() as u64,
            );
            Ok(warp::reply::with_status(
                warp::reply::json(&ErrorBody {
                    category: "validation".to_string(),
                    message: security::sanitize_log(&e.to_string()),
                    correlation_id: uuid::Uuid::new_v4().to_string(),
                }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ))
        }
    }
}

async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    if err.find::<RateLimited>().is_some() {
        return Ok(warp::reply::with_status(
            warp::reply::json(&ErrorBody {
                category: "transient".to_string(),
                message: "rate limit exceeded".to_string(),
                correlation_id: uuid::Uuid::new_v4().to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS,
        ));
    }
    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            category: "fatal".to_string(),
            message: "unhandled rejection".to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }),
        StatusCode::INTERNAL_SERVER_ERROR,
    ))
}

/// Build the DMS route tree: `POST /v1/slices`, `GET /v1/slices`,
/// `GET /v1/slices/{id}`, `DELETE /v1/slices/{id}`,
/// `GET /v1/nfs/{id}/status`, `POST /v1/intents/translate`,
/// `POST /v1/tn-slices`, `GET /v1/tn-slices/{id}`,
/// `DELETE /v1/tn-slices/{id}`. Every response carries the standard
/// security headers; every route is gated by the sustained/burst rate
/// limiter (default 100/200).
pub fn routes(
    state: DmsState,
) -> impl Filter<Extract = (impl warp::Reply,), Error = std::convert::Infallible> + Clone {
    let limiter = state.limiter.clone();
    let rate_gate = warp::any()
        .and_then(move || rate_limited(limiter.clone()))
        .untuple_one();

    let create_slice = warp::path!("v1" / "slices")
        .and(warp::post())
        .and(rate_gate.clone())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(handle_create_slice);

    let list_slices = warp::path!("v1" / "slices")
        .and(warp::get())
        .and(rate_gate.clone())
        .and(with_state(state.clone()))
        .and_then(handle_list_slices);

    let get_slice = warp::path!("v1" / "slices" / String)
        .and(warp::get())
        .and(rate_gate.clone())
        .and(with_state(state.clone()))
        .and_then(handle_get_slice);

    let delete_slice = warp::path!("v1" / "slices" / String)
        .and(warp::delete())
        .and(rate_gate.clone())
        .and(with_state(state.clone()))
        .and_then(handle_delete_slice);

    let nf_status = warp::path!("v1" / "nfs" / String / "status")
        .and(warp::get())
        .and(rate_gate.clone())
        .and(with_state(state.clone()))
        .and_then(handle_nf_status);

    let translate = warp::path!("v1" / "intents" / "translate")
        .and(warp::post())
        .and(rate_gate.clone())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(handle_translate);

    let configure_tn_slice = warp::path!("v1" / "tn-slices")
        .and(warp::post())
        .and(rate_gate.clone())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(handle_configure_tn_slice);

    let tn_slice_status = warp::path!("v1" / "tn-slices" / String)
        .and(warp::get())
        .and(rate_gate.clone())
        .and(with_state(state.clone()))
        .and_then(handle_tn_slice_status);

    let delete_tn_slice = warp::path!("v1" / "tn-slices" / String)
        .and(warp::delete())
        .and(rate_gate)
        .and(with_state(state))
        .and_then(handle_delete_tn_slice);

    create_slice
        .or(list_slices)
        .or(get_slice)
        .or(delete_slice)
        .or(nf_status)
        .or(translate)
        .or(configure_tn_slice)
        .or(tn_slice_status)
        .or(delete_tn_slice)
        .recover(|rej| handle_rejection(rej))
        .map(|reply| {
            warp::reply::with_header(
                warp::reply::with_header(reply, "x-content-type-options", "nosniff"),
                "x-frame-options",
                "DENY",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DmsSettings, PlacementSettings, ReconcilerSettings};
    use crate::reconciler::RetryPolicy;

    fn test_state() -> DmsState {
        let placement = Arc::new(PlacementEngine::new(PlacementSettings::default()));
        placement.add_site(crate::placement::Site::new(
            "edge-1",
            crate::placement::SiteType::Edge,
            crate::placement::Location {
                lat: 0.0,
                lon: 0.0,
                region: "r1".into(),
                zone: "z1".into(),
            },
            crate::placement::Capacity {
                cpu_cores: 16,
                memory_gb: 64,
                storage_gb: 500,
                bandwidth_mbps: 100.0,
            },
            crate::placement::NetworkProfile {
                base_latency_ms: 1.0,
                max_throughput_mbps: 100.0,
                packet_loss_rate: 0.0,
                jitter_ms: 0.0,
            },
        ));

        let reconciler_settings = ReconcilerSettings::default();
        let reconciler = Arc::new(Reconciler::new(
            reconciler_settings.high_watermark,
            RetryPolicy::from(&reconciler_settings),
            600,
        ));

        let tn_settings = crate::config::TnSettings::default();
        let command_runner = Arc::new(crate::tn::CommandRunner::new(
            tn_settings.command_semaphore,
            tn_settings.command_timeout_secs,
        ));
        let tn_agent = Arc::new(TnAgent::new(tn_settings, command_runner));
        let tn_slices = Arc::new(TnSliceController::new(tn_agent));

        let dms = DmsSettings::default();
        DmsState {
            placement,
            reconciler,
            tn_slices,
            limiter: Arc::new(RateLimiter::new(dms.sustained_rps, dms.burst_rps)),
        }
    }

    #[tokio::test]
    async fn translate_route_returns_qos_profile() {
        let state = test_state();
        let filter = routes(state);
        let resp = warp::test::request()
            .method("POST")
            .path("/v1/intents/translate")
            .json(&serde_json::json!({ "text": "HD video streaming" }))
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_slice_returns_404() {
        let state = test_state();
        let filter = routes(state);
        let resp = warp::test::request()
            .method("GET")
            .path("/v1/slices/does-not-exist")
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_slices_returns_empty_array_when_none_submitted() {
        let state = test_state();
        let filter = routes(state);
        let resp = warp::test::request()
            .method("GET")
            .path("/v1/slices")
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body(), "[]");
    }

    #[tokio::test]
    async fn nf_status_for_unknown_id_returns_404() {
        let state = test_state();
        let filter = routes(state);
        let resp = warp::test::request()
            .method("GET")
            .path("/v1/nfs/does-not-exist/status")
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tn_slice_status_for_unknown_id_returns_404() {
        let state = test_state();
        let filter = routes(state);
        let resp = warp::test::request()
            .method("GET")
            .path("/v1/tn-slices/does-not-exist")
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_unknown_tn_slice_returns_404() {
        let state = test_state();
        let filter = routes(state);
        let resp = warp::test::request()
            .method("DELETE")
            .path("/v1/tn-slices/does-not-exist")
            .reply(&filter)
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
