//! HTTP endpoints of the Refractor server.
//!
//! Protocol endpoints:
//! - `POST /tx` – submit a transaction or additional signatures
//! - `GET /tx/{hash}` – fetch a stored record
//!
//! Monitoring endpoints (POSTs require the admin `X-Api-Key`):
//! - `GET /monitoring/health`, `GET /monitoring/metrics`
//! - `POST /monitoring/queue/pause`, `POST /monitoring/queue/resume`
//! - `POST /monitoring/queue/concurrency`
//! - `POST /monitoring/cleanup/expired`

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::engine::SignerEngine;
use crate::error::RefractorError;
use crate::queue::FinalizationQueue;
use crate::request::TxSubmitRequest;
use crate::store::DataProvider;
use crate::types::{TxHash, TxResponse};
use crate::util::unix_now;

/// 32-byte digest hashes as served by `GET /tx/{hash}`.
static HASH_PATH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{64}$").expect("Invalid hash path regex"));

pub struct AppState {
    pub engine: Arc<SignerEngine>,
    pub store: Arc<dyn DataProvider>,
    pub queue: FinalizationQueue,
    pub admin_api_key: Option<String>,
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tx", post(post_tx))
        .route("/tx/{hash}", get(get_tx))
        .route("/monitoring/health", get(get_health))
        .route("/monitoring/metrics", get(get_metrics))
        .route("/monitoring/queue/pause", post(post_queue_pause))
        .route("/monitoring/queue/resume", post(post_queue_resume))
        .route("/monitoring/queue/concurrency", post(post_queue_concurrency))
        .route("/monitoring/cleanup/expired", post(post_cleanup_expired))
        .with_state(state)
}

/// `POST /tx`: submit an unsigned or partially signed transaction in any of
/// the three accepted shapes (tx-URI, components, legacy Stellar).
///
/// Responds 201 when the submission created the record, 200 when it
/// attached to an existing one. The body is the stored record plus this
/// call's `changes.accepted`/`changes.rejected` deltas.
#[instrument(skip_all)]
async fn post_tx(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TxSubmitRequest>,
) -> Result<Response, RefractorError> {
    let outcome = state.engine.submit(&body).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let response = TxResponse::new(outcome.record, Some(outcome.changes));
    Ok((status, Json(response)).into_response())
}

/// `GET /tx/{hash}`: fetch a stored record by its canonical hash.
#[instrument(skip_all, fields(hash = %hash))]
async fn get_tx(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Response, RefractorError> {
    if !HASH_PATH_REGEX.is_match(&hash) {
        return Err(RefractorError::Validation(format!(
            "Invalid transaction hash: {}",
            hash
        )));
    }
    let hash = TxHash::new(hash).map_err(|e| RefractorError::Validation(e.to_string()))?;
    let record = state.engine.find(&hash).await?;
    Ok(Json(TxResponse::new(record, None)).into_response())
}

/// `GET /monitoring/health`: overall service health.
#[instrument(skip_all)]
async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db = state.store.health_check().await;
    let queue = state.queue.metrics();
    let healthy = db.connected && !queue.paused;
    let status = if healthy { "ok" } else { "degraded" };
    let code = if db.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": status,
            "db": db,
            "queue": queue,
        })),
    )
}

/// `GET /monitoring/metrics`: queue and storage statistics.
#[instrument(skip_all)]
async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db = state.store.health_check().await;
    Json(json!({
        "queue": state.queue.metrics(),
        "db": db,
    }))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = &state.admin_api_key else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": {"type": "forbidden", "message": "Admin API is not configured"}})),
        )
            .into_response());
    };
    let presented = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"type": "unauthorized", "message": "Invalid API key"}})),
        )
            .into_response())
    }
}

/// `POST /monitoring/queue/pause`
#[instrument(skip_all)]
async fn post_queue_pause(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_admin(&state, &headers) {
        return denied;
    }
    state.queue.pause();
    Json(json!({"paused": true})).into_response()
}

/// `POST /monitoring/queue/resume`
#[instrument(skip_all)]
async fn post_queue_resume(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_admin(&state, &headers) {
        return denied;
    }
    state.queue.resume();
    Json(json!({"paused": false})).into_response()
}

#[derive(Deserialize)]
struct ConcurrencyBody {
    concurrency: usize,
}

/// `POST /monitoring/queue/concurrency`: manual worker-count override.
#[instrument(skip_all)]
async fn post_queue_concurrency(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ConcurrencyBody>,
) -> Response {
    if let Err(denied) = require_admin(&state, &headers) {
        return denied;
    }
    state.queue.set_concurrency(body.concurrency);
    Json(json!({"concurrency": state.queue.concurrency()})).into_response()
}

/// `POST /monitoring/cleanup/expired`: run the expiration sweep now.
#[instrument(skip_all)]
async fn post_cleanup_expired(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(denied) = require_admin(&state, &headers) {
        return denied;
    }
    match state.store.cleanup_expired(unix_now()).await {
        Ok(count) => Json(json!({"expired": count})).into_response(),
        Err(err) => RefractorError::TransientBackend(err.to_string()).into_response(),
    }
}

impl IntoResponse for RefractorError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            RefractorError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            RefractorError::UnsupportedFeature(_) => {
                (StatusCode::NOT_ACCEPTABLE, "unsupported_feature")
            }
            RefractorError::Unimplemented(_) => (StatusCode::NOT_IMPLEMENTED, "unimplemented"),
            RefractorError::HashCollision(_) => (StatusCode::CONFLICT, "hash_collision"),
            RefractorError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            RefractorError::TransientBackend(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable")
            }
            RefractorError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = json!({
            "error": {
                "type": kind,
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
