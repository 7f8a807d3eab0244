//! HTTP front end of the MADMIN module registry
//!
//! Read endpoints serve the live snapshot and never block on a running build cycle. Review
//! and rebuild endpoints are guarded by an optional bearer token.

pub mod config;
pub mod error;

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use madmin_store::{
    BuildReport, ClientProfile, DiffResponse, IndexQuery, LookupResult, Registry, ReviewAction,
    VerificationRecord,
};

pub use config::ServerConfig;
pub use error::{ApiError, Result};

#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
    admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, admin_token: Option<String>) -> Self {
        Self {
            registry,
            admin_token: admin_token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<()> {
        let Some(expected) = &self.admin_token else {
            return Ok(());
        };
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        match presented {
            Some(token) if token == expected.as_ref() => Ok(()),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/index", get(fetch_index))
        .route("/v1/index/diff", get(diff_index))
        .route("/v1/modules/{id}", get(lookup_module))
        .route("/v1/report", get(last_report))
        .route("/v1/reviews", post(apply_review))
        .route("/v1/rebuild", post(rebuild))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    sequence: u64,
    fingerprint: String,
    modules: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let snapshot = state.registry.distribution().snapshot();
    Json(Health {
        status: "ok",
        sequence: snapshot.sequence(),
        fingerprint: snapshot.fingerprint().to_string(),
        modules: snapshot.len(),
    })
}

async fn fetch_index(
    State(state): State<AppState>,
    query: std::result::Result<Query<IndexQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Response> {
    let Query(query) = query?;
    let index = state.registry.distribution().fetch_index(&query)?;
    let etag = format!("\"{}\"", index.fingerprint);
    let etag_value =
        HeaderValue::from_str(&etag).map_err(|e| ApiError::Internal(e.to_string()))?;

    if matches_etag(&headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, [(ETAG, etag_value)]).into_response());
    }
    Ok(([(ETAG, etag_value)], Json(index)).into_response())
}

/// `If-None-Match` may hold several tags, weak ones included.
fn matches_etag(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|candidate| candidate.trim())
        .any(|candidate| {
            candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
        })
}

#[derive(Debug, Deserialize)]
struct DiffParams {
    since: u64,
}

async fn diff_index(
    State(state): State<AppState>,
    params: std::result::Result<Query<DiffParams>, QueryRejection>,
) -> Result<Json<DiffResponse>> {
    let Query(params) = params?;
    Ok(Json(state.registry.distribution().diff_since(params.since)))
}

#[derive(Debug, Default, Deserialize)]
struct ClientParams {
    client_version: Option<String>,
    os: Option<String>,
}

async fn lookup_module(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: std::result::Result<Query<ClientParams>, QueryRejection>,
) -> Result<Response> {
    let Query(params) = params?;
    let client = ClientProfile::new(params.client_version.as_deref(), params.os.as_deref());
    let result = state.registry.distribution().lookup(&id, &client);
    let status = match result {
        LookupResult::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    Ok((status, Json(result)).into_response())
}

async fn last_report(State(state): State<AppState>) -> Result<Json<BuildReport>> {
    state
        .registry
        .pipeline()
        .last_report()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no build cycle has run yet".to_string()))
}

async fn apply_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    action: std::result::Result<Json<ReviewAction>, JsonRejection>,
) -> Result<Json<VerificationRecord>> {
    state.authorize(&headers)?;
    let Json(action) = action?;
    if action.reviewer.trim().is_empty() {
        return Err(ApiError::BadRequest("reviewer must not be empty".to_string()));
    }
    let record = state.registry.review(action).await?;
    Ok(Json(record))
}

async fn rebuild(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BuildReport>> {
    state.authorize(&headers)?;
    Ok(Json(state.registry.rebuild().await))
}

/// Serve `state` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_etag() {
        let mut headers = HeaderMap::new();
        assert!(!matches_etag(&headers, "\"abc\""));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"old\", W/\"abc\""));
        assert!(matches_etag(&headers, "\"abc\""));
        assert!(!matches_etag(&headers, "\"xyz\""));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(matches_etag(&headers, "\"xyz\""));
    }
}
