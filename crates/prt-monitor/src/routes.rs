//! HTTP API over the pipeline

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use prt_client::HttpKeyProvider;
use prt_core::ScriptBlockingScope;

use crate::error::{Result, ServerError};
use crate::pipeline::{ProcessedToken, PrtPipeline};
use crate::stats::{OriginStatistics, StatisticsSnapshot};
use crate::tabs::TabTokens;
use crate::TabId;

/// Server state
pub struct AppState {
    pub pipeline: Arc<PrtPipeline<HttpKeyProvider>>,
    /// `None` when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub tabs: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserveRequest {
    pub tab_id: TabId,
    pub origin: String,
    pub header: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserveResponse {
    pub tab_id: TabId,
    pub origin: String,
    pub epoch_id_base64: String,
    pub version: u8,
    pub ordinal: u8,
    pub signal: String,
    pub hmac_valid: bool,
    pub plaintext: String,
    pub first_seen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_blocking_scope: Option<ScriptBlockingScope>,
}

impl From<ProcessedToken> for ObserveResponse {
    fn from(processed: ProcessedToken) -> Self {
        Self {
            tab_id: processed.tab_id,
            origin: processed.origin,
            epoch_id_base64: processed.epoch_id_base64,
            version: processed.plaintext.version,
            ordinal: processed.plaintext.ordinal,
            signal: hex::encode(processed.plaintext.signal),
            hmac_valid: processed.plaintext.hmac_valid,
            plaintext: processed.plaintext_hex,
            first_seen: processed.first_seen,
            script_blocking_scope: processed
                .classification
                .map(|c| c.script_blocking_scope),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatsResponse {
    pub global_view: OriginStatistics,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/observe", post(observe))
        .route("/tabs/:tab_id", post(init_tab).delete(teardown_tab))
        .route("/tabs/:tab_id/tokens", get(tab_tokens))
        .route("/tabs/:tab_id/stats", get(tab_stats))
        .route("/stats", get(global_stats))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        tabs: state.pipeline.tabs().tab_count(),
    })
}

async fn init_tab(State(state): State<Arc<AppState>>, Path(tab_id): Path<TabId>) -> StatusCode {
    state.pipeline.init_tab(tab_id);
    StatusCode::NO_CONTENT
}

async fn teardown_tab(
    State(state): State<Arc<AppState>>,
    Path(tab_id): Path<TabId>,
) -> Result<StatusCode> {
    if state.pipeline.teardown_tab(tab_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::TabNotTracked(tab_id))
    }
}

async fn observe(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ObserveRequest>,
) -> Result<Json<ObserveResponse>> {
    if request.header.trim().is_empty() {
        return Err(ServerError::InvalidRequest("empty header".into()));
    }

    let processed = state
        .pipeline
        .process(request.tab_id, &request.origin, &request.header)
        .await?;
    Ok(Json(processed.into()))
}

async fn tab_tokens(
    State(state): State<Arc<AppState>>,
    Path(tab_id): Path<TabId>,
) -> Result<Json<TabTokens>> {
    state
        .pipeline
        .tabs()
        .snapshot(tab_id)
        .map(Json)
        .ok_or(ServerError::TabNotTracked(tab_id))
}

async fn tab_stats(
    State(state): State<Arc<AppState>>,
    Path(tab_id): Path<TabId>,
) -> Result<Json<StatisticsSnapshot>> {
    let snapshot = state.pipeline.stats().snapshot(tab_id);
    if snapshot.local_view.is_none() {
        return Err(ServerError::TabNotTracked(tab_id));
    }
    Ok(Json(snapshot))
}

async fn global_stats(State(state): State<Arc<AppState>>) -> Json<GlobalStatsResponse> {
    Json(GlobalStatsResponse {
        global_view: state.pipeline.stats().global_view(),
    })
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> Result<String> {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or(ServerError::MetricsDisabled)
}
