//! Endpoint handlers over the coordinator.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::response::{ApiResult, Reply};
use crate::config::defaults::DEFAULT_EVENT_PAGE;
use crate::coordinator::{CoordinatorState, SelfHealingCoordinator};
use crate::types::{AnomalyPattern, HealingEvent, HealingStats, HealthReport};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<SelfHealingCoordinator>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RollbackRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub state: CoordinatorState,
    pub detector_trained: bool,
    pub report: HealthReport,
}

#[derive(Debug, Serialize)]
pub struct PatternsResponse {
    pub count: usize,
    pub patterns: Vec<AnomalyPattern>,
}

#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    pub patch_id: String,
    pub rolled_back: bool,
    pub reason: String,
}

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> ApiResult<HealthResponse> {
    let c = &state.coordinator;
    let report = c.monitor().health_report()?;
    Ok(Reply(HealthResponse {
        state: c.state(),
        detector_trained: c.detector().is_trained(),
        report,
    }))
}

/// GET /api/v1/events?limit=50
pub async fn events(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> Reply<Vec<HealingEvent>> {
    let limit = q.limit.unwrap_or(DEFAULT_EVENT_PAGE).min(1000);
    Reply(state.coordinator.events(limit))
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<ApiState>) -> Reply<HealingStats> {
    Reply(state.coordinator.healing_stats())
}

/// GET /api/v1/patterns
pub async fn patterns(State(state): State<ApiState>) -> Reply<PatternsResponse> {
    let patterns = state.coordinator.detector().patterns();
    Reply(PatternsResponse {
        count: patterns.len(),
        patterns,
    })
}

/// POST /api/v1/rollback/:patch_id
pub async fn rollback(
    State(state): State<ApiState>,
    Path(patch_id): Path<String>,
    body: Option<axum::Json<RollbackRequest>>,
) -> ApiResult<RollbackResponse> {
    let reason = body
        .and_then(|axum::Json(r)| r.reason)
        .unwrap_or_else(|| "operator request".to_string());
    state.coordinator.rollback(&patch_id, &reason).await?;
    Ok(Reply(RollbackResponse {
        patch_id,
        rolled_back: true,
        reason,
    }))
}
