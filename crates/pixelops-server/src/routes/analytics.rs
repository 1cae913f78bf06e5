use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use pixelops_core::analytics::{FunnelStepDef, Timeframe};

use crate::{
    error::AppError,
    insights::{self, Scope},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub pixel_id: Option<String>,
    pub timeframe: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FunnelRequest {
    pub pixel_id: Option<String>,
    pub timeframe: Option<String>,
    pub steps: Option<Vec<FunnelStepDef>>,
}

fn scope(workspace_id: String, pixel_id: Option<String>) -> Scope {
    Scope {
        workspace_id,
        pixel_id: pixel_id.filter(|p| !p.trim().is_empty()),
    }
}

/// `GET /api/workspaces/{workspace_id}/analytics/events`
#[tracing::instrument(skip(state))]
pub async fn events_analytics(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let timeframe = Timeframe::parse(query.timeframe.as_deref())?;
    let scope = scope(workspace_id, query.pixel_id);
    let result = insights::events_analytics(state.store(), &scope, timeframe, Utc::now()).await?;
    Ok(Json(json!({ "data": result })))
}

/// `GET /api/workspaces/{workspace_id}/analytics/conversions`
#[tracing::instrument(skip(state))]
pub async fn conversions_analytics(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let timeframe = Timeframe::parse(query.timeframe.as_deref())?;
    let scope = scope(workspace_id, query.pixel_id);
    let result =
        insights::conversions_analytics(state.store(), &scope, timeframe, Utc::now()).await?;
    Ok(Json(json!({ "data": result })))
}

/// `POST /api/workspaces/{workspace_id}/analytics/funnel`
///
/// Without `steps` the default e-commerce funnel is used.
#[tracing::instrument(skip(state, body))]
pub async fn funnel_analytics(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    body: Result<Json<FunnelRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let timeframe = Timeframe::parse(req.timeframe.as_deref())?;
    let scope = scope(workspace_id, req.pixel_id);
    let result =
        insights::funnel_analytics(state.store(), &scope, timeframe, req.steps, Utc::now())
            .await?;
    Ok(Json(json!({ "data": result })))
}
