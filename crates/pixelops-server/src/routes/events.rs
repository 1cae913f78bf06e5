use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use pixelops_core::event::CreateEventRequest;

use crate::{error::AppError, ingest, processor, state::AppState};

/// Upper bound for an on-demand reprocess request.
const MAX_REPROCESS_LIMIT: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct BulkEventsRequest {
    pub events: Vec<CreateEventRequest>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReprocessRequest {
    pub pixel_id: Option<String>,
    pub limit: Option<usize>,
}

fn bad_json(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

/// `POST /api/events`: store one event; processing happens asynchronously.
#[tracing::instrument(skip(state, body))]
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateEventRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body.map_err(bad_json)?;
    let event = ingest::create_event(&state, req).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "data": event }))))
}

/// `POST /api/events/bulk`: store up to 100 events in one transaction.
#[tracing::instrument(skip(state, body))]
pub async fn bulk_create_events(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BulkEventsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body.map_err(bad_json)?;
    let created = ingest::bulk_create_events(&state, req.events).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "data": created }))))
}

/// `POST /api/events/reprocess`: retry failed events now.
///
/// `limit` defaults to the configured retry batch size.
#[tracing::instrument(skip(state, body))]
pub async fn reprocess_failed_events(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ReprocessRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body.map_err(bad_json)?;
    let limit = req
        .limit
        .unwrap_or(state.config.retry_batch_limit)
        .min(MAX_REPROCESS_LIMIT);
    if limit == 0 {
        return Err(AppError::BadRequest("limit must be positive".to_string()));
    }
    let summary =
        processor::reprocess_failed_events(&state, req.pixel_id.as_deref(), limit).await?;
    Ok(Json(json!({ "data": summary })))
}
