use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{diagnostics, error::AppError, insights, state::AppState};

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

/// `POST /api/pixels/{pixel_id}/diagnostics/run`: run the check catalog now.
#[tracing::instrument(skip(state))]
pub async fn run_diagnostics(
    State(state): State<Arc<AppState>>,
    Path(pixel_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let run = diagnostics::run_for_pixel(state.store(), &pixel_id, Utc::now()).await?;
    Ok(Json(json!({ "data": run })))
}

/// `GET /api/workspaces/{workspace_id}/diagnostics/summary`
#[tracing::instrument(skip(state))]
pub async fn diagnostics_summary(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let summary = diagnostics::summary(state.store(), &workspace_id).await?;
    Ok(Json(json!({ "data": summary })))
}

/// `GET /api/workspaces/{workspace_id}/diagnostics/export?format=json|csv`
#[tracing::instrument(skip(state))]
pub async fn export_diagnostics(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let format = query.format.as_deref().unwrap_or("json");
    if format != "json" && format != "csv" {
        return Err(AppError::BadRequest(format!(
            "unsupported export format: {format}"
        )));
    }

    insights::ensure_workspace(state.store(), &workspace_id).await?;
    let rows = state.store.list_workspace_diagnostics(&workspace_id).await?;
    if format == "json" {
        return Ok(Json(json!({ "data": rows })).into_response());
    }

    let csv_bytes = diagnostics::export_csv(&rows)?;
    let filename = format!(
        "diagnostics-{}-{}.csv",
        workspace_id,
        Utc::now().format("%Y%m%d")
    );
    build_csv_response(&filename, Bytes::from(csv_bytes))
}

fn build_csv_response(filename: &str, csv_bytes: Bytes) -> Result<Response, AppError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(axum::body::Body::from(csv_bytes))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("response build failed: {e}")))
}
