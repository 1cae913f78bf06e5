//! Diagnostic engine: builds a snapshot per pixel, runs the check catalog and
//! reconciles the stored findings with the outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use pixelops_core::diagnostics::{
    evaluate, CheckOutcome, Diagnostic, PixelSnapshot, PurchaseCompleteness,
};
use pixelops_core::error::CoreError;
use pixelops_core::event::PURCHASE_EVENT;
use pixelops_core::pixel::Pixel;
use pixelops_core::store::PixelStore;

use crate::insights::ensure_workspace;
use crate::pool::run_bounded;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRun {
    pub pixel_id: String,
    /// Checks that were evaluated; skipped checks are not counted.
    pub diagnostics_run: usize,
    /// Checks that produced a finding.
    pub issues: usize,
    /// Checks skipped because an input could not be loaded.
    pub skipped: Vec<&'static str>,
    pub results: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchRunSummary {
    pub pixels: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub issues: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticsSummary {
    pub total: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
}

/// Load the snapshot for `pixel`. Each query-backed input is loaded on its
/// own; a failed query leaves that input empty and is logged.
pub async fn build_snapshot(
    store: &dyn PixelStore,
    pixel: &Pixel,
    now: DateTime<Utc>,
) -> PixelSnapshot {
    let last_hour = match store.window_counts(&pixel.id, now - Duration::hours(1)).await {
        Ok(counts) => Some(counts),
        Err(source) => {
            let err = CoreError::DiagnosticCheck {
                check: "window_counts",
                pixel_id: pixel.id.clone(),
                source,
            };
            warn!(error = %err, "diagnostic input unavailable");
            None
        }
    };

    let purchases_last_day = match store
        .events_named(&pixel.id, PURCHASE_EVENT, now - Duration::hours(24))
        .await
    {
        Ok(events) => Some(PurchaseCompleteness::from_events(&events)),
        Err(source) => {
            let err = CoreError::DiagnosticCheck {
                check: "purchase_completeness",
                pixel_id: pixel.id.clone(),
                source,
            };
            warn!(error = %err, "diagnostic input unavailable");
            None
        }
    };

    PixelSnapshot {
        pixel_id: pixel.id.clone(),
        status: pixel.status,
        last_activity: pixel.last_activity,
        now,
        last_hour,
        purchases_last_day,
    }
}

/// Run every check for one pixel and persist the outcome.
///
/// A firing check upserts its finding; a passing check resolves the active
/// finding with its title; a skipped check leaves storage untouched.
pub async fn run_for_pixel(
    store: &dyn PixelStore,
    pixel_id: &str,
    now: DateTime<Utc>,
) -> Result<DiagnosticRun, CoreError> {
    let pixel = store
        .get_pixel(pixel_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("pixel {pixel_id}")))?;

    let snapshot = build_snapshot(store, &pixel, now).await;
    let mut run = DiagnosticRun {
        pixel_id: pixel.id.clone(),
        diagnostics_run: 0,
        issues: 0,
        skipped: Vec::new(),
        results: Vec::new(),
    };

    for (check, outcome) in evaluate(&snapshot) {
        match outcome {
            CheckOutcome::Skipped => {
                run.skipped.push(check.name);
            }
            CheckOutcome::Pass => {
                run.diagnostics_run += 1;
                if store.resolve_diagnostic(&pixel.id, check.title, now).await? {
                    info!(pixel_id = %pixel.id, title = check.title, "diagnostic resolved");
                }
            }
            CheckOutcome::Fire(draft) => {
                run.diagnostics_run += 1;
                run.issues += 1;
                let stored = store.upsert_diagnostic(&draft, now).await?;
                run.results.push(stored);
            }
        }
    }

    Ok(run)
}

/// Run the engine for each pixel on the bounded worker pool. A failing pixel
/// is logged and counted; it does not stop the others.
pub async fn run_for_pixels(state: &AppState, pixel_ids: Vec<String>) -> BatchRunSummary {
    let store = Arc::clone(&state.store);
    let now = Utc::now();
    let pixels = pixel_ids.len();
    let results = run_bounded(
        pixel_ids,
        state.config.worker_concurrency,
        move |pixel_id: String| {
            let store = Arc::clone(&store);
            async move {
                run_for_pixel(store.as_ref(), &pixel_id, now)
                    .await
                    .map_err(anyhow::Error::new)
            }
        },
    )
    .await;

    let mut summary = BatchRunSummary {
        pixels,
        ..BatchRunSummary::default()
    };
    for (pixel_id, result) in results {
        match result {
            Ok(run) => {
                summary.succeeded += 1;
                summary.issues += run.issues;
            }
            Err(e) => {
                summary.failed += 1;
                warn!(pixel_id = %pixel_id, error = %e, "diagnostic run failed");
            }
        }
    }
    summary
}

/// Scheduled batch: every known pixel.
pub async fn run_for_all_pixels(state: &AppState) -> anyhow::Result<BatchRunSummary> {
    let pixel_ids = state
        .store
        .list_pixels(None)
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
    let summary = run_for_pixels(state, pixel_ids).await;
    info!(
        pixels = summary.pixels,
        failed = summary.failed,
        issues = summary.issues,
        "diagnostic batch finished"
    );
    Ok(summary)
}

pub async fn summary(
    store: &dyn PixelStore,
    workspace_id: &str,
) -> Result<DiagnosticsSummary, CoreError> {
    ensure_workspace(store, workspace_id).await?;
    let diagnostics = store.list_workspace_diagnostics(workspace_id).await?;
    let mut out = DiagnosticsSummary {
        total: diagnostics.len(),
        ..DiagnosticsSummary::default()
    };
    for d in &diagnostics {
        *out.by_severity.entry(d.severity.as_str().to_string()).or_insert(0) += 1;
        *out.by_category.entry(d.category.as_str().to_string()).or_insert(0) += 1;
        *out.by_status.entry(d.status.as_str().to_string()).or_insert(0) += 1;
    }
    Ok(out)
}

/// One export row, in column order.
fn export_record(d: &Diagnostic) -> Vec<(&'static str, String)> {
    vec![
        ("id", d.id.clone()),
        ("pixel_id", d.pixel_id.clone()),
        ("severity", d.severity.as_str().to_string()),
        ("category", d.category.as_str().to_string()),
        ("title", d.title.clone()),
        ("description", d.description.clone()),
        ("status", d.status.as_str().to_string()),
        ("last_checked_at", d.last_checked_at.to_rfc3339()),
        ("created_at", d.created_at.to_rfc3339()),
        (
            "resolved_at",
            d.resolved_at.map(|ts| ts.to_rfc3339()).unwrap_or_default(),
        ),
    ]
}

/// Prefix spreadsheet formula triggers so the cell is read as text.
fn sanitize_csv_field(val: &str) -> std::borrow::Cow<'_, str> {
    if val.starts_with(['=', '+', '-', '@', '\t', '\r']) {
        std::borrow::Cow::Owned(format!("'{val}"))
    } else {
        std::borrow::Cow::Borrowed(val)
    }
}

/// CSV with the first record's keys as header and every field quoted.
/// An empty input yields an empty document.
pub fn export_csv(diagnostics: &[Diagnostic]) -> anyhow::Result<Vec<u8>> {
    let records: Vec<Vec<(&'static str, String)>> = diagnostics.iter().map(export_record).collect();
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::with_capacity(records.len().saturating_mul(256)));

    if let Some(first) = records.first() {
        wtr.write_record(first.iter().map(|(key, _)| *key))
            .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;
    }
    for record in &records {
        wtr.write_record(record.iter().map(|(_, val)| sanitize_csv_field(val).into_owned()))
            .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;
    }

    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("csv flush failed: {e}"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use pixelops_core::diagnostics::{Category, DiagnosticStatus, Severity};

    use super::*;

    fn diagnostic(title: &str, description: &str) -> Diagnostic {
        let ts = Utc
            .with_ymd_and_hms(2024, 1, 2, 3, 4, 5)
            .single()
            .expect("ts");
        Diagnostic {
            id: "d1".to_string(),
            pixel_id: "px_1".to_string(),
            severity: Severity::Warning,
            category: Category::Events,
            title: title.to_string(),
            description: description.to_string(),
            status: DiagnosticStatus::Active,
            last_checked_at: ts,
            created_at: ts,
            resolved_at: None,
        }
    }

    #[test]
    fn csv_quotes_every_field_and_doubles_quotes() {
        let csv = export_csv(&[diagnostic("Pixel status", r#"said "hi""#)]).expect("csv");
        let text = String::from_utf8(csv).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some(r#""id","pixel_id","severity","category","title","description","status","last_checked_at","created_at","resolved_at""#)
        );
        let row = lines.next().expect("row");
        assert!(row.starts_with(
            r#""d1","px_1","warning","events","Pixel status","said ""hi""","active","#
        ));
        assert!(row.ends_with(r#","""#));
    }

    #[test]
    fn csv_neutralises_formulas() {
        let csv = export_csv(&[diagnostic("=HYPERLINK(\"x\")", "ok")]).expect("csv");
        let text = String::from_utf8(csv).expect("utf8");
        assert!(text.contains(r#""'=HYPERLINK(""x"")""#));
    }

    #[test]
    fn empty_export_has_no_header() {
        assert!(export_csv(&[]).expect("csv").is_empty());
    }
}
