use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub events_deleted: usize,
    pub diagnostics_deleted: usize,
    pub pixels_parked: usize,
}

/// Daily housekeeping as of `now`: expire old events, purge long-resolved
/// diagnostics and park pixels that went quiet.
pub async fn run_cleanup(state: &AppState, now: DateTime<Utc>) -> anyhow::Result<CleanupSummary> {
    let cfg = &state.config;

    let event_cutoff = now - Duration::days(i64::from(cfg.event_retention_days));
    let events_deleted = state.store.delete_events_before(event_cutoff).await?;

    let diagnostic_cutoff = now - Duration::days(i64::from(cfg.diagnostic_retention_days));
    let diagnostics_deleted = state
        .store
        .delete_resolved_diagnostics_before(diagnostic_cutoff)
        .await?;

    let idle_since = now - Duration::days(i64::from(cfg.idle_pixel_days));
    let pixels_parked = state.store.park_idle_pixels(idle_since).await?;

    let summary = CleanupSummary {
        events_deleted,
        diagnostics_deleted,
        pixels_parked,
    };
    info!(
        events_deleted,
        diagnostics_deleted,
        pixels_parked,
        "retention cleanup finished"
    );
    Ok(summary)
}
