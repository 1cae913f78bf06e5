//! Full recompute of persisted aggregates from raw processed events.
//!
//! The incremental counters written by the processor can drift (retention
//! deletes, manual repairs). This job overwrites them with the reduction
//! defined in `pixelops_core::analytics`; the store applies it atomically so
//! increments landing during the run survive.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use pixelops_core::analytics::conversion_summary;
use pixelops_core::error::CoreError;
use pixelops_core::store::PixelStore;

use crate::pool::run_bounded;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollupSummary {
    pub pixels: usize,
    pub updated: usize,
    pub failed: usize,
    pub conversions_updated: usize,
}

/// Recompute one pixel's counters and the summaries of its conversions.
/// Returns the number of conversions written.
pub async fn recompute_pixel(store: &dyn PixelStore, pixel_id: &str) -> Result<usize, CoreError> {
    let aggregation = |source: anyhow::Error| CoreError::Aggregation {
        pixel_id: pixel_id.to_string(),
        source,
    };

    store
        .recompute_pixel_counters(pixel_id)
        .await
        .map_err(aggregation)?;

    let events = store
        .events_for_pixel(pixel_id, None)
        .await
        .map_err(aggregation)?;

    let conversions = store.list_conversions(pixel_id).await.map_err(aggregation)?;
    for conversion in &conversions {
        let summary = conversion_summary(&events, conversion);
        store
            .set_conversion_summary(&conversion.id, &summary)
            .await
            .map_err(aggregation)?;
    }
    Ok(conversions.len())
}

/// Recompute every pixel. Each pixel is written independently; a failure is
/// logged and counted without aborting the rest.
pub async fn generate_analytics(state: &AppState) -> anyhow::Result<RollupSummary> {
    let pixel_ids: Vec<String> = state
        .store
        .list_pixels(None)
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();

    let store = Arc::clone(&state.store);
    let mut summary = RollupSummary {
        pixels: pixel_ids.len(),
        ..RollupSummary::default()
    };
    let results = run_bounded(
        pixel_ids,
        state.config.worker_concurrency,
        move |pixel_id: String| {
            let store = Arc::clone(&store);
            async move {
                recompute_pixel(store.as_ref(), &pixel_id)
                    .await
                    .map_err(anyhow::Error::new)
            }
        },
    )
    .await;

    for (pixel_id, result) in results {
        match result {
            Ok(conversions) => {
                summary.updated += 1;
                summary.conversions_updated += conversions;
            }
            Err(e) => {
                summary.failed += 1;
                error!(pixel_id = %pixel_id, error = %e, "analytics recompute failed");
            }
        }
    }

    info!(
        pixels = summary.pixels,
        updated = summary.updated,
        failed = summary.failed,
        conversions = summary.conversions_updated,
        "analytics recompute finished"
    );
    Ok(summary)
}
