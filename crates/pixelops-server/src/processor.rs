//! Event processor: applies the delivery contract to a stored event and, on
//! success, folds it into its pixel's counters exactly once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use pixelops_core::delivery;
use pixelops_core::event::ProcessingState;
use pixelops_core::pixel::CounterDelta;
use pixelops_core::store::PixelStore;

use crate::pool::run_bounded;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The event moved to `processed` and its delta was applied.
    Processed,
    /// Someone else already processed it; nothing changed.
    AlreadyProcessed,
    /// The delivery contract rejected it; the reason is stored on the event.
    Failed(String),
    /// No event with that id.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReprocessSummary {
    /// Failed events in scope before the batch started.
    pub total_failed: i64,
    /// Events of the batch that ended up `processed`.
    pub reprocessed: usize,
}

pub async fn process_event(store: &dyn PixelStore, event_id: &str) -> anyhow::Result<ProcessOutcome> {
    process_event_at(store, event_id, Utc::now()).await
}

/// Process one event as of `now`.
///
/// Delivery failures are recorded on the event and reported as
/// [`ProcessOutcome::Failed`]; only storage errors are returned as `Err`.
pub async fn process_event_at(
    store: &dyn PixelStore,
    event_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<ProcessOutcome> {
    let Some(event) = store.get_event(event_id).await? else {
        return Ok(ProcessOutcome::Missing);
    };
    if event.processing_state == ProcessingState::Processed {
        return Ok(ProcessOutcome::AlreadyProcessed);
    }

    let pixel = store.get_pixel(&event.pixel_id).await?;
    match delivery::check(&event, pixel.as_ref(), now) {
        Ok(()) => {
            let delta = CounterDelta::for_event(&event);
            if store.mark_event_processed(&event.id, delta, now).await? {
                debug!(event_id = %event.id, pixel_id = %event.pixel_id, "event processed");
                Ok(ProcessOutcome::Processed)
            } else {
                Ok(ProcessOutcome::AlreadyProcessed)
            }
        }
        Err(reason) => {
            let reason = reason.to_string();
            warn!(
                event_id = %event.id,
                pixel_id = %event.pixel_id,
                reason = %reason,
                "event failed delivery"
            );
            store.mark_event_failed(&event.id, &reason).await?;
            Ok(ProcessOutcome::Failed(reason))
        }
    }
}

/// Process `event_ids` on the bounded worker pool. Returns how many ended up
/// `processed` by this call.
pub async fn process_batch(
    store: Arc<dyn PixelStore>,
    event_ids: Vec<String>,
    width: usize,
) -> usize {
    let results = run_bounded(event_ids, width, move |event_id: String| {
        let store = Arc::clone(&store);
        async move { process_event(store.as_ref(), &event_id).await }
    })
    .await;

    let mut processed = 0;
    for (event_id, result) in results {
        match result {
            Ok(ProcessOutcome::Processed) => processed += 1,
            Ok(_) => {}
            Err(e) => warn!(event_id = %event_id, error = %e, "event processing errored"),
        }
    }
    processed
}

/// Retry up to `limit` failed events, oldest first, optionally for one pixel.
pub async fn reprocess_failed_events(
    state: &AppState,
    pixel_id: Option<&str>,
    limit: usize,
) -> anyhow::Result<ReprocessSummary> {
    let total_failed = state.store.count_failed_events(pixel_id).await?;
    let event_ids = state.store.failed_event_ids(pixel_id, limit).await?;
    let attempted = event_ids.len();

    let reprocessed = process_batch(
        Arc::clone(&state.store),
        event_ids,
        state.config.worker_concurrency,
    )
    .await;

    info!(
        pixel_id = pixel_id.unwrap_or("*"),
        total_failed,
        attempted,
        reprocessed,
        "failed events reprocessed"
    );
    Ok(ReprocessSummary {
        total_failed,
        reprocessed,
    })
}
