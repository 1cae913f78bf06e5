//! Event ingestion. Requests are validated and persisted synchronously;
//! processing happens afterwards on a spawned task.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use pixelops_core::event::{CreateEventRequest, Event};

use crate::error::AppError;
use crate::processor::process_batch;
use crate::state::AppState;

/// Upper bound on events accepted by one bulk request.
pub const MAX_BULK_EVENTS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct BulkCreated {
    pub created: usize,
    pub events: Vec<Event>,
}

fn validate_request(req: &CreateEventRequest) -> Result<(), AppError> {
    if req.pixel_id.trim().is_empty() {
        return Err(AppError::BadRequest("pixel_id is required".to_string()));
    }
    if req.event_name.trim().is_empty() {
        return Err(AppError::BadRequest("event_name is required".to_string()));
    }
    Ok(())
}

async fn ensure_pixels_exist(state: &AppState, pixel_ids: &[&str]) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for &pixel_id in pixel_ids {
        if !seen.insert(pixel_id) {
            continue;
        }
        if state.store.get_pixel(pixel_id).await?.is_none() {
            return Err(AppError::NotFound(format!("pixel {pixel_id} not found")));
        }
    }
    Ok(())
}

/// Hand freshly stored events to the processor without waiting for it.
fn spawn_processing(state: &AppState, event_ids: Vec<String>) {
    let store = Arc::clone(&state.store);
    let width = state.config.worker_concurrency;
    tokio::spawn(async move {
        let total = event_ids.len();
        let processed = process_batch(store, event_ids, width).await;
        debug!(total, processed, "ingested events processed");
    });
}

/// Store one event as `pending` and schedule its processing.
///
/// The returned event reflects the stored state at the time of the call,
/// so it is always `pending`.
pub async fn create_event(state: &AppState, req: CreateEventRequest) -> Result<Event, AppError> {
    validate_request(&req)?;
    ensure_pixels_exist(state, &[req.pixel_id.as_str()]).await?;

    let event = Event::from_request(req, Utc::now());
    state.store.insert_events(std::slice::from_ref(&event)).await?;
    spawn_processing(state, vec![event.id.clone()]);
    Ok(event)
}

/// Store up to [`MAX_BULK_EVENTS`] events atomically and schedule their
/// processing. One invalid entry rejects the whole batch.
pub async fn bulk_create_events(
    state: &AppState,
    requests: Vec<CreateEventRequest>,
) -> Result<BulkCreated, AppError> {
    if requests.len() > MAX_BULK_EVENTS {
        return Err(AppError::BatchTooLarge(requests.len()));
    }
    if requests.is_empty() {
        return Err(AppError::BadRequest(
            "events must contain at least one event".to_string(),
        ));
    }
    for req in &requests {
        validate_request(req)?;
    }
    let pixel_ids: Vec<&str> = requests.iter().map(|r| r.pixel_id.as_str()).collect();
    ensure_pixels_exist(state, &pixel_ids).await?;

    let now = Utc::now();
    let events: Vec<Event> = requests
        .into_iter()
        .map(|req| Event::from_request(req, now))
        .collect();
    state.store.insert_events(&events).await?;

    info!(count = events.len(), "bulk events accepted");
    spawn_processing(state, events.iter().map(|e| e.id.clone()).collect());
    Ok(BulkCreated {
        created: events.len(),
        events,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pixelops_core::config::Config;
    use pixelops_core::event::{EventSource, EventType, ProcessingState};
    use pixelops_core::pixel::NewPixel;
    use pixelops_core::store::PixelStore;
    use pixelops_duckdb::DuckDbBackend;

    use super::*;

    async fn state() -> AppState {
        let db = DuckDbBackend::open_in_memory().expect("open");
        db.create_pixel(&NewPixel::active("px_1", "ws_1"))
            .await
            .expect("pixel");
        AppState::new(db, Config::default())
    }

    fn request(pixel_id: &str, name: &str) -> CreateEventRequest {
        CreateEventRequest {
            pixel_id: pixel_id.to_string(),
            event_name: name.to_string(),
            event_type: EventType::Standard,
            parameters: Default::default(),
            source: EventSource::Server,
            timestamp: None,
        }
    }

    async fn wait_until_settled(state: &AppState, event_id: &str) -> ProcessingState {
        for _ in 0..200 {
            let event = state
                .store
                .get_event(event_id)
                .await
                .expect("get")
                .expect("event");
            if event.processing_state != ProcessingState::Pending {
                return event.processing_state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        ProcessingState::Pending
    }

    #[tokio::test]
    async fn created_event_is_pending_then_processed() {
        let state = state().await;
        let event = create_event(&state, request("px_1", "PageView"))
            .await
            .expect("create");
        assert_eq!(event.processing_state, ProcessingState::Pending);
        assert_eq!(
            wait_until_settled(&state, &event.id).await,
            ProcessingState::Processed
        );
    }

    #[tokio::test]
    async fn unknown_pixel_is_not_found() {
        let state = state().await;
        let err = create_event(&state, request("px_missing", "PageView"))
            .await
            .expect_err("unknown pixel");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn blank_event_name_is_rejected() {
        let state = state().await;
        let err = create_event(&state, request("px_1", "  "))
            .await
            .expect_err("blank name");
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn bulk_over_limit_is_rejected_without_storing() {
        let state = state().await;
        let requests = (0..=MAX_BULK_EVENTS)
            .map(|_| request("px_1", "PageView"))
            .collect();
        let err = bulk_create_events(&state, requests)
            .await
            .expect_err("too many");
        assert!(matches!(err, AppError::BatchTooLarge(101)));
        assert!(state
            .store
            .events_for_pixel("px_1", None)
            .await
            .expect("events")
            .is_empty());
    }

    #[tokio::test]
    async fn bulk_with_one_bad_pixel_stores_nothing() {
        let state = state().await;
        let requests = vec![request("px_1", "PageView"), request("px_other", "PageView")];
        let err = bulk_create_events(&state, requests)
            .await
            .expect_err("bad pixel");
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(state
            .store
            .events_for_pixel("px_1", None)
            .await
            .expect("events")
            .is_empty());
    }

    #[tokio::test]
    async fn bulk_at_limit_is_accepted() {
        let state = state().await;
        let requests = (0..MAX_BULK_EVENTS)
            .map(|_| request("px_1", "ViewContent"))
            .collect();
        let created = bulk_create_events(&state, requests).await.expect("bulk");
        assert_eq!(created.created, MAX_BULK_EVENTS);
        assert_eq!(created.events.len(), MAX_BULK_EVENTS);
    }

    #[tokio::test]
    async fn bulk_spanning_pixels_is_accepted() {
        let state = state().await;
        state
            .store
            .create_pixel(&NewPixel::active("px_2", "ws_1"))
            .await
            .expect("pixel 2");
        let requests = vec![
            request("px_1", "PageView"),
            request("px_2", "PageView"),
            request("px_1", "Lead"),
        ];
        let created = bulk_create_events(&state, requests).await.expect("bulk");
        assert_eq!(created.created, 3);
        assert_eq!(
            state
                .store
                .events_for_pixel("px_2", None)
                .await
                .expect("events")
                .len(),
            1
        );
    }
}
