use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use pixelops_core::analytics::{Conversion, ConversionSummary};
use pixelops_core::diagnostics::{Category, DiagnosticDraft, DiagnosticStatus, Severity};
use pixelops_core::event::{CreateEventRequest, Event, EventSource, EventType, ProcessingState};
use pixelops_core::pixel::{CounterDelta, NewPixel, PixelStatus, INACTIVITY_REASON};
use pixelops_core::rules::{Operator, Rule, RuleType};
use pixelops_core::store::PixelStore;
use pixelops_duckdb::DuckDbBackend;

fn event(pixel_id: &str, name: &str, params: serde_json::Value) -> Event {
    event_at(pixel_id, name, params, Utc::now())
}

fn event_at(pixel_id: &str, name: &str, params: serde_json::Value, at: DateTime<Utc>) -> Event {
    Event::from_request(
        CreateEventRequest {
            pixel_id: pixel_id.to_string(),
            event_name: name.to_string(),
            event_type: EventType::Standard,
            parameters: params.as_object().cloned().unwrap_or_default(),
            source: EventSource::Web,
            timestamp: Some(at),
        },
        at,
    )
}

async fn seeded() -> DuckDbBackend {
    let db = DuckDbBackend::open_in_memory().expect("open in-memory duckdb");
    db.create_pixel(&NewPixel::active("px_a", "ws_1"))
        .await
        .expect("pixel a");
    db.create_pixel(&NewPixel::active("px_b", "ws_1"))
        .await
        .expect("pixel b");
    db.create_pixel(&NewPixel::active("px_c", "ws_2"))
        .await
        .expect("pixel c");
    db
}

#[tokio::test]
async fn test_store_is_object_safe() {
    let db = seeded().await;
    let store: std::sync::Arc<dyn PixelStore> = std::sync::Arc::new(db);
    store.ping().await.expect("ping");
    assert_eq!(store.list_pixels(None).await.expect("list").len(), 3);
    assert_eq!(store.list_pixels(Some("ws_1")).await.expect("list").len(), 2);
}

#[tokio::test]
async fn test_duplicate_pixel_rejected() {
    let db = seeded().await;
    let err = db
        .create_pixel(&NewPixel::active("px_a", "ws_1"))
        .await
        .expect_err("duplicate id");
    assert!(err.to_string().contains("duplicate_pixel"));
}

#[tokio::test]
async fn test_events_round_trip_parameters_and_state() {
    let db = seeded().await;
    let e = event("px_a", "Purchase", json!({"value": 42.5, "currency": "USD", "items": [1, 2]}));
    db.insert_events(std::slice::from_ref(&e)).await.expect("insert");

    let loaded = db.get_event(&e.id).await.expect("get").expect("exists");
    assert_eq!(loaded.parameters, e.parameters);
    assert_eq!(loaded.processing_state, ProcessingState::Pending);
    // DuckDB keeps microsecond precision.
    assert_eq!(
        loaded.timestamp.timestamp_micros(),
        e.timestamp.timestamp_micros()
    );
    assert!(db.get_event("missing").await.expect("get").is_none());
}

#[tokio::test]
async fn test_mark_processed_applies_delta_exactly_once() {
    let db = seeded().await;
    let e = event("px_a", "Purchase", json!({"value": 40}));
    db.insert_events(std::slice::from_ref(&e)).await.expect("insert");
    let delta = CounterDelta::for_event(&e);
    let now = Utc::now();

    assert!(db.mark_event_processed(&e.id, delta, now).await.expect("first"));
    assert!(!db.mark_event_processed(&e.id, delta, now).await.expect("second"));

    let pixel = db.get_pixel("px_a").await.expect("get").expect("exists");
    assert_eq!(pixel.events_count, 1);
    assert_eq!(pixel.conversions_count, 1);
    assert!((pixel.revenue_total - 40.0).abs() < f64::EPSILON);
    assert!(pixel.last_activity.is_some());

    let loaded = db.get_event(&e.id).await.expect("get").expect("exists");
    assert_eq!(loaded.processing_state, ProcessingState::Processed);
    assert!(loaded.processed_at.is_some());
}

#[tokio::test]
async fn test_failed_event_can_be_processed_but_processed_never_fails() {
    let db = seeded().await;
    let e = event("px_a", "PageView", json!({}));
    db.insert_events(std::slice::from_ref(&e)).await.expect("insert");

    assert!(db.mark_event_failed(&e.id, "boom").await.expect("fail"));
    assert_eq!(db.count_failed_events(Some("px_a")).await.expect("count"), 1);
    assert_eq!(db.count_failed_events(Some("px_b")).await.expect("count"), 0);

    let delta = CounterDelta::for_event(&e);
    assert!(db.mark_event_processed(&e.id, delta, Utc::now()).await.expect("retry"));
    let loaded = db.get_event(&e.id).await.expect("get").expect("exists");
    assert_eq!(loaded.processing_state, ProcessingState::Processed);
    assert!(loaded.error_reason.is_none());

    assert!(!db.mark_event_failed(&e.id, "late").await.expect("fail again"));
    let loaded = db.get_event(&e.id).await.expect("get").expect("exists");
    assert_eq!(loaded.processing_state, ProcessingState::Processed);
}

#[tokio::test]
async fn test_processing_reactivates_pixel_parked_for_inactivity() {
    let db = seeded().await;
    let old = event("px_a", "PageView", json!({}));
    db.insert_events(std::slice::from_ref(&old)).await.expect("insert");
    let long_ago = Utc::now() - Duration::days(30);
    db.mark_event_processed(&old.id, CounterDelta::for_event(&old), long_ago)
        .await
        .expect("process old");

    let parked = db
        .park_idle_pixels(Utc::now() - Duration::days(7))
        .await
        .expect("park");
    // px_b and px_c never reported and stay active.
    assert_eq!(parked, 1);
    let pixel = db.get_pixel("px_a").await.expect("get").expect("exists");
    assert_eq!(pixel.status, PixelStatus::Inactive);
    assert_eq!(pixel.status_reason.as_deref(), Some(INACTIVITY_REASON));

    let fresh = event("px_a", "PageView", json!({}));
    db.insert_events(std::slice::from_ref(&fresh)).await.expect("insert");
    db.mark_event_processed(&fresh.id, CounterDelta::for_event(&fresh), Utc::now())
        .await
        .expect("process fresh");

    let pixel = db.get_pixel("px_a").await.expect("get").expect("exists");
    assert_eq!(pixel.status, PixelStatus::Active);
    assert!(pixel.status_reason.is_none());
    assert_eq!(pixel.events_count, 2);
}

#[tokio::test]
async fn test_manual_error_status_is_not_cleared_by_processing() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    db.create_pixel(&NewPixel {
        id: "px_err".to_string(),
        workspace_id: "ws_1".to_string(),
        name: "Broken".to_string(),
        status: PixelStatus::Error,
        status_reason: Some("revoked token".to_string()),
    })
    .await
    .expect("pixel");

    let e = event("px_err", "PageView", json!({}));
    db.insert_events(std::slice::from_ref(&e)).await.expect("insert");
    db.mark_event_processed(&e.id, CounterDelta::for_event(&e), Utc::now())
        .await
        .expect("process");

    let pixel = db.get_pixel("px_err").await.expect("get").expect("exists");
    assert_eq!(pixel.status, PixelStatus::Error);
    assert_eq!(pixel.status_reason.as_deref(), Some("revoked token"));
}

#[tokio::test]
async fn test_failed_ids_are_oldest_first_and_limited() {
    let db = seeded().await;
    let mut batch = Vec::new();
    for i in 0..5 {
        let mut e = event("px_a", "PageView", json!({}));
        e.timestamp = Utc::now() - Duration::minutes(10 - i);
        batch.push(e);
    }
    db.insert_events(&batch).await.expect("insert");
    for e in &batch {
        db.mark_event_failed(&e.id, "nope").await.expect("fail");
    }

    let ids = db.failed_event_ids(None, 3).await.expect("ids");
    assert_eq!(ids, vec![batch[0].id.clone(), batch[1].id.clone(), batch[2].id.clone()]);
    assert!(db
        .failed_event_ids(Some("px_b"), 3)
        .await
        .expect("ids")
        .is_empty());
}

#[tokio::test]
async fn test_scope_queries_join_through_pixel_ownership() {
    let db = seeded().await;
    let batch = vec![
        event("px_a", "PageView", json!({})),
        event("px_b", "PageView", json!({})),
        event("px_c", "PageView", json!({})),
    ];
    db.insert_events(&batch).await.expect("insert");
    let since = Utc::now() - Duration::hours(1);

    assert_eq!(db.events_in_scope("ws_1", None, since).await.expect("scope").len(), 2);
    assert_eq!(
        db.events_in_scope("ws_1", Some("px_b"), since)
            .await
            .expect("scope")
            .len(),
        1
    );
    // A pixel of another workspace yields nothing.
    assert!(db
        .events_in_scope("ws_1", Some("px_c"), since)
        .await
        .expect("scope")
        .is_empty());
}

#[tokio::test]
async fn test_window_counts_and_named_events() {
    let db = seeded().await;
    let mut stale = event("px_a", "Purchase", json!({}));
    stale.timestamp = Utc::now() - Duration::hours(3);
    let batch = vec![
        event("px_a", "Purchase", json!({"value": 1})),
        event("px_a", "PageView", json!({})),
        stale,
    ];
    db.insert_events(&batch).await.expect("insert");
    db.mark_event_failed(&batch[1].id, "x").await.expect("fail");

    let counts = db
        .window_counts("px_a", Utc::now() - Duration::hours(1))
        .await
        .expect("counts");
    assert_eq!(counts.total, 2);
    assert_eq!(counts.failed, 1);

    let purchases = db
        .events_named("px_a", "Purchase", Utc::now() - Duration::hours(24))
        .await
        .expect("named");
    assert_eq!(purchases.len(), 2);
}

#[tokio::test]
async fn test_recompute_counters_replaces_drifted_values() {
    let db = seeded().await;
    let now = Utc::now();
    let old = event_at(
        "px_a",
        "Purchase",
        json!({ "value": 50, "currency": "EUR" }),
        now - Duration::days(400),
    );
    let fresh = event("px_a", "Purchase", json!({ "value": 12.5, "currency": "EUR" }));
    let failed = event("px_a", "Lead", json!({}));
    db.insert_events(&[old.clone(), fresh.clone(), failed.clone()])
        .await
        .expect("insert");
    for e in [&old, &fresh] {
        db.mark_event_processed(&e.id, CounterDelta::for_event(e), now)
            .await
            .expect("process");
    }
    db.mark_event_failed(&failed.id, "boom").await.expect("fail");

    // Retention removes the old purchase but leaves its increment behind.
    db.delete_events_before(now - Duration::days(365))
        .await
        .expect("retention");
    let drifted = db.get_pixel("px_a").await.expect("get").expect("exists");
    assert_eq!(drifted.events_count, 2);

    let counters = db.recompute_pixel_counters("px_a").await.expect("recompute");
    assert_eq!(counters.events_count, 1);
    assert_eq!(counters.conversions_count, 1);
    assert!((counters.revenue_total - 12.5).abs() < 1e-9);

    let pixel = db.get_pixel("px_a").await.expect("get").expect("exists");
    assert_eq!(pixel.events_count, 1);
    assert_eq!(pixel.conversions_count, 1);
    assert!((pixel.revenue_total - 12.5).abs() < 1e-9);
    assert!(db.recompute_pixel_counters("missing").await.is_err());
}

#[tokio::test]
async fn test_conversions_persist_rules_and_summary() {
    let db = seeded().await;
    let conversion = Conversion {
        id: "cv_1".to_string(),
        pixel_id: "px_a".to_string(),
        name: "Big purchases".to_string(),
        event_name: "Purchase".to_string(),
        rules: vec![Rule {
            rule_type: RuleType::Parameter,
            operator: Operator::GreaterThan,
            field: "value".to_string(),
            value: json!(100),
        }],
        summary: ConversionSummary::default(),
    };
    db.create_conversion(&conversion).await.expect("create");

    let summary = ConversionSummary {
        conversion_rate: 33.33,
        total_conversions: 1,
        total_value: 150.0,
        average_value: 150.0,
    };
    db.set_conversion_summary("cv_1", &summary).await.expect("update");

    let listed = db.list_conversions("px_a").await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].rules, conversion.rules);
    assert_eq!(listed[0].summary, summary);
    assert_eq!(db.list_workspace_conversions("ws_1").await.expect("ws").len(), 1);
    assert!(db.list_workspace_conversions("ws_2").await.expect("ws").is_empty());
}

fn draft(pixel_id: &str, description: &str) -> DiagnosticDraft {
    DiagnosticDraft {
        pixel_id: pixel_id.to_string(),
        severity: Severity::Warning,
        category: Category::Events,
        title: "High event error rate".to_string(),
        description: description.to_string(),
    }
}

#[tokio::test]
async fn test_diagnostic_upsert_keeps_one_row_per_title() {
    let db = seeded().await;
    let first = db
        .upsert_diagnostic(&draft("px_a", "12% failed"), Utc::now())
        .await
        .expect("first");
    let second = db
        .upsert_diagnostic(&draft("px_a", "15% failed"), Utc::now())
        .await
        .expect("second");

    assert_eq!(first.id, second.id);
    assert_eq!(second.description, "15% failed");
    assert_eq!(db.list_diagnostics("px_a").await.expect("list").len(), 1);
}

#[tokio::test]
async fn test_diagnostic_resolve_then_reopen() {
    let db = seeded().await;
    db.upsert_diagnostic(&draft("px_a", "12% failed"), Utc::now())
        .await
        .expect("upsert");

    assert!(db
        .resolve_diagnostic("px_a", "High event error rate", Utc::now())
        .await
        .expect("resolve"));
    // Already resolved: nothing to do.
    assert!(!db
        .resolve_diagnostic("px_a", "High event error rate", Utc::now())
        .await
        .expect("resolve again"));

    let resolved = db.list_diagnostics("px_a").await.expect("list");
    assert_eq!(resolved[0].status, DiagnosticStatus::Resolved);
    assert!(resolved[0].resolved_at.is_some());

    let reopened = db
        .upsert_diagnostic(&draft("px_a", "20% failed"), Utc::now())
        .await
        .expect("reopen");
    assert_eq!(reopened.status, DiagnosticStatus::Active);
    assert!(reopened.resolved_at.is_none());
    assert_eq!(db.list_diagnostics("px_a").await.expect("list").len(), 1);
}

#[tokio::test]
async fn test_workspace_diagnostics_are_scoped() {
    let db = seeded().await;
    db.upsert_diagnostic(&draft("px_a", "a"), Utc::now())
        .await
        .expect("a");
    db.upsert_diagnostic(&draft("px_c", "c"), Utc::now())
        .await
        .expect("c");

    let ws1 = db.list_workspace_diagnostics("ws_1").await.expect("ws1");
    assert_eq!(ws1.len(), 1);
    assert_eq!(ws1[0].pixel_id, "px_a");
}
