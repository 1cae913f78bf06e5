//! On-demand analytics for a workspace scope, computed synchronously from
//! raw events with the pure reducers in `pixelops_core::analytics`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pixelops_core::analytics::{
    conversion_analytics, default_funnel_steps, funnel, group_by, group_by_type, revenue_by_day,
    ConversionAnalytics, FunnelResult, FunnelStepDef, Granularity, Timeframe,
};
use pixelops_core::error::CoreError;
use pixelops_core::event::{Event, ProcessingState};
use pixelops_core::store::PixelStore;

/// A workspace, optionally narrowed to one of its pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub workspace_id: String,
    pub pixel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventsAnalytics {
    pub timeframe: Timeframe,
    pub granularity: Granularity,
    pub total_events: usize,
    pub by_state: BTreeMap<String, usize>,
    pub timeline: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
    pub revenue_by_day: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionReport {
    pub id: String,
    pub pixel_id: String,
    pub name: String,
    pub event_name: String,
    #[serde(flatten)]
    pub analytics: ConversionAnalytics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionsAnalytics {
    pub timeframe: Timeframe,
    pub total_conversions: i64,
    pub total_value: f64,
    pub conversions: Vec<ConversionReport>,
    pub revenue_by_day: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelAnalytics {
    pub timeframe: Timeframe,
    #[serde(flatten)]
    pub funnel: FunnelResult,
}

/// A workspace is known to this service only through the pixels it owns.
pub async fn ensure_workspace(store: &dyn PixelStore, workspace_id: &str) -> Result<(), CoreError> {
    if store.list_pixels(Some(workspace_id)).await?.is_empty() {
        return Err(CoreError::NotFound(format!("workspace {workspace_id}")));
    }
    Ok(())
}

/// Processed events of the scope inside the timeframe.
///
/// An unknown workspace, or a pixel outside the workspace, is reported as not
/// found rather than as an empty scope, so other workspaces stay invisible.
pub async fn scoped_events(
    store: &dyn PixelStore,
    scope: &Scope,
    since: DateTime<Utc>,
) -> Result<Vec<Event>, CoreError> {
    match scope.pixel_id.as_deref() {
        Some(pixel_id) => {
            let owned = store
                .get_pixel(pixel_id)
                .await?
                .is_some_and(|p| p.workspace_id == scope.workspace_id);
            if !owned {
                return Err(CoreError::NotFound(format!("pixel {pixel_id}")));
            }
        }
        None => ensure_workspace(store, &scope.workspace_id).await?,
    }
    Ok(store
        .events_in_scope(&scope.workspace_id, scope.pixel_id.as_deref(), since)
        .await?)
}

fn processed(events: Vec<Event>) -> Vec<Event> {
    events
        .into_iter()
        .filter(|e| e.processing_state == ProcessingState::Processed)
        .collect()
}

pub async fn events_analytics(
    store: &dyn PixelStore,
    scope: &Scope,
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> Result<EventsAnalytics, CoreError> {
    let events = scoped_events(store, scope, timeframe.start(now)).await?;

    let mut by_state = BTreeMap::new();
    for event in &events {
        *by_state
            .entry(event.processing_state.as_str().to_string())
            .or_insert(0) += 1;
    }
    let total_events = events.len();
    let delivered = processed(events);
    let granularity = timeframe.granularity();

    Ok(EventsAnalytics {
        timeframe,
        granularity,
        total_events,
        by_state,
        timeline: group_by(&delivered, granularity),
        by_type: group_by_type(&delivered),
        revenue_by_day: revenue_by_day(&delivered),
    })
}

pub async fn conversions_analytics(
    store: &dyn PixelStore,
    scope: &Scope,
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> Result<ConversionsAnalytics, CoreError> {
    let events = processed(scoped_events(store, scope, timeframe.start(now)).await?);

    let mut conversions = match scope.pixel_id.as_deref() {
        Some(pixel_id) => store.list_conversions(pixel_id).await?,
        None => store.list_workspace_conversions(&scope.workspace_id).await?,
    };
    conversions.sort_by(|a, b| a.pixel_id.cmp(&b.pixel_id).then(a.id.cmp(&b.id)));

    let mut reports = Vec::with_capacity(conversions.len());
    let mut total_conversions = 0;
    let mut total_value = 0.0;
    for conversion in conversions {
        let candidates: Vec<Event> = events
            .iter()
            .filter(|e| e.pixel_id == conversion.pixel_id && e.event_name == conversion.event_name)
            .cloned()
            .collect();
        let analytics = conversion_analytics(&candidates, &conversion.rules);
        total_conversions += analytics.total_conversions;
        total_value += analytics.total_value;
        reports.push(ConversionReport {
            id: conversion.id,
            pixel_id: conversion.pixel_id,
            name: conversion.name,
            event_name: conversion.event_name,
            analytics,
        });
    }

    Ok(ConversionsAnalytics {
        timeframe,
        total_conversions,
        total_value,
        conversions: reports,
        revenue_by_day: revenue_by_day(&events),
    })
}

pub async fn funnel_analytics(
    store: &dyn PixelStore,
    scope: &Scope,
    timeframe: Timeframe,
    steps: Option<Vec<FunnelStepDef>>,
    now: DateTime<Utc>,
) -> Result<FunnelAnalytics, CoreError> {
    let steps = match steps {
        Some(steps) if steps.is_empty() => {
            return Err(CoreError::Validation(
                "funnel needs at least one step".to_string(),
            ))
        }
        Some(steps) => steps,
        None => default_funnel_steps(),
    };
    let events = processed(scoped_events(store, scope, timeframe.start(now)).await?);
    Ok(FunnelAnalytics {
        timeframe,
        funnel: funnel(&steps, &events),
    })
}
