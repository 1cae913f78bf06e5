//! Pure aggregation over event slices.
//!
//! Nothing here touches storage: callers load the events for a scope and
//! time window, then reduce them with these functions. The scheduled rollup
//! job uses [`pixel_counters`] and [`conversion_summary`] as the source of
//! truth for the persisted counters.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::{Event, ProcessingState};
use crate::pixel::{CounterDelta, PixelCounters};
use crate::rules::{matches, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    LastHour,
    #[default]
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
}

impl Timeframe {
    pub fn parse(raw: Option<&str>) -> Result<Self, CoreError> {
        match raw.map(str::trim) {
            None | Some("") | Some("24h") => Ok(Self::LastDay),
            Some("1h") => Ok(Self::LastHour),
            Some("7d") => Ok(Self::LastWeek),
            Some("30d") => Ok(Self::LastMonth),
            Some(other) => Err(CoreError::Validation(format!(
                "timeframe must be one of: 1h, 24h, 7d, 30d (got {other})"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::LastHour => "1h",
            Timeframe::LastDay => "24h",
            Timeframe::LastWeek => "7d",
            Timeframe::LastMonth => "30d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::LastHour => Duration::hours(1),
            Timeframe::LastDay => Duration::hours(24),
            Timeframe::LastWeek => Duration::days(7),
            Timeframe::LastMonth => Duration::days(30),
        }
    }

    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }

    /// Bucket size used for the events timeline of this window.
    pub fn granularity(&self) -> Granularity {
        match self {
            Timeframe::LastHour => Granularity::Minute,
            Timeframe::LastDay => Granularity::Hour,
            Timeframe::LastWeek | Timeframe::LastMonth => Granularity::Day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    /// Truncate `ts` (UTC) to this granularity and render the bucket key.
    pub fn key(&self, ts: &DateTime<Utc>) -> String {
        match self {
            Granularity::Minute => ts.format("%Y-%m-%dT%H:%M").to_string(),
            Granularity::Hour => ts.format("%Y-%m-%dT%H:00").to_string(),
            Granularity::Day => ts.format("%Y-%m-%d").to_string(),
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `numerator / denominator * 100`, rounded to 2 decimals; 0 on an empty base.
pub fn percentage(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(numerator as f64 / denominator as f64 * 100.0)
}

pub fn group_by(events: &[Event], granularity: Granularity) -> BTreeMap<String, i64> {
    let mut buckets = BTreeMap::new();
    for event in events {
        *buckets.entry(granularity.key(&event.timestamp)).or_insert(0) += 1;
    }
    buckets
}

pub fn group_by_day(events: &[Event]) -> BTreeMap<String, i64> {
    group_by(events, Granularity::Day)
}

pub fn group_by_hour(events: &[Event]) -> BTreeMap<String, i64> {
    group_by(events, Granularity::Hour)
}

pub fn group_by_minute(events: &[Event]) -> BTreeMap<String, i64> {
    group_by(events, Granularity::Minute)
}

pub fn group_by_type(events: &[Event]) -> BTreeMap<String, i64> {
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry(event.event_name.clone()).or_insert(0) += 1;
    }
    counts
}

/// Summed numeric `value` of Purchase events, per day.
pub fn revenue_by_day(events: &[Event]) -> BTreeMap<String, f64> {
    let mut revenue = BTreeMap::new();
    for event in events.iter().filter(|e| e.is_purchase()) {
        if let Some(value) = event.numeric_value() {
            *revenue
                .entry(Granularity::Day.key(&event.timestamp))
                .or_insert(0.0) += value;
        }
    }
    revenue
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelStepDef {
    pub name: String,
    pub event_name: String,
}

impl FunnelStepDef {
    pub fn new(name: &str, event_name: &str) -> Self {
        Self {
            name: name.to_string(),
            event_name: event_name.to_string(),
        }
    }
}

/// The e-commerce funnel used when a caller does not supply steps.
pub fn default_funnel_steps() -> Vec<FunnelStepDef> {
    vec![
        FunnelStepDef::new("Page View", "PageView"),
        FunnelStepDef::new("View Content", "ViewContent"),
        FunnelStepDef::new("Add to Cart", "AddToCart"),
        FunnelStepDef::new("Initiate Checkout", "InitiateCheckout"),
        FunnelStepDef::new("Purchase", "Purchase"),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStepResult {
    pub name: String,
    pub event_name: String,
    pub count: i64,
    /// Percentage of the previous step's count that reached this step.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelResult {
    pub steps: Vec<FunnelStepResult>,
    pub overall_rate: f64,
}

pub fn funnel(steps: &[FunnelStepDef], events: &[Event]) -> FunnelResult {
    let by_name = group_by_type(events);
    let counts: Vec<i64> = steps
        .iter()
        .map(|step| by_name.get(&step.event_name).copied().unwrap_or(0))
        .collect();
    funnel_from_counts(steps, &counts)
}

/// Rates for already-counted steps. `counts` is aligned with `steps`.
pub fn funnel_from_counts(steps: &[FunnelStepDef], counts: &[i64]) -> FunnelResult {
    let results = steps
        .iter()
        .zip(counts)
        .enumerate()
        .map(|(idx, (step, &count))| FunnelStepResult {
            name: step.name.clone(),
            event_name: step.event_name.clone(),
            count,
            rate: if idx == 0 {
                100.0
            } else {
                percentage(count, counts[idx - 1])
            },
        })
        .collect::<Vec<_>>();

    let overall_rate = match (counts.first(), counts.last()) {
        (Some(&first), Some(&last)) => percentage(last, first),
        _ => 0.0,
    };

    FunnelResult {
        steps: results,
        overall_rate,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyConversions {
    pub count: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConversionAnalytics {
    pub total_conversions: i64,
    pub total_value: f64,
    pub average_value: f64,
    pub by_day: BTreeMap<String, DailyConversions>,
}

pub fn conversion_analytics(events: &[Event], rules: &[Rule]) -> ConversionAnalytics {
    let mut out = ConversionAnalytics::default();
    for event in events.iter().filter(|e| matches(e, rules)) {
        let value = event.numeric_value().unwrap_or(0.0);
        let bucket = out
            .by_day
            .entry(Granularity::Day.key(&event.timestamp))
            .or_default();
        bucket.count += 1;
        bucket.value += value;
        out.total_conversions += 1;
        out.total_value += value;
    }
    out.average_value = if out.total_conversions == 0 {
        0.0
    } else {
        out.total_value / out.total_conversions as f64
    };
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub conversion_rate: f64,
    pub total_conversions: i64,
    pub total_value: f64,
    pub average_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub id: String,
    pub pixel_id: String,
    pub name: String,
    pub event_name: String,
    pub rules: Vec<Rule>,
    #[serde(flatten)]
    pub summary: ConversionSummary,
}

/// Full reduction of a conversion's summary fields.
///
/// Only processed events count. `conversion_rate` is relative to every
/// processed event of the pixel in `events`.
pub fn conversion_summary(events: &[Event], conversion: &Conversion) -> ConversionSummary {
    let processed: Vec<&Event> = events
        .iter()
        .filter(|e| e.processing_state == ProcessingState::Processed)
        .collect();
    let candidates: Vec<Event> = processed
        .iter()
        .filter(|e| e.event_name == conversion.event_name)
        .map(|e| (*e).clone())
        .collect();
    let analytics = conversion_analytics(&candidates, &conversion.rules);
    ConversionSummary {
        conversion_rate: percentage(analytics.total_conversions, processed.len() as i64),
        total_conversions: analytics.total_conversions,
        total_value: round2(analytics.total_value),
        average_value: round2(analytics.average_value),
    }
}

/// Full reduction of a pixel's counters over its processed events.
pub fn pixel_counters(events: &[Event]) -> PixelCounters {
    let mut counters = PixelCounters::default();
    for event in events
        .iter()
        .filter(|e| e.processing_state == ProcessingState::Processed)
    {
        counters += CounterDelta::for_event(event);
    }
    counters
}
