//! Pixel health checks.
//!
//! Each check is a pure function of a [`PixelSnapshot`]. The engine in
//! `pixelops-server` loads the snapshot, runs [`CATALOG`] in order and
//! persists the drafts keyed by `(pixel_id, title)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::{is_missing, Event, CURRENCY_PARAM, VALUE_PARAM};
use crate::pixel::PixelStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Success,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Success => "success",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "error" => Ok(Self::Error),
            "warning" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            other => Err(CoreError::Validation(format!("unknown severity: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Implementation,
    Events,
    Performance,
    Connection,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Implementation => "implementation",
            Category::Events => "events",
            Category::Performance => "performance",
            Category::Connection => "connection",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "implementation" => Ok(Self::Implementation),
            "events" => Ok(Self::Events),
            "performance" => Ok(Self::Performance),
            "connection" => Ok(Self::Connection),
            other => Err(CoreError::Validation(format!("unknown category: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    Active,
    Resolved,
}

impl DiagnosticStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticStatus::Active => "active",
            DiagnosticStatus::Resolved => "resolved",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "active" => Ok(Self::Active),
            "resolved" => Ok(Self::Resolved),
            other => Err(CoreError::Validation(format!(
                "unknown diagnostic status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub id: String,
    pub pixel_id: String,
    pub severity: Severity,
    pub category: Category,
    pub title: String,
    pub description: String,
    pub status: DiagnosticStatus,
    pub last_checked_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A finding produced by one check, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticDraft {
    pub pixel_id: String,
    pub severity: Severity,
    pub category: Category,
    pub title: String,
    pub description: String,
}

/// Event totals over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowCounts {
    pub total: i64,
    pub failed: i64,
}

/// Purchase events from the last 24 hours lacking `value` or `currency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PurchaseCompleteness {
    pub total: i64,
    pub incomplete: i64,
}

impl PurchaseCompleteness {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut out = Self::default();
        for event in events.into_iter().filter(|e| e.is_purchase()) {
            out.total += 1;
            if is_missing(event.param(VALUE_PARAM)) || is_missing(event.param(CURRENCY_PARAM)) {
                out.incomplete += 1;
            }
        }
        out
    }
}

/// Everything the check catalog needs to know about one pixel.
///
/// Query-backed inputs are `None` when their query failed; checks that
/// depend on a missing input are skipped rather than evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSnapshot {
    pub pixel_id: String,
    pub status: PixelStatus,
    pub last_activity: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub last_hour: Option<WindowCounts>,
    pub purchases_last_day: Option<PurchaseCompleteness>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Pass,
    Fire(DiagnosticDraft),
    /// Inputs were unavailable; existing findings are left untouched.
    Skipped,
}

pub struct Check {
    pub name: &'static str,
    /// Upsert key for the findings of this check.
    pub title: &'static str,
    pub run: fn(&PixelSnapshot) -> CheckOutcome,
}

pub const NO_RECENT_EVENTS: &str = "No recent events";
pub const HIGH_ERROR_RATE: &str = "High event error rate";
pub const INCOMPLETE_PURCHASES: &str = "Incomplete purchase events";
pub const PIXEL_STATUS: &str = "Pixel status";

/// The fixed, ordered check catalog.
pub const CATALOG: &[Check] = &[
    Check {
        name: "no_recent_events",
        title: NO_RECENT_EVENTS,
        run: check_no_recent_events,
    },
    Check {
        name: "error_rate",
        title: HIGH_ERROR_RATE,
        run: check_error_rate,
    },
    Check {
        name: "purchase_completeness",
        title: INCOMPLETE_PURCHASES,
        run: check_purchase_completeness,
    },
    Check {
        name: "pixel_status",
        title: PIXEL_STATUS,
        run: check_pixel_status,
    },
];

/// Titles owned by the engine; only these are ever auto-resolved.
pub fn engine_titles() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|c| c.title)
}

fn draft(
    snapshot: &PixelSnapshot,
    title: &str,
    severity: Severity,
    category: Category,
    description: String,
) -> CheckOutcome {
    CheckOutcome::Fire(DiagnosticDraft {
        pixel_id: snapshot.pixel_id.clone(),
        severity,
        category,
        title: title.to_string(),
        description,
    })
}

pub fn check_no_recent_events(snapshot: &PixelSnapshot) -> CheckOutcome {
    let Some(last_hour) = snapshot.last_hour else {
        return CheckOutcome::Skipped;
    };
    if last_hour.total > 0 {
        return CheckOutcome::Pass;
    }
    let Some(last_activity) = snapshot.last_activity else {
        return CheckOutcome::Pass;
    };
    let hours = (snapshot.now - last_activity).num_seconds() as f64 / 3600.0;
    if hours <= 2.0 {
        return CheckOutcome::Pass;
    }
    let severity = if hours > 24.0 {
        Severity::Error
    } else {
        Severity::Warning
    };
    draft(
        snapshot,
        NO_RECENT_EVENTS,
        severity,
        Category::Performance,
        format!("No events received in the last hour; last activity was {hours:.1} hours ago."),
    )
}

pub fn check_error_rate(snapshot: &PixelSnapshot) -> CheckOutcome {
    let Some(WindowCounts { total, failed }) = snapshot.last_hour else {
        return CheckOutcome::Skipped;
    };
    if total == 0 {
        return CheckOutcome::Pass;
    }
    let rate = failed as f64 / total as f64;
    let severity = if rate > 0.5 {
        Severity::Error
    } else if rate > 0.1 {
        Severity::Warning
    } else {
        return CheckOutcome::Pass;
    };
    draft(
        snapshot,
        HIGH_ERROR_RATE,
        severity,
        Category::Events,
        format!(
            "{failed} of {total} events failed processing in the last hour ({:.1}%).",
            rate * 100.0
        ),
    )
}

pub fn check_purchase_completeness(snapshot: &PixelSnapshot) -> CheckOutcome {
    let Some(PurchaseCompleteness { total, incomplete }) = snapshot.purchases_last_day else {
        return CheckOutcome::Skipped;
    };
    if total == 0 || incomplete == 0 {
        return CheckOutcome::Pass;
    }
    let fraction = incomplete as f64 / total as f64;
    let severity = if fraction > 0.5 {
        Severity::Error
    } else {
        Severity::Warning
    };
    draft(
        snapshot,
        INCOMPLETE_PURCHASES,
        severity,
        Category::Events,
        format!(
            "{incomplete} of {total} Purchase events in the last 24 hours are missing value or currency."
        ),
    )
}

pub fn check_pixel_status(snapshot: &PixelSnapshot) -> CheckOutcome {
    match snapshot.status {
        PixelStatus::Active => CheckOutcome::Pass,
        PixelStatus::Inactive => draft(
            snapshot,
            PIXEL_STATUS,
            Severity::Warning,
            Category::Implementation,
            "Pixel is marked inactive.".to_string(),
        ),
        PixelStatus::Error => draft(
            snapshot,
            PIXEL_STATUS,
            Severity::Error,
            Category::Implementation,
            "Pixel is in an error state.".to_string(),
        ),
    }
}

/// Run the whole catalog, pairing each outcome with its check.
pub fn evaluate(snapshot: &PixelSnapshot) -> Vec<(&'static Check, CheckOutcome)> {
    CATALOG
        .iter()
        .map(|check| (check, (check.run)(snapshot)))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::event::{CreateEventRequest, EventSource, EventType};

    fn snapshot() -> PixelSnapshot {
        let now = Utc::now();
        PixelSnapshot {
            pixel_id: "px_1".to_string(),
            status: PixelStatus::Active,
            last_activity: Some(now - Duration::minutes(5)),
            now,
            last_hour: Some(WindowCounts { total: 10, failed: 0 }),
            purchases_last_day: Some(PurchaseCompleteness::default()),
        }
    }

    fn fired(outcome: CheckOutcome) -> DiagnosticDraft {
        match outcome {
            CheckOutcome::Fire(d) => d,
            other => panic!("expected a finding, got {other:?}"),
        }
    }

    fn findings(snap: &PixelSnapshot) -> Vec<DiagnosticDraft> {
        evaluate(snap)
            .into_iter()
            .filter_map(|(_, o)| match o {
                CheckOutcome::Fire(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn healthy_pixel_has_no_findings() {
        assert!(findings(&snapshot()).is_empty());
    }

    #[test]
    fn quiet_for_three_hours_is_a_single_performance_warning() {
        let mut snap = snapshot();
        snap.last_hour = Some(WindowCounts::default());
        snap.last_activity = Some(snap.now - Duration::hours(3));
        let all = findings(&snap);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, NO_RECENT_EVENTS);
        assert_eq!(all[0].severity, Severity::Warning);
        assert_eq!(all[0].category, Category::Performance);
    }

    #[test]
    fn quiet_for_over_a_day_is_an_error() {
        let mut snap = snapshot();
        snap.last_hour = Some(WindowCounts::default());
        snap.last_activity = Some(snap.now - Duration::hours(30));
        assert_eq!(fired(check_no_recent_events(&snap)).severity, Severity::Error);
    }

    #[test]
    fn quiet_check_needs_prior_activity_and_two_hours() {
        let mut snap = snapshot();
        snap.last_hour = Some(WindowCounts::default());
        snap.last_activity = None;
        assert_eq!(check_no_recent_events(&snap), CheckOutcome::Pass);
        snap.last_activity = Some(snap.now - Duration::minutes(90));
        assert_eq!(check_no_recent_events(&snap), CheckOutcome::Pass);
    }

    #[test]
    fn error_rate_thresholds() {
        let mut snap = snapshot();
        snap.last_hour = Some(WindowCounts { total: 100, failed: 60 });
        let d = fired(check_error_rate(&snap));
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.category, Category::Events);
        assert!(d.description.contains("60.0%"));

        snap.last_hour = Some(WindowCounts { total: 100, failed: 20 });
        assert_eq!(fired(check_error_rate(&snap)).severity, Severity::Warning);

        snap.last_hour = Some(WindowCounts { total: 100, failed: 10 });
        assert_eq!(check_error_rate(&snap), CheckOutcome::Pass);

        snap.last_hour = Some(WindowCounts { total: 0, failed: 0 });
        assert_eq!(check_error_rate(&snap), CheckOutcome::Pass);
    }

    #[test]
    fn purchase_completeness_scales_with_missing_fraction() {
        let mut snap = snapshot();
        snap.purchases_last_day = Some(PurchaseCompleteness { total: 4, incomplete: 1 });
        assert_eq!(fired(check_purchase_completeness(&snap)).severity, Severity::Warning);
        snap.purchases_last_day = Some(PurchaseCompleteness { total: 4, incomplete: 3 });
        assert_eq!(fired(check_purchase_completeness(&snap)).severity, Severity::Error);
        snap.purchases_last_day = Some(PurchaseCompleteness { total: 4, incomplete: 0 });
        assert_eq!(check_purchase_completeness(&snap), CheckOutcome::Pass);
    }

    #[test]
    fn completeness_counts_missing_value_or_currency() {
        let make = |params: serde_json::Value, name: &str| {
            Event::from_request(
                CreateEventRequest {
                    pixel_id: "px_1".to_string(),
                    event_name: name.to_string(),
                    event_type: EventType::Standard,
                    parameters: params.as_object().cloned().unwrap_or_default(),
                    source: EventSource::Web,
                    timestamp: None,
                },
                Utc::now(),
            )
        };
        let events = vec![
            make(json!({"value": 10, "currency": "USD"}), "Purchase"),
            make(json!({"value": 10}), "Purchase"),
            make(json!({"currency": "EUR", "value": null}), "Purchase"),
            make(json!({}), "PageView"),
        ];
        let completeness = PurchaseCompleteness::from_events(&events);
        assert_eq!(completeness, PurchaseCompleteness { total: 3, incomplete: 2 });
    }

    #[test]
    fn pixel_status_maps_to_severity() {
        let mut snap = snapshot();
        snap.status = PixelStatus::Inactive;
        let d = fired(check_pixel_status(&snap));
        assert_eq!((d.severity, d.category), (Severity::Warning, Category::Implementation));
        snap.status = PixelStatus::Error;
        assert_eq!(fired(check_pixel_status(&snap)).severity, Severity::Error);
    }

    #[test]
    fn missing_inputs_skip_dependent_checks() {
        let mut snap = snapshot();
        snap.last_hour = None;
        snap.purchases_last_day = None;
        let outcomes = evaluate(&snap);
        assert_eq!(outcomes[0].1, CheckOutcome::Skipped);
        assert_eq!(outcomes[1].1, CheckOutcome::Skipped);
        assert_eq!(outcomes[2].1, CheckOutcome::Skipped);
        assert_eq!(outcomes[3].1, CheckOutcome::Pass);
    }

    #[test]
    fn catalog_titles_are_unique() {
        let mut titles: Vec<_> = engine_titles().collect();
        titles.sort_unstable();
        titles.dedup();
        assert_eq!(titles.len(), CATALOG.len());
    }
}
