use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PixelStatus {
    #[default]
    Active,
    Inactive,
    Error,
}

impl PixelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelStatus::Active => "active",
            PixelStatus::Inactive => "inactive",
            PixelStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            other => Err(CoreError::Validation(format!("unknown pixel status: {other}"))),
        }
    }
}

/// Stored in `pixels.status_reason` when the cleanup job parks an idle pixel.
pub const INACTIVITY_REASON: &str = "inactivity";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pixel {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub status: PixelStatus,
    /// Why the pixel left `active`. `None` while active.
    pub status_reason: Option<String>,
    pub events_count: i64,
    pub conversions_count: i64,
    pub revenue_total: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Parameters for registering a pixel on behalf of the CRUD layer.
#[derive(Debug, Clone)]
pub struct NewPixel {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub status: PixelStatus,
    pub status_reason: Option<String>,
}

impl NewPixel {
    pub fn active(id: &str, workspace_id: &str) -> Self {
        Self {
            id: id.to_string(),
            workspace_id: workspace_id.to_string(),
            name: id.to_string(),
            status: PixelStatus::Active,
            status_reason: None,
        }
    }
}

/// The rollup counters owned by a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelCounters {
    pub events_count: i64,
    pub conversions_count: i64,
    pub revenue_total: f64,
}

/// What one successfully processed event adds to its pixel's counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CounterDelta {
    pub events: i64,
    pub conversions: i64,
    pub revenue: f64,
}

impl CounterDelta {
    pub fn for_event(event: &Event) -> Self {
        let mut delta = Self {
            events: 1,
            ..Self::default()
        };
        if event.is_purchase() {
            if let Some(value) = event.numeric_value() {
                delta.conversions = 1;
                delta.revenue = value;
            }
        }
        delta
    }
}

impl std::ops::AddAssign<CounterDelta> for PixelCounters {
    fn add_assign(&mut self, delta: CounterDelta) {
        self.events_count += delta.events;
        self.conversions_count += delta.conversions;
        self.revenue_total += delta.revenue;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::event::{CreateEventRequest, EventSource, EventType};

    fn event(name: &str, params: serde_json::Value) -> Event {
        let req = CreateEventRequest {
            pixel_id: "px".to_string(),
            event_name: name.to_string(),
            event_type: EventType::Standard,
            parameters: params.as_object().cloned().unwrap_or_default(),
            source: EventSource::Web,
            timestamp: None,
        };
        Event::from_request(req, Utc::now())
    }

    #[test]
    fn purchase_with_value_counts_as_conversion() {
        let delta = CounterDelta::for_event(&event("Purchase", json!({"value": 19.5})));
        assert_eq!(delta.events, 1);
        assert_eq!(delta.conversions, 1);
        assert_eq!(delta.revenue, 19.5);
    }

    #[test]
    fn purchase_without_numeric_value_only_counts_event() {
        let delta = CounterDelta::for_event(&event("Purchase", json!({"value": "n/a"})));
        assert_eq!(delta, CounterDelta { events: 1, conversions: 0, revenue: 0.0 });
    }

    #[test]
    fn non_purchase_value_is_ignored() {
        let delta = CounterDelta::for_event(&event("AddToCart", json!({"value": 10})));
        assert_eq!(delta.conversions, 0);
        assert_eq!(delta.revenue, 0.0);
    }
}
