use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Event name that drives conversion and revenue counters.
pub const PURCHASE_EVENT: &str = "Purchase";

/// Parameter carrying the monetary amount of an event.
pub const VALUE_PARAM: &str = "value";

/// Parameter carrying the ISO 4217 currency of `value`.
pub const CURRENCY_PARAM: &str = "currency";

/// Parameter carrying the page URL the event fired on.
pub const PAGE_LOCATION_PARAM: &str = "page_location";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Omitted types are held to the standard catalog, so a misspelled
    /// standard name fails instead of passing as custom.
    #[default]
    Standard,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Standard => "standard",
            EventType::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "standard" => Ok(Self::Standard),
            "custom" => Ok(Self::Custom),
            other => Err(CoreError::Validation(format!("unknown event_type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    #[default]
    Web,
    Server,
    Mobile,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Web => "web",
            EventSource::Server => "server",
            EventSource::Mobile => "mobile",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "web" => Ok(Self::Web),
            "server" => Ok(Self::Server),
            "mobile" => Ok(Self::Mobile),
            other => Err(CoreError::Validation(format!("unknown source: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    #[default]
    Pending,
    Processed,
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Pending => "pending",
            ProcessingState::Processed => "processed",
            ProcessingState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "unknown processing_state: {other}"
            ))),
        }
    }
}

/// The payload handed over by the CRUD layer once workspace ownership of
/// `pixel_id` has been checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEventRequest {
    pub pixel_id: String,
    pub event_name: String,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub source: EventSource,
    /// Defaults to the ingestion time when omitted.
    pub timestamp: Option<DateTime<Utc>>,
}

/// A stored event. Mirrors the `events` table columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub pixel_id: String,
    pub event_name: String,
    pub event_type: EventType,
    pub parameters: Map<String, Value>,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
    pub processing_state: ProcessingState,
    pub error_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Build a fresh `pending` event from an ingestion request.
    pub fn from_request(req: CreateEventRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pixel_id: req.pixel_id,
            event_name: req.event_name.trim().to_string(),
            event_type: req.event_type,
            parameters: req.parameters,
            source: req.source,
            timestamp: req.timestamp.unwrap_or(now),
            processing_state: ProcessingState::Pending,
            error_reason: None,
            processed_at: None,
        }
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn is_purchase(&self) -> bool {
        self.event_name == PURCHASE_EVENT
    }

    /// `parameters.value` as a number, when it is one.
    pub fn numeric_value(&self) -> Option<f64> {
        self.param(VALUE_PARAM).and_then(numeric)
    }
}

/// Interpret a JSON value as a finite number. Numeric strings count.
pub fn numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// A parameter is missing when absent, null or an empty string.
pub fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}
