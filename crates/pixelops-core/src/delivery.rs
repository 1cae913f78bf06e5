//! Delivery contract applied by the event processor.
//!
//! An event is delivered when it passes every rule below; the first failing
//! rule becomes the event's `error_reason`. Failures are recorded on the
//! event and are eligible for retry, they are never surfaced to the caller.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::event::{numeric, Event, EventType, CURRENCY_PARAM, VALUE_PARAM};
use crate::pixel::Pixel;

pub const MAX_EVENT_NAME_BYTES: usize = 255;
pub const MAX_PARAMETERS_BYTES: usize = 8 * 1024;
pub const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

/// Event names accepted for `event_type = standard`.
pub const STANDARD_EVENTS: &[&str] = &[
    "PageView",
    "ViewContent",
    "Search",
    "AddToCart",
    "AddToWishlist",
    "InitiateCheckout",
    "AddPaymentInfo",
    "Purchase",
    "Lead",
    "CompleteRegistration",
    "Contact",
    "Subscribe",
    "StartTrial",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessingError {
    #[error("pixel {0} not found")]
    UnknownPixel(String),

    #[error("event_name is empty")]
    EmptyEventName,

    #[error("event_name exceeds 255 bytes")]
    EventNameTooLong,

    #[error("{0} is not a standard event")]
    NonStandardEvent(String),

    #[error("timestamp {0} is in the future")]
    FutureTimestamp(DateTime<Utc>),

    #[error("parameters exceed 8 KiB")]
    ParametersTooLarge,

    #[error("value must be a non-negative number")]
    InvalidValue,

    #[error("currency must be a three-letter code")]
    InvalidCurrency,

    #[error("could not serialize parameters: {0}")]
    Serialization(String),
}

/// Check `event` against the delivery contract.
///
/// `pixel` is the owning pixel as loaded at processing time; `None` means it
/// no longer exists.
pub fn check(event: &Event, pixel: Option<&Pixel>, now: DateTime<Utc>) -> Result<(), ProcessingError> {
    if pixel.is_none() {
        return Err(ProcessingError::UnknownPixel(event.pixel_id.clone()));
    }

    let name = event.event_name.trim();
    if name.is_empty() {
        return Err(ProcessingError::EmptyEventName);
    }
    if name.len() > MAX_EVENT_NAME_BYTES {
        return Err(ProcessingError::EventNameTooLong);
    }
    if event.event_type == EventType::Standard && !STANDARD_EVENTS.contains(&name) {
        return Err(ProcessingError::NonStandardEvent(name.to_string()));
    }

    if event.timestamp > now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES) {
        return Err(ProcessingError::FutureTimestamp(event.timestamp));
    }

    let size = serde_json::to_vec(&event.parameters)
        .map_err(|e| ProcessingError::Serialization(e.to_string()))?
        .len();
    if size > MAX_PARAMETERS_BYTES {
        return Err(ProcessingError::ParametersTooLarge);
    }

    match event.param(VALUE_PARAM) {
        None | Some(Value::Null) => {}
        Some(value) => match numeric(value) {
            Some(n) if n >= 0.0 => {}
            _ => return Err(ProcessingError::InvalidValue),
        },
    }

    match event.param(CURRENCY_PARAM) {
        None | Some(Value::Null) => {}
        Some(Value::String(code))
            if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) => {}
        Some(_) => return Err(ProcessingError::InvalidCurrency),
    }

    Ok(())
}
