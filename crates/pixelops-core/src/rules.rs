//! Declarative conversion rules.
//!
//! A rule is evaluated in two independent steps: [`RuleType::resolve`] picks
//! the value under test out of the event, then [`Operator::compare`] checks it
//! against the rule's value. Unrecognised types or operators deserialize into
//! an `Unknown` variant that never matches.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{numeric, Event, PAGE_LOCATION_PARAM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Event,
    Parameter,
    Url,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub operator: Operator,
    #[serde(default)]
    pub field: String,
    pub value: Value,
}

impl RuleType {
    /// The event value a rule of this type inspects. `None` for unknown types.
    pub fn resolve<'a>(&self, event: &'a Event, field: &str) -> Option<Cow<'a, Value>> {
        match self {
            RuleType::Event => Some(Cow::Owned(Value::String(event.event_name.clone()))),
            RuleType::Parameter => Some(
                event
                    .param(field)
                    .map(Cow::Borrowed)
                    .unwrap_or(Cow::Owned(Value::Null)),
            ),
            RuleType::Url => Some(
                event
                    .param(PAGE_LOCATION_PARAM)
                    .filter(|v| !v.is_null())
                    .map(Cow::Borrowed)
                    .unwrap_or_else(|| Cow::Owned(Value::String(String::new()))),
            ),
            RuleType::Unknown => None,
        }
    }
}

impl Operator {
    pub fn compare(&self, actual: &Value, expected: &Value) -> bool {
        match self {
            Operator::Equals => values_equal(actual, expected),
            Operator::Contains => lower(actual).contains(&lower(expected)),
            Operator::StartsWith => lower(actual).starts_with(&lower(expected)),
            Operator::EndsWith => lower(actual).ends_with(&lower(expected)),
            Operator::GreaterThan => numeric_pair(actual, expected).is_some_and(|(a, b)| a > b),
            Operator::LessThan => numeric_pair(actual, expected).is_some_and(|(a, b)| a < b),
            Operator::Unknown => false,
        }
    }
}

impl Rule {
    pub fn evaluate(&self, event: &Event) -> bool {
        match self.rule_type.resolve(event, &self.field) {
            Some(actual) => self.operator.compare(&actual, &self.value),
            None => false,
        }
    }
}

/// True when `event` satisfies every rule. An empty rule set always matches.
pub fn matches(event: &Event, rules: &[Rule]) -> bool {
    rules.iter().all(|rule| rule.evaluate(event))
}

/// The textual form used by the string operators.
pub fn string_form(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

fn lower(value: &Value) -> String {
    string_form(value).to_lowercase()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn numeric_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    Some((numeric(a)?, numeric(b)?))
}
