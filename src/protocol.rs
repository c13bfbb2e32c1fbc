//! Line protocol spoken across the process isolation boundary.
//!
//! * Host -> Agent : one JSON encoded [`GameView`] per line
//! * Agent -> Host : one JSON array of numbers per line, or `{"fault": "<cause>"}` when the
//!   strategy failed
//!
//! Decoding on the host side is total: a reply that is not valid JSON or not an array becomes
//! [`RawOutput::Unreadable`] and is rejected by the validator like any other malformed reply.

use anyhow::Context;
use serde_json::{json, Value};

use crate::allocation::{RawOutput, RawValue};
use crate::game_state::GameView;

/// Longest reply line kept for diagnostics.
const MAX_ECHO: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reply {
    Output(RawOutput),
    Fault(String),
}

pub(crate) fn encode_view(view: &GameView) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(view).context("could not serialize game view")?;
    line.push('\n');
    Ok(line)
}

pub(crate) fn decode_view(line: &str) -> anyhow::Result<GameView> {
    serde_json::from_str(line.trim()).context("could not parse game view")
}

pub(crate) fn encode_output(raw: &RawOutput) -> String {
    let value = match raw {
        RawOutput::Sequence(values) => Value::Array(values.iter().map(encode_value).collect()),
        RawOutput::Nothing => Value::Null,
        RawOutput::Unreadable(s) => Value::String(s.clone()),
    };
    format!("{value}\n")
}

pub(crate) fn encode_fault(cause: &str) -> String {
    format!("{}\n", json!({ "fault": cause }))
}

pub(crate) fn decode_reply(line: &str) -> Reply {
    let line = line.trim();
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Array(values)) => {
            Reply::Output(RawOutput::Sequence(values.iter().map(decode_value).collect()))
        }
        Ok(Value::Object(map)) if map.contains_key("fault") => {
            let cause = match &map["fault"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Reply::Fault(cause)
        }
        _ => Reply::Output(RawOutput::Unreadable(truncate(line))),
    }
}

fn encode_value(value: &RawValue) -> Value {
    match value {
        RawValue::Integer(i) => {
            if let Ok(i) = i64::try_from(*i) {
                Value::from(i)
            } else if let Ok(u) = u64::try_from(*i) {
                Value::from(u)
            } else {
                Value::from(*i as f64)
            }
        }
        RawValue::Float(f) => Value::from(*f),
        RawValue::NonNumeric(s) => Value::String(s.clone()),
    }
}

fn decode_value(value: &Value) -> RawValue {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                RawValue::Integer(i as i128)
            } else if let Some(u) = n.as_u64() {
                RawValue::Integer(u as i128)
            } else {
                RawValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        other => RawValue::NonNumeric(truncate(&other.to_string())),
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_ECHO).collect()
}
