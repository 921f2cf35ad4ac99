//! Inbound message normalization.
//!
//! Messages posted by the engine iframe are untrusted. Rules:
//! - Absent / unparseable / non-object payload: REJECT + LOG
//! - Missing or unknown `type` tag: REJECT + LOG
//! - Numeric field present but not a finite non-negative number: REJECT + LOG
//! - Numeric field absent or null: default 0
//! - Fractional numbers: floored; numbers beyond u64 saturate
//! - Unknown extra fields: ignored
//!
//! Rejections are logged at debug level and never reach the aggregator.

use hopline_core::InboundEvent;
use hopline_wire::{GAME_ID_FIELDS, MessageType, TYPE_FIELD};
use serde_json::{Map, Value};
use tracing::debug;

/// Why a raw message was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No payload at all (`null`/`undefined`).
    Absent,
    /// Raw text that is not JSON.
    Unparseable { reason: String },
    /// Payload is not a JSON object.
    NotAnObject,
    /// No string `type` field.
    MissingType,
    /// `type` is not a known tag.
    UnknownType { tag: String },
    /// A numeric field holds something other than a finite non-negative number.
    InvalidNumber { field: &'static str, reason: &'static str },
}

impl Rejection {
    pub fn rule(&self) -> &'static str {
        match self {
            Self::Absent => "payload_absent",
            Self::Unparseable { .. } => "payload_unparseable",
            Self::NotAnObject => "payload_not_object",
            Self::MissingType => "type_missing",
            Self::UnknownType { .. } => "type_unknown",
            Self::InvalidNumber { .. } => "number_invalid",
        }
    }
}

/// Normalize a raw message into an event.
pub fn normalize(raw: &Value) -> Result<InboundEvent, Rejection> {
    let result = normalize_value(raw);
    if let Err(rejection) = &result {
        debug!(rule = rejection.rule(), ?rejection, "message rejected");
    }
    result
}

/// Normalize raw JSON text.
pub fn normalize_str(raw: &str) -> Result<InboundEvent, Rejection> {
    if raw.trim().is_empty() {
        debug!(rule = Rejection::Absent.rule(), "message rejected");
        return Err(Rejection::Absent);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => normalize(&value),
        Err(err) => {
            let rejection = Rejection::Unparseable {
                reason: err.to_string(),
            };
            debug!(rule = rejection.rule(), ?rejection, "message rejected");
            Err(rejection)
        }
    }
}

fn normalize_value(raw: &Value) -> Result<InboundEvent, Rejection> {
    let object = match raw {
        Value::Null => return Err(Rejection::Absent),
        Value::Object(object) => object,
        _ => return Err(Rejection::NotAnObject),
    };

    let tag = object
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .ok_or(Rejection::MissingType)?;
    let message_type = MessageType::from_tag(tag).ok_or_else(|| Rejection::UnknownType {
        tag: tag.to_string(),
    })?;

    let value = match message_type.numeric_fields() {
        [] => 0,
        fields => read_number(object, fields)?,
    };

    Ok(InboundEvent::from_parts(
        message_type.event_kind(),
        read_game_id(object),
        value,
    ))
}

/// First present spelling of the engine id, stringified.
fn read_game_id(object: &Map<String, Value>) -> Option<String> {
    let raw = GAME_ID_FIELDS.iter().find_map(|field| object.get(*field))?;
    let id = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => return None,
        other => {
            debug!(game_id = %other, "ignoring non-scalar game id");
            return None;
        }
    };
    (!id.is_empty()).then_some(id)
}

/// First present spelling of a numeric field, coerced to u64.
fn read_number(object: &Map<String, Value>, fields: &[&'static str]) -> Result<u64, Rejection> {
    let Some((field, raw)) = fields
        .iter()
        .find_map(|field| object.get(*field).map(|value| (*field, value)))
    else {
        return Ok(0);
    };

    let invalid = |reason| Rejection::InvalidNumber { field, reason };
    let number = match raw {
        Value::Null => return Ok(0),
        Value::Number(n) => {
            if let Some(n) = n.as_u64() {
                return Ok(n);
            }
            n.as_f64().ok_or_else(|| invalid("not representable"))?
        }
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid("not a number"))?,
        _ => return Err(invalid("not a number")),
    };

    if !number.is_finite() {
        return Err(invalid("not finite"));
    }
    if number < 0.0 {
        return Err(invalid("negative"));
    }
    // `as` saturates at u64::MAX and truncates toward zero.
    Ok(number.floor() as u64)
}
