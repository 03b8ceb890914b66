//! Normalization of stored charging data into the canonical record shape.
//!
//! Older clients wrote `timestamp`/`battery`/`batteryAfter` instead of
//! `startTime`/`startBattery`/`endBattery`, and some stored numbers as text
//! (`"kw": "3,2"`). Everything read from storage or an import passes through
//! here once, so the rest of the crate only ever sees [`ChargingRecord`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::formatting::generate_id;
use crate::domain::models::{
    ChargingLocation, ChargingRecord, ChargingSession, DEFAULT_BATTERY_CAPACITY,
    DEFAULT_ELECTRICITY_RATE, DEFAULT_NIGHT_RATE, GasPayload, VehicleSettings,
};

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("entry must be a JSON object")]
    InvalidPayloadType,
    #[error("queued payload is unreadable: {0}")]
    InvalidQueueItem(String),
}

const START_TIME_KEYS: &[&str] = &["startTime", "timestamp"];
const START_BATTERY_KEYS: &[&str] = &["startBattery", "battery"];
const END_BATTERY_KEYS: &[&str] = &["endBattery", "batteryAfter"];

pub fn normalize_session(payload: &Value) -> Result<ChargingSession, NormalizeError> {
    let object = payload.as_object().ok_or(NormalizeError::InvalidPayloadType)?;
    Ok(session_from_object(object))
}

pub fn normalize_record(payload: &Value) -> Result<ChargingRecord, NormalizeError> {
    let object = payload.as_object().ok_or(NormalizeError::InvalidPayloadType)?;

    Ok(ChargingRecord {
        session: session_from_object(object),
        end_time: find_text(object, &["endTime"]).unwrap_or_default(),
        end_battery: find_number(object, END_BATTERY_KEYS).unwrap_or(0.0),
        end_range: find_number(object, &["endRange"]).unwrap_or(0.0),
        charged_kwh: find_number(object, &["chargedKwh"]).unwrap_or(0.0),
        cost: find_number(object, &["cost"]).map_or(0, |value| value.round() as i64),
        duration: find_number(object, &["duration"]).map_or(0, |value| value.round() as i64),
        charge_speed: find_number(object, &["chargeSpeed"]).unwrap_or(0.0),
        soh: find_number(object, &["soh"]).filter(|value| *value > 0.0),
    })
}

pub fn normalize_location(payload: &Value) -> Result<ChargingLocation, NormalizeError> {
    let object = payload.as_object().ok_or(NormalizeError::InvalidPayloadType)?;

    Ok(ChargingLocation {
        id: find_id(object).unwrap_or_else(generate_id),
        name: find_text(object, &["name"]).unwrap_or_default(),
        voltage: find_number(object, &["voltage"]).unwrap_or(0.0),
        amperage: find_number(object, &["amperage"]).unwrap_or(0.0),
        kw: find_number(object, &["kw"]).unwrap_or(0.0),
    })
}

/// Normalizes every entry that is an object; anything else is dropped and
/// counted.
pub fn normalize_history(entries: &[Value]) -> (Vec<ChargingRecord>, usize) {
    let mut records = Vec::with_capacity(entries.len());
    let mut dropped = 0;

    for entry in entries {
        match normalize_record(entry) {
            Ok(record) => records.push(record),
            Err(error) => {
                dropped += 1;
                tracing::warn!(error = %error, "dropping unreadable history entry");
            }
        }
    }

    (records, dropped)
}

/// Missing, zero or unreadable settings fall back to the defaults.
pub fn normalize_settings(payload: &Value) -> VehicleSettings {
    let Some(object) = payload.as_object() else {
        return VehicleSettings::default();
    };
    let positive_or = |aliases: &[&str], fallback: f64| {
        find_number(object, aliases)
            .filter(|value| *value > 0.0)
            .unwrap_or(fallback)
    };

    VehicleSettings {
        battery_capacity: positive_or(&["batteryCapacity"], DEFAULT_BATTERY_CAPACITY),
        electricity_rate: positive_or(&["electricityRate"], DEFAULT_ELECTRICITY_RATE),
        night_rate: positive_or(&["nightRate"], DEFAULT_NIGHT_RATE),
        use_night_rate: find_value(object, "useNightRate")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        gas_url: find_text(object, &["gasUrl"])
            .map(|url| url.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Queue entries written before maintenance sync existed carry no `type`
/// and are charging payloads. Non-string scalars are stringified.
pub fn normalize_queue_item(payload: &Value) -> Result<GasPayload, NormalizeError> {
    let object = payload.as_object().ok_or(NormalizeError::InvalidPayloadType)?;

    let mut fields = Map::with_capacity(object.len() + 1);
    for (key, value) in object {
        let text = match value {
            Value::String(text) => Value::String(text.clone()),
            Value::Number(number) => Value::String(
                number
                    .as_f64()
                    .map(|value| format!("{value}"))
                    .unwrap_or_else(|| number.to_string()),
            ),
            Value::Bool(flag) => Value::String(flag.to_string()),
            _ => Value::String(String::new()),
        };
        fields.insert(key.clone(), text);
    }

    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .filter(|kind| !kind.is_empty())
        .unwrap_or("charging")
        .to_string();
    fields.insert("type".to_string(), Value::String(kind));

    serde_json::from_value(Value::Object(fields))
        .map_err(|error| NormalizeError::InvalidQueueItem(error.to_string()))
}

pub fn normalize_queue(entries: &[Value]) -> (Vec<GasPayload>, usize) {
    let mut queue = Vec::with_capacity(entries.len());
    let mut dropped = 0;

    for entry in entries {
        match normalize_queue_item(entry) {
            Ok(payload) => queue.push(payload),
            Err(error) => {
                dropped += 1;
                tracing::warn!(error = %error, "dropping unreadable queue entry");
            }
        }
    }

    (queue, dropped)
}

pub fn normalize_locations(entries: &[Value]) -> Vec<ChargingLocation> {
    entries
        .iter()
        .filter_map(|entry| match normalize_location(entry) {
            Ok(location) => Some(location),
            Err(error) => {
                tracing::warn!(error = %error, "dropping unreadable location entry");
                None
            }
        })
        .collect()
}

fn session_from_object(object: &Map<String, Value>) -> ChargingSession {
    ChargingSession {
        id: find_id(object).unwrap_or_else(generate_id),
        start_time: find_text(object, START_TIME_KEYS).unwrap_or_default(),
        odometer: find_number(object, &["odometer"]).unwrap_or(0.0),
        start_battery: find_number(object, START_BATTERY_KEYS).unwrap_or(0.0),
        start_range: find_number(object, &["startRange"]).unwrap_or(0.0),
        efficiency: find_number(object, &["efficiency"]).unwrap_or(0.0),
        started_at: find_number(object, &["startedAt"]).map_or(0, |value| value as i64),
        location_name: find_text(object, &["locationName"]).unwrap_or_default(),
        voltage: find_number(object, &["voltage"]).unwrap_or(0.0),
        amperage: find_number(object, &["amperage"]).unwrap_or(0.0),
        kw: find_number(object, &["kw"]).unwrap_or(0.0),
    }
}

fn find_id(object: &Map<String, Value>) -> Option<String> {
    match find_value(object, "id")? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn find_text(object: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| match find_value(object, alias)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    })
}

/// First alias that holds a usable number wins, so a `null` canonical field
/// still falls through to its legacy alias.
fn find_number(object: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    aliases
        .iter()
        .find_map(|alias| find_value(object, alias).and_then(parse_f64))
}

fn find_value<'a>(object: &'a Map<String, Value>, alias: &str) -> Option<&'a Value> {
    if let Some(value) = object.get(alias) {
        return Some(value);
    }

    let normalized_alias = normalize_key(alias);
    object
        .iter()
        .find_map(|(key, value)| (normalize_key(key) == normalized_alias).then_some(value))
}

fn normalize_key(value: &str) -> String {
    value
        .chars()
        .filter(|char| char.is_ascii_alphanumeric())
        .flat_map(|char| char.to_lowercase())
        .collect()
}

fn parse_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => parse_f64_from_text(text),
        _ => None,
    }
}

fn parse_f64_from_text(text: &str) -> Option<f64> {
    extract_numeric_tokens(text).into_iter().find_map(|token| {
        normalize_numeric_token(&token).and_then(|normalized| normalized.parse::<f64>().ok())
    })
}

fn extract_numeric_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for char in text.chars() {
        if char.is_ascii_digit() || char == ',' || char == '.' || char == '-' {
            current.push(char);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// `1.234,5` and `1,234.5` both mean 1234.5; a lone comma is a decimal
/// separator.
fn normalize_numeric_token(token: &str) -> Option<String> {
    let comma_count = token.matches(',').count();
    let dot_count = token.matches('.').count();

    if comma_count > 0 && dot_count > 0 {
        let comma_index = token.rfind(',')?;
        let dot_index = token.rfind('.')?;
        if comma_index > dot_index {
            return Some(token.replace('.', "").replace(',', "."));
        }
        return Some(token.replace(',', ""));
    }

    if comma_count > 0 {
        return Some(token.replace(',', "."));
    }

    Some(token.to_string())
}
