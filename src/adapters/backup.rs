use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::adapters::gas_sync::is_secure_url;
use crate::domain::calculations::{charge_speed_kw, charged_kwh, cost, duration_minutes};
use crate::domain::formatting::{format_date, format_duration, number_or_empty, parse_local_datetime};
use crate::domain::legacy::{normalize_location, normalize_record, normalize_settings};
use crate::domain::models::{
    ChargingLocation, ChargingRecord, DEFAULT_ELECTRICITY_RATE, Language, VehicleSettings,
};

pub const BACKUP_FORMAT_VERSION: &str = "3.0.0";
const BOM: &str = "\u{feff}";

const HEADERS_EN: [&str; 14] = [
    "Date",
    "Start Time",
    "End Time",
    "Odometer",
    "Start %",
    "End %",
    "Start Range",
    "End Range",
    "Charged kWh",
    "Cost (JPY)",
    "Duration",
    "Charge Speed (kW)",
    "Efficiency",
    "Location",
];

const HEADERS_JA: [&str; 14] = [
    "日時",
    "開始時刻",
    "終了時刻",
    "走行距離",
    "開始%",
    "終了%",
    "開始航続",
    "終了航続",
    "充電量kWh",
    "コスト(円)",
    "所要時間",
    "充電速度(kW)",
    "電費",
    "場所",
];

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("backup must be a JSON object")]
    NotAnObject,
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv buffer could not be finalized")]
    CsvBuffer,
}

fn headers(lang: Language) -> &'static [&'static str; 14] {
    match lang {
        Language::En => &HEADERS_EN,
        Language::Ja => &HEADERS_JA,
    }
}

/// UTF-8 CSV with a BOM so spreadsheet apps detect the encoding. Derived
/// columns are recomputed from the battery deltas and timestamps.
pub fn export_csv(
    history: &[ChargingRecord],
    settings: &VehicleSettings,
    lang: Language,
) -> Result<String, BackupError> {
    let capacity = settings.capacity_or_default();
    let rate = if settings.electricity_rate > 0.0 {
        settings.electricity_rate
    } else {
        DEFAULT_ELECTRICITY_RATE
    };

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for record in history {
        let session = &record.session;
        let kwh = charged_kwh(capacity, session.start_battery, record.end_battery);
        let duration = if session.start_time.is_empty() || record.end_time.is_empty() {
            0.0
        } else {
            duration_minutes(&session.start_time, &record.end_time)
        };

        writer.write_record([
            format_date(&session.start_time),
            session.start_time.clone(),
            record.end_time.clone(),
            number_or_empty(session.odometer),
            number_or_empty(session.start_battery),
            number_or_empty(record.end_battery),
            number_or_empty(session.start_range),
            number_or_empty(record.end_range),
            format!("{kwh:.1}"),
            cost(kwh, rate).to_string(),
            format_duration(duration),
            format!("{:.1}", charge_speed_kw(kwh, duration)),
            number_or_empty(session.efficiency),
            session.location_name.clone(),
        ])?;
    }

    let rows = writer.into_inner().map_err(|_| BackupError::CsvBuffer)?;
    let rows = String::from_utf8(rows).map_err(|_| BackupError::CsvBuffer)?;

    Ok(format!("{BOM}{}\n{rows}", headers(lang).join(",")))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument<'a> {
    pub version: &'static str,
    pub exported_at: String,
    pub history: &'a [ChargingRecord],
    pub locations: &'a [ChargingLocation],
    pub settings: &'a VehicleSettings,
}

pub fn export_json(
    history: &[ChargingRecord],
    locations: &[ChargingLocation],
    settings: &VehicleSettings,
    exported_at: String,
) -> Result<String, BackupError> {
    let document = BackupDocument {
        version: BACKUP_FORMAT_VERSION,
        exported_at,
        history,
        locations,
        settings,
    };

    Ok(serde_json::to_string_pretty(&document)?)
}

/// Entries that passed validation; nothing has been merged yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportBundle {
    pub records: Vec<ChargingRecord>,
    pub locations: Vec<ChargingLocation>,
    pub settings: Option<VehicleSettings>,
    pub rejected_records: usize,
    pub rejected_locations: usize,
}

/// Parses a backup. An unparseable document fails as a whole; individual
/// entries that fail validation are dropped and counted.
pub fn parse_backup(raw: &str) -> Result<ImportBundle, BackupError> {
    let value: Value = serde_json::from_str(raw)?;
    let object = value.as_object().ok_or(BackupError::NotAnObject)?;

    let mut bundle = ImportBundle::default();

    for entry in object
        .get("history")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        match validate_record(entry) {
            Some(record) => bundle.records.push(record),
            None => bundle.rejected_records += 1,
        }
    }

    for entry in object
        .get("locations")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        match validate_location(entry) {
            Some(location) => bundle.locations.push(location),
            None => bundle.rejected_locations += 1,
        }
    }

    bundle.settings = object.get("settings").and_then(validate_settings);

    if bundle.rejected_records > 0 || bundle.rejected_locations > 0 {
        tracing::warn!(
            rejected_records = bundle.rejected_records,
            rejected_locations = bundle.rejected_locations,
            "backup contained invalid entries"
        );
    }

    Ok(bundle)
}

fn has_id(entry: &Value) -> bool {
    match entry.get("id") {
        Some(Value::String(id)) => !id.trim().is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

/// A record needs an id and a readable start time; everything else may be
/// missing and falls back to the normalization defaults.
fn validate_record(entry: &Value) -> Option<ChargingRecord> {
    if !has_id(entry) {
        return None;
    }
    let record = normalize_record(entry).ok()?;
    parse_local_datetime(&record.session.start_time)?;
    Some(record)
}

fn validate_location(entry: &Value) -> Option<ChargingLocation> {
    if !has_id(entry) {
        return None;
    }
    normalize_location(entry)
        .ok()
        .filter(|location| !location.name.trim().is_empty())
}

fn validate_settings(entry: &Value) -> Option<VehicleSettings> {
    if !entry.is_object() {
        return None;
    }
    let settings = normalize_settings(entry);
    if !settings.gas_url.is_empty() && !is_secure_url(&settings.gas_url) {
        tracing::warn!("ignoring imported settings with a non-https sync url");
        return None;
    }
    Some(settings)
}
