//! Versioned JSON documents persisted in `kv_entries`.
//!
//! Each store is saved under its own key as `{"version": N, "state": {...}}`.
//! Loading an older version runs the store's `migrate` step; a version newer
//! than this build understands is refused instead of being overwritten.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::adapters::db::{self, DbError};
use crate::domain::legacy::{
    normalize_history, normalize_locations, normalize_queue, normalize_session, normalize_settings,
};
use crate::domain::models::{
    ChargingLocation, ChargingRecord, ChargingSession, GasPayload, InspectionRecord, Language,
    MaintenanceRecord, VehicleSettings,
};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
    #[error("document {key} is not valid JSON: {source}")]
    Json {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("document {key} has version {found}; latest supported is {supported}")]
    UnsupportedVersion {
        key: &'static str,
        found: u32,
        supported: u32,
    },
}

pub trait StoreDocument: Serialize + Default + Sized {
    const KEY: &'static str;
    const VERSION: u32;

    /// Reads a state written by the current version.
    fn from_state(state: Value) -> Result<Self, DocumentError>;

    fn migrate(state: Value, from_version: u32) -> Result<Self, DocumentError> {
        tracing::info!(
            key = Self::KEY,
            from_version,
            to_version = Self::VERSION,
            "migrating stored document"
        );
        Self::from_state(state)
    }
}

#[derive(Debug, Deserialize)]
struct StoredEnvelope {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    state: Value,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, D> {
    version: u32,
    state: &'a D,
}

/// Loads the document, or its default when nothing has been stored yet.
pub fn load<D: StoreDocument>(connection: &Connection) -> Result<D, DocumentError> {
    Ok(load_if_present(connection)?.unwrap_or_default())
}

pub fn load_if_present<D: StoreDocument>(
    connection: &Connection,
) -> Result<Option<D>, DocumentError> {
    let Some(raw) = db::get_value(connection, D::KEY)? else {
        return Ok(None);
    };

    let envelope: StoredEnvelope = serde_json::from_str(&raw).map_err(|source| {
        DocumentError::Json {
            key: D::KEY,
            source,
        }
    })?;

    if envelope.version > D::VERSION {
        return Err(DocumentError::UnsupportedVersion {
            key: D::KEY,
            found: envelope.version,
            supported: D::VERSION,
        });
    }

    let document = if envelope.version < D::VERSION {
        D::migrate(envelope.state, envelope.version)?
    } else {
        D::from_state(envelope.state)?
    };

    Ok(Some(document))
}

pub fn save<D: StoreDocument>(
    connection: &Connection,
    document: &D,
    updated_at: &str,
) -> Result<(), DocumentError> {
    let raw = serde_json::to_string(&EnvelopeRef {
        version: D::VERSION,
        state: document,
    })
    .map_err(|source| DocumentError::Json {
        key: D::KEY,
        source,
    })?;

    db::set_value(connection, D::KEY, &raw, updated_at)?;
    Ok(())
}

pub fn exists<D: StoreDocument>(connection: &Connection) -> Result<bool, DocumentError> {
    Ok(db::has_key(connection, D::KEY)?)
}

fn array_field<'a>(state: &'a Value, field: &str) -> &'a [Value] {
    state
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// History, the active session and the offline queue share one document so
/// that completing a session is a single write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingDocument {
    pub history: Vec<ChargingRecord>,
    pub active_session: Option<ChargingSession>,
    pub offline_queue: Vec<GasPayload>,
}

impl StoreDocument for ChargingDocument {
    const KEY: &'static str = "ev-charging-v3";
    const VERSION: u32 = 1;

    // Records go through normalization even at the current version so hand
    // edited or imported numbers stored as text still load.
    fn from_state(state: Value) -> Result<Self, DocumentError> {
        let (history, dropped_records) = normalize_history(array_field(&state, "history"));
        let (offline_queue, dropped_payloads) =
            normalize_queue(array_field(&state, "offlineQueue"));
        let active_session = state
            .get("activeSession")
            .filter(|value| !value.is_null())
            .and_then(|value| normalize_session(value).ok());

        if dropped_records > 0 || dropped_payloads > 0 {
            tracing::warn!(
                dropped_records,
                dropped_payloads,
                "charging document contained unreadable entries"
            );
        }

        Ok(Self {
            history,
            active_session,
            offline_queue,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationsDocument {
    pub locations: Vec<ChargingLocation>,
}

impl StoreDocument for LocationsDocument {
    const KEY: &'static str = "ev-locations-v3";
    const VERSION: u32 = 1;

    fn from_state(state: Value) -> Result<Self, DocumentError> {
        Ok(Self {
            locations: normalize_locations(array_field(&state, "locations")),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDocument {
    pub settings: VehicleSettings,
    pub lang: Language,
    pub onboarding_done: bool,
}

impl StoreDocument for SettingsDocument {
    const KEY: &'static str = "ev-settings-v3";
    const VERSION: u32 = 1;

    fn from_state(state: Value) -> Result<Self, DocumentError> {
        Ok(Self {
            settings: state
                .get("settings")
                .map(normalize_settings)
                .unwrap_or_default(),
            lang: state
                .get("lang")
                .and_then(Value::as_str)
                .and_then(Language::parse)
                .unwrap_or_default(),
            onboarding_done: state
                .get("onboardingDone")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaintenanceDocument {
    pub maintenance_records: Vec<MaintenanceRecord>,
    pub inspection_records: Vec<InspectionRecord>,
}

impl StoreDocument for MaintenanceDocument {
    const KEY: &'static str = "ev-maintenance-v1";
    const VERSION: u32 = 0;

    fn from_state(state: Value) -> Result<Self, DocumentError> {
        if state.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(state).map_err(|source| DocumentError::Json {
            key: Self::KEY,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        ChargingDocument, DocumentError, LocationsDocument, MaintenanceDocument, SettingsDocument,
        StoreDocument, exists, load, load_if_present, save,
    };
    use crate::adapters::db::{get_value, set_value};
    use crate::domain::models::{ChargingLocation, Language};
    use crate::test_support::open_test_connection;

    const NOW: &str = "2026-02-20T10:00:00.000Z";

    #[test]
    fn missing_documents_load_as_defaults() {
        let connection = open_test_connection("documents_missing");

        let charging: ChargingDocument = load(&connection).expect("load should succeed");
        let settings: SettingsDocument = load(&connection).expect("load should succeed");

        assert!(charging.history.is_empty());
        assert_eq!(charging.active_session, None);
        assert_eq!(settings.settings.battery_capacity, 30.0);
        assert_eq!(settings.lang, Language::En);
        assert!(
            !exists::<ChargingDocument>(&connection).expect("exists should succeed")
        );
    }

    #[test]
    fn saves_documents_inside_versioned_envelope() {
        let connection = open_test_connection("documents_envelope");
        let document = LocationsDocument {
            locations: vec![ChargingLocation {
                id: "loc1".to_string(),
                name: "Home".to_string(),
                voltage: 200.0,
                amperage: 16.0,
                kw: 3.2,
            }],
        };

        save(&connection, &document, NOW).expect("save should succeed");

        let raw = get_value(&connection, LocationsDocument::KEY)
            .expect("query should succeed")
            .expect("document should be stored");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("stored json is valid");
        assert_eq!(value["version"], 1);
        assert_eq!(value["state"]["locations"][0]["name"], "Home");

        let loaded: LocationsDocument = load(&connection).expect("load should succeed");
        assert_eq!(loaded, document);
    }

    #[test]
    fn version_zero_charging_state_is_normalized() {
        let connection = open_test_connection("documents_migrate");
        let stored = json!({
            "version": 0,
            "state": {
                "history": [{"id": "r1", "timestamp": "2024-01-01T10:00", "battery": 20, "batteryAfter": 60}],
                "activeSession": null,
                "offlineQueue": [{"id": "r1", "status": "completed"}]
            }
        });
        set_value(&connection, ChargingDocument::KEY, &stored.to_string(), NOW)
            .expect("seed should succeed");

        let document: ChargingDocument = load(&connection).expect("load should succeed");

        assert_eq!(document.history[0].session.start_time, "2024-01-01T10:00");
        assert_eq!(document.history[0].session.start_battery, 20.0);
        assert_eq!(document.history[0].end_battery, 60.0);
        assert_eq!(document.offline_queue[0].kind(), "charging");
    }

    #[test]
    fn refuses_documents_from_newer_versions() {
        let connection = open_test_connection("documents_newer");
        set_value(
            &connection,
            SettingsDocument::KEY,
            &json!({"version": 9, "state": {}}).to_string(),
            NOW,
        )
        .expect("seed should succeed");

        let result = load_if_present::<SettingsDocument>(&connection);

        assert!(matches!(
            result,
            Err(DocumentError::UnsupportedVersion {
                found: 9,
                supported: 1,
                ..
            })
        ));
    }

    #[test]
    fn maintenance_document_round_trips_records() {
        let connection = open_test_connection("documents_maintenance");
        let stored = json!({
            "version": 0,
            "state": {
                "maintenanceRecords": [{
                    "id": "m1", "date": "2026-01-10", "category": "tire",
                    "description": "Winter tires", "cost": 40000,
                    "createdAt": "2026-01-10T09:00:00.000Z"
                }]
            }
        });
        set_value(&connection, MaintenanceDocument::KEY, &stored.to_string(), NOW)
            .expect("seed should succeed");

        let document: MaintenanceDocument = load(&connection).expect("load should succeed");

        assert_eq!(document.maintenance_records.len(), 1);
        assert!(document.inspection_records.is_empty());
    }
}
