//! One-time import of the flat keys written by the first version of the
//! logbook. Every legacy key is read on its own; a key that fails to parse
//! contributes its default and the rest of the migration still runs.

use rusqlite::Connection;
use serde_json::Value;

use crate::adapters::db;
use crate::adapters::documents::{
    self, ChargingDocument, DocumentError, LocationsDocument, SettingsDocument, StoreDocument,
};
use crate::domain::legacy::{
    normalize_history, normalize_locations, normalize_queue, normalize_session, normalize_settings,
};
use crate::domain::models::Language;

pub const MIGRATION_FLAG_KEY: &str = "ev_gravity_migrated_v3";
pub const LEGACY_DATA_KEY: &str = "ev_gravity_data_v1";
pub const LEGACY_SETTINGS_KEY: &str = "ev_gravity_settings_v1";
pub const LEGACY_SESSION_KEY: &str = "ev_gravity_session_v1";
pub const LEGACY_LOCATIONS_KEY: &str = "ev_gravity_locations_v1";
pub const LEGACY_QUEUE_KEY: &str = "ev_gravity_queue_v1";
pub const LEGACY_ONBOARDING_KEY: &str = "ev_gravity_onboarding_done";
pub const LEGACY_LANG_KEY: &str = "ev_gravity_lang";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    AlreadyMigrated,
    Migrated { documents_written: usize },
}

pub fn needs_migration(connection: &Connection) -> Result<bool, DocumentError> {
    Ok(!db::has_key(connection, MIGRATION_FLAG_KEY)?)
}

/// Writes the versioned documents that do not exist yet from the legacy keys
/// and sets the flag. Running it again is a no-op.
pub fn migrate_legacy(
    connection: &Connection,
    updated_at: &str,
) -> Result<MigrationOutcome, DocumentError> {
    if !needs_migration(connection)? {
        return Ok(MigrationOutcome::AlreadyMigrated);
    }

    let mut documents_written = 0;

    if !documents::exists::<ChargingDocument>(connection)? {
        documents::save(connection, &legacy_charging(connection), updated_at)?;
        documents_written += 1;
    }

    if !documents::exists::<LocationsDocument>(connection)? {
        documents::save(connection, &legacy_locations(connection), updated_at)?;
        documents_written += 1;
    }

    if !documents::exists::<SettingsDocument>(connection)? {
        documents::save(connection, &legacy_settings(connection), updated_at)?;
        documents_written += 1;
    }

    db::set_value(connection, MIGRATION_FLAG_KEY, "true", updated_at)?;

    tracing::info!(
        documents_written,
        charging_key = ChargingDocument::KEY,
        "legacy storage migration complete"
    );

    Ok(MigrationOutcome::Migrated { documents_written })
}

fn legacy_charging(connection: &Connection) -> ChargingDocument {
    let (history, dropped_records) = read_json(connection, LEGACY_DATA_KEY)
        .as_ref()
        .and_then(Value::as_array)
        .map(|entries| normalize_history(entries))
        .unwrap_or_default();

    let active_session = read_json(connection, LEGACY_SESSION_KEY)
        .filter(|value| !value.is_null())
        .and_then(|value| normalize_session(&value).ok());

    let (offline_queue, dropped_payloads) = read_json(connection, LEGACY_QUEUE_KEY)
        .as_ref()
        .and_then(Value::as_array)
        .map(|entries| normalize_queue(entries))
        .unwrap_or_default();

    tracing::info!(
        records = history.len(),
        dropped_records,
        queued = offline_queue.len(),
        dropped_payloads,
        has_active_session = active_session.is_some(),
        "read legacy charging data"
    );

    ChargingDocument {
        history,
        active_session,
        offline_queue,
    }
}

fn legacy_locations(connection: &Connection) -> LocationsDocument {
    let locations = read_json(connection, LEGACY_LOCATIONS_KEY)
        .as_ref()
        .and_then(Value::as_array)
        .map(|entries| normalize_locations(entries))
        .unwrap_or_default();

    LocationsDocument { locations }
}

fn legacy_settings(connection: &Connection) -> SettingsDocument {
    let settings = read_json(connection, LEGACY_SETTINGS_KEY)
        .map(|value| normalize_settings(&value))
        .unwrap_or_default();

    let lang = read_raw(connection, LEGACY_LANG_KEY)
        .as_deref()
        .and_then(Language::parse)
        .unwrap_or_default();

    let onboarding_done = read_raw(connection, LEGACY_ONBOARDING_KEY).as_deref() == Some("true");

    SettingsDocument {
        settings,
        lang,
        onboarding_done,
    }
}

fn read_raw(connection: &Connection, key: &str) -> Option<String> {
    match db::get_value(connection, key) {
        Ok(value) => value.filter(|raw| !raw.is_empty()),
        Err(error) => {
            tracing::warn!(key, error = %error, "failed to read legacy key");
            None
        }
    }
}

fn read_json(connection: &Connection, key: &str) -> Option<Value> {
    let raw = read_raw(connection, key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(key, error = %error, "ignoring unparseable legacy key");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        LEGACY_DATA_KEY, LEGACY_LANG_KEY, LEGACY_ONBOARDING_KEY, LEGACY_QUEUE_KEY,
        LEGACY_SESSION_KEY, LEGACY_SETTINGS_KEY, MigrationOutcome, migrate_legacy,
        needs_migration,
    };
    use crate::adapters::db::set_value;
    use crate::adapters::documents::{self, ChargingDocument, LocationsDocument, SettingsDocument};
    use crate::domain::models::{ChargingLocation, Language};
    use crate::test_support::open_test_connection;

    const NOW: &str = "2026-02-20T10:00:00.000Z";

    fn seed(connection: &rusqlite::Connection, key: &str, value: &str) {
        set_value(connection, key, value, NOW).expect("seed should succeed");
    }

    #[test]
    fn migrates_all_legacy_keys() {
        let connection = open_test_connection("legacy_all_keys");
        seed(
            &connection,
            LEGACY_DATA_KEY,
            &json!([{"id": "r1", "timestamp": "2024-05-01T21:30", "battery": 35, "batteryAfter": 80}])
                .to_string(),
        );
        seed(
            &connection,
            LEGACY_SETTINGS_KEY,
            &json!({"batteryCapacity": 40, "electricityRate": 0}).to_string(),
        );
        seed(
            &connection,
            LEGACY_SESSION_KEY,
            &json!({"id": "s1", "startTime": "2024-05-02T08:00", "startBattery": 20}).to_string(),
        );
        seed(
            &connection,
            LEGACY_QUEUE_KEY,
            &json!([{"id": "r1", "status": "completed"}]).to_string(),
        );
        seed(&connection, LEGACY_ONBOARDING_KEY, "true");
        seed(&connection, LEGACY_LANG_KEY, "ja");

        let outcome = migrate_legacy(&connection, NOW).expect("migration should succeed");
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                documents_written: 3
            }
        );

        let charging: ChargingDocument =
            documents::load(&connection).expect("charging document should load");
        assert_eq!(charging.history[0].session.start_time, "2024-05-01T21:30");
        assert_eq!(charging.history[0].end_battery, 80.0);
        assert_eq!(
            charging.active_session.map(|session| session.id).as_deref(),
            Some("s1")
        );
        assert_eq!(charging.offline_queue.len(), 1);

        let settings: SettingsDocument =
            documents::load(&connection).expect("settings document should load");
        assert_eq!(settings.settings.battery_capacity, 40.0);
        assert_eq!(settings.settings.electricity_rate, 31.0);
        assert_eq!(settings.lang, Language::Ja);
        assert!(settings.onboarding_done);

        assert!(!needs_migration(&connection).expect("flag lookup should succeed"));
    }

    #[test]
    fn corrupt_key_only_loses_that_piece() {
        let connection = open_test_connection("legacy_corrupt_key");
        seed(&connection, LEGACY_DATA_KEY, "{not json");
        seed(&connection, LEGACY_LANG_KEY, "ja");

        migrate_legacy(&connection, NOW).expect("migration should succeed");

        let charging: ChargingDocument =
            documents::load(&connection).expect("charging document should load");
        let settings: SettingsDocument =
            documents::load(&connection).expect("settings document should load");
        assert!(charging.history.is_empty());
        assert_eq!(settings.lang, Language::Ja);
    }

    #[test]
    fn leaves_existing_documents_untouched_and_is_idempotent() {
        let connection = open_test_connection("legacy_idempotent");
        let existing = LocationsDocument {
            locations: vec![ChargingLocation {
                id: "loc1".to_string(),
                name: "Current".to_string(),
                voltage: 200.0,
                amperage: 16.0,
                kw: 3.2,
            }],
        };
        documents::save(&connection, &existing, NOW).expect("save should succeed");
        seed(
            &connection,
            super::LEGACY_LOCATIONS_KEY,
            &json!([{"id": "old", "name": "Legacy"}]).to_string(),
        );

        let first = migrate_legacy(&connection, NOW).expect("migration should succeed");
        let second = migrate_legacy(&connection, NOW).expect("second run should succeed");

        assert_eq!(
            first,
            MigrationOutcome::Migrated {
                documents_written: 2
            }
        );
        assert_eq!(second, MigrationOutcome::AlreadyMigrated);

        let locations: LocationsDocument =
            documents::load(&connection).expect("locations should load");
        assert_eq!(locations, existing);
    }
}
