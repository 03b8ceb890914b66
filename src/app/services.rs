use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapters::backup::{self, BackupError, ImportBundle};
use crate::adapters::db::{self, DbError};
use crate::adapters::documents::{
    self, ChargingDocument, DocumentError, LocationsDocument, MaintenanceDocument,
    SettingsDocument, StoreDocument,
};
use crate::adapters::gas_sync::is_secure_url;
use crate::domain::formatting::{generate_id, local_naive_from_timestamp, timestamp_to_iso8601};
use crate::domain::models::{
    ChargingLocation, ChargingRecord, ChargingSession, GasPayload, InspectionInput,
    InspectionRecord, Language, MaintenanceInput, MaintenanceRecord, NewLocation, SettingsPatch,
};
use crate::domain::session_state::{
    Clock, EndReadings, LiveSnapshot, SessionError, SessionLimits, SessionStateMachine,
    StartDefaults, StartForm, recompute_record, start_defaults,
};
use crate::domain::stats::{Period, StatsReport, build_report};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
    #[error("stored document is unusable: {0}")]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("backup rejected: {0}")]
    Backup(#[from] BackupError),
}

impl ServiceError {
    fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Settings fields plus the app-level preferences stored next to them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(flatten)]
    pub patch: SettingsPatch,
    #[serde(default)]
    pub lang: Option<Language>,
    #[serde(default)]
    pub onboarding_done: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported_records: usize,
    pub skipped_records: usize,
    pub rejected_records: usize,
    pub imported_locations: usize,
    pub rejected_locations: usize,
    pub settings_replaced: bool,
}

pub trait ChargingQueryHandler {
    fn active_session(&self) -> Result<Option<ChargingSession>, ServiceError>;
    fn live_session(&self) -> Result<LiveSnapshot, ServiceError>;
    fn start_defaults(&self) -> Result<StartDefaults, ServiceError>;
    fn history(&self) -> Result<Vec<ChargingRecord>, ServiceError>;
    fn offline_queue(&self) -> Result<Vec<GasPayload>, ServiceError>;
    fn stats(&self, period: Period) -> Result<StatsReport, ServiceError>;
    fn schema_version(&self) -> Result<u32, ServiceError>;
}

pub trait ChargingCommandHandler {
    fn start_session(&self, form: &StartForm) -> Result<ChargingSession, ServiceError>;
    fn cancel_session(&self, confirmed: bool) -> Result<ChargingSession, ServiceError>;
    /// Validates, prepends the record and clears the session in one write.
    fn complete_session(
        &self,
        end: &EndReadings,
        limits: SessionLimits,
    ) -> Result<ChargingRecord, ServiceError>;
    fn update_record(&self, record: ChargingRecord) -> Result<ChargingRecord, ServiceError>;
    fn delete_record(&self, id: &str) -> Result<(), ServiceError>;
    fn delete_records(&self, ids: &[String]) -> Result<usize, ServiceError>;
    fn delete_all_records(&self) -> Result<usize, ServiceError>;
    fn import_records(&self, records: Vec<ChargingRecord>) -> Result<usize, ServiceError>;
    fn enqueue(&self, payload: GasPayload) -> Result<usize, ServiceError>;
    /// Removes delivered payloads from the queue as it is now. Entries that
    /// were enqueued meanwhile, or already removed by another drain, are left
    /// alone.
    fn settle_queue(&self, sent: &[GasPayload]) -> Result<usize, ServiceError>;
}

pub trait SettingsHandler {
    fn settings(&self) -> Result<SettingsDocument, ServiceError>;
    fn update_settings(&self, update: SettingsUpdate) -> Result<SettingsDocument, ServiceError>;
    fn locations(&self) -> Result<Vec<ChargingLocation>, ServiceError>;
    fn add_location(&self, location: NewLocation) -> Result<ChargingLocation, ServiceError>;
    fn update_location(
        &self,
        id: &str,
        location: NewLocation,
    ) -> Result<ChargingLocation, ServiceError>;
    fn remove_location(&self, id: &str) -> Result<(), ServiceError>;
}

pub trait MaintenanceHandler {
    fn maintenance_records(&self) -> Result<Vec<MaintenanceRecord>, ServiceError>;
    fn add_maintenance(&self, input: MaintenanceInput) -> Result<MaintenanceRecord, ServiceError>;
    fn update_maintenance(
        &self,
        id: &str,
        input: MaintenanceInput,
    ) -> Result<MaintenanceRecord, ServiceError>;
    fn delete_maintenance(&self, id: &str) -> Result<(), ServiceError>;
    fn inspection_records(&self) -> Result<Vec<InspectionRecord>, ServiceError>;
    fn add_inspection(&self, input: InspectionInput) -> Result<InspectionRecord, ServiceError>;
    fn update_inspection(
        &self,
        id: &str,
        input: InspectionInput,
    ) -> Result<InspectionRecord, ServiceError>;
    fn delete_inspection(&self, id: &str) -> Result<(), ServiceError>;
}

pub trait BackupHandler {
    fn export_csv(&self, lang: Option<Language>) -> Result<String, ServiceError>;
    fn export_json(&self) -> Result<String, ServiceError>;
    fn import_backup(&self, raw: &str) -> Result<ImportSummary, ServiceError>;
}

#[derive(Clone)]
pub struct SqliteLogbookService {
    connection: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SqliteLogbookService {
    pub fn new(connection: Arc<Mutex<Connection>>, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { connection, clock }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection)
    }

    fn updated_at(&self) -> String {
        timestamp_to_iso8601(self.clock.now())
    }

    fn read<D: StoreDocument>(&self) -> Result<D, ServiceError> {
        self.with_connection(|connection| Ok(documents::load::<D>(connection)?))
    }

    /// Load, mutate and save one document under a single lock.
    fn modify<D, T>(&self, op: impl FnOnce(&mut D) -> Result<T, ServiceError>) -> Result<T, ServiceError>
    where
        D: StoreDocument,
    {
        let updated_at = self.updated_at();
        self.with_connection(|connection| {
            let mut document = documents::load::<D>(connection)?;
            let result = op(&mut document)?;
            documents::save(connection, &document, &updated_at)?;
            Ok(result)
        })
    }
}

impl ChargingQueryHandler for SqliteLogbookService {
    fn active_session(&self) -> Result<Option<ChargingSession>, ServiceError> {
        Ok(self.read::<ChargingDocument>()?.active_session)
    }

    fn live_session(&self) -> Result<LiveSnapshot, ServiceError> {
        let charging = self.read::<ChargingDocument>()?;
        let settings = self.read::<SettingsDocument>()?.settings;
        let machine = SessionStateMachine::new(charging.active_session);
        let now = local_naive_from_timestamp(self.clock.now());

        Ok(machine.live(&settings, now)?)
    }

    fn start_defaults(&self) -> Result<StartDefaults, ServiceError> {
        Ok(start_defaults(&self.read::<ChargingDocument>()?.history))
    }

    fn history(&self) -> Result<Vec<ChargingRecord>, ServiceError> {
        Ok(self.read::<ChargingDocument>()?.history)
    }

    fn offline_queue(&self) -> Result<Vec<GasPayload>, ServiceError> {
        Ok(self.read::<ChargingDocument>()?.offline_queue)
    }

    fn stats(&self, period: Period) -> Result<StatsReport, ServiceError> {
        let history = self.read::<ChargingDocument>()?.history;
        let settings = self.read::<SettingsDocument>()?.settings;
        let now = local_naive_from_timestamp(self.clock.now());

        Ok(build_report(&history, &settings, period, now))
    }

    fn schema_version(&self) -> Result<u32, ServiceError> {
        self.with_connection(|connection| Ok(db::schema_version(connection)?))
    }
}

impl ChargingCommandHandler for SqliteLogbookService {
    fn start_session(&self, form: &StartForm) -> Result<ChargingSession, ServiceError> {
        let locations = self.read::<LocationsDocument>()?.locations;
        let location = form
            .location_id
            .as_deref()
            .and_then(|id| locations.iter().find(|location| location.id == id));
        let clock = Arc::clone(&self.clock);

        let session = self.modify(|document: &mut ChargingDocument| {
            let mut machine = SessionStateMachine::new(document.active_session.take());
            let started = machine.start(form, location, &*clock).cloned();
            document.active_session = machine.into_active();
            Ok(started?)
        })?;

        tracing::info!(
            session_id = %session.id,
            start_time = %session.start_time,
            location = %session.location_name,
            "charging session started"
        );

        Ok(session)
    }

    fn cancel_session(&self, confirmed: bool) -> Result<ChargingSession, ServiceError> {
        let session = self.modify(|document: &mut ChargingDocument| {
            let mut machine = SessionStateMachine::new(document.active_session.take());
            let cancelled = machine.cancel(confirmed);
            document.active_session = machine.into_active();
            Ok(cancelled?)
        })?;

        tracing::info!(session_id = %session.id, "charging session cancelled");
        Ok(session)
    }

    fn complete_session(
        &self,
        end: &EndReadings,
        limits: SessionLimits,
    ) -> Result<ChargingRecord, ServiceError> {
        let settings = self.read::<SettingsDocument>()?.settings;

        let record = self.modify(|document: &mut ChargingDocument| {
            let mut machine = SessionStateMachine::new(document.active_session.clone());
            let record = machine.complete(end, &settings, limits)?;
            document.history.insert(0, record.clone());
            document.active_session = None;
            Ok(record)
        })?;

        tracing::info!(
            record_id = %record.id(),
            charged_kwh = record.charged_kwh,
            cost = record.cost,
            duration_min = record.duration,
            "charging session completed"
        );

        Ok(record)
    }

    fn update_record(&self, record: ChargingRecord) -> Result<ChargingRecord, ServiceError> {
        let settings = self.read::<SettingsDocument>()?.settings;
        let record = recompute_record(record, &settings);

        self.modify(|document: &mut ChargingDocument| {
            let slot = document
                .history
                .iter_mut()
                .find(|existing| existing.id() == record.id())
                .ok_or_else(|| ServiceError::not_found("record", record.id()))?;
            *slot = record.clone();
            Ok(record)
        })
    }

    fn delete_record(&self, id: &str) -> Result<(), ServiceError> {
        self.modify(|document: &mut ChargingDocument| {
            let before = document.history.len();
            document.history.retain(|record| record.id() != id);
            if document.history.len() == before {
                return Err(ServiceError::not_found("record", id));
            }
            Ok(())
        })
    }

    fn delete_records(&self, ids: &[String]) -> Result<usize, ServiceError> {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.modify(|document: &mut ChargingDocument| {
            let before = document.history.len();
            document.history.retain(|record| !ids.contains(record.id()));
            Ok(before - document.history.len())
        })
    }

    fn delete_all_records(&self) -> Result<usize, ServiceError> {
        let deleted = self.modify(|document: &mut ChargingDocument| {
            Ok(std::mem::take(&mut document.history).len())
        })?;
        tracing::warn!(deleted, "charging history cleared");
        Ok(deleted)
    }

    fn import_records(&self, records: Vec<ChargingRecord>) -> Result<usize, ServiceError> {
        self.modify(|document: &mut ChargingDocument| Ok(merge_records(document, records)))
    }

    fn enqueue(&self, payload: GasPayload) -> Result<usize, ServiceError> {
        let id = payload.id().to_string();
        let queued = self.modify(|document: &mut ChargingDocument| {
            document.offline_queue.push(payload);
            Ok(document.offline_queue.len())
        })?;
        tracing::info!(payload_id = %id, queued, "payload queued for later sync");
        Ok(queued)
    }

    fn settle_queue(&self, sent: &[GasPayload]) -> Result<usize, ServiceError> {
        self.modify(|document: &mut ChargingDocument| {
            for delivered in sent {
                if let Some(position) = document
                    .offline_queue
                    .iter()
                    .position(|queued| queued == delivered)
                {
                    document.offline_queue.remove(position);
                }
            }
            Ok(document.offline_queue.len())
        })
    }
}

/// Prepends records whose ids are not in the history yet, keeping their
/// order. Returns how many were added.
fn merge_records(document: &mut ChargingDocument, records: Vec<ChargingRecord>) -> usize {
    let mut known: HashSet<String> = document
        .history
        .iter()
        .map(|record| record.id().to_string())
        .collect();
    let fresh: Vec<ChargingRecord> = records
        .into_iter()
        .filter(|record| known.insert(record.id().to_string()))
        .collect();
    let added = fresh.len();

    if added > 0 {
        let existing = std::mem::take(&mut document.history);
        document.history = fresh;
        document.history.extend(existing);
    }

    added
}

impl SettingsHandler for SqliteLogbookService {
    fn settings(&self) -> Result<SettingsDocument, ServiceError> {
        self.read::<SettingsDocument>()
    }

    fn update_settings(&self, update: SettingsUpdate) -> Result<SettingsDocument, ServiceError> {
        let mut issues = update.patch.numeric_issues();
        let url = update.patch.gas_url.as_deref().map(str::trim).unwrap_or_default();
        if !url.is_empty() && !is_secure_url(url) {
            issues.push("gasUrl must start with https://".to_string());
        }
        if !issues.is_empty() {
            return Err(ServiceError::InvalidSettings(issues.join("; ")));
        }

        self.modify(|document: &mut SettingsDocument| {
            document.settings.apply(update.patch);
            if let Some(lang) = update.lang {
                document.lang = lang;
            }
            if let Some(done) = update.onboarding_done {
                document.onboarding_done = done;
            }
            Ok(document.clone())
        })
    }

    fn locations(&self) -> Result<Vec<ChargingLocation>, ServiceError> {
        Ok(self.read::<LocationsDocument>()?.locations)
    }

    fn add_location(&self, location: NewLocation) -> Result<ChargingLocation, ServiceError> {
        let location = location.with_id(generate_id());
        self.modify(|document: &mut LocationsDocument| {
            document.locations.push(location.clone());
            Ok(location)
        })
    }

    fn update_location(
        &self,
        id: &str,
        location: NewLocation,
    ) -> Result<ChargingLocation, ServiceError> {
        let location = location.with_id(id.to_string());
        self.modify(|document: &mut LocationsDocument| {
            let slot = document
                .locations
                .iter_mut()
                .find(|existing| existing.id == id)
                .ok_or_else(|| ServiceError::not_found("location", id))?;
            *slot = location.clone();
            Ok(location)
        })
    }

    fn remove_location(&self, id: &str) -> Result<(), ServiceError> {
        self.modify(|document: &mut LocationsDocument| {
            let before = document.locations.len();
            document.locations.retain(|location| location.id != id);
            if document.locations.len() == before {
                return Err(ServiceError::not_found("location", id));
            }
            Ok(())
        })
    }
}

impl MaintenanceHandler for SqliteLogbookService {
    fn maintenance_records(&self) -> Result<Vec<MaintenanceRecord>, ServiceError> {
        Ok(self.read::<MaintenanceDocument>()?.maintenance_records)
    }

    fn add_maintenance(&self, input: MaintenanceInput) -> Result<MaintenanceRecord, ServiceError> {
        let record = input.into_record(generate_id(), self.updated_at());
        self.modify(|document: &mut MaintenanceDocument| {
            document.maintenance_records.insert(0, record.clone());
            Ok(record)
        })
    }

    fn update_maintenance(
        &self,
        id: &str,
        input: MaintenanceInput,
    ) -> Result<MaintenanceRecord, ServiceError> {
        self.modify(|document: &mut MaintenanceDocument| {
            let slot = document
                .maintenance_records
                .iter_mut()
                .find(|existing| existing.id == id)
                .ok_or_else(|| ServiceError::not_found("maintenance record", id))?;
            let created_at = std::mem::take(&mut slot.created_at);
            *slot = input.into_record(id.to_string(), created_at);
            Ok(slot.clone())
        })
    }

    fn delete_maintenance(&self, id: &str) -> Result<(), ServiceError> {
        self.modify(|document: &mut MaintenanceDocument| {
            let before = document.maintenance_records.len();
            document.maintenance_records.retain(|record| record.id != id);
            if document.maintenance_records.len() == before {
                return Err(ServiceError::not_found("maintenance record", id));
            }
            Ok(())
        })
    }

    fn inspection_records(&self) -> Result<Vec<InspectionRecord>, ServiceError> {
        Ok(self.read::<MaintenanceDocument>()?.inspection_records)
    }

    fn add_inspection(&self, input: InspectionInput) -> Result<InspectionRecord, ServiceError> {
        let record = input.into_record(generate_id(), self.updated_at());
        self.modify(|document: &mut MaintenanceDocument| {
            document.inspection_records.insert(0, record.clone());
            Ok(record)
        })
    }

    fn update_inspection(
        &self,
        id: &str,
        input: InspectionInput,
    ) -> Result<InspectionRecord, ServiceError> {
        self.modify(|document: &mut MaintenanceDocument| {
            let slot = document
                .inspection_records
                .iter_mut()
                .find(|existing| existing.id == id)
                .ok_or_else(|| ServiceError::not_found("inspection record", id))?;
            let created_at = std::mem::take(&mut slot.created_at);
            *slot = input.into_record(id.to_string(), created_at);
            Ok(slot.clone())
        })
    }

    fn delete_inspection(&self, id: &str) -> Result<(), ServiceError> {
        self.modify(|document: &mut MaintenanceDocument| {
            let before = document.inspection_records.len();
            document.inspection_records.retain(|record| record.id != id);
            if document.inspection_records.len() == before {
                return Err(ServiceError::not_found("inspection record", id));
            }
            Ok(())
        })
    }
}

impl BackupHandler for SqliteLogbookService {
    fn export_csv(&self, lang: Option<Language>) -> Result<String, ServiceError> {
        let history = self.read::<ChargingDocument>()?.history;
        let settings = self.read::<SettingsDocument>()?;
        let lang = lang.unwrap_or(settings.lang);

        Ok(backup::export_csv(&history, &settings.settings, lang)?)
    }

    fn export_json(&self) -> Result<String, ServiceError> {
        let history = self.read::<ChargingDocument>()?.history;
        let locations = self.read::<LocationsDocument>()?.locations;
        let settings = self.read::<SettingsDocument>()?.settings;

        Ok(backup::export_json(
            &history,
            &locations,
            &settings,
            self.updated_at(),
        )?)
    }

    fn import_backup(&self, raw: &str) -> Result<ImportSummary, ServiceError> {
        let ImportBundle {
            records,
            locations,
            settings,
            rejected_records,
            rejected_locations,
        } = backup::parse_backup(raw)?;
        let offered = records.len();
        let updated_at = self.updated_at();

        let summary = self.with_connection(|connection| {
            let mut charging = documents::load::<ChargingDocument>(connection)?;
            let imported_records = merge_records(&mut charging, records);

            let mut stored_locations = documents::load::<LocationsDocument>(connection)?;
            let mut known: HashSet<String> = stored_locations
                .locations
                .iter()
                .map(|location| location.id.clone())
                .collect();
            let mut imported_locations = 0;
            for location in locations {
                if known.insert(location.id.clone()) {
                    stored_locations.locations.push(location);
                    imported_locations += 1;
                }
            }

            let settings_replaced = settings.is_some();
            let mut stored_settings = documents::load::<SettingsDocument>(connection)?;
            if let Some(settings) = settings {
                stored_settings.settings = settings;
            }

            let transaction = connection.unchecked_transaction().map_err(DbError::from)?;
            documents::save(&transaction, &charging, &updated_at)?;
            documents::save(&transaction, &stored_locations, &updated_at)?;
            documents::save(&transaction, &stored_settings, &updated_at)?;
            transaction.commit().map_err(DbError::from)?;

            Ok(ImportSummary {
                imported_records,
                skipped_records: offered - imported_records,
                rejected_records,
                imported_locations,
                rejected_locations,
                settings_replaced,
            })
        })?;

        tracing::info!(
            imported_records = summary.imported_records,
            skipped_records = summary.skipped_records,
            rejected_records = summary.rejected_records,
            imported_locations = summary.imported_locations,
            settings_replaced = summary.settings_replaced,
            "backup imported"
        );

        Ok(summary)
    }
}
