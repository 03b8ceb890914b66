use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use actix_web::web;
use serde::Serialize;

use crate::adapters::connectivity::ConnectivityProbe;
use crate::adapters::gas_sync::{
    GasTransport, build_inspection_payload, build_maintenance_payload, build_payload,
    retry_queue, send,
};
use crate::app::services::{
    ChargingCommandHandler, ChargingQueryHandler, ServiceError, SettingsHandler,
};
use crate::domain::models::{ChargingRecord, GasPayload, InspectionRecord, MaintenanceRecord};
use crate::domain::session_state::{EndReadings, SessionLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompletionOutcome {
    SavedAndSent,
    SavedQueued,
    /// No sync endpoint configured.
    Saved,
    /// The send failed and the payload could not be queued either.
    SavedNotSynced,
}

impl CompletionOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::SavedAndSent => "Saved and sent",
            Self::SavedQueued => "Saved; queued for sync",
            Self::Saved => "Saved",
            Self::SavedNotSynced => "Saved; sync failed and was not queued",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completed<T> {
    pub record: T,
    pub outcome: CompletionOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub sent_count: usize,
    pub remaining: usize,
    pub online: bool,
    /// Another drain was already running in this process.
    pub skipped: bool,
}

/// Lets one queue drain run at a time. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct DrainGate {
    busy: Arc<AtomicBool>,
}

impl DrainGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_enter(&self) -> Option<DrainPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainPermit {
                busy: Arc::clone(&self.busy),
            })
    }
}

struct DrainPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for DrainPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Saves the record first; delivery problems after that point only change
/// the reported outcome.
pub async fn complete_session<S>(
    service: &S,
    transport: &dyn GasTransport,
    end: &EndReadings,
    limits: SessionLimits,
) -> Result<Completed<ChargingRecord>, ServiceError>
where
    S: ChargingCommandHandler + SettingsHandler,
{
    let record = service.complete_session(end, limits)?;
    let outcome = deliver(service, transport, build_payload(&record)).await;

    Ok(Completed { record, outcome })
}

pub async fn sync_maintenance<S>(
    service: &S,
    transport: &dyn GasTransport,
    record: MaintenanceRecord,
) -> Result<Completed<MaintenanceRecord>, ServiceError>
where
    S: ChargingCommandHandler + SettingsHandler,
{
    let outcome = deliver(service, transport, build_maintenance_payload(&record)).await;
    Ok(Completed { record, outcome })
}

pub async fn sync_inspection<S>(
    service: &S,
    transport: &dyn GasTransport,
    record: InspectionRecord,
) -> Result<Completed<InspectionRecord>, ServiceError>
where
    S: ChargingCommandHandler + SettingsHandler,
{
    let outcome = deliver(service, transport, build_inspection_payload(&record)).await;
    Ok(Completed { record, outcome })
}

/// The record is already stored, so storage errors here are logged rather
/// than returned.
async fn deliver<S>(
    service: &S,
    transport: &dyn GasTransport,
    payload: GasPayload,
) -> CompletionOutcome
where
    S: ChargingCommandHandler + SettingsHandler,
{
    let id = payload.id().to_string();
    match try_deliver(service, transport, payload).await {
        Ok(outcome) => outcome,
        Err(error) => {
            tracing::error!(id = %id, error = %error, "payload neither sent nor queued");
            CompletionOutcome::SavedNotSynced
        }
    }
}

async fn try_deliver<S>(
    service: &S,
    transport: &dyn GasTransport,
    payload: GasPayload,
) -> Result<CompletionOutcome, ServiceError>
where
    S: ChargingCommandHandler + SettingsHandler,
{
    let url = service.settings()?.settings.gas_url;
    if url.is_empty() {
        return Ok(CompletionOutcome::Saved);
    }

    match send(transport, &url, &payload).await {
        Ok(true) => Ok(CompletionOutcome::SavedAndSent),
        Ok(false) => {
            service.enqueue(payload)?;
            Ok(CompletionOutcome::SavedQueued)
        }
        Err(error) => {
            tracing::warn!(id = payload.id(), error = %error, "payload not sent");
            service.enqueue(payload)?;
            Ok(CompletionOutcome::SavedQueued)
        }
    }
}

/// Runs the blocking probe on actix's blocking pool.
pub async fn check_online(probe: Arc<dyn ConnectivityProbe>, url: String) -> bool {
    if url.is_empty() {
        return false;
    }

    match web::block(move || probe.is_online(&url)).await {
        Ok(online) => online,
        Err(error) => {
            tracing::warn!(error = %error, "connectivity probe did not finish");
            false
        }
    }
}

/// One full pass over the offline queue. Returns a skipped report when
/// another pass holds the gate. Only delivered payloads are removed when
/// settling, so items enqueued during the pass keep their place.
pub async fn drain_queue<S>(
    service: &S,
    transport: &dyn GasTransport,
    probe: Arc<dyn ConnectivityProbe>,
    gate: &DrainGate,
) -> Result<DrainReport, ServiceError>
where
    S: ChargingCommandHandler + ChargingQueryHandler + SettingsHandler,
{
    let Some(_permit) = gate.try_enter() else {
        tracing::debug!("queue drain already running");
        return Ok(DrainReport {
            sent_count: 0,
            remaining: service.offline_queue()?.len(),
            online: false,
            skipped: true,
        });
    };

    let queue = service.offline_queue()?;
    if queue.is_empty() {
        return Ok(DrainReport {
            sent_count: 0,
            remaining: 0,
            online: false,
            skipped: false,
        });
    }

    let url = service.settings()?.settings.gas_url;
    let online = check_online(probe, url.clone()).await;

    let outcome = retry_queue(transport, &url, queue, online).await;
    let remaining = if outcome.sent.is_empty() {
        service.offline_queue()?.len()
    } else {
        service.settle_queue(&outcome.sent)?
    };

    Ok(DrainReport {
        sent_count: outcome.sent_count,
        remaining,
        online,
        skipped: false,
    })
}
