use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use chrono::Utc;
use rusqlite::Connection;

use crate::adapters::api::{ApiState, configure_routes, cors};
use crate::adapters::connectivity::{ConnectivityProbe, TcpConnectivityProbe};
use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::gas_sync::{GasTransport, ReqwestGasTransport};
use crate::adapters::legacy_migration::{MigrationOutcome, migrate_legacy};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::services::SqliteLogbookService;
use crate::app::workflow::{DrainGate, DrainReport, drain_queue};
use crate::domain::formatting::timestamp_to_iso8601;
use crate::domain::notifications::NotificationCenter;
use crate::domain::session_state::{Clock, TimestampMs};

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(Utc::now().timestamp_millis())
    }
}

/// Opens the database, applies schema migrations and imports legacy keys
/// when that has not happened yet.
pub fn open_store(db_path: &str, clock: &dyn Clock) -> Result<Connection, AppError> {
    if let Some(parent) = Path::new(db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(AppError::database_init)?;
    }

    let mut connection = open_connection(db_path).map_err(AppError::database_init)?;
    run_migrations(&mut connection).map_err(AppError::database_init)?;

    let updated_at = timestamp_to_iso8601(clock.now());
    match migrate_legacy(&connection, &updated_at).map_err(AppError::database_init)? {
        MigrationOutcome::AlreadyMigrated => {}
        MigrationOutcome::Migrated { documents_written } => {
            tracing::info!(db_path, documents_written, "legacy data imported");
        }
    }

    Ok(connection)
}

/// Periodically pushes the offline queue to the sync endpoint. One pass runs
/// immediately, then one per interval; there is no backoff.
pub struct QueueDrainer {
    service: SqliteLogbookService,
    transport: Arc<dyn GasTransport>,
    probe: Arc<dyn ConnectivityProbe>,
    gate: DrainGate,
    interval: Duration,
}

impl QueueDrainer {
    pub fn new(
        service: SqliteLogbookService,
        transport: Arc<dyn GasTransport>,
        probe: Arc<dyn ConnectivityProbe>,
        gate: DrainGate,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            transport,
            probe,
            gate,
            interval,
        }
    }

    pub async fn tick(&self) -> Option<DrainReport> {
        let drained = drain_queue(
            &self.service,
            self.transport.as_ref(),
            Arc::clone(&self.probe),
            &self.gate,
        )
        .await;

        match drained {
            Ok(report) => {
                if report.skipped {
                    tracing::debug!("previous queue drain still running; tick skipped");
                } else if report.sent_count > 0 {
                    tracing::info!(
                        sent_count = report.sent_count,
                        remaining = report.remaining,
                        "queued payloads delivered"
                    );
                } else if report.remaining > 0 {
                    tracing::debug!(
                        remaining = report.remaining,
                        online = report.online,
                        "queue drain made no progress"
                    );
                }
                Some(report)
            }
            Err(error) => {
                tracing::warn!(error = %error, "queue drain failed");
                None
            }
        }
    }

    pub async fn run(self) {
        loop {
            self.tick().await;
            actix_web::rt::time::sleep(self.interval).await;
        }
    }
}

struct Components {
    service: SqliteLogbookService,
    transport: Arc<dyn GasTransport>,
    probe: Arc<dyn ConnectivityProbe>,
    drain_gate: DrainGate,
    clock: Arc<dyn Clock + Send + Sync>,
}

fn build_components(config: &AppConfig) -> Result<Components, AppError> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(SystemClock);
    let connection = open_store(&config.db_path, clock.as_ref())?;

    Ok(Components {
        service: SqliteLogbookService::new(Arc::new(Mutex::new(connection)), Arc::clone(&clock)),
        transport: Arc::new(ReqwestGasTransport::new()),
        probe: Arc::new(TcpConnectivityProbe::new(config.connectivity_timeout())),
        drain_gate: DrainGate::new(),
        clock,
    })
}

fn api_state(components: &Components, config: &AppConfig) -> ApiState {
    ApiState {
        service: components.service.clone(),
        transport: Arc::clone(&components.transport),
        probe: Arc::clone(&components.probe),
        drain_gate: components.drain_gate.clone(),
        notifications: Arc::new(Mutex::new(NotificationCenter::new())),
        clock: Arc::clone(&components.clock),
        limits: config.session_limits(),
    }
}

fn drainer(components: &Components, config: &AppConfig) -> QueueDrainer {
    QueueDrainer::new(
        components.service.clone(),
        Arc::clone(&components.transport),
        Arc::clone(&components.probe),
        components.drain_gate.clone(),
        config.sync_interval(),
    )
}

async fn serve(api_state: ApiState, bind: &str) -> std::io::Result<()> {
    tracing::info!(bind, "http server starting");

    HttpServer::new(move || {
        App::new()
            .wrap(cors())
            .app_data(web::Data::new(api_state.clone()))
            .configure(configure_routes)
    })
    .bind(bind)?
    .run()
    .await
}

pub fn run_api(config: AppConfig) -> Result<(), AppError> {
    let components = build_components(&config)?;
    let api_state = api_state(&components, &config);

    actix_web::rt::System::new()
        .block_on(serve(api_state, &config.http_bind))
        .map_err(AppError::runtime)
}

pub fn run_sync(config: AppConfig) -> Result<(), AppError> {
    let components = build_components(&config)?;
    let drainer = drainer(&components, &config);

    tracing::info!(
        interval_ms = config.sync_interval_ms,
        "sync worker starting"
    );

    actix_web::rt::System::new().block_on(drainer.run());
    Ok(())
}

/// API and sync worker in one process, sharing the connection and the
/// drain gate.
pub fn run(config: AppConfig) -> Result<(), AppError> {
    let components = build_components(&config)?;
    let api_state = api_state(&components, &config);
    let drainer = drainer(&components, &config);

    actix_web::rt::System::new()
        .block_on(async move {
            actix_web::rt::spawn(drainer.run());
            serve(api_state, &config.http_bind).await
        })
        .map_err(AppError::runtime)
}
