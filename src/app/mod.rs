mod config;
mod error;
mod logging;
pub mod runtime;
pub mod services;
pub mod workflow;

pub use error::AppError;

fn bootstrap(component: &str) -> Result<config::AppConfig, AppError> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        component,
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        sync_interval_ms = config.sync_interval_ms,
        max_session_hours = config.max_session_hours,
        connectivity_timeout_ms = config.connectivity_timeout_ms,
        "application bootstrap initialized"
    );

    Ok(config)
}

/// API server and sync worker in one process.
pub fn run() -> Result<(), AppError> {
    runtime::run(bootstrap("all")?)
}

pub fn run_api() -> Result<(), AppError> {
    runtime::run_api(bootstrap("api")?)
}

pub fn run_sync() -> Result<(), AppError> {
    runtime::run_sync(bootstrap("sync")?)
}
