use std::time::Duration;

use crate::app::AppError;
use crate::domain::models::DEFAULT_MAX_SESSION_HOURS;
use crate::domain::session_state::SessionLimits;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub http_bind: String,
    pub sync_interval_ms: u64,
    pub max_session_hours: u32,
    pub connectivity_timeout_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            db_path: string_or_default(&lookup, "DB_PATH", "./data/ev_logbook.db"),
            http_bind: string_or_default(&lookup, "HTTP_BIND", "0.0.0.0:8080"),
            sync_interval_ms: parse_or_default(&lookup, "SYNC_INTERVAL_MS", 60_000_u64)?,
            max_session_hours: parse_or_default(
                &lookup,
                "MAX_SESSION_HOURS",
                DEFAULT_MAX_SESSION_HOURS,
            )?,
            connectivity_timeout_ms: parse_or_default(
                &lookup,
                "CONNECTIVITY_TIMEOUT_MS",
                3_000_u64,
            )?,
        };

        if config.sync_interval_ms == 0 {
            return Err(AppError::config("SYNC_INTERVAL_MS must be greater than zero"));
        }
        if config.max_session_hours == 0 {
            return Err(AppError::config("MAX_SESSION_HOURS must be greater than zero"));
        }

        Ok(config)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn connectivity_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity_timeout_ms)
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_session_hours: self.max_session_hours,
        }
    }
}

fn string_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
