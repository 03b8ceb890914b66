use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::calculations::{
    LiveEstimate, SpeedBadge, charge_speed_kw, charged_kwh, cost, duration_minutes,
    effective_rate, live_estimate, minutes_between, round_to_tenth, speed_badge,
};
use crate::domain::formatting::{
    format_timer, generate_id, local_iso_from_timestamp, parse_local_datetime,
};
use crate::domain::models::{
    ChargingLocation, ChargingRecord, ChargingSession, DEFAULT_MAX_SESSION_HOURS, VehicleSettings,
};

const DEFAULT_ODOMETER: f64 = 10_000.0;
const DEFAULT_START_BATTERY: f64 = 50.0;
const DEFAULT_START_RANGE: f64 = 200.0;
const DEFAULT_EFFICIENCY: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMs(pub i64);

pub trait Clock {
    fn now(&self) -> TimestampMs;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartForm {
    #[serde(default)]
    pub start_time: Option<String>,
    pub odometer: f64,
    pub start_battery: f64,
    pub start_range: f64,
    pub efficiency: f64,
    #[serde(default)]
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndReadings {
    pub end_time: String,
    pub end_battery: f64,
    pub end_range: f64,
    #[serde(default)]
    pub soh: Option<f64>,
}

/// Values pre-filled into the start form: the previous record's end state
/// carries over so consecutive trips chain together.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDefaults {
    pub odometer: f64,
    pub start_battery: f64,
    pub start_range: f64,
    pub efficiency: f64,
}

pub fn start_defaults(history: &[ChargingRecord]) -> StartDefaults {
    match history.first() {
        Some(last) => StartDefaults {
            odometer: last.session.odometer,
            start_battery: last.end_battery,
            start_range: last.end_range,
            efficiency: last.session.efficiency,
        },
        None => StartDefaults {
            odometer: DEFAULT_ODOMETER,
            start_battery: DEFAULT_START_BATTERY,
            start_range: DEFAULT_START_RANGE,
            efficiency: DEFAULT_EFFICIENCY,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_session_hours: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_session_hours: DEFAULT_MAX_SESSION_HOURS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "field", rename_all = "camelCase")]
pub enum ValidationIssue {
    StartTime,
    EndBattery { start: f64, end: f64 },
    EndRange { start: f64, end: f64 },
    EndTime { reason: EndTimeProblem },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EndTimeProblem {
    Unparseable,
    NotAfterStart,
    ExceedsLimit { max_hours: u32 },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartTime => write!(f, "start time is not a valid date"),
            Self::EndBattery { start, end } => {
                write!(f, "end battery {end}% is below start battery {start}%")
            }
            Self::EndRange { start, end } => {
                write!(f, "end range {end} km is below start range {start} km")
            }
            Self::EndTime {
                reason: EndTimeProblem::Unparseable,
            } => write!(f, "end time is not a valid date"),
            Self::EndTime {
                reason: EndTimeProblem::NotAfterStart,
            } => write!(f, "end time must be after start time"),
            Self::EndTime {
                reason: EndTimeProblem::ExceedsLimit { max_hours },
            } => write!(f, "session exceeds the {max_hours} hour limit"),
        }
    }
}

fn describe_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("a charging session is already active")]
    AlreadyActive,
    #[error("no charging session is active")]
    NoActiveSession,
    #[error("cancelling a session requires confirmation")]
    CancelNotConfirmed,
    #[error("session rejected: {}", describe_issues(.0))]
    Rejected(Vec<ValidationIssue>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    pub session: ChargingSession,
    pub elapsed_seconds: u64,
    pub timer: String,
    pub rate: f64,
    pub estimate: LiveEstimate,
}

/// Holds the single optional active session and drives the
/// Idle → Active → Completed transitions.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    active: Option<ChargingSession>,
}

impl SessionStateMachine {
    pub fn new(active: Option<ChargingSession>) -> Self {
        Self { active }
    }

    pub fn active(&self) -> Option<&ChargingSession> {
        self.active.as_ref()
    }

    pub fn into_active(self) -> Option<ChargingSession> {
        self.active
    }

    pub fn start<C: Clock + ?Sized>(
        &mut self,
        form: &StartForm,
        location: Option<&ChargingLocation>,
        clock: &C,
    ) -> Result<&ChargingSession, SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }

        let now = clock.now();
        let start_time = form
            .start_time
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| local_iso_from_timestamp(now));
        if parse_local_datetime(&start_time).is_none() {
            return Err(SessionError::Rejected(vec![ValidationIssue::StartTime]));
        }

        let session = ChargingSession {
            id: generate_id(),
            start_time,
            odometer: form.odometer,
            start_battery: form.start_battery,
            start_range: form.start_range,
            efficiency: form.efficiency,
            started_at: now.0,
            location_name: location.map(|loc| loc.name.clone()).unwrap_or_default(),
            voltage: location.map_or(0.0, |loc| loc.voltage),
            amperage: location.map_or(0.0, |loc| loc.amperage),
            kw: location.map_or(0.0, |loc| loc.kw),
        };

        Ok(&*self.active.insert(session))
    }

    pub fn live(
        &self,
        settings: &VehicleSettings,
        now: NaiveDateTime,
    ) -> Result<LiveSnapshot, SessionError> {
        let session = self.active.as_ref().ok_or(SessionError::NoActiveSession)?;

        let elapsed_seconds = parse_local_datetime(&session.start_time)
            .map(|start| (now - start).num_seconds().max(0) as u64)
            .unwrap_or(0);
        let rate = effective_rate(settings, &session.start_time);
        let estimate = live_estimate(
            session,
            settings.capacity_or_default(),
            rate,
            elapsed_seconds,
        );

        Ok(LiveSnapshot {
            session: session.clone(),
            elapsed_seconds,
            timer: format_timer(elapsed_seconds),
            rate,
            estimate,
        })
    }

    /// Runs every validation check and, only when all pass, turns the active
    /// session into a finished record. On rejection the active session is
    /// left untouched.
    pub fn complete(
        &mut self,
        end: &EndReadings,
        settings: &VehicleSettings,
        limits: SessionLimits,
    ) -> Result<ChargingRecord, SessionError> {
        let session = self.active.as_ref().ok_or(SessionError::NoActiveSession)?;

        let issues = validate_end_readings(session, end, limits);
        if !issues.is_empty() {
            return Err(SessionError::Rejected(issues));
        }

        let record = finalize_record(session.clone(), end, settings);
        self.active = None;
        Ok(record)
    }

    pub fn cancel(&mut self, confirmed: bool) -> Result<ChargingSession, SessionError> {
        if self.active.is_none() {
            return Err(SessionError::NoActiveSession);
        }
        if !confirmed {
            return Err(SessionError::CancelNotConfirmed);
        }

        self.active.take().ok_or(SessionError::NoActiveSession)
    }
}

pub fn validate_end_readings(
    session: &ChargingSession,
    end: &EndReadings,
    limits: SessionLimits,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if end.end_battery < session.start_battery {
        issues.push(ValidationIssue::EndBattery {
            start: session.start_battery,
            end: end.end_battery,
        });
    }

    if end.end_range < session.start_range {
        issues.push(ValidationIssue::EndRange {
            start: session.start_range,
            end: end.end_range,
        });
    }

    match (
        parse_local_datetime(&session.start_time),
        parse_local_datetime(&end.end_time),
    ) {
        (Some(start), Some(finish)) => {
            if finish <= start {
                issues.push(ValidationIssue::EndTime {
                    reason: EndTimeProblem::NotAfterStart,
                });
            }
            let max_minutes = f64::from(limits.max_session_hours) * 60.0;
            if minutes_between(start, finish) > max_minutes {
                issues.push(ValidationIssue::EndTime {
                    reason: EndTimeProblem::ExceedsLimit {
                        max_hours: limits.max_session_hours,
                    },
                });
            }
        }
        _ => issues.push(ValidationIssue::EndTime {
            reason: EndTimeProblem::Unparseable,
        }),
    }

    issues
}

/// Derived fields for a finished session: kWh and speed at one decimal,
/// duration in whole minutes.
pub fn finalize_record(
    session: ChargingSession,
    end: &EndReadings,
    settings: &VehicleSettings,
) -> ChargingRecord {
    let capacity = settings.capacity_or_default();
    let rate = effective_rate(settings, &session.start_time);

    let kwh = charged_kwh(capacity, session.start_battery, end.end_battery);
    let duration = duration_minutes(&session.start_time, &end.end_time);
    let speed = charge_speed_kw(kwh, duration);

    ChargingRecord {
        session,
        end_time: end.end_time.clone(),
        end_battery: end.end_battery,
        end_range: end.end_range,
        charged_kwh: round_to_tenth(kwh),
        cost: cost(kwh, rate),
        duration: duration.round() as i64,
        charge_speed: round_to_tenth(speed),
        soh: end.soh,
    }
}

/// Re-derives kWh, cost, duration and speed after an edit so they can never
/// drift from the battery and time fields.
pub fn recompute_record(record: ChargingRecord, settings: &VehicleSettings) -> ChargingRecord {
    let end = EndReadings {
        end_time: record.end_time.clone(),
        end_battery: record.end_battery,
        end_range: record.end_range,
        soh: record.soh,
    };
    finalize_record(record.session, &end, settings)
}

pub fn record_badge(record: &ChargingRecord) -> SpeedBadge {
    speed_badge(record.charge_speed)
}
