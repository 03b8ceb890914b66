use chrono::{Duration, Local, NaiveDateTime, Timelike};
use serde::Serialize;

use crate::domain::formatting::{LOCAL_MINUTE_FORMAT, parse_local_datetime};
use crate::domain::models::{
    ChargingSession, DEFAULT_ELECTRICITY_RATE, DEFAULT_NIGHT_RATE, VehicleSettings,
};

const NIGHT_STARTS_AT_HOUR: u32 = 22;
const NIGHT_ENDS_AT_HOUR: u32 = 8;
const RAPID_ABOVE_KW: f64 = 20.0;
const NORMAL_FROM_KW: f64 = 3.0;
const FALLBACK_LOCATION_KW: f64 = 3.0;

pub fn charged_kwh(capacity: f64, start_pct: f64, end_pct: f64) -> f64 {
    capacity * (end_pct - start_pct) / 100.0
}

pub fn cost(kwh: f64, rate: f64) -> i64 {
    (kwh * rate).round() as i64
}

/// Minutes between two stored timestamps, clamped at zero. Unparseable
/// input counts as zero as well.
pub fn duration_minutes(start_iso: &str, end_iso: &str) -> f64 {
    match (parse_local_datetime(start_iso), parse_local_datetime(end_iso)) {
        (Some(start), Some(end)) => minutes_between(start, end),
        _ => 0.0,
    }
}

pub fn minutes_between(start: NaiveDateTime, end: NaiveDateTime) -> f64 {
    let millis = (end - start).num_milliseconds();
    (millis as f64 / 60_000.0).max(0.0)
}

pub fn charge_speed_kw(kwh: f64, duration_min: f64) -> f64 {
    if duration_min > 0.0 {
        kwh / (duration_min / 60.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpeedBadge {
    Rapid,
    Normal,
    Slow,
}

impl SpeedBadge {
    pub fn label(self) -> &'static str {
        match self {
            Self::Rapid => "Rapid",
            Self::Normal => "Normal",
            Self::Slow => "Slow",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Rapid => "\u{1F534}",
            Self::Normal => "\u{1F7E1}",
            Self::Slow => "\u{1F7E2}",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Rapid => "#EF4444",
            Self::Normal => "#F59E0B",
            Self::Slow => "#22C55E",
        }
    }
}

pub fn speed_badge(kw: f64) -> SpeedBadge {
    if kw > RAPID_ABOVE_KW {
        SpeedBadge::Rapid
    } else if kw >= NORMAL_FROM_KW {
        SpeedBadge::Normal
    } else {
        SpeedBadge::Slow
    }
}

pub fn is_night_hour(hour: u32) -> bool {
    hour >= NIGHT_STARTS_AT_HOUR || hour < NIGHT_ENDS_AT_HOUR
}

/// Picks the night or day rate from the local wall-clock hour of
/// `start_time` (now when absent). An unparseable start time uses the day
/// rate.
pub fn auto_rate(settings: &VehicleSettings, start_time: Option<&str>) -> f64 {
    if !settings.use_night_rate {
        return settings.electricity_rate;
    }

    let hour = match start_time {
        Some(value) => parse_local_datetime(value).map(|datetime| datetime.hour()),
        None => Some(Local::now().hour()),
    };

    match hour {
        Some(hour) if is_night_hour(hour) => settings.night_rate,
        _ => settings.electricity_rate,
    }
}

/// Rate applied to a finished session; zero rates fall back to the
/// defaults.
pub fn effective_rate(settings: &VehicleSettings, start_time: &str) -> f64 {
    let rate = auto_rate(settings, Some(start_time));
    if rate > 0.0 {
        return rate;
    }

    match parse_local_datetime(start_time) {
        Some(datetime) if settings.use_night_rate && is_night_hour(datetime.hour()) => {
            DEFAULT_NIGHT_RATE
        }
        _ => DEFAULT_ELECTRICITY_RATE,
    }
}

pub fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Estimates derived purely from elapsed wall time and the snapshot of the
/// location's rated power.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEstimate {
    pub location_kw: f64,
    pub elapsed_kwh: f64,
    pub live_cost: i64,
    pub current_pct: f64,
    pub progress_pct: f64,
    pub estimated_total_minutes: f64,
    pub estimated_completion: Option<String>,
}

pub fn live_estimate(
    session: &ChargingSession,
    capacity: f64,
    rate: f64,
    elapsed_seconds: u64,
) -> LiveEstimate {
    let location_kw = if session.kw > 0.0 {
        session.kw
    } else {
        FALLBACK_LOCATION_KW
    };

    let remain_pct = 100.0 - session.start_battery;
    let remain_kwh = capacity * remain_pct / 100.0;
    let estimated_total_minutes = (remain_kwh / location_kw * 60.0).max(0.0);

    let estimated_completion = parse_local_datetime(&session.start_time).map(|start| {
        let offset = Duration::milliseconds((estimated_total_minutes * 60_000.0) as i64);
        (start + offset).format(LOCAL_MINUTE_FORMAT).to_string()
    });

    let elapsed_kwh = location_kw * (elapsed_seconds as f64 / 3600.0);
    let current_pct = if capacity > 0.0 {
        (session.start_battery + elapsed_kwh / capacity * 100.0).min(100.0)
    } else {
        session.start_battery
    };
    let progress_pct = if remain_pct > 0.0 {
        ((current_pct - session.start_battery) / remain_pct * 100.0).min(100.0)
    } else {
        100.0
    };

    LiveEstimate {
        location_kw,
        elapsed_kwh,
        live_cost: cost(elapsed_kwh, rate),
        current_pct,
        progress_pct,
        estimated_total_minutes,
        estimated_completion,
    }
}
