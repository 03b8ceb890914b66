use std::collections::{BTreeMap, HashMap};

use chrono::{Months, NaiveDateTime};
use serde::Serialize;

use crate::domain::calculations::{charged_kwh, cost, round_to_tenth};
use crate::domain::formatting::parse_local_datetime;
use crate::domain::models::{ChargingRecord, DEFAULT_ELECTRICITY_RATE, VehicleSettings};

const MONTHS_SHOWN: usize = 6;
const TOP_LOCATIONS: usize = 5;
const TREND_POINTS: usize = 20;
const UNKNOWN_LOCATION: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    OneMonth,
    ThreeMonths,
    SixMonths,
    #[default]
    All,
}

impl Period {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "1M" => Some(Self::OneMonth),
            "3M" => Some(Self::ThreeMonths),
            "6M" => Some(Self::SixMonths),
            "ALL" => Some(Self::All),
            _ => None,
        }
    }

    fn months(self) -> Option<u32> {
        match self {
            Self::OneMonth => Some(1),
            Self::ThreeMonths => Some(3),
            Self::SixMonths => Some(6),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub count: usize,
    pub total_kwh: f64,
    pub total_cost: i64,
    pub avg_efficiency: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPoint {
    pub month: String,
    pub count: usize,
    pub cost: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub index: usize,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStats {
    pub name: String,
    pub count: usize,
    pub avg_duration: i64,
    pub avg_cost: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub summary: StatsSummary,
    pub monthly: Vec<MonthlyPoint>,
    pub efficiency_trend: Vec<TrendPoint>,
    pub soh_trend: Vec<TrendPoint>,
    pub locations: Vec<LocationStats>,
}

/// Records inside the period, newest-first as stored. With a bounded period,
/// records whose start time does not parse are left out.
pub fn filter_period(
    history: &[ChargingRecord],
    period: Period,
    now: NaiveDateTime,
) -> Vec<&ChargingRecord> {
    let Some(months) = period.months() else {
        return history.iter().collect();
    };
    let Some(cutoff) = now.checked_sub_months(Months::new(months)) else {
        return history.iter().collect();
    };

    history
        .iter()
        .filter(|record| {
            parse_local_datetime(&record.session.start_time)
                .is_some_and(|start| start >= cutoff)
        })
        .collect()
}

/// Aggregates are recomputed from battery deltas, so records edited before
/// recomputation existed still count consistently.
pub fn build_report(
    history: &[ChargingRecord],
    settings: &VehicleSettings,
    period: Period,
    now: NaiveDateTime,
) -> StatsReport {
    let records = filter_period(history, period, now);
    let capacity = settings.capacity_or_default();
    let rate = if settings.electricity_rate > 0.0 {
        settings.electricity_rate
    } else {
        DEFAULT_ELECTRICITY_RATE
    };

    let price = |record: &ChargingRecord| {
        let kwh = charged_kwh(
            capacity,
            record.session.start_battery,
            record.end_battery,
        );
        (kwh, cost(kwh, rate))
    };

    let mut total_kwh = 0.0;
    let mut total_cost = 0;
    let mut efficiency_sum = 0.0;
    let mut efficiency_count = 0usize;
    let mut months: BTreeMap<String, (usize, i64)> = BTreeMap::new();
    let mut by_location: HashMap<String, (usize, i64, i64)> = HashMap::new();

    for &record in &records {
        let (kwh, record_cost) = price(record);
        total_kwh += kwh;
        total_cost += record_cost;

        if record.session.efficiency > 0.0 {
            efficiency_sum += record.session.efficiency;
            efficiency_count += 1;
        }

        if let Some(start) = parse_local_datetime(&record.session.start_time) {
            let entry = months
                .entry(start.format("%Y-%m").to_string())
                .or_insert((0, 0));
            entry.0 += 1;
            entry.1 += record_cost;
        }

        let name = if record.session.location_name.is_empty() {
            UNKNOWN_LOCATION.to_string()
        } else {
            record.session.location_name.clone()
        };
        let entry = by_location.entry(name).or_insert((0, 0, 0));
        entry.0 += 1;
        entry.1 += record.duration;
        entry.2 += record_cost;
    }

    let monthly_start = months.len().saturating_sub(MONTHS_SHOWN);
    let monthly = months
        .into_iter()
        .skip(monthly_start)
        .map(|(month, (count, cost))| MonthlyPoint { month, count, cost })
        .collect();

    let mut locations: Vec<LocationStats> = by_location
        .into_iter()
        .map(|(name, (count, duration, cost))| LocationStats {
            name,
            count,
            avg_duration: average_rounded(duration, count),
            avg_cost: average_rounded(cost, count),
        })
        .collect();
    locations.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then_with(|| left.name.cmp(&right.name))
    });
    locations.truncate(TOP_LOCATIONS);

    StatsReport {
        summary: StatsSummary {
            count: records.len(),
            total_kwh: round_to_tenth(total_kwh),
            total_cost,
            avg_efficiency: (efficiency_count > 0)
                .then(|| round_to_tenth(efficiency_sum / efficiency_count as f64)),
        },
        monthly,
        efficiency_trend: trend(&records, |record| {
            Some(record.session.efficiency).filter(|value| *value > 0.0)
        }),
        soh_trend: trend(&records, |record| record.soh.filter(|value| *value > 0.0)),
        locations,
    }
}

/// Oldest-first series of the last points that carry a value.
fn trend<F>(records: &[&ChargingRecord], value: F) -> Vec<TrendPoint>
where
    F: Fn(&ChargingRecord) -> Option<f64>,
{
    let values: Vec<f64> = records
        .iter()
        .rev()
        .filter_map(|&record| value(record))
        .collect();
    let start = values.len().saturating_sub(TREND_POINTS);

    values[start..]
        .iter()
        .enumerate()
        .map(|(index, value)| TrendPoint {
            index: index + 1,
            value: *value,
        })
        .collect()
}

fn average_rounded(total: i64, count: usize) -> i64 {
    if count == 0 {
        return 0;
    }
    (total as f64 / count as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::{Period, build_report, filter_period};
    use crate::domain::models::{ChargingRecord, ChargingSession, VehicleSettings};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 31)
            .and_then(|date| date.and_hms_opt(12, 0, 0))
            .expect("date should be valid")
    }

    fn record(id: &str, start_time: &str, location: &str, efficiency: f64) -> ChargingRecord {
        ChargingRecord {
            session: ChargingSession {
                id: id.to_string(),
                start_time: start_time.to_string(),
                odometer: 10_000.0,
                start_battery: 50.0,
                start_range: 200.0,
                efficiency,
                started_at: 0,
                location_name: location.to_string(),
                voltage: 200.0,
                amperage: 16.0,
                kw: 3.2,
            },
            end_time: String::new(),
            end_battery: 70.0,
            end_range: 260.0,
            // Deliberately stale; reports recompute from battery deltas.
            charged_kwh: 99.0,
            cost: 9_999,
            duration: 30,
            charge_speed: 16.0,
            soh: None,
        }
    }

    fn settings() -> VehicleSettings {
        VehicleSettings {
            battery_capacity: 40.0,
            electricity_rate: 30.0,
            ..VehicleSettings::default()
        }
    }

    #[test]
    fn parses_period_labels() {
        assert_eq!(Period::parse("1m"), Some(Period::OneMonth));
        assert_eq!(Period::parse("ALL"), Some(Period::All));
        assert_eq!(Period::parse("2Y"), None);
    }

    #[test]
    fn period_filter_uses_calendar_months() {
        let history = vec![
            record("a", "2026-03-15T10:00", "Home", 6.0),
            record("b", "2026-02-28T13:00", "Home", 6.0),
            record("c", "2026-02-28T11:00", "Home", 6.0),
            record("d", "not a date", "Home", 6.0),
        ];

        let ids: Vec<&str> = filter_period(&history, Period::OneMonth, now())
            .into_iter()
            .map(ChargingRecord::id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(filter_period(&history, Period::All, now()).len(), 4);
    }

    #[test]
    fn summary_recomputes_kwh_and_cost() {
        let history = vec![
            record("a", "2026-03-15T10:00", "Home", 6.0),
            record("b", "2026-02-15T10:00", "Office", 0.0),
            record("c", "2026-01-15T10:00", "Home", 7.0),
        ];

        let report = build_report(&history, &settings(), Period::All, now());

        assert_eq!(report.summary.count, 3);
        assert_eq!(report.summary.total_kwh, 24.0);
        assert_eq!(report.summary.total_cost, 720);
        assert_eq!(report.summary.avg_efficiency, Some(6.5));
    }

    #[test]
    fn monthly_and_location_breakdowns() {
        let mut history = vec![
            record("a", "2026-03-15T10:00", "Home", 6.0),
            record("b", "2026-03-01T10:00", "", 6.0),
            record("c", "2026-01-15T10:00", "Home", 6.0),
        ];
        history[2].duration = 60;

        let report = build_report(&history, &settings(), Period::All, now());

        let months: Vec<(&str, usize, i64)> = report
            .monthly
            .iter()
            .map(|point| (point.month.as_str(), point.count, point.cost))
            .collect();
        assert_eq!(months, vec![("2026-01", 1, 240), ("2026-03", 2, 480)]);

        assert_eq!(report.locations[0].name, "Home");
        assert_eq!(report.locations[0].count, 2);
        assert_eq!(report.locations[0].avg_duration, 45);
        assert_eq!(report.locations[1].name, "Unknown");
    }

    #[test]
    fn trends_run_oldest_first_and_skip_missing_values() {
        let mut history = vec![
            record("new", "2026-03-15T10:00", "Home", 7.0),
            record("mid", "2026-03-10T10:00", "Home", 0.0),
            record("old", "2026-03-05T10:00", "Home", 5.0),
        ];
        history[0].soh = Some(91.0);

        let report = build_report(&history, &settings(), Period::All, now());

        let efficiency: Vec<f64> = report
            .efficiency_trend
            .iter()
            .map(|point| point.value)
            .collect();
        assert_eq!(efficiency, vec![5.0, 7.0]);
        assert_eq!(report.soh_trend.len(), 1);
        assert_eq!(report.soh_trend[0].index, 1);
    }

    #[test]
    fn empty_history_has_no_average_efficiency() {
        let report = build_report(&[], &settings(), Period::ThreeMonths, now());

        assert_eq!(report.summary.count, 0);
        assert_eq!(report.summary.avg_efficiency, None);
        assert!(report.monthly.is_empty());
    }
}
