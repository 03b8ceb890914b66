use serde::{Deserialize, Serialize};

pub const DEFAULT_BATTERY_CAPACITY: f64 = 30.0;
pub const DEFAULT_ELECTRICITY_RATE: f64 = 31.0;
pub const DEFAULT_NIGHT_RATE: f64 = 17.78;
pub const DEFAULT_MAX_SESSION_HOURS: u32 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingLocation {
    pub id: String,
    pub name: String,
    pub voltage: f64,
    pub amperage: f64,
    pub kw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocation {
    pub name: String,
    pub voltage: f64,
    pub amperage: f64,
    pub kw: f64,
}

impl NewLocation {
    pub fn with_id(self, id: String) -> ChargingLocation {
        ChargingLocation {
            id,
            name: self.name,
            voltage: self.voltage,
            amperage: self.amperage,
            kw: self.kw,
        }
    }
}

/// An in-progress charge. The location fields are a snapshot taken at start
/// time, so later edits to the location list never rewrite a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSession {
    pub id: String,
    pub start_time: String,
    pub odometer: f64,
    pub start_battery: f64,
    pub start_range: f64,
    pub efficiency: f64,
    pub started_at: i64,
    pub location_name: String,
    pub voltage: f64,
    pub amperage: f64,
    pub kw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingRecord {
    #[serde(flatten)]
    pub session: ChargingSession,
    pub end_time: String,
    pub end_battery: f64,
    pub end_range: f64,
    pub charged_kwh: f64,
    pub cost: i64,
    pub duration: i64,
    pub charge_speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soh: Option<f64>,
}

impl ChargingRecord {
    pub fn id(&self) -> &str {
        &self.session.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSettings {
    pub battery_capacity: f64,
    pub electricity_rate: f64,
    pub night_rate: f64,
    pub use_night_rate: bool,
    pub gas_url: String,
}

impl Default for VehicleSettings {
    fn default() -> Self {
        Self {
            battery_capacity: DEFAULT_BATTERY_CAPACITY,
            electricity_rate: DEFAULT_ELECTRICITY_RATE,
            night_rate: DEFAULT_NIGHT_RATE,
            use_night_rate: false,
            gas_url: String::new(),
        }
    }
}

impl VehicleSettings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(value) = patch.battery_capacity {
            self.battery_capacity = value;
        }
        if let Some(value) = patch.electricity_rate {
            self.electricity_rate = value;
        }
        if let Some(value) = patch.night_rate {
            self.night_rate = value;
        }
        if let Some(value) = patch.use_night_rate {
            self.use_night_rate = value;
        }
        if let Some(value) = patch.gas_url {
            self.gas_url = value.trim().to_string();
        }
    }

    /// Zero means "never configured" in stored settings.
    pub fn capacity_or_default(&self) -> f64 {
        if self.battery_capacity > 0.0 {
            self.battery_capacity
        } else {
            DEFAULT_BATTERY_CAPACITY
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub battery_capacity: Option<f64>,
    pub electricity_rate: Option<f64>,
    pub night_rate: Option<f64>,
    pub use_night_rate: Option<bool>,
    pub gas_url: Option<String>,
}

impl SettingsPatch {
    /// Every numeric field that would break cost or kWh calculations.
    pub fn numeric_issues(&self) -> Vec<String> {
        [
            ("batteryCapacity", self.battery_capacity),
            ("electricityRate", self.electricity_rate),
            ("nightRate", self.night_rate),
        ]
        .into_iter()
        .filter_map(|(field, value)| match value {
            Some(value) if !(value.is_finite() && value > 0.0) => {
                Some(format!("{field} must be a positive number, got {value}"))
            }
            _ => None,
        })
        .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ja,
}

impl Language {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::En),
            "ja" => Some(Self::Ja),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceCategory {
    Tire,
    Brake,
    Wiper,
    Battery12v,
    Coolant,
    Inspection,
    Wash,
    Other,
}

impl MaintenanceCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tire => "tire",
            Self::Brake => "brake",
            Self::Wiper => "wiper",
            Self::Battery12v => "battery12v",
            Self::Coolant => "coolant",
            Self::Inspection => "inspection",
            Self::Wash => "wash",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRecord {
    pub id: String,
    pub date: String,
    pub category: MaintenanceCategory,
    pub description: String,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odometer: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_due_odometer: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InspectionType {
    /// Statutory roadworthiness inspection (shaken).
    #[serde(rename = "shaken")]
    Shaken,
    #[serde(rename = "12month")]
    TwelveMonth,
    #[serde(rename = "6month")]
    SixMonth,
}

impl InspectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shaken => "shaken",
            Self::TwelveMonth => "12month",
            Self::SixMonth => "6month",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionRecord {
    pub id: String,
    pub date: String,
    #[serde(rename = "type")]
    pub inspection_type: InspectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soh: Option<f64>,
    pub odometer: f64,
    pub cost: f64,
    pub next_due_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<String>,
    pub created_at: String,
}

/// Maintenance entry as submitted by a client; id and creation time are
/// assigned on save.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceInput {
    pub date: String,
    pub category: MaintenanceCategory,
    pub description: String,
    pub cost: f64,
    #[serde(default)]
    pub odometer: Option<f64>,
    #[serde(default)]
    pub next_due_date: Option<String>,
    #[serde(default)]
    pub next_due_odometer: Option<f64>,
    #[serde(default)]
    pub memo: Option<String>,
}

impl MaintenanceInput {
    pub fn into_record(self, id: String, created_at: String) -> MaintenanceRecord {
        MaintenanceRecord {
            id,
            date: self.date,
            category: self.category,
            description: self.description,
            cost: self.cost,
            odometer: self.odometer,
            next_due_date: self.next_due_date.filter(|value| !value.is_empty()),
            next_due_odometer: self.next_due_odometer,
            memo: self.memo.filter(|value| !value.is_empty()),
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionInput {
    pub date: String,
    #[serde(rename = "type")]
    pub inspection_type: InspectionType,
    #[serde(default)]
    pub soh: Option<f64>,
    pub odometer: f64,
    pub cost: f64,
    pub next_due_date: String,
    #[serde(default)]
    pub findings: Option<String>,
}

impl InspectionInput {
    pub fn into_record(self, id: String, created_at: String) -> InspectionRecord {
        InspectionRecord {
            id,
            date: self.date,
            inspection_type: self.inspection_type,
            soh: self.soh,
            odometer: self.odometer,
            cost: self.cost,
            next_due_date: self.next_due_date,
            findings: self.findings.filter(|value| !value.is_empty()),
            created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChargingGasPayload {
    pub id: String,
    pub status: String,
    pub start_time: String,
    pub end_time: String,
    pub start_odometer: String,
    pub efficiency: String,
    #[serde(rename = "startSoC")]
    pub start_soc: String,
    #[serde(rename = "endSoC")]
    pub end_soc: String,
    pub start_range: String,
    pub end_range: String,
    pub location: String,
    pub added_kwh: String,
    pub cost: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MaintenanceGasPayload {
    pub id: String,
    pub date: String,
    pub category: String,
    pub description: String,
    pub cost: String,
    pub odometer: String,
    pub next_due_date: String,
    pub memo: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InspectionGasPayload {
    pub id: String,
    pub date: String,
    pub inspection_type: String,
    pub odometer: String,
    pub cost: String,
    pub soh: String,
    pub next_due_date: String,
    pub findings: String,
}

/// Flat, string-only projection sent to the spreadsheet endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GasPayload {
    Charging(ChargingGasPayload),
    Maintenance(MaintenanceGasPayload),
    Inspection(InspectionGasPayload),
}

impl GasPayload {
    pub fn id(&self) -> &str {
        match self {
            Self::Charging(payload) => &payload.id,
            Self::Maintenance(payload) => &payload.id,
            Self::Inspection(payload) => &payload.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Charging(_) => "charging",
            Self::Maintenance(_) => "maintenance",
            Self::Inspection(_) => "inspection",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        ChargingGasPayload, ChargingRecord, GasPayload, InspectionRecord, InspectionType,
        MaintenanceCategory, SettingsPatch, VehicleSettings,
    };

    #[test]
    fn charging_record_serializes_flat_camel_case() {
        let record: ChargingRecord = serde_json::from_value(json!({
            "id": "abc123xyz",
            "startTime": "2026-02-20T10:00",
            "odometer": 12000.0,
            "startBattery": 50.0,
            "startRange": 200.0,
            "efficiency": 6.5,
            "startedAt": 1_771_581_600_000_i64,
            "locationName": "Home",
            "voltage": 200.0,
            "amperage": 16.0,
            "kw": 3.2,
            "endTime": "2026-02-20T10:30",
            "endBattery": 70.0,
            "endRange": 260.0,
            "chargedKwh": 8.0,
            "cost": 240,
            "duration": 30,
            "chargeSpeed": 16.0
        }))
        .expect("record should deserialize");

        assert_eq!(record.id(), "abc123xyz");
        assert_eq!(record.soh, None);

        let value = serde_json::to_value(&record).expect("record should serialize");
        assert_eq!(value["startBattery"], 50.0);
        assert_eq!(value["chargedKwh"], 8.0);
        assert!(value.get("soh").is_none());
        assert!(value.get("session").is_none());
    }

    #[test]
    fn gas_payload_is_tagged_by_type() {
        let payload = GasPayload::Charging(ChargingGasPayload {
            id: "a1".to_string(),
            status: "completed".to_string(),
            start_soc: "50".to_string(),
            ..ChargingGasPayload::default()
        });

        let value = serde_json::to_value(&payload).expect("payload should serialize");

        assert_eq!(value["type"], "charging");
        assert_eq!(value["startSoC"], "50");
        assert_eq!(value["addedKwh"], "");
        assert_eq!(payload.kind(), "charging");
    }

    #[test]
    fn inspection_and_category_names_match_stored_values() {
        let inspection: InspectionRecord = serde_json::from_value(json!({
            "id": "i1",
            "date": "2026-03-01",
            "type": "12month",
            "odometer": 30000.0,
            "cost": 15000.0,
            "nextDueDate": "2027-03-01",
            "createdAt": "2026-03-01T09:00:00.000Z"
        }))
        .expect("inspection should deserialize");

        assert_eq!(inspection.inspection_type, InspectionType::TwelveMonth);
        assert_eq!(
            serde_json::to_value(MaintenanceCategory::Battery12v).expect("category serializes"),
            json!("battery12v")
        );
    }

    #[test]
    fn settings_patch_merges_only_present_fields() {
        let mut settings = VehicleSettings::default();

        settings.apply(SettingsPatch {
            electricity_rate: Some(35.0),
            gas_url: Some("  https://example.com/exec ".to_string()),
            ..SettingsPatch::default()
        });

        assert_eq!(settings.electricity_rate, 35.0);
        assert_eq!(settings.night_rate, 17.78);
        assert_eq!(settings.gas_url, "https://example.com/exec");
    }
}
