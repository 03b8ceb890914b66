use crate::domain::formatting::number_or_empty;
use crate::domain::models::{
    ChargingGasPayload, ChargingRecord, GasPayload, InspectionGasPayload, InspectionRecord,
    MaintenanceGasPayload, MaintenanceRecord,
};

const COMPLETED_STATUS: &str = "completed";

pub fn build_payload(record: &ChargingRecord) -> GasPayload {
    let session = &record.session;

    GasPayload::Charging(ChargingGasPayload {
        id: session.id.clone(),
        status: COMPLETED_STATUS.to_string(),
        start_time: session.start_time.clone(),
        end_time: record.end_time.clone(),
        start_odometer: number_or_empty(session.odometer),
        efficiency: number_or_empty(session.efficiency),
        start_soc: number_or_empty(session.start_battery),
        end_soc: number_or_empty(record.end_battery),
        start_range: number_or_empty(session.start_range),
        end_range: number_or_empty(record.end_range),
        location: session.location_name.clone(),
        added_kwh: number_or_empty(record.charged_kwh),
        cost: number_or_empty(record.cost as f64),
    })
}

pub fn build_maintenance_payload(record: &MaintenanceRecord) -> GasPayload {
    GasPayload::Maintenance(MaintenanceGasPayload {
        id: record.id.clone(),
        date: record.date.clone(),
        category: record.category.as_str().to_string(),
        description: record.description.clone(),
        cost: number_or_empty(record.cost),
        // A recorded odometer of 0 is still sent.
        odometer: record.odometer.map(|value| format!("{value}")).unwrap_or_default(),
        next_due_date: record.next_due_date.clone().unwrap_or_default(),
        memo: record.memo.clone().unwrap_or_default(),
    })
}

pub fn build_inspection_payload(record: &InspectionRecord) -> GasPayload {
    GasPayload::Inspection(InspectionGasPayload {
        id: record.id.clone(),
        date: record.date.clone(),
        inspection_type: record.inspection_type.as_str().to_string(),
        odometer: number_or_empty(record.odometer),
        cost: number_or_empty(record.cost),
        soh: record.soh.map(|value| format!("{value}")).unwrap_or_default(),
        next_due_date: record.next_due_date.clone(),
        findings: record.findings.clone().unwrap_or_default(),
    })
}
