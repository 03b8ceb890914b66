use std::sync::{Arc, Mutex};

use actix_cors::Cors;
use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType};
use actix_web::{HttpResponse, Responder, delete, get, patch, post, put, web};
use serde::{Deserialize, Serialize};

use crate::adapters::connectivity::ConnectivityProbe;
use crate::adapters::gas_sync::GasTransport;
use crate::app::services::{
    BackupHandler, ChargingCommandHandler, ChargingQueryHandler, MaintenanceHandler,
    ServiceError, SettingsHandler, SettingsUpdate, SqliteLogbookService,
};
use crate::app::workflow::{self, CompletionOutcome, DrainGate};
use crate::domain::models::{
    ChargingRecord, GasPayload, InspectionInput, Language, MaintenanceInput, NewLocation,
};
use crate::domain::notifications::{NotificationCenter, ToastKind};
use crate::domain::session_state::{Clock, EndReadings, SessionError, SessionLimits, StartForm};
use crate::domain::stats::Period;

const MAX_IMPORT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub service: SqliteLogbookService,
    pub transport: Arc<dyn GasTransport>,
    pub probe: Arc<dyn ConnectivityProbe>,
    pub drain_gate: DrainGate,
    pub notifications: Arc<Mutex<NotificationCenter>>,
    pub clock: Arc<dyn Clock + Send + Sync>,
    pub limits: SessionLimits,
}

impl ApiState {
    fn notify(&self, message: impl Into<String>, kind: ToastKind) {
        match self.notifications.lock() {
            Ok(mut center) => {
                center.push(message, kind, self.clock.now());
            }
            Err(_) => tracing::warn!("notification center lock poisoned"),
        }
    }

    fn notify_outcome(&self, outcome: CompletionOutcome) {
        let kind = match outcome {
            CompletionOutcome::SavedQueued => ToastKind::Info,
            CompletionOutcome::SavedAndSent | CompletionOutcome::Saved => ToastKind::Success,
            CompletionOutcome::SavedNotSynced => ToastKind::Error,
        };
        self.notify(outcome.message(), kind);
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub confirm: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRecordsRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub deleted: usize,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueResponse {
    pub count: usize,
    pub items: Vec<GasPayload>,
}

/// The web and mobile clients are served from other origins.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_IMPORT_BYTES))
        .service(health)
        .service(get_session_endpoint)
        .service(start_session_endpoint)
        .service(cancel_session_endpoint)
        .service(live_session_endpoint)
        .service(complete_session_endpoint)
        .service(start_defaults_endpoint)
        .service(list_history_endpoint)
        .service(delete_records_endpoint)
        .service(update_record_endpoint)
        .service(delete_record_endpoint)
        .service(delete_all_records_endpoint)
        .service(list_locations_endpoint)
        .service(add_location_endpoint)
        .service(update_location_endpoint)
        .service(delete_location_endpoint)
        .service(get_settings_endpoint)
        .service(patch_settings_endpoint)
        .service(list_maintenance_endpoint)
        .service(add_maintenance_endpoint)
        .service(update_maintenance_endpoint)
        .service(delete_maintenance_endpoint)
        .service(list_inspections_endpoint)
        .service(add_inspection_endpoint)
        .service(update_inspection_endpoint)
        .service(delete_inspection_endpoint)
        .service(stats_endpoint)
        .service(queue_endpoint)
        .service(retry_queue_endpoint)
        .service(notifications_endpoint)
        .service(dismiss_notification_endpoint)
        .service(export_csv_endpoint)
        .service(export_json_endpoint)
        .service(import_json_endpoint);
}

#[get("/health")]
async fn health(state: web::Data<ApiState>) -> impl Responder {
    match state.service.schema_version() {
        Ok(schema_version) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "schemaVersion": schema_version
        })),
        Err(error) => service_error_response(error),
    }
}

#[get("/session")]
async fn get_session_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.active_session() {
        Ok(session) => HttpResponse::Ok().json(session),
        Err(error) => service_error_response(error),
    }
}

#[post("/session")]
async fn start_session_endpoint(
    state: web::Data<ApiState>,
    form: web::Json<StartForm>,
) -> impl Responder {
    match state.service.start_session(&form) {
        Ok(session) => HttpResponse::Created().json(session),
        Err(error) => service_error_response(error),
    }
}

#[delete("/session")]
async fn cancel_session_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<CancelQuery>,
) -> impl Responder {
    match state.service.cancel_session(query.confirm.unwrap_or(false)) {
        Ok(session) => HttpResponse::Ok().json(session),
        Err(error) => service_error_response(error),
    }
}

#[get("/session/live")]
async fn live_session_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.live_session() {
        Ok(snapshot) => HttpResponse::Ok().json(snapshot),
        Err(error) => service_error_response(error),
    }
}

#[post("/session/complete")]
async fn complete_session_endpoint(
    state: web::Data<ApiState>,
    end: web::Json<EndReadings>,
) -> impl Responder {
    match workflow::complete_session(&state.service, state.transport.as_ref(), &end, state.limits)
        .await
    {
        Ok(completed) => {
            state.notify_outcome(completed.outcome);
            HttpResponse::Created().json(completed)
        }
        Err(error) => service_error_response(error),
    }
}

#[get("/session/defaults")]
async fn start_defaults_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.start_defaults() {
        Ok(defaults) => HttpResponse::Ok().json(defaults),
        Err(error) => service_error_response(error),
    }
}

#[get("/history")]
async fn list_history_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.history() {
        Ok(history) => HttpResponse::Ok().json(history),
        Err(error) => service_error_response(error),
    }
}

#[post("/history/delete")]
async fn delete_records_endpoint(
    state: web::Data<ApiState>,
    request: web::Json<DeleteRecordsRequest>,
) -> impl Responder {
    match state.service.delete_records(&request.ids) {
        Ok(deleted) => HttpResponse::Ok().json(DeletedResponse { deleted }),
        Err(error) => service_error_response(error),
    }
}

#[put("/history/{id}")]
async fn update_record_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    record: web::Json<ChargingRecord>,
) -> impl Responder {
    let mut record = record.into_inner();
    record.session.id = path.into_inner();

    match state.service.update_record(record) {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(error) => service_error_response(error),
    }
}

#[delete("/history/{id}")]
async fn delete_record_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    match state.service.delete_record(&path) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(error) => service_error_response(error),
    }
}

#[delete("/history")]
async fn delete_all_records_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.delete_all_records() {
        Ok(deleted) => HttpResponse::Ok().json(DeletedResponse { deleted }),
        Err(error) => service_error_response(error),
    }
}

#[get("/locations")]
async fn list_locations_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.locations() {
        Ok(locations) => HttpResponse::Ok().json(locations),
        Err(error) => service_error_response(error),
    }
}

#[post("/locations")]
async fn add_location_endpoint(
    state: web::Data<ApiState>,
    location: web::Json<NewLocation>,
) -> impl Responder {
    match state.service.add_location(location.into_inner()) {
        Ok(location) => HttpResponse::Created().json(location),
        Err(error) => service_error_response(error),
    }
}

#[put("/locations/{id}")]
async fn update_location_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    location: web::Json<NewLocation>,
) -> impl Responder {
    match state.service.update_location(&path, location.into_inner()) {
        Ok(location) => HttpResponse::Ok().json(location),
        Err(error) => service_error_response(error),
    }
}

#[delete("/locations/{id}")]
async fn delete_location_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    match state.service.remove_location(&path) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(error) => service_error_response(error),
    }
}

#[get("/settings")]
async fn get_settings_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.settings() {
        Ok(settings) => HttpResponse::Ok().json(settings),
        Err(error) => service_error_response(error),
    }
}

#[patch("/settings")]
async fn patch_settings_endpoint(
    state: web::Data<ApiState>,
    update: web::Json<SettingsUpdate>,
) -> impl Responder {
    match state.service.update_settings(update.into_inner()) {
        Ok(settings) => HttpResponse::Ok().json(settings),
        Err(error) => service_error_response(error),
    }
}

#[get("/maintenance")]
async fn list_maintenance_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.maintenance_records() {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(error) => service_error_response(error),
    }
}

#[post("/maintenance")]
async fn add_maintenance_endpoint(
    state: web::Data<ApiState>,
    input: web::Json<MaintenanceInput>,
) -> impl Responder {
    let record = match state.service.add_maintenance(input.into_inner()) {
        Ok(record) => record,
        Err(error) => return service_error_response(error),
    };

    match workflow::sync_maintenance(&state.service, state.transport.as_ref(), record).await {
        Ok(completed) => {
            state.notify_outcome(completed.outcome);
            HttpResponse::Created().json(completed)
        }
        Err(error) => service_error_response(error),
    }
}

#[put("/maintenance/{id}")]
async fn update_maintenance_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    input: web::Json<MaintenanceInput>,
) -> impl Responder {
    match state.service.update_maintenance(&path, input.into_inner()) {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(error) => service_error_response(error),
    }
}

#[delete("/maintenance/{id}")]
async fn delete_maintenance_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    match state.service.delete_maintenance(&path) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(error) => service_error_response(error),
    }
}

#[get("/inspections")]
async fn list_inspections_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.inspection_records() {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(error) => service_error_response(error),
    }
}

#[post("/inspections")]
async fn add_inspection_endpoint(
    state: web::Data<ApiState>,
    input: web::Json<InspectionInput>,
) -> impl Responder {
    let record = match state.service.add_inspection(input.into_inner()) {
        Ok(record) => record,
        Err(error) => return service_error_response(error),
    };

    match workflow::sync_inspection(&state.service, state.transport.as_ref(), record).await {
        Ok(completed) => {
            state.notify_outcome(completed.outcome);
            HttpResponse::Created().json(completed)
        }
        Err(error) => service_error_response(error),
    }
}

#[put("/inspections/{id}")]
async fn update_inspection_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    input: web::Json<InspectionInput>,
) -> impl Responder {
    match state.service.update_inspection(&path, input.into_inner()) {
        Ok(record) => HttpResponse::Ok().json(record),
        Err(error) => service_error_response(error),
    }
}

#[delete("/inspections/{id}")]
async fn delete_inspection_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    match state.service.delete_inspection(&path) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(error) => service_error_response(error),
    }
}

#[get("/stats")]
async fn stats_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<StatsQuery>,
) -> impl Responder {
    let period = match query.period.as_deref() {
        None => Period::default(),
        Some(raw) => match Period::parse(raw) {
            Some(period) => period,
            None => {
                return bad_request(format!("unknown period {raw}; use 1M, 3M, 6M or ALL"));
            }
        },
    };

    match state.service.stats(period) {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(error) => service_error_response(error),
    }
}

#[get("/queue")]
async fn queue_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.offline_queue() {
        Ok(items) => HttpResponse::Ok().json(QueueResponse {
            count: items.len(),
            items,
        }),
        Err(error) => service_error_response(error),
    }
}

#[post("/queue/retry")]
async fn retry_queue_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match workflow::drain_queue(
        &state.service,
        state.transport.as_ref(),
        Arc::clone(&state.probe),
        &state.drain_gate,
    )
    .await
    {
        Ok(report) => {
            if report.sent_count > 0 {
                state.notify(
                    format!("{} queued item(s) sent", report.sent_count),
                    ToastKind::Success,
                );
            }
            HttpResponse::Ok().json(report)
        }
        Err(error) => service_error_response(error),
    }
}

#[get("/notifications")]
async fn notifications_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.notifications.lock() {
        Ok(mut center) => HttpResponse::Ok().json(center.active(state.clock.now())),
        Err(_) => service_error_response(ServiceError::DbLockPoisoned),
    }
}

#[delete("/notifications/{id}")]
async fn dismiss_notification_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<u64>,
) -> impl Responder {
    let dismissed = match state.notifications.lock() {
        Ok(mut center) => center.dismiss(path.into_inner()),
        Err(_) => return service_error_response(ServiceError::DbLockPoisoned),
    };

    if dismissed {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::NotFound().json(serde_json::json!({
            "error": "notification not found"
        }))
    }
}

#[get("/export/csv")]
async fn export_csv_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<ExportQuery>,
) -> impl Responder {
    let lang = match query.lang.as_deref() {
        None => None,
        Some(raw) => match Language::parse(raw) {
            Some(lang) => Some(lang),
            None => return bad_request(format!("unknown language {raw}; use en or ja")),
        },
    };

    match state.service.export_csv(lang) {
        Ok(csv) => HttpResponse::Ok()
            .content_type("text/csv; charset=utf-8")
            .insert_header(attachment("ev_charging_log.csv"))
            .body(csv),
        Err(error) => service_error_response(error),
    }
}

#[get("/export/json")]
async fn export_json_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.export_json() {
        Ok(json) => HttpResponse::Ok()
            .content_type(header::ContentType::json())
            .insert_header(attachment("ev_logbook_backup.json"))
            .body(json),
        Err(error) => service_error_response(error),
    }
}

#[post("/import/json")]
async fn import_json_endpoint(state: web::Data<ApiState>, body: String) -> impl Responder {
    match state.service.import_backup(&body) {
        Ok(summary) => {
            state.notify(
                format!("Imported {} record(s)", summary.imported_records),
                ToastKind::Success,
            );
            HttpResponse::Ok().json(summary)
        }
        Err(error) => {
            state.notify("Import failed", ToastKind::Error);
            service_error_response(error)
        }
    }
}

fn attachment(filename: &str) -> ContentDisposition {
    ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(filename.to_string())],
    }
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    match error {
        ServiceError::Session(SessionError::Rejected(issues)) => {
            HttpResponse::UnprocessableEntity().json(serde_json::json!({
                "error": "session rejected",
                "issues": issues
            }))
        }
        ServiceError::Session(SessionError::AlreadyActive) => {
            HttpResponse::Conflict().json(serde_json::json!({
                "error": SessionError::AlreadyActive.to_string()
            }))
        }
        ServiceError::Session(SessionError::NoActiveSession) => {
            HttpResponse::NotFound().json(serde_json::json!({
                "error": SessionError::NoActiveSession.to_string()
            }))
        }
        ServiceError::NotFound { .. } => HttpResponse::NotFound().json(serde_json::json!({
            "error": error.to_string()
        })),
        ServiceError::Session(SessionError::CancelNotConfirmed)
        | ServiceError::InvalidSettings(_)
        | ServiceError::Backup(_) => bad_request(error.to_string()),
        ServiceError::DbLockPoisoned
        | ServiceError::Database(_)
        | ServiceError::Document(_) => {
            tracing::error!(error = %error, "request failed");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": error.to_string()
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    use actix_web::{App, body::to_bytes, http::StatusCode, test, web};
    use serde_json::{Value, json};

    use crate::adapters::gas_sync::tests::{RecordingTransport, charging_payload};
    use crate::app::runtime::SystemClock;
    use crate::app::services::ChargingCommandHandler;
    use crate::app::workflow::DrainGate;
    use crate::app::workflow::tests::FixedProbe;
    use crate::domain::notifications::NotificationCenter;
    use crate::domain::session_state::SessionLimits;
    use crate::test_support::open_test_service;

    use super::{ApiState, configure_routes};

    fn build_state(name: &str, gas_url: &str) -> ApiState {
        ApiState {
            service: open_test_service(name, gas_url),
            transport: Arc::new(RecordingTransport::default()),
            probe: Arc::new(FixedProbe(AtomicBool::new(true))),
            drain_gate: DrainGate::new(),
            notifications: Arc::new(Mutex::new(NotificationCenter::new())),
            clock: Arc::new(SystemClock),
            limits: SessionLimits::default(),
        }
    }

    fn start_body() -> Value {
        json!({
            "startTime": "2026-02-20T10:00",
            "odometer": 12000,
            "startBattery": 50,
            "startRange": 200,
            "efficiency": 6.0
        })
    }

    async fn json_body(resp: actix_web::dev::ServiceResponse) -> Value {
        let body = to_bytes(resp.into_body())
            .await
            .expect("body should be readable");
        serde_json::from_slice(&body).expect("body should be json")
    }

    #[actix_web::test]
    async fn health_endpoint_returns_ok() {
        let state = build_state("api-health", "");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["schemaVersion"], 1);
    }

    #[actix_web::test]
    async fn session_lifecycle_saves_record_and_notifies() {
        let state = build_state("api-lifecycle", "");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::patch()
            .uri("/settings")
            .set_json(json!({"batteryCapacity": 40, "electricityRate": 30}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/session")
            .set_json(start_body())
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::CREATED
        );

        let req = test::TestRequest::post()
            .uri("/session")
            .set_json(start_body())
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::CONFLICT
        );

        let req = test::TestRequest::get().uri("/session/live").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/session/complete")
            .set_json(json!({"endTime": "2026-02-20T10:30", "endBattery": 70, "endRange": 260}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = json_body(resp).await;
        assert_eq!(json["outcome"], "saved");
        assert_eq!(json["record"]["chargedKwh"], 8.0);
        assert_eq!(json["record"]["cost"], 240);

        let req = test::TestRequest::get().uri("/session").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json, Value::Null);

        let req = test::TestRequest::get().uri("/notifications").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json[0]["message"], "Saved");

        let req = test::TestRequest::get().uri("/session/defaults").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["startBattery"], 70.0);
    }

    #[actix_web::test]
    async fn rejected_completion_lists_every_issue() {
        let state = build_state("api-rejected", "");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/session")
            .set_json(start_body())
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/session/complete")
            .set_json(json!({"endTime": "2026-02-20T09:00", "endBattery": 40, "endRange": 100}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = json_body(resp).await;
        assert_eq!(json["issues"].as_array().map(Vec::len), Some(3));
        assert_eq!(json["issues"][0]["field"], "endBattery");
    }

    #[actix_web::test]
    async fn cancel_requires_confirmation_flag() {
        let state = build_state("api-cancel", "");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::delete().uri("/session").to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NOT_FOUND
        );

        let req = test::TestRequest::post()
            .uri("/session")
            .set_json(start_body())
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::delete().uri("/session").to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::delete()
            .uri("/session?confirm=true")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn settings_patch_rejects_insecure_sync_url() {
        let state = build_state("api-settings", "");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::patch()
            .uri("/settings")
            .set_json(json!({"gasUrl": "http://script.example.com/exec"}))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::patch()
            .uri("/settings")
            .set_json(json!({"useNightRate": true, "lang": "ja"}))
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["settings"]["useNightRate"], true);
        assert_eq!(json["lang"], "ja");
    }

    #[actix_web::test]
    async fn stats_rejects_unknown_period() {
        let state = build_state("api-stats", "");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/stats?period=2Y")
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::get()
            .uri("/stats?period=3M")
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["summary"]["count"], 0);
    }

    #[actix_web::test]
    async fn queue_retry_sends_pending_items() {
        let state = build_state("api-queue", "https://script.example.com/exec");
        state
            .service
            .enqueue(charging_payload("a"))
            .expect("enqueue should succeed");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/queue").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["count"], 1);

        let req = test::TestRequest::post().uri("/queue/retry").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["sentCount"], 1);
        assert_eq!(json["remaining"], 0);
        assert_eq!(json["skipped"], false);
    }

    #[actix_web::test]
    async fn export_and_import_round_through_the_api() {
        let state = build_state("api-backup", "");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let backup = json!({
            "version": "3.0.0",
            "history": [{"id": "r1", "startTime": "2026-01-05T21:00", "startBattery": 30, "endBattery": 80, "endTime": "2026-01-06T02:00"}],
            "locations": [{"id": "l1", "name": "Home", "kw": 3.2}]
        });
        let req = test::TestRequest::post()
            .uri("/import/json")
            .set_payload(backup.to_string())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["importedRecords"], 1);
        assert_eq!(json["importedLocations"], 1);

        let req = test::TestRequest::post()
            .uri("/import/json")
            .set_payload("not json")
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::get()
            .uri("/export/csv?lang=en")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok()),
            Some("text/csv; charset=utf-8")
        );
        let body = to_bytes(resp.into_body())
            .await
            .expect("body should be readable");
        let csv = String::from_utf8(body.to_vec()).expect("csv should be utf-8");
        assert!(csv.starts_with("\u{feff}Date,"));
        assert_eq!(csv.lines().count(), 2);

        let req = test::TestRequest::get().uri("/export/json").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["version"], "3.0.0");
        assert_eq!(json["history"][0]["id"], "r1");
    }

    #[actix_web::test]
    async fn history_edit_and_delete() {
        let state = build_state("api-history", "");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/session")
            .set_json(start_body())
            .to_request();
        test::call_service(&app, req).await;
        let req = test::TestRequest::post()
            .uri("/session/complete")
            .set_json(json!({"endTime": "2026-02-20T10:30", "endBattery": 70, "endRange": 260}))
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        let mut record = json["record"].clone();
        let id = record["id"].as_str().unwrap_or_default().to_string();

        record["endBattery"] = json!(90);
        let req = test::TestRequest::put()
            .uri(&format!("/history/{id}"))
            .set_json(&record)
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["chargedKwh"], 12.0);

        let req = test::TestRequest::put()
            .uri("/history/missing")
            .set_json(&record)
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NOT_FOUND
        );

        let req = test::TestRequest::post()
            .uri("/history/delete")
            .set_json(json!({"ids": [id]}))
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["deleted"], 1);
    }
}
