//! Transport-agnostic request boundary. Handlers accept already-decoded JSON
//! bodies and query parameters and return an [`ApiResponse`] the embedding
//! transport renders verbatim; no HTTP framework is assumed.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use serde_json::{Value, json};
use tracing::error;
use ulid::Ulid;

use crate::engine::{
    Engine, EngineError, EntityKind, Field, ReservationFilter, ValidationReport,
};
use crate::model::*;
use crate::observability::QUERIES_TOTAL;

/// Status code plus JSON body; `Value::Null` means an empty body (204).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: Value::Null,
        }
    }

    fn bad_request(message: String) -> Self {
        Self {
            status: 400,
            body: json!({ "error": message }),
        }
    }

    fn not_found(kind: EntityKind) -> Self {
        Self {
            status: 404,
            body: json!({ "error": format!("{} not found", kind.name()) }),
        }
    }

    fn unprocessable(report: &ValidationReport) -> Self {
        Self {
            status: 422,
            body: json!({ "errors": report.full_messages() }),
        }
    }
}

fn engine_error(e: EngineError) -> ApiResponse {
    match e {
        EngineError::NotFound(kind, _) => ApiResponse::not_found(kind),
        EngineError::Validation(report) => ApiResponse::unprocessable(&report),
        EngineError::AlreadyExists(id) => {
            // ids are minted per request, so this is a caller bug
            error!("duplicate id on create: {id}");
            ApiResponse {
                status: 422,
                body: json!({ "errors": ["Id has already been taken"] }),
            }
        }
        EngineError::LimitExceeded(msg) => ApiResponse {
            status: 422,
            body: json!({ "errors": [msg] }),
        },
        EngineError::WalError(msg) => {
            error!("WAL failure serving request: {msg}");
            ApiResponse {
                status: 500,
                body: json!({ "error": "internal error" }),
            }
        }
    }
}

fn count_query(op: &'static str) {
    metrics::counter!(QUERIES_TOTAL, "op" => op).increment(1);
}

// ── Parameter extraction ────────────────────────────────────────

/// An id-valued body field. Blank strings count as absent, matching the
/// original boundary's presence check.
enum IdParam {
    Absent,
    Invalid,
    Id(Ulid),
}

fn id_field(obj: &Value, key: &str) -> IdParam {
    match obj.get(key) {
        None | Some(Value::Null) => IdParam::Absent,
        Some(Value::String(s)) if s.is_empty() => IdParam::Absent,
        Some(v) => match v.as_str().and_then(|s| Ulid::from_string(s).ok()) {
            Some(id) => IdParam::Id(id),
            None => IdParam::Invalid,
        },
    }
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// ISO-8601 timestamp field. Absent, null, or unparseable all come back as
/// None; the validator reports the resulting hole as a presence error.
fn time_field(obj: &Value, key: &str) -> Option<Ms> {
    obj.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.timestamp_millis())
}

/// Timestamp field for updates. Absent keeps the stored value; null, blank,
/// or unparseable input reads as blank and fails presence downstream.
fn time_patch_field(obj: &Value, key: &str) -> Option<TimePatch> {
    let v = obj.get(key)?;
    Some(
        match v.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
            Some(t) => TimePatch::Set(t.timestamp_millis()),
            None => TimePatch::Blank,
        },
    )
}

/// Year field, accepted as a JSON number or numeric string. A present but
/// non-numeric value comes back as None and reads as "is not a number".
fn year_field(obj: &Value, key: &str) -> Option<i32> {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(Value::String(s)) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

fn status_field(obj: &Value) -> Option<StatusInput> {
    match obj.get("status") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => Some(StatusInput::Blank),
        Some(Value::String(s)) => Some(match ReservationStatus::parse(s) {
            Some(status) => StatusInput::Known(status),
            None => StatusInput::Unknown(s.clone()),
        }),
        Some(_) => Some(StatusInput::Blank),
    }
}

/// Unwrap `{"reservation": {...}}`-style bodies. A missing or non-object
/// wrapper is a 400, mirroring a strong-parameters `require`.
fn require_wrapper<'a>(params: &'a Value, key: &str) -> Result<&'a Value, ApiResponse> {
    match params.get(key) {
        Some(v) if v.is_object() => Ok(v),
        _ => Err(ApiResponse::bad_request(format!(
            "Missing required parameter: {key}"
        ))),
    }
}

fn path_id(raw: &str, kind: EntityKind) -> Result<Ulid, ApiResponse> {
    Ulid::from_string(raw).map_err(|_| ApiResponse::not_found(kind))
}

fn must_exist(field: Field) -> ApiResponse {
    let mut report = ValidationReport::default();
    report.field(field, "must exist");
    ApiResponse::unprocessable(&report)
}

// ── JSON rendering ──────────────────────────────────────────────

fn iso(ms: Ms) -> Value {
    match DateTime::from_timestamp_millis(ms) {
        Some(t) => Value::String(t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => Value::Null,
    }
}

fn customer_json(c: &Customer) -> Value {
    json!({
        "id": c.id.to_string(),
        "name": c.name,
        "email": c.email,
        "phone": c.phone,
    })
}

fn vehicle_json(v: &Vehicle) -> Value {
    json!({
        "id": v.id.to_string(),
        "customer_id": v.customer_id.to_string(),
        "make": v.make,
        "model": v.model,
        "year": v.year,
        "color": v.color,
        "license_plate": v.license_plate,
    })
}

fn reservation_json(r: &Reservation) -> Value {
    json!({
        "id": r.id.to_string(),
        "customer_id": r.customer_id.to_string(),
        "vehicle_id": r.vehicle_id.to_string(),
        "start_time": iso(r.span.start),
        "end_time": iso(r.span.end),
        "status": r.status.as_str(),
    })
}

fn reservation_detail_json(d: &ReservationDetail) -> Value {
    let mut body = reservation_json(&d.reservation);
    body["customer"] = customer_json(&d.customer);
    body["vehicle"] = vehicle_json(&d.vehicle);
    body
}

fn customer_detail_json(d: &CustomerDetail) -> Value {
    let mut body = customer_json(&d.customer);
    body["vehicles"] = Value::Array(d.vehicles.iter().map(vehicle_json).collect());
    body["reservations"] = Value::Array(d.reservations.iter().map(reservation_json).collect());
    body
}

fn vehicle_detail_json(d: &VehicleDetail) -> Value {
    let mut body = vehicle_json(&d.vehicle);
    body["customer"] = customer_json(&d.customer);
    body["reservations"] = Value::Array(d.reservations.iter().map(reservation_json).collect());
    body
}

// ── Handlers ────────────────────────────────────────────────────

pub struct Api {
    engine: Arc<Engine>,
}

impl Api {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    // ── Customers ────────────────────────────────────────────

    pub async fn list_customers(&self) -> ApiResponse {
        count_query("list_customers");
        let mut rows = Vec::new();
        for c in self.engine.list_customers().await {
            if let Ok(detail) = self.engine.get_customer_detail(c.id).await {
                rows.push(customer_detail_json(&detail));
            }
        }
        ApiResponse::ok(Value::Array(rows))
    }

    pub async fn show_customer(&self, id: &str) -> ApiResponse {
        count_query("show_customer");
        let id = match path_id(id, EntityKind::Customer) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        match self.engine.get_customer_detail(id).await {
            Ok(detail) => ApiResponse::ok(customer_detail_json(&detail)),
            Err(e) => engine_error(e),
        }
    }

    pub async fn create_customer(&self, params: &Value) -> ApiResponse {
        let body = match require_wrapper(params, "customer") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        let name = str_field(body, "name").unwrap_or_default();
        let email = str_field(body, "email").unwrap_or_default();
        let phone = str_field(body, "phone").unwrap_or_default();
        match self
            .engine
            .create_customer(Ulid::new(), name, email, phone)
            .await
        {
            Ok(customer) => ApiResponse::created(customer_json(&customer)),
            Err(e) => engine_error(e),
        }
    }

    pub async fn update_customer(&self, id: &str, params: &Value) -> ApiResponse {
        let id = match path_id(id, EntityKind::Customer) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let body = match require_wrapper(params, "customer") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        let patch = CustomerPatch {
            name: str_field(body, "name"),
            email: str_field(body, "email"),
            phone: str_field(body, "phone"),
        };
        match self.engine.update_customer(id, patch).await {
            Ok(customer) => ApiResponse::ok(customer_json(&customer)),
            Err(e) => engine_error(e),
        }
    }

    pub async fn delete_customer(&self, id: &str) -> ApiResponse {
        let id = match path_id(id, EntityKind::Customer) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        match self.engine.delete_customer(id).await {
            Ok(()) => ApiResponse::no_content(),
            Err(e) => engine_error(e),
        }
    }

    // ── Vehicles ─────────────────────────────────────────────

    pub async fn list_vehicles(&self, customer_id: Option<&str>) -> ApiResponse {
        count_query("list_vehicles");
        let owner = match customer_id {
            Some(raw) => match Ulid::from_string(raw) {
                Ok(id) => Some(id),
                // an unknown-shaped filter id matches nothing
                Err(_) => return ApiResponse::ok(Value::Array(Vec::new())),
            },
            None => None,
        };
        let mut rows = Vec::new();
        for v in self.engine.list_vehicles(owner).await {
            if let Ok(detail) = self.engine.get_vehicle_detail(v.id).await {
                rows.push(vehicle_detail_json(&detail));
            }
        }
        ApiResponse::ok(Value::Array(rows))
    }

    pub async fn show_vehicle(&self, id: &str) -> ApiResponse {
        count_query("show_vehicle");
        let id = match path_id(id, EntityKind::Vehicle) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        match self.engine.get_vehicle_detail(id).await {
            Ok(detail) => ApiResponse::ok(vehicle_detail_json(&detail)),
            Err(e) => engine_error(e),
        }
    }

    pub async fn create_vehicle(&self, params: &Value) -> ApiResponse {
        let body = match require_wrapper(params, "vehicle") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        // existence precheck only when a customer_id was supplied; a missing
        // one falls through to the association validation
        let customer_id = match id_field(body, "customer_id") {
            IdParam::Id(id) => {
                if !self.engine.customer_exists(&id) {
                    return ApiResponse::not_found(EntityKind::Customer);
                }
                id
            }
            IdParam::Invalid => return ApiResponse::not_found(EntityKind::Customer),
            IdParam::Absent => return must_exist(Field::Customer),
        };
        let make = str_field(body, "make").unwrap_or_default();
        let model = str_field(body, "model").unwrap_or_default();
        let color = str_field(body, "color").unwrap_or_default();
        let license_plate = str_field(body, "license_plate").unwrap_or_default();
        let year = year_field(body, "year");
        match self
            .engine
            .create_vehicle(Ulid::new(), customer_id, make, model, year, color, license_plate)
            .await
        {
            Ok(vehicle) => ApiResponse::created(vehicle_json(&vehicle)),
            Err(e) => engine_error(e),
        }
    }

    pub async fn update_vehicle(&self, id: &str, params: &Value) -> ApiResponse {
        let id = match path_id(id, EntityKind::Vehicle) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let body = match require_wrapper(params, "vehicle") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        let customer_id = match id_field(body, "customer_id") {
            IdParam::Id(cid) => Some(cid),
            IdParam::Invalid => return must_exist(Field::Customer),
            IdParam::Absent => None,
        };
        let patch = VehiclePatch {
            customer_id,
            make: str_field(body, "make"),
            model: str_field(body, "model"),
            year: year_field(body, "year"),
            color: str_field(body, "color"),
            license_plate: str_field(body, "license_plate"),
        };
        match self.engine.update_vehicle(id, patch).await {
            Ok(vehicle) => ApiResponse::ok(vehicle_json(&vehicle)),
            Err(e) => engine_error(e),
        }
    }

    pub async fn delete_vehicle(&self, id: &str) -> ApiResponse {
        let id = match path_id(id, EntityKind::Vehicle) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        match self.engine.delete_vehicle(id).await {
            Ok(()) => ApiResponse::no_content(),
            Err(e) => engine_error(e),
        }
    }

    // ── Reservations ─────────────────────────────────────────

    pub async fn list_reservations(
        &self,
        customer_id: Option<&str>,
        vehicle_id: Option<&str>,
        upcoming: bool,
    ) -> ApiResponse {
        count_query("list_reservations");
        let mut filter = ReservationFilter {
            upcoming_only: upcoming,
            ..Default::default()
        };
        if let Some(raw) = customer_id {
            match Ulid::from_string(raw) {
                Ok(id) => filter.customer_id = Some(id),
                Err(_) => return ApiResponse::ok(Value::Array(Vec::new())),
            }
        }
        if let Some(raw) = vehicle_id {
            match Ulid::from_string(raw) {
                Ok(id) => filter.vehicle_id = Some(id),
                Err(_) => return ApiResponse::ok(Value::Array(Vec::new())),
            }
        }
        let rows: Vec<Value> = self
            .engine
            .list_reservations(&filter)
            .await
            .iter()
            .map(reservation_detail_json)
            .collect();
        ApiResponse::ok(Value::Array(rows))
    }

    pub async fn show_reservation(&self, id: &str) -> ApiResponse {
        count_query("show_reservation");
        let id = match path_id(id, EntityKind::Reservation) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        match self.engine.get_reservation_detail(id).await {
            Ok(detail) => ApiResponse::ok(reservation_detail_json(&detail)),
            Err(e) => engine_error(e),
        }
    }

    pub async fn create_reservation(&self, params: &Value) -> ApiResponse {
        let body = match require_wrapper(params, "reservation") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        let customer_id = match id_field(body, "customer_id") {
            IdParam::Id(id) => Some(id),
            IdParam::Invalid => return ApiResponse::not_found(EntityKind::Customer),
            IdParam::Absent => None,
        };
        let vehicle_id = match id_field(body, "vehicle_id") {
            IdParam::Id(id) => Some(id),
            IdParam::Invalid => return ApiResponse::not_found(EntityKind::Vehicle),
            IdParam::Absent => None,
        };
        let draft = ReservationDraft {
            customer_id,
            vehicle_id,
            start_time: time_field(body, "start_time"),
            end_time: time_field(body, "end_time"),
            // the stored column defaults to pending when omitted
            status: status_field(body).unwrap_or(StatusInput::Known(ReservationStatus::Pending)),
        };
        let reservation = match self.engine.create_reservation(Ulid::new(), draft).await {
            Ok(r) => r,
            Err(e) => return engine_error(e),
        };
        match self.engine.get_reservation_detail(reservation.id).await {
            Ok(detail) => ApiResponse::created(reservation_detail_json(&detail)),
            Err(e) => engine_error(e),
        }
    }

    pub async fn update_reservation(&self, id: &str, params: &Value) -> ApiResponse {
        let id = match path_id(id, EntityKind::Reservation) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        let body = match require_wrapper(params, "reservation") {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        let customer_id = match id_field(body, "customer_id") {
            IdParam::Id(cid) => Some(cid),
            IdParam::Invalid => return must_exist(Field::Customer),
            IdParam::Absent => None,
        };
        let vehicle_id = match id_field(body, "vehicle_id") {
            IdParam::Id(vid) => Some(vid),
            IdParam::Invalid => return must_exist(Field::Vehicle),
            IdParam::Absent => None,
        };
        let patch = ReservationPatch {
            customer_id,
            vehicle_id,
            start_time: time_patch_field(body, "start_time"),
            end_time: time_patch_field(body, "end_time"),
            status: status_field(body),
        };
        let updated = match self.engine.update_reservation(id, patch).await {
            Ok(r) => r,
            Err(e) => return engine_error(e),
        };
        match self.engine.get_reservation_detail(updated.id).await {
            Ok(detail) => ApiResponse::ok(reservation_detail_json(&detail)),
            Err(e) => engine_error(e),
        }
    }

    pub async fn delete_reservation(&self, id: &str) -> ApiResponse {
        let id = match path_id(id, EntityKind::Reservation) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        match self.engine.delete_reservation(id).await {
            Ok(()) => ApiResponse::no_content(),
            Err(e) => engine_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyHub;
    use chrono::Utc;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("motorpool_test_api");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn api(name: &str) -> Api {
        let engine = Arc::new(
            Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap(),
        );
        Api::new(engine)
    }

    fn hours_from_now(h: i64) -> String {
        (Utc::now() + chrono::Duration::hours(h)).to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    async fn seed_customer(api: &Api) -> String {
        let resp = api
            .create_customer(&json!({
                "customer": {
                    "name": "Ada Lovelace",
                    "email": format!("{}@example.com", Ulid::new()),
                    "phone": "555-0100",
                }
            }))
            .await;
        assert_eq!(resp.status, 201, "{:?}", resp.body);
        resp.body["id"].as_str().unwrap().to_owned()
    }

    async fn seed_vehicle(api: &Api, customer_id: &str) -> String {
        let resp = api
            .create_vehicle(&json!({
                "vehicle": {
                    "customer_id": customer_id,
                    "make": "Toyota",
                    "model": "Corolla",
                    "year": 2021,
                    "color": "Blue",
                    "license_plate": format!("PL-{}", &Ulid::new().to_string()[18..]),
                }
            }))
            .await;
        assert_eq!(resp.status, 201, "{:?}", resp.body);
        resp.body["id"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn create_reservation_with_includes() {
        let api = api("create_reservation.wal");
        let cid = seed_customer(&api).await;
        let vid = seed_vehicle(&api, &cid).await;

        let resp = api
            .create_reservation(&json!({
                "reservation": {
                    "customer_id": cid,
                    "vehicle_id": vid,
                    "start_time": hours_from_now(1),
                    "end_time": hours_from_now(3),
                }
            }))
            .await;
        assert_eq!(resp.status, 201, "{:?}", resp.body);
        // omitted status defaults to pending; associations are embedded
        assert_eq!(resp.body["status"], "pending");
        assert_eq!(resp.body["customer"]["id"], cid.as_str());
        assert_eq!(resp.body["vehicle"]["id"], vid.as_str());
    }

    #[tokio::test]
    async fn missing_wrapper_is_bad_request() {
        let api = api("missing_wrapper.wal");
        let resp = api.create_reservation(&json!({ "start_time": "x" })).await;
        assert_eq!(resp.status, 400);
        assert_eq!(
            resp.body["error"],
            "Missing required parameter: reservation"
        );
    }

    #[tokio::test]
    async fn create_with_unknown_customer_is_404() {
        let api = api("unknown_customer.wal");
        let resp = api
            .create_reservation(&json!({
                "reservation": {
                    "customer_id": Ulid::new().to_string(),
                    "start_time": hours_from_now(1),
                    "end_time": hours_from_now(2),
                }
            }))
            .await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error"], "Customer not found");
    }

    #[tokio::test]
    async fn overlap_is_unprocessable_with_base_message() {
        let api = api("overlap_422.wal");
        let cid = seed_customer(&api).await;
        let vid = seed_vehicle(&api, &cid).await;

        let booked = api
            .create_reservation(&json!({
                "reservation": {
                    "customer_id": cid,
                    "vehicle_id": vid,
                    "start_time": hours_from_now(1),
                    "end_time": hours_from_now(4),
                }
            }))
            .await;
        assert_eq!(booked.status, 201, "{:?}", booked.body);

        let resp = api
            .create_reservation(&json!({
                "reservation": {
                    "customer_id": cid,
                    "vehicle_id": vid,
                    "start_time": hours_from_now(2),
                    "end_time": hours_from_now(5),
                }
            }))
            .await;
        assert_eq!(resp.status, 422);
        let errors = resp.body["errors"].as_array().unwrap();
        assert!(
            errors
                .iter()
                .any(|e| e == "Time slot overlaps with an existing reservation"),
            "{errors:?}"
        );
    }

    #[tokio::test]
    async fn validation_errors_use_full_messages() {
        let api = api("full_messages.wal");
        let resp = api
            .create_customer(&json!({
                "customer": { "name": "A", "email": "nope", "phone": "call me" }
            }))
            .await;
        assert_eq!(resp.status, 422);
        let errors = resp.body["errors"].as_array().unwrap();
        assert!(errors.iter().any(|e| e == "Name is too short (minimum is 2 characters)"));
        assert!(errors.iter().any(|e| e == "Email is invalid"));
        assert!(errors.iter().any(|e| e == "Phone must be a valid phone number"));
    }

    #[tokio::test]
    async fn unparseable_time_reads_as_blank() {
        let api = api("bad_time.wal");
        let cid = seed_customer(&api).await;
        let vid = seed_vehicle(&api, &cid).await;
        let resp = api
            .create_reservation(&json!({
                "reservation": {
                    "customer_id": cid,
                    "vehicle_id": vid,
                    "start_time": "not-a-date",
                    "end_time": hours_from_now(2),
                }
            }))
            .await;
        assert_eq!(resp.status, 422);
        let errors = resp.body["errors"].as_array().unwrap();
        assert!(errors.iter().any(|e| e == "Start time can't be blank"), "{errors:?}");
    }

    #[tokio::test]
    async fn garbage_time_on_update_is_unprocessable() {
        let api = api("bad_time_update.wal");
        let cid = seed_customer(&api).await;
        let vid = seed_vehicle(&api, &cid).await;
        let created = api
            .create_reservation(&json!({
                "reservation": {
                    "customer_id": cid,
                    "vehicle_id": vid,
                    "start_time": hours_from_now(1),
                    "end_time": hours_from_now(2),
                }
            }))
            .await;
        let rid = created.body["id"].as_str().unwrap().to_owned();
        let original_start = created.body["start_time"].clone();

        // sent-but-unreadable reads as blank, absent would keep the value
        for bad in [json!("not-a-date"), Value::Null] {
            let resp = api
                .update_reservation(&rid, &json!({ "reservation": { "start_time": bad } }))
                .await;
            assert_eq!(resp.status, 422, "{:?}", resp.body);
            let errors = resp.body["errors"].as_array().unwrap();
            assert!(
                errors.iter().any(|e| e == "Start time can't be blank"),
                "{errors:?}"
            );
        }

        let shown = api.show_reservation(&rid).await;
        assert_eq!(shown.body["start_time"], original_start);
    }

    #[tokio::test]
    async fn show_unknown_reservation_is_404() {
        let api = api("show_unknown.wal");
        let resp = api.show_reservation(&Ulid::new().to_string()).await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error"], "Reservation not found");
        // malformed ids read the same as unknown ones
        let resp = api.show_reservation("not-an-id").await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn list_reservations_filters_by_vehicle_and_upcoming() {
        let api = api("list_filters.wal");
        let cid = seed_customer(&api).await;
        let vid_a = seed_vehicle(&api, &cid).await;
        let vid_b = seed_vehicle(&api, &cid).await;

        for vid in [&vid_a, &vid_b] {
            let resp = api
                .create_reservation(&json!({
                    "reservation": {
                        "customer_id": cid,
                        "vehicle_id": vid,
                        "start_time": hours_from_now(1),
                        "end_time": hours_from_now(2),
                    }
                }))
                .await;
            assert_eq!(resp.status, 201, "{:?}", resp.body);
        }

        let all = api.list_reservations(None, None, false).await;
        assert_eq!(all.body.as_array().unwrap().len(), 2);

        let only_a = api.list_reservations(None, Some(vid_a.as_str()), false).await;
        let rows = only_a.body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["vehicle_id"], vid_a.as_str());

        let upcoming = api.list_reservations(Some(cid.as_str()), None, true).await;
        assert_eq!(upcoming.body.as_array().unwrap().len(), 2);

        let garbage = api.list_reservations(Some("zzz"), None, false).await;
        assert_eq!(garbage.status, 200);
        assert!(garbage.body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_and_delete_round_out_the_lifecycle() {
        let api = api("lifecycle.wal");
        let cid = seed_customer(&api).await;
        let vid = seed_vehicle(&api, &cid).await;

        let created = api
            .create_reservation(&json!({
                "reservation": {
                    "customer_id": cid,
                    "vehicle_id": vid,
                    "start_time": hours_from_now(1),
                    "end_time": hours_from_now(2),
                }
            }))
            .await;
        let rid = created.body["id"].as_str().unwrap().to_owned();

        let updated = api
            .update_reservation(&rid, &json!({ "reservation": { "status": "confirmed" } }))
            .await;
        assert_eq!(updated.status, 200, "{:?}", updated.body);
        assert_eq!(updated.body["status"], "confirmed");

        let gone = api.delete_reservation(&rid).await;
        assert_eq!(gone.status, 204);
        assert_eq!(gone.body, Value::Null);

        let resp = api.show_reservation(&rid).await;
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn vehicle_create_requires_owner() {
        let api = api("vehicle_owner.wal");
        let resp = api
            .create_vehicle(&json!({
                "vehicle": {
                    "make": "Honda", "model": "Civic", "year": 2020,
                    "color": "Red", "license_plate": "NOOWNER-1",
                }
            }))
            .await;
        assert_eq!(resp.status, 422);
        let errors = resp.body["errors"].as_array().unwrap();
        assert!(errors.iter().any(|e| e == "Customer must exist"), "{errors:?}");

        let resp = api
            .create_vehicle(&json!({
                "vehicle": {
                    "customer_id": Ulid::new().to_string(),
                    "make": "Honda", "model": "Civic", "year": 2020,
                    "color": "Red", "license_plate": "NOOWNER-2",
                }
            }))
            .await;
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error"], "Customer not found");
    }

    #[tokio::test]
    async fn deleting_customer_cascades_through_the_api() {
        let api = api("cascade_api.wal");
        let cid = seed_customer(&api).await;
        let vid = seed_vehicle(&api, &cid).await;
        let created = api
            .create_reservation(&json!({
                "reservation": {
                    "customer_id": cid,
                    "vehicle_id": vid,
                    "start_time": hours_from_now(1),
                    "end_time": hours_from_now(2),
                }
            }))
            .await;
        let rid = created.body["id"].as_str().unwrap().to_owned();

        assert_eq!(api.delete_customer(&cid).await.status, 204);
        assert_eq!(api.show_customer(&cid).await.status, 404);
        assert_eq!(api.show_vehicle(&vid).await.status, 404);
        assert_eq!(api.show_reservation(&rid).await.status, 404);
    }
}
