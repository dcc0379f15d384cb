use std::path::PathBuf;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use ulid::Ulid;

use motorpool::api::Api;
use motorpool::engine::Engine;
use motorpool::model::Event;
use motorpool::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("motorpool_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn stack(path: PathBuf) -> (Api, Arc<Engine>, Arc<NotifyHub>) {
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path, notify.clone()).unwrap());
    (Api::new(engine.clone()), engine, notify)
}

fn hours_from_now(h: i64) -> String {
    (Utc::now() + chrono::Duration::hours(h)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn id_of(resp: &motorpool::api::ApiResponse) -> String {
    resp.body["id"].as_str().unwrap().to_owned()
}

// ── End-to-end booking flow ──────────────────────────────────

#[tokio::test]
async fn full_booking_flow_with_notifications_and_restart() {
    let path = test_wal_path("flow.wal");
    let (api, _engine, notify) = stack(path.clone());

    // customer and vehicle
    let customer = api
        .create_customer(&json!({
            "customer": {
                "name": "Margaret Hamilton",
                "email": "margaret@example.com",
                "phone": "555-0199",
            }
        }))
        .await;
    assert_eq!(customer.status, 201, "{:?}", customer.body);
    let cid = id_of(&customer);

    let vehicle = api
        .create_vehicle(&json!({
            "vehicle": {
                "customer_id": cid,
                "make": "Ford",
                "model": "Transit",
                "year": 2023,
                "color": "White",
                "license_plate": "FLT-001",
            }
        }))
        .await;
    assert_eq!(vehicle.status, 201, "{:?}", vehicle.body);
    let vid = id_of(&vehicle);

    // watch the vehicle's channel before booking it
    let mut rx = notify.subscribe(Ulid::from_string(&vid).unwrap());

    let booked = api
        .create_reservation(&json!({
            "reservation": {
                "customer_id": cid,
                "vehicle_id": vid,
                "start_time": hours_from_now(24),
                "end_time": hours_from_now(48),
            }
        }))
        .await;
    assert_eq!(booked.status, 201, "{:?}", booked.body);
    let rid = id_of(&booked);
    assert_eq!(booked.body["status"], "pending");

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, Event::ReservationCreated { id, .. } if id.to_string() == rid));

    // a clashing booking is refused with the record-level message
    let clash = api
        .create_reservation(&json!({
            "reservation": {
                "customer_id": cid,
                "vehicle_id": vid,
                "start_time": hours_from_now(36),
                "end_time": hours_from_now(60),
            }
        }))
        .await;
    assert_eq!(clash.status, 422);
    assert!(
        clash.body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e == "Time slot overlaps with an existing reservation")
    );

    // confirming the booking notifies again
    let confirmed = api
        .update_reservation(&rid, &json!({ "reservation": { "status": "confirmed" } }))
        .await;
    assert_eq!(confirmed.status, 200, "{:?}", confirmed.body);
    let event = rx.recv().await.unwrap();
    assert!(matches!(event, Event::ReservationUpdated { .. }));

    // everything shows up on the list endpoints with associations embedded
    let listed = api.list_reservations(None, Some(vid.as_str()), true).await;
    let rows = listed.body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["customer"]["name"], "Margaret Hamilton");
    assert_eq!(rows[0]["vehicle"]["license_plate"], "FLT-001");

    // restart on the same WAL: state and conflict rules survive
    drop(api);
    let (api, _engine, _notify) = stack(path);
    let shown = api.show_reservation(&rid).await;
    assert_eq!(shown.status, 200, "{:?}", shown.body);
    assert_eq!(shown.body["status"], "confirmed");

    let clash = api
        .create_reservation(&json!({
            "reservation": {
                "customer_id": cid,
                "vehicle_id": vid,
                "start_time": hours_from_now(30),
                "end_time": hours_from_now(40),
            }
        }))
        .await;
    assert_eq!(clash.status, 422);
}

#[tokio::test]
async fn cascade_is_visible_at_the_boundary() {
    let (api, _engine, _notify) = stack(test_wal_path("cascade.wal"));

    let cid = id_of(
        &api.create_customer(&json!({
            "customer": {
                "name": "Katherine Johnson",
                "email": "katherine@example.com",
                "phone": "555-0142",
            }
        }))
        .await,
    );
    let vid = id_of(
        &api.create_vehicle(&json!({
            "vehicle": {
                "customer_id": cid,
                "make": "Chevy",
                "model": "Bolt",
                "year": 2022,
                "color": "Silver",
                "license_plate": "CSC-001",
            }
        }))
        .await,
    );
    let rid = id_of(
        &api.create_reservation(&json!({
            "reservation": {
                "customer_id": cid,
                "vehicle_id": vid,
                "start_time": hours_from_now(2),
                "end_time": hours_from_now(4),
            }
        }))
        .await,
    );

    // the customer detail carries both associations
    let shown = api.show_customer(&cid).await;
    assert_eq!(shown.body["vehicles"].as_array().unwrap().len(), 1);
    assert_eq!(shown.body["reservations"].as_array().unwrap().len(), 1);

    assert_eq!(api.delete_customer(&cid).await.status, 204);
    assert_eq!(api.show_vehicle(&vid).await.status, 404);
    assert_eq!(api.show_reservation(&rid).await.status, 404);
    assert!(api.list_customers().await.body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn slot_reopens_after_cancellation() {
    let (api, _engine, _notify) = stack(test_wal_path("reopen.wal"));

    let cid = id_of(
        &api.create_customer(&json!({
            "customer": {
                "name": "Dorothy Vaughan",
                "email": "dorothy@example.com",
                "phone": "555-0150",
            }
        }))
        .await,
    );
    let vid = id_of(
        &api.create_vehicle(&json!({
            "vehicle": {
                "customer_id": cid,
                "make": "Tesla",
                "model": "Model 3",
                "year": 2024,
                "color": "Black",
                "license_plate": "RSL-001",
            }
        }))
        .await,
    );

    let first = api
        .create_reservation(&json!({
            "reservation": {
                "customer_id": cid,
                "vehicle_id": vid,
                "start_time": hours_from_now(10),
                "end_time": hours_from_now(20),
            }
        }))
        .await;
    let rid = id_of(&first);

    let retry = json!({
        "reservation": {
            "customer_id": cid,
            "vehicle_id": vid,
            "start_time": hours_from_now(12),
            "end_time": hours_from_now(14),
        }
    });
    assert_eq!(api.create_reservation(&retry).await.status, 422);

    let cancelled = api
        .update_reservation(&rid, &json!({ "reservation": { "status": "cancelled" } }))
        .await;
    assert_eq!(cancelled.status, 200, "{:?}", cancelled.body);

    let resp = api.create_reservation(&retry).await;
    assert_eq!(resp.status, 201, "{:?}", resp.body);

    // the cancelled one is gone from upcoming but still listed overall
    let upcoming = api.list_reservations(None, Some(vid.as_str()), true).await;
    assert_eq!(upcoming.body.as_array().unwrap().len(), 1);
    let all = api.list_reservations(None, Some(vid.as_str()), false).await;
    let rows = all.body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r["id"] == rid.as_str()));
}

#[tokio::test]
async fn value_objects_round_trip_iso8601(){
    let (api, _engine, _notify) = stack(test_wal_path("iso.wal"));

    let cid = id_of(
        &api.create_customer(&json!({
            "customer": {
                "name": "Mary Jackson",
                "email": "mary@example.com",
                "phone": "555-0160",
            }
        }))
        .await,
    );
    let vid = id_of(
        &api.create_vehicle(&json!({
            "vehicle": {
                "customer_id": cid,
                "make": "Subaru",
                "model": "Outback",
                "year": 2021,
                "color": "Green",
                "license_plate": "ISO-001",
            }
        }))
        .await,
    );

    let start = "2031-05-01T09:30:00.000Z";
    let end = "2031-05-01T17:00:00.000Z";
    let resp = api
        .create_reservation(&json!({
            "reservation": {
                "customer_id": cid,
                "vehicle_id": vid,
                "start_time": start,
                "end_time": end,
            }
        }))
        .await;
    assert_eq!(resp.status, 201, "{:?}", resp.body);
    assert_eq!(resp.body["start_time"], Value::String(start.into()));
    assert_eq!(resp.body["end_time"], Value::String(end.into()));
}
