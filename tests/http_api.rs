//! End-to-end tests of the JSON API against an in-process router.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use chrono::NaiveDate;
use serde_json::{Value, json};
use tower::ServiceExt;

use chargebook::engine::{BusinessHours, Engine, FixedClock};
use chargebook::http::dto::{ReservationDto, StationsResponse, VerifyPlateResp};
use chargebook::http::{self, AppState, router};

const ADMIN_TOKEN: &str = "test-admin-token";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("chargebook_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn app(name: &str) -> Router {
    router(AppState::new(engine(name).await, ADMIN_TOKEN))
}

async fn engine(name: &str) -> Arc<Engine> {
    let now = NaiveDate::from_ymd_opt(2030, 1, 2)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap();
    let engine = Engine::new(
        &test_wal_path(name),
        BusinessHours::default(),
        Arc::new(FixedClock::new(now)),
        Duration::from_secs(2),
    )
    .unwrap();
    engine.seed_stations(4).await.unwrap();
    Arc::new(engine)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn booking(station_id: u32, plate: &str, start: &str, end: &str) -> Value {
    json!({
        "stationId": station_id,
        "plate": plate,
        "date": "2030-01-02",
        "startTime": start,
        "endTime": end,
        "contactEmail": "Driver@Example.com",
    })
}

async fn create(app: &Router, body: Value) -> ReservationDto {
    let (status, value) = send(app, Method::POST, "/api/reservations", Some(body), None).await;
    assert_eq!(status, StatusCode::CREATED, "{value}");
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn health_endpoint() {
    let app = app("health.wal").await;
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn create_then_list() {
    let app = app("create_list.wal").await;
    let created = create(&app, booking(2, "12가 3456", "09:00", "10:30")).await;
    assert_eq!(created.station_id, 2);
    assert_eq!(created.contact_email.as_deref(), Some("driver@example.com"));

    let (status, body) = send(&app, Method::GET, "/api/stations", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let stations = body.as_array().unwrap();
    assert_eq!(stations.len(), 4);
    assert_eq!(stations[1]["name"], "Station 2");
    assert_eq!(stations[1]["reservations"][0]["startTime"], "09:00");
    assert_eq!(stations[1]["reservations"][0]["endTime"], "10:30");
    assert_eq!(stations[1]["reservations"][0]["status"], "CONFIRMED");

    let (status, body) = send(&app, Method::GET, "/api/reservations/by-station?date=2030-01-02", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let grouped: StationsResponse = serde_json::from_value(body).unwrap();
    assert_eq!(grouped.stations[1].reservations[0].id, created.id);

    let (status, body) = send(&app, Method::GET, "/api/stations/2/reservations?date=2030-01-03", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn error_statuses() {
    let app = app("errors.wal").await;
    create(&app, booking(1, "12AB3456", "10:00", "11:00")).await;

    // Station overlap
    let (status, body) = send(&app, Method::POST, "/api/reservations", Some(booking(1, "99ZZ9999", "10:30", "11:00")), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
    assert_eq!(body["axis"], "station");

    // Plate overlap on another station
    let (status, body) = send(&app, Method::POST, "/api/reservations", Some(booking(3, "12ab3456", "10:00", "10:30")), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["axis"], "plate");

    // Misaligned
    let (status, body) = send(&app, Method::POST, "/api/reservations", Some(booking(2, "12AB3456", "09:10", "09:40")), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");

    // Unknown station
    let (status, body) = send(&app, Method::POST, "/api/reservations", Some(booking(42, "12AB3456", "12:00", "12:30")), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "station_not_found");

    // Malformed body
    let (status, body) = send(&app, Method::POST, "/api/reservations", Some(json!({ "plate": "12AB3456" })), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    // Missing date query
    let (status, _) = send(&app, Method::GET, "/api/reservations/by-station", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Non-numeric station id still gets the JSON error body
    let (status, body) = send(&app, Method::GET, "/api/stations/abc/reservations?date=2030-01-02", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn verify_plate_endpoint() {
    let app = app("verify.wal").await;
    let created = create(&app, booking(1, "12AB3456", "10:00", "11:00")).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/plates/verify",
        Some(json!({ "plate": "12ab 3456", "date": "2030-01-02", "startTime": "10:30", "endTime": "11:30" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let verdict: VerifyPlateResp = serde_json::from_value(body).unwrap();
    assert!(!verdict.valid);
    assert!(verdict.conflict);
    assert_eq!(verdict.conflicting_reservation.unwrap().id, created.id);

    let (_, body) = send(&app, Method::POST, "/api/plates/verify", Some(json!({ "plate": "55XX5555" })), None).await;
    assert_eq!(body["valid"], true);
    assert!(body["conflictingReservation"].is_null());
}

#[tokio::test]
async fn owner_delete_and_cancel() {
    let app = app("owner.wal").await;
    let first = create(&app, booking(1, "12AB3456", "10:00", "11:00")).await;
    let second = create(&app, booking(2, "12AB3456", "13:00", "14:00")).await;

    let (status, body) = send(&app, Method::GET, "/api/reservations/my?email=driver@example.com", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let mine: Vec<ReservationDto> = serde_json::from_value(body).unwrap();
    assert_eq!(mine.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), [second.id.as_str(), first.id.as_str()]);

    let (status, _) = send(&app, Method::GET, "/api/reservations/my", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/api/reservations/{}?email=someone@example.com", first.id);
    let (status, _) = send(&app, Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/api/reservations/{}?plate=12AB3456", first.id);
    let (status, body) = send(&app, Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let uri = format!("/api/reservations/{}/cancel?email=driver@example.com", second.id);
    let (status, body) = send(&app, Method::POST, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");

    let (status, _) = send(&app, Method::DELETE, "/api/reservations/not-a-ulid?plate=12AB3456", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_require_token() {
    let app = app("admin.wal").await;
    let created = create(&app, booking(1, "12AB3456", "10:00", "11:00")).await;

    let (status, body) = send(&app, Method::GET, "/api/admin/reservations/by-station?date=2030-01-02", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = send(&app, Method::GET, "/api/admin/reservations/by-station?date=2030-01-02", None, Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, Method::GET, "/api/admin/reservations/by-station?date=2030-01-02", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stations"][0]["reservations"][0]["id"], created.id);

    let uri = format!("/api/admin/reservations/{}/cancel", created.id);
    let (status, _) = send(&app, Method::POST, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = send(&app, Method::POST, &uri, None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");

    // The window is free again for another vehicle, at a different start
    create(&app, booking(1, "99ZZ9999", "10:30", "11:00")).await;
}

#[tokio::test]
async fn admin_delete_frees_the_slot() {
    let app = app("admin_delete.wal").await;
    let created = create(&app, booking(1, "12AB3456", "10:00", "11:00")).await;
    let cancel_uri = format!("/api/admin/reservations/{}/cancel", created.id);
    let (status, _) = send(&app, Method::POST, &cancel_uri, None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);

    // Cancelled still holds the exact start
    let (status, body) = send(&app, Method::POST, "/api/reservations", Some(booking(1, "99ZZ9999", "10:00", "10:30")), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "duplicate");

    let uri = format!("/api/admin/reservations/{}", created.id);
    let (status, _) = send(&app, Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = send(&app, Method::DELETE, &uri, None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let (status, body) = send(&app, Method::DELETE, &uri, None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    create(&app, booking(1, "99ZZ9999", "10:00", "10:30")).await;
}

#[tokio::test]
async fn connection_cap_is_shared_across_routes() {
    let engine = engine("connection_cap.wal").await;
    let app = http::app(AppState::new(engine.clone(), ADMIN_TOKEN), 1, &[]);

    // Park a create on a held station lock so it keeps the only slot
    let held = engine.store.lock_station(1).await.unwrap();
    let blocked = {
        let app = app.clone();
        tokio::spawn(async move {
            send(&app, Method::POST, "/api/reservations", Some(booking(1, "12AB3456", "10:00", "11:00")), None).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let waiting = tokio::time::timeout(
        Duration::from_millis(300),
        send(&app, Method::GET, "/health", None, None),
    )
    .await;
    assert!(waiting.is_err(), "health bypassed the cap: {waiting:?}");

    drop(held);
    let (status, _) = blocked.await.unwrap();
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
