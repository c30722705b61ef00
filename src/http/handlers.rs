use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use serde_json::{Value, json};
use tracing::info;
use ulid::Ulid;

use crate::engine::NewReservation;
use crate::model::StationId;

use super::AppState;
use super::dto::*;
use super::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    params
        .map(|Query(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

fn path<T>(segment: Result<Path<T>, PathRejection>) -> ApiResult<T> {
    segment
        .map(|Path(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// Unparseable ids cannot name a stored reservation.
fn reservation_id(raw: &str) -> ApiResult<Ulid> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("reservation {raw}")))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Every station with all of its reservations.
pub async fn list_stations(State(state): State<AppState>) -> ApiResult<Json<Vec<StationReservationsDto>>> {
    let stations = state.engine.stations_with_reservations().await?;
    Ok(Json(stations.into_iter().map(StationReservationsDto::from).collect()))
}

/// Every station with the reservations starting on `?date=`. Shared by the
/// public and admin routes.
pub async fn reservations_by_station(
    State(state): State<AppState>,
    params: Result<Query<DateQuery>, QueryRejection>,
) -> ApiResult<Json<StationsResponse>> {
    let DateQuery { date } = query(params)?;
    let stations = state.engine.reservations_by_date(date).await?;
    Ok(Json(StationsResponse {
        stations: stations.into_iter().map(StationReservationsDto::from).collect(),
    }))
}

pub async fn station_reservations(
    State(state): State<AppState>,
    station_id: Result<Path<StationId>, PathRejection>,
    params: Result<Query<DateQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ReservationDto>>> {
    let station_id = path(station_id)?;
    let DateQuery { date } = query(params)?;
    let reservations = state.engine.reservations_for_station(station_id, date).await?;
    Ok(Json(reservations.into_iter().map(ReservationDto::from).collect()))
}

pub async fn create_reservation(
    State(state): State<AppState>,
    payload: Result<Json<CreateReservationReq>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ReservationDto>)> {
    let req = body(payload)?;
    let created = state
        .engine
        .create_reservation(NewReservation {
            station_id: req.station_id,
            plate: req.plate,
            date: req.date,
            start_time: req.start_time,
            end_time: req.end_time,
            contact_email: req.contact_email,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ReservationDto::from(created))))
}

pub async fn verify_plate(
    State(state): State<AppState>,
    payload: Result<Json<VerifyPlateReq>, JsonRejection>,
) -> ApiResult<Json<VerifyPlateResp>> {
    let req = body(payload)?;
    let verification = state.engine.verify(&req.plate, req.interval()).await?;
    let message = if verification.valid {
        "reservation available"
    } else {
        "vehicle already has a reservation"
    };
    Ok(Json(VerifyPlateResp {
        valid: verification.valid,
        conflict: !verification.valid,
        message: message.to_string(),
        conflicting_reservation: verification.conflicting_reservation.map(ReservationDto::from),
    }))
}

pub async fn my_reservations(
    State(state): State<AppState>,
    params: Result<Query<OwnerQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ReservationDto>>> {
    let owner = query(params)?;
    let reservations = state
        .engine
        .list_for_user(owner.email.as_deref(), owner.plate.as_deref())
        .await?;
    Ok(Json(reservations.into_iter().map(ReservationDto::from).collect()))
}

pub async fn delete_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<OwnerQuery>, QueryRejection>,
) -> ApiResult<Json<OkResponse>> {
    let owner = query(params)?;
    let id = reservation_id(&id)?;
    let deleted = state
        .engine
        .delete_for_user(id, owner.email.as_deref(), owner.plate.as_deref())
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("reservation {id}")));
    }
    Ok(Json(OkResponse { ok: true }))
}

pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<OwnerQuery>, QueryRejection>,
) -> ApiResult<Json<ReservationDto>> {
    let owner = query(params)?;
    let id = reservation_id(&id)?;
    let cancelled = state
        .engine
        .cancel_for_user(id, owner.email.as_deref(), owner.plate.as_deref())
        .await?;
    Ok(Json(ReservationDto::from(cancelled)))
}

pub async fn admin_cancel_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReservationDto>> {
    let id = reservation_id(&id)?;
    let cancelled = state.engine.cancel_reservation(id).await?;
    info!("admin cancelled reservation {id}");
    Ok(Json(ReservationDto::from(cancelled)))
}

pub async fn admin_delete_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    let id = reservation_id(&id)?;
    if !state.engine.delete_reservation(id).await? {
        return Err(ApiError::NotFound(format!("reservation {id}")));
    }
    info!("admin deleted reservation {id}");
    Ok(Json(OkResponse { ok: true }))
}
