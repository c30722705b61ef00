use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::check_no_conflict;
use super::error::ValidationError;
use super::store::OwnerScope;
use super::{Engine, EngineError};

/// A booking request as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub station_id: StationId,
    pub plate: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub contact_email: Option<String>,
}

fn validate_plate(plate: &str) -> Result<String, ValidationError> {
    let trimmed = plate.trim();
    let len = trimmed.chars().count();
    if !(MIN_PLATE_LEN..=MAX_PLATE_LEN).contains(&len) {
        return Err(ValidationError::PlateLength {
            min: MIN_PLATE_LEN,
            max: MAX_PLATE_LEN,
        });
    }
    Ok(trimmed.to_string())
}

fn validate_email(email: Option<&str>) -> Result<Option<String>, ValidationError> {
    let email = normalize_email(email);
    if email.as_ref().is_some_and(|e| e.len() > MAX_EMAIL_LEN) {
        return Err(ValidationError::EmailTooLong);
    }
    Ok(email)
}

impl Engine {
    /// Validate → lock → conflict check → commit. Nothing is written unless
    /// every check passes.
    pub async fn create_reservation(
        &self,
        req: NewReservation,
    ) -> Result<ReservationInfo, EngineError> {
        let plate = validate_plate(&req.plate)?;
        let contact_email = validate_email(req.contact_email.as_deref())?;
        let span = self.hours.validate(req.date, req.start_time, req.end_time)?;
        let plate_normalized = normalize_plate(&plate);

        let mut txn = self.store.begin_create(req.station_id).await?;
        let plate_set = self.store.plate_reservations(&txn, &plate_normalized).await?;
        if let Err(e) = check_no_conflict(&span, &plate_normalized, &txn, &plate_set) {
            if let EngineError::Conflict { axis, existing } = &e {
                metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL, "axis" => axis.as_str())
                    .increment(1);
                debug!("{axis} conflict for station {} at {}: {existing}", req.station_id, span.start);
            }
            return Err(e);
        }

        let now = self.clock.now();
        let reservation = Reservation {
            id: Ulid::new(),
            station_id: req.station_id,
            plate,
            plate_normalized,
            span,
            status: ReservationStatus::Confirmed,
            contact_email,
            created_at: now,
            updated_at: now,
        };
        let reservation = match self.store.commit_create(&mut txn, reservation).await {
            Ok(r) => r,
            Err(e) => {
                if matches!(e, EngineError::Duplicate { .. }) {
                    metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL, "axis" => "duplicate")
                        .increment(1);
                }
                return Err(e);
            }
        };
        drop(txn);

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            "reservation {} on station {} [{}, {})",
            reservation.id, reservation.station_id, reservation.span.start, reservation.span.end
        );
        Ok(ReservationInfo::from_reservation(&reservation, now))
    }

    /// Owner-scoped hard delete. `Ok(false)` when nothing matched.
    pub async fn delete_for_user(
        &self,
        id: Ulid,
        email: Option<&str>,
        plate: Option<&str>,
    ) -> Result<bool, EngineError> {
        let scope = OwnerScope::new(email, plate)?;
        let deleted = self.store.delete(id, Some(&scope)).await?;
        if deleted {
            metrics::counter!(observability::RESERVATIONS_DELETED_TOTAL).increment(1);
            info!("reservation {id} deleted by owner");
        }
        Ok(deleted)
    }

    /// Administrative hard delete. Unlike cancel, this frees the slot's start
    /// for a new booking.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<bool, EngineError> {
        let deleted = self.store.delete(id, None).await?;
        if deleted {
            metrics::counter!(observability::RESERVATIONS_DELETED_TOTAL).increment(1);
            info!("reservation {id} deleted by admin");
        }
        Ok(deleted)
    }

    /// Administrative cancel: sets the sticky CANCELLED flag.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<ReservationInfo, EngineError> {
        self.cancel(id, None).await
    }

    /// Owner-scoped cancel. Scope mismatch reads as not found.
    pub async fn cancel_for_user(
        &self,
        id: Ulid,
        email: Option<&str>,
        plate: Option<&str>,
    ) -> Result<ReservationInfo, EngineError> {
        let scope = OwnerScope::new(email, plate)?;
        self.cancel(id, Some(&scope)).await
    }

    async fn cancel(&self, id: Ulid, scope: Option<&OwnerScope>) -> Result<ReservationInfo, EngineError> {
        let now = self.clock.now();
        let reservation = self.store.cancel(id, scope, now).await?;
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!("reservation {id} cancelled");
        Ok(ReservationInfo::from_reservation(&reservation, now))
    }
}
