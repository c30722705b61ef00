use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::conflict::plate_conflict;
use super::error::ValidationError;
use super::store::OwnerScope;
use super::{Engine, EngineError};

impl Engine {
    pub async fn list_stations(&self) -> Result<Vec<StationInfo>, EngineError> {
        let mut out = Vec::new();
        for sid in self.store.station_ids() {
            let guard = self.store.read_station(sid).await?;
            out.push(StationInfo {
                id: guard.id,
                name: guard.name.clone(),
            });
        }
        Ok(out)
    }

    /// Every station with the reservations selected by `pick`, ordered by start.
    async fn collect_by_station<F>(&self, pick: F) -> Result<Vec<StationReservations>, EngineError>
    where
        F: Fn(&StationState) -> Vec<&Reservation>,
    {
        let now = self.clock.now();
        let mut out = Vec::new();
        for sid in self.store.station_ids() {
            let guard = self.store.read_station(sid).await?;
            out.push(StationReservations {
                station: StationInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                },
                reservations: pick(&*guard)
                    .into_iter()
                    .map(|r| ReservationInfo::from_reservation(r, now))
                    .collect(),
            });
        }
        Ok(out)
    }

    /// All stations with all of their reservations.
    pub async fn stations_with_reservations(&self) -> Result<Vec<StationReservations>, EngineError> {
        self.collect_by_station(|rs| rs.reservations.iter().collect())
            .await
    }

    /// All stations with the reservations starting on `date`.
    pub async fn reservations_by_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<StationReservations>, EngineError> {
        self.collect_by_station(|rs| rs.on_date(date).collect())
            .await
    }

    pub async fn reservations_for_station(
        &self,
        station_id: StationId,
        date: NaiveDate,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let now = self.clock.now();
        let guard = self.store.read_station(station_id).await?;
        Ok(guard
            .on_date(date)
            .map(|r| ReservationInfo::from_reservation(r, now))
            .collect())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<ReservationInfo, EngineError> {
        let not_found = || EngineError::NotFound(format!("reservation {id}"));
        let sid = self.store.station_for_reservation(&id).ok_or_else(not_found)?;
        let guard = self.store.read_station(sid).await?;
        let r = guard.get(id).ok_or_else(not_found)?;
        Ok(ReservationInfo::from_reservation(r, self.clock.now()))
    }

    /// Reservations owned by an email and/or plate, newest start first.
    /// Both filters AND together; at least one is required.
    pub async fn list_for_user(
        &self,
        email: Option<&str>,
        plate: Option<&str>,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        let scope = OwnerScope::new(email, plate)?;
        let mut found = match scope.plate_normalized() {
            Some(p) => self.store.reservations_for_plate(p).await?,
            None => {
                let mut all = Vec::new();
                for sid in self.store.station_ids() {
                    let guard = self.store.read_station(sid).await?;
                    all.extend(guard.reservations.iter().cloned());
                }
                all
            }
        };
        found.retain(|r| scope.matches(r));
        found.sort_by(|a, b| b.span.start.cmp(&a.span.start));

        let now = self.clock.now();
        Ok(found
            .iter()
            .map(|r| ReservationInfo::from_reservation(r, now))
            .collect())
    }

    /// Advisory plate check; takes no write locks and holds nothing.
    ///
    /// With an interval: the first non-cancelled reservation of the plate that
    /// overlaps it. Without: the latest non-cancelled reservation of the plate.
    pub async fn verify(
        &self,
        plate: &str,
        interval: Option<(NaiveDate, NaiveTime, NaiveTime)>,
    ) -> Result<Verification, EngineError> {
        let plate_normalized = normalize_plate(plate);
        if plate_normalized.is_empty() {
            return Err(EngineError::InvalidRequest("plate is required"));
        }
        let candidate = match interval {
            Some((date, start, end)) => {
                let (start, end) = (date.and_time(start), date.and_time(end));
                if end <= start {
                    return Err(ValidationError::EndNotAfterStart.into());
                }
                Some(Span::new(start, end))
            }
            None => None,
        };

        let mut existing = self.store.reservations_for_plate(&plate_normalized).await?;
        existing.sort_by(|a, b| b.span.start.cmp(&a.span.start));

        let conflict = match &candidate {
            Some(span) => plate_conflict(span, &plate_normalized, &existing),
            None => existing.iter().find(|r| !r.is_cancelled()),
        };
        let now = self.clock.now();
        Ok(Verification {
            valid: conflict.is_none(),
            conflicting_reservation: conflict.map(|r| ReservationInfo::from_reservation(r, now)),
        })
    }
}
