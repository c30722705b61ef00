use crate::model::*;

use super::error::ConflictAxis;
use super::EngineError;

/// Half-open overlap: back-to-back intervals do not conflict.
pub fn overlaps(a: &Span, b: &Span) -> bool {
    a.overlaps(b)
}

/// First non-cancelled reservation in `existing` overlapping `candidate`.
pub fn station_conflict<'a, I>(candidate: &Span, existing: I) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    existing
        .into_iter()
        .find(|r| !r.is_cancelled() && overlaps(candidate, &r.span))
}

/// First non-cancelled reservation of the same vehicle (any station) overlapping `candidate`.
pub fn plate_conflict<'a, I>(
    candidate: &Span,
    plate_normalized: &str,
    existing: I,
) -> Option<&'a Reservation>
where
    I: IntoIterator<Item = &'a Reservation>,
{
    existing.into_iter().find(|r| {
        !r.is_cancelled() && r.plate_normalized == plate_normalized && overlaps(candidate, &r.span)
    })
}

/// Station axis first, then plate axis.
pub(crate) fn check_no_conflict(
    candidate: &Span,
    plate_normalized: &str,
    station: &StationState,
    plate_set: &[Reservation],
) -> Result<(), EngineError> {
    if let Some(existing) = station_conflict(candidate, station.overlapping(candidate)) {
        return Err(EngineError::Conflict {
            axis: ConflictAxis::Station,
            existing: existing.id,
        });
    }
    if let Some(existing) = plate_conflict(candidate, plate_normalized, plate_set) {
        return Err(EngineError::Conflict {
            axis: ConflictAxis::Plate,
            existing: existing.id,
        });
    }
    Ok(())
}
