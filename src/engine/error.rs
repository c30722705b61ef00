use chrono::NaiveDateTime;
use thiserror::Error;
use ulid::Ulid;

use crate::model::StationId;

/// Which uniqueness rule a candidate reservation violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAxis {
    Station,
    Plate,
}

impl ConflictAxis {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictAxis::Station => "station",
            ConflictAxis::Plate => "plate",
        }
    }
}

impl std::fmt::Display for ConflictAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed or out-of-policy reservation input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("end time must be after start time")]
    EndNotAfterStart,
    #[error("reservation must start and end on the same day")]
    SpansDays,
    #[error("start time must be within business hours ({open}~{close})")]
    StartOutsideHours { open: String, close: String },
    #[error("end time exceeds closing time ({close})")]
    EndAfterClose { close: String },
    #[error("times must fall on the {slot_minutes}-minute grid")]
    Misaligned { slot_minutes: u32 },
    #[error("duration must be a multiple of {slot_minutes} minutes")]
    DurationNotMultiple { slot_minutes: u32 },
    #[error("plate must be {min}..={max} characters")]
    PlateLength { min: usize, max: usize },
    #[error("contact email too long")]
    EmailTooLong,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid reservation: {0}")]
    Validation(#[from] ValidationError),
    #[error("{axis} conflict with reservation: {existing}")]
    Conflict { axis: ConflictAxis, existing: Ulid },
    #[error("station {station_id} already has a reservation starting at {start}")]
    Duplicate {
        station_id: StationId,
        start: NaiveDateTime,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("station not found: {0}")]
    StationNotFound(StationId),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("busy: {0}")]
    Busy(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Conflict and Duplicate are the same thing to a caller.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. } | EngineError::Duplicate { .. })
    }

    /// Safe to retry unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }
}
