use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;

use crate::model::Span;

use super::error::ValidationError;

pub const DEFAULT_OPEN: (u32, u32) = (9, 0);
pub const DEFAULT_CLOSE: (u32, u32) = (22, 0);
pub const DEFAULT_SLOT_MINUTES: u32 = 30;

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidHours {
    #[error("slot granularity must divide a day evenly, got {0} minutes")]
    BadSlot(u32),
    #[error("opening time must be before closing time")]
    OpenNotBeforeClose,
    #[error("opening and closing times must lie on the slot grid")]
    OffGrid,
}

/// Business hours and slot quantization. Pure rules, no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessHours {
    open: NaiveTime,
    close: NaiveTime,
    slot_minutes: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            open: hm(DEFAULT_OPEN),
            close: hm(DEFAULT_CLOSE),
            slot_minutes: DEFAULT_SLOT_MINUTES,
        }
    }
}

fn hm((h, m): (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

impl BusinessHours {
    pub fn new(open: NaiveTime, close: NaiveTime, slot_minutes: u32) -> Result<Self, InvalidHours> {
        if slot_minutes == 0 || MINUTES_PER_DAY % slot_minutes != 0 {
            return Err(InvalidHours::BadSlot(slot_minutes));
        }
        if open >= close {
            return Err(InvalidHours::OpenNotBeforeClose);
        }
        let hours = Self { open, close, slot_minutes };
        if !hours.on_grid(open) || !hours.on_grid(close) {
            return Err(InvalidHours::OffGrid);
        }
        Ok(hours)
    }

    pub fn open(&self) -> NaiveTime {
        self.open
    }

    pub fn close(&self) -> NaiveTime {
        self.close
    }

    pub fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    fn on_grid(&self, t: NaiveTime) -> bool {
        t.second() == 0 && t.nanosecond() == 0 && minute_of_day(t) % self.slot_minutes == 0
    }

    /// Compose `start_time`/`end_time` with `date` and validate the result.
    pub fn validate(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<Span, ValidationError> {
        self.validate_span(date.and_time(start_time), date.and_time(end_time))
    }

    /// Validate a concrete `[start, end)` pair against the calendar rules.
    pub fn validate_span(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Span, ValidationError> {
        if end <= start {
            return Err(ValidationError::EndNotAfterStart);
        }
        if start.date() != end.date() {
            return Err(ValidationError::SpansDays);
        }
        let (start_t, end_t) = (start.time(), end.time());
        if !self.on_grid(start_t) || !self.on_grid(end_t) {
            return Err(ValidationError::Misaligned {
                slot_minutes: self.slot_minutes,
            });
        }
        if start_t < self.open || start_t >= self.close {
            return Err(ValidationError::StartOutsideHours {
                open: self.open.format("%H:%M").to_string(),
                close: self.close.format("%H:%M").to_string(),
            });
        }
        if end_t > self.close {
            return Err(ValidationError::EndAfterClose {
                close: self.close.format("%H:%M").to_string(),
            });
        }
        let span = Span::new(start, end);
        let minutes = span.duration_minutes();
        if minutes <= 0 || minutes % i64::from(self.slot_minutes) != 0 {
            return Err(ValidationError::DurationNotMultiple {
                slot_minutes: self.slot_minutes,
            });
        }
        Ok(span)
    }
}
