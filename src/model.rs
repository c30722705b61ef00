use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Numeric station identity. Stations are seeded at startup and never renumbered.
pub type StationId = u32;

/// Half-open interval `[start, end)` in business-local naive time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }
}

/// Lifecycle status. Only `Confirmed` and `Cancelled` are ever stored;
/// `InProgress` and `Completed` exist only as derived read-time values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Derive the display status from the stored flag, the interval and `now`.
    /// `Cancelled` is sticky and wins over the clock.
    pub fn derive(stored: ReservationStatus, span: &Span, now: NaiveDateTime) -> Self {
        if stored == ReservationStatus::Cancelled {
            return ReservationStatus::Cancelled;
        }
        if now < span.start {
            ReservationStatus::Confirmed
        } else if span.contains_instant(now) {
            ReservationStatus::InProgress
        } else {
            ReservationStatus::Completed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::InProgress => "IN_PROGRESS",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Canonical plate key: whitespace stripped, uppercased.
pub fn normalize_plate(plate: &str) -> String {
    plate
        .split_whitespace()
        .collect::<String>()
        .to_uppercase()
}

/// Trimmed, lowercased contact email; blank input means "no email".
pub fn normalize_email(email: Option<&str>) -> Option<String> {
    email
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase)
}

/// One booked interval on a station, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub station_id: StationId,
    pub plate: String,
    pub plate_normalized: String,
    pub span: Span,
    /// Stored flag: `Confirmed` or `Cancelled`.
    pub status: ReservationStatus,
    pub contact_email: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Reservation {
    pub fn is_cancelled(&self) -> bool {
        self.status == ReservationStatus::Cancelled
    }

    pub fn status_at(&self, now: NaiveDateTime) -> ReservationStatus {
        ReservationStatus::derive(self.status, &self.span, now)
    }
}

#[derive(Debug, Clone)]
pub struct StationState {
    pub id: StationId,
    pub name: String,
    /// All reservations on this station (cancelled included), sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl StationState {
    pub fn new(id: StationId, name: String) -> Self {
        Self {
            id,
            name,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Any stored record (cancelled or not) starting exactly at `start`.
    pub fn starting_at(&self, start: NaiveDateTime) -> Option<&Reservation> {
        let pos = self.reservations.partition_point(|r| r.span.start < start);
        self.reservations.get(pos).filter(|r| r.span.start == start)
    }

    /// Reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Reservations starting on the given calendar day.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        let day_start = date.and_time(NaiveTime::MIN);
        let left = self
            .reservations
            .partition_point(|r| r.span.start < day_start);
        self.reservations[left..]
            .iter()
            .take_while(move |r| r.span.start.date() == date)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StationCreated {
        id: StationId,
        name: String,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        station_id: StationId,
        at: NaiveDateTime,
    },
    ReservationDeleted {
        id: Ulid,
        station_id: StationId,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationInfo {
    pub id: StationId,
    pub name: String,
}

/// A reservation hydrated with its derived status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: Ulid,
    pub station_id: StationId,
    pub plate: String,
    pub plate_normalized: String,
    pub span: Span,
    pub status: ReservationStatus,
    pub contact_email: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ReservationInfo {
    pub fn from_reservation(r: &Reservation, now: NaiveDateTime) -> Self {
        Self {
            id: r.id,
            station_id: r.station_id,
            plate: r.plate.clone(),
            plate_normalized: r.plate_normalized.clone(),
            span: r.span,
            status: r.status_at(now),
            contact_email: r.contact_email.clone(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationReservations {
    pub station: StationInfo,
    pub reservations: Vec<ReservationInfo>,
}

/// Outcome of an advisory plate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub conflicting_reservation: Option<ReservationInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2030, 1, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn reservation(start: NaiveDateTime, end: NaiveDateTime) -> Reservation {
        Reservation {
            id: Ulid::new(),
            station_id: 1,
            plate: "12가 3456".into(),
            plate_normalized: normalize_plate("12가 3456"),
            span: Span::new(start, end),
            status: ReservationStatus::Confirmed,
            contact_email: None,
            created_at: at(8, 0),
            updated_at: at(8, 0),
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(at(9, 0), at(10, 30));
        assert_eq!(s.duration_minutes(), 90);
        assert!(s.contains_instant(at(9, 0)));
        assert!(s.contains_instant(at(10, 29)));
        assert!(!s.contains_instant(at(10, 30))); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(at(10, 0), at(11, 0));
        let b = Span::new(at(10, 30), at(11, 30));
        let c = Span::new(at(11, 0), at(12, 0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn derived_status_follows_clock() {
        let span = Span::new(at(9, 0), at(9, 30));
        let stored = ReservationStatus::Confirmed;
        assert_eq!(ReservationStatus::derive(stored, &span, at(8, 59)), ReservationStatus::Confirmed);
        assert_eq!(ReservationStatus::derive(stored, &span, at(9, 0)), ReservationStatus::InProgress);
        assert_eq!(ReservationStatus::derive(stored, &span, at(9, 15)), ReservationStatus::InProgress);
        assert_eq!(ReservationStatus::derive(stored, &span, at(9, 30)), ReservationStatus::Completed);
        assert_eq!(ReservationStatus::derive(stored, &span, at(9, 31)), ReservationStatus::Completed);
    }

    #[test]
    fn cancelled_is_sticky() {
        let span = Span::new(at(9, 0), at(9, 30));
        for now in [at(8, 0), at(9, 15), at(21, 0)] {
            assert_eq!(
                ReservationStatus::derive(ReservationStatus::Cancelled, &span, now),
                ReservationStatus::Cancelled
            );
        }
    }

    #[test]
    fn plate_normalization() {
        assert_eq!(normalize_plate(" 12ab 3456 "), "12AB3456");
        assert_eq!(normalize_plate("12\tab\n34"), "12AB34");
        assert_eq!(normalize_plate("12가3456"), normalize_plate("12가 3456"));
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email(Some("  User@Example.COM ")), Some("user@example.com".into()));
        assert_eq!(normalize_email(Some("   ")), None);
        assert_eq!(normalize_email(None), None);
    }

    #[test]
    fn reservation_ordering() {
        let mut st = StationState::new(1, "Station 1".into());
        st.insert_reservation(reservation(at(12, 0), at(12, 30)));
        st.insert_reservation(reservation(at(9, 0), at(9, 30)));
        st.insert_reservation(reservation(at(10, 0), at(11, 0)));
        assert_eq!(st.reservations[0].span.start, at(9, 0));
        assert_eq!(st.reservations[1].span.start, at(10, 0));
        assert_eq!(st.reservations[2].span.start, at(12, 0));
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut st = StationState::new(1, "Station 1".into());
        let rs: Vec<_> = (0..3)
            .map(|i| reservation(at(9 + i, 0), at(9 + i, 30)))
            .collect();
        for r in &rs {
            st.insert_reservation(r.clone());
        }
        assert!(st.remove_reservation(rs[1].id).is_some());
        assert_eq!(st.reservations.len(), 2);
        assert_eq!(st.reservations[0].id, rs[0].id);
        assert_eq!(st.reservations[1].id, rs[2].id);
        assert!(st.remove_reservation(Ulid::new()).is_none());
    }

    #[test]
    fn overlapping_skips_adjacent_and_distant() {
        let mut st = StationState::new(1, "Station 1".into());
        st.insert_reservation(reservation(at(9, 0), at(10, 0)));
        st.insert_reservation(reservation(at(10, 30), at(11, 30)));
        st.insert_reservation(reservation(at(15, 0), at(16, 0)));

        let query = Span::new(at(10, 0), at(11, 0));
        let hits: Vec<_> = st.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span.start, at(10, 30));
    }

    #[test]
    fn starting_at_finds_exact_start_only() {
        let mut st = StationState::new(1, "Station 1".into());
        st.insert_reservation(reservation(at(9, 0), at(10, 0)));
        assert!(st.starting_at(at(9, 0)).is_some());
        assert!(st.starting_at(at(9, 30)).is_none());
    }

    #[test]
    fn on_date_filters_by_start_day() {
        let mut st = StationState::new(1, "Station 1".into());
        st.insert_reservation(reservation(at(9, 0), at(10, 0)));
        let next_day = at(9, 0) + chrono::Duration::days(1);
        st.insert_reservation(reservation(next_day, next_day + chrono::Duration::minutes(30)));

        let day = at(0, 0).date();
        assert_eq!(st.on_date(day).count(), 1);
        assert_eq!(st.on_date(day.succ_opt().unwrap()).count(), 1);
        assert_eq!(st.on_date(day.pred_opt().unwrap()).count(), 0);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            reservation: reservation(at(9, 0), at(10, 0)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
