mod calendar;
mod clock;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use calendar::{BusinessHours, InvalidHours};
pub use clock::{Clock, FixedClock, SystemClock};
pub use conflict::{overlaps, plate_conflict, station_conflict};
pub use error::{ConflictAxis, EngineError, ValidationError};
pub use mutations::NewReservation;
pub use store::{OwnerScope, ReservationStore, SharedStationState, StationTxn};

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;

/// The reservation service: calendar rules, conflict detection and the store,
/// wired to one clock.
pub struct Engine {
    pub store: ReservationStore,
    hours: BusinessHours,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        wal_path: &Path,
        hours: BusinessHours,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> io::Result<Self> {
        let store = ReservationStore::open(wal_path, lock_timeout)?;
        Ok(Self { store, hours, clock })
    }

    pub fn hours(&self) -> &BusinessHours {
        &self.hours
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Seed the default station set (`Station 1` .. `Station count`).
    pub async fn seed_stations(&self, count: u32) -> Result<usize, EngineError> {
        let names: Vec<String> = (1..=count).map(|i| format!("Station {i}")).collect();
        self.store.ensure_stations(&names).await
    }

    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        self.store.compact_wal().await
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.store.wal_appends_since_compact().await
    }
}
