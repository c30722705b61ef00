use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{
    mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

use super::EngineError;

pub type SharedStationState = Arc<RwLock<StationState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

// ── Owner scope ──────────────────────────────────────────

/// Identity a user-scoped delete/cancel must match. At least one of email or
/// plate is always present; when both are, both must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerScope {
    email: Option<String>,
    plate_normalized: Option<String>,
}

impl OwnerScope {
    pub fn new(email: Option<&str>, plate: Option<&str>) -> Result<Self, EngineError> {
        let email = normalize_email(email);
        let plate_normalized = plate.map(normalize_plate).filter(|p| !p.is_empty());
        if email.is_none() && plate_normalized.is_none() {
            return Err(EngineError::InvalidRequest("email or plate is required"));
        }
        Ok(Self {
            email,
            plate_normalized,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn plate_normalized(&self) -> Option<&str> {
        self.plate_normalized.as_deref()
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        let email_ok = self
            .email
            .as_deref()
            .is_none_or(|e| r.contact_email.as_deref() == Some(e));
        let plate_ok = self
            .plate_normalized
            .as_deref()
            .is_none_or(|p| r.plate_normalized == p);
        email_ok && plate_ok
    }
}

// ── Station transaction guard ────────────────────────────

/// Exclusive access to one station. Create transactions additionally hold the
/// global write gate. Both are released when the guard drops.
pub struct StationTxn {
    station: OwnedRwLockWriteGuard<StationState>,
    _gate: Option<OwnedMutexGuard<()>>,
}

impl Deref for StationTxn {
    type Target = StationState;

    fn deref(&self) -> &StationState {
        &self.station
    }
}

impl DerefMut for StationTxn {
    fn deref_mut(&mut self) -> &mut StationState {
        &mut self.station
    }
}

// ── Store ────────────────────────────────────────────────

pub struct ReservationStore {
    stations: DashMap<StationId, SharedStationState>,
    station_names: DashMap<String, StationId>,
    /// Reverse lookup: reservation id → station id
    reservation_index: DashMap<Ulid, StationId>,
    /// Normalized plate → reservation ids, across all stations.
    plate_index: DashMap<String, Vec<Ulid>>,
    /// Serializes every create transaction (and station seeding).
    write_gate: Arc<Mutex<()>>,
    wal_tx: mpsc::Sender<WalCommand>,
    lock_timeout: Duration,
}

impl ReservationStore {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called from within a tokio runtime.
    pub fn open(wal_path: &Path, lock_timeout: Duration) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            stations: DashMap::new(),
            station_names: DashMap::new(),
            reservation_index: DashMap::new(),
            plate_index: DashMap::new(),
            write_gate: Arc::new(Mutex::new(())),
            wal_tx,
            lock_timeout,
        };

        // Sole owner of these Arcs during replay, so try_write always succeeds.
        // Never block here: this may run inside an async context.
        for event in &events {
            match event {
                Event::StationCreated { id, name } => store.insert_station(*id, name.clone()),
                other => {
                    let Some(station_id) = event_station_id(other) else { continue };
                    let Some(rs) = store.get_station(&station_id) else { continue };
                    let Ok(mut guard) = rs.try_write() else { continue };
                    store.apply_event(&mut guard, other);
                }
            }
        }
        debug!(
            "replayed {} events: {} stations, {} reservations",
            events.len(),
            store.stations.len(),
            store.reservation_index.len()
        );

        Ok(store)
    }

    fn insert_station(&self, id: StationId, name: String) {
        self.station_names.insert(name.clone(), id);
        self.stations
            .insert(id, Arc::new(RwLock::new(StationState::new(id, name))));
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply in one call. Caller holds the station write lock.
    async fn persist_and_apply(&self, rs: &mut StationState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_event(rs, event);
        Ok(())
    }

    /// Apply an event to a station state and the shared indexes (no locking;
    /// caller holds the station lock).
    fn apply_event(&self, rs: &mut StationState, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                self.reservation_index.insert(reservation.id, rs.id);
                self.plate_index
                    .entry(reservation.plate_normalized.clone())
                    .or_default()
                    .push(reservation.id);
                rs.insert_reservation(reservation.clone());
            }
            Event::ReservationCancelled { id, at, .. } => {
                if let Some(r) = rs.get_mut(*id) {
                    r.status = ReservationStatus::Cancelled;
                    r.updated_at = *at;
                }
            }
            Event::ReservationDeleted { id, .. } => {
                if let Some(removed) = rs.remove_reservation(*id) {
                    self.reservation_index.remove(id);
                    if let Some(mut ids) = self.plate_index.get_mut(&removed.plate_normalized) {
                        ids.retain(|x| x != id);
                    }
                    self.plate_index
                        .remove_if(&removed.plate_normalized, |_, ids| ids.is_empty());
                }
            }
            // Stations are handled at the DashMap level, not here
            Event::StationCreated { .. } => {}
        }
    }

    /// Bound a lock acquisition by the configured timeout.
    async fn acquire<F: Future>(&self, what: &'static str, fut: F) -> Result<F::Output, EngineError> {
        let started = Instant::now();
        match tokio::time::timeout(self.lock_timeout, fut).await {
            Ok(guard) => {
                metrics::histogram!(observability::LOCK_WAIT_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                Ok(guard)
            }
            Err(_) => {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                Err(EngineError::Busy(what))
            }
        }
    }

    // ── Stations ─────────────────────────────────────────────

    pub fn get_station(&self, id: &StationId) -> Option<SharedStationState> {
        self.stations.get(id).map(|e| e.value().clone())
    }

    pub fn contains_station(&self, id: &StationId) -> bool {
        self.stations.contains_key(id)
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    /// Station ids in ascending order.
    pub fn station_ids(&self) -> Vec<StationId> {
        let mut ids: Vec<StationId> = self.stations.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub async fn create_station(&self, id: StationId, name: String) -> Result<(), EngineError> {
        if name.trim().is_empty() || name.len() > MAX_STATION_NAME_LEN {
            return Err(EngineError::LimitExceeded("station name length"));
        }
        let _gate = self
            .acquire("write gate", self.write_gate.clone().lock_owned())
            .await?;
        if self.stations.len() >= MAX_STATIONS {
            return Err(EngineError::LimitExceeded("too many stations"));
        }
        if self.stations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(format!("station {id}")));
        }
        if self.station_names.contains_key(&name) {
            return Err(EngineError::AlreadyExists(format!("station name {name}")));
        }

        let event = Event::StationCreated {
            id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.insert_station(id, name);
        Ok(())
    }

    /// Seed stations `1..=names.len()`; ids that already exist are left alone.
    pub async fn ensure_stations(&self, names: &[String]) -> Result<usize, EngineError> {
        let mut created = 0;
        for (idx, name) in names.iter().enumerate() {
            let id = (idx + 1) as StationId;
            if self.contains_station(&id) {
                continue;
            }
            self.create_station(id, name.clone()).await?;
            created += 1;
        }
        Ok(created)
    }

    // ── Locking ──────────────────────────────────────────────

    /// Exclusive access to a single station (delete/cancel path).
    pub async fn lock_station(&self, station_id: StationId) -> Result<StationTxn, EngineError> {
        let rs = self
            .get_station(&station_id)
            .ok_or(EngineError::StationNotFound(station_id))?;
        let station = self.acquire("station lock", rs.write_owned()).await?;
        Ok(StationTxn {
            station,
            _gate: None,
        })
    }

    /// Create-path transaction: global write gate first, then the station.
    /// Holding the gate makes the plate-axis check see every committed row of
    /// every station.
    pub async fn begin_create(&self, station_id: StationId) -> Result<StationTxn, EngineError> {
        let rs = self
            .get_station(&station_id)
            .ok_or(EngineError::StationNotFound(station_id))?;
        let gate = self
            .acquire("write gate", self.write_gate.clone().lock_owned())
            .await?;
        let station = self.acquire("station lock", rs.write_owned()).await?;
        Ok(StationTxn {
            station,
            _gate: Some(gate),
        })
    }

    /// Shared read guard on a station.
    pub async fn read_station(
        &self,
        station_id: StationId,
    ) -> Result<OwnedRwLockReadGuard<StationState>, EngineError> {
        let rs = self
            .get_station(&station_id)
            .ok_or(EngineError::StationNotFound(station_id))?;
        self.acquire("station read", rs.read_owned()).await
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn station_for_reservation(&self, id: &Ulid) -> Option<StationId> {
        self.reservation_index.get(id).map(|e| *e.value())
    }

    /// Reservation ids carrying `plate_normalized`, grouped by station.
    fn plate_ids_by_station(&self, plate_normalized: &str) -> BTreeMap<StationId, Vec<Ulid>> {
        let ids = self
            .plate_index
            .get(plate_normalized)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut grouped: BTreeMap<StationId, Vec<Ulid>> = BTreeMap::new();
        for id in ids {
            if let Some(sid) = self.station_for_reservation(&id) {
                grouped.entry(sid).or_default().push(id);
            }
        }
        grouped
    }

    /// Every stored reservation of a vehicle, across stations. Reads one
    /// station at a time; never takes the write gate.
    pub async fn reservations_for_plate(
        &self,
        plate_normalized: &str,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut out = Vec::new();
        for (sid, ids) in self.plate_ids_by_station(plate_normalized) {
            let guard = self.read_station(sid).await?;
            out.extend(ids.iter().filter_map(|id| guard.get(*id)).cloned());
        }
        Ok(out)
    }

    /// The plate-scoped set seen by a create transaction. The locked station is
    /// read through `txn`; other stations through shared guards.
    pub async fn plate_reservations(
        &self,
        txn: &StationTxn,
        plate_normalized: &str,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut out = Vec::new();
        for (sid, ids) in self.plate_ids_by_station(plate_normalized) {
            if sid == txn.id {
                out.extend(ids.iter().filter_map(|id| txn.get(*id)).cloned());
                continue;
            }
            let guard = self.read_station(sid).await?;
            out.extend(ids.iter().filter_map(|id| guard.get(*id)).cloned());
        }
        Ok(out)
    }

    // ── Mutations ────────────────────────────────────────────

    /// Commit a new reservation inside a create transaction. Last-resort
    /// uniqueness guard: no two stored rows on a station share a start instant.
    pub async fn commit_create(
        &self,
        txn: &mut StationTxn,
        reservation: Reservation,
    ) -> Result<Reservation, EngineError> {
        if txn.reservations.len() >= MAX_RESERVATIONS_PER_STATION {
            return Err(EngineError::LimitExceeded("too many reservations on station"));
        }
        if txn.starting_at(reservation.span.start).is_some() {
            return Err(EngineError::Duplicate {
                station_id: txn.id,
                start: reservation.span.start,
            });
        }
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut txn.station, &event).await?;
        Ok(reservation)
    }

    /// Hard-delete a reservation, restricted to `scope` when given. `Ok(false)`
    /// when nothing matched, whether the id is unknown or the scope is wrong.
    pub async fn delete(&self, id: Ulid, scope: Option<&OwnerScope>) -> Result<bool, EngineError> {
        let Some(station_id) = self.station_for_reservation(&id) else {
            return Ok(false);
        };
        let mut txn = self.lock_station(station_id).await?;
        if !txn.get(id).is_some_and(|r| scope.is_none_or(|s| s.matches(r))) {
            return Ok(false);
        }
        let event = Event::ReservationDeleted { id, station_id };
        self.persist_and_apply(&mut txn.station, &event).await?;
        Ok(true)
    }

    /// Set the sticky cancelled flag. Already-cancelled reservations are
    /// returned unchanged without a new event.
    pub async fn cancel(
        &self,
        id: Ulid,
        scope: Option<&OwnerScope>,
        at: NaiveDateTime,
    ) -> Result<Reservation, EngineError> {
        let not_found = || EngineError::NotFound(format!("reservation {id}"));
        let station_id = self.station_for_reservation(&id).ok_or_else(not_found)?;
        let mut txn = self.lock_station(station_id).await?;
        let current = txn
            .get(id)
            .filter(|r| scope.is_none_or(|s| s.matches(r)))
            .cloned()
            .ok_or_else(not_found)?;
        if current.is_cancelled() {
            return Ok(current);
        }
        let event = Event::ReservationCancelled { id, station_id, at };
        self.persist_and_apply(&mut txn.station, &event).await?;
        txn.get(id).cloned().ok_or_else(not_found)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// The minimal event list recreating the given station states.
    fn snapshot_events(stations: &[OwnedRwLockReadGuard<StationState>]) -> Vec<Event> {
        let mut events = Vec::new();
        for guard in stations {
            events.push(Event::StationCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }
        events
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    /// The write gate and every station read guard are held until the swap
    /// completes, so no mutation lands between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self
            .acquire("write gate", self.write_gate.clone().lock_owned())
            .await?;
        let mut guards = Vec::with_capacity(self.stations.len());
        for sid in self.station_ids() {
            guards.push(self.read_station(sid).await?);
        }
        let events = Self::snapshot_events(&guards);

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Station an event belongs to (None for station creation).
fn event_station_id(event: &Event) -> Option<StationId> {
    match event {
        Event::ReservationCreated { reservation } => Some(reservation.station_id),
        Event::ReservationCancelled { station_id, .. }
        | Event::ReservationDeleted { station_id, .. } => Some(*station_id),
        Event::StationCreated { .. } => None,
    }
}
