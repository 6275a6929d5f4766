mod availability;
mod capacity;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod schedule;
mod store;

pub use availability::AvailabilityQuery;
pub use error::{EngineError, FieldError, Unavailability, ValidationErrors};
pub use schedule::{post_window, resolve_window};
pub use store::{LedgerEntry, PointState};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Dispatch, NotifyHub};
use crate::observability;
use crate::pricing::{NoPriceList, PriceLookup};
use crate::status::StatusCatalog;
use crate::wal::Wal;

pub type SharedPointState = Arc<RwLock<PointState>>;

const WAL_CHANNEL_CAPACITY: usize = 4096;
const WAL_BATCH_LIMIT: usize = 512;

// ── Group-commit WAL writer ──────────────────────────────

type Ack = oneshot::Sender<io::Result<()>>;

pub(super) enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the log. Every wakeup drains whatever is queued (up to
/// `WAL_BATCH_LIMIT`), buffers the appends, and syncs once for all of them.
/// Control commands first commit the appends queued ahead of them.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut inbox = Vec::with_capacity(WAL_BATCH_LIMIT);
    let mut batch: Vec<(Event, Ack)> = Vec::new();
    while rx.recv_many(&mut inbox, WAL_BATCH_LIMIT).await > 0 {
        for cmd in inbox.drain(..) {
            match cmd {
                WalCommand::Append { event, response } => batch.push((event, response)),
                WalCommand::Compact { events, response } => {
                    commit(&mut wal, &mut batch);
                    let result = Wal::write_compact_file(wal.path(), &events)
                        .and_then(|()| wal.swap_compact_file());
                    let _ = response.send(result);
                }
                WalCommand::AppendsSinceCompact { response } => {
                    commit(&mut wal, &mut batch);
                    let _ = response.send(wal.appends_since_compact());
                }
            }
        }
        commit(&mut wal, &mut batch);
    }
}

fn commit(wal: &mut Wal, batch: &mut Vec<(Event, Ack)>) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let outcome = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &outcome {
        warn!("WAL commit of {} events failed: {e}", batch.len());
        // Every ack reports failure, so none of the batch may survive.
        if let Err(e) = wal.rollback() {
            warn!("WAL rollback failed: {e}");
        }
    }
    for (_, ack) in batch.drain(..) {
        let _ = ack.send(match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    points: DashMap<Ulid, SharedPointState>,
    /// booking id → service point id
    booking_index: DashMap<Ulid, Ulid>,
    services: DashMap<Ulid, ServiceInfo>,
    statuses: StatusCatalog,
    /// Serializes events that live outside any point lock (point creation,
    /// catalog entries) against compaction.
    catalog_lock: Mutex<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    prices: Arc<dyn PriceLookup>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_prices(wal_path, notify, Arc::new(NoPriceList))
    }

    pub fn with_prices(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        prices: Arc<dyn PriceLookup>,
    ) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.torn_tail.is_some() {
            Wal::truncate(&wal_path, replay.valid_len)?;
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            points: DashMap::new(),
            booking_index: DashMap::new(),
            services: DashMap::new(),
            statuses: StatusCatalog::new(),
            catalog_lock: Mutex::new(()),
            wal_tx,
            notify,
            prices,
        };
        for event in &replay.events {
            engine.replay_event(event);
        }
        info!(
            "replayed {} events from {}: {} service points, {} bookings",
            replay.events.len(),
            wal_path.display(),
            engine.points.len(),
            engine.booking_index.len()
        );
        Ok(engine)
    }

    /// Nothing else holds these locks during startup, so `try_write` only
    /// fails on a log that references a point it never created.
    fn replay_event(&self, event: &Event) {
        if let Event::PointCreated { point } = event {
            self.points.insert(
                point.id,
                Arc::new(RwLock::new(PointState::new(point.clone()))),
            );
            return;
        }
        let Some(point_id) = event.point_id() else {
            self.apply_catalog(event);
            return;
        };
        let Some(shared) = self.point_arc(point_id) else {
            warn!("replay: event for unknown service point {point_id} skipped");
            return;
        };
        let Ok(mut guard) = shared.try_write() else {
            warn!("replay: service point {point_id} unexpectedly locked");
            return;
        };
        self.apply(&mut guard, event);
    }

    fn apply(&self, ps: &mut PointState, event: &Event) {
        ps.apply(event);
        if let Event::BookingCreated { booking } = event {
            self.booking_index.insert(booking.id, booking.service_point_id);
        }
    }

    fn apply_catalog(&self, event: &Event) {
        match event {
            Event::ServiceRegistered { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::StatusMetaSet { status, meta } => self.statuses.set(*status, meta.clone()),
            _ => {}
        }
    }

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

    /// Durable append, then in-memory apply. The caller holds the point's
    /// write lock for both.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut PointState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.apply(ps, &event);
        Ok(())
    }

    pub(super) async fn persist_catalog(&self, event: Event) -> Result<(), EngineError> {
        let _serial = self.catalog_lock.lock().await;
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(())
    }

    /// Queue a notification. Never waits on the consumer.
    pub(super) fn dispatch(&self, dispatch: Dispatch) {
        self.notify.send(dispatch);
    }

    fn point_arc(&self, id: Ulid) -> Option<SharedPointState> {
        self.points.get(&id).map(|e| e.value().clone())
    }

    pub(super) fn point(&self, id: Ulid) -> Result<SharedPointState, EngineError> {
        self.point_arc(id).ok_or(EngineError::NotFound(id))
    }

    pub(super) async fn point_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<PointState>, EngineError> {
        Ok(self.point(id)?.write_owned().await)
    }

    pub(super) async fn point_read(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<PointState>, EngineError> {
        Ok(self.point(id)?.read_owned().await)
    }

    pub(super) fn point_of_booking(&self, booking_id: Ulid) -> Result<Ulid, EngineError> {
        self.booking_index
            .get(&booking_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Look up the booking's point and take its write lock.
    pub(super) async fn booking_write(
        &self,
        booking_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<PointState>, EngineError> {
        let point_id = self.point_of_booking(booking_id)?;
        let guard = self.point_write(point_id).await?;
        if !guard.bookings.contains_key(&booking_id) {
            return Err(EngineError::NotFound(booking_id));
        }
        Ok(guard)
    }

    pub fn statuses(&self) -> &StatusCatalog {
        &self.statuses
    }

    /// Rewrite the log as the minimal event list for the current state.
    /// Holds every point's read lock so no append can slip between the
    /// snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _serial = self.catalog_lock.lock().await;

        let mut events: Vec<Event> = Vec::new();
        let mut services: Vec<ServiceInfo> = self.services.iter().map(|e| e.value().clone()).collect();
        services.sort_by_key(|s| s.id);
        events.extend(services.into_iter().map(|service| Event::ServiceRegistered { service }));
        events.extend(
            self.statuses
                .overrides()
                .into_iter()
                .map(|(status, meta)| Event::StatusMetaSet { status, meta }),
        );

        let mut ids: Vec<Ulid> = self.points.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(shared) = self.point_arc(id) {
                guards.push(shared.read_owned().await);
            }
        }
        for guard in &guards {
            events.extend(guard.snapshot_events());
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
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
