use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use super::{BookingQuery, BookingStore, Directory, ItemLock, Order, Scope, StoreError};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

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

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
    debug!("wal writer for {} stopped", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so the partial batch does not leak
    // into the next one.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// In-memory directory and booking store, made durable by a write-ahead log.
///
/// Every mutation is appended to the WAL before it is applied, and `open`
/// rebuilds the state by replaying the log.
pub struct MemoryStore {
    users: DashSet<UserId>,
    items: DashMap<ItemId, ItemState>,
    owned: DashMap<UserId, Vec<ItemId>>,
    booking_to_item: DashMap<BookingId, ItemId>,
    by_booker: DashMap<UserId, Vec<BookingId>>,
    locks: DashMap<ItemId, Arc<Mutex<()>>>,
    /// Serializes user and item registration.
    catalog: Mutex<()>,
    /// Mutations hold this shared across append + apply; compaction takes it
    /// exclusively so its snapshot never misses a logged event.
    commit_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl MemoryStore {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let events = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            users: DashSet::new(),
            items: DashMap::new(),
            owned: DashMap::new(),
            booking_to_item: DashMap::new(),
            by_booker: DashMap::new(),
            locks: DashMap::new(),
            catalog: Mutex::new(()),
            commit_gate: RwLock::new(()),
            wal_tx,
        };
        for event in &events {
            store.apply(event);
        }
        info!(
            "opened store {}: {} events, {} users, {} items, {} bookings",
            wal_path.display(),
            events.len(),
            store.users.len(),
            store.items.len(),
            store.booking_to_item.len()
        );
        Ok(store)
    }

    fn apply(&self, event: &Event) {
        match event {
            Event::UserRegistered { id } => {
                self.users.insert(*id);
            }
            Event::ItemListed {
                id,
                owner_id,
                available,
            } => {
                self.items.insert(
                    *id,
                    ItemState::new(ItemRecord {
                        id: *id,
                        owner_id: *owner_id,
                        available: *available,
                    }),
                );
                self.owned.entry(*owner_id).or_default().push(*id);
            }
            Event::ItemAvailabilityChanged { id, available } => {
                if let Some(mut st) = self.items.get_mut(id) {
                    st.record.available = *available;
                }
            }
            Event::BookingCreated {
                id,
                item_id,
                booker_id,
                span,
            } => {
                if let Some(mut st) = self.items.get_mut(item_id) {
                    st.insert_booking(Booking {
                        id: *id,
                        span: *span,
                        item_id: *item_id,
                        booker_id: *booker_id,
                        status: BookingStatus::Waiting,
                    });
                    self.booking_to_item.insert(*id, *item_id);
                    self.by_booker.entry(*booker_id).or_default().push(*id);
                }
            }
            Event::BookingDecided {
                id,
                item_id,
                status,
            } => {
                if let Some(mut st) = self.items.get_mut(item_id)
                    && let Some(b) = st.booking_mut(*id)
                {
                    b.status = *status;
                }
            }
        }
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Log the event, then apply it. Nothing is applied if the append fails.
    async fn persist_and_apply(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(&event).await?;
        self.apply(&event);
        Ok(())
    }

    // ── Directory mutations ──────────────────────────────

    pub async fn register_user(&self, id: UserId) -> Result<(), StoreError> {
        let _catalog = self.catalog.lock().await;
        if self.users.contains(&id) {
            return Err(StoreError::DuplicateUser(id));
        }
        self.persist_and_apply(Event::UserRegistered { id }).await?;
        debug!("registered user {id}");
        Ok(())
    }

    pub async fn list_item(
        &self,
        id: ItemId,
        owner_id: UserId,
        available: bool,
    ) -> Result<ItemRecord, StoreError> {
        let _catalog = self.catalog.lock().await;
        if !self.users.contains(&owner_id) {
            return Err(StoreError::UnknownUser(owner_id));
        }
        if self.items.contains_key(&id) {
            return Err(StoreError::DuplicateItem(id));
        }
        let owned = self.owned.get(&owner_id).map_or(0, |ids| ids.len());
        if owned >= MAX_ITEMS_PER_OWNER {
            return Err(StoreError::LimitExceeded("too many items for owner"));
        }
        self.persist_and_apply(Event::ItemListed {
            id,
            owner_id,
            available,
        })
        .await?;
        debug!("listed item {id} for owner {owner_id}");
        Ok(ItemRecord {
            id,
            owner_id,
            available,
        })
    }

    /// Change availability under the item's lock, so a booking in flight
    /// sees either the old or the new value for its whole check.
    pub async fn set_item_available(
        &self,
        id: ItemId,
        available: bool,
    ) -> Result<ItemRecord, StoreError> {
        let _lock = self.lock_item(id).await?;
        self.persist_and_apply(Event::ItemAvailabilityChanged { id, available })
            .await?;
        self.items
            .get(&id)
            .map(|st| st.record)
            .ok_or(StoreError::UnknownItem(id))
    }

    // ── Compaction ───────────────────────────────────────

    /// Rewrite the WAL with only the events needed to rebuild the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.commit_gate.write().await;

        let mut users: Vec<UserId> = self.users.iter().map(|u| *u).collect();
        users.sort_unstable();
        let mut item_ids: Vec<ItemId> = self.items.iter().map(|e| *e.key()).collect();
        item_ids.sort_unstable();

        let mut events: Vec<Event> = users
            .into_iter()
            .map(|id| Event::UserRegistered { id })
            .collect();
        for item_id in item_ids {
            let Some(st) = self.items.get(&item_id) else {
                continue;
            };
            events.push(Event::ItemListed {
                id: st.record.id,
                owner_id: st.record.owner_id,
                available: st.record.available,
            });
            for b in &st.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    item_id: b.item_id,
                    booker_id: b.booker_id,
                    span: b.span,
                });
                if b.status != BookingStatus::Waiting {
                    events.push(Event::BookingDecided {
                        id: b.id,
                        item_id: b.item_id,
                        status: b.status,
                    });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("compacted WAL to {count} events");
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

    fn booking(&self, id: BookingId) -> Option<Booking> {
        let item_id = *self.booking_to_item.get(&id)?;
        self.items.get(&item_id)?.booking(id).cloned()
    }

    fn collect_scope(&self, scope: &Scope, query: &BookingQuery) -> Vec<Booking> {
        match scope {
            Scope::Booker(booker) => {
                let ids = self
                    .by_booker
                    .get(booker)
                    .map(|ids| ids.clone())
                    .unwrap_or_default();
                ids.into_iter()
                    .filter_map(|id| self.booking(id))
                    .filter(|b| query.matches(b))
                    .collect()
            }
            Scope::Items(item_ids) => item_ids
                .iter()
                .filter_map(|id| self.items.get(id))
                .flat_map(|st| {
                    st.bookings
                        .iter()
                        .filter(|b| query.matches(b))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .collect(),
            Scope::BookerOnItem(booker, item_id) => self
                .items
                .get(item_id)
                .map(|st| {
                    st.bookings
                        .iter()
                        .filter(|b| b.booker_id == *booker && query.matches(b))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn user_exists(&self, id: UserId) -> Result<bool, StoreError> {
        Ok(self.users.contains(&id))
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<ItemRecord>, StoreError> {
        Ok(self.items.get(&id).map(|st| st.record))
    }

    async fn find_owned_item_ids(&self, owner: UserId) -> Result<Vec<ItemId>, StoreError> {
        let mut ids = self
            .owned
            .get(&owner)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn lock_item(&self, item_id: ItemId) -> Result<ItemLock, StoreError> {
        if !self.items.contains_key(&item_id) {
            return Err(StoreError::UnknownItem(item_id));
        }
        let mutex = self
            .locks
            .entry(item_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Ok(ItemLock::new(item_id, mutex.lock_owned().await))
    }

    async fn exists_overlapping_approved(
        &self,
        lock: &ItemLock,
        span: Span,
    ) -> Result<bool, StoreError> {
        let item_id = lock.item_id();
        let st = self
            .items
            .get(&item_id)
            .ok_or(StoreError::UnknownItem(item_id))?;
        Ok(st
            .overlapping(&span)
            .any(|b| b.status == BookingStatus::Approved))
    }

    async fn insert_booking(
        &self,
        lock: &ItemLock,
        new: NewBooking,
    ) -> Result<Booking, StoreError> {
        lock.check(new.item_id)?;
        let count = self
            .items
            .get(&new.item_id)
            .map(|st| st.bookings.len())
            .ok_or(StoreError::UnknownItem(new.item_id))?;
        if count >= MAX_BOOKINGS_PER_ITEM {
            return Err(StoreError::LimitExceeded("too many bookings on item"));
        }

        let id = Ulid::new();
        self.persist_and_apply(Event::BookingCreated {
            id,
            item_id: new.item_id,
            booker_id: new.booker_id,
            span: new.span,
        })
        .await?;
        self.booking(id).ok_or(StoreError::MissingBooking(id))
    }

    async fn find_booking_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.booking(id))
    }

    async fn update_booking_status(
        &self,
        lock: &ItemLock,
        id: BookingId,
        status: BookingStatus,
    ) -> Result<Booking, StoreError> {
        let item_id = self
            .booking_to_item
            .get(&id)
            .map(|e| *e)
            .ok_or(StoreError::MissingBooking(id))?;
        lock.check(item_id)?;

        self.persist_and_apply(Event::BookingDecided {
            id,
            item_id,
            status,
        })
        .await?;
        self.booking(id).ok_or(StoreError::MissingBooking(id))
    }

    async fn query_bookings(
        &self,
        query: &BookingQuery,
        order: Order,
    ) -> Result<Vec<Booking>, StoreError> {
        let mut out = self.collect_scope(&query.scope, query);
        order.sort(&mut out);
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
