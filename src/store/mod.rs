mod memory;
#[cfg(test)]
mod tests;

pub use memory::MemoryStore;

use std::cmp::Reverse;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::model::*;

/// Read side of the user and item directory.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    async fn user_exists(&self, id: UserId) -> Result<bool, StoreError>;

    async fn get_item(&self, id: ItemId) -> Result<Option<ItemRecord>, StoreError>;

    /// Ids of every item owned by `owner`, ascending.
    async fn find_owned_item_ids(&self, owner: UserId) -> Result<Vec<ItemId>, StoreError>;
}

/// Booking persistence.
///
/// Check-then-act sequences on one item run under an [`ItemLock`] obtained
/// from [`BookingStore::lock_item`]. Every method that takes the lock rejects
/// a lock held for a different item with [`StoreError::LockMismatch`].
#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    /// Wait for exclusive access to `item_id`.
    async fn lock_item(&self, item_id: ItemId) -> Result<ItemLock, StoreError>;

    /// True if an APPROVED booking of the locked item overlaps `span`.
    async fn exists_overlapping_approved(
        &self,
        lock: &ItemLock,
        span: Span,
    ) -> Result<bool, StoreError>;

    /// Persist a new WAITING booking and return it with its assigned id.
    async fn insert_booking(&self, lock: &ItemLock, new: NewBooking)
    -> Result<Booking, StoreError>;

    async fn find_booking_by_id(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn update_booking_status(
        &self,
        lock: &ItemLock,
        id: BookingId,
        status: BookingStatus,
    ) -> Result<Booking, StoreError>;

    async fn query_bookings(
        &self,
        query: &BookingQuery,
        order: Order,
    ) -> Result<Vec<Booking>, StoreError>;
}

/// Witness of exclusive access to one item. Released on drop.
pub struct ItemLock {
    item_id: ItemId,
    _guard: OwnedMutexGuard<()>,
}

impl ItemLock {
    pub fn new(item_id: ItemId, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            item_id,
            _guard: guard,
        }
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// Fail unless this lock covers `item_id`.
    pub fn check(&self, item_id: ItemId) -> Result<(), StoreError> {
        if self.item_id == item_id {
            Ok(())
        } else {
            Err(StoreError::LockMismatch {
                held: self.item_id,
                requested: item_id,
            })
        }
    }
}

impl fmt::Debug for ItemLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemLock").field("item_id", &self.item_id).finish()
    }
}

// ── Queries ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Bookings made by this user.
    Booker(UserId),
    /// Bookings on any of these items.
    Items(Vec<ItemId>),
    /// Bookings made by this user on this item.
    BookerOnItem(UserId, ItemId),
}

/// Time filter relative to a reference instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Any,
    Current(Ms),
    Past(Ms),
    Future(Ms),
}

impl Window {
    pub fn contains(self, span: &Span) -> bool {
        match self {
            Window::Any => true,
            Window::Current(now) => span.covers(now),
            Window::Past(now) => span.ends_before(now),
            Window::Future(now) => span.starts_after(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingQuery {
    pub scope: Scope,
    pub window: Window,
    pub status: Option<BookingStatus>,
    pub limit: Option<usize>,
}

impl BookingQuery {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            window: Window::Any,
            status: None,
            limit: None,
        }
    }

    /// Translate a caller-facing state filter, evaluated at `now`.
    pub fn for_state(scope: Scope, state: BookingState, now: Ms) -> Self {
        let query = Self::new(scope);
        match state {
            BookingState::All => query,
            BookingState::Current => query.window(Window::Current(now)),
            BookingState::Past => query.window(Window::Past(now)),
            BookingState::Future => query.window(Window::Future(now)),
            BookingState::Waiting => query.status(BookingStatus::Waiting),
            BookingState::Rejected => query.status(BookingStatus::Rejected),
        }
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    pub fn status(mut self, status: BookingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Window and status filter; the scope is resolved by the store.
    pub fn matches(&self, booking: &Booking) -> bool {
        self.window.contains(&booking.span)
            && self.status.is_none_or(|s| s == booking.status)
    }
}

/// Result ordering. Ties are broken by booking id in the same direction, so
/// the newest booking wins a tie under the descending orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    StartDesc,
    StartAsc,
    EndDesc,
}

impl Order {
    pub fn sort(self, bookings: &mut [Booking]) {
        match self {
            Order::StartDesc => bookings.sort_by_key(|b| Reverse((b.span.start, b.id))),
            Order::StartAsc => bookings.sort_by_key(|b| (b.span.start, b.id)),
            Order::EndDesc => bookings.sort_by_key(|b| Reverse((b.span.end, b.id))),
        }
    }
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug)]
pub enum StoreError {
    Wal(String),
    LockMismatch { held: ItemId, requested: ItemId },
    MissingBooking(BookingId),
    DuplicateUser(UserId),
    DuplicateItem(ItemId),
    UnknownUser(UserId),
    UnknownItem(ItemId),
    LimitExceeded(&'static str),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
            StoreError::LockMismatch { held, requested } => {
                write!(f, "lock for item {held} used on item {requested}")
            }
            StoreError::MissingBooking(id) => write!(f, "booking {id} not stored"),
            StoreError::DuplicateUser(id) => write!(f, "user {id} already registered"),
            StoreError::DuplicateItem(id) => write!(f, "item {id} already listed"),
            StoreError::UnknownUser(id) => write!(f, "unknown user {id}"),
            StoreError::UnknownItem(id) => write!(f, "unknown item {id}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
