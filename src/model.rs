use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;

/// Unix milliseconds.
pub type Ms = i64;

pub type UserId = u64;
pub type ItemId = u64;
pub type BookingId = Ulid;

/// Booking interval. Two spans overlap only if they share an instant strictly
/// inside both, so `[a, b)` and `[b, c)` do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for spans arriving from callers.
    pub fn try_new(start: Ms, end: Ms) -> Result<Self, SpanError> {
        if start >= end {
            return Err(SpanError::EndNotAfterStart { start, end });
        }
        if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
            return Err(SpanError::OutOfRange);
        }
        if end - start > MAX_SPAN_DURATION_MS {
            return Err(SpanError::TooLong(end - start));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Inclusive at both ends: a booking is current at its first and last instant.
    pub fn covers(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }

    pub fn ends_before(&self, t: Ms) -> bool {
        self.end < t
    }

    pub fn starts_after(&self, t: Ms) -> bool {
        self.start > t
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanError {
    EndNotAfterStart { start: Ms, end: Ms },
    OutOfRange,
    TooLong(Ms),
}

impl fmt::Display for SpanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanError::EndNotAfterStart { start, end } => {
                write!(f, "booking end {end} must be after start {start}")
            }
            SpanError::OutOfRange => write!(f, "timestamp out of range"),
            SpanError::TooLong(ms) => write!(f, "booking too long: {ms} ms"),
        }
    }
}

impl std::error::Error for SpanError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Waiting,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Waiting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Waiting => "WAITING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    #[serde(flatten)]
    pub span: Span,
    pub item_id: ItemId,
    pub booker_id: UserId,
    pub status: BookingStatus,
}

/// A booking before the store has assigned it an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBooking {
    pub item_id: ItemId,
    pub booker_id: UserId,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub owner_id: UserId,
    pub available: bool,
}

/// Query-time filter over a user's bookings. APPROVED is intentionally not a
/// recognized filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    All,
    Current,
    Past,
    Future,
    Waiting,
    Rejected,
}

impl FromStr for BookingState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ALL" => Ok(BookingState::All),
            "CURRENT" => Ok(BookingState::Current),
            "PAST" => Ok(BookingState::Past),
            "FUTURE" => Ok(BookingState::Future),
            "WAITING" => Ok(BookingState::Waiting),
            "REJECTED" => Ok(BookingState::Rejected),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown state: {}", self.0)
    }
}

impl std::error::Error for UnknownState {}

/// Offset pagination over an already ordered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub from: usize,
    pub size: usize,
}

impl Page {
    pub fn new(from: i64, size: i64) -> Result<Self, PageError> {
        if from < 0 {
            return Err(PageError::NegativeFrom(from));
        }
        if size < 1 || size as usize > MAX_PAGE_SIZE {
            return Err(PageError::BadSize(size));
        }
        Ok(Self {
            from: from as usize,
            size: size as usize,
        })
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.from).take(self.size).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    NegativeFrom(i64),
    BadSize(i64),
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::NegativeFrom(from) => write!(f, "'from' must not be negative, got {from}"),
            PageError::BadSize(size) => {
                write!(f, "'size' must be between 1 and {MAX_PAGE_SIZE}, got {size}")
            }
        }
    }
}

impl std::error::Error for PageError {}

/// Last finished and next upcoming approved booking of one item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ItemBookings {
    pub last: Option<Booking>,
    pub next: Option<Booking>,
}

/// Per-item state held by the store: the directory record plus every booking
/// of the item.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub record: ItemRecord,
    /// Sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl ItemState {
    pub fn new(record: ItemRecord) -> Self {
        Self {
            record,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// State changes as recorded in the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: UserId,
    },
    ItemListed {
        id: ItemId,
        owner_id: UserId,
        available: bool,
    },
    ItemAvailabilityChanged {
        id: ItemId,
        available: bool,
    },
    BookingCreated {
        id: BookingId,
        item_id: ItemId,
        booker_id: UserId,
        span: Span,
    },
    BookingDecided {
        id: BookingId,
        item_id: ItemId,
        status: BookingStatus,
    },
}
