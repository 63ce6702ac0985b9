use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single booking may not cover more than one year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MAX_PAGE_SIZE: usize = 1_000;

pub const MAX_ITEMS_PER_OWNER: usize = 10_000;
pub const MAX_BOOKINGS_PER_ITEM: usize = 100_000;

/// Largest encoded WAL event accepted on append or replay.
pub const MAX_EVENT_BYTES: usize = 64 * 1024;
