//! Booking rules for an item-sharing marketplace: who may book what and
//! when, owner approval, and the booking views of bookers and owners.

pub mod bootstrap;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod store;
pub mod wal;

pub use engine::{BookingError, BookingService, Clock, ErrorKind, FixedClock, SystemClock};
pub use store::{BookingStore, Directory, MemoryStore};
