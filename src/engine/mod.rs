mod error;
mod mutations;
mod queries;

pub use error::{BookingError, ErrorKind, ErrorResponse};
pub use queries::parse_state;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::model::Ms;
use crate::observability;
use crate::store::{BookingStore, Directory};

/// Source of "now" for time-relative filters.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as Ms)
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(now: Ms) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: Ms) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> Ms {
        self.0.load(Ordering::SeqCst)
    }
}

/// Booking rules over an injected directory and store.
///
/// Holds no state of its own between calls; clones share the same
/// collaborators.
pub struct BookingService<D, S> {
    directory: Arc<D>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<D, S> Clone for BookingService<D, S> {
    fn clone(&self) -> Self {
        Self {
            directory: self.directory.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<D: Directory, S: BookingStore> BookingService<D, S> {
    pub fn new(directory: Arc<D>, store: Arc<S>) -> Self {
        Self::with_clock(directory, store, Arc::new(SystemClock))
    }

    pub fn with_clock(directory: Arc<D>, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            directory,
            store,
            clock,
        }
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn now(&self) -> Ms {
        self.clock.now_ms()
    }
}

/// Run one operation, recording its outcome and latency.
async fn observe<T>(
    op: &'static str,
    fut: impl Future<Output = Result<T, BookingError>>,
) -> Result<T, BookingError> {
    let started = Instant::now();
    let result = fut.await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    };
    observability::record_op(op, outcome, started.elapsed());
    result
}
