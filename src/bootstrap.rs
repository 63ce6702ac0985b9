use std::io;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::compactor;
use crate::config::Config;
use crate::engine::BookingService;
use crate::observability;
use crate::store::MemoryStore;

/// Booking service over the WAL-backed store, which serves as both the
/// directory and the booking store.
pub type MemoryBookingService = BookingService<MemoryStore, MemoryStore>;

/// A running service with its store and background compactor. Dropping it
/// stops the compactor.
pub struct Shareit {
    pub service: MemoryBookingService,
    pub store: Arc<MemoryStore>,
    compactor: JoinHandle<()>,
}

impl Drop for Shareit {
    fn drop(&mut self) {
        self.compactor.abort();
    }
}

/// Create the data directory, replay the WAL, start the compactor and the
/// metrics exporter (if configured). Must be called inside a tokio runtime.
pub fn open_service(config: &Config) -> io::Result<Shareit> {
    std::fs::create_dir_all(&config.data_dir)?;
    observability::init(config.metrics_port)?;

    let wal_path = config.wal_path();
    let store = Arc::new(MemoryStore::open(&wal_path)?);
    let compactor = tokio::spawn(compactor::run_compactor(
        store.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));
    let service = BookingService::new(store.clone(), store.clone());
    info!("shareit store ready at {}", wal_path.display());

    Ok(Shareit {
        service,
        store,
        compactor,
    })
}
