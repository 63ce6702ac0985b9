use std::io;
use std::net::SocketAddr;
use std::time::Duration;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking operations executed. Labels: op, outcome.
pub const BOOKING_OPS_TOTAL: &str = "shareit_booking_ops_total";

/// Histogram: booking operation latency in seconds. Labels: op.
pub const BOOKING_OP_DURATION_SECONDS: &str = "shareit_booking_op_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shareit_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shareit_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "shareit_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> io::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(io::Error::other)?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the fmt subscriber. Later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();
}

pub(crate) fn record_op(op: &'static str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!(BOOKING_OPS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(BOOKING_OP_DURATION_SECONDS, "op" => op).record(elapsed.as_secs_f64());
}
