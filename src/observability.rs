use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests handled. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "chargebook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "chargebook_http_request_duration_seconds";

/// Counter: reservations committed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "chargebook_reservations_created_total";

/// Counter: reservations cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "chargebook_reservations_cancelled_total";

/// Counter: reservations hard-deleted by their owner.
pub const RESERVATIONS_DELETED_TOTAL: &str = "chargebook_reservations_deleted_total";

/// Counter: rejected creates. Labels: axis (station, plate, duplicate).
pub const RESERVATION_CONFLICTS_TOTAL: &str = "chargebook_reservation_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent waiting for the write gate or a station lock.
pub const LOCK_WAIT_SECONDS: &str = "chargebook_lock_wait_seconds";

/// Counter: lock acquisitions that hit the timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "chargebook_lock_timeouts_total";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "chargebook_wal_compactions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "chargebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "chargebook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a response status to a short label for metrics.
pub fn status_label(status: u16) -> &'static str {
    match status {
        200..=299 => "ok",
        400..=499 => "client_error",
        _ => "server_error",
    }
}
