use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total mutations applied. Labels: op.
pub const MUTATIONS_TOTAL: &str = "motorpool_mutations_total";

/// Counter: total queries served. Labels: op.
pub const QUERIES_TOTAL: &str = "motorpool_queries_total";

/// Counter: reservation writes rejected for overlapping an existing booking.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "motorpool_reservation_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "motorpool_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "motorpool_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if port
/// is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Plain stdout subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
