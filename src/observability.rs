use std::net::SocketAddr;

use crate::protocol::Request;

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: bookings created. Labels: origin.
pub const BOOKINGS_CREATED_TOTAL: &str = "staybook_bookings_created_total";

/// Counter: lifecycle transitions applied. Labels: event.
pub const TRANSITIONS_TOTAL: &str = "staybook_transitions_total";

/// Counter: candidate ranges rejected by the validator. Labels: reason.
pub const VALIDATION_REJECTIONS_TOTAL: &str = "staybook_validation_rejections_total";

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: protocol requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "staybook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "staybook_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "staybook_connections_active";
pub const CONNECTIONS_TOTAL: &str = "staybook_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "staybook_connections_rejected_total";

/// Counter: operator logins refused.
pub const AUTH_FAILURES_TOTAL: &str = "staybook_auth_failures_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: events per journal flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a request.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Hello { .. } => "hello",
        Request::Periods => "periods",
        Request::Calendar { .. } => "calendar",
        Request::AvailableDates { .. } => "available_dates",
        Request::Validate { .. } => "validate",
        Request::Book { .. } => "book",
        Request::MyBookings => "my_bookings",
        Request::Get { .. } => "get",
        Request::Confirm { .. } => "confirm",
        Request::Cancel { .. } => "cancel",
        Request::CreateManual { .. } => "create_manual",
        Request::List { .. } => "list",
        Request::Activity { .. } => "activity",
        Request::Summary => "summary",
    }
}
