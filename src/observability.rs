use std::net::SocketAddr;

// ── Pricing ─────────────────────────────────────────────────────

/// Counter: price resolutions. Labels: outcome (found, not_found, invalid).
pub const PRICE_RESOLUTIONS_TOTAL: &str = "bookline_price_resolutions_total";

/// Counter: resolution attempts a session refused to issue. Labels: reason.
pub const RESOLUTION_ATTEMPTS_SUPPRESSED_TOTAL: &str =
    "bookline_resolution_attempts_suppressed_total";

/// Counter: tier tables found overlapping, inverted or with duplicate prices.
pub const PRICING_INTEGRITY_VIOLATIONS_TOTAL: &str = "bookline_pricing_integrity_violations_total";

// ── Lifecycle ───────────────────────────────────────────────────

/// Counter: lifecycle requests. Labels: kind (status, payment, archive, delete), result.
pub const TRANSITIONS_TOTAL: &str = "bookline_transitions_total";

/// Counter: listing pages built.
pub const PAGE_BUILDS_TOTAL: &str = "bookline_page_builds_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
