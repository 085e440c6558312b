use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("collector_service=info".parse().unwrap_or_else(|_| "info".parse().unwrap()))
        .add_directive("inverter_client=info".parse().unwrap_or_else(|_| "info".parse().unwrap()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Install the Prometheus recorder and its exposition endpoint.
///
/// Must run inside the Tokio runtime; the exporter spawns its own listener.
pub fn init_metrics(bind_addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics.bind_addr: {e}"))?;

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    Ok(())
}
