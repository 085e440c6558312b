use std::time::Duration;

use anyhow::Result;
use collector_service::{config::AppConfig, observability, pipeline::Collector, sinks::InfluxSink};
use inverter_client::InverterClient;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics endpoint if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        observability::init_metrics(&metrics_cfg.bind_addr)?;
    }

    let fetcher = InverterClient::new(
        cfg.inverter.addr.clone(),
        cfg.inverter.user.clone(),
        cfg.inverter.password.clone(),
        cfg.inverter.timeout(),
    )?;

    let sink = InfluxSink::new(
        &cfg.influx.url,
        cfg.influx.database.clone(),
        cfg.influx.user.clone(),
        cfg.influx.password.clone(),
    )?;

    let collector = Collector::new(
        fetcher,
        sink,
        Duration::from_secs(cfg.collector.sample_secs),
        cfg.collector.max_attempts,
    );

    tracing::info!(
        inverter = %cfg.inverter.addr,
        influx = %cfg.influx.url,
        database = %cfg.influx.database,
        sample_secs = cfg.collector.sample_secs,
        "starting collector"
    );

    tokio::select! {
        _ = collector.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("program stopped by interrupt");
        }
    }

    Ok(())
}
