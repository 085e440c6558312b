use inverter_client::domain::RawStatus;
use inverter_client::InverterClient;

use crate::pipeline::StatusFetcher;

/// The device client plugged into the pipeline's fetcher seam.
#[async_trait::async_trait]
impl StatusFetcher for InverterClient {
    async fn probe(&self) -> bool {
        let reachable = InverterClient::probe(self).await;
        if !reachable {
            metrics::counter!("inverter_probe_failures_total").increment(1);
        }
        reachable
    }

    async fn fetch(&self) -> RawStatus {
        metrics::counter!("inverter_fetch_attempts_total").increment(1);
        let raw = InverterClient::fetch(self).await;
        if raw.status_code.is_none() {
            metrics::counter!("inverter_fetch_no_response_total").increment(1);
        }
        raw
    }
}
