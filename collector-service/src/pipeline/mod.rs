use std::time::Duration;

use inverter_client::domain::{Measurement, RawStatus};

use crate::transform;

/// Classified failure surface of a measurement sink.
///
/// One write attempt per record; the collector logs each class distinctly
/// and drops the record. There is no requeue, so sink unavailability means
/// accepted data loss.
#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("connection to sink failed: {0}")]
    Connect(String),
    #[error("sink timed out or unavailable: {0}")]
    Unavailable(String),
    #[error("delivery failed: {0}")]
    Other(String),
}

#[async_trait::async_trait]
pub trait StatusFetcher: Send + Sync {
    /// One reachability probe. The inverter is expected to be offline at
    /// night, so `false` is a normal answer.
    async fn probe(&self) -> bool;

    /// One bounded status-page request. Never fails; a request that produced
    /// no response comes back as an empty envelope.
    async fn fetch(&self) -> RawStatus;
}

#[async_trait::async_trait]
pub trait MeasurementSink: Send + Sync {
    async fn write(&self, measurement: &Measurement) -> Result<(), DeliveryError>;
}

/// What one poll cycle amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Probe failed; no fetch was attempted.
    Offline,
    /// A record (possibly degraded) reached the sink.
    Delivered,
    /// A record was produced but the sink refused it; the record is gone.
    Dropped,
}

/// The poll-parse-deliver loop.
///
/// Single logical task: one cycle runs to completion (probe, up to
/// `max_attempts` sequential fetch+parse attempts, one sink write) before
/// the fixed sleep. Every cycle's data is freshly constructed and discarded;
/// nothing is shared across cycles.
pub struct Collector<F, S> {
    fetcher: F,
    sink: S,
    sample_interval: Duration,
    max_attempts: u32,
}

impl<F, S> Collector<F, S>
where
    F: StatusFetcher,
    S: MeasurementSink,
{
    pub fn new(fetcher: F, sink: S, sample_interval: Duration, max_attempts: u32) -> Self {
        Self {
            fetcher,
            sink,
            // A zero budget would mean cycles that never fetch.
            max_attempts: max_attempts.max(1),
            sample_interval,
        }
    }

    /// Run forever. Every per-cycle failure is handled inside the cycle;
    /// only an external interrupt (handled by the caller) ends the loop.
    pub async fn run(self) {
        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.sample_interval).await;
        }
    }

    /// One pass of the cycle state machine:
    /// probe -> (offline | poll with retries) -> delivered/dropped.
    pub async fn run_cycle(&self) -> CycleOutcome {
        metrics::counter!("collector_cycles_total").increment(1);

        if !self.fetcher.probe().await {
            tracing::debug!("inverter is off-line");
            metrics::counter!("collector_offline_cycles_total").increment(1);
            return CycleOutcome::Offline;
        }

        let measurement = self.read_data().await;

        match self.sink.write(&measurement).await {
            Ok(()) => {
                metrics::counter!("collector_delivered_records_total").increment(1);
                CycleOutcome::Delivered
            }
            Err(e) => {
                match &e {
                    DeliveryError::Connect(_) => {
                        tracing::error!(error = %e, "cannot connect to sink, dropping record")
                    }
                    DeliveryError::Unavailable(_) => {
                        tracing::error!(error = %e, "sink unavailable, dropping record")
                    }
                    DeliveryError::Other(_) => {
                        tracing::error!(error = %e, "unclassified delivery failure, dropping record")
                    }
                }
                metrics::counter!("collector_dropped_records_total").increment(1);
                CycleOutcome::Dropped
            }
        }
    }

    /// Fetch and parse, retrying on empty readings.
    ///
    /// The inverter occasionally serves a page with all values blank; a
    /// reading counts as real once `yield_total` is present. Attempts are
    /// strictly sequential and the last record wins when the budget runs
    /// out, degraded or not.
    async fn read_data(&self) -> Measurement {
        let mut record = self.attempt().await;

        let mut attempts = 1;
        while record.fields.yield_total.is_none() && attempts < self.max_attempts {
            tracing::debug!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                "no yield total in reading, retrying"
            );
            metrics::counter!("collector_empty_readings_total").increment(1);
            attempts += 1;
            record = self.attempt().await;
        }

        record
    }

    async fn attempt(&self) -> Measurement {
        let raw = self.fetcher.fetch().await;
        match transform::parse(&raw) {
            Ok(measurement) => measurement,
            Err(e) => {
                // Unexpected page layout is fatal for the attempt only; the
                // degraded record keeps the retry budget usable.
                tracing::warn!(error = %e, "malformed status page, degrading to null record");
                metrics::counter!("collector_malformed_pages_total").increment(1);
                transform::degraded(&raw)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use time::macros::datetime;

    struct ScriptedFetcher {
        reachable: bool,
        responses: Mutex<Vec<RawStatus>>,
        fetches: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(reachable: bool, responses: Vec<RawStatus>) -> Self {
            Self {
                reachable,
                responses: Mutex::new(responses),
                fetches: AtomicUsize::new(0),
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl StatusFetcher for &ScriptedFetcher {
        async fn probe(&self) -> bool {
            self.reachable
        }

        async fn fetch(&self) -> RawStatus {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            }
        }
    }

    struct RecordingSink {
        records: Mutex<Vec<Measurement>>,
        refuse: bool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                refuse: false,
            }
        }

        fn refusing() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                refuse: true,
            }
        }

        fn records(&self) -> Vec<Measurement> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl MeasurementSink for &RecordingSink {
        async fn write(&self, measurement: &Measurement) -> Result<(), DeliveryError> {
            if self.refuse {
                return Err(DeliveryError::Connect("connection refused".to_string()));
            }
            self.records.lock().unwrap().push(measurement.clone());
            Ok(())
        }
    }

    fn collector<'a>(
        fetcher: &'a ScriptedFetcher,
        sink: &'a RecordingSink,
    ) -> Collector<&'a ScriptedFetcher, &'a RecordingSink> {
        Collector::new(fetcher, sink, Duration::from_secs(60), 5)
    }

    fn ok_response(body: &str) -> RawStatus {
        RawStatus {
            status_code: Some(200),
            reason: Some("OK".to_string()),
            elapsed: Some(Duration::from_millis(100)),
            body: Some(body.to_string()),
            fetched_at: datetime!(2024-06-01 12:00:00 UTC),
        }
    }

    fn full_page() -> String {
        [
            ("webdata_sn", "1234567890"),
            ("webdata_msvn", "1.0.12"),
            ("webdata_ssvn", "1.0.04"),
            ("webdata_pv_type", "MI300"),
            ("webdata_rate_p", "300"),
            ("webdata_now_p", "142"),
            ("webdata_today_e", "3.2"),
            ("webdata_total_e", "1234.5"),
            ("webdata_alarm", ""),
            ("webdata_utime", "15"),
            ("cover_mid", "4074588231"),
            ("cover_ver", "MW_08_512_0501_1.82"),
            ("cover_wmode", "STA"),
            ("cover_ap_ssid", "AP_4074588231"),
            ("cover_ap_ip", "10.10.100.254"),
            ("cover_ap_mac", "8CD8B37EAB12"),
            ("cover_sta_ssid", "homenet"),
            ("cover_sta_rssi", "87%"),
            ("cover_sta_ip", "192.168.1.60"),
            ("cover_sta_mac", "8CD8B37EAB13"),
            ("status_a", "1"),
            ("status_b", "1"),
            ("status_c", ""),
        ]
        .iter()
        .map(|(k, v)| format!("var {k} = \"{v}\";"))
        .collect::<Vec<_>>()
        .join("\r\n")
    }

    /// Same page with the yield values blanked, as the inverter sometimes
    /// serves right after waking up.
    fn empty_page() -> String {
        full_page()
            .replace("var webdata_total_e = \"1234.5\";", "var webdata_total_e = \"\";")
            .replace("var webdata_today_e = \"3.2\";", "var webdata_today_e = \"\";")
    }

    #[tokio::test]
    async fn offline_cycle_never_fetches_or_writes() {
        let fetcher = ScriptedFetcher::new(false, vec![ok_response(&full_page())]);
        let sink = RecordingSink::new();

        let outcome = collector(&fetcher, &sink).run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Offline);
        assert_eq!(fetcher.fetch_count(), 0);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn real_reading_on_first_attempt_stops_retrying() {
        let fetcher = ScriptedFetcher::new(true, vec![ok_response(&full_page())]);
        let sink = RecordingSink::new();

        let outcome = collector(&fetcher, &sink).run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Delivered);
        assert_eq!(fetcher.fetch_count(), 1);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields.yield_total, Some(1234.5));
        assert_eq!(records[0].series.as_deref(), Some("1234567890"));
    }

    #[tokio::test]
    async fn empty_readings_retry_until_a_real_one_arrives() {
        let fetcher = ScriptedFetcher::new(
            true,
            vec![
                ok_response(&empty_page()),
                ok_response(&empty_page()),
                ok_response(&full_page()),
            ],
        );
        let sink = RecordingSink::new();

        let outcome = collector(&fetcher, &sink).run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Delivered);
        assert_eq!(fetcher.fetch_count(), 3);
        assert_eq!(sink.records()[0].fields.yield_total, Some(1234.5));
    }

    #[tokio::test]
    async fn attempt_budget_is_exhausted_and_last_record_delivered() {
        let unavailable = RawStatus {
            status_code: Some(500),
            reason: Some("Internal Server Error".to_string()),
            elapsed: Some(Duration::from_millis(50)),
            body: None,
            fetched_at: datetime!(2024-06-01 12:00:00 UTC),
        };
        let fetcher = ScriptedFetcher::new(true, vec![unavailable]);
        let sink = RecordingSink::new();

        let outcome = collector(&fetcher, &sink).run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Delivered);
        assert_eq!(fetcher.fetch_count(), 5);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields.request_status_code, Some(500));
        assert_eq!(records[0].fields.yield_total, None);
    }

    #[tokio::test]
    async fn malformed_page_degrades_and_spends_the_budget() {
        let fetcher = ScriptedFetcher::new(true, vec![ok_response("<html>login</html>")]);
        let sink = RecordingSink::new();

        let outcome = collector(&fetcher, &sink).run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Delivered);
        assert_eq!(fetcher.fetch_count(), 5);

        let records = sink.records();
        assert_eq!(records[0].series, None);
        assert_eq!(records[0].fields.request_status_code, Some(200));
        assert_eq!(records[0].fields.yield_total, None);
    }

    #[tokio::test]
    async fn refused_delivery_drops_the_record() {
        let fetcher = ScriptedFetcher::new(true, vec![ok_response(&full_page())]);
        let sink = RecordingSink::refusing();

        let outcome = collector(&fetcher, &sink).run_cycle().await;

        assert_eq!(outcome, CycleOutcome::Dropped);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn attempt_budget_has_a_floor_of_one() {
        let fetcher = ScriptedFetcher::new(true, vec![ok_response(&empty_page())]);
        let sink = RecordingSink::new();

        let c = Collector::new(&fetcher, &sink, Duration::from_secs(60), 0);
        c.run_cycle().await;

        assert_eq!(fetcher.fetch_count(), 1);
    }
}
