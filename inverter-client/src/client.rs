use std::process::Stdio;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tokio::process::Command;

use crate::domain::RawStatus;

/// Deadline in seconds for the single ICMP echo used as the liveness check.
const PROBE_DEADLINE_SECS: &str = "2";

const STATUS_PAGE: &str = "status.html";

/// Client for the embedded web interface of a micro inverter.
///
/// The device serves a single status page over plain HTTP behind basic auth.
/// Certificate verification is disabled because the firmware ships either no
/// certificate or a self-signed one.
pub struct InverterClient {
    http: reqwest::Client,
    addr: String,
    user: String,
    password: String,
}

impl InverterClient {
    pub fn new(
        addr: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            http,
            addr: addr.into(),
            user: user.into(),
            password: password.into(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// One ICMP echo against the device.
    ///
    /// The inverter powers itself down when panel output is too low, so an
    /// unanswered ping is an expected state, not an error. No retries here.
    pub async fn probe(&self) -> bool {
        let status = Command::new("ping")
            .args(["-c", "1", "-W", PROBE_DEADLINE_SECS, self.addr.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(s) => s.success(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn ping");
                false
            }
        }
    }

    /// Single GET of the status page.
    ///
    /// Timeouts and transport errors both collapse to an empty envelope so
    /// the caller sees one uniform "no response" shape; the response body is
    /// kept only for a 200.
    pub async fn fetch(&self) -> RawStatus {
        let fetched_at = OffsetDateTime::now_utc();
        let url = format!("http://{}/{}", self.addr, STATUS_PAGE);

        let started = Instant::now();
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                tracing::debug!("request to inverter web interface timed out");
                return RawStatus::unreached(fetched_at);
            }
            Err(e) => {
                tracing::debug!(error = %e, "request to inverter web interface failed");
                return RawStatus::unreached(fetched_at);
            }
        };

        let elapsed = started.elapsed();
        let status = response.status();
        let reason = status.canonical_reason().map(str::to_owned);

        let body = if status.as_u16() == 200 {
            match response.text().await {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::debug!(error = %e, "failed to read status page body");
                    None
                }
            }
        } else {
            tracing::debug!(
                status = status.as_u16(),
                reason = reason.as_deref().unwrap_or(""),
                "status page request failed"
            );
            None
        };

        RawStatus {
            status_code: Some(status.as_u16()),
            reason,
            elapsed: Some(elapsed),
            body,
            fetched_at,
        }
    }
}
