use std::time::Duration;

use time::OffsetDateTime;

/// Raw outcome of one status-page request. All fields except `fetched_at`
/// are absent when the request never completed (timeout, connection refused).
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatus {
    pub status_code: Option<u16>,
    pub reason: Option<String>,
    pub elapsed: Option<Duration>,
    pub body: Option<String>,
    pub fetched_at: OffsetDateTime,
}

impl RawStatus {
    /// Envelope for a request that produced no response at all.
    pub fn unreached(fetched_at: OffsetDateTime) -> Self {
        Self {
            status_code: None,
            reason: None,
            elapsed: None,
            body: None,
            fetched_at,
        }
    }
}
