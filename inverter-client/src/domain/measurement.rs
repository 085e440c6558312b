use time::OffsetDateTime;

/// One telemetry sample, keyed by inverter serial number.
///
/// `series` is the time-series key the storage backend groups readings by.
/// It is `None` when the reading is degraded and no serial was available.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub series: Option<String>,
    pub at: OffsetDateTime,
    pub fields: StatusFields,
}

/// The fixed field set of a status-page reading.
///
/// Every reading carries exactly this set, successful or degraded; a field
/// the inverter left blank (or that never arrived) is `None`, never missing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusFields {
    pub inverter_serial_number: Option<String>,
    pub firmware_main: Option<String>,
    pub firmware_slave: Option<String>,
    pub inverter_model: Option<String>,
    pub power_rated: Option<i64>,
    pub power_current: Option<i64>,
    pub yield_today: Option<f64>,
    pub yield_total: Option<f64>,
    pub alerts: Option<String>,
    pub last_updated: Option<i64>,
    pub device_serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub wifi_mode: Option<String>,
    pub ap_ssid: Option<String>,
    pub ap_ip: Option<String>,
    pub ap_mac: Option<String>,
    pub sta_ssid: Option<String>,
    pub sta_signal_quality: Option<i64>,
    pub sta_ip: Option<String>,
    pub sta_mac: Option<String>,
    pub remote_server_a_connected: Option<bool>,
    pub remote_server_b_connected: Option<bool>,
    pub remote_server_c_connected: Option<bool>,
    pub request_status_code: Option<i64>,
    pub request_reason: Option<String>,
    pub request_elapsed: Option<f64>,
}

impl StatusFields {
    /// True when the reading carries no data at all, request metadata
    /// included. Such a record cannot be written as a valid point.
    pub fn is_empty(&self) -> bool {
        let Self {
            inverter_serial_number,
            firmware_main,
            firmware_slave,
            inverter_model,
            power_rated,
            power_current,
            yield_today,
            yield_total,
            alerts,
            last_updated,
            device_serial_number,
            firmware_version,
            wifi_mode,
            ap_ssid,
            ap_ip,
            ap_mac,
            sta_ssid,
            sta_signal_quality,
            sta_ip,
            sta_mac,
            remote_server_a_connected,
            remote_server_b_connected,
            remote_server_c_connected,
            request_status_code,
            request_reason,
            request_elapsed,
        } = self;

        inverter_serial_number.is_none()
            && firmware_main.is_none()
            && firmware_slave.is_none()
            && inverter_model.is_none()
            && power_rated.is_none()
            && power_current.is_none()
            && yield_today.is_none()
            && yield_total.is_none()
            && alerts.is_none()
            && last_updated.is_none()
            && device_serial_number.is_none()
            && firmware_version.is_none()
            && wifi_mode.is_none()
            && ap_ssid.is_none()
            && ap_ip.is_none()
            && ap_mac.is_none()
            && sta_ssid.is_none()
            && sta_signal_quality.is_none()
            && sta_ip.is_none()
            && sta_mac.is_none()
            && remote_server_a_connected.is_none()
            && remote_server_b_connected.is_none()
            && remote_server_c_connected.is_none()
            && request_status_code.is_none()
            && request_reason.is_none()
            && request_elapsed.is_none()
    }
}
