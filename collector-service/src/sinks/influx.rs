use std::time::Duration;

use inverter_client::domain::Measurement;

use crate::pipeline::{DeliveryError, MeasurementSink};

/// Series name for degraded records that carry no inverter serial.
const FALLBACK_SERIES: &str = "inverter_unknown";

/// The sink's own bound on a write; independent of the device-side timeout.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// InfluxDB v1 sink writing one point per measurement over the HTTP API.
///
/// Fire-and-forget: one `POST /write` per record, no retry, no queue. The
/// database is assumed to exist; provisioning it is the operator's problem.
pub struct InfluxSink {
    http: reqwest::Client,
    write_url: String,
    database: String,
    user: String,
    password: String,
}

impl InfluxSink {
    pub fn new(
        base_url: &str,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(WRITE_TIMEOUT).build()?;

        Ok(Self {
            http,
            write_url: format!("{}/write", base_url.trim_end_matches('/')),
            database: database.into(),
            user: user.into(),
            password: password.into(),
        })
    }
}

#[async_trait::async_trait]
impl MeasurementSink for InfluxSink {
    async fn write(&self, measurement: &Measurement) -> Result<(), DeliveryError> {
        let mut line = String::with_capacity(512);
        if !encode_point(measurement, &mut line) {
            // A point with zero fields is invalid line protocol; reject it
            // here instead of bouncing it off the server.
            metrics::counter!("influx_empty_records_total").increment(1);
            return Err(DeliveryError::Other(
                "record contains no fields".to_string(),
            ));
        }

        tracing::debug!(line = %line, "writing point");

        let response = self
            .http
            .post(&self.write_url)
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .basic_auth(&self.user, Some(&self.password))
            .body(line)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "influxdb accepted point");
            metrics::counter!("influx_written_points_total").increment(1);
            return Ok(());
        }

        metrics::counter!("influx_sink_errors_total").increment(1);
        let message = error_message(&response.text().await.unwrap_or_default());
        if status.is_server_error() {
            Err(DeliveryError::Unavailable(format!(
                "HTTP {}: {message}",
                status.as_u16()
            )))
        } else {
            Err(DeliveryError::Other(format!(
                "HTTP {}: {message}",
                status.as_u16()
            )))
        }
    }
}

fn classify_transport(e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Unavailable(e.to_string())
    } else if e.is_connect() {
        DeliveryError::Connect(e.to_string())
    } else {
        DeliveryError::Other(e.to_string())
    }
}

/// InfluxDB v1 wraps errors as `{"error": "..."}`; unwrap when it does.
fn error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct InfluxError {
        error: String,
    }

    match serde_json::from_str::<InfluxError>(body) {
        Ok(e) => e.error,
        Err(_) => body.trim().to_string(),
    }
}

/// Escape a measurement name for line protocol.
///
/// Commas and spaces must be backslash-escaped in the measurement position.
fn escape_measurement(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

/// Escape a field key. Same rules as tags: comma, space, equals.
fn escape_field_key(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

fn push_key(out: &mut String, first: &mut bool, key: &str) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }
    escape_field_key(key, out);
    out.push('=');
}

fn push_field_str(out: &mut String, first: &mut bool, key: &str, value: &str) {
    push_key(out, first, key);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

fn push_field_i64(out: &mut String, first: &mut bool, key: &str, value: i64) {
    push_key(out, first, key);
    out.push_str(&value.to_string());
    // Integer fields need the suffix or the server stores them as floats.
    out.push('i');
}

fn push_field_f64(out: &mut String, first: &mut bool, key: &str, value: f64) {
    push_key(out, first, key);
    out.push_str(&value.to_string());
}

fn push_field_bool(out: &mut String, first: &mut bool, key: &str, value: bool) {
    push_key(out, first, key);
    out.push_str(if value { "true" } else { "false" });
}

/// Encode one measurement as a line-protocol point.
///
/// `None` fields are omitted. Returns false when nothing remained to write,
/// in which case `out` is left untouched.
pub fn encode_point(m: &Measurement, out: &mut String) -> bool {
    let f = &m.fields;

    let mut fields = String::with_capacity(256);
    let mut first = true;

    if let Some(v) = &f.inverter_serial_number {
        push_field_str(&mut fields, &mut first, "inverter_serial_number", v);
    }
    if let Some(v) = &f.firmware_main {
        push_field_str(&mut fields, &mut first, "firmware_main", v);
    }
    if let Some(v) = &f.firmware_slave {
        push_field_str(&mut fields, &mut first, "firmware_slave", v);
    }
    if let Some(v) = &f.inverter_model {
        push_field_str(&mut fields, &mut first, "inverter_model", v);
    }
    if let Some(v) = f.power_rated {
        push_field_i64(&mut fields, &mut first, "power_rated", v);
    }
    if let Some(v) = f.power_current {
        push_field_i64(&mut fields, &mut first, "power_current", v);
    }
    if let Some(v) = f.yield_today {
        push_field_f64(&mut fields, &mut first, "yield_today", v);
    }
    if let Some(v) = f.yield_total {
        push_field_f64(&mut fields, &mut first, "yield_total", v);
    }
    if let Some(v) = &f.alerts {
        push_field_str(&mut fields, &mut first, "alerts", v);
    }
    if let Some(v) = f.last_updated {
        push_field_i64(&mut fields, &mut first, "last_updated", v);
    }
    if let Some(v) = &f.device_serial_number {
        push_field_str(&mut fields, &mut first, "device_serial_number", v);
    }
    if let Some(v) = &f.firmware_version {
        push_field_str(&mut fields, &mut first, "firmware_version", v);
    }
    if let Some(v) = &f.wifi_mode {
        push_field_str(&mut fields, &mut first, "WiFi_mode", v);
    }
    if let Some(v) = &f.ap_ssid {
        push_field_str(&mut fields, &mut first, "AP_SSID", v);
    }
    if let Some(v) = &f.ap_ip {
        push_field_str(&mut fields, &mut first, "AP_IP", v);
    }
    if let Some(v) = &f.ap_mac {
        push_field_str(&mut fields, &mut first, "AP_mac", v);
    }
    if let Some(v) = &f.sta_ssid {
        push_field_str(&mut fields, &mut first, "STA_SSID", v);
    }
    if let Some(v) = f.sta_signal_quality {
        push_field_i64(&mut fields, &mut first, "STA_signal_quality", v);
    }
    if let Some(v) = &f.sta_ip {
        push_field_str(&mut fields, &mut first, "STA_IP", v);
    }
    if let Some(v) = &f.sta_mac {
        push_field_str(&mut fields, &mut first, "STA_mac", v);
    }
    if let Some(v) = f.remote_server_a_connected {
        push_field_bool(&mut fields, &mut first, "remote_server_A_connected", v);
    }
    if let Some(v) = f.remote_server_b_connected {
        push_field_bool(&mut fields, &mut first, "remote_server_B_connected", v);
    }
    if let Some(v) = f.remote_server_c_connected {
        push_field_bool(&mut fields, &mut first, "remote_server_C_connected", v);
    }
    if let Some(v) = f.request_status_code {
        push_field_i64(&mut fields, &mut first, "request_status_code", v);
    }
    if let Some(v) = &f.request_reason {
        push_field_str(&mut fields, &mut first, "request_reason", v);
    }
    if let Some(v) = f.request_elapsed {
        push_field_f64(&mut fields, &mut first, "request_elapsed", v);
    }

    if fields.is_empty() {
        return false;
    }

    escape_measurement(m.series.as_deref().unwrap_or(FALLBACK_SERIES), out);
    out.push(' ');
    out.push_str(&fields);
    out.push(' ');
    out.push_str(&m.at.unix_timestamp_nanos().to_string());

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use inverter_client::domain::StatusFields;
    use time::macros::datetime;

    fn full_measurement() -> Measurement {
        Measurement {
            series: Some("1234567890".to_string()),
            at: datetime!(2024-06-01 12:00:00 UTC),
            fields: StatusFields {
                inverter_serial_number: Some("1234567890".to_string()),
                inverter_model: Some("MI300".to_string()),
                power_rated: Some(300),
                power_current: Some(142),
                yield_today: Some(3.2),
                yield_total: Some(1234.5),
                alerts: Some("grid \"lost\"".to_string()),
                sta_signal_quality: Some(87),
                remote_server_a_connected: Some(true),
                remote_server_b_connected: Some(false),
                request_status_code: Some(200),
                request_reason: Some("OK".to_string()),
                request_elapsed: Some(0.15),
                ..StatusFields::default()
            },
        }
    }

    #[test]
    fn escape_measurement_escapes_commas_and_spaces() {
        let mut out = String::new();
        escape_measurement("a b,c", &mut out);
        assert_eq!(out, "a\\ b\\,c");
    }

    #[test]
    fn point_uses_serial_as_measurement_and_typed_fields() {
        let mut line = String::new();
        assert!(encode_point(&full_measurement(), &mut line));

        assert!(line.starts_with("1234567890 "));
        assert!(line.contains("inverter_serial_number=\"1234567890\""));
        assert!(line.contains("power_rated=300i"));
        assert!(line.contains("power_current=142i"));
        assert!(line.contains("yield_total=1234.5"));
        assert!(line.contains("STA_signal_quality=87i"));
        assert!(line.contains("remote_server_A_connected=true"));
        assert!(line.contains("remote_server_B_connected=false"));
        assert!(line.contains("request_status_code=200i"));
        assert!(line.contains("request_elapsed=0.15"));

        let ts_nanos = datetime!(2024-06-01 12:00:00 UTC)
            .unix_timestamp_nanos()
            .to_string();
        assert!(line.ends_with(&ts_nanos));
    }

    #[test]
    fn string_field_values_are_quoted_and_escaped() {
        let mut line = String::new();
        encode_point(&full_measurement(), &mut line);

        assert!(line.contains(r#"alerts="grid \"lost\"""#));
    }

    #[test]
    fn absent_fields_are_omitted() {
        let mut line = String::new();
        encode_point(&full_measurement(), &mut line);

        assert!(!line.contains("firmware_main="));
        assert!(!line.contains("WiFi_mode="));
        assert!(!line.contains("remote_server_C_connected="));
    }

    #[test]
    fn degraded_record_falls_back_to_the_unknown_series() {
        let m = Measurement {
            series: None,
            at: datetime!(2024-06-01 12:00:00 UTC),
            fields: StatusFields {
                request_status_code: Some(500),
                request_reason: Some("Internal Server Error".to_string()),
                request_elapsed: Some(0.05),
                ..StatusFields::default()
            },
        };

        let mut line = String::new();
        assert!(encode_point(&m, &mut line));

        assert!(line.starts_with("inverter_unknown "));
        assert!(line.contains("request_status_code=500i"));
        assert!(line.contains(r#"request_reason="Internal Server Error""#));
    }

    #[test]
    fn record_with_no_fields_does_not_encode() {
        let m = Measurement {
            series: None,
            at: datetime!(2024-06-01 12:00:00 UTC),
            fields: StatusFields::default(),
        };

        let mut line = String::new();
        assert!(!encode_point(&m, &mut line));
        assert!(line.is_empty());
    }

    #[test]
    fn error_message_unwraps_influx_json() {
        assert_eq!(
            error_message(r#"{"error":"database not found: \"solarpower\""}"#),
            r#"database not found: "solarpower""#
        );
        assert_eq!(error_message("plain text"), "plain text");
    }
}
