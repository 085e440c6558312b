use std::collections::HashMap;

use inverter_client::domain::{Measurement, RawStatus, StatusFields};

/// A 200 response whose body does not look like the expected status page.
///
/// The page is a fixed firmware artifact, so a missing declaration means the
/// device answered with something else entirely (a login redirect, a partial
/// write). The attempt is unusable; the collector degrades it to a null
/// record and spends the rest of its retry budget.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("status page is missing declaration '{0}'")]
    MissingVar(&'static str),
    #[error("200 response carried no body")]
    MissingBody,
}

/// Convert a raw status-page response into a measurement.
///
/// Unreachable and non-200 responses yield the degraded all-null record with
/// whatever request metadata is available. Only a malformed 200 is an error.
/// The result is fully determined by the input; parsing the same envelope
/// twice yields identical records.
pub fn parse(raw: &RawStatus) -> Result<Measurement, ParseError> {
    let Some(status) = raw.status_code else {
        return Ok(degraded(raw));
    };
    if status != 200 {
        return Ok(degraded(raw));
    }

    let body = raw.body.as_deref().ok_or(ParseError::MissingBody)?;
    let vars = extract_vars(body);

    let fields = StatusFields {
        inverter_serial_number: text_field(lookup(&vars, "webdata_sn")?),
        firmware_main: text_field(lookup(&vars, "webdata_msvn")?),
        firmware_slave: text_field(lookup(&vars, "webdata_ssvn")?),
        inverter_model: text_field(lookup(&vars, "webdata_pv_type")?),
        power_rated: int_field(lookup(&vars, "webdata_rate_p")?),
        power_current: int_field(lookup(&vars, "webdata_now_p")?),
        yield_today: float_field(lookup(&vars, "webdata_today_e")?),
        yield_total: float_field(lookup(&vars, "webdata_total_e")?),
        alerts: text_field(lookup(&vars, "webdata_alarm")?),
        last_updated: int_field(lookup(&vars, "webdata_utime")?),
        device_serial_number: text_field(lookup(&vars, "cover_mid")?),
        firmware_version: text_field(lookup(&vars, "cover_ver")?),
        wifi_mode: text_field(lookup(&vars, "cover_wmode")?),
        ap_ssid: text_field(lookup(&vars, "cover_ap_ssid")?),
        ap_ip: text_field(lookup(&vars, "cover_ap_ip")?),
        ap_mac: text_field(lookup(&vars, "cover_ap_mac")?),
        sta_ssid: text_field(lookup(&vars, "cover_sta_ssid")?),
        // Signal quality is reported as "87%"; the unit goes, the digits stay.
        sta_signal_quality: int_field(lookup(&vars, "cover_sta_rssi")?.trim_end_matches('%')),
        sta_ip: text_field(lookup(&vars, "cover_sta_ip")?),
        sta_mac: text_field(lookup(&vars, "cover_sta_mac")?),
        remote_server_a_connected: flag_field(lookup(&vars, "status_a")?),
        remote_server_b_connected: flag_field(lookup(&vars, "status_b")?),
        remote_server_c_connected: flag_field(lookup(&vars, "status_c")?),
        request_status_code: Some(i64::from(status)),
        request_reason: raw.reason.clone(),
        request_elapsed: raw.elapsed.map(|d| d.as_secs_f64()),
    };

    Ok(Measurement {
        series: fields.inverter_serial_number.clone(),
        at: raw.fetched_at,
        fields,
    })
}

/// The all-null record for a response that produced no usable page.
///
/// Request metadata is carried over when the request at least completed, so
/// a failed poll still leaves a trace of how it failed.
pub fn degraded(raw: &RawStatus) -> Measurement {
    Measurement {
        series: None,
        at: raw.fetched_at,
        fields: StatusFields {
            request_status_code: raw.status_code.map(i64::from),
            request_reason: raw.reason.clone(),
            request_elapsed: raw.elapsed.map(|d| d.as_secs_f64()),
            ..StatusFields::default()
        },
    }
}

/// Pull the inline JS variable declarations out of the status page.
///
/// The page is a flat list of lines like `var webdata_sn = "1234567890";`.
/// Only the `web*`, `cover*` and `status*` declarations carry telemetry.
fn extract_vars(body: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for line in body.lines() {
        let Some(decl) = line.trim().strip_prefix("var ") else {
            continue;
        };
        if !(decl.starts_with("web") || decl.starts_with("cover") || decl.starts_with("status")) {
            continue;
        }
        if let Some((key, value)) = decl.trim_end_matches(';').split_once(" = ") {
            vars.insert(key.to_string(), value.trim_matches('"').to_string());
        }
    }
    vars
}

fn lookup<'a>(
    vars: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a str, ParseError> {
    vars.get(key)
        .map(String::as_str)
        .ok_or(ParseError::MissingVar(key))
}

fn text_field(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Decimal digits only; anything else (sign, unit, blank) is no reading.
fn int_field(value: &str) -> Option<i64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn float_field(value: &str) -> Option<f64> {
    value.parse().ok()
}

/// The remote-server flags are integer strings; non-zero means connected.
fn flag_field(value: &str) -> Option<bool> {
    if value.is_empty() {
        return None;
    }
    value.parse::<i64>().ok().map(|n| n != 0)
}
