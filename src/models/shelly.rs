//! Smart-plug telemetry snapshot and the defensive parse of the Shelly
//! cloud `device_status` payload.
//!
//! The cloud payload varies across device generations (`sys` vs `system`,
//! hardware info nested or not), so parsing navigates `serde_json::Value`
//! with per-field defaults instead of a rigid schema. A failure never
//! reaches the caller as an error: any problem yields an offline status
//! carrying the reason.

use crate::utils::now_ms;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct PlugStatus {
    pub name: String,
    pub id: String,
    pub online: bool,
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
    pub temperature_c: f64,
    pub energy_total_wh: f64,
    pub ssid: String,
    pub rssi: i64,
    pub room: String,
    pub error: Option<String>,
    pub fetched_at_ms: i64,
    // Diagnostics, populated when the payload carries them.
    pub output: Option<bool>,
    pub power_factor: Option<f64>,
    pub freq_hz: Option<f64>,
    pub overpower: Option<bool>,
    pub overtemperature: Option<bool>,
    pub errors: Option<Vec<String>>,
    pub energy_by_minute: Option<Vec<f64>>,
    pub energy_minute_ts: Option<i64>,
    pub ip: Option<String>,
    pub wifi_connected: Option<bool>,
    pub cloud_connected: Option<bool>,
    pub mqtt_connected: Option<bool>,
    pub mac: Option<String>,
    pub model: Option<String>,
    pub fw: Option<String>,
    pub fw_id: Option<String>,
    pub uptime_sec: Option<i64>,
    pub has_update: Option<bool>,
}

impl PlugStatus {
    pub fn offline(name: &str, id: &str, room: &str, reason: impl Into<String>) -> Self {
        PlugStatus {
            name: name.to_string(),
            id: id.to_string(),
            online: false,
            power_w: 0.0,
            voltage_v: 0.0,
            current_a: 0.0,
            temperature_c: 0.0,
            energy_total_wh: 0.0,
            ssid: String::new(),
            rssi: 0,
            room: room.to_string(),
            error: Some(reason.into()),
            fetched_at_ms: now_ms(),
            output: None,
            power_factor: None,
            freq_hz: None,
            overpower: None,
            overtemperature: None,
            errors: None,
            energy_by_minute: None,
            energy_minute_ts: None,
            ip: None,
            wifi_connected: None,
            cloud_connected: None,
            mqtt_connected: None,
            mac: None,
            model: None,
            fw: None,
            fw_id: None,
            uptime_sec: None,
            has_update: None,
        }
    }
}

/// Map a cloud status body onto a [`PlugStatus`]. Missing envelope objects
/// (`data`, `device_status`) give an offline status; everything below that
/// degrades per field.
pub fn parse_device_status(name: &str, id: &str, room: &str, root: &Value) -> PlugStatus {
    let Some(data) = root.get("data") else {
        return PlugStatus::offline(name, id, room, "missing data");
    };
    let Some(status) = data.get("device_status") else {
        return PlugStatus::offline(name, id, room, "missing device_status");
    };

    let sw = status.get("switch:0").unwrap_or(&Value::Null);
    let wifi = status.get("wifi").unwrap_or(&Value::Null);
    let cloud = status.get("cloud").unwrap_or(&Value::Null);
    let mqtt = status.get("mqtt").unwrap_or(&Value::Null);
    let sys = status
        .get("sys")
        .or_else(|| status.get("system"))
        .unwrap_or(&Value::Null);
    let hwinfo = sys.get("hwinfo").unwrap_or(&Value::Null);

    let aenergy = sw.get("aenergy");
    let ssid = str_or_empty(wifi, "ssid");
    let wifi_connected = opt_bool(wifi, "connected").or(Some(!ssid.is_empty()));
    let sta_ip = opt_str(wifi, "sta_ip");

    PlugStatus {
        name: name.to_string(),
        id: id.to_string(),
        online: true,
        power_w: f64_or_zero(sw, "apower").max(0.0),
        voltage_v: f64_or_zero(sw, "voltage"),
        current_a: f64_or_zero(sw, "current"),
        temperature_c: sw
            .get("temperature")
            .and_then(|t| t.get("tC"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        energy_total_wh: aenergy.map(|a| f64_or_zero(a, "total")).unwrap_or(0.0),
        ssid,
        rssi: opt_i64(wifi, "rssi").unwrap_or(0),
        room: room.to_string(),
        error: None,
        fetched_at_ms: now_ms(),
        output: opt_bool(sw, "output"),
        power_factor: opt_f64(sw, "pf"),
        freq_hz: opt_f64(sw, "freq"),
        overpower: opt_bool(sw, "overpower"),
        overtemperature: opt_bool(sw, "overtemperature"),
        errors: sw.get("errors").and_then(Value::as_array).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        }),
        energy_by_minute: aenergy
            .and_then(|a| a.get("by_minute"))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect()),
        energy_minute_ts: aenergy.and_then(|a| opt_i64(a, "minute_ts")).filter(|ts| *ts > 0),
        ip: opt_str(wifi, "ip").or(sta_ip),
        wifi_connected,
        cloud_connected: opt_bool(cloud, "connected"),
        mqtt_connected: opt_bool(mqtt, "connected"),
        mac: opt_str(sys, "mac").or_else(|| opt_str(hwinfo, "mac")),
        model: opt_str(sys, "model").or_else(|| opt_str(hwinfo, "model")),
        fw: opt_str(sys, "fw"),
        fw_id: opt_str(sys, "fw_id"),
        uptime_sec: opt_i64(sys, "uptime")
            .filter(|u| *u > 0)
            .or_else(|| opt_i64(status, "uptime").filter(|u| *u > 0)),
        has_update: opt_bool(sys, "has_update"),
    }
}

fn f64_or_zero(v: &Value, key: &str) -> f64 {
    let value = v.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    if value.is_nan() { 0.0 } else { value }
}

fn opt_f64(v: &Value, key: &str) -> Option<f64> {
    v.get(key).and_then(Value::as_f64).filter(|f| !f.is_nan())
}

fn opt_i64(v: &Value, key: &str) -> Option<i64> {
    v.get(key).and_then(Value::as_i64)
}

fn opt_bool(v: &Value, key: &str) -> Option<bool> {
    v.get(key).and_then(Value::as_bool)
}

fn opt_str(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn str_or_empty(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load_fixture() -> Value {
        let json = std::fs::read_to_string("tests/data/device-status.json").expect("fixture present");
        serde_json::from_str(&json).expect("parse device status")
    }

    #[test]
    fn parses_full_fixture() {
        let root = load_fixture();
        let st = parse_device_status("PRESA_NICOLE", "8cbfeaa953c8", "Nicole", &root);
        assert!(st.online);
        assert!(st.error.is_none());
        assert_eq!(st.power_w, 42.7);
        assert_eq!(st.voltage_v, 231.2);
        assert_eq!(st.temperature_c, 38.5);
        assert_eq!(st.energy_total_wh, 15023.4);
        assert_eq!(st.ssid, "office-iot");
        assert_eq!(st.rssi, -58);
        assert_eq!(st.output, Some(true));
        assert_eq!(st.cloud_connected, Some(true));
        assert_eq!(st.mqtt_connected, Some(false));
        assert_eq!(st.mac.as_deref(), Some("8C:BF:EA:A9:53:C8"));
        assert_eq!(st.uptime_sec, Some(86_500));
        assert_eq!(st.energy_by_minute.as_deref(), Some(&[0.7, 0.8, 0.7][..]));
    }

    #[test]
    fn missing_envelope_yields_offline() {
        let st = parse_device_status("P", "1", "Os", &json!({}));
        assert!(!st.online);
        assert_eq!(st.error.as_deref(), Some("missing data"));

        let st = parse_device_status("P", "1", "Os", &json!({"data": {}}));
        assert_eq!(st.error.as_deref(), Some("missing device_status"));
    }

    #[test]
    fn partial_switch_block_degrades_to_defaults() {
        let root = json!({
            "data": {"device_status": {"switch:0": {"apower": 3.2}}}
        });
        let st = parse_device_status("P", "1", "Os", &root);
        assert!(st.online);
        assert_eq!(st.power_w, 3.2);
        assert_eq!(st.voltage_v, 0.0);
        assert_eq!(st.rssi, 0);
        assert!(st.mac.is_none());
    }

    #[test]
    fn negative_power_is_clamped() {
        let root = json!({
            "data": {"device_status": {"switch:0": {"apower": -0.4}}}
        });
        let st = parse_device_status("P", "1", "Os", &root);
        assert_eq!(st.power_w, 0.0);
    }

    #[test]
    fn system_alias_and_hwinfo_fallback() {
        let root = json!({
            "data": {"device_status": {
                "switch:0": {},
                "system": {"hwinfo": {"mac": "AA:BB", "model": "S3PL"}}
            }}
        });
        let st = parse_device_status("P", "1", "Os", &root);
        assert_eq!(st.mac.as_deref(), Some("AA:BB"));
        assert_eq!(st.model.as_deref(), Some("S3PL"));
    }
}
