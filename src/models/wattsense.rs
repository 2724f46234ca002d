//! Models for the Wattsense device/property API (subset of fields consumed).
//!
//! Every remote field is optional: payloads vary per gateway firmware and a
//! partially filled record is still usable. Numeric payloads may arrive as
//! JSON numbers or as numeric strings; `payload_value` normalizes both.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WsDeviceId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub String);

/// One raw time point from the paginated history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyHistoricalItem {
    #[serde(default)]
    pub property: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default, rename = "scaledPayload")]
    pub scaled_payload: Option<f64>,
}

impl PropertyHistoricalItem {
    /// Preferred reading for this point: raw payload first, scaled fallback.
    pub fn numeric_value(&self) -> Option<f64> {
        self.payload.as_ref().and_then(payload_value).or(self.scaled_payload)
    }
}

/// Embedded history delivered by the instant endpoint with
/// `includeHistory=true`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryValues {
    #[serde(default, rename = "readValues")]
    pub read_values: Vec<PropertyHistoricalItem>,
    #[serde(default, rename = "writeValues")]
    pub write_values: Vec<PropertyHistoricalItem>,
}

/// Instant value of one device property.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyResponse {
    pub device_id: Option<WsDeviceId>,
    pub property: Option<PropertyId>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub scaled_payload: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub equipment_id: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub is_out_of_service: Option<bool>,
    #[serde(default)]
    pub history: Option<HistoryValues>,
}

impl PropertyResponse {
    /// Latest scalar reading: scaled payload wins, raw payload as fallback.
    pub fn latest_value(&self) -> Option<f64> {
        self.scaled_payload
            .or_else(|| self.payload.as_ref().and_then(payload_value))
    }
}

/// Interpret a payload that may be a number or a numeric string.
pub fn payload_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
