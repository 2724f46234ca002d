//! Persistence of comfort snapshots and plug usage summaries to a Firebase
//! Realtime Database over its REST surface.
//!
//! Layout:
//!   /office/{room}/snapshots/{YYYY-MM-DD}/{HH:mm}   comfort snapshot
//!   /plugs/{plug}/hourly_summary/{YYYY-MM-DDTHH}    hourly usage counter
//!
//! Day and slot identifiers are rendered in the configured local timezone,
//! so a day key compares lexicographically the same way it compares
//! chronologically.

use chrono::TimeZone;
use chrono_tz::Tz;
use core::fmt;
use log::debug;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug)]
pub enum StoreError {
    /// Connection-level failure (DNS, TCP, TLS, timeout).
    Transport(String),
    /// The database answered with a non-success status.
    Http { status: u16, message: String },
    /// The database answered 2xx but the body did not parse.
    Json(serde_json::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Transport(e) => write!(f, "store transport error: {}", e),
            StoreError::Http { status, message } => {
                write!(f, "store http error {}: {}", status, message)
            }
            StoreError::Json(e) => write!(f, "store json error: {}", e),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Json(e) => Some(e),
            _ => None,
        }
    }
}

/// `2024-01-31` in the given timezone.
pub fn day_bucket_id(timestamp_ms: i64, tz: Tz) -> String {
    tz.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// `14:30` for any timestamp within [14:30, 14:40) in the given timezone.
pub fn ten_min_slot(timestamp_ms: i64, tz: Tz) -> String {
    tz.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| {
            use chrono::Timelike;
            format!("{:02}:{:02}", dt.hour(), dt.minute() - dt.minute() % 10)
        })
        .unwrap_or_default()
}

/// `2024-01-31T14` in the given timezone.
pub fn hour_bucket_id(timestamp_ms: i64, tz: Tz) -> String {
    tz.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H").to_string())
        .unwrap_or_default()
}

/// One persisted comfort reading. Fields the upstream could not provide are
/// omitted from the payload entirely rather than written as null.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ComfortSnapshot {
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_amb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spmv: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spmv2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spmv3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clo_pred: Option<f64>,
}

/// Per-plug usage counter for one local hour.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlugHourlySummary {
    pub hour_bucket: String,
    pub timestamp_end_ms: i64,
    pub count_above_5: u32,
}

/// Abstraction over the snapshot database so the aggregation services can be
/// exercised against an in-memory sink in tests.
pub trait SnapshotSink {
    fn put_comfort_snapshot(
        &self,
        room: &str,
        day: &str,
        slot: &str,
        snapshot: &ComfortSnapshot,
    ) -> Result<(), StoreError>;

    fn put_plug_hourly(&self, plug: &str, summary: &PlugHourlySummary) -> Result<(), StoreError>;

    /// Day keys currently present under a room's snapshots, sorted ascending.
    fn list_snapshot_days(&self, room: &str) -> Result<Vec<String>, StoreError>;

    fn delete_snapshot_day(&self, room: &str, day: &str) -> Result<(), StoreError>;
}

pub struct RtdbStore {
    agent: ureq::Agent,
    base_url: String,
}

impl RtdbStore {
    pub fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(4))
            .timeout_read(Duration::from_secs(6))
            .timeout(Duration::from_secs(10))
            .build();
        RtdbStore {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn node_url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path)
    }

    fn put_json<T: Serialize>(&self, path: &str, value: &T) -> Result<(), StoreError> {
        let url = self.node_url(path);
        let body = serde_json::to_string(value).map_err(StoreError::Json)?;
        debug!("store put {}", path);
        self.agent
            .put(&url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(map_ureq_error)?;
        Ok(())
    }
}

impl SnapshotSink for RtdbStore {
    fn put_comfort_snapshot(
        &self,
        room: &str,
        day: &str,
        slot: &str,
        snapshot: &ComfortSnapshot,
    ) -> Result<(), StoreError> {
        self.put_json(&format!("office/{}/snapshots/{}/{}", room, day, slot), snapshot)
    }

    fn put_plug_hourly(&self, plug: &str, summary: &PlugHourlySummary) -> Result<(), StoreError> {
        self.put_json(
            &format!("plugs/{}/hourly_summary/{}", plug, summary.hour_bucket),
            summary,
        )
    }

    fn list_snapshot_days(&self, room: &str) -> Result<Vec<String>, StoreError> {
        let url = format!(
            "{}/office/{}/snapshots.json?shallow=true",
            self.base_url, room
        );
        let response = self.agent.get(&url).call().map_err(map_ureq_error)?;
        let body: serde_json::Value = response.into_json().map_err(|e| StoreError::Transport(e.to_string()))?;
        let mut days: Vec<String> = match body {
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            // An empty node reads back as JSON null.
            serde_json::Value::Null => Vec::new(),
            other => {
                return Err(StoreError::Transport(format!(
                    "unexpected shallow listing shape: {}",
                    other
                )));
            }
        };
        days.sort();
        Ok(days)
    }

    fn delete_snapshot_day(&self, room: &str, day: &str) -> Result<(), StoreError> {
        let url = self.node_url(&format!("office/{}/snapshots/{}", room, day));
        self.agent.delete(&url).call().map_err(map_ureq_error)?;
        Ok(())
    }
}

fn map_ureq_error(error: ureq::Error) -> StoreError {
    match error {
        ureq::Error::Status(status, response) => {
            let message = response
                .into_string()
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            StoreError::Http { status, message }
        }
        ureq::Error::Transport(t) => StoreError::Transport(t.to_string()),
    }
}
