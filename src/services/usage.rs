use crate::models::shelly::PlugStatus;
use crate::store::{PlugHourlySummary, SnapshotSink, hour_bucket_id};
use chrono_tz::Tz;
use log::{info, warn};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
struct HourlyUsage {
    hour_bucket: String,
    count_above_threshold: u32,
}

/// Per-plug counter of in-window minutes spent above the power threshold.
///
/// Owned exclusively by the minute loop: entries are created lazily on first
/// sighting of a plug, flushed to the sink when their hour bucket rolls over
/// and reset. Shutdown flushes every open entry, partial hour included.
pub struct UsageLedger {
    threshold_w: f64,
    timezone: Tz,
    by_plug: HashMap<String, HourlyUsage>,
}

impl UsageLedger {
    pub fn new(threshold_w: f64, timezone: Tz) -> Self {
        UsageLedger {
            threshold_w,
            timezone,
            by_plug: HashMap::new(),
        }
    }

    /// Account one minute tick's worth of statuses. Flushes and resets any
    /// entry whose hour changed since its last observation, then counts the
    /// current sample if the plug is online and strictly above threshold.
    pub fn observe(&mut self, statuses: &[PlugStatus], tick_ms: i64, sink: &dyn SnapshotSink) {
        let bucket = hour_bucket_id(tick_ms, self.timezone);
        for status in statuses {
            let entry = self
                .by_plug
                .entry(status.name.clone())
                .or_insert_with(|| HourlyUsage {
                    hour_bucket: bucket.clone(),
                    count_above_threshold: 0,
                });

            if entry.hour_bucket != bucket {
                flush_entry(sink, &status.name, entry, tick_ms);
                entry.hour_bucket = bucket.clone();
                entry.count_above_threshold = 0;
            }

            if status.online && status.power_w > self.threshold_w {
                entry.count_above_threshold += 1;
            }
        }
    }

    /// Write out every open counter. Called once on shutdown; entries are
    /// drained so a repeated call writes nothing.
    pub fn flush_all(&mut self, sink: &dyn SnapshotSink, now_ms: i64) {
        let drained: Vec<(String, HourlyUsage)> = self.by_plug.drain().collect();
        if !drained.is_empty() {
            info!("flushing {} open usage counters", drained.len());
        }
        for (name, entry) in &drained {
            flush_entry(sink, name, entry, now_ms);
        }
    }

    #[cfg(test)]
    fn count_for(&self, name: &str) -> Option<u32> {
        self.by_plug.get(name).map(|e| e.count_above_threshold)
    }
}

fn flush_entry(sink: &dyn SnapshotSink, name: &str, entry: &HourlyUsage, now_ms: i64) {
    let summary = PlugHourlySummary {
        hour_bucket: entry.hour_bucket.clone(),
        timestamp_end_ms: now_ms,
        count_above_5: entry.count_above_threshold,
    };
    if let Err(e) = sink.put_plug_hourly(name, &summary) {
        warn!("usage flush failed for {} ({}): {}", name, entry.hour_bucket, e);
    }
}
