//! The two clock-aligned aggregation loops.
//!
//! The minute loop owns the usage ledger outright (single writer); the
//! ten-minute loop owns snapshot publication and triggers the daily
//! retention pass. Both advance through off-hours boundaries without doing
//! payload work and exit cooperatively on the shared stop flag.

use crate::comfort;
use crate::rooms::ACTIVE_ROOMS;
use crate::schedule::{
    is_working_hours, next_minute_boundary_ms, next_ten_minute_boundary_ms, report_wake_lag, sleep_until,
};
use crate::services::history::HistoryCollector;
use crate::services::plugs::PlugCollector;
use crate::services::retention::prune_all;
use crate::services::usage::UsageLedger;
use crate::services::weather::WeatherClient;
use crate::store::{ComfortSnapshot, SnapshotSink, day_bucket_id, ten_min_slot};
use crate::utils::now_ms;
use chrono_tz::Tz;
use log::{info, warn};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub struct MinuteLoop {
    pub plugs: PlugCollector,
    pub ledger: UsageLedger,
    pub sink: Arc<dyn SnapshotSink + Send + Sync>,
    pub timezone: Tz,
    pub working_hours: RangeInclusive<u32>,
    pub stop: Arc<AtomicBool>,
}

impl MinuteLoop {
    pub fn run(mut self) {
        info!("minute loop started");
        let mut nominal = now_ms();
        loop {
            let target = next_minute_boundary_ms(nominal);
            if !sleep_until(target, &self.stop) {
                break;
            }
            report_wake_lag("minute", target, now_ms());
            nominal = target;
            self.tick(now_ms());
        }
        // The one mandatory cleanup step: open counters survive shutdown.
        self.ledger.flush_all(self.sink.as_ref(), now_ms());
        info!("minute loop stopped");
    }

    fn tick(&mut self, tick_ms: i64) {
        if !is_working_hours(tick_ms, self.timezone, &self.working_hours) {
            return;
        }
        let statuses = self.plugs.fetch_all();
        self.ledger.observe(&statuses, tick_ms, self.sink.as_ref());
    }
}

pub struct TenMinuteLoop {
    pub history: HistoryCollector,
    pub weather: WeatherClient,
    pub sink: Arc<dyn SnapshotSink + Send + Sync>,
    pub timezone: Tz,
    pub working_hours: RangeInclusive<u32>,
    pub cleanup_slot: String,
    pub retention_days: i64,
    pub stop: Arc<AtomicBool>,
}

impl TenMinuteLoop {
    pub fn run(self) {
        info!("ten-minute loop started");
        let mut nominal = now_ms();
        loop {
            let target = next_ten_minute_boundary_ms(nominal);
            if !sleep_until(target, &self.stop) {
                break;
            }
            report_wake_lag("ten-minute", target, now_ms());
            nominal = target;
            self.tick(now_ms());
        }
        info!("ten-minute loop stopped");
    }

    fn tick(&self, tick_ms: i64) {
        // The retention pass runs at its configured slot even outside the
        // working window (it is usually scheduled at night).
        if ten_min_slot(tick_ms, self.timezone) == self.cleanup_slot {
            info!("running daily retention pass");
            prune_all(self.sink.as_ref(), self.retention_days, tick_ms, self.timezone);
        }

        if is_working_hours(tick_ms, self.timezone, &self.working_hours) {
            self.publish_snapshots(tick_ms);
        }
    }

    /// One outdoor reading shared across all rooms, then one sparse comfort
    /// snapshot per room. Missing inputs shrink the payload, they never
    /// block the write.
    fn publish_snapshots(&self, tick_ms: i64) {
        let outdoor = self.weather.current_temperature();
        let day = day_bucket_id(tick_ms, self.timezone);
        let slot = ten_min_slot(tick_ms, self.timezone);

        for room in ACTIVE_ROOMS {
            let (temperature, humidity) = self.history.latest_pair(room);

            let mut snapshot = ComfortSnapshot {
                timestamp: tick_ms,
                t_amb: temperature,
                rh: humidity,
                ..Default::default()
            };
            if let (Some(t), Some(rh), Some(t_out)) = (temperature, humidity, outdoor) {
                let reading = comfort::compute(t, rh, t_out);
                snapshot.spmv = Some(reading.pmv);
                snapshot.spmv2 = Some(reading.pmv2);
                snapshot.spmv3 = Some(reading.pmv3);
                snapshot.clo_pred = Some(reading.clo_pred);
            }

            if let Err(e) = self.sink.put_comfort_snapshot(room, &day, &slot, &snapshot) {
                warn!("snapshot write failed for {}/{}/{}: {}", room, day, slot, e);
            }
        }
    }
}
