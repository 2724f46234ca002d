use crate::rooms::ACTIVE_ROOMS;
use crate::store::SnapshotSink;
use chrono::{Duration, TimeZone};
use chrono_tz::Tz;
use log::{info, warn};

/// Day key below which partitions are deleted: `today - retention_days`,
/// rendered in the configured timezone. Keys are zero-padded ISO dates, so
/// the lexicographic comparison in [`prune_room`] is also chronological.
pub fn cutoff_day(today_ms: i64, retention_days: i64, tz: Tz) -> String {
    tz.timestamp_millis_opt(today_ms)
        .single()
        .map(|dt| (dt - Duration::days(retention_days)).format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Delete every persisted day-partition of a room older than the cutoff.
/// Returns the number of deleted partitions; listing or delete failures are
/// logged and do not abort the remaining deletions.
pub fn prune_room(sink: &dyn SnapshotSink, room: &str, retention_days: i64, today_ms: i64, tz: Tz) -> usize {
    let cutoff = cutoff_day(today_ms, retention_days, tz);
    if cutoff.is_empty() {
        warn!("could not compute retention cutoff for room {}", room);
        return 0;
    }

    let days = match sink.list_snapshot_days(room) {
        Ok(days) => days,
        Err(e) => {
            warn!("listing snapshot days failed for room {}: {}", room, e);
            return 0;
        }
    };

    let mut deleted = 0;
    for day in days.iter().filter(|day| day.as_str() < cutoff.as_str()) {
        match sink.delete_snapshot_day(room, day) {
            Ok(()) => deleted += 1,
            Err(e) => warn!("deleting {}/{} failed: {}", room, day, e),
        }
    }
    if deleted > 0 {
        info!("room {}: pruned {} day partitions before {}", room, deleted, cutoff);
    }
    deleted
}

/// Daily retention pass over every configured room.
pub fn prune_all(sink: &dyn SnapshotSink, retention_days: i64, today_ms: i64, tz: Tz) {
    for room in ACTIVE_ROOMS {
        prune_room(sink, room, retention_days, today_ms, tz);
    }
}
