//! Reconciliation of two independently sampled time series onto a uniform
//! grid: nearest-neighbor merge, fixed-step resampling (bucket mean) and
//! hold-last-value padding.
//!
//! Timestamps are epoch milliseconds as delivered by the telemetry API.

use log::debug;

/// One scalar reading tied to a point in time.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimedSample {
    pub timestamp: i64,
    pub value: f64,
}

/// A temperature/humidity pair produced by [`merge_nearest`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PairedSample {
    pub timestamp: i64,
    pub temperature: f64,
    pub humidity: f64,
}

/// Pair every temperature sample with the humidity sample closest in time.
///
/// There is no maximum-distance cutoff: a humidity sample arbitrarily far
/// away still matches (matched-delta percentiles are logged at debug so a
/// stalled channel is visible). Temperature samples keep the pair's
/// timestamp. Either side empty yields an empty result.
pub fn merge_nearest(temp: &[TimedSample], hum: &[TimedSample]) -> Vec<PairedSample> {
    if temp.is_empty() || hum.is_empty() {
        return Vec::new();
    }

    let mut deltas: Vec<i64> = Vec::with_capacity(temp.len());
    let mut merged: Vec<PairedSample> = temp
        .iter()
        .filter_map(|t| {
            let h = hum.iter().min_by_key(|h| (h.timestamp - t.timestamp).abs())?;
            deltas.push((h.timestamp - t.timestamp).abs());
            Some(PairedSample {
                timestamp: t.timestamp,
                temperature: t.value,
                humidity: h.value,
            })
        })
        .collect();
    merged.sort_by_key(|p| p.timestamp);

    if !deltas.is_empty() {
        deltas.sort_unstable();
        let p50 = deltas[deltas.len() / 2];
        let p90 = deltas[(deltas.len() * 9) / 10];
        debug!("merge dt(ms): p50={} p90={} max={}", p50, p90, deltas[deltas.len() - 1]);
    }

    merged
}

/// Resample onto a fixed step: one sample per non-empty bucket at
/// `bucket * step`, value = per-field arithmetic mean of the bucket's
/// contributors. Empty buckets are absent, not filled.
pub fn resample(series: &[PairedSample], step_ms: i64) -> Vec<PairedSample> {
    if series.is_empty() || step_ms <= 0 {
        return series.to_vec();
    }

    let mut out: Vec<PairedSample> = Vec::new();
    // Input is time-ordered, so one pass per contiguous bucket run suffices.
    let mut sorted = series.to_vec();
    sorted.sort_by_key(|p| p.timestamp);

    let mut i = 0;
    while i < sorted.len() {
        let bucket = sorted[i].timestamp.div_euclid(step_ms);
        let mut t_sum = 0.0;
        let mut h_sum = 0.0;
        let mut n = 0;
        while i < sorted.len() && sorted[i].timestamp.div_euclid(step_ms) == bucket {
            t_sum += sorted[i].temperature;
            h_sum += sorted[i].humidity;
            n += 1;
            i += 1;
        }
        out.push(PairedSample {
            timestamp: bucket * step_ms,
            temperature: t_sum / n as f64,
            humidity: h_sum / n as f64,
        });
    }

    out
}

/// Pad a resampled series to cover every bucket of `[start, end]` with
/// hold-last-value semantics. Buckets before the first real sample emit
/// nothing (no forward-fill from the future), so the output's prefix may be
/// shorter than the full range.
pub fn pad_hold(series: &[PairedSample], step_ms: i64, start: i64, end: i64) -> Vec<PairedSample> {
    if series.is_empty() || step_ms <= 0 {
        return series.to_vec();
    }

    let mut by_bucket = std::collections::HashMap::new();
    for p in series {
        by_bucket.insert(p.timestamp.div_euclid(step_ms), *p);
    }

    let mut out = Vec::new();
    let mut last: Option<PairedSample> = None;
    let end_bucket = end.div_euclid(step_ms);
    let mut b = start.div_euclid(step_ms);
    while b <= end_bucket {
        let ts = b * step_ms;
        let item = by_bucket.get(&b).copied().or_else(|| {
            last.map(|mut held| {
                held.timestamp = ts;
                held
            })
        });
        if let Some(item) = item {
            out.push(item);
            last = Some(item);
        }
        b += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: &[(i64, f64)]) -> Vec<TimedSample> {
        v.iter().map(|&(timestamp, value)| TimedSample { timestamp, value }).collect()
    }

    #[test]
    fn merge_singletons() {
        let m = merge_nearest(&ts(&[(0, 20.0)]), &ts(&[(0, 50.0)]));
        assert_eq!(
            m,
            vec![PairedSample {
                timestamp: 0,
                temperature: 20.0,
                humidity: 50.0
            }]
        );
    }

    #[test]
    fn merge_has_no_distance_cutoff() {
        // Humidity ten minutes away still pairs with every temperature point.
        let m = merge_nearest(&ts(&[(0, 20.0), (60_000, 21.0)]), &ts(&[(600_000, 55.0)]));
        assert_eq!(m.len(), 2);
        assert!(m.iter().all(|p| p.humidity == 55.0));
        assert_eq!(m[0].timestamp, 0);
        assert_eq!(m[1].timestamp, 60_000);
    }

    #[test]
    fn merge_empty_side_short_circuits() {
        assert!(merge_nearest(&[], &ts(&[(0, 50.0)])).is_empty());
        assert!(merge_nearest(&ts(&[(0, 20.0)]), &[]).is_empty());
    }

    #[test]
    fn merge_picks_nearest_neighbor() {
        let m = merge_nearest(
            &ts(&[(100, 20.0)]),
            &ts(&[(0, 40.0), (90, 50.0), (300, 60.0)]),
        );
        assert_eq!(m[0].humidity, 50.0);
    }

    #[test]
    fn resample_averages_within_bucket() {
        let series = vec![
            PairedSample {
                timestamp: 10,
                temperature: 10.0,
                humidity: 40.0,
            },
            PairedSample {
                timestamp: 20,
                temperature: 20.0,
                humidity: 60.0,
            },
        ];
        let r = resample(&series, 100);
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].timestamp, 0);
        assert_eq!(r[0].temperature, 15.0);
        assert_eq!(r[0].humidity, 50.0);
    }

    #[test]
    fn resample_leaves_gaps_absent() {
        let series = vec![
            PairedSample {
                timestamp: 0,
                temperature: 10.0,
                humidity: 40.0,
            },
            PairedSample {
                timestamp: 250,
                temperature: 12.0,
                humidity: 42.0,
            },
        ];
        let r = resample(&series, 100);
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].timestamp, 0);
        assert_eq!(r[1].timestamp, 200);
    }

    #[test]
    fn pad_holds_last_value_across_gaps() {
        let series = vec![
            PairedSample {
                timestamp: 0,
                temperature: 18.0,
                humidity: 45.0,
            },
            PairedSample {
                timestamp: 5,
                temperature: 22.0,
                humidity: 55.0,
            },
        ];
        let p = pad_hold(&series, 1, 0, 5);
        assert_eq!(p.len(), 6);
        for item in &p[1..5] {
            assert_eq!(item.temperature, 18.0);
            assert_eq!(item.humidity, 45.0);
        }
        assert_eq!(p[5].temperature, 22.0);
        // Timestamps are strictly increasing with exact spacing.
        for w in p.windows(2) {
            assert_eq!(w[1].timestamp - w[0].timestamp, 1);
        }
    }

    #[test]
    fn pad_emits_nothing_before_first_real_sample() {
        let series = vec![PairedSample {
            timestamp: 3,
            temperature: 20.0,
            humidity: 50.0,
        }];
        let p = pad_hold(&series, 1, 0, 5);
        assert_eq!(p.len(), 3);
        assert_eq!(p[0].timestamp, 3);
        assert_eq!(p[2].timestamp, 5);
    }

    #[test]
    fn resample_then_pad_is_idempotent_on_uniform_input() {
        let step = 60_000;
        let uniform: Vec<PairedSample> = (0..10)
            .map(|i| PairedSample {
                timestamp: i * step,
                temperature: 20.0 + i as f64,
                humidity: 50.0,
            })
            .collect();
        let again = pad_hold(&resample(&uniform, step), step, 0, 9 * step);
        assert_eq!(again, uniform);
    }
}
