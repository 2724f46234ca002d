use crate::fetch::FetchClient;
use crate::models::wattsense::{PropertyHistoricalItem, PropertyResponse};
use crate::rooms::sensors_for_room;
use crate::series::{PairedSample, TimedSample, merge_nearest, pad_hold, resample};
use crate::utils::now_ms;
use log::{debug, warn};
use std::collections::HashSet;

const MIN_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 2500;

/// Hard stop for pagination in case the upstream keeps emitting fresh next
/// links; one page already covers the largest configured window.
const MAX_PAGES: usize = 20;

/// Requested page size: enough points to cover the window at the target
/// step, clamped to the API's accepted range.
pub fn page_size(window_ms: i64, step_ms: i64) -> i64 {
    if step_ms <= 0 {
        return MIN_PAGE_SIZE;
    }
    (window_ms / step_ms).clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

/// Pulls raw temperature/humidity points from the telemetry API and drives
/// them through the merge/resample/pad pipeline. Every failure mode ends in
/// an empty series, never an error.
pub struct HistoryCollector {
    client: FetchClient,
    base_url: String,
}

impl HistoryCollector {
    pub fn new(client: FetchClient, base_url: &str) -> Self {
        HistoryCollector {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Most recent (temperature, humidity) reading for a room's sensors.
    pub fn latest_pair(&self, room: &str) -> (Option<f64>, Option<f64>) {
        let Some(binding) = sensors_for_room(room) else {
            warn!("no sensor binding for room {}", room);
            return (None, None);
        };
        (
            self.latest_value(binding.device_id, binding.temperature_id),
            self.latest_value(binding.device_id, binding.humidity_id),
        )
    }

    fn latest_value(&self, device_id: &str, property_id: &str) -> Option<f64> {
        let url = format!("{}/v1/devices/{}/properties/{}", self.base_url, device_id, property_id);
        let query = [("includeHistory", "false".to_string())];
        match self.client.get_json::<PropertyResponse>(&url, &query) {
            Ok(resp) => resp.latest_value().filter(|v| v.is_finite()),
            Err(e) => {
                warn!("latest value fetch failed for {}/{}: {}", device_id, property_id, e);
                None
            }
        }
    }

    /// Uniform temperature/humidity series covering `[now - window, now]`.
    /// Empty when the room is unmapped, either channel has no data, or any
    /// pipeline stage produces nothing.
    pub fn room_series(&self, room: &str, window_ms: i64, step_ms: i64) -> Vec<PairedSample> {
        let Some(binding) = sensors_for_room(room) else {
            warn!("no sensor binding for room {}", room);
            return Vec::new();
        };

        let until = now_ms();
        let since = until - window_ms;
        let size = page_size(window_ms, step_ms);

        let temp = self.property_series(binding.device_id, binding.temperature_id, since, until, size);
        let hum = self.property_series(binding.device_id, binding.humidity_id, since, until, size);
        debug!(
            "room {}: {} temperature points, {} humidity points",
            room,
            temp.len(),
            hum.len()
        );

        let merged = merge_nearest(&temp, &hum);
        if merged.is_empty() {
            return Vec::new();
        }
        let uniform = pad_hold(&resample(&merged, step_ms), step_ms, since, until);

        if let (Some(first), Some(last)) = (uniform.first(), uniform.last()) {
            // A high held share means one of the channels stopped updating.
            let held = uniform
                .windows(2)
                .filter(|w| w[1].temperature == w[0].temperature && w[1].humidity == w[0].humidity)
                .count();
            let pct = 100.0 * held as f64 / uniform.len().saturating_sub(1).max(1) as f64;
            debug!(
                "room {}: uniform series of {} points spanning {}min, {:.0}% held",
                room,
                uniform.len(),
                (last.timestamp - first.timestamp) / 60_000,
                pct
            );
        }
        uniform
    }

    /// Raw points for one property, paginated primary endpoint first, then
    /// the instant endpoint's embedded history as fallback. Sorted ascending.
    fn property_series(&self, device_id: &str, property_id: &str, since: i64, until: i64, size: i64) -> Vec<TimedSample> {
        let mut points = self.paginated_series(device_id, property_id, since, until, size);
        if points.is_empty() {
            points = self.embedded_history(device_id, property_id);
        }
        points.sort_by_key(|p| p.timestamp);
        points
    }

    fn paginated_series(&self, device_id: &str, property_id: &str, since: i64, until: i64, size: i64) -> Vec<TimedSample> {
        let first_url = format!("{}/v1/devices/{}/properties", self.base_url, device_id);
        let first_query = [
            ("since", since.to_string()),
            ("until", until.to_string()),
            ("property", property_id.to_string()),
            ("size", size.to_string()),
        ];

        let mut points = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut next: Option<String> = None;

        for page in 0..MAX_PAGES {
            let response = if page == 0 {
                self.client.get(&first_url, &first_query)
            } else {
                // next is always Some here, the loop breaks otherwise
                let Some(url) = next.as_deref() else { break };
                self.client.get(url, &[])
            };

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    warn!("history page {} failed for {}/{}: {}", page, device_id, property_id, e);
                    break;
                }
            };

            match serde_json::from_str::<Vec<PropertyHistoricalItem>>(&response.body) {
                Ok(items) => {
                    points.extend(items.iter().filter_map(to_timed_sample));
                }
                Err(e) => {
                    warn!("history page {} unparseable for {}/{}: {}", page, device_id, property_id, e);
                    break;
                }
            }

            next = response.next_link.map(|link| self.resolve(&link));
            match &next {
                Some(url) if visited.insert(url.clone()) => {}
                // Exhausted, or the upstream repeated a link.
                _ => break,
            }
        }

        points
    }

    fn embedded_history(&self, device_id: &str, property_id: &str) -> Vec<TimedSample> {
        let url = format!("{}/v1/devices/{}/properties/{}", self.base_url, device_id, property_id);
        let query = [("includeHistory", "true".to_string())];
        match self.client.get_json::<PropertyResponse>(&url, &query) {
            Ok(resp) => resp
                .history
                .map(|h| h.read_values.iter().filter_map(to_timed_sample).collect())
                .unwrap_or_default(),
            Err(e) => {
                warn!("embedded history fetch failed for {}/{}: {}", device_id, property_id, e);
                Vec::new()
            }
        }
    }

    fn resolve(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}{}", self.base_url, link)
        }
    }
}

fn to_timed_sample(item: &PropertyHistoricalItem) -> Option<TimedSample> {
    let value = item.numeric_value().filter(|v| v.is_finite())?;
    Some(TimedSample {
        timestamp: item.timestamp,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchSettings, Permits};
    use std::time::Duration;

    fn collector(base_url: &str) -> HistoryCollector {
        let client = FetchClient::new(
            Permits::new(2),
            FetchSettings {
                base_backoff: Duration::from_millis(5),
                max_retries: 1,
                request_jitter: Duration::from_millis(1),
            },
            None,
        );
        HistoryCollector::new(client, base_url)
    }

    #[test]
    fn page_size_is_clamped_to_the_accepted_range() {
        assert_eq!(page_size(60_000, 60_000), 100);
        assert_eq!(page_size(600 * 60_000, 60_000), 600);
        assert_eq!(page_size(10_000 * 60_000, 60_000), 2500);
        assert_eq!(page_size(60_000, 0), 100);
    }

    #[test]
    fn pagination_follows_the_next_link() {
        let mut server = mockito::Server::new();
        let _page1 = server
            .mock("GET", "/v1/devices/d1/properties")
            .match_query(mockito::Matcher::UrlEncoded("property".into(), "p1".into()))
            .with_status(200)
            .with_header("Link", "</v1/devices/d1/properties?page=2>; rel=\"next\"")
            .with_body(r#"[{"property":"p1","timestamp":1000,"payload":20.0}]"#)
            .create();
        let _page2 = server
            .mock("GET", "/v1/devices/d1/properties")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(r#"[{"property":"p1","timestamp":2000,"payload":21.0}]"#)
            .create();

        let points = collector(&server.url()).property_series("d1", "p1", 0, 10_000, 100);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, 1000);
        assert_eq!(points[1].value, 21.0);
    }

    #[test]
    fn repeated_next_link_terminates_pagination() {
        let mut server = mockito::Server::new();
        let _loop_page = server
            .mock("GET", "/v1/devices/d1/properties")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("Link", "</v1/devices/d1/properties?page=2>; rel=\"next\"")
            .with_body(r#"[{"property":"p1","timestamp":1000,"payload":20.0}]"#)
            .expect(2)
            .create();

        // Page 2 re-advertises itself as next; the visited set stops the loop.
        let points = collector(&server.url()).property_series("d1", "p1", 0, 10_000, 100);
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn falls_back_to_embedded_history_when_pagination_is_empty() {
        let mut server = mockito::Server::new();
        let _primary = server
            .mock("GET", "/v1/devices/d1/properties")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create();
        let _fallback = server
            .mock("GET", "/v1/devices/d1/properties/p1")
            .match_query(mockito::Matcher::UrlEncoded("includeHistory".into(), "true".into()))
            .with_status(200)
            .with_body(
                r#"{"deviceId":"d1","property":"p1","history":{"readValues":[
                    {"timestamp":3000,"payload":"19.5"},
                    {"timestamp":1000,"payload":19.0}
                ]}}"#,
            )
            .create();

        let points = collector(&server.url()).property_series("d1", "p1", 0, 10_000, 100);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, 1000);
        assert_eq!(points[1].value, 19.5);
    }

    #[test]
    fn both_endpoints_failing_yields_an_empty_series() {
        let mut server = mockito::Server::new();
        let _primary = server
            .mock("GET", "/v1/devices/d1/properties")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create();
        let _fallback = server
            .mock("GET", "/v1/devices/d1/properties/p1")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create();

        assert!(collector(&server.url()).property_series("d1", "p1", 0, 10_000, 100).is_empty());
    }

    #[test]
    fn unmapped_room_yields_an_empty_series() {
        let server = mockito::Server::new();
        assert!(collector(&server.url()).room_series("Atlantide", 600_000, 60_000).is_empty());
    }
}
