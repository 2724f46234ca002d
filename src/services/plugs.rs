use crate::fetch::FetchClient;
use crate::models::shelly::{PlugStatus, parse_device_status};
use crate::rooms::{ACTIVE_ROOMS, plug_device_id, plugs_for_room};
use log::{debug, warn};
use std::thread;

/// Pulls point-in-time telemetry for every plug of a room from the Shelly
/// cloud. Individual plug failures become offline statuses; a batch never
/// fails as a whole.
pub struct PlugCollector {
    client: FetchClient,
    base_url: String,
    auth_key: String,
}

impl PlugCollector {
    pub fn new(client: FetchClient, base_url: &str, auth_key: &str) -> Self {
        PlugCollector {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_key: auth_key.to_string(),
        }
    }

    /// One plug's status. Any fetch or parse problem yields an offline
    /// status carrying the reason instead of an error.
    pub fn fetch_plug(&self, name: &str, device_id: &str, room: &str) -> PlugStatus {
        let url = format!("{}/device/status", self.base_url);
        let query = [
            ("id", device_id.to_string()),
            ("auth_key", self.auth_key.clone()),
        ];
        match self.client.get_json::<serde_json::Value>(&url, &query) {
            Ok(body) => parse_device_status(name, device_id, room, &body),
            Err(e) => {
                warn!("plug {} ({}) fetch failed: {}", name, device_id, e);
                PlugStatus::offline(name, device_id, room, e.to_string())
            }
        }
    }

    /// Statuses for every mapped plug of a room, fetched concurrently under
    /// the shared permit. Plug names without a device mapping are skipped
    /// with a warning. Result is sorted by plug name.
    pub fn fetch_room(&self, room: &str) -> Vec<PlugStatus> {
        let mut targets: Vec<(&str, &str)> = Vec::new();
        for name in plugs_for_room(room) {
            match plug_device_id(name) {
                Some(id) => targets.push((name, id)),
                None => warn!("plug {} in room {} has no device mapping, skipping", name, room),
            }
        }

        let mut statuses: Vec<PlugStatus> = thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter()
                .map(|&(name, id)| scope.spawn(move || self.fetch_plug(name, id, room)))
                .collect();
            handles
                .into_iter()
                .filter_map(|h| match h.join() {
                    Ok(status) => Some(status),
                    Err(_) => {
                        warn!("plug fetch task panicked in room {}", room);
                        None
                    }
                })
                .collect()
        });
        statuses.sort_by(|a, b| a.name.cmp(&b.name));

        let mut powers: Vec<f64> = statuses.iter().filter(|s| s.online).map(|s| s.power_w).collect();
        powers.sort_by(|a, b| a.total_cmp(b));
        if powers.is_empty() {
            debug!("room {}: 0/{} plugs online", room, statuses.len());
        } else {
            let mean = powers.iter().sum::<f64>() / powers.len() as f64;
            let p90 = powers[((powers.len() - 1) * 9) / 10];
            debug!(
                "room {}: {}/{} plugs online, power mean {:.1}W p90 {:.1}W",
                room,
                powers.len(),
                statuses.len(),
                mean,
                p90
            );
        }

        statuses
    }

    /// Statuses for every configured room.
    pub fn fetch_all(&self) -> Vec<PlugStatus> {
        let mut all = Vec::new();
        for room in ACTIVE_ROOMS {
            all.extend(self.fetch_room(room));
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchSettings, Permits};
    use std::time::Duration;

    fn collector(base_url: &str) -> PlugCollector {
        let client = FetchClient::new(
            Permits::new(2),
            FetchSettings {
                base_backoff: Duration::from_millis(5),
                max_retries: 1,
                request_jitter: Duration::from_millis(1),
            },
            None,
        );
        PlugCollector::new(client, base_url, "test-auth")
    }

    #[test]
    fn fetch_plug_parses_a_live_status() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/device/status")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("id".into(), "8cbfeaa953c8".into()),
                mockito::Matcher::UrlEncoded("auth_key".into(), "test-auth".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"data":{"device_status":{"switch:0":{"apower":12.5,"output":true}}}}"#)
            .create();

        let st = collector(&server.url()).fetch_plug("PRESA_NICOLE", "8cbfeaa953c8", "Nicole");
        assert!(st.online);
        assert_eq!(st.power_w, 12.5);
        assert_eq!(st.room, "Nicole");
    }

    #[test]
    fn fetch_plug_maps_failures_to_offline() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/device/status")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create();

        let st = collector(&server.url()).fetch_plug("PRESA_SERENA", "8cbfeaa0fb4c", "Serena");
        assert!(!st.online);
        assert!(st.error.as_deref().unwrap_or("").contains("404"));
    }

    #[test]
    fn fetch_room_sorts_by_plug_name() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/device/status")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data":{"device_status":{"switch:0":{"apower":1.0}}}}"#)
            .expect_at_least(2)
            .create();

        let statuses = collector(&server.url()).fetch_room("Nicole");
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "PRESA_CECILIA");
        assert_eq!(statuses[1].name, "PRESA_NICOLE");
    }
}
