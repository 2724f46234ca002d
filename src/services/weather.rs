use crate::fetch::FetchClient;
use log::warn;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: Option<CurrentBlock>,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    #[serde(default)]
    temperature_2m: Option<f64>,
}

/// Outdoor temperature source. One reading is shared across every room in a
/// ten-minute cycle, so this is called once per tick.
pub struct WeatherClient {
    client: FetchClient,
    base_url: String,
    latitude: f64,
    longitude: f64,
}

impl WeatherClient {
    pub fn new(client: FetchClient, base_url: &str, latitude: f64, longitude: f64) -> Self {
        WeatherClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            latitude,
            longitude,
        }
    }

    /// Current outdoor temperature in Celsius, or None when the upstream is
    /// unreachable or returns something unusable. Never fails the tick.
    pub fn current_temperature(&self) -> Option<f64> {
        let url = format!("{}/v1/forecast", self.base_url);
        let query = [
            ("latitude", self.latitude.to_string()),
            ("longitude", self.longitude.to_string()),
            ("current", "temperature_2m".to_string()),
        ];
        match self.client.get_json::<ForecastResponse>(&url, &query) {
            Ok(resp) => resp
                .current
                .and_then(|c| c.temperature_2m)
                .filter(|t| t.is_finite()),
            Err(e) => {
                warn!("weather fetch failed: {}", e);
                None
            }
        }
    }
}
