//! Minimal runtime configuration helpers.
//! Secrets come from the environment; everything else has a deployment default.

use chrono_tz::Tz;
use std::ops::RangeInclusive;
use std::time::Duration;

pub const DEFAULT_WATTSENSE_BASE_URL: &str = "https://api.wattsense.com";
pub const DEFAULT_SHELLY_BASE_URL: &str = "https://shelly-78-eu.shelly.cloud";
pub const DEFAULT_WEATHER_BASE_URL: &str = "https://api.open-meteo.com";
pub const DEFAULT_TIMEZONE: &str = "Europe/Rome";
pub const DEFAULT_WORKING_HOURS: RangeInclusive<u32> = 8..=19;
pub const DEFAULT_POWER_THRESHOLD_W: f64 = 5.0;
pub const DEFAULT_RETENTION_DAYS: i64 = 90;
pub const DEFAULT_CLEANUP_SLOT: &str = "03:10";
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 350;
pub const DEFAULT_MAX_RETRIES: u32 = 4;
pub const DEFAULT_REQUEST_JITTER_MS: u64 = 120;
pub const DEFAULT_WEATHER_LATITUDE: f64 = 43.6167;
pub const DEFAULT_WEATHER_LONGITUDE: f64 = 13.5167;

#[derive(Debug, Clone)]
pub struct Config {
    /// Wattsense API key/secret pair for HMAC request signing.
    pub wattsense_api_key: String,
    pub wattsense_api_secret: String,
    /// Shelly cloud auth key, passed as a form parameter.
    pub shelly_auth_key: String,
    /// Base URL of the Firebase Realtime Database instance.
    pub store_base_url: String,
    pub wattsense_base_url: String,
    pub shelly_base_url: String,
    pub weather_base_url: String,
    /// Timezone in which buckets, slots and the working window are evaluated.
    pub timezone: Tz,
    /// Local hours (inclusive) during which the loops do work.
    pub working_hours: RangeInclusive<u32>,
    /// Power above this counts a minute as active usage.
    pub power_threshold_w: f64,
    pub retention_days: i64,
    /// Ten-minute slot at which the daily retention pass runs.
    pub cleanup_slot: String,
    pub max_concurrency: usize,
    pub backoff_base: Duration,
    pub max_retries: u32,
    pub request_jitter: Duration,
    pub weather_latitude: f64,
    pub weather_longitude: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let wattsense_api_key = required("WATTSENSE_API_KEY")?;
        let wattsense_api_secret = required("WATTSENSE_API_SECRET")?;
        let shelly_auth_key = required("SHELLY_AUTH_KEY")?;
        let store_base_url = required("STORE_BASE_URL")?;

        let timezone_name = std::env::var("AGG_TIMEZONE").unwrap_or_else(|_| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|_| format!("AGG_TIMEZONE is not a valid IANA timezone: {}", timezone_name))?;

        let start_hour = parsed_or("WORKING_HOURS_START", *DEFAULT_WORKING_HOURS.start());
        let end_hour = parsed_or("WORKING_HOURS_END", *DEFAULT_WORKING_HOURS.end());
        if start_hour > end_hour || end_hour > 23 {
            return Err(format!(
                "WORKING_HOURS_START..WORKING_HOURS_END must be a valid hour range, got {}..={}",
                start_hour, end_hour
            ));
        }

        let retention_days = parsed_or("RETENTION_DAYS", DEFAULT_RETENTION_DAYS);
        if retention_days < 1 {
            return Err("RETENTION_DAYS must be at least 1".to_string());
        }

        Ok(Config {
            wattsense_api_key,
            wattsense_api_secret,
            shelly_auth_key,
            store_base_url,
            wattsense_base_url: url_or("WATTSENSE_BASE_URL", DEFAULT_WATTSENSE_BASE_URL),
            shelly_base_url: url_or("SHELLY_BASE_URL", DEFAULT_SHELLY_BASE_URL),
            weather_base_url: url_or("WEATHER_BASE_URL", DEFAULT_WEATHER_BASE_URL),
            timezone,
            working_hours: start_hour..=end_hour,
            power_threshold_w: parsed_or("POWER_THRESHOLD_W", DEFAULT_POWER_THRESHOLD_W),
            retention_days,
            cleanup_slot: std::env::var("CLEANUP_SLOT").unwrap_or_else(|_| DEFAULT_CLEANUP_SLOT.to_string()),
            max_concurrency: parsed_or("MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY).max(1),
            backoff_base: Duration::from_millis(parsed_or("BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS)),
            max_retries: parsed_or("MAX_RETRIES", DEFAULT_MAX_RETRIES),
            request_jitter: Duration::from_millis(parsed_or("REQUEST_JITTER_MS", DEFAULT_REQUEST_JITTER_MS)),
            weather_latitude: parsed_or("WEATHER_LATITUDE", DEFAULT_WEATHER_LATITUDE),
            weather_longitude: parsed_or("WEATHER_LONGITUDE", DEFAULT_WEATHER_LONGITUDE),
        })
    }
}

fn required(name: &str) -> Result<String, String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("Missing required environment variable {}", name)),
    }
}

fn url_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
