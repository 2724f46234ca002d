pub mod models {
    pub mod shelly;
    pub mod wattsense;
}

pub mod comfort;
pub mod config;
pub mod fetch;
pub mod rooms;
pub mod schedule;
pub mod series;
pub mod signing;
pub mod store;
pub mod utils;
pub mod services {
    pub mod aggregate;
    pub mod history;
    pub mod plugs;
    pub mod retention;
    pub mod usage;
    pub mod weather;
}

use crate::config::Config;
use crate::fetch::{FetchClient, FetchSettings, Permits};
use crate::services::aggregate::{MinuteLoop, TenMinuteLoop};
use crate::services::history::HistoryCollector;
use crate::services::plugs::PlugCollector;
use crate::services::usage::UsageLedger;
use crate::services::weather::WeatherClient;
use crate::signing::RequestSigner;
use crate::store::{RtdbStore, SnapshotSink};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (tz={}, working_hours={}..={}, threshold={}W, retention={}d, cleanup_slot={}, concurrency={}, backoff={}ms, retries={}, jitter={}ms)",
        cfg.timezone,
        cfg.working_hours.start(),
        cfg.working_hours.end(),
        cfg.power_threshold_w,
        cfg.retention_days,
        cfg.cleanup_slot,
        cfg.max_concurrency,
        cfg.backoff_base.as_millis(),
        cfg.max_retries,
        cfg.request_jitter.as_millis()
    );

    // 2) Shared fetch permit pool plus one client per upstream
    let permits = Permits::new(cfg.max_concurrency);
    let settings = FetchSettings {
        base_backoff: cfg.backoff_base,
        max_retries: cfg.max_retries,
        request_jitter: cfg.request_jitter,
    };
    let wattsense_client = FetchClient::new(
        permits.clone(),
        settings.clone(),
        Some(RequestSigner::new(&cfg.wattsense_api_key, &cfg.wattsense_api_secret)),
    );
    let shelly_client = FetchClient::new(permits.clone(), settings.clone(), None);
    let weather_http = FetchClient::new(permits, settings, None);

    // 3) Persistence sink
    let sink: Arc<dyn SnapshotSink + Send + Sync> = Arc::new(RtdbStore::new(&cfg.store_base_url));

    // 4) Cooperative shutdown flag
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            stop.store(true, Ordering::Relaxed);
        })
        .map_err(|e| format!("Installing the shutdown handler failed: {}", e))?;
    }

    // 5) The two aggregation loops
    let minute = MinuteLoop {
        plugs: PlugCollector::new(shelly_client, &cfg.shelly_base_url, &cfg.shelly_auth_key),
        ledger: UsageLedger::new(cfg.power_threshold_w, cfg.timezone),
        sink: sink.clone(),
        timezone: cfg.timezone,
        working_hours: cfg.working_hours.clone(),
        stop: stop.clone(),
    };
    let ten_minute = TenMinuteLoop {
        history: HistoryCollector::new(wattsense_client, &cfg.wattsense_base_url),
        weather: WeatherClient::new(
            weather_http,
            &cfg.weather_base_url,
            cfg.weather_latitude,
            cfg.weather_longitude,
        ),
        sink,
        timezone: cfg.timezone,
        working_hours: cfg.working_hours.clone(),
        cleanup_slot: cfg.cleanup_slot.clone(),
        retention_days: cfg.retention_days,
        stop,
    };

    let minute_handle = thread::Builder::new()
        .name("minute-loop".to_string())
        .spawn(move || minute.run())
        .map_err(|e| format!("Spawning the minute loop failed: {}", e))?;
    let ten_minute_handle = thread::Builder::new()
        .name("ten-minute-loop".to_string())
        .spawn(move || ten_minute.run())
        .map_err(|e| format!("Spawning the ten-minute loop failed: {}", e))?;

    minute_handle.join().map_err(|_| "minute loop panicked".to_string())?;
    ten_minute_handle
        .join()
        .map_err(|_| "ten-minute loop panicked".to_string())?;
    info!("Aggregation stopped cleanly");
    Ok(())
}

fn configure_env_from_cli() -> Result<Option<PathBuf>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                env_file = Some(PathBuf::from(&s["--env-file=".len()..]));
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    let path = match env_file {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            path
        }
        None => {
            let default_path = std::env::current_dir()
                .map_err(|e| format!("unable to read current directory: {}", e))?
                .join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            default_path
        }
    };
    load_env_file(&path)?;
    Ok(Some(path))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
        let Some((key, raw_value)) = assignment.split_once('=') else {
            return Err(format!("{}:{}: missing '=' in assignment", path.display(), index + 1));
        };
        let key = key.trim();
        if key.is_empty() || key.chars().any(|c| c.is_whitespace()) {
            return Err(format!(
                "{}:{}: invalid environment variable name",
                path.display(),
                index + 1
            ));
        }
        let value =
            parse_env_value(raw_value).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?;
        // Preserve any value that was already supplied via the process environment.
        if std::env::var_os(key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    Ok(())
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if let Some(rest) = trimmed.strip_prefix(quote) {
            return match rest.strip_suffix(quote) {
                Some(inner) if !inner.contains(quote) => Ok(inner.to_string()),
                _ => Err(format!("unterminated {}-quoted value", quote)),
            };
        }
    }
    Ok(trimmed.splitn(2, '#').next().unwrap_or_default().trim_end().to_string())
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(path) => path,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(path) = loaded_env.as_ref() {
        info!("Environment loaded from: {}", path.display());
    }

    info!(
        "vitality-agg {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
