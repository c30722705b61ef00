use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime};
use thiserror::Error;

use crate::engine::{BusinessHours, InvalidHours};

const PREFIX: &str = "CHARGEBOOK_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?}")]
    Invalid { key: String, value: String },
    #[error("business hours: {0}")]
    Hours(#[from] InvalidHours),
}

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub tz_offset: FixedOffset,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub slot_minutes: u32,
    pub lock_timeout: Duration,
    pub stations: u32,
    pub compact_threshold: u64,
    pub max_connections: usize,
    pub admin_token: String,
    pub cors_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Keys are passed with the
    /// `CHARGEBOOK_` prefix applied.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(&format!("{PREFIX}{name}"));

        let tz_offset = match get("TZ_OFFSET") {
            Some(raw) => parse_offset(&raw).ok_or_else(|| invalid("TZ_OFFSET", &raw))?,
            None => FixedOffset::east_opt(9 * 3600).ok_or_else(|| invalid("TZ_OFFSET", "+09:00"))?,
        };
        let lock_timeout_ms: u64 = parse_or(&get, "LOCK_TIMEOUT_MS", 2000)?;

        Ok(Self {
            port: parse_or(&get, "PORT", 8080)?,
            bind: get("BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".into())),
            metrics_port: get("METRICS_PORT")
                .map(|raw| raw.parse().map_err(|_| invalid("METRICS_PORT", &raw)))
                .transpose()?,
            tz_offset,
            open: time_or(&get, "OPEN", 9)?,
            close: time_or(&get, "CLOSE", 22)?,
            slot_minutes: parse_or(&get, "SLOT_MINUTES", 30)?,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            stations: parse_or(&get, "STATIONS", 4)?,
            compact_threshold: parse_or(&get, "COMPACT_THRESHOLD", 1000)?,
            max_connections: parse_or(&get, "MAX_CONNECTIONS", 256)?,
            admin_token: get("ADMIN_TOKEN").unwrap_or_else(|| "admin-demo-token".into()),
            cors_origins: get("CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn business_hours(&self) -> Result<BusinessHours, ConfigError> {
        Ok(BusinessHours::new(self.open, self.close, self.slot_minutes)?)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: format!("{PREFIX}{name}"),
        value: value.to_string(),
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(name, &raw)),
        None => Ok(default),
    }
}

fn time_or(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default_hour: u32,
) -> Result<NaiveTime, ConfigError> {
    match get(name) {
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| invalid(name, &raw)),
        None => NaiveTime::from_hms_opt(default_hour, 0, 0).ok_or_else(|| invalid(name, "")),
    }
}

/// A fixed UTC offset such as `+09:00`, or `Z`/`UTC` for zero.
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    raw.parse().ok()
}
