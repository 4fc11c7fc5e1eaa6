//! Configuration loaded from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `TOURGUARD_PORT` | 3000 |
//! | `TOURGUARD_DATABASE_URL` | `sqlite:tourguard.db?mode=rwc` |
//! | `TOURGUARD_ZONES_PATH` | `data/zones.json` |
//! | `TOURGUARD_SWEEP_SECONDS` | 60 |
//! | `TOURGUARD_INACTIVITY_MINUTES` | 120 |
//! | `TOURGUARD_MOVEMENT_RADIUS_METERS` | 50 |
//! | `TOURGUARD_ROUTE_CORRIDOR_METERS` | 5000 |
//! | `TOURGUARD_PERSIST_ATTEMPTS` | 3 |
//! | `TOURGUARD_PERSIST_TIMEOUT_MS` | 2000 |
//!
//! Unparseable values fall back to the default.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::retry::RetryPolicy;
use crate::status::DEFAULT_INACTIVITY_MINUTES;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_PATH: &str = "sqlite:tourguard.db?mode=rwc";

/// Default location of the geofence catalog.
pub const DEFAULT_ZONES_PATH: &str = "data/zones.json";

/// Thresholds and retry behavior of the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Idle time after which a tourist is inactive.
    pub inactivity_threshold: Duration,

    /// Movement smaller than this does not count as activity.
    pub movement_radius_meters: f64,

    /// Maximum distance from the nearest planned waypoint before a route
    /// deviation is raised.
    pub route_corridor_meters: f64,

    /// Retries for persistence.
    pub retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold: Duration::minutes(DEFAULT_INACTIVITY_MINUTES),
            movement_radius_meters: 50.0,
            route_corridor_meters: 5_000.0,
            retry: RetryPolicy::default(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub zones_path: PathBuf,
    pub sweep_interval: StdDuration,
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps variable names to
    /// values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = MonitorConfig::default();

        let retry = RetryPolicy {
            max_attempts: parsed(&lookup, "TOURGUARD_PERSIST_ATTEMPTS")
                .unwrap_or(defaults.retry.max_attempts),
            attempt_timeout: parsed(&lookup, "TOURGUARD_PERSIST_TIMEOUT_MS")
                .map(StdDuration::from_millis)
                .unwrap_or(defaults.retry.attempt_timeout),
            ..defaults.retry.clone()
        };

        let monitor = MonitorConfig {
            inactivity_threshold: parsed::<i64>(&lookup, "TOURGUARD_INACTIVITY_MINUTES")
                .filter(|minutes| *minutes > 0)
                .map(Duration::minutes)
                .unwrap_or(defaults.inactivity_threshold),
            movement_radius_meters: parsed(&lookup, "TOURGUARD_MOVEMENT_RADIUS_METERS")
                .unwrap_or(defaults.movement_radius_meters),
            route_corridor_meters: parsed(&lookup, "TOURGUARD_ROUTE_CORRIDOR_METERS")
                .unwrap_or(defaults.route_corridor_meters),
            retry,
        };

        Self {
            port: parsed(&lookup, "TOURGUARD_PORT").unwrap_or(DEFAULT_PORT),
            database_url: lookup("TOURGUARD_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            zones_path: lookup("TOURGUARD_ZONES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ZONES_PATH)),
            sweep_interval: StdDuration::from_secs(
                parsed(&lookup, "TOURGUARD_SWEEP_SECONDS")
                    .unwrap_or(60u64)
                    .max(1),
            ),
            monitor,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}
