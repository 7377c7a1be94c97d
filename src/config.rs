//! Typed runtime configuration.
//!
//! Resolution precedence is process environment > `.env` file > defaults.
//! The `.env` file is loaded by `main` via dotenvy before `Settings::load`
//! runs; dotenvy never overrides variables already present in the
//! environment, so the precedence falls out of load order.

use std::time::Duration;

use chrono::NaiveDate;

use crate::models::{DayType, CANONICAL_CUTOFFS};

/// Default serving port.
pub const DEFAULT_PORT: u16 = 3030;

/// Default routing worker socket timeout in seconds.
pub const DEFAULT_ROUTING_TIMEOUT_SECS: u64 = 60;

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// PostgreSQL connection URL (requires PostGIS).
    pub database_url: String,
    /// Serving port for the read API.
    pub port: u16,
    /// Ordered routing worker base URLs; order defines affinity lanes.
    pub routing_workers: Vec<String>,
    /// Connect + read timeout for routing requests.
    pub routing_timeout: Duration,
    /// Isochrone cutoffs in minutes.
    pub cutoffs: Vec<u32>,
    /// Fixed calendar date used for weekday departures.
    pub weekday_date: NaiveDate,
    /// Fixed calendar date used for saturday departures.
    pub saturday_date: NaiveDate,
    /// Fixed calendar date used for sunday departures.
    pub sunday_date: NaiveDate,
    /// UTC offset suffix appended to departure timestamps.
    pub tz_offset: String,
    /// Origins selected per batch.
    pub batch_size: usize,
    /// Upper bound on batch-loop iterations.
    pub max_batches: usize,
    /// Age after which a `processing` row is treated as pending again.
    pub stale_horizon: Duration,
    /// Health-probe attempts before giving up on the worker fleet.
    pub health_attempts: u32,
    /// Interval between health-probe attempts.
    pub health_interval: Duration,
    /// Per-host idle connection cap for the routing HTTP client.
    pub http_max_idle_per_host: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let timeout = Duration::from_secs(DEFAULT_ROUTING_TIMEOUT_SECS);
        Self {
            database_url: "postgres://localhost/reachmap".to_string(),
            port: DEFAULT_PORT,
            routing_workers: vec!["http://localhost:8080".to_string()],
            routing_timeout: timeout,
            cutoffs: CANONICAL_CUTOFFS.to_vec(),
            weekday_date: NaiveDate::from_ymd_opt(2025, 6, 11).unwrap(),
            saturday_date: NaiveDate::from_ymd_opt(2025, 6, 14).unwrap(),
            sunday_date: NaiveDate::from_ymd_opt(2025, 6, 15).unwrap(),
            tz_offset: "-05:00".to_string(),
            batch_size: 50,
            max_batches: 500,
            stale_horizon: timeout * 2,
            health_attempts: 30,
            health_interval: Duration::from_secs(10),
            http_max_idle_per_host: 10,
        }
    }
}

impl Settings {
    /// Build settings from the process environment over defaults.
    pub fn load() -> Self {
        let mut settings = Self::default();

        if let Some(url) = env_string("DATABASE_URL") {
            settings.database_url = url;
        }
        if let Some(port) = env_parse::<u16>("PORT") {
            settings.port = port;
        }
        if let Some(workers) = env_string("ROUTING_WORKER_URLS") {
            let urls: Vec<String> = workers
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !urls.is_empty() {
                settings.routing_workers = urls;
            }
        }
        if let Some(secs) = env_parse::<u64>("ROUTING_TIMEOUT_SECS") {
            settings.routing_timeout = Duration::from_secs(secs);
            settings.stale_horizon = Duration::from_secs(secs * 2);
        }
        if let Some(cutoffs) = env_string("CUTOFF_MINUTES") {
            let parsed: Vec<u32> = cutoffs
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                settings.cutoffs = parsed;
            }
        }
        if let Some(date) = env_date("ROUTING_DATE_WEEKDAY") {
            settings.weekday_date = date;
        }
        if let Some(date) = env_date("ROUTING_DATE_SATURDAY") {
            settings.saturday_date = date;
        }
        if let Some(date) = env_date("ROUTING_DATE_SUNDAY") {
            settings.sunday_date = date;
        }
        if let Some(offset) = env_string("ROUTING_TZ_OFFSET") {
            settings.tz_offset = offset;
        }
        if let Some(size) = env_parse::<usize>("BATCH_SIZE") {
            settings.batch_size = size.max(1);
        }
        if let Some(max) = env_parse::<usize>("MAX_BATCHES") {
            settings.max_batches = max.max(1);
        }
        if let Some(secs) = env_parse::<u64>("STALE_HORIZON_SECS") {
            settings.stale_horizon = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse::<u32>("WORKER_HEALTH_ATTEMPTS") {
            settings.health_attempts = attempts.max(1);
        }
        if let Some(secs) = env_parse::<u64>("WORKER_HEALTH_INTERVAL_SECS") {
            settings.health_interval = Duration::from_secs(secs);
        }
        if let Some(cap) = env_parse::<usize>("HTTP_MAX_IDLE_PER_HOST") {
            settings.http_max_idle_per_host = cap;
        }

        settings
    }

    /// The calendar date a day type resolves to inside the routing graph's
    /// validity window.
    pub fn date_for(&self, day_type: DayType) -> NaiveDate {
        match day_type {
            DayType::Weekday => self.weekday_date,
            DayType::Saturday => self.saturday_date,
            DayType::Sunday => self.sunday_date,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|s| s.parse().ok())
}

fn env_date(name: &str) -> Option<NaiveDate> {
    env_string(name).and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_canonical_cutoffs() {
        let settings = Settings::default();
        assert_eq!(settings.cutoffs, vec![15, 30, 45, 60, 90, 120, 150, 180]);
        assert_eq!(settings.routing_timeout, Duration::from_secs(60));
        assert_eq!(settings.stale_horizon, Duration::from_secs(120));
    }

    #[test]
    fn day_type_dates_match_day_of_week() {
        use chrono::Datelike;
        let settings = Settings::default();
        assert_eq!(
            settings.date_for(DayType::Saturday).weekday(),
            chrono::Weekday::Sat
        );
        assert_eq!(
            settings.date_for(DayType::Sunday).weekday(),
            chrono::Weekday::Sun
        );
        let weekday = settings.date_for(DayType::Weekday).weekday();
        assert!(!matches!(
            weekday,
            chrono::Weekday::Sat | chrono::Weekday::Sun
        ));
    }
}
