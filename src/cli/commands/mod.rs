//! Command implementations.

pub mod batch;
pub mod ingest;
pub mod init;
pub mod serve;

use chrono::NaiveTime;

use crate::models::{CacheKey, DayType, TravelMode};

/// Parse the mode/time/day-type argument triple into a cache key.
pub fn parse_cache_key(mode: &str, time: &str, day_type: &str) -> anyhow::Result<CacheKey> {
    let mode = TravelMode::from_str(mode)
        .ok_or_else(|| anyhow::anyhow!("Unknown mode '{}' (transit, transit-bike, bike, walk)", mode))?;
    let departure = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .map_err(|_| anyhow::anyhow!("Time must be HH:MM:SS, got '{}'", time))?;
    let day_type = DayType::from_str(day_type)
        .ok_or_else(|| anyhow::anyhow!("Unknown day type '{}' (weekday, saturday, sunday)", day_type))?;
    Ok(CacheKey::new(mode, departure, day_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_parsing() {
        let key = parse_cache_key("transit", "10:00:00", "weekday").unwrap();
        assert_eq!(key.mode, TravelMode::Transit);
        assert_eq!(key.day_type, DayType::Weekday);

        assert!(parse_cache_key("hovercraft", "10:00:00", "weekday").is_err());
        assert!(parse_cache_key("transit", "10am", "weekday").is_err());
        assert!(parse_cache_key("transit", "10:00:00", "friday").is_err());
    }
}
