//! Domain types shared across the pipeline, store and serving layer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// The eight canonical cutoffs, in minutes.
pub const CANONICAL_CUTOFFS: [u32; 8] = [15, 30, 45, 60, 90, 120, 150, 180];

/// The largest cutoff; an empty polygon at this cutoff marks a truncated search.
pub const MAX_CUTOFF_MINUTES: u32 = 180;

/// Region tags batched first, in fixed priority order.
pub const PRIORITY_REGIONS: [&str; 5] = [
    "Manhattan",
    "Brooklyn",
    "Queens",
    "Bronx",
    "Staten Island",
];

/// Travel mode dimension of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TravelMode {
    Transit,
    TransitBike,
    Bike,
    Walk,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Transit => "transit",
            TravelMode::TransitBike => "transit-bike",
            TravelMode::Bike => "bike",
            TravelMode::Walk => "walk",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "transit" => Some(TravelMode::Transit),
            "transit-bike" | "transit_bike" => Some(TravelMode::TransitBike),
            "bike" => Some(TravelMode::Bike),
            "walk" => Some(TravelMode::Walk),
            _ => None,
        }
    }

    pub fn all() -> [TravelMode; 4] {
        [
            TravelMode::Transit,
            TravelMode::TransitBike,
            TravelMode::Bike,
            TravelMode::Walk,
        ]
    }

    /// Human-readable label for the mode listing endpoint.
    pub fn label(&self) -> &'static str {
        match self {
            TravelMode::Transit => "Transit + walking",
            TravelMode::TransitBike => "Transit + bike access",
            TravelMode::Bike => "Bike only",
            TravelMode::Walk => "Walking only",
        }
    }
}

impl fmt::Display for TravelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day-of-week class of a cache key. Selects a fixed calendar date inside
/// the routing graph's validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayType {
    Weekday,
    Saturday,
    Sunday,
}

impl DayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayType::Weekday => "weekday",
            DayType::Saturday => "saturday",
            DayType::Sunday => "sunday",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "weekday" => Some(DayType::Weekday),
            "saturday" => Some(DayType::Saturday),
            "sunday" => Some(DayType::Sunday),
            _ => None,
        }
    }
}

impl fmt::Display for DayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-origin dimensions of a computation request. Together with an origin id
/// this identifies one cached isochrone set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub mode: TravelMode,
    pub departure: NaiveTime,
    pub day_type: DayType,
}

impl CacheKey {
    pub fn new(mode: TravelMode, departure: NaiveTime, day_type: DayType) -> Self {
        Self {
            mode,
            departure,
            day_type,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} ({})",
            self.mode,
            self.departure.format("%H:%M:%S"),
            self.day_type
        )
    }
}

/// A street intersection origin. Immutable after ingest.
#[derive(Debug, Clone, Serialize)]
pub struct Intersection {
    pub id: i32,
    pub osm_node_id: i64,
    pub name: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub borough: String,
    pub sample_group: i32,
}

/// A GTFS transit stop, served raw by the query layer.
#[derive(Debug, Clone, Serialize)]
pub struct TransitStop {
    pub id: i32,
    pub gtfs_stop_id: String,
    pub stop_name: String,
    pub lat: f64,
    pub lng: f64,
    pub stop_type: String,
    pub agency: String,
}

/// Batch-status state machine values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Pending => "pending",
            BatchState::Processing => "processing",
            BatchState::Completed => "completed",
            BatchState::Failed => "failed",
        }
    }
}

/// Cutoff minutes → GeoJSON geometry, as returned by the routing client and
/// consumed by the store.
pub type BandMap = BTreeMap<u32, serde_json::Value>;

/// A geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bbox {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Per-mode band row statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ModeStats {
    pub mode: String,
    pub band_rows: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips() {
        for mode in TravelMode::all() {
            assert_eq!(TravelMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(TravelMode::from_str("driving"), None);
    }

    #[test]
    fn day_type_round_trips() {
        for dt in [DayType::Weekday, DayType::Saturday, DayType::Sunday] {
            assert_eq!(DayType::from_str(dt.as_str()), Some(dt));
        }
    }

    #[test]
    fn bbox_contains_boundary_points() {
        let bbox = Bbox {
            min_lat: 40.0,
            max_lat: 41.0,
            min_lng: -75.0,
            max_lng: -73.0,
        };
        assert!(bbox.contains(40.0, -75.0));
        assert!(bbox.contains(40.5, -74.0));
        assert!(!bbox.contains(39.99, -74.0));
        assert!(!bbox.contains(40.5, -72.99));
    }
}
