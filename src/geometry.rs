//! GeoJSON plumbing over `serde_json::Value`.
//!
//! The store never does geometry math in Rust; PostGIS owns clipping,
//! simplification and distance. What lives here is the wire-format side:
//! pulling cutoff-keyed geometries out of a routing worker's
//! FeatureCollection and sanity checks on raw geometries.

use serde_json::Value;

use crate::models::BandMap;

/// Extract `cutoff minutes → geometry` from a routing worker response.
///
/// Each feature carries `properties.time` as a decimal string of seconds;
/// the cutoff bin is recovered by integer division. Features with a missing
/// or malformed `time`, or no geometry, are skipped.
pub fn bands_from_feature_collection(body: &Value) -> BandMap {
    let mut bands = BandMap::new();

    let features = match body.get("features").and_then(|f| f.as_array()) {
        Some(f) => f,
        None => return bands,
    };

    for feature in features {
        let seconds = match feature
            .get("properties")
            .and_then(|p| p.get("time"))
            .and_then(parse_time_property)
        {
            Some(s) => s,
            None => continue,
        };
        let geometry = match feature.get("geometry") {
            Some(g) if !g.is_null() => g,
            _ => continue,
        };
        bands.insert((seconds / 60) as u32, geometry.clone());
    }

    bands
}

/// `properties.time` arrives as a decimal string of seconds, but some worker
/// builds emit a bare number. Accept both.
fn parse_time_property(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        Value::Number(n) => n.as_f64().map(|f| f as i64),
        _ => None,
    }
}

/// Count geometries that differ from one another by serialized form.
///
/// A known worker defect collapses the SPT projection to one shape across
/// all cutoffs; fewer than two distinct geometries in a multi-cutoff
/// response means the per-cutoff fallback must run.
pub fn distinct_geometry_count(bands: &BandMap) -> usize {
    let mut seen: Vec<String> = Vec::with_capacity(bands.len());
    for geometry in bands.values() {
        let serialized = geometry.to_string();
        if !seen.contains(&serialized) {
            seen.push(serialized);
        }
    }
    seen.len()
}

/// True when a GeoJSON geometry has no coordinates at all.
///
/// Handles Polygon and MultiPolygon nesting by walking the coordinate array
/// down to the first position. A missing or non-array `coordinates` member
/// counts as empty.
pub fn has_empty_coordinates(geometry: &Value) -> bool {
    match geometry.get("coordinates").and_then(|c| c.as_array()) {
        Some(coords) => !contains_position(coords),
        None => true,
    }
}

fn contains_position(coords: &[Value]) -> bool {
    coords.iter().any(|v| match v {
        Value::Array(inner) => {
            if inner.iter().all(|x| x.is_number()) {
                !inner.is_empty()
            } else {
                contains_position(inner)
            }
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn polygon(offset: f64) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[
                [-74.0 + offset, 40.7],
                [-73.9 + offset, 40.7],
                [-73.9 + offset, 40.8],
                [-74.0 + offset, 40.7]
            ]]
        })
    }

    #[test]
    fn extracts_bands_by_time_property() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"time": "900"}, "geometry": polygon(0.0)},
                {"type": "Feature", "properties": {"time": "1800"}, "geometry": polygon(0.1)},
                {"type": "Feature", "properties": {"time": 10800}, "geometry": polygon(0.2)},
            ]
        });

        let bands = bands_from_feature_collection(&body);
        assert_eq!(bands.len(), 3);
        assert!(bands.contains_key(&15));
        assert!(bands.contains_key(&30));
        assert!(bands.contains_key(&180));
    }

    #[test]
    fn skips_malformed_features() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"time": "garbage"}, "geometry": polygon(0.0)},
                {"type": "Feature", "properties": {}, "geometry": polygon(0.0)},
                {"type": "Feature", "properties": {"time": "900"}, "geometry": null},
                {"type": "Feature", "properties": {"time": "2700"}, "geometry": polygon(0.0)},
            ]
        });

        let bands = bands_from_feature_collection(&body);
        assert_eq!(bands.len(), 1);
        assert!(bands.contains_key(&45));
    }

    #[test]
    fn empty_feature_collection_yields_no_bands() {
        let body = json!({"type": "FeatureCollection", "features": []});
        assert!(bands_from_feature_collection(&body).is_empty());
        assert!(bands_from_feature_collection(&json!({})).is_empty());
    }

    #[test]
    fn distinct_count_detects_collapsed_projection() {
        let mut bands = BandMap::new();
        for (i, cutoff) in [15u32, 30, 45].iter().enumerate() {
            bands.insert(*cutoff, polygon(i as f64));
        }
        assert_eq!(distinct_geometry_count(&bands), 3);

        let mut collapsed = BandMap::new();
        for cutoff in [15u32, 30, 45, 60, 90, 120, 150, 180] {
            collapsed.insert(cutoff, polygon(0.0));
        }
        assert_eq!(distinct_geometry_count(&collapsed), 1);
    }

    #[test]
    fn empty_coordinates_detection() {
        assert!(has_empty_coordinates(&json!({
            "type": "Polygon",
            "coordinates": []
        })));
        assert!(has_empty_coordinates(&json!({
            "type": "MultiPolygon",
            "coordinates": [[[]]]
        })));
        assert!(has_empty_coordinates(&json!({"type": "Polygon"})));
        assert!(!has_empty_coordinates(&polygon(0.0)));
        assert!(!has_empty_coordinates(&json!({
            "type": "MultiPolygon",
            "coordinates": [[[[ -74.0, 40.7 ], [ -73.9, 40.7 ], [ -73.9, 40.8 ], [ -74.0, 40.7 ]]]]
        })));
    }
}
