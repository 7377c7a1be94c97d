//! Ingest parsing: intersection GeoJSON, GTFS stops and the land boundary.
//!
//! Parsing is pure and separated from the upsert loops in the CLI so the
//! classifier and file handling stay testable without a database.

use serde_json::Value;

use crate::repository::intersections::NewIntersection;
use crate::repository::stops::NewTransitStop;

/// Classify a coordinate into a region tag.
///
/// Rough approximation by latitude/longitude bands; precise borough
/// polygons are not worth carrying for batch prioritisation. Rules are
/// ordered most-specific first.
pub fn classify_region(lat: f64, lng: f64) -> &'static str {
    // Connecticut: north of ~41.0, east of the Hudson.
    if lat > 41.0 && lng > -73.73 {
        return "Connecticut";
    }
    // Pennsylvania: west of the Delaware River.
    if lng < -74.7 {
        return "Pennsylvania";
    }
    // New Jersey: west of the Arthur Kill in the south, west of the
    // Hudson further north.
    if lat <= 40.65 && lng < -74.26 {
        return "New Jersey";
    }
    if lat > 40.65 && lng < -74.05 {
        return "New Jersey";
    }
    // Westchester / Hudson Valley.
    if lat > 41.0 {
        return "New York";
    }
    if lat <= 40.65 && lng < -74.05 {
        return "Staten Island";
    }
    if lat > 40.8 {
        return "Bronx";
    }
    if lng > -73.85 && lat < 40.75 {
        return "Queens";
    }
    if lat < 40.65 {
        return "Brooklyn";
    }
    "Manhattan"
}

/// Parse an intersection FeatureCollection into ingest records.
///
/// Each feature needs a Point geometry and an `osm_node_id` property; a
/// `name` property is carried when present. Features missing either are
/// skipped with a warning.
pub fn parse_intersections(geojson: &str) -> anyhow::Result<Vec<NewIntersection>> {
    let value: Value = serde_json::from_str(geojson)?;
    let features = value
        .get("features")
        .and_then(|f| f.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid GeoJSON: missing features array"))?;

    let mut records = Vec::with_capacity(features.len());
    for feature in features {
        let osm_node_id = match feature
            .get("properties")
            .and_then(|p| p.get("osm_node_id"))
            .and_then(|v| v.as_i64())
        {
            Some(id) => id,
            None => {
                tracing::warn!("skipping feature without osm_node_id");
                continue;
            }
        };
        let coords = feature
            .get("geometry")
            .and_then(|g| g.get("coordinates"))
            .and_then(|c| c.as_array());
        let (lng, lat) = match coords {
            Some(c) if c.len() >= 2 => {
                match (c[0].as_f64(), c[1].as_f64()) {
                    (Some(lng), Some(lat)) => (lng, lat),
                    _ => continue,
                }
            }
            _ => {
                tracing::warn!("skipping feature {} without a point geometry", osm_node_id);
                continue;
            }
        };
        let name = feature
            .get("properties")
            .and_then(|p| p.get("name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        records.push(NewIntersection {
            osm_node_id,
            name,
            lat,
            lng,
            borough: classify_region(lat, lng).to_string(),
        });
    }

    Ok(records)
}

/// Parse a GTFS stops.txt into ingest records.
///
/// Rows without usable coordinates are skipped, matching how GTFS feeds
/// mark station entrances and generic nodes.
pub fn parse_gtfs_stops(
    stops_txt: &str,
    agency: &str,
    stop_type: &str,
) -> anyhow::Result<Vec<NewTransitStop>> {
    let mut reader = csv::Reader::from_reader(stops_txt.as_bytes());
    let headers = reader.headers()?.clone();
    let idx = |name: &str| headers.iter().position(|h| h == name);

    let stop_id_idx = idx("stop_id")
        .ok_or_else(|| anyhow::anyhow!("stops.txt is missing the stop_id column"))?;
    let name_idx = idx("stop_name");
    let lat_idx = idx("stop_lat")
        .ok_or_else(|| anyhow::anyhow!("stops.txt is missing the stop_lat column"))?;
    let lon_idx = idx("stop_lon")
        .ok_or_else(|| anyhow::anyhow!("stops.txt is missing the stop_lon column"))?;

    let mut stops = Vec::new();
    for record in reader.records() {
        let record = record?;
        // GTFS stop ids are only unique within one agency's feed; MTA, LIRR
        // and NJ Transit all mint small numeric ids that collide across
        // feeds. The stored id is agency-qualified so a second feed's
        // ingest cannot overwrite another agency's stops.
        let gtfs_stop_id = match record.get(stop_id_idx) {
            Some(id) if !id.is_empty() => format!("{}_{}", agency, id),
            _ => continue,
        };
        let lat: f64 = match record.get(lat_idx).and_then(|v| v.trim().parse().ok()) {
            Some(v) => v,
            None => continue,
        };
        let lng: f64 = match record.get(lon_idx).and_then(|v| v.trim().parse().ok()) {
            Some(v) => v,
            None => continue,
        };
        if lat == 0.0 || lng == 0.0 {
            continue;
        }
        let stop_name = name_idx
            .and_then(|i| record.get(i))
            .filter(|s| !s.is_empty())
            .unwrap_or("Unknown")
            .to_string();

        stops.push(NewTransitStop {
            gtfs_stop_id,
            stop_name,
            lat,
            lng,
            stop_type: stop_type.to_string(),
            agency: agency.to_string(),
        });
    }

    Ok(stops)
}

/// Pull a single geometry out of a land-boundary file, which may be a bare
/// geometry, a Feature, or a FeatureCollection with one feature.
pub fn extract_land_geometry(geojson: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(geojson)?;

    let geometry = match value.get("type").and_then(|t| t.as_str()) {
        Some("FeatureCollection") => value
            .get("features")
            .and_then(|f| f.as_array())
            .and_then(|f| f.first())
            .and_then(|f| f.get("geometry"))
            .cloned(),
        Some("Feature") => value.get("geometry").cloned(),
        Some("Polygon") | Some("MultiPolygon") => Some(value),
        _ => None,
    };

    geometry.ok_or_else(|| {
        anyhow::anyhow!("Land boundary file must contain a Polygon or MultiPolygon")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifier_covers_the_five_boroughs() {
        assert_eq!(classify_region(40.7580, -73.9855), "Manhattan");
        assert_eq!(classify_region(40.6215, -73.9620), "Brooklyn");
        assert_eq!(classify_region(40.7282, -73.7949), "Queens");
        assert_eq!(classify_region(40.8448, -73.8648), "Bronx");
        assert_eq!(classify_region(40.5795, -74.1502), "Staten Island");
    }

    #[test]
    fn classifier_covers_the_wider_region() {
        assert_eq!(classify_region(40.7178, -74.0836), "New Jersey");
        assert_eq!(classify_region(40.5100, -74.2900), "New Jersey");
        assert_eq!(classify_region(41.0534, -73.5387), "Connecticut");
        assert_eq!(classify_region(40.2400, -74.7600), "Pennsylvania");
        assert_eq!(classify_region(41.0339, -73.7629), "New York");
    }

    #[test]
    fn parses_intersection_features() {
        let geojson = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"osm_node_id": 42, "name": "Broadway & W 42nd St"},
                    "geometry": {"type": "Point", "coordinates": [-73.9866, 40.7562]}
                },
                {
                    "type": "Feature",
                    "properties": {},
                    "geometry": {"type": "Point", "coordinates": [-73.9, 40.7]}
                },
                {
                    "type": "Feature",
                    "properties": {"osm_node_id": 7},
                    "geometry": null
                }
            ]
        })
        .to_string();

        let records = parse_intersections(&geojson).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].osm_node_id, 42);
        assert_eq!(records[0].borough, "Manhattan");
        assert_eq!(records[0].name.as_deref(), Some("Broadway & W 42nd St"));
    }

    #[test]
    fn rejects_non_feature_collection() {
        assert!(parse_intersections("{\"type\": \"Point\"}").is_err());
    }

    #[test]
    fn parses_gtfs_stops_and_skips_bad_rows() {
        let stops_txt = "\
stop_id,stop_name,stop_lat,stop_lon
101,Times Sq-42 St,40.755983,-73.986229
102,,40.7,-73.9
103,No Coords,,
104,Null Island,0,0
";
        let stops = parse_gtfs_stops(stops_txt, "MTA", "subway").unwrap();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].gtfs_stop_id, "MTA_101");
        assert_eq!(stops[0].stop_name, "Times Sq-42 St");
        assert_eq!(stops[1].stop_name, "Unknown");
        assert_eq!(stops[0].agency, "MTA");
        assert_eq!(stops[0].stop_type, "subway");
    }

    #[test]
    fn stop_ids_from_different_agencies_do_not_collide() {
        let stops_txt = "\
stop_id,stop_name,stop_lat,stop_lon
101,Times Sq-42 St,40.755983,-73.986229
";
        let mta = parse_gtfs_stops(stops_txt, "MTA", "subway").unwrap();
        let njt = parse_gtfs_stops(stops_txt, "NJ Transit", "rail").unwrap();
        assert_ne!(mta[0].gtfs_stop_id, njt[0].gtfs_stop_id);
        assert_eq!(njt[0].gtfs_stop_id, "NJ Transit_101");
    }

    #[test]
    fn land_geometry_extraction_handles_all_wrappers() {
        let polygon = json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]});

        let bare = extract_land_geometry(&polygon.to_string()).unwrap();
        assert_eq!(bare["type"], "Polygon");

        let feature = json!({"type": "Feature", "properties": {}, "geometry": polygon});
        let from_feature = extract_land_geometry(&feature.to_string()).unwrap();
        assert_eq!(from_feature["type"], "Polygon");

        let collection = json!({"type": "FeatureCollection", "features": [feature]});
        let from_collection = extract_land_geometry(&collection.to_string()).unwrap();
        assert_eq!(from_collection["type"], "Polygon");

        assert!(extract_land_geometry("{\"type\": \"Point\"}").is_err());
    }
}
