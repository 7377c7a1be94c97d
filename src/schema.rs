// Hand-maintained Diesel table declarations.
//
// Only relations driven through the query DSL are declared here, and only
// their scalar columns: everything touching a PostGIS geometry column goes
// through `diesel::sql_query` instead, so the geometry/geography columns of
// `intersections`, `isochrone_bands`, `land_boundary` and `transit_stops`
// are deliberately not declared.

diesel::table! {
    batch_status (intersection_id, mode, departure_time, day_type) {
        intersection_id -> Integer,
        mode -> Text,
        departure_time -> Time,
        day_type -> Text,
        status -> Text,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        error_message -> Nullable<Text>,
    }
}

diesel::table! {
    intersections (id) {
        id -> Integer,
        osm_node_id -> BigInt,
        name -> Nullable<Text>,
        lat -> Double,
        lng -> Double,
        borough -> Text,
        sample_group -> Integer,
    }
}

diesel::table! {
    transit_stops (id) {
        id -> Integer,
        gtfs_stop_id -> Text,
        stop_name -> Text,
        lat -> Double,
        lng -> Double,
        stop_type -> Text,
        agency -> Text,
    }
}
