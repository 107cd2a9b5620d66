// src/utils/geo.rs
//! Great-circle distance. Every proximity computation in the service goes
//! through [`haversine_km`]: nearby-driver search, route accumulation and
//! duration estimates.

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance in kilometers between two `(longitude, latitude)` pairs given in degrees.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lon1, lat1) = from;
    let (lon2, lat2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Minutes needed to cover `distance_km` at `average_speed_kmh`, rounded up.
pub fn travel_minutes(distance_km: f64, average_speed_kmh: f64) -> u32 {
    if average_speed_kmh <= 0.0 || !distance_km.is_finite() {
        return 0;
    }
    ((distance_km / average_speed_kmh) * 60.0).ceil() as u32
}
