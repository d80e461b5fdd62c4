//! Great-circle helpers on a spherical Earth.

use crate::fix::Coordinate;

/// Mean Earth radius used by every distance in this crate
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two coordinates in kilometres
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).max(0.0).sqrt())
}

/// Initial bearing from `a` towards `b`, degrees clockwise from north in [0, 360)
pub fn bearing_deg(a: Coordinate, b: Coordinate) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let y = d_lon.sin() * lat_b.cos();
    let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * d_lon.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Metric offset of `point` from `origin` as (east, north) in metres.
///
/// Each axis is a haversine leg along a single coordinate, signed by which side
/// of the origin the point lies on. Renderers use this to place the runner
/// avatar in a local scene anchored at the first fix.
pub fn local_offset_m(origin: Coordinate, point: Coordinate) -> (f64, f64) {
    let east = distance_km(origin, Coordinate::new(origin.latitude, point.longitude));
    let north = distance_km(origin, Coordinate::new(point.latitude, origin.longitude));
    let x = if point.longitude < origin.longitude { -east } else { east };
    let z = if point.latitude < origin.latitude { -north } else { north };
    (x * 1000.0, z * 1000.0)
}

/// Unfiltered length of a polyline in kilometres
pub fn path_length_km(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|leg| distance_km(leg[0], leg[1])).sum()
}
