//! Geodesy helpers and the local planar projection.

use geo::geometry::Coord;

/// Mean earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two lon/lat coordinates.
pub fn haversine_m(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let lat1 = a.y.to_radians();
    let lat2 = b.y.to_radians();
    let dlat = (b.y - a.y).to_radians();
    let dlon = (b.x - a.x).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Compass bearing in degrees `[0, 360)` from `a` to `b` (lon/lat).
pub fn bearing_deg(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let lat1 = a.y.to_radians();
    let lat2 = b.y.to_radians();
    let dlon = (b.x - a.x).to_radians();
    let x = dlon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let bearing = x.atan2(y).to_degrees();
    (bearing + 360.0) % 360.0
}

/// Absolute angular difference of two bearings, in `[0, 180]`.
pub fn angle_delta(a_deg: f64, b_deg: f64) -> f64 {
    let delta = (a_deg - b_deg).abs() % 360.0;
    if delta > 180.0 {
        360.0 - delta
    } else {
        delta
    }
}

/// Equirectangular projection around a fixed origin.
///
/// Adequate for planning regions up to a few tens of kilometers, which
/// keeps the LOS engine and sector geometry in flat meters without a
/// full UTM transform.
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    origin: Coord<f64>,
    cos_lat: f64,
}

impl LocalProjection {
    pub fn new(origin: Coord<f64>) -> Self {
        Self {
            origin,
            cos_lat: origin.y.to_radians().cos(),
        }
    }

    /// Projects lon/lat degrees to meters east/north of the origin.
    pub fn project(&self, lonlat: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (lonlat.x - self.origin.x).to_radians() * self.cos_lat * EARTH_RADIUS_M,
            y: (lonlat.y - self.origin.y).to_radians() * EARTH_RADIUS_M,
        }
    }

    /// Inverse of [`LocalProjection::project`].
    pub fn unproject(&self, xy: Coord<f64>) -> Coord<f64> {
        Coord {
            x: self.origin.x + (xy.x / (self.cos_lat * EARTH_RADIUS_M)).to_degrees(),
            y: self.origin.y + (xy.y / EARTH_RADIUS_M).to_degrees(),
        }
    }

    /// Degrees of longitude/latitude per `meters` at the origin.
    pub fn degree_deltas(&self, meters: f64) -> (f64, f64) {
        (
            (meters / (self.cos_lat * EARTH_RADIUS_M)).to_degrees(),
            (meters / EARTH_RADIUS_M).to_degrees(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{angle_delta, bearing_deg, haversine_m, LocalProjection};
    use approx::assert_relative_eq;
    use geo::geometry::Coord;

    #[test]
    fn test_haversine_one_degree_longitude_at_equator() {
        let a = Coord { x: 0.0, y: 0.0 };
        let b = Coord { x: 1.0, y: 0.0 };
        assert_relative_eq!(haversine_m(a, b), 111_194.9, epsilon = 1.0);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = Coord { x: 0.0, y: 0.0 };
        assert_relative_eq!(bearing_deg(origin, Coord { x: 0.0, y: 1.0 }), 0.0);
        assert_relative_eq!(bearing_deg(origin, Coord { x: 1.0, y: 0.0 }), 90.0);
        assert_relative_eq!(bearing_deg(origin, Coord { x: 0.0, y: -1.0 }), 180.0);
        assert_relative_eq!(bearing_deg(origin, Coord { x: -1.0, y: 0.0 }), 270.0);
    }

    #[test]
    fn test_angle_delta_wraps() {
        assert_relative_eq!(angle_delta(350.0, 10.0), 20.0);
        assert_relative_eq!(angle_delta(90.0, 270.0), 180.0);
        assert_relative_eq!(angle_delta(45.0, 45.0), 0.0);
    }

    #[test]
    fn test_projection_round_trip() {
        let projection = LocalProjection::new(Coord { x: -71.3, y: 44.27 });
        let lonlat = Coord { x: -71.29, y: 44.28 };
        let xy = projection.project(lonlat);
        let back = projection.unproject(xy);
        assert_relative_eq!(back.x, lonlat.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, lonlat.y, epsilon = 1e-12);
        // Projected distance matches haversine to within a meter here.
        let origin_xy = projection.project(Coord { x: -71.3, y: 44.27 });
        let planar =
            ((xy.x - origin_xy.x).powi(2) + (xy.y - origin_xy.y).powi(2)).sqrt();
        let great_circle = haversine_m(Coord { x: -71.3, y: 44.27 }, lonlat);
        assert_relative_eq!(planar, great_circle, epsilon = 2.0);
    }
}
