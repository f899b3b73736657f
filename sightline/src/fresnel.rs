//! First-Fresnel-zone geometry.

use crate::ProbeSite;
use demgrid::CellSurface;

/// Multiplier in the first-zone maximum radius r = ½·√(c·D/f), with c
/// the speed of light: √c / 2 ≈ 8.65725790883 for D in meters and f in
/// MHz.
const FIRST_ZONE_MULTIPLIER: f64 = 8.657_257_908_83;

/// Returns the first Fresnel zone's maximum radius in meters.
pub fn first_zone_radius(distance_m: f64, frequency_mhz: f64) -> f64 {
    FIRST_ZONE_MULTIPLIER * (distance_m / frequency_mhz).max(0.0).sqrt()
}

/// The first Fresnel zone between two sites: a prolate spheroid whose
/// foci are the sites, with all the constants needed to test cells
/// against it.
///
/// Three surfaces are involved:
///
/// 1. the 2-D ellipse the spheroid projects onto the ground plane,
/// 2. the 3-D spheroid itself (rotations about z by the ground azimuth
///    and about y by the tilt; no x rotation is needed since the two
///    semi-minor axes are equal),
/// 3. the "max top view plane", whose intersection with the spheroid
///    matches the spheroid's top view. Cells above it are tested
///    against the 2-D ellipse, cells below against the spheroid.
pub struct FresnelZone {
    outer_radius: f64,
    outer_radius_sq: f64,
    inner_radius: f64,
    inner_radius_sq: f64,
    cos_a: f64,
    sin_a: f64,
    cos_b: f64,
    sin_b: f64,
    x_m: f64,
    y_m: f64,
    z_m: f64,
    half_distance_sq: f64,
    half_xy_distance_sq: f64,
    a_over_c: f64,
    b_over_c: f64,
    d_over_c: f64,
    site1: (f64, f64),
    site2: (f64, f64),
    threshold: f64,
}

impl FresnelZone {
    /// Builds the zone for a pair that already passed the preflight
    /// checks (distinct ground positions, threshold within `[0, 1]`).
    pub fn new(
        site1: &ProbeSite,
        site2: &ProbeSite,
        frequency_mhz: f64,
        confidence_threshold: f64,
    ) -> Self {
        debug_assert!(site1.x != site2.x || site1.y != site2.y);
        debug_assert!((0.0..=1.0).contains(&confidence_threshold));

        let x_span = site2.x - site1.x;
        let y_span = site2.y - site1.y;
        let z_span = site2.altitude - site1.altitude;
        let xy_distance_sq = x_span * x_span + y_span * y_span;
        let xy_distance = xy_distance_sq.sqrt();
        let distance_sq = xy_distance_sq + z_span * z_span;
        let distance = distance_sq.sqrt();

        let outer_radius = first_zone_radius(distance, frequency_mhz);
        let inner_radius = outer_radius * confidence_threshold;

        // Third point defining the max-top-view plane: horizontal from
        // site 1 and orthogonal to the ground projection.
        let (third_x, third_y) = if x_span != 0.0 {
            (site1.x - y_span / x_span, site1.y + 1.0)
        } else {
            (site1.x + 1.0, site1.y - x_span / y_span)
        };
        let third_z = site1.altitude;
        let a = y_span * (third_z - site1.altitude) - z_span * (third_y - site1.y);
        let b = z_span * (third_x - site1.x) - x_span * (third_z - site1.altitude);
        let c = x_span * (third_y - site1.y) - y_span * (third_x - site1.x);
        let d = -(a * site1.x + b * site1.y + c * site1.altitude);

        Self {
            outer_radius,
            outer_radius_sq: outer_radius * outer_radius,
            inner_radius,
            inner_radius_sq: inner_radius * inner_radius,
            cos_a: x_span / xy_distance,
            sin_a: y_span / xy_distance,
            cos_b: xy_distance / distance,
            sin_b: z_span / distance,
            x_m: (site1.x + site2.x) / 2.0,
            y_m: (site1.y + site2.y) / 2.0,
            z_m: (site1.altitude + site2.altitude) / 2.0,
            half_distance_sq: distance_sq / 4.0,
            half_xy_distance_sq: xy_distance_sq / 4.0,
            a_over_c: a / c,
            b_over_c: b / c,
            d_over_c: d / c,
            site1: (site1.x, site1.y),
            site2: (site2.x, site2.y),
            threshold: confidence_threshold,
        }
    }

    /// Maximum radius of the first zone in meters.
    pub fn radius(&self) -> f64 {
        self.outer_radius
    }

    /// True if `(x, y)` lies inside the ground projection of the zone.
    pub fn within_outer_ellipse(&self, x: f64, y: f64) -> bool {
        self.within_ellipse(self.outer_radius_sq, x, y)
    }

    /// True if `(x, y)` lies inside the ground projection of the inner
    /// (threshold-scaled) zone.
    pub fn within_inner_ellipse(&self, x: f64, y: f64) -> bool {
        self.within_ellipse(self.inner_radius_sq, x, y)
    }

    /// True if the cell blocks the inner zone: its ground position is
    /// inside the inner ellipse and its top reaches the lower spheroid
    /// surface.
    pub fn obstructs_inner_zone(&self, cell: &CellSurface) -> bool {
        if (cell.x == self.site1.0 && cell.y == self.site1.1)
            || (cell.x == self.site2.0 && cell.y == self.site2.1)
        {
            return false;
        }
        if self.threshold == 0.0 {
            return false;
        }
        if !self.within_inner_ellipse(cell.x, cell.y) {
            return false;
        }
        let height = self.lower_spheroid_height(cell.x, cell.y, self.inner_radius_sq);
        cell.elevation >= height
    }

    /// Semi-minor axis of the largest concentric spheroid that keeps
    /// the cell on its border or outside.
    ///
    /// Cells on or above the max-top-view plane are measured against
    /// the 2-D ellipse; cells below against the spheroid.
    pub fn max_clear_radius(&self, cell: &CellSurface) -> f64 {
        let height = self.lower_spheroid_height(cell.x, cell.y, self.outer_radius_sq);
        if cell.elevation < height {
            return self.outer_radius;
        }

        let plane_height = -(self.a_over_c * cell.x + self.b_over_c * cell.y + self.d_over_c);
        if cell.elevation >= plane_height {
            self.max_radius_2d(cell.x, cell.y)
        } else {
            self.max_radius_3d(cell.x, cell.y, cell.elevation)
        }
    }

    fn within_ellipse(&self, radius_sq: f64, x: f64, y: f64) -> bool {
        let along = (x - self.x_m) * self.cos_a + (y - self.y_m) * self.sin_a;
        let across = (x - self.x_m) * self.sin_a - (y - self.y_m) * self.cos_a;
        along * along / self.half_xy_distance_sq + across * across / radius_sq <= 1.0
    }

    /// Lower height of the spheroid above `(x, y)`, found by
    /// rearranging the spheroid equation into a quadratic in z.
    ///
    /// Returns infinity when the vertical through the point misses the
    /// spheroid. The root is taken in the numerically stable form that
    /// avoids subtracting nearly equal quantities.
    fn lower_spheroid_height(&self, x: f64, y: f64, radius_sq: f64) -> f64 {
        let a_sq = self.half_distance_sq;
        let c_sq = radius_sq;
        let b_sq = radius_sq;

        let tmp1 = (x - self.x_m) * self.cos_a * self.cos_b + (y - self.y_m) * self.sin_a * self.cos_b;
        let tmp2 = (self.x_m - x) * self.cos_a * self.sin_b + (self.y_m - y) * self.sin_a * self.sin_b;
        let quad_a = self.sin_b * self.sin_b / a_sq + self.cos_b * self.cos_b / c_sq;
        let quad_b = 2.0 * (tmp1 * self.sin_b / a_sq + tmp2 * self.cos_b / c_sq);
        let across = (self.x_m - x) * self.sin_a + (y - self.y_m) * self.cos_a;
        let quad_c = tmp1 * tmp1 / a_sq + tmp2 * tmp2 / c_sq + across * across / b_sq - 1.0;

        let discriminant = quad_b * quad_b - 4.0 * quad_a * quad_c;
        if discriminant <= 0.0 {
            return f64::INFINITY;
        }
        if quad_b >= 0.0 {
            (-quad_b - discriminant.sqrt()) / (2.0 * quad_a) + self.z_m
        } else {
            2.0 * quad_c / (-quad_b + discriminant.sqrt()) + self.z_m
        }
    }

    /// Largest 2-D ellipse semi-minor axis that avoids `(x, y)`.
    fn max_radius_2d(&self, x: f64, y: f64) -> f64 {
        let along = (x - self.x_m) * self.cos_a + (y - self.y_m) * self.sin_a;
        let a = along * along / self.half_xy_distance_sq;
        let across = (x - self.x_m) * self.sin_a - (y - self.y_m) * self.cos_a;
        let b = across * across;
        if a >= 1.0 {
            return self.outer_radius;
        }
        (b / (1.0 - a)).max(0.0).sqrt()
    }

    /// Largest spheroid semi-minor axis that avoids `(x, y, z)`.
    fn max_radius_3d(&self, x: f64, y: f64, z: f64) -> f64 {
        let first = (x - self.x_m) * self.cos_a * self.cos_b
            + (y - self.y_m) * self.sin_a * self.cos_b
            + (z - self.z_m) * self.sin_b;
        let a = first * first / self.half_distance_sq;
        let second = (self.x_m - x) * self.sin_a + (y - self.y_m) * self.cos_a;
        let b = second * second;
        let third = (self.x_m - x) * self.cos_a * self.sin_b
            + (self.y_m - y) * self.sin_a * self.sin_b
            + (z - self.z_m) * self.cos_b;
        let c = third * third;
        if a >= 1.0 {
            return self.outer_radius;
        }
        ((b + c) / (1.0 - a)).max(0.0).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::{first_zone_radius, FresnelZone};
    use crate::ProbeSite;
    use approx::assert_relative_eq;
    use demgrid::CellSurface;

    #[test]
    fn test_first_zone_radius() {
        // 250 m hop at 60 GHz is very close to one meter.
        let radius = first_zone_radius(250.0, 60_000.0);
        assert_relative_eq!(radius, 0.558_662, epsilon = 1e-3);
        // Scales with the square root of distance.
        assert_relative_eq!(
            first_zone_radius(1000.0, 60_000.0),
            2.0 * first_zone_radius(250.0, 60_000.0),
            epsilon = 1e-12
        );
    }

    fn level_zone() -> FresnelZone {
        let a = ProbeSite::new(0.0, 0.0, 20.0);
        let b = ProbeSite::new(400.0, 0.0, 20.0);
        FresnelZone::new(&a, &b, 60_000.0, 1.0)
    }

    #[test]
    fn test_midpoint_axis_is_inside() {
        let zone = level_zone();
        assert!(zone.within_outer_ellipse(200.0, 0.0));
        assert!(zone.obstructs_inner_zone(&CellSurface {
            x: 200.0,
            y: 0.0,
            elevation: 20.0,
        }));
    }

    #[test]
    fn test_cell_outside_projection_does_not_obstruct() {
        let zone = level_zone();
        let radius = zone.radius();
        let cell = CellSurface {
            x: 200.0,
            y: radius * 2.0,
            elevation: 100.0,
        };
        assert!(!zone.within_outer_ellipse(cell.x, cell.y));
        assert!(!zone.obstructs_inner_zone(&cell));
    }

    #[test]
    fn test_low_cell_leaves_full_radius() {
        let zone = level_zone();
        let cell = CellSurface {
            x: 200.0,
            y: 0.0,
            elevation: 0.0,
        };
        assert!(!zone.obstructs_inner_zone(&cell));
        assert_relative_eq!(zone.max_clear_radius(&cell), zone.radius());
    }

    #[test]
    fn test_partial_intrusion_shrinks_clear_radius() {
        let zone = level_zone();
        let radius = zone.radius();
        // Just below the axis at midpoint: the largest clear spheroid
        // has roughly the clearance as its semi-minor axis.
        let cell = CellSurface {
            x: 200.0,
            y: 0.0,
            elevation: 20.0 - radius / 2.0,
        };
        let clear = zone.max_clear_radius(&cell);
        assert!(clear < radius);
        assert_relative_eq!(clear, radius / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_endpoints_never_obstruct() {
        let zone = level_zone();
        assert!(!zone.obstructs_inner_zone(&CellSurface {
            x: 0.0,
            y: 0.0,
            elevation: 1000.0,
        }));
    }
}
