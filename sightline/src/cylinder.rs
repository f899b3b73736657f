//! Cylindrical obstruction model.

use crate::{
    geometry::{corner_bounds, corridor_corners, RectFilter},
    LosConfig, LosValidator, ProbeSite, SightlineError,
};
use demgrid::{CellSurface, Grid};
use geo::{
    geometry::{Coord, Line, Point},
    EuclideanDistance,
};

/// Validates sight lines against a tube of uniform radius around the
/// line joining two sites.
///
/// The cylinder is a simplified Fresnel zone for high-frequency radios:
/// at 60 GHz and a 250 m hop the first Fresnel radius is about one
/// meter, so a fixed-radius tube is a good fit whenever the raster
/// resolution is not much finer than that radius.
pub struct CylindricalValidator<'a> {
    surface: Option<&'a Grid>,
    config: LosConfig,
    fresnel_radius: f64,
}

impl<'a> CylindricalValidator<'a> {
    pub fn new(
        surface: Option<&'a Grid>,
        config: LosConfig,
        fresnel_radius: f64,
    ) -> Result<Self, SightlineError> {
        config.validate()?;
        Ok(Self {
            surface,
            config,
            fresnel_radius,
        })
    }

    fn confidence_by_radius(&self, grid: &Grid, site1: &ProbeSite, site2: &ProbeSite) -> f64 {
        let radius = self.fresnel_radius;
        let threshold = self.config.confidence_threshold;

        let corners = corridor_corners((site1.x, site1.y), (site2.x, site2.y), radius);
        let rect = RectFilter::new(&corners);
        let ((min_x, min_y), (max_x, max_y)) = corner_bounds(&corners);

        let mut obstructions: Vec<CellSurface> = grid
            .cells_within(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
            .filter(|cell| rect.contains(cell.x, cell.y))
            .collect();

        // Higher cells are more likely to block the sight line; visiting
        // them first lets a blocked pair exit the loop early.
        obstructions.sort_by(|a, b| b.elevation.total_cmp(&a.elevation));

        let axis = SightAxis::new(site1, site2);
        let segment_2d = Line::new((site1.x, site1.y), (site2.x, site2.y));

        let minimal_radius = radius * threshold;
        let mut minimal_distance = radius;
        let highest_site_altitude = site1.altitude.max(site2.altitude);

        for cell in &obstructions {
            if threshold == 1.0 && cell.elevation > highest_site_altitude {
                return 0.0;
            }
            let distance = if cell.elevation > axis.plane_height(cell.x, cell.y) {
                // Above the max-top-view plane the nearest approach is in
                // the horizontal plane.
                segment_2d.euclidean_distance(&Point::new(cell.x, cell.y))
            } else {
                axis.distance_to_top(cell)
            };
            if distance < minimal_radius {
                return 0.0;
            }
            minimal_distance = minimal_distance.min(distance);
        }

        minimal_distance / radius
    }
}

impl LosValidator for CylindricalValidator<'_> {
    /// Confidence is the clear fraction of the tube: the minimum over
    /// obstructions of their distance to the axis, divided by the tube
    /// radius. Zero when anything comes closer than radius × threshold.
    fn confidence(&self, site1: &ProbeSite, site2: &ProbeSite) -> f64 {
        if !self.config.passes_preflight(site1, site2) {
            return 0.0;
        }
        match self.surface {
            None => 1.0,
            Some(grid) => self.confidence_by_radius(grid, site1, site2),
        }
    }
}

/// The 3-D sight line with its slope decomposition and the plane whose
/// intersection with the tube matches the tube's top view.
struct SightAxis {
    x1: f64,
    y1: f64,
    z1: f64,
    x_span: f64,
    y_span: f64,
    // Slopes relative to x when the x span dominates, else to y.
    x_based: bool,
    lateral_slope: f64,
    vertical_slope: f64,
    sum_slope_sq: f64,
    a_over_c: f64,
    b_over_c: f64,
    d_over_c: f64,
}

impl SightAxis {
    fn new(site1: &ProbeSite, site2: &ProbeSite) -> Self {
        let (x1, y1, z1) = (site1.x, site1.y, site1.altitude);
        let (x2, y2, z2) = (site2.x, site2.y, site2.altitude);
        let x_span = x2 - x1;
        let y_span = y2 - y1;
        let z_span = z2 - z1;

        // Two slope parameterizations avoid an infinite slope; the
        // preflight guarantees the spans are not both zero.
        let x_based = x_span != 0.0;
        let (lateral_slope, vertical_slope, sum_slope_sq) = if x_based {
            let yx = y_span / x_span;
            let zx = z_span / x_span;
            (yx, zx, 1.0 + yx * yx + zx * zx)
        } else {
            let xy = x_span / y_span;
            let zy = z_span / y_span;
            (xy, zy, xy * xy + 1.0 + zy * zy)
        };

        // Third point on the max-top-view plane: horizontal from site 1,
        // orthogonal to the sight line's 2-D projection.
        let (third_x, third_y) = if x_based {
            (x1 - lateral_slope, y1 + 1.0)
        } else {
            (x1 + 1.0, y1 - lateral_slope)
        };
        let third_z = z1;

        let a = y_span * (third_z - z1) - z_span * (third_y - y1);
        let b = z_span * (third_x - x1) - x_span * (third_z - z1);
        let c = x_span * (third_y - y1) - y_span * (third_x - x1);
        let d = -(a * x1 + b * y1 + c * z1);

        Self {
            x1,
            y1,
            z1,
            x_span,
            y_span,
            x_based,
            lateral_slope,
            vertical_slope,
            sum_slope_sq,
            a_over_c: a / c,
            b_over_c: b / c,
            d_over_c: d / c,
        }
    }

    /// Height of the max-top-view plane at `(x, y)`.
    fn plane_height(&self, x: f64, y: f64) -> f64 {
        -(self.a_over_c * x + self.b_over_c * y + self.d_over_c)
    }

    /// Distance from a cell's top to the sight line, with the foot of
    /// the perpendicular clamped to the segment.
    fn distance_to_top(&self, cell: &CellSurface) -> f64 {
        let (x, y, z) = (cell.x, cell.y, cell.elevation);
        let (nx, ny, nz) = if self.x_based {
            let mut t = ((x - self.x1)
                + self.lateral_slope * (y - self.y1)
                + self.vertical_slope * (z - self.z1))
                / self.sum_slope_sq;
            t = if self.x_span > 0.0 {
                t.clamp(0.0, self.x_span)
            } else {
                t.clamp(self.x_span, 0.0)
            };
            (
                self.x1 + t,
                self.y1 + t * self.lateral_slope,
                self.z1 + t * self.vertical_slope,
            )
        } else {
            let mut t = (self.lateral_slope * (x - self.x1)
                + (y - self.y1)
                + self.vertical_slope * (z - self.z1))
                / self.sum_slope_sq;
            t = if self.y_span > 0.0 {
                t.clamp(0.0, self.y_span)
            } else {
                t.clamp(self.y_span, 0.0)
            };
            (
                self.x1 + t * self.lateral_slope,
                self.y1 + t,
                self.z1 + t * self.vertical_slope,
            )
        };

        let dist_sq = (x - nx) * (x - nx) + (y - ny) * (y - ny) + (z - nz) * (z - nz);
        dist_sq.max(0.0).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::{CylindricalValidator, LosConfig, LosValidator, ProbeSite};
    use approx::assert_relative_eq;
    use demgrid::Grid;
    use geo::geometry::Coord;

    fn grid_with_bump(bump_elevation: f32) -> Grid {
        // 101 x 11 one-meter grid centered on y = 5, flat at zero except
        // for a single column at x = 50.
        let cols = 101;
        let rows = 11;
        let mut samples = vec![0.0f32; cols * rows];
        for iy in 0..rows {
            samples[iy * cols + 50] = bump_elevation;
        }
        Grid::from_samples(Coord { x: 0.0, y: 10.0 }, 1.0, cols, rows, samples).unwrap()
    }

    fn validator(grid: &Grid, threshold: f64, radius: f64) -> CylindricalValidator<'_> {
        let config = LosConfig {
            confidence_threshold: threshold,
            ..LosConfig::default()
        };
        CylindricalValidator::new(Some(grid), config, radius).unwrap()
    }

    #[test]
    fn test_no_surface_is_clear() {
        let v = CylindricalValidator::new(None, LosConfig::default(), 1.0).unwrap();
        let a = ProbeSite::new(0.0, 5.0, 10.0);
        let b = ProbeSite::new(100.0, 5.0, 10.0);
        assert_relative_eq!(v.confidence(&a, &b), 1.0);
    }

    #[test]
    fn test_midpoint_bump_half_meter_clearance() {
        // Sight line at 10 m, bump top at 9.5 m: the clearance is half
        // the 1 m radius, so confidence is 0.5.
        let grid = grid_with_bump(9.5);
        let a = ProbeSite::new(0.0, 5.0, 10.0);
        let b = ProbeSite::new(100.0, 5.0, 10.0);

        let accepting = validator(&grid, 0.5, 1.0);
        assert_relative_eq!(accepting.confidence(&a, &b), 0.5, epsilon = 1e-9);

        // A stricter threshold turns the same geometry into a reject.
        let strict = validator(&grid, 0.6, 1.0);
        assert_relative_eq!(strict.confidence(&a, &b), 0.0);
    }

    #[test]
    fn test_bump_through_axis_blocks() {
        let grid = grid_with_bump(10.5);
        let a = ProbeSite::new(0.0, 5.0, 10.0);
        let b = ProbeSite::new(100.0, 5.0, 10.0);
        let v = validator(&grid, 0.5, 1.0);
        assert_relative_eq!(v.confidence(&a, &b), 0.0);
    }

    #[test]
    fn test_confidence_is_symmetric() {
        let grid = grid_with_bump(9.2);
        let a = ProbeSite::new(0.0, 5.0, 10.0);
        let b = ProbeSite::new(100.0, 5.0, 10.0);
        let v = validator(&grid, 0.1, 1.0);
        assert_relative_eq!(v.confidence(&a, &b), v.confidence(&b, &a));
    }

    #[test]
    fn test_clear_path_over_flat_ground() {
        let grid = grid_with_bump(0.0);
        let a = ProbeSite::new(0.0, 5.0, 10.0);
        let b = ProbeSite::new(100.0, 5.0, 10.0);
        let v = validator(&grid, 1.0, 1.0);
        assert_relative_eq!(v.confidence(&a, &b), 1.0);
    }

    #[test]
    fn test_obstruction_above_both_sites_blocks_at_full_threshold() {
        let grid = grid_with_bump(50.0);
        let a = ProbeSite::new(0.0, 5.0, 10.0);
        let b = ProbeSite::new(100.0, 5.0, 10.0);
        let v = validator(&grid, 1.0, 1.0);
        assert_relative_eq!(v.confidence(&a, &b), 0.0);
    }
}
