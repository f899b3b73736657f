//! Ellipsoidal (first-Fresnel-zone) obstruction model.

use crate::{
    geometry::{corner_bounds, corridor_corners},
    FresnelZone, LosConfig, LosValidator, ProbeSite, SightlineError,
};
use demgrid::{CellSurface, Grid};
use geo::geometry::Coord;

/// Validates sight lines against the first Fresnel zone, a prolate
/// spheroid whose foci are the two sites.
///
/// Preferred over [`crate::CylindricalValidator`] when the raster
/// resolution is much finer than the Fresnel radius.
pub struct EllipsoidalValidator<'a> {
    surface: Option<&'a Grid>,
    config: LosConfig,
    frequency_mhz: f64,
}

impl<'a> EllipsoidalValidator<'a> {
    pub fn new(
        surface: Option<&'a Grid>,
        config: LosConfig,
        frequency_mhz: f64,
    ) -> Result<Self, SightlineError> {
        config.validate()?;
        Ok(Self {
            surface,
            config,
            frequency_mhz,
        })
    }

    fn confidence_by_zone(&self, grid: &Grid, site1: &ProbeSite, site2: &ProbeSite) -> f64 {
        let zone = FresnelZone::new(
            site1,
            site2,
            self.frequency_mhz,
            self.config.confidence_threshold,
        );

        // The rectangle encloses the zone's ground projection.
        let corners = corridor_corners((site1.x, site1.y), (site2.x, site2.y), zone.radius());
        let ((min_x, min_y), (max_x, max_y)) = corner_bounds(&corners);

        let obstructions: Vec<CellSurface> = grid
            .cells_within(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
            .filter(|cell| zone.within_outer_ellipse(cell.x, cell.y))
            .collect();

        let mut min_clear_radius = zone.radius();
        for cell in &obstructions {
            if zone.obstructs_inner_zone(cell) {
                return 0.0;
            }
            min_clear_radius = min_clear_radius.min(zone.max_clear_radius(cell));
        }

        min_clear_radius / zone.radius()
    }
}

impl LosValidator for EllipsoidalValidator<'_> {
    /// Confidence is the semi-minor axis of the largest obstruction-free
    /// concentric spheroid divided by the first-zone radius.
    fn confidence(&self, site1: &ProbeSite, site2: &ProbeSite) -> f64 {
        if !self.config.passes_preflight(site1, site2) {
            return 0.0;
        }
        match self.surface {
            None => 1.0,
            Some(grid) => self.confidence_by_zone(grid, site1, site2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EllipsoidalValidator, LosConfig, LosValidator, ProbeSite};
    use crate::fresnel::first_zone_radius;
    use approx::assert_relative_eq;
    use demgrid::Grid;
    use geo::geometry::Coord;

    const FREQ_MHZ: f64 = 60_000.0;

    fn grid_with_midspan_ridge(cols: usize, rows: usize, ridge_elevation: f32) -> Grid {
        let mut samples = vec![0.0f32; cols * rows];
        let mid = cols / 2;
        for iy in 0..rows {
            samples[iy * cols + mid] = ridge_elevation;
        }
        Grid::from_samples(Coord { x: 0.0, y: rows as f64 - 1.0 }, 1.0, cols, rows, samples)
            .unwrap()
    }

    fn validator(grid: &Grid, threshold: f64) -> EllipsoidalValidator<'_> {
        let config = LosConfig {
            confidence_threshold: threshold,
            ..LosConfig::default()
        };
        EllipsoidalValidator::new(Some(grid), config, FREQ_MHZ).unwrap()
    }

    #[test]
    fn test_clear_path() {
        let grid = grid_with_midspan_ridge(401, 21, 0.0);
        let a = ProbeSite::new(0.0, 10.0, 30.0);
        let b = ProbeSite::new(400.0, 10.0, 30.0);
        let v = validator(&grid, 1.0);
        assert_relative_eq!(v.confidence(&a, &b), 1.0);
    }

    #[test]
    fn test_ridge_through_zone_blocks() {
        let grid = grid_with_midspan_ridge(401, 21, 31.0);
        let a = ProbeSite::new(0.0, 10.0, 30.0);
        let b = ProbeSite::new(400.0, 10.0, 30.0);
        let v = validator(&grid, 0.5);
        assert_relative_eq!(v.confidence(&a, &b), 0.0);
    }

    #[test]
    fn test_partial_intrusion_yields_partial_confidence() {
        let radius = first_zone_radius(400.0, FREQ_MHZ);
        // Ridge top halfway into the zone at midspan.
        let ridge = 30.0 - radius / 2.0;
        let grid = grid_with_midspan_ridge(401, 21, ridge as f32);
        let a = ProbeSite::new(0.0, 10.0, 30.0);
        let b = ProbeSite::new(400.0, 10.0, 30.0);

        let v = validator(&grid, 0.4);
        let confidence = v.confidence(&a, &b);
        assert_relative_eq!(confidence, 0.5, epsilon = 1e-2);

        // Acceptance is monotone in the threshold: a permissive run
        // never loses links a strict run keeps.
        let strict = validator(&grid, 0.6);
        assert_relative_eq!(strict.confidence(&a, &b), 0.0);
    }

    #[test]
    fn test_symmetry() {
        let radius = first_zone_radius(400.0, FREQ_MHZ);
        let grid = grid_with_midspan_ridge(401, 21, (30.0 - radius * 0.7) as f32);
        let a = ProbeSite::new(0.0, 10.0, 30.0);
        let b = ProbeSite::new(400.0, 10.0, 30.0);
        let v = validator(&grid, 0.1);
        assert_relative_eq!(v.confidence(&a, &b), v.confidence(&b, &a), epsilon = 1e-12);
    }

    #[test]
    fn test_no_surface_is_clear() {
        let v = EllipsoidalValidator::new(None, LosConfig::default(), FREQ_MHZ).unwrap();
        let a = ProbeSite::new(0.0, 0.0, 10.0);
        let b = ProbeSite::new(300.0, 0.0, 12.0);
        assert_relative_eq!(v.confidence(&a, &b), 1.0);
    }
}
