use crate::{geometry, ProbeSite, SightlineError};
use geo::{geometry::Line, geometry::Polygon, Intersects};

/// Shared LOS knobs applied before any model-specific geometry.
#[derive(Debug, Clone)]
pub struct LosConfig {
    /// Maximum 3-D link length in meters.
    pub max_distance_m: f64,

    /// Minimum 3-D link length in meters.
    pub min_distance_m: f64,

    /// Easy-reject limit on the absolute elevation angle, degrees.
    /// A value of 90 or more disables the check.
    pub max_elevation_angle_deg: f64,

    /// Minimum clear fraction of the clearance volume for acceptance.
    pub confidence_threshold: f64,

    /// Polygons the sight line's 2-D projection must not cross.
    pub exclusion_zones: Vec<Polygon<f64>>,
}

impl Default for LosConfig {
    fn default() -> Self {
        Self {
            max_distance_m: 10_000.0,
            min_distance_m: 0.0,
            max_elevation_angle_deg: 25.0,
            confidence_threshold: 1.0,
            exclusion_zones: Vec::new(),
        }
    }
}

impl LosConfig {
    pub fn validate(&self) -> Result<(), SightlineError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(SightlineError::Threshold(self.confidence_threshold));
        }
        if self.min_distance_m > self.max_distance_m {
            return Err(SightlineError::DistanceRange(
                self.min_distance_m,
                self.max_distance_m,
            ));
        }
        Ok(())
    }

    /// Runs the precondition set, in order. Any hit rejects the pair
    /// with no raster work.
    pub(crate) fn passes_preflight(&self, site1: &ProbeSite, site2: &ProbeSite) -> bool {
        // Check 1: same ground position.
        if site1.x == site2.x && site1.y == site2.y {
            return false;
        }

        // Check 2: elevation angle beyond the scan limit.
        if self.max_elevation_angle_deg < 90.0 {
            let angle = geometry::elevation_angle_deg(site1, site2);
            if angle.abs() > self.max_elevation_angle_deg {
                return false;
            }
        }

        // Check 3: both sites on the same building.
        if let (Some(b1), Some(b2)) = (site1.building_id, site2.building_id) {
            if b1 == b2 {
                return false;
            }
        }

        // Check 4: 3-D length outside the configured range.
        let dist_sq = geometry::distance_sq_3d(site1, site2);
        let min_sq = self.min_distance_m * self.min_distance_m;
        let max_sq = self.max_distance_m * self.max_distance_m;
        if dist_sq < min_sq || dist_sq > max_sq {
            return false;
        }

        // Check 5: the 2-D projection crosses an exclusion zone.
        if !self.exclusion_zones.is_empty() {
            let line = Line::new((site1.x, site1.y), (site2.x, site2.y));
            for zone in &self.exclusion_zones {
                if zone.intersects(&line) {
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::{LosConfig, ProbeSite};
    use geo::polygon;

    #[test]
    fn test_same_ground_position_rejects() {
        let cfg = LosConfig::default();
        let a = ProbeSite::new(10.0, 10.0, 5.0);
        let b = ProbeSite::new(10.0, 10.0, 25.0);
        assert!(!cfg.passes_preflight(&a, &b));
    }

    #[test]
    fn test_same_building_rejects_regardless_of_geometry() {
        let cfg = LosConfig::default();
        let a = ProbeSite::new(0.0, 0.0, 5.0).on_building(7);
        let b = ProbeSite::new(40.0, 0.0, 30.0).on_building(7);
        assert!(!cfg.passes_preflight(&a, &b));
        let c = ProbeSite::new(40.0, 0.0, 30.0).on_building(8);
        assert!(cfg.passes_preflight(&a, &c));
    }

    #[test]
    fn test_elevation_angle_limit() {
        let cfg = LosConfig {
            max_elevation_angle_deg: 25.0,
            ..LosConfig::default()
        };
        let a = ProbeSite::new(0.0, 0.0, 0.0);
        let steep = ProbeSite::new(10.0, 0.0, 50.0);
        assert!(!cfg.passes_preflight(&a, &steep));

        let disabled = LosConfig {
            max_elevation_angle_deg: 90.0,
            ..LosConfig::default()
        };
        assert!(disabled.passes_preflight(&a, &steep));
    }

    #[test]
    fn test_distance_range() {
        let cfg = LosConfig {
            min_distance_m: 10.0,
            max_distance_m: 100.0,
            ..LosConfig::default()
        };
        let a = ProbeSite::new(0.0, 0.0, 0.0);
        assert!(!cfg.passes_preflight(&a, &ProbeSite::new(5.0, 0.0, 0.0)));
        assert!(!cfg.passes_preflight(&a, &ProbeSite::new(500.0, 0.0, 0.0)));
        assert!(cfg.passes_preflight(&a, &ProbeSite::new(50.0, 0.0, 0.0)));
    }

    #[test]
    fn test_exclusion_zone_crossing() {
        let cfg = LosConfig {
            exclusion_zones: vec![polygon![
                (x: 40.0, y: -10.0),
                (x: 60.0, y: -10.0),
                (x: 60.0, y: 10.0),
                (x: 40.0, y: 10.0),
            ]],
            ..LosConfig::default()
        };
        let a = ProbeSite::new(0.0, 0.0, 0.0);
        let b = ProbeSite::new(100.0, 0.0, 0.0);
        assert!(!cfg.passes_preflight(&a, &b));
        let c = ProbeSite::new(0.0, 50.0, 0.0);
        let d = ProbeSite::new(100.0, 50.0, 0.0);
        assert!(cfg.passes_preflight(&c, &d));
    }

    #[test]
    fn test_invalid_threshold() {
        let cfg = LosConfig {
            confidence_threshold: 1.5,
            ..LosConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
