//! Building outlines and automatic site detection.

use demgrid::Grid;
use geo::{
    geometry::{Coord, Point, Polygon},
    Centroid, Contains,
};
use log::debug;
use serde::{Deserialize, Serialize};

/// A building footprint in projected meters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildingOutline {
    pub id: u32,
    pub polygon: Polygon<f64>,
    /// Known structure height; used when no surface raster is given.
    pub height_m: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteDetectionOptions {
    pub detect_highest: bool,
    pub detect_centers: bool,
    pub detect_corners: bool,
    /// Only corners at least this sharp qualify.
    pub max_corner_angle_deg: f64,
    /// Antenna mounting height above the detected rooftop point.
    pub mounting_height_m: f64,
}

impl Default for SiteDetectionOptions {
    fn default() -> Self {
        Self {
            detect_highest: true,
            detect_centers: false,
            detect_corners: false,
            max_corner_angle_deg: 90.0,
            mounting_height_m: 1.5,
        }
    }
}

/// A rooftop candidate location produced by detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedLocation {
    pub xy: Coord<f64>,
    pub altitude_m: f64,
    pub building_id: u32,
}

/// Detects candidate rooftop locations on each building: the highest
/// surface sample, the centroid, and qualifying corners.
pub fn detect_building_sites(
    outlines: &[BuildingOutline],
    surface: Option<&Grid>,
    options: &SiteDetectionOptions,
) -> Vec<DetectedLocation> {
    let mut detected = Vec::new();

    for outline in outlines {
        let rooftop = |xy: Coord<f64>| -> f64 {
            let base = match surface {
                Some(grid) => f64::from(grid.value_clamped(xy)),
                None => outline.height_m.unwrap_or(0.0),
            };
            base + options.mounting_height_m
        };

        if options.detect_highest {
            if let Some(grid) = surface {
                if let Some(peak) = highest_cell(grid, &outline.polygon) {
                    detected.push(DetectedLocation {
                        xy: peak,
                        altitude_m: f64::from(grid.value_clamped(peak)) + options.mounting_height_m,
                        building_id: outline.id,
                    });
                }
            }
        }

        if options.detect_centers {
            if let Some(center) = outline.polygon.centroid() {
                let xy = Coord {
                    x: center.x(),
                    y: center.y(),
                };
                detected.push(DetectedLocation {
                    xy,
                    altitude_m: rooftop(xy),
                    building_id: outline.id,
                });
            }
        }

        if options.detect_corners {
            for corner in qualifying_corners(&outline.polygon, options.max_corner_angle_deg) {
                detected.push(DetectedLocation {
                    xy: corner,
                    altitude_m: rooftop(corner),
                    building_id: outline.id,
                });
            }
        }
    }

    debug!("site detection found {} rooftop candidates", detected.len());
    detected
}

/// Highest surface sample inside the footprint; ties resolve to the
/// first cell in scanline order.
fn highest_cell(grid: &Grid, polygon: &Polygon<f64>) -> Option<Coord<f64>> {
    let exterior = polygon.exterior();
    let min_x = exterior.coords().map(|c| c.x).fold(f64::INFINITY, f64::min);
    let max_x = exterior
        .coords()
        .map(|c| c.x)
        .fold(f64::NEG_INFINITY, f64::max);
    let min_y = exterior.coords().map(|c| c.y).fold(f64::INFINITY, f64::min);
    let max_y = exterior
        .coords()
        .map(|c| c.y)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut best: Option<(f64, Coord<f64>)> = None;
    for cell in grid.cells_within(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y }) {
        let xy = Coord { x: cell.x, y: cell.y };
        if !polygon.contains(&Point::from(xy)) {
            continue;
        }
        match best {
            Some((elev, _)) if cell.elevation <= elev => {}
            _ => best = Some((cell.elevation, xy)),
        }
    }
    best.map(|(_, xy)| xy)
}

/// Exterior-ring vertices whose interior angle is at most the limit.
fn qualifying_corners(polygon: &Polygon<f64>, max_angle_deg: f64) -> Vec<Coord<f64>> {
    // The exterior ring is closed, so skip the repeated last vertex.
    let ring: Vec<Coord<f64>> = polygon.exterior().coords().copied().collect();
    if ring.len() < 4 {
        return Vec::new();
    }
    let open = &ring[..ring.len() - 1];
    let n = open.len();

    let mut corners = Vec::new();
    for i in 0..n {
        let prev = open[(i + n - 1) % n];
        let here = open[i];
        let next = open[(i + 1) % n];
        let v1 = (prev.x - here.x, prev.y - here.y);
        let v2 = (next.x - here.x, next.y - here.y);
        let dot = v1.0 * v2.0 + v1.1 * v2.1;
        let norm = (v1.0 * v1.0 + v1.1 * v1.1).sqrt() * (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
        if norm == 0.0 {
            continue;
        }
        let angle = (dot / norm).clamp(-1.0, 1.0).acos().to_degrees();
        if angle <= max_angle_deg {
            corners.push(here);
        }
    }
    corners
}

#[cfg(test)]
mod tests {
    use super::{detect_building_sites, BuildingOutline, SiteDetectionOptions};
    use demgrid::Grid;
    use geo::geometry::Coord;
    use geo::polygon;

    fn square_outline(id: u32) -> BuildingOutline {
        BuildingOutline {
            id,
            polygon: polygon![
                (x: 2.0, y: 2.0),
                (x: 8.0, y: 2.0),
                (x: 8.0, y: 8.0),
                (x: 2.0, y: 8.0),
            ],
            height_m: Some(12.0),
        }
    }

    #[test]
    fn test_highest_point_detection() {
        let mut samples = vec![5.0f32; 11 * 11];
        // Peak at (4, 6): row index iy = 10 - 6 = 4.
        samples[4 * 11 + 4] = 20.0;
        let grid = Grid::from_samples(Coord { x: 0.0, y: 10.0 }, 1.0, 11, 11, samples).unwrap();

        let detected = detect_building_sites(
            &[square_outline(3)],
            Some(&grid),
            &SiteDetectionOptions::default(),
        );
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].xy, Coord { x: 4.0, y: 6.0 });
        assert_eq!(detected[0].building_id, 3);
        assert_eq!(detected[0].altitude_m, 21.5);
    }

    #[test]
    fn test_centroid_without_surface_uses_outline_height() {
        let options = SiteDetectionOptions {
            detect_highest: false,
            detect_centers: true,
            ..SiteDetectionOptions::default()
        };
        let detected = detect_building_sites(&[square_outline(1)], None, &options);
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].xy, Coord { x: 5.0, y: 5.0 });
        assert_eq!(detected[0].altitude_m, 13.5);
    }

    #[test]
    fn test_right_angle_corners_qualify() {
        let options = SiteDetectionOptions {
            detect_highest: false,
            detect_corners: true,
            max_corner_angle_deg: 90.0,
            ..SiteDetectionOptions::default()
        };
        let detected = detect_building_sites(&[square_outline(1)], None, &options);
        assert_eq!(detected.len(), 4);

        let strict = SiteDetectionOptions {
            detect_highest: false,
            detect_corners: true,
            max_corner_angle_deg: 60.0,
            ..SiteDetectionOptions::default()
        };
        let none = detect_building_sites(&[square_outline(1)], None, &strict);
        assert!(none.is_empty());
    }
}
