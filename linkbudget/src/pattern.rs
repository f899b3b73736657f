//! Antenna and beam-scan pattern tables.

use serde::{Deserialize, Serialize};

/// Planet-style antenna pattern: per-degree gain offsets on the
/// horizontal and vertical axes, relative to boresight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntennaPattern {
    /// Gain offsets indexed by azimuth deviation degree in `[0, 360)`.
    pub azimuth_db: Vec<f64>,
    /// Gain offsets indexed by elevation deviation degree in `[0, 360)`.
    pub elevation_db: Vec<f64>,
}

impl AntennaPattern {
    /// Pattern loss at the given deviations from boresight, degrees in
    /// `(-180, 180]`.
    pub fn offset_db(&self, az_deviation_deg: f64, el_deviation_deg: f64) -> f64 {
        lookup_360(&self.azimuth_db, az_deviation_deg) + lookup_360(&self.elevation_db, el_deviation_deg)
    }
}

/// Deviations are rounded first so small negative values map to 0
/// rather than 360.
fn lookup_360(table: &[f64], deviation_deg: f64) -> f64 {
    if table.is_empty() {
        return 0.0;
    }
    let mut degree = deviation_deg.round() as i64;
    if degree < 0 {
        degree += 360;
    }
    let index = (degree.rem_euclid(360)) as usize;
    *table.get(index).unwrap_or(&0.0)
}

/// Beam-scanning pattern: gain at (scan azimuth, scan elevation),
/// normalized against the pattern's own maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPattern {
    /// Rows of (azimuth scan angle, elevation scan angle, gain dB).
    pub entries: Vec<(f64, f64, f64)>,
}

impl ScanPattern {
    /// Scan loss at the given deviations: the gain of the nearest
    /// tabulated scan angle minus the pattern's maximum gain.
    pub fn loss_db(&self, az_deviation_deg: f64, el_deviation_deg: f64) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let max_gain = self
            .entries
            .iter()
            .map(|&(_, _, gain)| gain)
            .fold(f64::NEG_INFINITY, f64::max);

        // Nearest azimuth first, then nearest elevation within it.
        let nearest_az = self
            .entries
            .iter()
            .map(|&(az, _, _)| az)
            .min_by(|a, b| {
                (a - az_deviation_deg)
                    .abs()
                    .total_cmp(&(b - az_deviation_deg).abs())
            })
            .unwrap();
        let gain = self
            .entries
            .iter()
            .filter(|&&(az, _, _)| az == nearest_az)
            .min_by(|a, b| {
                (a.1 - el_deviation_deg)
                    .abs()
                    .total_cmp(&(b.1 - el_deviation_deg).abs())
            })
            .map(|&(_, _, gain)| gain)
            .unwrap();

        gain - max_gain
    }
}

#[cfg(test)]
mod tests {
    use super::{AntennaPattern, ScanPattern};
    use approx::assert_relative_eq;

    #[test]
    fn test_antenna_pattern_wraps_negative_deviation() {
        let mut azimuth_db = vec![0.0; 360];
        azimuth_db[350] = -12.0;
        azimuth_db[10] = -3.0;
        let pattern = AntennaPattern {
            azimuth_db,
            elevation_db: vec![0.0; 360],
        };
        assert_relative_eq!(pattern.offset_db(-10.0, 0.0), -12.0);
        assert_relative_eq!(pattern.offset_db(10.0, 0.0), -3.0);
        // Rounds toward zero degree rather than wrapping to 360.
        assert_relative_eq!(pattern.offset_db(-0.2, 0.0), 0.0);
    }

    #[test]
    fn test_scan_pattern_normalizes_to_max() {
        let pattern = ScanPattern {
            entries: vec![(0.0, 0.0, 30.0), (20.0, 0.0, 27.0), (40.0, 0.0, 22.0)],
        };
        assert_relative_eq!(pattern.loss_db(0.0, 0.0), 0.0);
        assert_relative_eq!(pattern.loss_db(20.0, 0.0), -3.0);
        // Nearest-angle rounding.
        assert_relative_eq!(pattern.loss_db(32.0, 0.0), -8.0);
    }
}
