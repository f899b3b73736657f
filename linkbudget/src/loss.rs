//! Weather-dependent losses.

use crate::mhz_to_ghz;

/// Frequency-dependent oxygen absorption, dB/km, ETSI TR 138 901
/// table 7.6.1-1. Zero outside the tabulated band.
const OXYGEN_LOSS_DB_PER_KM: [(f64, f64); 17] = [
    (52.0, 0.0),
    (53.0, 1.0),
    (54.0, 2.2),
    (55.0, 4.0),
    (56.0, 6.6),
    (57.0, 9.7),
    (58.0, 12.6),
    (59.0, 14.6),
    (60.0, 15.0),
    (61.0, 14.6),
    (62.0, 14.3),
    (63.0, 10.5),
    (64.0, 6.8),
    (65.0, 3.9),
    (66.0, 1.9),
    (67.0, 1.0),
    (68.0, 0.0),
];

/// Oxygen absorption loss in dB over `dist_km` at `carrier_frequency_mhz`.
pub fn oxygen_loss_db(dist_km: f64, carrier_frequency_mhz: f64) -> f64 {
    let f_ghz = mhz_to_ghz(carrier_frequency_mhz);
    let table = &OXYGEN_LOSS_DB_PER_KM;
    if f_ghz < table[0].0 || f_ghz > table[table.len() - 1].0 {
        return 0.0;
    }
    let mut loss_per_km = 0.0;
    for window in table.windows(2) {
        let (f0, l0) = window[0];
        let (f1, l1) = window[1];
        if f_ghz >= f0 && f_ghz <= f1 {
            loss_per_km = l0 + (l1 - l0) * (f_ghz - f0) / (f1 - f0);
            break;
        }
    }
    loss_per_km * dist_km
}

/// ITU rain attenuation in dB over `dist_km`.
///
/// `link_availability_percentage` is the share of a year the link must
/// be live; the outage probability drives the attenuation percentile.
pub fn rain_loss_db(
    dist_km: f64,
    rain_rate_mm_per_hr: f64,
    link_availability_percentage: f64,
    carrier_frequency_mhz: f64,
) -> f64 {
    if dist_km <= 0.0 {
        return 0.0;
    }

    let f_ghz = mhz_to_ghz(carrier_frequency_mhz);
    let p = 100.0 - link_availability_percentage;

    let k = 0.8515;
    let alpha = 0.7486;
    let gamma_r = k * rain_rate_mm_per_hr.powf(alpha);
    let a = gamma_r * dist_km;

    let r = 1.0
        / (0.477
            * dist_km.powf(0.633)
            * rain_rate_mm_per_hr.powf(0.073 * alpha)
            * f_ghz.powf(0.123)
            - 10.579 * (1.0 - (-0.024 * dist_km).exp()));
    let r = r.min(2.5);
    let a_001 = a * r;

    let c0 = 0.12 + 0.4 * (f_ghz / 10.0).powf(0.8).log10();
    let c1 = 0.07f64.powf(c0) * 0.12f64.powf(1.0 - c0);
    let c2 = 0.855 * c0 + 0.546 * (1.0 - c0);
    let c3 = 0.139 * c0 + 0.043 * (1.0 - c0);
    let a_p = a_001 * c1 * p.powf(-(c2 + c3 * p.log10()));
    a_p.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::{oxygen_loss_db, rain_loss_db};
    use approx::assert_relative_eq;

    #[test]
    fn test_oxygen_peak_at_60ghz() {
        assert_relative_eq!(oxygen_loss_db(1.0, 60_000.0), 15.0);
        assert_relative_eq!(oxygen_loss_db(0.5, 60_000.0), 7.5);
        // Interpolated halfway between 59 and 60 GHz rows.
        assert_relative_eq!(oxygen_loss_db(1.0, 59_500.0), 14.8);
    }

    #[test]
    fn test_oxygen_outside_band() {
        assert_eq!(oxygen_loss_db(1.0, 28_000.0), 0.0);
        assert_eq!(oxygen_loss_db(1.0, 80_000.0), 0.0);
    }

    #[test]
    fn test_rain_zero_distance() {
        assert_eq!(rain_loss_db(0.0, 30.0, 99.9, 60_000.0), 0.0);
    }

    #[test]
    fn test_rain_monotone_in_distance() {
        let short = rain_loss_db(0.1, 30.0, 99.9, 60_000.0);
        let long = rain_loss_db(1.0, 30.0, 99.9, 60_000.0);
        assert!(short > 0.0);
        assert!(long > short);
    }

    #[test]
    fn test_rain_grows_with_availability() {
        let relaxed = rain_loss_db(0.5, 30.0, 99.0, 60_000.0);
        let strict = rain_loss_db(0.5, 30.0, 99.99, 60_000.0);
        assert!(strict > relaxed);
    }
}
