//! FSPL-based link budget estimation.

use crate::{
    log_to_linear, loss, mcs::McsTable, meters_to_km, mhz_to_ghz, net_gain, noise_power,
    pattern::{AntennaPattern, ScanPattern},
    rsl, snr, tx_power_from_rsl,
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Radio parameters of one sector hardware profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioParams {
    pub carrier_frequency_mhz: f64,
    pub horizontal_scan_range_deg: f64,
    pub number_of_sectors_per_node: u8,
    pub antenna_boresight_gain_dbi: f64,
    pub maximum_tx_power_dbm: f64,
    pub minimum_tx_power_dbm: Option<f64>,
    pub maximum_eirp_dbm: Option<f64>,
    pub tx_diversity_gain_db: f64,
    pub rx_diversity_gain_db: f64,
    pub tx_miscellaneous_loss_db: f64,
    pub rx_miscellaneous_loss_db: f64,
    pub noise_figure_db: f64,
    pub thermal_noise_power_dbm: f64,
    pub rain_rate_mm_per_hr: f64,
    pub link_availability_percentage: f64,
    pub minimum_mcs_level: Option<u32>,
    pub antenna_pattern: Option<AntennaPattern>,
    pub scan_pattern: Option<ScanPattern>,
    pub mcs_table: McsTable,
}

impl Default for RadioParams {
    fn default() -> Self {
        Self {
            carrier_frequency_mhz: 60_000.0,
            horizontal_scan_range_deg: 70.0,
            number_of_sectors_per_node: 1,
            antenna_boresight_gain_dbi: 30.0,
            maximum_tx_power_dbm: 16.0,
            minimum_tx_power_dbm: None,
            maximum_eirp_dbm: None,
            tx_diversity_gain_db: 0.0,
            rx_diversity_gain_db: 0.0,
            tx_miscellaneous_loss_db: 0.0,
            rx_miscellaneous_loss_db: 0.0,
            noise_figure_db: 7.0,
            thermal_noise_power_dbm: -81.0,
            rain_rate_mm_per_hr: 30.0,
            link_availability_percentage: 99.9,
            minimum_mcs_level: None,
            antenna_pattern: None,
            scan_pattern: None,
            mcs_table: McsTable::default(),
        }
    }
}

impl RadioParams {
    /// Noise power at this radio's receiver.
    pub fn noise_power_dbm(&self) -> f64 {
        noise_power(self.noise_figure_db, self.thermal_noise_power_dbm)
    }

    /// Directional gain at the given deviations from boresight.
    ///
    /// The scan pattern takes precedence over the antenna pattern when
    /// both are present; with neither, the boresight gain applies at
    /// every angle.
    pub fn gain_dbi(&self, az_deviation_deg: f64, el_deviation_deg: f64, diversity_db: f64) -> f64 {
        if let Some(scan) = &self.scan_pattern {
            return self.antenna_boresight_gain_dbi
                + scan.loss_db(az_deviation_deg, el_deviation_deg)
                + diversity_db;
        }
        if let Some(pattern) = &self.antenna_pattern {
            return self.antenna_boresight_gain_dbi
                + pattern.offset_db(az_deviation_deg, el_deviation_deg)
                + diversity_db;
        }
        self.antenna_boresight_gain_dbi + diversity_db
    }

    /// Maximum Tx power honoring the EIRP cap and the minimum floor.
    pub fn max_tx_power_dbm(&self) -> f64 {
        let mut max_power = self.maximum_tx_power_dbm;
        if let Some(eirp) = self.maximum_eirp_dbm {
            let boresight = self.gain_dbi(0.0, 0.0, self.tx_diversity_gain_db);
            max_power = max_power.min(eirp - boresight);
        }
        if let Some(floor) = self.minimum_tx_power_dbm {
            max_power = max_power.max(floor);
        }
        max_power
    }
}

/// Link budget measurements for one directed link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkBudget {
    pub mcs: u32,
    pub rsl_dbm: f64,
    pub snr_db: f64,
    pub capacity_gbps: f64,
    pub tx_power_dbm: f64,
}

/// Net gain between two radios at the given deviations, including
/// weather losses.
pub fn deviation_net_gain(
    dist_m: f64,
    tx: &RadioParams,
    rx: &RadioParams,
    tx_deviation_deg: f64,
    rx_deviation_deg: f64,
    tx_el_deviation_deg: f64,
    rx_el_deviation_deg: f64,
) -> f64 {
    let dist_km = meters_to_km(dist_m);
    let f_ghz = mhz_to_ghz(tx.carrier_frequency_mhz);
    let tx_gain = tx.gain_dbi(tx_deviation_deg, tx_el_deviation_deg, tx.tx_diversity_gain_db);
    let rx_gain = rx.gain_dbi(rx_deviation_deg, rx_el_deviation_deg, rx.rx_diversity_gain_db);
    let rain = loss::rain_loss_db(
        dist_km,
        tx.rain_rate_mm_per_hr,
        tx.link_availability_percentage,
        tx.carrier_frequency_mhz,
    );
    let oxygen = loss::oxygen_loss_db(dist_km, tx.carrier_frequency_mhz);
    net_gain(
        tx_gain,
        tx.tx_miscellaneous_loss_db,
        dist_km,
        f_ghz,
        rx_gain,
        rx.rx_miscellaneous_loss_db,
        rain + oxygen,
    )
}

/// Estimates the budget of a directed link from FSPL.
///
/// The class found at maximum power is walked down until its Tx backoff
/// leaves enough headroom, then RSL and SNR are recomputed at the
/// backed-off power. The output Tx power is the maximum allowed for the
/// final class, which keeps interference estimates worst-case.
pub fn estimate_link_budget(
    dist_m: f64,
    tx: &RadioParams,
    rx: &RadioParams,
    tx_deviation_deg: f64,
    rx_deviation_deg: f64,
    tx_el_deviation_deg: f64,
    rx_el_deviation_deg: f64,
) -> LinkBudget {
    let net_gain_dbi = deviation_net_gain(
        dist_m,
        tx,
        rx,
        tx_deviation_deg,
        rx_deviation_deg,
        tx_el_deviation_deg,
        rx_el_deviation_deg,
    );
    let np_dbm = rx.noise_power_dbm();
    let max_tx_power = tx.max_tx_power_dbm();
    let table = &rx.mcs_table;

    let rsl_dbm = rsl(max_tx_power, net_gain_dbi);
    let mut mcs = table.mcs_for_snr(snr(rsl_dbm, np_dbm));

    // Walk the class down until the backed-off power supports it.
    loop {
        if mcs == 0 {
            break;
        }
        let required_rsl = table.snr_for_mcs(mcs) + np_dbm;
        let mut required_power = tx_power_from_rsl(required_rsl, net_gain_dbi);
        if let Some(floor) = tx.minimum_tx_power_dbm {
            required_power = required_power.max(floor);
        }
        if required_power <= max_tx_power - table.backoff_db(mcs) {
            break;
        }
        mcs -= 1;
    }

    let capacity_gbps = table.capacity_gbps(mcs);
    let tx_power_dbm = max_tx_power - table.backoff_db(mcs);
    let rsl_dbm = rsl(tx_power_dbm, net_gain_dbi);
    let snr_db = snr(rsl_dbm, np_dbm);

    LinkBudget {
        mcs,
        rsl_dbm,
        snr_db,
        capacity_gbps,
        tx_power_dbm,
    }
}

/// Worst-case received interference level of a transmitter heard at the
/// given deviations: maximum Tx power, no backoff.
pub fn interference_rsl_dbm(
    dist_m: f64,
    tx: &RadioParams,
    rx: &RadioParams,
    tx_deviation_deg: f64,
    rx_deviation_deg: f64,
    tx_el_deviation_deg: f64,
    rx_el_deviation_deg: f64,
) -> f64 {
    let gain = deviation_net_gain(
        dist_m,
        tx,
        rx,
        tx_deviation_deg,
        rx_deviation_deg,
        tx_el_deviation_deg,
        rx_el_deviation_deg,
    );
    rsl(tx.max_tx_power_dbm(), gain)
}

/// Longest boresight-aligned link that still reaches `minimum_mcs`,
/// found by bisection between `lo_m` and `hi_m`.
pub fn max_los_distance(
    tx: &RadioParams,
    rx: &RadioParams,
    minimum_mcs: u32,
    lo_m: f64,
    hi_m: f64,
) -> f64 {
    let reaches = |dist_m: f64| {
        estimate_link_budget(dist_m, tx, rx, 0.0, 0.0, 0.0, 0.0).mcs >= minimum_mcs
    };
    if !reaches(lo_m.max(1.0)) {
        return lo_m;
    }
    let (mut lo, mut hi) = (lo_m.max(1.0), hi_m);
    if reaches(hi) {
        return hi;
    }
    while hi - lo > 1.0 {
        let mid = (lo + hi) / 2.0;
        if reaches(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    debug!("MCS {minimum_mcs} reachable out to {lo:.0} m");
    lo
}

/// The interference contribution is linear in the duty cycle, so the
/// optimizer consumes it in mW.
pub fn interference_rsl_mw(rsl_dbm: f64) -> f64 {
    if rsl_dbm == f64::NEG_INFINITY {
        0.0
    } else {
        log_to_linear(rsl_dbm)
    }
}

#[cfg(test)]
mod tests {
    use super::{estimate_link_budget, max_los_distance, RadioParams};
    use approx::assert_relative_eq;

    fn radio() -> RadioParams {
        RadioParams::default()
    }

    #[test]
    fn test_short_link_reaches_top_class() {
        let budget = estimate_link_budget(50.0, &radio(), &radio(), 0.0, 0.0, 0.0, 0.0);
        assert_eq!(budget.mcs, 12);
        assert_relative_eq!(budget.capacity_gbps, 1.8);
        // Backoff of the top class applies.
        assert_relative_eq!(budget.tx_power_dbm, 16.0 - 6.0);
    }

    #[test]
    fn test_long_link_degrades() {
        let near = estimate_link_budget(100.0, &radio(), &radio(), 0.0, 0.0, 0.0, 0.0);
        let far = estimate_link_budget(600.0, &radio(), &radio(), 0.0, 0.0, 0.0, 0.0);
        assert!(far.mcs < near.mcs);
        assert!(far.capacity_gbps < near.capacity_gbps);
    }

    #[test]
    fn test_unreachable_link_is_class_zero() {
        let budget = estimate_link_budget(5_000.0, &radio(), &radio(), 0.0, 0.0, 0.0, 0.0);
        assert_eq!(budget.mcs, 0);
        assert_relative_eq!(budget.capacity_gbps, 0.0);
    }

    #[test]
    fn test_eirp_cap_reduces_power() {
        let capped = RadioParams {
            maximum_eirp_dbm: Some(40.0),
            ..radio()
        };
        // 40 dBm EIRP minus 30 dBi boresight gain caps power at 10 dBm.
        assert_relative_eq!(capped.max_tx_power_dbm(), 10.0);
    }

    #[test]
    fn test_max_los_distance_bisection() {
        let tx = radio();
        let rx = radio();
        let distance = max_los_distance(&tx, &rx, 9, 0.0, 10_000.0);
        assert!(distance > 50.0 && distance < 10_000.0);
        let budget = estimate_link_budget(distance, &tx, &rx, 0.0, 0.0, 0.0, 0.0);
        assert!(budget.mcs >= 9);
        let beyond = estimate_link_budget(distance + 10.0, &tx, &rx, 0.0, 0.0, 0.0, 0.0);
        assert!(beyond.mcs < 9);
    }
}
