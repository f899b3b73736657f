//! # Link Budget
//!
//! `linkbudget` models the radio side of a millimeter-wave mesh:
//! free-space and weather losses, antenna and scan pattern gains,
//! received signal levels and the mapping from SNR to MCS class and
//! throughput.
//!
//! All power values are dBm, gains and losses dB, distances meters
//! unless a name says otherwise.

mod estimate;
mod loss;
mod mcs;
mod pattern;

pub use crate::{
    estimate::{
        deviation_net_gain, estimate_link_budget, interference_rsl_dbm, interference_rsl_mw,
        max_los_distance, LinkBudget, RadioParams,
    },
    loss::{oxygen_loss_db, rain_loss_db},
    mcs::{McsEntry, McsTable},
    pattern::{AntennaPattern, ScanPattern},
};

/// Margin constant of the free-space path loss formula.
const FSPL_MARGIN: f64 = 92.45;

pub fn mhz_to_ghz(mhz: f64) -> f64 {
    mhz / 1000.0
}

pub fn meters_to_km(meters: f64) -> f64 {
    meters / 1000.0
}

pub fn mbps_to_gbps(mbps: f64) -> f64 {
    mbps / 1000.0
}

/// Converts dBm to mW (or dB to a power ratio).
pub fn log_to_linear(db_value: f64) -> f64 {
    10f64.powf(db_value / 10.0)
}

/// Converts mW to dBm (or a power ratio to dB).
pub fn linear_to_log(linear_value: f64) -> f64 {
    10.0 * linear_value.log10()
}

/// Free-space path loss in dB for a link of `d_km` at `f_ghz`.
///
/// Returns zero below the distance where the formula would go
/// negative.
pub fn fspl(d_km: f64, f_ghz: f64) -> f64 {
    let tolerance = 10f64.powf(-FSPL_MARGIN / 20.0 - f_ghz.log10());
    if d_km <= tolerance {
        return 0.0;
    }
    20.0 * (d_km.log10() + f_ghz.log10()) + FSPL_MARGIN
}

/// Received gain minus losses in dBi.
///
/// `external_loss_db` bundles weather losses such as rain and oxygen
/// absorption.
#[allow(clippy::too_many_arguments)]
pub fn net_gain(
    tx_gain_dbi: f64,
    tx_loss_db: f64,
    d_km: f64,
    f_ghz: f64,
    rx_gain_dbi: f64,
    rx_loss_db: f64,
    external_loss_db: f64,
) -> f64 {
    tx_gain_dbi - tx_loss_db + rx_gain_dbi - rx_loss_db - fspl(d_km, f_ghz) - external_loss_db
}

/// Received signal level: Tx power plus net gain.
pub fn rsl(tx_power_dbm: f64, net_gain_dbi: f64) -> f64 {
    tx_power_dbm + net_gain_dbi
}

/// Noise power: noise figure plus thermal noise power.
pub fn noise_power(noise_figure_db: f64, thermal_noise_dbm: f64) -> f64 {
    noise_figure_db + thermal_noise_dbm
}

/// SNR: received signal level over the noise power.
pub fn snr(rsl_dbm: f64, noise_power_dbm: f64) -> f64 {
    rsl_dbm - noise_power_dbm
}

/// Tx power needed to reach `rsl_dbm` through `net_gain_dbi`.
pub fn tx_power_from_rsl(rsl_dbm: f64, net_gain_dbi: f64) -> f64 {
    rsl_dbm - net_gain_dbi
}

#[cfg(test)]
mod tests {
    use super::{fspl, linear_to_log, log_to_linear, net_gain, noise_power, rsl, snr};
    use approx::assert_relative_eq;

    #[test]
    fn test_fspl_60ghz() {
        // 100 m at 60 GHz.
        assert_relative_eq!(fspl(0.1, 60.0), 108.01, epsilon = 0.01);
        // Doubling distance costs ~6 dB.
        assert_relative_eq!(fspl(0.2, 60.0) - fspl(0.1, 60.0), 6.02, epsilon = 0.01);
    }

    #[test]
    fn test_fspl_degenerate_distance() {
        assert_eq!(fspl(0.0, 60.0), 0.0);
        assert_eq!(fspl(1e-12, 60.0), 0.0);
    }

    #[test]
    fn test_log_linear_round_trip() {
        for dbm in [-90.0, -30.0, 0.0, 16.0] {
            assert_relative_eq!(linear_to_log(log_to_linear(dbm)), dbm, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rsl_chain() {
        let gain = net_gain(30.0, 0.0, 0.1, 60.0, 30.0, 0.0, 0.0);
        let rsl_dbm = rsl(16.0, gain);
        let np = noise_power(7.0, -81.0);
        assert_relative_eq!(np, -74.0);
        assert_relative_eq!(snr(rsl_dbm, np), 16.0 + 60.0 - 108.01 + 74.0, epsilon = 0.01);
    }
}
