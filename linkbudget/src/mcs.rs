//! MCS class tables.

use crate::mbps_to_gbps;
use serde::{Deserialize, Serialize};

/// One row of the MCS ↔ SNR ↔ throughput mapping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McsEntry {
    pub mcs: u32,
    pub snr_db: f64,
    pub throughput_mbps: f64,
    #[serde(default)]
    pub tx_backoff_db: f64,
}

/// The MCS table of one device class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McsTable {
    pub entries: Vec<McsEntry>,
}

impl Default for McsTable {
    /// Default 60 GHz table.
    fn default() -> Self {
        let rows = [
            (3, 3.0, 0.0, 0.0),
            (4, 4.5, 67.5, 0.0),
            (5, 5.0, 115.0, 0.0),
            (6, 5.5, 260.0, 0.0),
            (7, 7.5, 452.5, 0.0),
            (8, 9.0, 645.0, 0.0),
            (9, 12.0, 741.25, 0.0),
            (10, 14.0, 1030.0, 2.0),
            (11, 16.0, 1415.0, 4.0),
            (12, 18.0, 1800.0, 6.0),
        ];
        Self {
            entries: rows
                .iter()
                .map(|&(mcs, snr_db, throughput_mbps, tx_backoff_db)| McsEntry {
                    mcs,
                    snr_db,
                    throughput_mbps,
                    tx_backoff_db,
                })
                .collect(),
        }
    }
}

impl McsTable {
    /// Highest MCS class whose SNR threshold is satisfied, or 0 when
    /// the SNR is below every row.
    ///
    /// An SNR exactly on a row threshold admits that row (the
    /// higher-throughput class wins ties).
    pub fn mcs_for_snr(&self, snr_db: f64) -> u32 {
        if snr_db.is_nan() {
            return 0;
        }
        self.entries
            .iter()
            .filter(|row| snr_db >= row.snr_db)
            .map(|row| row.mcs)
            .max()
            .unwrap_or(0)
    }

    /// SNR threshold of the given class: the largest row threshold any
    /// class up to `mcs` satisfies; 0 below the table.
    pub fn snr_for_mcs(&self, mcs: u32) -> f64 {
        let reachable = self.entries.iter().filter(|row| mcs >= row.mcs);
        reachable
            .map(|row| row.snr_db)
            .fold(None, |best: Option<f64>, snr| {
                Some(best.map_or(snr, |b| b.max(snr)))
            })
            .unwrap_or(0.0)
    }

    /// Throughput of the given class in Gbps; 0 for unknown classes.
    pub fn capacity_gbps(&self, mcs: u32) -> f64 {
        self.entries
            .iter()
            .find(|row| row.mcs == mcs)
            .map(|row| mbps_to_gbps(row.throughput_mbps))
            .unwrap_or(0.0)
    }

    /// Tx power backoff of the given class in dB; 0 for unknown classes.
    pub fn backoff_db(&self, mcs: u32) -> f64 {
        self.entries
            .iter()
            .find(|row| row.mcs == mcs)
            .map(|row| row.tx_backoff_db)
            .unwrap_or(0.0)
    }

    /// Rows ordered as given, used by the optimizer's per-class
    /// decision variables.
    pub fn classes(&self) -> impl Iterator<Item = &McsEntry> {
        self.entries.iter()
    }

    /// The minimum SNR any row requires.
    pub fn min_snr(&self) -> f64 {
        self.entries
            .iter()
            .map(|row| row.snr_db)
            .fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::McsTable;
    use approx::assert_relative_eq;

    #[test]
    fn test_mcs_for_snr_brackets() {
        let table = McsTable::default();
        assert_eq!(table.mcs_for_snr(2.0), 0);
        assert_eq!(table.mcs_for_snr(3.0), 3);
        assert_eq!(table.mcs_for_snr(11.9), 8);
        assert_eq!(table.mcs_for_snr(30.0), 12);
    }

    #[test]
    fn test_equality_admits_higher_class() {
        let table = McsTable::default();
        // 12 dB sits exactly on the MCS 9 threshold.
        assert_eq!(table.mcs_for_snr(12.0), 9);
    }

    #[test]
    fn test_nan_snr_is_class_zero() {
        let table = McsTable::default();
        assert_eq!(table.mcs_for_snr(f64::NAN), 0);
    }

    #[test]
    fn test_capacity_and_backoff() {
        let table = McsTable::default();
        assert_relative_eq!(table.capacity_gbps(12), 1.8);
        assert_relative_eq!(table.capacity_gbps(9), 0.74125);
        assert_relative_eq!(table.capacity_gbps(2), 0.0);
        assert_relative_eq!(table.backoff_db(12), 6.0);
        assert_relative_eq!(table.backoff_db(5), 0.0);
    }

    #[test]
    fn test_snr_for_mcs() {
        let table = McsTable::default();
        assert_relative_eq!(table.snr_for_mcs(9), 12.0);
        assert_relative_eq!(table.snr_for_mcs(2), 0.0);
        // Missing class resolves to the next lower row.
        assert_relative_eq!(table.snr_for_mcs(13), 18.0);
    }
}
