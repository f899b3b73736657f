//! Directed links.

use crate::{ids::stable_id, Status};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    /// DN↔DN or DN↔POP; exists in both directions and is selected
    /// symmetrically.
    Backhaul,
    /// DN→CN; directional.
    Access,
    /// Wired interconnect, not subject to time division.
    Wired,
}

/// A directed radio (or wired) link between two sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    id: String,
    tx_site: String,
    rx_site: String,
    pub kind: LinkKind,
    pub tx_sector: Option<String>,
    pub rx_sector: Option<String>,
    pub distance_m: f64,
    /// Compass azimuth of the beam leaving the transmitter.
    pub tx_azimuth_deg: f64,
    /// Compass azimuth of the beam arriving at the receiver.
    pub rx_azimuth_deg: f64,
    /// Horizontal deviation from the tx sector boresight.
    pub tx_deviation_deg: f64,
    /// Horizontal deviation from the rx sector boresight.
    pub rx_deviation_deg: f64,
    /// Elevation angle of the link in the tx direction.
    pub el_deviation_deg: f64,
    pub confidence: f64,
    pub rsl_dbm: f64,
    pub snr_db: f64,
    pub sinr_db: f64,
    pub mcs: u32,
    pub capacity_gbps: f64,
    pub tx_power_dbm: f64,
    pub status: Status,
    /// Redundant links carry no planned flow and cause no interference.
    pub is_redundant: bool,
    /// Time-division share assigned by the optimizer.
    pub tdm: f64,
}

impl Link {
    pub fn new(tx_site: &str, rx_site: &str, kind: LinkKind, status: Status) -> Self {
        let id = stable_id(&[tx_site, rx_site]);
        Self {
            id,
            tx_site: tx_site.to_owned(),
            rx_site: rx_site.to_owned(),
            kind,
            tx_sector: None,
            rx_sector: None,
            distance_m: 0.0,
            tx_azimuth_deg: 0.0,
            rx_azimuth_deg: 0.0,
            tx_deviation_deg: 0.0,
            rx_deviation_deg: 0.0,
            el_deviation_deg: 0.0,
            confidence: 0.0,
            rsl_dbm: f64::NEG_INFINITY,
            snr_db: f64::NEG_INFINITY,
            sinr_db: f64::NEG_INFINITY,
            mcs: 0,
            capacity_gbps: 0.0,
            tx_power_dbm: 0.0,
            status,
            is_redundant: false,
            tdm: 0.0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tx_site(&self) -> &str {
        &self.tx_site
    }

    pub fn rx_site(&self) -> &str {
        &self.rx_site
    }

    pub fn site_pair(&self) -> (String, String) {
        (self.tx_site.clone(), self.rx_site.clone())
    }

    /// True when either endpoint sector is missing, which keeps the
    /// link out of any optimization.
    pub fn is_out_of_sector(&self) -> bool {
        self.kind != LinkKind::Wired && (self.tx_sector.is_none() || self.rx_sector.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::{Link, LinkKind, Status};

    #[test]
    fn test_direction_is_part_of_identity() {
        let ab = Link::new("a", "b", LinkKind::Backhaul, Status::Candidate);
        let ba = Link::new("b", "a", LinkKind::Backhaul, Status::Candidate);
        assert_ne!(ab.id(), ba.id());
        assert_eq!(
            ab.id(),
            Link::new("a", "b", LinkKind::Backhaul, Status::Candidate).id()
        );
    }

    #[test]
    fn test_out_of_sector() {
        let mut link = Link::new("a", "b", LinkKind::Backhaul, Status::Candidate);
        assert!(link.is_out_of_sector());
        link.tx_sector = Some("s1".into());
        link.rx_sector = Some("s2".into());
        assert!(!link.is_out_of_sector());
    }
}
