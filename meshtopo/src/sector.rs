//! Radio sectors.

use crate::{ids::stable_id, Status};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectorKind {
    Dn,
    Cn,
}

/// A realized radio aperture on a site.
///
/// A site hosts one or more nodes; each node hosts one or more sectors
/// covering complementary horizontal arcs. Sectors of one node always
/// select together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sector {
    id: String,
    site_id: String,
    node_index: u8,
    position_in_node: u8,
    kind: SectorKind,
    /// Boresight compass azimuth in degrees.
    pub azimuth_deg: f64,
    pub status: Status,
    /// Assigned channel after the interference phase.
    pub channel: Option<u8>,
    /// Capex attributed to this sector's node, counted once per node.
    pub node_capex: f64,
}

impl Sector {
    pub fn new(
        site_id: &str,
        node_index: u8,
        position_in_node: u8,
        kind: SectorKind,
        azimuth_deg: f64,
        status: Status,
    ) -> Self {
        let id = stable_id(&[
            site_id,
            &node_index.to_string(),
            &position_in_node.to_string(),
            match kind {
                SectorKind::Dn => "DN",
                SectorKind::Cn => "CN",
            },
        ]);
        Self {
            id,
            site_id: site_id.to_owned(),
            node_index,
            position_in_node,
            kind,
            azimuth_deg,
            status,
            channel: None,
            node_capex: 0.0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn node_index(&self) -> u8 {
        self.node_index
    }

    pub fn position_in_node(&self) -> u8 {
        self.position_in_node
    }

    pub fn kind(&self) -> SectorKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::{Sector, SectorKind, Status};

    #[test]
    fn test_sector_ids_are_stable_and_distinct() {
        let a = Sector::new("site0", 0, 0, SectorKind::Dn, 10.0, Status::Candidate);
        let b = Sector::new("site0", 0, 0, SectorKind::Dn, 200.0, Status::Candidate);
        // Azimuth is not a key attribute.
        assert_eq!(a.id(), b.id());
        let c = Sector::new("site0", 0, 1, SectorKind::Dn, 10.0, Status::Candidate);
        assert_ne!(a.id(), c.id());
        let d = Sector::new("site1", 0, 0, SectorKind::Dn, 10.0, Status::Candidate);
        assert_ne!(a.id(), d.id());
    }
}
