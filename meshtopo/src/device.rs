//! Hardware profiles.

use crate::TopoError;
use linkbudget::RadioParams;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Dn,
    Cn,
}

/// A mountable hardware profile: cost, node count and the radio
/// parameters of its sectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub sku: String,
    pub kind: DeviceKind,
    pub node_capex: f64,
    pub number_of_nodes_per_site: u8,
    pub radio: RadioParams,
}

impl Device {
    /// CN devices carry exactly one node per site.
    pub fn validate(&self) -> Result<(), TopoError> {
        if self.kind == DeviceKind::Cn && self.number_of_nodes_per_site != 1 {
            return Err(TopoError::CnNodeCount(self.sku.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Device, DeviceKind};
    use linkbudget::RadioParams;

    #[test]
    fn test_cn_single_node_invariant() {
        let device = Device {
            sku: "cn1".into(),
            kind: DeviceKind::Cn,
            node_capex: 250.0,
            number_of_nodes_per_site: 2,
            radio: RadioParams::default(),
        };
        assert!(device.validate().is_err());

        let dn = Device {
            sku: "dn1".into(),
            kind: DeviceKind::Dn,
            node_capex: 1500.0,
            number_of_nodes_per_site: 4,
            radio: RadioParams::default(),
        };
        assert!(dn.validate().is_ok());
    }
}
