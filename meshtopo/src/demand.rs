//! Synthetic demand sinks.

use crate::ids::{canon_f64, stable_id};
use geo::geometry::Coord;
use serde::{Deserialize, Serialize};

/// A synthetic sink representing expected downstream throughput,
/// attached to one or more CNs/DNs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandSite {
    id: String,
    /// Longitude/latitude in degrees.
    pub lonlat: Coord<f64>,
    /// Demand in Gbps per expanded copy.
    pub demand_gbps: f64,
    /// Multiplicity: the optimizer expands this site into `num_sites`
    /// identical sinks.
    pub num_sites: u32,
    /// Sites that can serve this sink, by id.
    pub connected_sites: Vec<String>,
}

impl DemandSite {
    pub fn new(lonlat: Coord<f64>, demand_gbps: f64) -> Self {
        let id = stable_id(&["DEMAND", &canon_f64(lonlat.y), &canon_f64(lonlat.x)]);
        Self {
            id,
            lonlat,
            demand_gbps,
            num_sites: 1,
            connected_sites: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}
