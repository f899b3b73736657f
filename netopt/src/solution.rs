//! Phase solution records.

use crate::model::LinkKey;
use std::collections::BTreeMap;

/// The decisions one optimization phase settles on.
#[derive(Debug, Clone, Default)]
pub struct PhaseSolution {
    pub sites: BTreeMap<String, bool>,
    pub odd_sites: BTreeMap<String, bool>,
    pub sectors: BTreeMap<String, bool>,
    /// Channel per selected sector; `None` when unassigned.
    pub channels: BTreeMap<String, Option<u8>>,
    pub links: BTreeMap<LinkKey, bool>,
    pub flows: BTreeMap<LinkKey, f64>,
    pub tdm: BTreeMap<LinkKey, f64>,
    pub shortage: BTreeMap<String, f64>,
    /// MCS class per selected link as settled by the interference
    /// phase's SINR envelope; empty in the earlier phases.
    pub link_mcs: BTreeMap<LinkKey, u32>,
    /// Capacity (Gbps) of that class, replacing the interference-blind
    /// estimate from candidate-graph construction.
    pub link_capacity: BTreeMap<LinkKey, f64>,
    pub common_bandwidth: Option<f64>,
    pub objective: f64,
    pub cost: f64,
}
