//! Model input tables derived from a topology.
//!
//! Everything the phase builders index lives here in sorted,
//! deterministic containers: the location universe (supersource, sites
//! and expanded demand sinks), the link universe (wired supersource and
//! demand edges plus radio links), capacities, weights, sectors and
//! fixed statuses.

use crate::{params::PlannerParams, OptError};
use meshtopo::{Polarity, SectorKind, SiteKind, Status, Topology};
use std::collections::{BTreeMap, BTreeSet};

pub const SUPERSOURCE: &str = "SUPERSOURCE";

/// Location classification inside the optimizer's flow network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocType {
    Pop,
    Dn,
    Cn,
    Demand,
    Supersource,
}

impl LocType {
    pub fn is_imaginary(self) -> bool {
        matches!(self, LocType::Demand | LocType::Supersource)
    }

    pub fn is_distribution(self) -> bool {
        matches!(self, LocType::Pop | LocType::Dn)
    }
}

/// Sector classification; imaginary sectors tie wired edges to a
/// location without consuming hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorClass {
    Dn,
    Cn,
    ImaginarySupersource,
    ImaginaryDemand,
}

impl SectorClass {
    pub fn is_imaginary(self) -> bool {
        matches!(
            self,
            SectorClass::ImaginarySupersource | SectorClass::ImaginaryDemand
        )
    }
}

type LinkKey = (String, String);

#[derive(Debug)]
pub struct ModelInput {
    /// SUPERSOURCE, site ids, then expanded demand ids.
    pub locations: Vec<String>,
    pub loc_type: BTreeMap<String, LocType>,
    pub demand_at: BTreeMap<String, f64>,
    /// Every directed edge of the flow network, sorted.
    pub links: Vec<LinkKey>,
    pub capacity: BTreeMap<LinkKey, f64>,
    pub weight: BTreeMap<LinkKey, f64>,
    pub link_sectors: BTreeMap<LinkKey, (Option<String>, Option<String>)>,
    pub link_rx_azimuth: BTreeMap<LinkKey, Option<f64>>,
    pub incoming: BTreeMap<String, Vec<LinkKey>>,
    pub outgoing: BTreeMap<String, Vec<LinkKey>>,
    pub wired: BTreeSet<LinkKey>,
    pub location_sectors: BTreeMap<String, Vec<String>>,
    pub sector_class: BTreeMap<String, SectorClass>,
    /// (site, node index) of each real sector.
    pub sector_node: BTreeMap<String, (String, u8)>,
    pub cost_site: BTreeMap<String, f64>,
    pub cost_sector: BTreeMap<String, f64>,
    pub sku_of: BTreeMap<String, String>,
    pub horizontal_scan_range: BTreeMap<String, f64>,
    /// Location groups sharing an exact position, size two or more.
    pub colocated: Vec<Vec<String>>,
    pub location_group_size: BTreeMap<String, usize>,
    pub existing_sites: BTreeSet<String>,
    pub proposed_sites: BTreeSet<String>,
    pub inactive_sites: BTreeSet<String>,
    pub proposed_links: BTreeSet<LinkKey>,
    pub existing_links: BTreeSet<LinkKey>,
    pub inactive_links: BTreeSet<LinkKey>,
    pub proposed_sectors: BTreeMap<String, BTreeSet<String>>,
    pub odd_sites: BTreeSet<String>,
    /// Total demand over all expanded demand sinks.
    pub max_throughput: f64,
}

impl ModelInput {
    pub fn new(topology: &Topology, params: &PlannerParams) -> Self {
        let mut input = ModelInput {
            locations: Vec::new(),
            loc_type: BTreeMap::new(),
            demand_at: BTreeMap::new(),
            links: Vec::new(),
            capacity: BTreeMap::new(),
            weight: BTreeMap::new(),
            link_sectors: BTreeMap::new(),
            link_rx_azimuth: BTreeMap::new(),
            incoming: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            wired: BTreeSet::new(),
            location_sectors: BTreeMap::new(),
            sector_class: BTreeMap::new(),
            sector_node: BTreeMap::new(),
            cost_site: BTreeMap::new(),
            cost_sector: BTreeMap::new(),
            sku_of: BTreeMap::new(),
            horizontal_scan_range: BTreeMap::new(),
            colocated: Vec::new(),
            location_group_size: BTreeMap::new(),
            existing_sites: BTreeSet::new(),
            proposed_sites: BTreeSet::new(),
            inactive_sites: BTreeSet::new(),
            proposed_links: BTreeSet::new(),
            existing_links: BTreeSet::new(),
            inactive_links: BTreeSet::new(),
            proposed_sectors: BTreeMap::new(),
            odd_sites: BTreeSet::new(),
            max_throughput: 0.0,
        };

        let maximum_distance = topology
            .links
            .values()
            .map(|link| link.distance_m)
            .fold(1.0f64, f64::max);
        let link_weight = |distance: f64| -> f64 {
            if maximum_distance == 0.0 {
                1.0
            } else {
                1.0 + (maximum_distance - distance) / maximum_distance
            }
        };

        // The imaginary source feeding every POP.
        input.locations.push(SUPERSOURCE.to_owned());
        input
            .loc_type
            .insert(SUPERSOURCE.to_owned(), LocType::Supersource);
        input.sku_of.insert(SUPERSOURCE.to_owned(), String::new());

        for site in topology.sites.values() {
            let site_id = site.id().to_owned();
            let loc_type = match site.kind() {
                SiteKind::Pop => LocType::Pop,
                SiteKind::Dn => LocType::Dn,
                SiteKind::Cn => LocType::Cn,
            };
            input.locations.push(site_id.clone());
            input.loc_type.insert(site_id.clone(), loc_type);
            input
                .sku_of
                .insert(site_id.clone(), site.device_sku().to_owned());
            if let Some(device) = topology.device_of(site) {
                input
                    .horizontal_scan_range
                    .insert(site_id.clone(), device.radio.horizontal_scan_range_deg);
            }
            input.cost_site.insert(
                site_id.clone(),
                match site.kind() {
                    SiteKind::Pop => params.pop_site_capex,
                    SiteKind::Dn => params.dn_site_capex,
                    SiteKind::Cn => params.cn_site_capex,
                },
            );

            match site.status {
                Status::Existing => {
                    input.existing_sites.insert(site_id.clone());
                }
                Status::Proposed => {
                    input.proposed_sites.insert(site_id.clone());
                }
                Status::Unavailable | Status::Unreachable => {
                    input.inactive_sites.insert(site_id.clone());
                }
                Status::Candidate => {}
            }
            if site.polarity == Polarity::Odd {
                input.odd_sites.insert(site_id.clone());
            }

            if site.kind() == SiteKind::Pop {
                // Imaginary sector tying the supersource edge to the POP.
                let imaginary = format!("{site_id}_super");
                let key = (SUPERSOURCE.to_owned(), site_id.clone());
                input.link_sectors.insert(key.clone(), (None, Some(imaginary.clone())));
                input.link_rx_azimuth.insert(key.clone(), None);
                input.capacity.insert(key.clone(), params.pop_capacity_gbps);
                input.weight.insert(key.clone(), link_weight(maximum_distance));
                input.wired.insert(key);
                input
                    .location_sectors
                    .entry(site_id.clone())
                    .or_default()
                    .push(imaginary.clone());
                input
                    .sector_class
                    .insert(imaginary, SectorClass::ImaginarySupersource);
            }
        }

        for group in topology.location_groups().values() {
            for id in group {
                input.location_group_size.insert(id.clone(), group.len());
            }
        }
        input.colocated = topology.colocated_sites();

        // Real sectors; node cost is already carried once per node.
        for sector in topology.sectors.values() {
            let site_id = sector.site_id().to_owned();
            input
                .location_sectors
                .entry(site_id.clone())
                .or_default()
                .push(sector.id().to_owned());
            input.sector_class.insert(
                sector.id().to_owned(),
                match sector.kind() {
                    SectorKind::Dn => SectorClass::Dn,
                    SectorKind::Cn => SectorClass::Cn,
                },
            );
            input
                .sector_node
                .insert(sector.id().to_owned(), (site_id.clone(), sector.node_index()));
            input
                .cost_sector
                .insert(sector.id().to_owned(), sector.node_capex);
            if sector.status == Status::Proposed || sector.status == Status::Existing {
                input
                    .proposed_sectors
                    .entry(site_id)
                    .or_default()
                    .insert(sector.id().to_owned());
            }
        }

        // Demand sinks, expanded by multiplicity.
        let max_link_capacity = topology
            .links
            .values()
            .map(|link| link.capacity_gbps)
            .fold(params.pop_capacity_gbps, f64::max);
        for demand in topology.demand_sites.values() {
            for copy in 0..demand.num_sites.max(1) {
                let demand_id = if copy == 0 {
                    demand.id().to_owned()
                } else {
                    format!("{}_{copy}", demand.id())
                };
                input
                    .demand_at
                    .insert(demand_id.clone(), demand.demand_gbps / params.oversubscription);
                input.locations.push(demand_id.clone());
                input.loc_type.insert(demand_id.clone(), LocType::Demand);
                input.sku_of.insert(demand_id.clone(), String::new());

                let mut connected = demand.connected_sites.clone();
                connected.sort();
                for site_id in connected {
                    if !topology.sites.contains_key(&site_id) {
                        continue;
                    }
                    let key = (site_id.clone(), demand_id.clone());
                    input.capacity.insert(key.clone(), max_link_capacity);
                    input.weight.insert(key.clone(), link_weight(maximum_distance));
                    let imaginary = format!("{site_id}_demand");
                    input
                        .link_sectors
                        .insert(key.clone(), (Some(imaginary.clone()), None));
                    input.link_rx_azimuth.insert(key.clone(), None);
                    input.wired.insert(key);
                    let sectors = input.location_sectors.entry(site_id.clone()).or_default();
                    if !sectors.contains(&imaginary) {
                        sectors.push(imaginary.clone());
                        input
                            .sector_class
                            .insert(imaginary, SectorClass::ImaginaryDemand);
                    }
                }
            }
        }

        // Radio links.
        for link in topology.links.values() {
            let key = link.site_pair();
            input.capacity.insert(key.clone(), link.capacity_gbps);
            input.weight.insert(
                key.clone(),
                if link.tx_sector.is_some() {
                    link_weight(link.distance_m)
                } else {
                    1.0
                },
            );
            input
                .link_sectors
                .insert(key.clone(), (link.tx_sector.clone(), link.rx_sector.clone()));
            input
                .link_rx_azimuth
                .insert(key.clone(), Some(link.rx_azimuth_deg));

            match link.status {
                Status::Existing => {
                    input.existing_links.insert(key.clone());
                }
                Status::Proposed => {
                    input.proposed_links.insert(key.clone());
                }
                Status::Unavailable | Status::Unreachable => {
                    input.inactive_links.insert(key.clone());
                }
                Status::Candidate => {}
            }
            if link.is_out_of_sector() {
                input.inactive_links.insert(key);
            }
        }

        input.links = input.capacity.keys().cloned().collect();
        for location in &input.locations {
            input.incoming.entry(location.clone()).or_default();
            input.outgoing.entry(location.clone()).or_default();
            input.location_sectors.entry(location.clone()).or_default();
        }
        for key in &input.links {
            input
                .outgoing
                .entry(key.0.clone())
                .or_default()
                .push(key.clone());
            input
                .incoming
                .entry(key.1.clone())
                .or_default()
                .push(key.clone());
        }

        // Summing in location order keeps the total byte-stable.
        input.max_throughput = input
            .locations
            .iter()
            .filter_map(|location| input.demand_at.get(location))
            .sum();

        input
    }

    /// The topology is a dead end if no POP can push any flow.
    pub fn check_pop_feasibility(&self) -> Result<(), OptError> {
        for location in &self.locations {
            if self.loc_type[location] != LocType::Pop {
                continue;
            }
            let outgoing = &self.outgoing[location];
            if !outgoing.is_empty()
                && outgoing.iter().map(|key| self.capacity[key]).sum::<f64>() > 0.0
            {
                return Ok(());
            }
        }
        Err(OptError::NoPopCapacity)
    }

    /// At least one demand-connected site must be able to receive flow.
    pub fn check_demand_feasibility(&self) -> Result<(), OptError> {
        for location in &self.locations {
            if self.loc_type[location] != LocType::Demand {
                continue;
            }
            for (feeder, _) in &self.incoming[location] {
                let incoming = &self.incoming[feeder];
                if !incoming.is_empty()
                    && incoming.iter().map(|key| self.capacity[key]).sum::<f64>() > 0.0
                {
                    return Ok(());
                }
            }
        }
        Err(OptError::NoDemandCapacity)
    }

    /// Links with no usable capacity.
    pub fn zero_capacity_links(&self) -> BTreeSet<LinkKey> {
        self.links
            .iter()
            .filter(|key| !self.wired.contains(*key) && self.capacity[*key] <= 0.0)
            .cloned()
            .collect()
    }

    pub fn is_wireless(&self, key: &LinkKey) -> bool {
        !self.wired.contains(key)
            && !self.loc_type[&key.0].is_imaginary()
            && !self.loc_type[&key.1].is_imaginary()
    }

    /// Demand locations in universe order.
    pub fn demand_locations(&self) -> Vec<String> {
        self.locations
            .iter()
            .filter(|location| self.loc_type[*location] == LocType::Demand)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{LocType, ModelInput, SUPERSOURCE};
    use crate::params::PlannerParams;
    use crate::testutil::toy_topology;

    #[test]
    fn test_universe_layout() {
        let topology = toy_topology();
        let input = ModelInput::new(&topology, &PlannerParams::default());

        assert_eq!(input.locations[0], SUPERSOURCE);
        assert!(input.check_pop_feasibility().is_ok());
        assert!(input.check_demand_feasibility().is_ok());

        // Supersource feeds exactly the POPs.
        let super_edges = &input.outgoing[SUPERSOURCE];
        assert_eq!(super_edges.len(), 1);
        assert_eq!(input.loc_type[&super_edges[0].1], LocType::Pop);
        assert!(input.wired.contains(&super_edges[0]));

        // Demand sinks only receive.
        for demand in input.demand_locations() {
            assert!(input.outgoing[&demand].is_empty());
            assert!(!input.incoming[&demand].is_empty());
        }
    }

    #[test]
    fn test_demand_multiplicity_expansion() {
        let mut topology = toy_topology();
        let demand_id = topology.demand_sites.keys().next().unwrap().clone();
        topology.demand_sites.get_mut(&demand_id).unwrap().num_sites = 3;
        let input = ModelInput::new(&topology, &PlannerParams::default());
        let demands = input.demand_locations();
        assert_eq!(demands.len(), 3);
        // Every copy gets its own wired feeder edges.
        for demand in &demands {
            assert!(!input.incoming[demand].is_empty());
        }
    }

    #[test]
    fn test_oversubscription_scales_demand() {
        let topology = toy_topology();
        let params = PlannerParams {
            oversubscription: 2.0,
            ..PlannerParams::default()
        };
        let plain = ModelInput::new(&topology, &PlannerParams::default());
        let scaled = ModelInput::new(&topology, &params);
        assert!((scaled.max_throughput - plain.max_throughput / 2.0).abs() < 1e-12);
    }
}
