//! Demand site placement.

use crate::{
    geodesy::{haversine_m, LocalProjection},
    DemandSite, SiteKind, Topology, TopoError,
};
use geo::geometry::Coord;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemandOptions {
    /// One demand site per CN, multiplied by its subscriber count.
    pub enable_cn_demand: bool,
    /// Grid of demand sites over the site bounding box.
    pub enable_uniform_demand: bool,
    /// Keep demand sites already present in the topology input.
    pub enable_manual_demand: bool,
    /// Demand per (expanded) demand site, Gbps.
    pub demand_gbps: f64,
    /// Grid spacing of the uniform model, meters.
    pub demand_spacing_m: f64,
    /// Sites within this radius serve a demand site, meters.
    pub demand_connection_radius_m: f64,
}

impl Default for DemandOptions {
    fn default() -> Self {
        Self {
            enable_cn_demand: true,
            enable_uniform_demand: false,
            enable_manual_demand: false,
            demand_gbps: 0.2,
            demand_spacing_m: 100.0,
            demand_connection_radius_m: 50.0,
        }
    }
}

/// Attaches demand sites to the topology per the enabled models.
///
/// Manual demand sites must already be loaded into the topology; when
/// the manual model is off they are discarded first.
pub fn attach_demand(
    topology: &mut Topology,
    options: &DemandOptions,
    projection: &LocalProjection,
) -> Result<(), TopoError> {
    if options.enable_manual_demand {
        for demand in topology.demand_sites.values_mut() {
            demand.demand_gbps = options.demand_gbps;
            demand.connected_sites.clear();
        }
    } else {
        topology.demand_sites.clear();
    }
    let manual_ids: BTreeSet<String> = topology.demand_sites.keys().cloned().collect();

    if options.enable_uniform_demand {
        add_uniform_demand(topology, options, projection);
    }

    // Radius rule for uniform and manual sites; unconnected uniform
    // sites are pruned.
    let connectable: Vec<(String, Coord<f64>)> = topology
        .sites
        .values()
        .map(|site| (site.id().to_owned(), site.lonlat()))
        .collect();
    let demand_ids: Vec<String> = topology.demand_sites.keys().cloned().collect();
    for demand_id in demand_ids {
        let lonlat = topology.demand_sites[&demand_id].lonlat;
        let connected: Vec<String> = connectable
            .iter()
            .filter(|(_, site_lonlat)| {
                haversine_m(*site_lonlat, lonlat) <= options.demand_connection_radius_m
            })
            .map(|(id, _)| id.clone())
            .collect();
        if connected.is_empty() && !manual_ids.contains(&demand_id) {
            topology.remove_demand_site(&demand_id);
        } else {
            topology
                .demand_sites
                .get_mut(&demand_id)
                .unwrap()
                .connected_sites = connected;
        }
    }

    if options.enable_cn_demand {
        add_cn_demand(topology, options.demand_gbps);
    }

    connect_colocated_distribution_sites(topology);

    if topology.demand_sites.is_empty() {
        return Err(TopoError::NoDemand);
    }
    info!("{} demand sites attached", topology.demand_sites.len());
    Ok(())
}

/// One demand site per CN ground position; CNs sharing a position
/// share the demand site.
fn add_cn_demand(topology: &mut Topology, demand_gbps: f64) {
    let cns: Vec<(String, Coord<f64>, u32)> = topology
        .sites
        .values()
        .filter(|site| site.kind() == SiteKind::Cn)
        .map(|site| (site.id().to_owned(), site.lonlat(), site.subscriber_count()))
        .collect();

    let mut by_location: BTreeMap<(i64, i64), String> = BTreeMap::new();
    for (cn_id, lonlat, subscribers) in cns {
        let key = ((lonlat.x * 1e9).round() as i64, (lonlat.y * 1e9).round() as i64);
        match by_location.get(&key) {
            Some(demand_id) => {
                let demand = topology.demand_sites.get_mut(demand_id).unwrap();
                demand.connected_sites.push(cn_id);
            }
            None => {
                let mut demand = DemandSite::new(lonlat, demand_gbps);
                demand.num_sites = subscribers.max(1);
                demand.connected_sites.push(cn_id);
                by_location.insert(key, demand.id().to_owned());
                topology.add_demand_site(demand);
            }
        }
    }
}

fn add_uniform_demand(topology: &mut Topology, options: &DemandOptions, projection: &LocalProjection) {
    if topology.sites.is_empty() {
        return;
    }
    let left = topology.sites.values().map(|s| s.lonlat().x).fold(f64::INFINITY, f64::min);
    let right = topology
        .sites
        .values()
        .map(|s| s.lonlat().x)
        .fold(f64::NEG_INFINITY, f64::max);
    let bottom = topology.sites.values().map(|s| s.lonlat().y).fold(f64::INFINITY, f64::min);
    let top = topology
        .sites
        .values()
        .map(|s| s.lonlat().y)
        .fold(f64::NEG_INFINITY, f64::max);

    let (dx, dy) = projection.degree_deltas(options.demand_spacing_m);
    let mut longitude = left - dx;
    while longitude <= right + dx {
        let mut latitude = bottom - dy;
        while latitude <= top + dy {
            topology.add_demand_site(DemandSite::new(
                Coord {
                    x: longitude,
                    y: latitude,
                },
                options.demand_gbps,
            ));
            latitude += dy;
        }
        longitude += dx;
    }
}

/// DNs/POPs co-located with a CN (same position or same rooftop) can
/// serve the CN's demand directly.
fn connect_colocated_distribution_sites(topology: &mut Topology) {
    let mut cn_to_dns: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    // Same ground position.
    for group in topology.location_groups().values() {
        if group.len() <= 1 {
            continue;
        }
        let cns: Vec<&String> = group
            .iter()
            .filter(|id| topology.sites[*id].kind() == SiteKind::Cn)
            .collect();
        let dns: Vec<&String> = group
            .iter()
            .filter(|id| topology.sites[*id].kind().is_distribution())
            .collect();
        for cn in &cns {
            for dn in &dns {
                cn_to_dns
                    .entry((*cn).clone())
                    .or_default()
                    .insert((*dn).clone());
            }
        }
    }

    // Same rooftop.
    let mut building_cns: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
    let mut building_dns: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
    for site in topology.sites.values() {
        if let Some(building) = site.building_id {
            if site.kind() == SiteKind::Cn {
                building_cns.entry(building).or_default().insert(site.id().to_owned());
            } else {
                building_dns.entry(building).or_default().insert(site.id().to_owned());
            }
        }
    }
    for (building, cns) in &building_cns {
        if let Some(dns) = building_dns.get(building) {
            for cn in cns {
                cn_to_dns.entry(cn.clone()).or_default().extend(dns.iter().cloned());
            }
        }
    }

    for demand in topology.demand_sites.values_mut() {
        let mut connected: BTreeSet<String> = demand.connected_sites.iter().cloned().collect();
        for site_id in demand.connected_sites.clone() {
            if let Some(dns) = cn_to_dns.get(&site_id) {
                connected.extend(dns.iter().cloned());
            }
        }
        demand.connected_sites = connected.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::{attach_demand, DemandOptions};
    use crate::{geodesy::LocalProjection, Site, SiteKind, Status, Topology};
    use geo::geometry::Coord;

    fn site(kind: SiteKind, lon: f64, lat: f64, sku: &str) -> Site {
        Site::new(
            kind,
            Coord { x: lon, y: lat },
            Coord { x: 0.0, y: 0.0 },
            10.0,
            sku,
            Status::Candidate,
        )
    }

    fn projection() -> LocalProjection {
        LocalProjection::new(Coord { x: -71.0, y: 44.0 })
    }

    #[test]
    fn test_cn_demand_with_subscribers() {
        let mut topology = Topology::default();
        let mut cn = site(SiteKind::Cn, -71.0, 44.0, "cn1");
        cn.number_of_subscribers = Some(5);
        topology.add_site(cn);
        topology.add_site(site(SiteKind::Pop, -71.01, 44.0, "dn1"));

        attach_demand(&mut topology, &DemandOptions::default(), &projection()).unwrap();
        assert_eq!(topology.demand_sites.len(), 1);
        let demand = topology.demand_sites.values().next().unwrap();
        assert_eq!(demand.num_sites, 5);
        assert_eq!(demand.connected_sites.len(), 1);
    }

    #[test]
    fn test_colocated_dn_joins_cn_demand() {
        let mut topology = Topology::default();
        topology.add_site(site(SiteKind::Cn, -71.0, 44.0, "cn1"));
        topology.add_site(site(SiteKind::Dn, -71.0, 44.0, "dn1"));

        attach_demand(&mut topology, &DemandOptions::default(), &projection()).unwrap();
        let demand = topology.demand_sites.values().next().unwrap();
        assert_eq!(demand.connected_sites.len(), 2);
    }

    #[test]
    fn test_uniform_demand_prunes_unconnected() {
        let mut topology = Topology::default();
        topology.add_site(site(SiteKind::Dn, -71.0, 44.0, "dn1"));
        let options = DemandOptions {
            enable_cn_demand: false,
            enable_uniform_demand: true,
            demand_spacing_m: 100.0,
            demand_connection_radius_m: 120.0,
            ..DemandOptions::default()
        };
        attach_demand(&mut topology, &options, &projection()).unwrap();
        assert!(!topology.demand_sites.is_empty());
        for demand in topology.demand_sites.values() {
            assert!(!demand.connected_sites.is_empty());
        }
    }

    #[test]
    fn test_no_demand_is_an_error() {
        let mut topology = Topology::default();
        topology.add_site(site(SiteKind::Dn, -71.0, 44.0, "dn1"));
        let options = DemandOptions {
            enable_cn_demand: true,
            ..DemandOptions::default()
        };
        // No CNs, no uniform model: nothing to attach.
        assert!(attach_demand(&mut topology, &options, &projection()).is_err());
    }
}
