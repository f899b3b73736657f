//! The topology container.

use crate::{DemandSite, Device, Link, Sector, Site, SiteKind, Status};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A candidate or planned network.
///
/// All entities live in maps keyed by their stable id; iteration is in
/// sorted id order everywhere, never insertion order, so constraint
/// emission and reports are reproducible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    pub sites: BTreeMap<String, Site>,
    pub sectors: BTreeMap<String, Sector>,
    pub links: BTreeMap<String, Link>,
    pub demand_sites: BTreeMap<String, DemandSite>,
    pub devices: BTreeMap<String, Device>,
    /// Site-pair index into `links`; rebuilt on demand, not part of
    /// the serialized form.
    #[serde(skip)]
    link_by_pair: BTreeMap<(String, String), String>,
}

impl Topology {
    /// Restores the site-pair index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.link_by_pair = self
            .links
            .values()
            .map(|link| (link.site_pair(), link.id().to_owned()))
            .collect();
    }

    pub fn add_site(&mut self, site: Site) {
        self.sites.insert(site.id().to_owned(), site);
    }

    pub fn add_sector(&mut self, sector: Sector) {
        self.sectors.insert(sector.id().to_owned(), sector);
    }

    pub fn add_link(&mut self, link: Link) {
        self.link_by_pair
            .insert(link.site_pair(), link.id().to_owned());
        self.links.insert(link.id().to_owned(), link);
    }

    pub fn add_demand_site(&mut self, demand: DemandSite) {
        self.demand_sites.insert(demand.id().to_owned(), demand);
    }

    pub fn add_device(&mut self, device: Device) {
        self.devices.insert(device.sku.clone(), device);
    }

    pub fn remove_demand_site(&mut self, id: &str) {
        self.demand_sites.remove(id);
    }

    pub fn device_of(&self, site: &Site) -> Option<&Device> {
        self.devices.get(site.device_sku())
    }

    pub fn link_between(&self, tx_site: &str, rx_site: &str) -> Option<&Link> {
        self.link_by_pair
            .get(&(tx_site.to_owned(), rx_site.to_owned()))
            .and_then(|id| self.links.get(id))
    }

    pub fn link_between_mut(&mut self, tx_site: &str, rx_site: &str) -> Option<&mut Link> {
        let id = self
            .link_by_pair
            .get(&(tx_site.to_owned(), rx_site.to_owned()))?
            .clone();
        self.links.get_mut(&id)
    }

    /// Site ids matching a status predicate.
    pub fn site_ids_where(&self, predicate: impl Fn(&Site) -> bool) -> Vec<String> {
        self.sites
            .values()
            .filter(|site| predicate(site))
            .map(|site| site.id().to_owned())
            .collect()
    }

    /// Active site ids of the given kind.
    pub fn active_sites_of_kind(&self, kind: SiteKind) -> Vec<String> {
        self.site_ids_where(|site| site.kind() == kind && site.status.is_active())
    }

    /// Groups of sites sharing an exact geographic location, in sorted
    /// order. Only groups with two or more members are returned.
    pub fn colocated_sites(&self) -> Vec<Vec<String>> {
        let mut by_location: BTreeMap<(i64, i64, i64), Vec<String>> = BTreeMap::new();
        for site in self.sites.values() {
            by_location
                .entry(site.location_key())
                .or_default()
                .push(site.id().to_owned());
        }
        by_location
            .into_values()
            .filter(|group| group.len() > 1)
            .collect()
    }

    /// All location groups, including singletons, keyed by location.
    pub fn location_groups(&self) -> BTreeMap<(i64, i64, i64), Vec<String>> {
        let mut by_location: BTreeMap<(i64, i64, i64), Vec<String>> = BTreeMap::new();
        for site in self.sites.values() {
            by_location
                .entry(site.location_key())
                .or_default()
                .push(site.id().to_owned());
        }
        by_location
    }

    /// Outgoing wireless links of each sector, as (to-sector, link id).
    pub fn sector_connectivity(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut connectivity: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for link in self.links.values() {
            if let (Some(tx_sector), Some(rx_sector)) = (&link.tx_sector, &link.rx_sector) {
                connectivity
                    .entry(tx_sector.clone())
                    .or_default()
                    .insert(rx_sector.clone(), link.id().to_owned());
            }
        }
        connectivity
    }

    /// Incoming wireless links of each sector, as (from-sector, link id).
    pub fn sector_connectivity_reverse(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut connectivity: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for link in self.links.values() {
            if let (Some(tx_sector), Some(rx_sector)) = (&link.tx_sector, &link.rx_sector) {
                connectivity
                    .entry(rx_sector.clone())
                    .or_default()
                    .insert(tx_sector.clone(), link.id().to_owned());
            }
        }
        connectivity
    }

    /// Sectors of a site, sorted by (node index, position).
    pub fn sectors_of_site(&self, site_id: &str) -> Vec<&Sector> {
        let mut sectors: Vec<&Sector> = self
            .sectors
            .values()
            .filter(|sector| sector.site_id() == site_id)
            .collect();
        sectors.sort_by_key(|sector| (sector.node_index(), sector.position_in_node()));
        sectors
    }

    /// Marks sites, sectors and links that cannot reach a POP over
    /// reachable links as unreachable.
    ///
    /// Runs a breadth-first sweep over the undirected reachable graph
    /// rooted at all reachable POPs, optionally bounded by `max_hops`.
    pub fn mark_unreachable_components(&mut self, max_hops: Option<usize>) {
        use std::collections::{BTreeSet, VecDeque};

        let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for link in self.links.values() {
            if !link.status.is_reachable() || link.capacity_gbps <= 0.0 {
                continue;
            }
            adjacency
                .entry(link.tx_site())
                .or_default()
                .push(link.rx_site());
            adjacency
                .entry(link.rx_site())
                .or_default()
                .push(link.tx_site());
        }

        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        for site in self.sites.values() {
            if site.kind() == SiteKind::Pop && site.status.is_reachable() {
                visited.insert(site.id().to_owned());
                queue.push_back((site.id().to_owned(), 0));
            }
        }
        while let Some((site_id, hops)) = queue.pop_front() {
            if let Some(limit) = max_hops {
                if hops >= limit {
                    continue;
                }
            }
            if let Some(neighbors) = adjacency.get(site_id.as_str()) {
                for &neighbor in neighbors {
                    if visited.insert(neighbor.to_owned()) {
                        queue.push_back((neighbor.to_owned(), hops + 1));
                    }
                }
            }
        }

        for site in self.sites.values_mut() {
            if site.status == Status::Candidate && !visited.contains(site.id()) {
                site.status = Status::Unreachable;
            }
        }
        let unreachable: Vec<String> = self
            .links
            .values()
            .filter(|link| {
                link.status == Status::Candidate
                    && (!visited.contains(link.tx_site()) || !visited.contains(link.rx_site()))
            })
            .map(|link| link.id().to_owned())
            .collect();
        for id in unreachable {
            if let Some(link) = self.links.get_mut(&id) {
                link.status = Status::Unreachable;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SiteKind, Status, Topology};
    use crate::{Link, LinkKind, Site};
    use geo::geometry::Coord;

    fn site(kind: SiteKind, lon: f64, sku: &str) -> Site {
        Site::new(
            kind,
            Coord { x: lon, y: 44.0 },
            Coord { x: lon * 1000.0, y: 0.0 },
            10.0,
            sku,
            Status::Candidate,
        )
    }

    #[test]
    fn test_colocated_groups() {
        let mut topology = Topology::default();
        topology.add_site(site(SiteKind::Pop, -71.0, "dn1"));
        topology.add_site(site(SiteKind::Pop, -71.0, "dn2"));
        topology.add_site(site(SiteKind::Cn, -71.5, "cn1"));
        let groups = topology.colocated_sites();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_unreachable_marking() {
        let mut topology = Topology::default();
        let pop = site(SiteKind::Pop, -71.0, "dn1");
        let near = site(SiteKind::Dn, -71.1, "dn1");
        let island = site(SiteKind::Dn, -71.9, "dn1");
        let (pop_id, near_id, island_id) =
            (pop.id().to_owned(), near.id().to_owned(), island.id().to_owned());
        topology.add_site(pop);
        topology.add_site(near);
        topology.add_site(island);

        let mut link = Link::new(&pop_id, &near_id, LinkKind::Backhaul, Status::Candidate);
        link.capacity_gbps = 1.0;
        topology.add_link(link);

        topology.mark_unreachable_components(None);
        assert_eq!(topology.sites[&pop_id].status, Status::Candidate);
        assert_eq!(topology.sites[&near_id].status, Status::Candidate);
        assert_eq!(topology.sites[&island_id].status, Status::Unreachable);
    }

    #[test]
    fn test_hop_limit() {
        let mut topology = Topology::default();
        let pop = site(SiteKind::Pop, -71.0, "dn1");
        let mid = site(SiteKind::Dn, -71.1, "dn1");
        let far = site(SiteKind::Dn, -71.2, "dn1");
        let ids = [
            pop.id().to_owned(),
            mid.id().to_owned(),
            far.id().to_owned(),
        ];
        topology.add_site(pop);
        topology.add_site(mid);
        topology.add_site(far);
        for pair in [(0, 1), (1, 2)] {
            let mut link = Link::new(
                &ids[pair.0],
                &ids[pair.1],
                LinkKind::Backhaul,
                Status::Candidate,
            );
            link.capacity_gbps = 1.0;
            topology.add_link(link);
        }
        topology.mark_unreachable_components(Some(1));
        assert_eq!(topology.sites[&ids[1]].status, Status::Candidate);
        assert_eq!(topology.sites[&ids[2]].status, Status::Unreachable);
    }
}
