//! Shared fixtures for the optimizer tests.

use linkbudget::RadioParams;
use meshtopo::{
    DemandSite, Device, DeviceKind, Link, LinkKind, Sector, SectorKind, Site, SiteKind, Status,
    Topology,
};
use geo::geometry::Coord;

/// Degrees of longitude per meter at the equator, close enough for
/// fixtures.
const DEG_PER_M: f64 = 1.0 / 111_194.9;

pub struct ToySite {
    pub kind: SiteKind,
    pub x_m: f64,
    pub y_m: f64,
}

/// Builds a topology from site positions (meters) and directed link
/// pairs with the given capacity. Sites get one sector each; demand is
/// one sink per CN at 0.2 Gbps.
pub fn topology_from(sites: &[ToySite], links: &[(usize, usize, f64)]) -> Topology {
    let mut topology = Topology::default();
    topology.add_device(Device {
        sku: "dn1".into(),
        kind: DeviceKind::Dn,
        node_capex: 1000.0,
        number_of_nodes_per_site: 4,
        radio: RadioParams::default(),
    });
    topology.add_device(Device {
        sku: "cn1".into(),
        kind: DeviceKind::Cn,
        node_capex: 200.0,
        number_of_nodes_per_site: 1,
        radio: RadioParams {
            horizontal_scan_range_deg: 360.0,
            ..RadioParams::default()
        },
    });

    let mut ids = Vec::new();
    for toy in sites {
        let lonlat = Coord {
            x: toy.x_m * DEG_PER_M,
            y: toy.y_m * DEG_PER_M,
        };
        let xy = Coord {
            x: toy.x_m,
            y: toy.y_m,
        };
        let sku = if toy.kind == SiteKind::Cn { "cn1" } else { "dn1" };
        let site = Site::new(toy.kind, lonlat, xy, 10.0, sku, Status::Candidate);
        ids.push(site.id().to_owned());
        topology.add_site(site);
    }

    // One full-rotation sector per site keeps attachment trivial.
    let mut sector_ids = Vec::new();
    for (index, toy) in sites.iter().enumerate() {
        let kind = if toy.kind == SiteKind::Cn {
            SectorKind::Cn
        } else {
            SectorKind::Dn
        };
        let mut sector = Sector::new(&ids[index], 0, 0, kind, 0.0, Status::Candidate);
        sector.node_capex = if kind == SectorKind::Dn { 1000.0 } else { 200.0 };
        sector_ids.push(sector.id().to_owned());
        topology.add_sector(sector);
    }

    for &(a, b, capacity) in links {
        let rx_kind = sites[b].kind;
        let kind = if rx_kind == SiteKind::Cn {
            LinkKind::Access
        } else {
            LinkKind::Backhaul
        };
        let mut link = Link::new(&ids[a], &ids[b], kind, Status::Candidate);
        let dx = sites[b].x_m - sites[a].x_m;
        let dy = sites[b].y_m - sites[a].y_m;
        link.distance_m = (dx * dx + dy * dy).sqrt();
        link.tx_azimuth_deg = dx.atan2(dy).to_degrees().rem_euclid(360.0);
        link.rx_azimuth_deg = (link.tx_azimuth_deg + 180.0) % 360.0;
        link.tx_sector = Some(sector_ids[a].clone());
        link.rx_sector = Some(sector_ids[b].clone());
        link.capacity_gbps = capacity;
        link.mcs = 12;
        link.rsl_dbm = -40.0;
        link.snr_db = 34.0;
        link.tx_power_dbm = 10.0;
        topology.add_link(link);
    }

    for (index, toy) in sites.iter().enumerate() {
        if toy.kind == SiteKind::Cn {
            let mut demand = DemandSite::new(
                Coord {
                    x: toy.x_m * DEG_PER_M,
                    y: toy.y_m * DEG_PER_M,
                },
                0.2,
            );
            demand.connected_sites.push(ids[index].clone());
            topology.add_demand_site(demand);
        }
    }

    topology
}

/// POP — DN backbone serving two CNs.
pub fn toy_topology() -> Topology {
    topology_from(
        &[
            ToySite { kind: SiteKind::Pop, x_m: 0.0, y_m: 0.0 },
            ToySite { kind: SiteKind::Dn, x_m: 300.0, y_m: 0.0 },
            ToySite { kind: SiteKind::Cn, x_m: 150.0, y_m: 100.0 },
            ToySite { kind: SiteKind::Cn, x_m: 450.0, y_m: 50.0 },
        ],
        &[
            (0, 1, 1.8),
            (1, 0, 1.8),
            (0, 2, 1.8),
            (1, 3, 1.8),
        ],
    )
}
