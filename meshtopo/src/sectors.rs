//! DN sector orientation and link/sector attachment.

use crate::{
    geodesy::angle_delta, DeviceKind, LinkKind, Sector, SectorKind, SiteKind, Status, Topology,
};
use linkbudget::estimate_link_budget;
use log::debug;

/// Weight multiplier of backhaul links during orientation; access
/// links weigh 1.
const BACKHAUL_LINK_WEIGHT: f64 = 8.0;

/// Uncovered links are scored as if deviating by a straight angle.
const UNCOVERED_PENALTY_DEG: f64 = 180.0;

/// Orients DN sectors to minimize the total weighted angular deviation
/// of candidate links from sector boresights, then creates CN sectors
/// pointed at their best serving link.
pub fn create_sectors(topology: &mut Topology) {
    create_dn_sectors(topology);
    create_cn_sectors(topology);
}

fn create_dn_sectors(topology: &mut Topology) {
    let site_ids: Vec<String> = topology
        .sites
        .values()
        .filter(|site| site.kind().is_distribution())
        .map(|site| site.id().to_owned())
        .collect();

    for site_id in site_ids {
        let site = &topology.sites[&site_id];
        let device = match topology.device_of(site) {
            Some(device) if device.kind == DeviceKind::Dn => device.clone(),
            _ => continue,
        };
        let scan_range = device.radio.horizontal_scan_range_deg;
        let nodes = device.number_of_nodes_per_site.max(1);
        let per_node = device.radio.number_of_sectors_per_node.max(1);
        let total_sectors = u32::from(nodes) * u32::from(per_node);

        // Candidate link azimuths with weights favoring long and
        // backhaul links.
        let mut weighted_azimuths: Vec<(f64, f64)> = Vec::new();
        for link in topology.links.values() {
            if link.kind == LinkKind::Wired {
                continue;
            }
            let azimuth = if link.tx_site() == site_id {
                link.tx_azimuth_deg
            } else if link.rx_site() == site_id {
                link.rx_azimuth_deg
            } else {
                continue;
            };
            let type_weight = if link.kind == LinkKind::Backhaul {
                BACKHAUL_LINK_WEIGHT
            } else {
                1.0
            };
            weighted_azimuths.push((azimuth, type_weight * link.distance_m.max(1.0)));
        }

        let base_azimuth = best_base_azimuth(&weighted_azimuths, total_sectors, scan_range);
        debug!("site {site_id}: sector base azimuth {base_azimuth:.1}");

        let mut index = 0u32;
        for node in 0..nodes {
            for position in 0..per_node {
                let azimuth = (base_azimuth + f64::from(index) * scan_range) % 360.0;
                let mut sector = Sector::new(
                    &site_id,
                    node,
                    position,
                    SectorKind::Dn,
                    azimuth,
                    Status::Candidate,
                );
                // Node cost is carried by the node's first sector so a
                // whole node costs its capex exactly once.
                sector.node_capex = if position == 0 { device.node_capex } else { 0.0 };
                topology.add_sector(sector);
                index += 1;
            }
        }
    }
}

/// Scans every anchor orientation that aligns some sector boresight
/// with some link azimuth and keeps the one with the lowest total
/// weighted deviation. Links outside every sector's arc incur a flat
/// penalty.
fn best_base_azimuth(weighted_azimuths: &[(f64, f64)], total_sectors: u32, scan_range: f64) -> f64 {
    if weighted_azimuths.is_empty() {
        return 0.0;
    }

    let mut anchors: Vec<f64> = Vec::new();
    for &(azimuth, _) in weighted_azimuths {
        for sector in 0..total_sectors {
            anchors.push((azimuth - f64::from(sector) * scan_range).rem_euclid(360.0));
        }
    }
    anchors.sort_by(f64::total_cmp);
    anchors.dedup();

    let score = |base: f64| -> f64 {
        weighted_azimuths
            .iter()
            .map(|&(azimuth, weight)| {
                let best_dev = (0..total_sectors)
                    .map(|sector| {
                        angle_delta(azimuth, (base + f64::from(sector) * scan_range) % 360.0)
                    })
                    .fold(f64::INFINITY, f64::min);
                if best_dev <= scan_range / 2.0 {
                    weight * best_dev
                } else {
                    weight * UNCOVERED_PENALTY_DEG
                }
            })
            .sum()
    };

    let mut best = (f64::INFINITY, 0.0);
    for &anchor in &anchors {
        let anchor_score = score(anchor);
        if anchor_score < best.0 {
            best = (anchor_score, anchor);
        }
    }
    best.1
}

fn create_cn_sectors(topology: &mut Topology) {
    let cn_ids: Vec<String> = topology
        .sites
        .values()
        .filter(|site| site.kind() == SiteKind::Cn)
        .map(|site| site.id().to_owned())
        .collect();

    for site_id in cn_ids {
        // Point the single CN sector at the strongest incoming link.
        let best_azimuth = topology
            .links
            .values()
            .filter(|link| link.rx_site() == site_id && link.kind == LinkKind::Access)
            .max_by(|a, b| {
                a.capacity_gbps
                    .total_cmp(&b.capacity_gbps)
                    .then_with(|| b.id().cmp(a.id()))
            })
            .map(|link| link.rx_azimuth_deg);
        let azimuth = match best_azimuth {
            Some(azimuth) => azimuth,
            None => continue,
        };
        topology.add_sector(Sector::new(
            &site_id,
            0,
            0,
            SectorKind::Cn,
            azimuth,
            Status::Candidate,
        ));
    }
}

/// Assigns endpoint sectors to every wireless link, records the
/// deviations from boresight, refreshes the link budget at those
/// deviations and removes links no sector can serve.
pub fn attach_sectors_to_links(topology: &mut Topology) {
    let mut dropped: Vec<String> = Vec::new();
    let mut updates: Vec<(String, Option<(String, f64)>, Option<(String, f64)>)> = Vec::new();

    for link in topology.links.values() {
        if link.kind == LinkKind::Wired {
            continue;
        }
        let tx = pick_sector(topology, link.tx_site(), link.tx_azimuth_deg);
        let rx = pick_sector(topology, link.rx_site(), link.rx_azimuth_deg);
        match (&tx, &rx) {
            (Some(_), Some(_)) => updates.push((link.id().to_owned(), tx, rx)),
            _ => dropped.push(link.id().to_owned()),
        }
    }

    for (link_id, tx, rx) in updates {
        let (tx_sector, tx_deviation) = tx.unwrap();
        let (rx_sector, rx_deviation) = rx.unwrap();
        let (tx_radio, rx_radio, distance, el_dev) = {
            let link = &topology.links[&link_id];
            let tx_site = &topology.sites[link.tx_site()];
            let rx_site = &topology.sites[link.rx_site()];
            (
                topology.devices[tx_site.device_sku()].radio.clone(),
                topology.devices[rx_site.device_sku()].radio.clone(),
                link.distance_m,
                link.el_deviation_deg,
            )
        };
        let budget = estimate_link_budget(
            distance,
            &tx_radio,
            &rx_radio,
            tx_deviation,
            rx_deviation,
            el_dev,
            -el_dev,
        );
        let link = topology.links.get_mut(&link_id).unwrap();
        link.tx_sector = Some(tx_sector);
        link.rx_sector = Some(rx_sector);
        link.tx_deviation_deg = tx_deviation;
        link.rx_deviation_deg = rx_deviation;
        link.mcs = budget.mcs;
        link.rsl_dbm = budget.rsl_dbm;
        link.snr_db = budget.snr_db;
        link.capacity_gbps = budget.capacity_gbps;
        link.tx_power_dbm = budget.tx_power_dbm;
    }

    for link_id in &dropped {
        topology.links.remove(link_id);
    }
    if !dropped.is_empty() {
        debug!("dropped {} links outside every sector arc", dropped.len());
    }
}

/// The site's sector closest in azimuth, if the link falls inside its
/// scan arc.
fn pick_sector(topology: &Topology, site_id: &str, azimuth_deg: f64) -> Option<(String, f64)> {
    let site = topology.sites.get(site_id)?;
    let scan_range = topology
        .device_of(site)
        .map(|device| device.radio.horizontal_scan_range_deg)?;
    let full_rotation = scan_range >= 360.0;

    topology
        .sectors_of_site(site_id)
        .into_iter()
        .map(|sector| {
            (
                sector.id().to_owned(),
                angle_delta(azimuth_deg, sector.azimuth_deg),
            )
        })
        .filter(|(_, deviation)| full_rotation || *deviation <= scan_range / 2.0)
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
}

#[cfg(test)]
mod tests {
    use super::best_base_azimuth;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_link_aligns_boresight() {
        let azimuths = [(90.0, 1.0)];
        let base = best_base_azimuth(&azimuths, 1, 70.0);
        assert_relative_eq!(base, 90.0);
    }

    #[test]
    fn test_heavier_link_wins_orientation() {
        // Two links 90 degrees apart with one 70-degree sector: only
        // one can be covered, and the heavier one must be it.
        let azimuths = [(0.0, 1.0), (90.0, 50.0)];
        let base = best_base_azimuth(&azimuths, 1, 70.0);
        assert_relative_eq!(base, 90.0);
    }

    #[test]
    fn test_two_sectors_cover_spread_links() {
        let azimuths = [(10.0, 1.0), (80.0, 1.0)];
        let base = best_base_azimuth(&azimuths, 2, 70.0);
        // Both links must fall within some sector arc.
        for azimuth in [10.0f64, 80.0] {
            let covered = (0..2).any(|k| {
                let boresight = (base + f64::from(k) * 70.0) % 360.0;
                crate::geodesy::angle_delta(azimuth, boresight) <= 35.0
            });
            assert!(covered, "azimuth {azimuth} uncovered from base {base}");
        }
    }
}
