//! Candidate graph construction.

use crate::{
    building::{detect_building_sites, BuildingOutline, SiteDetectionOptions},
    geodesy::{bearing_deg, LocalProjection},
    sectors, Device, DeviceKind, Link, LinkKind, Site, SiteKind, Status, Topology, TopoError,
};
use demgrid::Grid;
use geo::geometry::{Coord, Polygon};
use linkbudget::{estimate_link_budget, max_los_distance};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sightline::{compute_pairs, CylindricalValidator, EllipsoidalValidator, LosConfig, ProbeSite};
use std::collections::BTreeMap;

/// A user-provided site before expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteInput {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub altitude_m: Option<f64>,
    pub kind: SiteKind,
    /// Omitted: the site is expanded once per compatible device.
    #[serde(default)]
    pub device_sku: Option<String>,
    #[serde(default)]
    pub building_id: Option<u32>,
    #[serde(default)]
    pub number_of_subscribers: Option<u32>,
    #[serde(default)]
    pub existing: bool,
}

/// Which obstruction model decides link validity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LosModel {
    Cylindrical { fresnel_radius_m: f64 },
    Ellipsoidal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderOptions {
    pub los_model: LosModel,
    pub confidence_threshold: f64,
    /// Upper bound on link length; tightened per device pair by the
    /// minimum-MCS inversion.
    pub max_los_distance_m: f64,
    pub min_los_distance_m: f64,
    pub max_elevation_angle_deg: f64,
    pub minimum_mcs_of_backhaul_links: Option<u32>,
    pub minimum_mcs_of_access_links: Option<u32>,
    /// Exclusion polygons in projected meters.
    pub exclusion_zones: Vec<Polygon<f64>>,
    pub site_detection: SiteDetectionOptions,
    /// Place detected rooftop candidates as DN sites.
    pub detect_dns: bool,
    /// Place detected rooftop candidates as CN sites.
    pub detect_cns: bool,
    /// Antenna height added when a site has no explicit altitude.
    pub default_mounting_height_m: f64,
    /// LOS worker threads; `None` uses every core.
    pub workers: Option<usize>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            los_model: LosModel::Ellipsoidal,
            confidence_threshold: 1.0,
            max_los_distance_m: 10_000.0,
            min_los_distance_m: 0.0,
            max_elevation_angle_deg: 25.0,
            minimum_mcs_of_backhaul_links: None,
            minimum_mcs_of_access_links: None,
            exclusion_zones: Vec::new(),
            site_detection: SiteDetectionOptions::default(),
            detect_dns: true,
            detect_cns: false,
            default_mounting_height_m: 1.5,
            workers: None,
        }
    }
}

/// Builds the candidate graph: expands sites over compatible devices,
/// detects rooftop candidates, sweeps LOS over every viable pair,
/// orients sectors and fills link budgets.
///
/// The caller's `projection` defines the planar frame every input
/// shares: site positions, outlines, exclusion zones and the surface
/// raster.
pub fn build_candidate_graph(
    inputs: &[SiteInput],
    devices: &[Device],
    outlines: &[BuildingOutline],
    surface: Option<&Grid>,
    options: &BuilderOptions,
    projection: &LocalProjection,
) -> Result<Topology, TopoError> {
    if inputs.is_empty() {
        return Err(TopoError::NoDevices("site"));
    }
    for device in devices {
        device.validate()?;
    }
    let dn_devices: Vec<&Device> = devices.iter().filter(|d| d.kind == DeviceKind::Dn).collect();
    let cn_devices: Vec<&Device> = devices.iter().filter(|d| d.kind == DeviceKind::Cn).collect();
    if dn_devices.is_empty() {
        return Err(TopoError::NoDevices("DN"));
    }

    let mut topology = Topology::default();
    for device in devices {
        topology.add_device(device.clone());
    }

    ingest_user_sites(&mut topology, inputs, devices, surface, projection, options)?;
    ingest_detected_sites(
        &mut topology,
        outlines,
        surface,
        &dn_devices,
        &cn_devices,
        projection,
        options,
    );

    info!("candidate universe holds {} sites", topology.sites.len());

    sweep_los(&mut topology, surface, options)?;
    sectors::create_sectors(&mut topology);
    sectors::attach_sectors_to_links(&mut topology);

    info!(
        "candidate graph: {} sites, {} sectors, {} links",
        topology.sites.len(),
        topology.sectors.len(),
        topology.links.len()
    );
    Ok(topology)
}

fn ingest_user_sites(
    topology: &mut Topology,
    inputs: &[SiteInput],
    devices: &[Device],
    surface: Option<&Grid>,
    projection: &LocalProjection,
    options: &BuilderOptions,
) -> Result<(), TopoError> {
    for input in inputs {
        let lonlat = Coord {
            x: input.longitude,
            y: input.latitude,
        };
        let xy = projection.project(lonlat);
        let altitude = match input.altitude_m {
            Some(altitude) => altitude,
            None => surface
                .map(|grid| f64::from(grid.value_clamped(xy)) + options.default_mounting_height_m)
                .unwrap_or(options.default_mounting_height_m),
        };
        let status = if input.existing {
            Status::Existing
        } else {
            Status::Candidate
        };

        let compatible_kind = match input.kind {
            SiteKind::Cn => DeviceKind::Cn,
            _ => DeviceKind::Dn,
        };
        let expanded: Vec<&Device> = match &input.device_sku {
            Some(sku) => {
                let device = devices
                    .iter()
                    .find(|d| &d.sku == sku && d.kind == compatible_kind)
                    .ok_or_else(|| TopoError::UnknownDevice(format!("{lonlat:?}"), sku.clone()))?;
                vec![device]
            }
            None => devices.iter().filter(|d| d.kind == compatible_kind).collect(),
        };

        for device in expanded {
            let mut site = Site::new(input.kind, lonlat, xy, altitude, &device.sku, status);
            site.building_id = input.building_id;
            site.number_of_subscribers = input.number_of_subscribers;
            // Equal ids collapse duplicate (location, kind, device) rows.
            topology.add_site(site);
        }
    }
    Ok(())
}

fn ingest_detected_sites(
    topology: &mut Topology,
    outlines: &[BuildingOutline],
    surface: Option<&Grid>,
    dn_devices: &[&Device],
    cn_devices: &[&Device],
    projection: &LocalProjection,
    options: &BuilderOptions,
) {
    if outlines.is_empty() || (!options.detect_dns && !options.detect_cns) {
        return;
    }
    let detected = detect_building_sites(outlines, surface, &options.site_detection);
    for location in &detected {
        let lonlat = projection.unproject(location.xy);
        let mut place = |kind: SiteKind, device: &Device| {
            let mut site = Site::new(
                kind,
                lonlat,
                location.xy,
                location.altitude_m,
                &device.sku,
                Status::Candidate,
            );
            site.building_id = Some(location.building_id);
            topology.add_site(site);
        };
        if options.detect_dns {
            for device in dn_devices {
                place(SiteKind::Dn, device);
            }
        }
        if options.detect_cns {
            for device in cn_devices {
                place(SiteKind::Cn, device);
            }
        }
    }
}

/// Longest useful link per (tx SKU, rx SKU) pair, inverted from the
/// minimum MCS configuration.
fn device_pair_ranges(
    topology: &Topology,
    options: &BuilderOptions,
) -> BTreeMap<(String, String), f64> {
    let mut ranges = BTreeMap::new();
    for tx_device in topology.devices.values() {
        if tx_device.kind != DeviceKind::Dn {
            continue;
        }
        for rx_device in topology.devices.values() {
            let minimum_mcs = match rx_device.kind {
                DeviceKind::Dn => options.minimum_mcs_of_backhaul_links,
                DeviceKind::Cn => options.minimum_mcs_of_access_links,
            };
            let range = match minimum_mcs {
                Some(mcs) => max_los_distance(
                    &tx_device.radio,
                    &rx_device.radio,
                    mcs,
                    0.0,
                    options.max_los_distance_m,
                ),
                None => options.max_los_distance_m,
            };
            ranges.insert((tx_device.sku.clone(), rx_device.sku.clone()), range);
        }
    }
    ranges
}

fn sweep_los(
    topology: &mut Topology,
    surface: Option<&Grid>,
    options: &BuilderOptions,
) -> Result<(), TopoError> {
    let ranges = device_pair_ranges(topology, options);
    let sweep_range = ranges
        .values()
        .fold(0.0f64, |max, &range| max.max(range))
        .max(options.min_los_distance_m);

    let config = LosConfig {
        max_distance_m: sweep_range,
        min_distance_m: options.min_los_distance_m,
        max_elevation_angle_deg: options.max_elevation_angle_deg,
        confidence_threshold: options.confidence_threshold,
        exclusion_zones: options.exclusion_zones.clone(),
    };

    // Sites in id order; the pair universe and the merged result are
    // therefore stable across runs and worker counts.
    let site_ids: Vec<String> = topology.sites.keys().cloned().collect();
    let probes: Vec<ProbeSite> = site_ids
        .iter()
        .map(|id| {
            let site = &topology.sites[id];
            let mut probe = ProbeSite::new(site.xy().x, site.xy().y, site.altitude_m());
            if let Some(building) = site.building_id {
                probe = probe.on_building(building);
            }
            probe
        })
        .collect();

    let mut pairs: Vec<(usize, usize)> = Vec::new();
    for a in 0..site_ids.len() {
        for b in (a + 1)..site_ids.len() {
            let (ka, kb) = (
                topology.sites[&site_ids[a]].kind(),
                topology.sites[&site_ids[b]].kind(),
            );
            if ka == SiteKind::Cn && kb == SiteKind::Cn {
                continue;
            }
            pairs.push((a, b));
        }
    }

    let outcomes = match options.los_model {
        LosModel::Cylindrical { fresnel_radius_m } => {
            let validator = CylindricalValidator::new(surface, config, fresnel_radius_m)?;
            compute_pairs(
                &probes,
                &pairs,
                &validator,
                options.confidence_threshold,
                options.workers,
            )?
        }
        LosModel::Ellipsoidal => {
            let frequency = topology
                .devices
                .values()
                .map(|d| d.radio.carrier_frequency_mhz)
                .fold(f64::NAN, |acc, f| if acc.is_nan() { f } else { acc.min(f) });
            let validator = EllipsoidalValidator::new(surface, config, frequency)?;
            compute_pairs(
                &probes,
                &pairs,
                &validator,
                options.confidence_threshold,
                options.workers,
            )?
        }
    };

    for outcome in &outcomes {
        let id_a = &site_ids[outcome.a];
        let id_b = &site_ids[outcome.b];
        add_links_for_pair(topology, id_a, id_b, outcome.confidence, &ranges);
    }
    Ok(())
}

/// Adds the directed links a LOS-accepted pair admits: both directions
/// for distribution pairs, DN→CN only for access.
fn add_links_for_pair(
    topology: &mut Topology,
    id_a: &str,
    id_b: &str,
    confidence: f64,
    ranges: &BTreeMap<(String, String), f64>,
) {
    let directions: Vec<(String, String)> = {
        let site_a = &topology.sites[id_a];
        let site_b = &topology.sites[id_b];
        match (site_a.kind().is_distribution(), site_b.kind().is_distribution()) {
            (true, true) => vec![
                (id_a.to_owned(), id_b.to_owned()),
                (id_b.to_owned(), id_a.to_owned()),
            ],
            (true, false) => vec![(id_a.to_owned(), id_b.to_owned())],
            (false, true) => vec![(id_b.to_owned(), id_a.to_owned())],
            (false, false) => return,
        }
    };

    for (tx_id, rx_id) in directions {
        let (kind, distance, tx_azimuth, rx_azimuth, el_dev, budget) = {
            let tx = &topology.sites[&tx_id];
            let rx = &topology.sites[&rx_id];
            let kind = if rx.kind().is_distribution() {
                LinkKind::Backhaul
            } else {
                LinkKind::Access
            };
            let horizontal = {
                let dx = rx.xy().x - tx.xy().x;
                let dy = rx.xy().y - tx.xy().y;
                (dx * dx + dy * dy).sqrt()
            };
            let dz = rx.altitude_m() - tx.altitude_m();
            let distance = (horizontal * horizontal + dz * dz).sqrt();

            let pair_range = ranges
                .get(&(tx.device_sku().to_owned(), rx.device_sku().to_owned()))
                .copied()
                .unwrap_or(f64::INFINITY);
            if distance > pair_range {
                continue;
            }

            let tx_azimuth = bearing_deg(tx.lonlat(), rx.lonlat());
            let rx_azimuth = bearing_deg(rx.lonlat(), tx.lonlat());
            let el_dev = dz.atan2(horizontal).to_degrees();
            let budget = estimate_link_budget(
                distance,
                &topology.devices[tx.device_sku()].radio,
                &topology.devices[rx.device_sku()].radio,
                0.0,
                0.0,
                el_dev,
                -el_dev,
            );
            (kind, distance, tx_azimuth, rx_azimuth, el_dev, budget)
        };

        if budget.capacity_gbps <= 0.0 {
            warn!("link {tx_id}->{rx_id} below the MCS table; keeping at zero capacity");
        }
        let mut link = Link::new(&tx_id, &rx_id, kind, Status::Candidate);
        link.distance_m = distance;
        link.tx_azimuth_deg = tx_azimuth;
        link.rx_azimuth_deg = rx_azimuth;
        link.el_deviation_deg = el_dev;
        link.confidence = confidence;
        link.mcs = budget.mcs;
        link.rsl_dbm = budget.rsl_dbm;
        link.snr_db = budget.snr_db;
        link.capacity_gbps = budget.capacity_gbps;
        link.tx_power_dbm = budget.tx_power_dbm;
        topology.add_link(link);
    }
}

#[cfg(test)]
mod tests {
    use super::{build_candidate_graph, BuilderOptions, LosModel, SiteInput};
    use crate::{Device, DeviceKind, SiteKind};
    use linkbudget::RadioParams;

    fn dn_device(sku: &str) -> Device {
        Device {
            sku: sku.into(),
            kind: DeviceKind::Dn,
            node_capex: 1500.0,
            number_of_nodes_per_site: 4,
            radio: RadioParams::default(),
        }
    }

    fn cn_device(sku: &str) -> Device {
        Device {
            sku: sku.into(),
            kind: DeviceKind::Cn,
            node_capex: 250.0,
            number_of_nodes_per_site: 1,
            radio: RadioParams {
                horizontal_scan_range_deg: 360.0,
                ..RadioParams::default()
            },
        }
    }

    fn input(kind: SiteKind, lon: f64, sku: Option<&str>) -> SiteInput {
        SiteInput {
            longitude: lon,
            latitude: 44.0,
            altitude_m: Some(10.0),
            kind,
            device_sku: sku.map(Into::into),
            building_id: None,
            number_of_subscribers: None,
            existing: false,
        }
    }

    fn options() -> BuilderOptions {
        BuilderOptions {
            los_model: LosModel::Cylindrical { fresnel_radius_m: 1.0 },
            max_los_distance_m: 2_000.0,
            workers: Some(1),
            ..BuilderOptions::default()
        }
    }

    fn projection() -> crate::LocalProjection {
        crate::LocalProjection::new(geo::geometry::Coord { x: -71.0, y: 44.0 })
    }

    #[test]
    fn test_two_pops_and_cn_build_links() {
        // ~400 m apart along the parallel at 44N.
        let inputs = [
            input(SiteKind::Pop, -71.000, Some("dn1")),
            input(SiteKind::Dn, -71.005, Some("dn1")),
            input(SiteKind::Cn, -71.0025, Some("cn1")),
        ];
        let devices = [dn_device("dn1"), cn_device("cn1")];
        let topology =
            build_candidate_graph(&inputs, &devices, &[], None, &options(), &projection())
                .unwrap();

        assert_eq!(topology.sites.len(), 3);
        // Backhaul both ways plus one access link per distribution site.
        let backhaul = topology
            .links
            .values()
            .filter(|l| l.kind == crate::LinkKind::Backhaul)
            .count();
        let access = topology
            .links
            .values()
            .filter(|l| l.kind == crate::LinkKind::Access)
            .count();
        assert_eq!(backhaul, 2);
        assert_eq!(access, 2);
        for link in topology.links.values() {
            assert!(link.capacity_gbps > 0.0);
            assert!(link.tx_sector.is_some() && link.rx_sector.is_some());
        }
    }

    #[test]
    fn test_device_expansion_without_sku() {
        let inputs = [
            input(SiteKind::Pop, -71.000, None),
            input(SiteKind::Cn, -71.001, Some("cn1")),
        ];
        let devices = [dn_device("dn1"), dn_device("dn2"), cn_device("cn1")];
        let topology =
            build_candidate_graph(&inputs, &devices, &[], None, &options(), &projection())
                .unwrap();
        // POP expanded once per DN device, CN pinned to its SKU.
        assert_eq!(topology.sites.len(), 3);
        let pops = topology
            .sites
            .values()
            .filter(|s| s.kind() == SiteKind::Pop)
            .count();
        assert_eq!(pops, 2);
    }

    #[test]
    fn test_unknown_sku_is_an_error() {
        let inputs = [input(SiteKind::Pop, -71.0, Some("missing"))];
        let devices = [dn_device("dn1")];
        assert!(
            build_candidate_graph(&inputs, &devices, &[], None, &options(), &projection())
                .is_err()
        );
    }

    #[test]
    fn test_cn_cn_pairs_are_skipped() {
        let inputs = [
            input(SiteKind::Cn, -71.000, Some("cn1")),
            input(SiteKind::Cn, -71.001, Some("cn1")),
            input(SiteKind::Pop, -71.0005, Some("dn1")),
        ];
        let devices = [dn_device("dn1"), cn_device("cn1")];
        let topology =
            build_candidate_graph(&inputs, &devices, &[], None, &options(), &projection())
                .unwrap();
        for link in topology.links.values() {
            let tx_cn = topology.sites[link.tx_site()].kind() == SiteKind::Cn;
            let rx_cn = topology.sites[link.rx_site()].kind() == SiteKind::Cn;
            assert!(!(tx_cn && rx_cn));
        }
    }
}
