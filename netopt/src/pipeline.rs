//! Phase sequencing over a topology.
//!
//! Each phase consumes the current topology, builds and solves its
//! problem, and the solution is written back before the next phase
//! starts. Infeasible phases relax (coverage stepdown, shortage
//! minimization) before the pipeline gives up.

use crate::{
    adversarial::find_adversarial_links,
    flowphase::{analyze_flow, FlowReport},
    interference::{solve_min_interference, InterferenceContext},
    model::LinkKey,
    params::PlannerParams,
    prune::candidate_edges_for_redundancy,
    redundancy::{solve_redundancy, RedundancyCaps},
    setup::ModelInput,
    sitephase::{solve_max_coverage, solve_min_cost, solve_pop_proposal},
    solution::PhaseSolution,
    solver::EPSILON,
    OptError,
};
use log::{info, warn};
use meshtopo::{Link, LinkKind, Polarity, Site, SiteKind, Status, Topology};
use std::collections::{BTreeMap, BTreeSet};

/// Coverage ratio stepdown of the min-cost relaxation.
const COVERAGE_STEP_SIZE: f64 = 0.1;
/// Floor of the coverage stepdown.
const COVERAGE_THRESHOLD: f64 = 0.5;

/// Runs the full optimization pipeline in place and returns the final
/// flow analysis.
pub fn optimize_topology(
    topology: &mut Topology,
    params: &PlannerParams,
) -> Result<FlowReport, OptError> {
    pre_opt_check(topology, params)?;

    // Step 0: propose extra POPs when requested.
    run_pop_proposal_step(topology, params)?;

    topology.mark_unreachable_components(Some(params.maximum_number_hops));
    info!(
        "input problem has {} sites, {} links, {} sectors, and {} demand sites",
        topology.sites.len(),
        topology.links.len(),
        topology.sectors.len(),
        topology.demand_sites.len()
    );

    // Step 1: minimum-cost base network with coverage stepdown.
    run_min_cost_step(topology, params)?;

    // Step 2: redundancy.
    if params.enable_legacy_redundancy_method {
        run_max_coverage_step(topology, params)?;
    } else {
        run_redundancy_step(topology, params)?;
    }

    // Step 3: interference-aware final selection.
    run_interference_step(topology, params)?;

    // Step 4: analyze the achievable per-sink bandwidth.
    run_flow_analysis(topology, params)
}

fn pre_opt_check(topology: &Topology, params: &PlannerParams) -> Result<(), OptError> {
    let has_pop = topology
        .sites
        .values()
        .any(|site| site.kind() == SiteKind::Pop);
    if !has_pop && params.number_of_extra_pops == 0 {
        return Err(OptError::Infeasible(
            "the input topology must contain at least one POP location \
             or set number of extra POPs greater than zero"
                .into(),
        ));
    }
    if topology.demand_sites.is_empty() {
        return Err(OptError::Infeasible(
            "no demand sites are attached to the topology".into(),
        ));
    }
    Ok(())
}

/// Promotes every candidate DN to a POP twin and keeps only access
/// links, producing the single-hop universe of the POP proposal.
fn promote_dns_to_pops(topology: &Topology) -> (Topology, BTreeMap<String, String>) {
    let mut promoted = Topology::default();
    let mut twin_of_dn: BTreeMap<String, String> = BTreeMap::new();
    let mut twin_id_of_dn: BTreeMap<String, String> = BTreeMap::new();
    let mut twin_sector: BTreeMap<String, String> = BTreeMap::new();

    for device in topology.devices.values() {
        promoted.add_device(device.clone());
    }

    for site in topology.sites.values() {
        match site.kind() {
            SiteKind::Pop | SiteKind::Cn => {
                promoted.add_site(site.clone());
                for sector in topology.sectors_of_site(site.id()) {
                    promoted.add_sector(sector.clone());
                }
            }
            SiteKind::Dn => {
                let mut twin = Site::new(
                    SiteKind::Pop,
                    site.lonlat(),
                    site.xy(),
                    site.altitude_m(),
                    site.device_sku(),
                    Status::Candidate,
                );
                twin.building_id = site.building_id;
                let twin_id = twin.id().to_owned();
                twin_of_dn.insert(twin_id.clone(), site.id().to_owned());
                twin_id_of_dn.insert(site.id().to_owned(), twin_id.clone());
                for sector in topology.sectors_of_site(site.id()) {
                    let mut copy = meshtopo::Sector::new(
                        &twin_id,
                        sector.node_index(),
                        sector.position_in_node(),
                        sector.kind(),
                        sector.azimuth_deg,
                        Status::Candidate,
                    );
                    copy.node_capex = sector.node_capex;
                    twin_sector.insert(sector.id().to_owned(), copy.id().to_owned());
                    promoted.add_sector(copy);
                }
                promoted.add_site(twin);
            }
        }
    }

    for link in topology.links.values() {
        if link.kind != LinkKind::Access {
            continue;
        }
        // Remap a DN transmitter onto its POP twin.
        let (tx_id, tx_sector) = match twin_id_of_dn.get(link.tx_site()) {
            Some(twin_id) => (
                twin_id.clone(),
                link.tx_sector
                    .as_ref()
                    .and_then(|sector| twin_sector.get(sector))
                    .cloned(),
            ),
            None => (link.tx_site().to_owned(), link.tx_sector.clone()),
        };
        let mut remapped = Link::new(&tx_id, link.rx_site(), LinkKind::Access, link.status);
        remapped.tx_sector = tx_sector;
        remapped.rx_sector = link.rx_sector.clone();
        remapped.distance_m = link.distance_m;
        remapped.capacity_gbps = link.capacity_gbps;
        remapped.mcs = link.mcs;
        remapped.rsl_dbm = link.rsl_dbm;
        promoted.add_link(remapped);
    }

    for demand in topology.demand_sites.values() {
        promoted.add_demand_site(demand.clone());
    }

    (promoted, twin_of_dn)
}

fn run_pop_proposal_step(topology: &mut Topology, params: &PlannerParams) -> Result<(), OptError> {
    if params.number_of_extra_pops == 0 {
        return Ok(());
    }
    info!("finding a set of POPs to propose");
    let (mut promoted, twin_of_dn) = promote_dns_to_pops(topology);
    // Already-placed POPs participate as pinned selections.
    let pop_ids: Vec<String> = promoted
        .sites
        .values()
        .filter(|site| site.kind() == SiteKind::Pop && !twin_of_dn.contains_key(site.id()))
        .map(|site| site.id().to_owned())
        .collect();
    for id in pop_ids {
        let site = promoted.sites.get_mut(&id).unwrap();
        if !site.status.is_inactive() && site.status != Status::Existing {
            site.status = Status::Proposed;
        }
    }

    let input = ModelInput::new(&promoted, params);
    match solve_pop_proposal(&input, params)? {
        Some(solution) => {
            let mut added = 0;
            for (twin_id, dn_id) in &twin_of_dn {
                if !solution.sites.get(twin_id).copied().unwrap_or(false) {
                    continue;
                }
                let dn = &topology.sites[dn_id];
                let mut pop = Site::new(
                    SiteKind::Pop,
                    dn.lonlat(),
                    dn.xy(),
                    dn.altitude_m(),
                    dn.device_sku(),
                    Status::Proposed,
                );
                pop.building_id = dn.building_id;
                // The twin's key attributes reproduce the id the
                // proposal model saw.
                let pop_id = pop.id().to_owned();
                debug_assert_eq!(&pop_id, twin_id);
                topology.add_site(pop);
                added += 1;

                // The twin gets its own copies of the DN's sectors.
                let mut sector_map: BTreeMap<String, String> = BTreeMap::new();
                let dn_sectors: Vec<meshtopo::Sector> = topology
                    .sectors_of_site(dn_id)
                    .into_iter()
                    .cloned()
                    .collect();
                for sector in dn_sectors {
                    let mut copy = meshtopo::Sector::new(
                        &pop_id,
                        sector.node_index(),
                        sector.position_in_node(),
                        sector.kind(),
                        sector.azimuth_deg,
                        Status::Candidate,
                    );
                    copy.node_capex = sector.node_capex;
                    sector_map.insert(sector.id().to_owned(), copy.id().to_owned());
                    topology.add_sector(copy);
                }

                // The twin inherits the DN's links in both directions.
                let dn_links: Vec<Link> = topology
                    .links
                    .values()
                    .filter(|link| link.tx_site() == dn_id || link.rx_site() == dn_id)
                    .cloned()
                    .collect();
                for link in dn_links {
                    let (tx, rx) = if link.tx_site() == dn_id {
                        (pop_id.clone(), link.rx_site().to_owned())
                    } else {
                        (link.tx_site().to_owned(), pop_id.clone())
                    };
                    if topology.link_between(&tx, &rx).is_some() {
                        continue;
                    }
                    let mut twin_link = Link::new(&tx, &rx, link.kind, Status::Candidate);
                    twin_link.tx_sector = link
                        .tx_sector
                        .as_ref()
                        .map(|id| sector_map.get(id).unwrap_or(id).clone());
                    twin_link.rx_sector = link
                        .rx_sector
                        .as_ref()
                        .map(|id| sector_map.get(id).unwrap_or(id).clone());
                    twin_link.distance_m = link.distance_m;
                    twin_link.tx_azimuth_deg = link.tx_azimuth_deg;
                    twin_link.rx_azimuth_deg = link.rx_azimuth_deg;
                    twin_link.capacity_gbps = link.capacity_gbps;
                    twin_link.mcs = link.mcs;
                    twin_link.rsl_dbm = link.rsl_dbm;
                    twin_link.snr_db = link.snr_db;
                    topology.add_link(twin_link);
                }
            }
            info!("proposed {added} extra POP(s)");
        }
        None => warn!(
            "the POP proposal problem found no solution; \
             planning will proceed without extra proposed POPs"
        ),
    }
    Ok(())
}

fn run_min_cost_step(topology: &mut Topology, params: &PlannerParams) -> Result<(), OptError> {
    info!("running cost minimization");
    let input = ModelInput::new(topology, params);
    input.check_pop_feasibility()?;
    input.check_demand_feasibility()?;

    let mut gamma = 1.0;
    while gamma >= COVERAGE_THRESHOLD - 1e-9 {
        info!("setting coverage threshold to {gamma:.2} and performing network optimization");
        if let Some(solution) = solve_min_cost(&input, params, gamma)? {
            apply_solution(topology, &solution, false);
            return Ok(());
        }
        gamma -= COVERAGE_STEP_SIZE;
    }

    Err(OptError::Infeasible(
        "the minimum cost network planning problem is infeasible for the \
         given parameters; consider more POPs, more time, or lower demand"
            .into(),
    ))
}

fn run_max_coverage_step(topology: &mut Topology, params: &PlannerParams) -> Result<(), OptError> {
    info!("maximizing coverage with {} budget", params.budget);
    let input = ModelInput::new(topology, params);

    let active_sites: BTreeSet<String> = topology
        .sites
        .values()
        .filter(|site| site.status.is_active())
        .map(|site| site.id().to_owned())
        .collect();
    let adversarial =
        find_adversarial_links(&input, &active_sites, params.backhaul_link_redundancy_ratio);

    match solve_max_coverage(&input, params, &adversarial)? {
        Some(solution) => {
            apply_solution(topology, &solution, false);
            Ok(())
        }
        None => {
            warn!(
                "the maximum coverage problem found no solution; \
                 planning will proceed with the minimum cost network"
            );
            Ok(())
        }
    }
}

fn run_redundancy_step(topology: &mut Topology, params: &PlannerParams) -> Result<(), OptError> {
    let pop_count = topology.active_sites_of_kind(SiteKind::Pop).len();
    let Some(caps) = RedundancyCaps::for_level(params.redundancy_level, pop_count) else {
        return Ok(());
    };
    info!("adding redundancy to network");

    // Shrink the candidate pool: 4 disjoint POP↔DN paths, 2 between
    // Delaunay-neighbor DNs.
    info!("running heuristic to reduce size of site/link selection pool");
    let mut candidate_links = candidate_edges_for_redundancy(topology, 4.0, 2.0);
    let candidate_nodes: BTreeSet<String> = candidate_links
        .iter()
        .flat_map(|key| [key.0.clone(), key.1.clone()])
        .collect();
    for link in topology.links.values() {
        if candidate_nodes.contains(link.tx_site())
            && candidate_nodes.contains(link.rx_site())
            && link.status.is_reachable()
        {
            candidate_links.insert(link.site_pair());
        }
    }

    let input = ModelInput::new(topology, params);
    match solve_redundancy(&input, params, caps, &candidate_links)? {
        Some(solution) => {
            apply_solution(topology, &solution, false);
            Ok(())
        }
        None => {
            warn!(
                "the redundant network planning problem found no solution; \
                 planning will proceed with the minimum cost network"
            );
            Ok(())
        }
    }
}

fn run_interference_step(topology: &mut Topology, params: &PlannerParams) -> Result<(), OptError> {
    info!("maximizing the coverage that follows interference-based capacity constraints");
    let ctx = InterferenceContext::from_topology(topology, params);
    let input = ModelInput::new(topology, params);
    match solve_min_interference(&input, params, &ctx)? {
        Some(solution) => {
            apply_solution(topology, &solution, true);
            Ok(())
        }
        None => Err(OptError::Infeasible(
            "the minimum interference network planning problem is infeasible \
             for the given parameters"
                .into(),
        )),
    }
}

fn run_flow_analysis(topology: &mut Topology, params: &PlannerParams) -> Result<FlowReport, OptError> {
    // The final phase wrote its interference-settled capacities and
    // classes back onto the links, so this input already carries them.
    let input = ModelInput::new(topology, params);
    let active_sites: BTreeSet<String> = topology
        .sites
        .values()
        .filter(|site| site.status.is_active())
        .map(|site| site.id().to_owned())
        .collect();
    let active_sectors: BTreeSet<String> = topology
        .sectors
        .values()
        .filter(|sector| sector.status.is_active())
        .map(|sector| sector.id().to_owned())
        .collect();
    let mut active_links: BTreeSet<LinkKey> = BTreeSet::new();
    let mut redundant_links: BTreeSet<LinkKey> = BTreeSet::new();
    let mut link_mcs: BTreeMap<LinkKey, u32> = BTreeMap::new();
    for link in topology.links.values() {
        link_mcs.insert(link.site_pair(), link.mcs);
        if link.status.is_active() {
            active_links.insert(link.site_pair());
            if link.is_redundant {
                redundant_links.insert(link.site_pair());
            }
        }
    }
    let report = analyze_flow(
        &input,
        params,
        &link_mcs,
        &active_sites,
        &active_sectors,
        &active_links,
        &redundant_links,
    )?;

    // Record achieved time shares back onto the plan.
    for (key, share) in &report.tdm {
        if let Some(link) = topology.link_between_mut(&key.0, &key.1) {
            link.tdm = *share;
        }
    }
    Ok(report)
}

/// Writes a phase solution back into the topology.
///
/// `final_phase` additionally records channels and flags selected
/// links that carry no planned flow in either direction as redundant.
pub fn apply_solution(topology: &mut Topology, solution: &PhaseSolution, final_phase: bool) {
    let site_ids: Vec<String> = topology.sites.keys().cloned().collect();
    for id in site_ids {
        let Some(&selected) = solution.sites.get(&id) else {
            continue;
        };
        let site = topology.sites.get_mut(&id).unwrap();
        match site.status {
            Status::Existing | Status::Unavailable | Status::Unreachable => {}
            _ => {
                site.status = if selected {
                    Status::Proposed
                } else {
                    Status::Candidate
                };
            }
        }
        site.polarity = if !selected {
            Polarity::Unassigned
        } else if solution.odd_sites.get(&id).copied().unwrap_or(false) {
            Polarity::Odd
        } else if site.kind().is_distribution() {
            Polarity::Even
        } else {
            Polarity::Unassigned
        };
    }

    let sector_ids: Vec<String> = topology.sectors.keys().cloned().collect();
    for id in sector_ids {
        let Some(&selected) = solution.sectors.get(&id) else {
            continue;
        };
        let sector = topology.sectors.get_mut(&id).unwrap();
        match sector.status {
            Status::Existing | Status::Unavailable | Status::Unreachable => {}
            _ => {
                sector.status = if selected {
                    Status::Proposed
                } else {
                    Status::Candidate
                };
            }
        }
        sector.channel = if final_phase {
            solution.channels.get(&id).copied().flatten()
        } else {
            None
        };
    }

    let link_ids: Vec<String> = topology.links.keys().cloned().collect();
    for id in link_ids {
        let (pair, status) = {
            let link = &topology.links[&id];
            (link.site_pair(), link.status)
        };
        let Some(&selected) = solution.links.get(&pair) else {
            continue;
        };
        let link = topology.links.get_mut(&id).unwrap();
        match status {
            Status::Existing | Status::Unavailable | Status::Unreachable => {}
            _ => {
                link.status = if selected {
                    Status::Proposed
                } else {
                    Status::Candidate
                };
            }
        }
        if let Some(share) = solution.tdm.get(&pair) {
            link.tdm = *share;
        }
        if final_phase && selected {
            // The interference phase re-settles the class under actual
            // active-link interference; the analyzer and the reports
            // must see that capacity, not the isolated-link estimate.
            if let Some(&mcs) = solution.link_mcs.get(&pair) {
                link.mcs = mcs;
            }
            if let Some(&capacity) = solution.link_capacity.get(&pair) {
                link.capacity_gbps = capacity;
            }
            let forward = solution.flows.get(&pair).copied().unwrap_or(0.0);
            let reverse = solution
                .flows
                .get(&(pair.1.clone(), pair.0.clone()))
                .copied()
                .unwrap_or(0.0);
            link.is_redundant = forward.abs() < EPSILON && reverse.abs() < EPSILON;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::optimize_topology;
    use crate::params::{PlannerParams, RedundancyLevel};
    use crate::testutil::toy_topology;
    use meshtopo::{SiteKind, Status};

    #[test]
    fn test_pipeline_end_to_end_on_toy_network() {
        let mut topology = toy_topology();
        let params = PlannerParams {
            redundancy_level: RedundancyLevel::None,
            ..PlannerParams::default()
        };
        let report = optimize_topology(&mut topology, &params).unwrap();

        // The plan serves both sinks.
        assert_eq!(report.connected_demand.len(), 2);
        assert!(report.common_bandwidth_gbps > 0.0);

        // The backbone is proposed with alternating polarity.
        let pop = topology
            .sites
            .values()
            .find(|site| site.kind() == SiteKind::Pop)
            .unwrap();
        let dn = topology
            .sites
            .values()
            .find(|site| site.kind() == SiteKind::Dn)
            .unwrap();
        assert_eq!(pop.status, Status::Proposed);
        assert_eq!(dn.status, Status::Proposed);
        assert_ne!(pop.polarity, dn.polarity);

        // Selected sectors carry channel assignments after the final
        // phase.
        for sector in topology.sectors.values() {
            if sector.status.is_active() {
                assert!(sector.channel.is_some());
            }
        }
    }

    #[test]
    fn test_pipeline_requires_a_pop() {
        let mut topology = toy_topology();
        let pop_ids: Vec<String> = topology
            .sites
            .values()
            .filter(|site| site.kind() == SiteKind::Pop)
            .map(|site| site.id().to_owned())
            .collect();
        for id in pop_ids {
            topology.sites.remove(&id);
        }
        let params = PlannerParams::default();
        assert!(optimize_topology(&mut topology, &params).is_err());
    }
}
