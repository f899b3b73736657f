//! Site-selection phases: minimum-cost base network, legacy maximum
//! coverage and POP proposal.
//!
//! These phases decide sites; sector decisions mirror the site
//! decision and links are inferred afterwards from sectors and
//! polarity.

use crate::{
    connected::connectable_demand,
    model::{prune_loops, LinkKey, NetModel},
    params::PlannerParams,
    problem::{Cmp, LinExpr, Sense},
    setup::{LocType, ModelInput},
    solution::PhaseSolution,
    solver::{self, SolveOptions, SolveResult, EPSILON},
    OptError,
};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Builds the problem skeleton shared by every site-selection phase.
fn site_problem_skeleton<'a>(
    input: &'a ModelInput,
    params: &'a PlannerParams,
    name: &str,
    adversarial: &BTreeSet<LinkKey>,
) -> Result<NetModel<'a>, OptError> {
    let mut model = NetModel::new(input, params, name, 1);
    model.create_site_vars();
    model.tie_sectors_to_sites();
    model.create_flow_vars();
    model.create_tdm_vars();
    model.create_shortage_vars();
    model.create_polarity_vars();

    if params.maximize_common_bandwidth {
        let mut ignore_links = input.zero_capacity_links();
        ignore_links.extend(adversarial.iter().cloned());
        model.connected_demand =
            connectable_demand(input, params, &ignore_links, &BTreeSet::new())?;
    }

    model.colocated_site_rules();
    model.tdm_flow_relationship();
    model.tdm_sector_relationship();
    model.pop_load_limits();
    model.flow_balance_with_shortage();
    model.flow_site_gating();
    model.forbid_flow(adversarial);
    model.tdm_polarity_relationship();
    model.pinned_site_constraints();
    model.pinned_link_polarity_constraints();
    model.inactive_link_flow_constraints();
    Ok(model)
}

fn phase_options(params: &PlannerParams, limits: crate::params::PhaseLimits) -> SolveOptions {
    params.solve_options(limits)
}

/// Minimum-cost network at coverage ratio `gamma`. Returns `None` when
/// infeasible (the caller steps `gamma` down) or degenerate.
pub fn solve_min_cost(
    input: &ModelInput,
    params: &PlannerParams,
    gamma: f64,
) -> Result<Option<PhaseSolution>, OptError> {
    // The POPs bound total throughput; bail before building a model
    // that cannot balance flow.
    let pop_count = input
        .locations
        .iter()
        .filter(|location| {
            input.loc_type[*location] == LocType::Pop
                && !input.inactive_sites.contains(*location)
        })
        .count();
    let max_capacity = pop_count as f64 * params.pop_capacity_gbps;
    if max_capacity < input.max_throughput * gamma {
        info!("total POP capacity cannot support the demand at coverage {gamma:.2}");
        return Ok(None);
    }

    let mut model = site_problem_skeleton(input, params, "cost_optimization", &BTreeSet::new())?;
    model.coverage_constraint(gamma);
    model.cost_objective();

    solver::dump_lp(&model.problem, params.debug_dir.as_deref(), "cost_optimization")?;
    let result = solver::solve(&model.problem, &phase_options(params, params.min_cost))?;
    finish_site_phase(model, result)
}

/// Legacy redundancy: maximize coverage under the budget with
/// adversarial links forbidden from carrying flow.
pub fn solve_max_coverage(
    input: &ModelInput,
    params: &PlannerParams,
    adversarial: &BTreeSet<LinkKey>,
) -> Result<Option<PhaseSolution>, OptError> {
    if params.budget <= 0.0 {
        warn!("the budget must be positive - skipping coverage optimization");
        return Ok(None);
    }
    let mut model = site_problem_skeleton(input, params, "coverage_optimization", adversarial)?;
    model.budget_constraint();
    let objective = model.coverage_objective_expr();
    model.problem.set_objective(Sense::Minimize, objective);

    solver::dump_lp(
        &model.problem,
        params.debug_dir.as_deref(),
        "coverage_optimization",
    )?;
    let result = solver::solve(&model.problem, &phase_options(params, params.max_coverage))?;
    finish_site_phase(model, result)
}

/// POP proposal: maximum-coverage single-hop network with the POP
/// count capped at input POPs plus the requested extras.
///
/// The caller passes a promoted topology in which every candidate DN
/// has a POP twin and only access links remain.
pub fn solve_pop_proposal(
    input: &ModelInput,
    params: &PlannerParams,
) -> Result<Option<PhaseSolution>, OptError> {
    // Polarity and common-bandwidth logic do not apply to a one-hop
    // access network.
    let mut local = params.clone();
    local.ignore_polarities = true;
    local.always_active_pops = false;
    local.maximize_common_bandwidth = false;
    let local = &local;

    let mut model = site_problem_skeleton(input, local, "pop_proposal", &BTreeSet::new())?;

    let pop_locations: Vec<String> = input
        .locations
        .iter()
        .filter(|location| {
            input.loc_type[*location] == LocType::Pop
                && !input.inactive_sites.contains(*location)
        })
        .cloned()
        .collect();
    let input_pops = input
        .proposed_sites
        .union(&input.existing_sites)
        .filter(|location| input.loc_type[*location] == LocType::Pop)
        .count();
    let target = (params.number_of_extra_pops as usize + input_pops).min(pop_locations.len());
    if target == 0 {
        return Ok(None);
    }
    let mut pop_sum = LinExpr::new();
    for location in &pop_locations {
        model.site[location].add_to(&mut pop_sum, 1.0);
    }
    model.problem.constrain(pop_sum, Cmp::Eq, target as f64);

    let objective = model.coverage_objective_expr();
    model.problem.set_objective(Sense::Minimize, objective);

    solver::dump_lp(&model.problem, params.debug_dir.as_deref(), "pop_proposal")?;
    let result = solver::solve(&model.problem, &phase_options(params, params.pop_proposal))?;
    finish_site_phase(model, result)
}

fn finish_site_phase(
    model: NetModel<'_>,
    result: SolveResult,
) -> Result<Option<PhaseSolution>, OptError> {
    let Some(solution) = result.usable() else {
        info!("no solution was found");
        return Ok(None);
    };
    Ok(extract_site_solution(&model, solution))
}

/// True when the two endpoints can talk given the polarity decisions.
fn compatible_polarity(
    model: &NetModel<'_>,
    key: &LinkKey,
    odd: &BTreeMap<String, bool>,
) -> bool {
    let input = model.input;
    if input.proposed_links.contains(key)
        || input.existing_links.contains(key)
        || input.wired.contains(key)
    {
        return true;
    }
    if input.loc_type[&key.0].is_distribution() && input.loc_type[&key.1].is_distribution() {
        return odd.get(&key.0).copied().unwrap_or(false)
            != odd.get(&key.1).copied().unwrap_or(false);
    }
    true
}

/// Turns a solved site-selection model into a full phase solution:
/// loops pruned, zero-flow sites dropped, links inferred from sectors
/// and polarity, isolated hardware deselected.
pub fn extract_site_solution(
    model: &NetModel<'_>,
    solution: &crate::solver::Solution,
) -> Option<PhaseSolution> {
    let input = model.input;

    let mut sites: BTreeMap<String, bool> = BTreeMap::new();
    for (location, decision) in &model.site {
        sites.insert(location.clone(), model.binary_decision(*decision, solution));
    }

    let mut odd_sites: BTreeMap<String, bool> = BTreeMap::new();
    for (location, var) in &model.odd {
        let odd = solution.selected(*var) && sites.get(location).copied().unwrap_or(false);
        odd_sites.insert(location.clone(), odd);
    }

    let mut flows: BTreeMap<LinkKey, f64> = BTreeMap::new();
    for (key, var) in &model.flow {
        flows.insert(key.clone(), solution.value(*var));
    }
    prune_loops(&mut flows);
    if flows.values().map(|flow| flow.abs()).sum::<f64>() < EPSILON {
        info!("no flow in solution -- assuming to be degenerate");
        return None;
    }

    // A selected site carrying no flow did not matter to the optimum.
    let mut forced: BTreeSet<String> = input
        .proposed_sites
        .union(&input.existing_sites)
        .cloned()
        .collect();
    for key in input.proposed_links.iter().chain(input.existing_links.iter()) {
        forced.insert(key.0.clone());
        forced.insert(key.1.clone());
    }
    for location in &input.locations {
        if input.loc_type[location].is_imaginary() {
            continue;
        }
        if !sites.get(location).copied().unwrap_or(false) || forced.contains(location) {
            continue;
        }
        let moved: f64 = input.incoming[location]
            .iter()
            .chain(input.outgoing[location].iter())
            .map(|key| flows[key])
            .sum();
        if moved.abs() < EPSILON {
            sites.insert(location.clone(), false);
            odd_sites.insert(location.clone(), false);
        }
    }

    // Sector follows site in these phases.
    let mut sectors: BTreeMap<String, bool> = BTreeMap::new();
    for location in &input.locations {
        for sector in &input.location_sectors[location] {
            if input.sector_class[sector].is_imaginary() {
                continue;
            }
            sectors.insert(
                sector.clone(),
                sites.get(location).copied().unwrap_or(false),
            );
        }
    }

    // Links from endpoint selection and polarity compatibility.
    let mut links: BTreeMap<LinkKey, bool> = BTreeMap::new();
    for key in &input.links {
        if input.loc_type[&key.0].is_imaginary() || input.loc_type[&key.1].is_imaginary() {
            continue;
        }
        let selected = !input.inactive_links.contains(key)
            && input.capacity[key] > 0.0
            && sites.get(&key.0).copied().unwrap_or(false)
            && sites.get(&key.1).copied().unwrap_or(false)
            && (model.params.ignore_polarities || compatible_polarity(model, key, &odd_sites))
            && (input.wired.contains(key) || {
                let (tx_sector, rx_sector) = &input.link_sectors[key];
                match (tx_sector, rx_sector) {
                    (Some(tx), Some(rx)) => {
                        sectors.get(tx).copied().unwrap_or(false)
                            && sectors.get(rx).copied().unwrap_or(false)
                    }
                    _ => false,
                }
            });
        links.insert(key.clone(), selected);
    }

    // Hardware with no active link is not worth deploying.
    let sites_with_links = model.sites_with_active_links(&links);
    let sectors_with_links = model.sectors_with_active_links(&links);
    for location in &input.locations {
        if input.loc_type[location].is_imaginary() {
            continue;
        }
        let keep = sites_with_links.contains(location)
            || input.outgoing[location].iter().any(|key| {
                input.loc_type[&key.1] == LocType::Demand
                    && sites.get(location).copied().unwrap_or(false)
            });
        if !keep {
            sites.insert(location.clone(), false);
            odd_sites.insert(location.clone(), false);
        }
        for sector in &input.location_sectors[location] {
            if input.sector_class[sector].is_imaginary() {
                continue;
            }
            if !sectors_with_links.contains(sector) {
                sectors.insert(sector.clone(), false);
            }
        }
    }

    let mut tdm: BTreeMap<LinkKey, f64> = BTreeMap::new();
    for ((tx, rx, _channel), decision) in &model.tdm {
        let key = (tx.clone(), rx.clone());
        *tdm.entry(key).or_insert(0.0) += decision.value_in(solution);
    }

    let mut shortage: BTreeMap<String, f64> = BTreeMap::new();
    for (location, var) in &model.shortage {
        shortage.insert(location.clone(), solution.value(*var));
    }

    let common_bandwidth = model.common_bandwidth.map(|var| solution.value(var));
    if let Some(value) = common_bandwidth {
        info!("common bandwidth = {value}");
        if value == 0.0 {
            warn!("no common bandwidth found; consider maximizing total network bandwidth");
        }
    }

    let channels: BTreeMap<String, Option<u8>> = sectors
        .iter()
        .map(|(sector, &selected)| (sector.clone(), selected.then_some(0)))
        .collect();

    let cost = evaluate_cost(model, &sites, &sectors);

    Some(PhaseSolution {
        sites,
        odd_sites,
        sectors,
        channels,
        links,
        flows,
        tdm,
        shortage,
        link_mcs: BTreeMap::new(),
        link_capacity: BTreeMap::new(),
        common_bandwidth,
        objective: solution.objective,
        cost,
    })
}

/// Deployment cost of a decided plan; existing hardware is free.
pub fn evaluate_cost(
    model: &NetModel<'_>,
    sites: &BTreeMap<String, bool>,
    sectors: &BTreeMap<String, bool>,
) -> f64 {
    let input = model.input;
    let mut total = 0.0;
    for location in &input.locations {
        if input.loc_type[location].is_imaginary()
            || input.existing_sites.contains(location)
            || !sites.get(location).copied().unwrap_or(false)
        {
            continue;
        }
        total += input.cost_site[location];
        for sector in &input.location_sectors[location] {
            if input.sector_class[sector].is_imaginary() {
                continue;
            }
            if sectors.get(sector).copied().unwrap_or(false) {
                total += input.cost_sector[sector];
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::{solve_min_cost, solve_pop_proposal};
    use crate::params::PlannerParams;
    use crate::setup::ModelInput;
    use crate::testutil::{topology_from, toy_topology, ToySite};
    use meshtopo::SiteKind;

    #[test]
    fn test_min_cost_serves_all_demand_at_full_coverage() {
        let topology = toy_topology();
        let params = PlannerParams::default();
        let input = ModelInput::new(&topology, &params);
        let solution = solve_min_cost(&input, &params, 1.0).unwrap().unwrap();

        // Both CN sinks are fully served.
        for shortage in solution.shortage.values() {
            assert!(shortage.abs() < 1e-6);
        }
        // Flow conservation at the DN relay.
        for location in &input.locations {
            if input.loc_type[location] == crate::setup::LocType::Dn {
                let inflow: f64 = input.incoming[location]
                    .iter()
                    .map(|key| solution.flows[key])
                    .sum();
                let outflow: f64 = input.outgoing[location]
                    .iter()
                    .map(|key| solution.flows[key])
                    .sum();
                assert!((inflow - outflow).abs() < 1e-6);
            }
        }
        // Polarity exclusion on the selected backhaul.
        for (key, selected) in &solution.links {
            if !selected || input.wired.contains(key) {
                continue;
            }
            if input.loc_type[&key.0].is_distribution()
                && input.loc_type[&key.1].is_distribution()
            {
                assert_ne!(solution.odd_sites[&key.0], solution.odd_sites[&key.1]);
            }
        }
    }

    #[test]
    fn test_min_cost_picks_single_colocated_candidate() {
        // Two co-located POP candidates with different devices; the
        // optimizer keeps exactly one.
        let mut topology = toy_topology();
        // A second POP device at the same location.
        let twin = meshtopo::Site::new(
            SiteKind::Pop,
            geo::geometry::Coord { x: 0.0, y: 0.0 },
            geo::geometry::Coord { x: 0.0, y: 0.0 },
            10.0,
            "cn1",
            meshtopo::Status::Candidate,
        );
        let twin_id = twin.id().to_owned();
        topology.add_site(twin);
        let params = PlannerParams::default();
        let input = ModelInput::new(&topology, &params);
        let solution = solve_min_cost(&input, &params, 1.0).unwrap().unwrap();
        let colocated_selected = solution
            .sites
            .iter()
            .filter(|(id, &selected)| {
                selected && (id.as_str() == twin_id || input.loc_type[*id] == crate::setup::LocType::Pop)
            })
            .count();
        assert!(colocated_selected <= 1);
    }

    #[test]
    fn test_infeasible_gamma_returns_none() {
        let topology = toy_topology();
        let params = PlannerParams {
            pop_capacity_gbps: 0.1,
            ..PlannerParams::default()
        };
        let input = ModelInput::new(&topology, &params);
        // 0.4 Gbps demand cannot fit a 0.1 Gbps POP at full coverage.
        let solution = solve_min_cost(&input, &params, 1.0).unwrap();
        assert!(solution.is_none());
    }

    #[test]
    fn test_pop_proposal_counts_pops() {
        // Two candidate POPs serving one CN each; ask for one POP.
        let topology = topology_from(
            &[
                ToySite { kind: SiteKind::Pop, x_m: 0.0, y_m: 0.0 },
                ToySite { kind: SiteKind::Pop, x_m: 500.0, y_m: 0.0 },
                ToySite { kind: SiteKind::Cn, x_m: 50.0, y_m: 50.0 },
                ToySite { kind: SiteKind::Cn, x_m: 60.0, y_m: -40.0 },
            ],
            &[(0, 2, 1.8), (0, 3, 1.8), (1, 2, 1.8)],
        );
        let params = PlannerParams {
            number_of_extra_pops: 1,
            ..PlannerParams::default()
        };
        let input = ModelInput::new(&topology, &params);
        let solution = solve_pop_proposal(&input, &params).unwrap().unwrap();
        let selected_pops = solution
            .sites
            .iter()
            .filter(|(id, &selected)| {
                selected && input.loc_type[*id] == crate::setup::LocType::Pop
            })
            .count();
        assert_eq!(selected_pops, 1);
    }
}
