//! Connected demand site identification.
//!
//! Which demand sinks can ever be served? Without polarity or P2MP
//! constraints a graph search answers this; with them, a small MILP
//! maximizing the number of positive-flow sinks does.

use crate::{
    model::{LinkKey, NetModel},
    params::PlannerParams,
    problem::{Cmp, LinExpr, Sense},
    setup::{LocType, ModelInput, SUPERSOURCE},
    solver::{self, SolveOptions},
    OptError,
};
use log::info;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Demand sinks reachable from the supersource over positive-capacity
/// non-ignored links; plain breadth-first search.
pub fn reachable_demand_without_constraints(
    input: &ModelInput,
    ignore_links: &BTreeSet<LinkKey>,
    ignore_sites: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for key in &input.links {
        if ignore_links.contains(key) || input.inactive_links.contains(key) {
            continue;
        }
        if input.capacity[key] <= 0.0 {
            continue;
        }
        if ignore_sites.contains(&key.0)
            || ignore_sites.contains(&key.1)
            || input.inactive_sites.contains(&key.0)
            || input.inactive_sites.contains(&key.1)
        {
            continue;
        }
        adjacency.entry(key.0.as_str()).or_default().push(&key.1);
    }

    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    visited.insert(SUPERSOURCE);
    queue.push_back(SUPERSOURCE);
    while let Some(node) = queue.pop_front() {
        for &next in adjacency.get(node).into_iter().flatten() {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    input
        .demand_locations()
        .into_iter()
        .filter(|location| visited.contains(location.as_str()))
        .collect()
}

/// Polarity-aware connected demand model: unit flows, demand binaries
/// gated by incoming flow, objective maximizing connected sinks.
///
/// Returns `None` when no integer solution is found in time; callers
/// fall back to the unconstrained search.
pub fn reachable_demand_with_constraints(
    input: &ModelInput,
    params: &PlannerParams,
    ignore_links: &BTreeSet<LinkKey>,
    ignore_sites: &BTreeSet<String>,
) -> Result<Option<BTreeSet<String>>, OptError> {
    let mut model = NetModel::new(input, params, "connected_demand", 1);
    model.create_unit_flow_vars();
    model.tie_tdm_to_unit_flow();
    model.create_polarity_vars();

    // Demand binaries.
    let mut demand_vars = BTreeMap::new();
    for location in input.demand_locations() {
        let var = model.problem.add_binary(format!("demand_{location}"));
        demand_vars.insert(location, var);
    }

    // Site decisions are fixed: everything not ignored participates.
    let mut active: BTreeSet<String> = BTreeSet::new();
    for location in &input.locations {
        if input.loc_type[location].is_imaginary() {
            continue;
        }
        if !input.inactive_sites.contains(location) && !ignore_sites.contains(location) {
            active.insert(location.clone());
        }
    }
    model.fix_site_vars(&active);

    model.inactive_link_flow_constraints();
    model.forbid_flow(ignore_links);
    model.tdm_polarity_relationship();
    model.pinned_link_polarity_constraints();

    // Unit flow balance: real sites balance (or stay at zero when
    // inactive), the supersource only emits, and a demand binary needs
    // incoming flow to turn on.
    let big_m = 10.0 * input.demand_locations().len().max(1) as f64;
    for location in &input.locations {
        let incoming: Vec<&LinkKey> = input.incoming[location].iter().collect();
        let outgoing: Vec<&LinkKey> = input.outgoing[location].iter().collect();
        match input.loc_type[location] {
            LocType::Supersource => {}
            LocType::Demand => {
                let mut gate = LinExpr::term(demand_vars[location], 1.0);
                for key in &incoming {
                    gate.add_term(model.flow[*key], -big_m);
                }
                model.problem.constrain(gate, Cmp::Le, 0.0);
            }
            _ => {
                if incoming.is_empty() && outgoing.is_empty() {
                    continue;
                }
                if !active.contains(location) {
                    for key in incoming.iter().chain(outgoing.iter()) {
                        model.problem.constrain(
                            LinExpr::term(model.flow[*key], 1.0),
                            Cmp::Eq,
                            0.0,
                        );
                    }
                    continue;
                }
                let mut net = LinExpr::new();
                for key in &incoming {
                    net.add_term(model.flow[*key], 1.0);
                }
                for key in &outgoing {
                    net.add_term(model.flow[*key], -1.0);
                }
                model.problem.constrain(net, Cmp::Eq, 0.0);
            }
        }
    }

    let mut objective = LinExpr::new();
    for var in demand_vars.values() {
        objective.add_term(*var, 1.0);
    }
    model.problem.set_objective(Sense::Maximize, objective);

    let options = SolveOptions {
        rel_gap: None,
        max_time_minutes: Some(params.demand_site.max_time_minutes),
        threads: params.num_threads,
    };
    let result = solver::solve(&model.problem, &options)?;
    let Some(solution) = result.usable() else {
        return Ok(None);
    };

    let connected: BTreeSet<String> = demand_vars
        .iter()
        .filter(|(_, &var)| solution.selected(var))
        .map(|(location, _)| location.clone())
        .collect();
    info!("{} connected demand sites", connected.len());
    Ok(Some(connected))
}

/// Connected sinks with the constraint-aware model when polarities
/// matter, falling back to the plain search.
pub fn connectable_demand(
    input: &ModelInput,
    params: &PlannerParams,
    ignore_links: &BTreeSet<LinkKey>,
    ignore_sites: &BTreeSet<String>,
) -> Result<BTreeSet<String>, OptError> {
    if !params.ignore_polarities {
        if let Some(connected) =
            reachable_demand_with_constraints(input, params, ignore_links, ignore_sites)?
        {
            return Ok(connected);
        }
        info!("polarity-constrained connected demand not found, using graph search");
    }
    Ok(reachable_demand_without_constraints(
        input,
        ignore_links,
        ignore_sites,
    ))
}

#[cfg(test)]
mod tests {
    use super::{connectable_demand, reachable_demand_without_constraints};
    use crate::params::PlannerParams;
    use crate::setup::ModelInput;
    use crate::testutil::toy_topology;
    use std::collections::BTreeSet;

    #[test]
    fn test_all_toy_demand_is_reachable() {
        let topology = toy_topology();
        let input = ModelInput::new(&topology, &PlannerParams::default());
        let connected =
            reachable_demand_without_constraints(&input, &BTreeSet::new(), &BTreeSet::new());
        assert_eq!(connected.len(), 2);
    }

    #[test]
    fn test_banned_access_link_disconnects_sink() {
        let topology = toy_topology();
        let input = ModelInput::new(&topology, &PlannerParams::default());
        // Ban every access link into CN sinks.
        let banned: BTreeSet<_> = input
            .links
            .iter()
            .filter(|key| {
                input.is_wireless(key)
                    && input.loc_type[&key.1] == crate::setup::LocType::Cn
            })
            .cloned()
            .collect();
        let connected = reachable_demand_without_constraints(&input, &banned, &BTreeSet::new());
        assert!(connected.is_empty());
    }

    #[test]
    fn test_constrained_model_matches_search_on_toy() {
        let topology = toy_topology();
        let params = PlannerParams::default();
        let input = ModelInput::new(&topology, &params);
        let connected =
            connectable_demand(&input, &params, &BTreeSet::new(), &BTreeSet::new()).unwrap();
        assert_eq!(connected.len(), 2);
    }
}
