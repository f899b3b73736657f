//! Post-plan flow analysis.
//!
//! A pure LP over the final selected network: how much bandwidth β can
//! every connected demand sink be guaranteed simultaneously, under a
//! uniform time-division assumption and the configured routing filter?
//! Link capacities are the ones the interference phase settled under
//! actual active-link interference, not the isolated-link estimates.

use crate::{
    connected::reachable_demand_without_constraints,
    model::{prune_loops, LinkKey, NetModel},
    params::{PlannerParams, TopologyRouting},
    problem::{Cmp, LinExpr, Sense},
    setup::{LocType, ModelInput, SUPERSOURCE},
    solver::{self, SolveOptions, EPSILON},
    OptError,
};
use log::info;
use petgraph::{algo::dijkstra, graph::NodeIndex, visit::EdgeRef, Graph};
use std::collections::{BTreeMap, BTreeSet};

/// Flow analyzer output.
#[derive(Debug, Clone, Default)]
pub struct FlowReport {
    /// Guaranteed Gbps per connected demand sink.
    pub common_bandwidth_gbps: f64,
    pub flows: BTreeMap<LinkKey, f64>,
    pub tdm: BTreeMap<LinkKey, f64>,
    /// Flow over nominal capacity per selected wireless link.
    pub utilization: BTreeMap<LinkKey, f64>,
    pub connected_demand: BTreeSet<String>,
}

/// MCS-dependent routing cost of the MCS-cost filter.
fn mcs_cost(mcs: u32) -> f64 {
    match mcs {
        0 | 1 => f64::INFINITY,
        2 | 3 => 15.0,
        4..=8 => 3.0,
        _ => 1.0,
    }
}

/// Links permitted to carry flow under the routing filter: the union
/// of minimum-cost routes from the supersource to every connected
/// sink. Disjoint-path routing keeps the whole selected network.
fn routing_allowed_links(
    input: &ModelInput,
    link_mcs: &BTreeMap<LinkKey, u32>,
    routing: TopologyRouting,
    connected: &BTreeSet<String>,
    usable: &BTreeSet<LinkKey>,
) -> Option<BTreeSet<LinkKey>> {
    if routing == TopologyRouting::DpaPath {
        return None;
    }

    let mut graph: Graph<String, f64> = Graph::new();
    let mut nodes: BTreeMap<&str, NodeIndex> = BTreeMap::new();
    for location in &input.locations {
        nodes.insert(location, graph.add_node(location.clone()));
    }
    let mut edge_keys: BTreeMap<(NodeIndex, NodeIndex), LinkKey> = BTreeMap::new();
    for key in usable {
        let cost = match routing {
            TopologyRouting::McsCostPath if input.is_wireless(key) => {
                mcs_cost(link_mcs.get(key).copied().unwrap_or(0))
            }
            _ => 1.0,
        };
        if cost.is_infinite() {
            continue;
        }
        let (from, to) = (nodes[key.0.as_str()], nodes[key.1.as_str()]);
        graph.add_edge(from, to, cost);
        edge_keys.insert((from, to), key.clone());
    }

    // Cheapest cost to every node, then walk each sink's route back
    // along tight edges.
    let source = nodes[SUPERSOURCE];
    let costs = dijkstra(&graph, source, None, |edge| *edge.weight());
    let mut allowed: BTreeSet<LinkKey> = BTreeSet::new();
    for sink in connected {
        let mut cursor = nodes[sink.as_str()];
        let mut guard = graph.node_count() + 1;
        while cursor != source && guard > 0 {
            guard -= 1;
            let Some(&cursor_cost) = costs.get(&cursor) else {
                break;
            };
            // Find a predecessor on a tight edge, lowest-cost first
            // for determinism.
            let mut best: Option<(f64, NodeIndex, LinkKey)> = None;
            for edge in graph.edges_directed(cursor, petgraph::Direction::Incoming) {
                let from = edge.source();
                let Some(&from_cost) = costs.get(&from) else {
                    continue;
                };
                if (from_cost + edge.weight() - cursor_cost).abs() < 1e-9 {
                    let key = edge_keys[&(from, cursor)].clone();
                    let better = match &best {
                        None => true,
                        Some((best_cost, _, best_key)) => {
                            from_cost < *best_cost
                                || (from_cost == *best_cost && key < *best_key)
                        }
                    };
                    if better {
                        best = Some((from_cost, from, key));
                    }
                }
            }
            let Some((_, from, key)) = best else {
                break;
            };
            allowed.insert(key);
            cursor = from;
        }
    }
    Some(allowed)
}

/// Runs the flow analyzer over the final topology's model input.
///
/// Only active sites, sectors and links participate; redundant links
/// are zero-capacity placeholders. Disconnected demand sinks receive
/// β = 0 and stay out of the max-min.
pub fn analyze_flow(
    input: &ModelInput,
    params: &PlannerParams,
    link_mcs: &BTreeMap<LinkKey, u32>,
    active_sites: &BTreeSet<String>,
    active_sectors: &BTreeSet<String>,
    active_links: &BTreeSet<LinkKey>,
    redundant_links: &BTreeSet<LinkKey>,
) -> Result<FlowReport, OptError> {
    // Candidates count as inactive here: flow may only use the plan.
    let mut ignore_links: BTreeSet<LinkKey> = BTreeSet::new();
    for key in &input.links {
        if input.is_wireless(key) && (!active_links.contains(key) || redundant_links.contains(key))
        {
            ignore_links.insert(key.clone());
        }
    }
    let mut ignore_sites: BTreeSet<String> = BTreeSet::new();
    for location in &input.locations {
        if !input.loc_type[location].is_imaginary() && !active_sites.contains(location) {
            ignore_sites.insert(location.clone());
        }
    }

    let connected = reachable_demand_without_constraints(input, &ignore_links, &ignore_sites);

    let mut model = NetModel::new(input, params, "common_buffer_optimization", 1);
    model.fix_site_vars(active_sites);
    for location in &input.locations {
        for sector in &input.location_sectors[location] {
            if input.sector_class[sector].is_imaginary() {
                continue;
            }
            let value = if active_sectors.contains(sector) { 1.0 } else { 0.0 };
            model
                .sector
                .insert((sector.clone(), 0), crate::model::Decision::Fixed(value));
        }
    }
    model.create_flow_vars();
    model.create_tdm_vars();

    model.tdm_sector_relationship();
    model.tdm_flow_relationship();
    model.flow_site_gating();
    model.inactive_link_flow_constraints();
    model.forbid_flow(&ignore_links);
    model.pop_load_limits();

    // Routing filter: flow sticks to the filtered route set.
    let usable: BTreeSet<LinkKey> = input
        .links
        .iter()
        .filter(|key| !ignore_links.contains(*key))
        .cloned()
        .collect();
    if let Some(allowed) =
        routing_allowed_links(input, link_mcs, params.topology_routing, &connected, &usable)
    {
        let banned: BTreeSet<LinkKey> = usable
            .iter()
            .filter(|key| input.is_wireless(key) && !allowed.contains(*key))
            .cloned()
            .collect();
        model.forbid_flow(&banned);
    }

    // β: the identical bandwidth delivered to every connected sink.
    let buffer = model
        .problem
        .add_continuous("buffer".into(), 0.0, f64::INFINITY);
    for location in &input.locations {
        let incoming: Vec<&LinkKey> = input.incoming[location].iter().collect();
        let outgoing: Vec<&LinkKey> = input.outgoing[location].iter().collect();
        if incoming.is_empty() && outgoing.is_empty() {
            continue;
        }
        let mut net = LinExpr::new();
        for key in &incoming {
            net.add_term(model.flow[*key], 1.0);
        }
        for key in &outgoing {
            net.add_term(model.flow[*key], -1.0);
        }
        match input.loc_type[location] {
            LocType::Demand => {
                if connected.contains(location) {
                    net.add_term(buffer, -1.0);
                }
                model.problem.constrain(net, Cmp::Eq, 0.0);
            }
            LocType::Supersource => {
                model.problem.constrain(net, Cmp::Le, 0.0);
            }
            _ => {
                model.problem.constrain(net, Cmp::Eq, 0.0);
            }
        }
    }
    model
        .problem
        .set_objective(Sense::Maximize, LinExpr::term(buffer, 1.0));

    solver::dump_lp(
        &model.problem,
        params.debug_dir.as_deref(),
        "common_buffer_optimization",
    )?;
    // An LP; the generous defaults are overkill already.
    let options = SolveOptions {
        rel_gap: None,
        max_time_minutes: Some(60.0),
        threads: params.num_threads,
    };
    let result = solver::solve(&model.problem, &options)?;
    let Some(solution) = result.usable() else {
        info!("no solution was found");
        return Ok(FlowReport::default());
    };

    let common_bandwidth_gbps = solution.value(buffer);
    info!("common bandwidth = {common_bandwidth_gbps}");

    let mut flows: BTreeMap<LinkKey, f64> = BTreeMap::new();
    for (key, var) in &model.flow {
        flows.insert(key.clone(), solution.value(*var));
    }
    prune_loops(&mut flows);

    let mut tdm: BTreeMap<LinkKey, f64> = BTreeMap::new();
    for ((tx, rx, _), decision) in &model.tdm {
        *tdm.entry((tx.clone(), rx.clone())).or_insert(0.0) += decision.value_in(solution);
    }

    let mut utilization: BTreeMap<LinkKey, f64> = BTreeMap::new();
    for key in active_links {
        let capacity = input.capacity.get(key).copied().unwrap_or(0.0);
        if capacity > EPSILON {
            utilization.insert(key.clone(), flows.get(key).copied().unwrap_or(0.0) / capacity);
        }
    }

    Ok(FlowReport {
        common_bandwidth_gbps,
        flows,
        tdm,
        utilization,
        connected_demand: connected,
    })
}

#[cfg(test)]
mod tests {
    use super::analyze_flow;
    use crate::model::LinkKey;
    use crate::params::PlannerParams;
    use crate::setup::ModelInput;
    use crate::testutil::toy_topology;
    use std::collections::{BTreeMap, BTreeSet};

    fn all_active(
        input: &ModelInput,
    ) -> (BTreeSet<String>, BTreeSet<String>, BTreeSet<LinkKey>) {
        let sites: BTreeSet<String> = input
            .locations
            .iter()
            .filter(|id| !input.loc_type[*id].is_imaginary())
            .cloned()
            .collect();
        let sectors: BTreeSet<String> = input
            .sector_class
            .iter()
            .filter(|(_, class)| !class.is_imaginary())
            .map(|(sector, _)| sector.clone())
            .collect();
        let links: BTreeSet<LinkKey> = input
            .links
            .iter()
            .filter(|key| input.is_wireless(key))
            .cloned()
            .collect();
        (sites, sectors, links)
    }

    #[test]
    fn test_toy_network_shares_bandwidth() {
        let topology = toy_topology();
        let params = PlannerParams::default();
        let input = ModelInput::new(&topology, &params);
        let (sites, sectors, links) = all_active(&input);
        let mcs: BTreeMap<LinkKey, u32> = links.iter().map(|key| (key.clone(), 12)).collect();
        let report = analyze_flow(
            &input,
            &params,
            &mcs,
            &sites,
            &sectors,
            &links,
            &BTreeSet::new(),
        )
        .unwrap();

        assert_eq!(report.connected_demand.len(), 2);
        // Each sink is guaranteed a positive share.
        assert!(report.common_bandwidth_gbps > 0.0);
        // Utilization never exceeds one.
        for value in report.utilization.values() {
            assert!(*value <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_disconnected_sink_gets_zero() {
        let topology = toy_topology();
        let params = PlannerParams::default();
        let input = ModelInput::new(&topology, &params);
        let (sites, sectors, mut links) = all_active(&input);
        // Cut the backhaul: the far CN sink drops out of the max-min.
        links.retain(|key| {
            !(input.loc_type[&key.0].is_distribution()
                && input.loc_type[&key.1].is_distribution())
        });
        let mcs: BTreeMap<LinkKey, u32> = links.iter().map(|key| (key.clone(), 12)).collect();
        let report = analyze_flow(
            &input,
            &params,
            &mcs,
            &sites,
            &sectors,
            &links,
            &BTreeSet::new(),
        )
        .unwrap();
        assert_eq!(report.connected_demand.len(), 1);
        assert!(report.common_bandwidth_gbps > 0.0);
    }
}
