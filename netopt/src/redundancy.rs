//! Min-cost redundancy phase.
//!
//! Given the base backhaul (active POPs and DNs), find the cheapest
//! extra DNs giving every base DN the desired number of site-disjoint
//! unit-flow paths from the POPs. One commodity flows per base DN;
//! shortage relaxes unreachable targets, minimized first, then the
//! cost is minimized with shortage pinned.

use crate::{
    model::LinkKey,
    params::{PlannerParams, RedundancyLevel},
    problem::{Cmp, LinExpr, Problem, Sense, VarId},
    setup::{LocType, ModelInput, SUPERSOURCE},
    solution::PhaseSolution,
    solver::{self, SolveOptions},
    OptError,
};
use log::info;
use std::collections::{BTreeMap, BTreeSet};

/// Node capacities realizing a redundancy level, per the POP count.
#[derive(Debug, Clone, Copy)]
pub struct RedundancyCaps {
    pub pop_node_capacity: f64,
    pub dn_node_capacity: f64,
    pub sink_node_capacity: f64,
}

impl RedundancyCaps {
    pub fn for_level(level: RedundancyLevel, pop_count: usize) -> Option<Self> {
        match level {
            RedundancyLevel::None => None,
            // Survives any single link failure.
            RedundancyLevel::Low => Some(Self {
                pop_node_capacity: 2.0,
                dn_node_capacity: 2.0,
                sink_node_capacity: 2.0,
            }),
            RedundancyLevel::Medium => Some(if pop_count > 1 {
                // Survives any single site failure.
                Self {
                    pop_node_capacity: 1.0,
                    dn_node_capacity: 1.0,
                    sink_node_capacity: 2.0,
                }
            } else {
                Self {
                    pop_node_capacity: 2.0,
                    dn_node_capacity: 1.0,
                    sink_node_capacity: 2.0,
                }
            }),
            RedundancyLevel::High => Some(if pop_count > 1 {
                // Survives a POP plus DN failure or three DN failures.
                Self {
                    pop_node_capacity: 2.0,
                    dn_node_capacity: 1.0,
                    sink_node_capacity: 4.0,
                }
            } else {
                Self {
                    pop_node_capacity: 3.0,
                    dn_node_capacity: 1.0,
                    sink_node_capacity: 3.0,
                }
            }),
        }
    }
}

struct RedundancyModel<'a> {
    input: &'a ModelInput,
    params: &'a PlannerParams,
    caps: RedundancyCaps,
    /// Base-network DNs each requiring disjoint paths.
    dns: Vec<String>,
    restricted_links: BTreeSet<LinkKey>,
    restricted_sites: BTreeSet<String>,
    problem: Problem,
    site: BTreeMap<String, VarId>,
    odd: BTreeMap<String, VarId>,
    flow: BTreeMap<(String, String, String), VarId>,
    shortage_vars: BTreeMap<String, VarId>,
    /// Fixed shortage from the first solve.
    shortage_fixed: BTreeMap<String, f64>,
}

impl<'a> RedundancyModel<'a> {
    fn new(
        input: &'a ModelInput,
        params: &'a PlannerParams,
        caps: RedundancyCaps,
        restricted: &BTreeSet<LinkKey>,
        name: &str,
    ) -> Self {
        let dns: Vec<String> = input
            .locations
            .iter()
            .filter(|location| {
                input.loc_type[*location] == LocType::Dn
                    && (input.proposed_sites.contains(*location)
                        || input.existing_sites.contains(*location))
            })
            .cloned()
            .collect();

        // Backhaul universe, with supersource feeds always kept.
        let restricted_links: BTreeSet<LinkKey> = input
            .links
            .iter()
            .filter(|key| {
                input.capacity[key] > 0.0
                    && matches!(
                        input.loc_type[&key.0],
                        LocType::Pop | LocType::Dn | LocType::Supersource
                    )
                    && matches!(input.loc_type[&key.1], LocType::Pop | LocType::Dn)
                    && (key.0 == SUPERSOURCE || restricted.is_empty() || restricted.contains(key))
            })
            .cloned()
            .collect();
        let restricted_sites: BTreeSet<String> = restricted_links
            .iter()
            .flat_map(|key| [key.0.clone(), key.1.clone()])
            .filter(|location| location != SUPERSOURCE)
            .chain(dns.iter().cloned())
            .collect();

        Self {
            input,
            params,
            caps,
            dns,
            restricted_links,
            restricted_sites,
            problem: Problem::new(name),
            site: BTreeMap::new(),
            odd: BTreeMap::new(),
            flow: BTreeMap::new(),
            shortage_vars: BTreeMap::new(),
            shortage_fixed: BTreeMap::new(),
        }
    }

    fn build_skeleton(&mut self, with_shortage_vars: bool) {
        for location in &self.restricted_sites {
            let var = self.problem.add_binary(format!("site_{location}"));
            self.site.insert(location.clone(), var);
        }
        if !self.params.ignore_polarities {
            for location in &self.restricted_sites {
                if self.input.loc_type[location].is_distribution() {
                    let var = self.problem.add_binary(format!("odd_{location}"));
                    self.odd.insert(location.clone(), var);
                }
            }
        }
        for dn in self.dns.clone() {
            for key in &self.restricted_links.clone() {
                let ub = if key.0 == SUPERSOURCE {
                    self.caps.pop_node_capacity
                } else {
                    1.0
                };
                let var = self.problem.add_continuous(
                    format!("flow_{}_{}_{dn}", key.0, key.1),
                    0.0,
                    ub,
                );
                self.flow.insert((key.0.clone(), key.1.clone(), dn.clone()), var);
            }
        }
        if with_shortage_vars {
            for dn in self.dns.clone() {
                let var = self.problem.add_continuous(
                    format!("dn_{dn}"),
                    0.0,
                    self.caps.sink_node_capacity,
                );
                self.shortage_vars.insert(dn, var);
            }
        }

        self.decided_site_constraints();
        self.inactive_link_flows();
        self.colocated_rules();
        self.flow_site_limits();
        self.flow_balance(with_shortage_vars);
        self.flow_polarity();
    }

    /// Base sites stay active, inactive sites stay out, extra POPs
    /// cannot appear.
    fn decided_site_constraints(&mut self) {
        for location in &self.restricted_sites {
            let var = self.site[location];
            if self.input.proposed_sites.contains(location)
                || self.input.existing_sites.contains(location)
            {
                self.problem
                    .constrain(LinExpr::term(var, 1.0), Cmp::Eq, 1.0);
            } else if self.input.inactive_sites.contains(location)
                || self.input.loc_type[location] == LocType::Pop
            {
                self.problem
                    .constrain(LinExpr::term(var, 1.0), Cmp::Eq, 0.0);
            }
        }
    }

    fn inactive_link_flows(&mut self) {
        for key in &self.restricted_links {
            if !self.input.inactive_links.contains(key) {
                continue;
            }
            for dn in &self.dns {
                let var = self.flow[&(key.0.clone(), key.1.clone(), dn.clone())];
                self.problem
                    .constrain(LinExpr::term(var, 1.0), Cmp::Eq, 0.0);
            }
        }
    }

    /// Among co-located distribution candidates at most one DN type
    /// can join the backhaul.
    fn colocated_rules(&mut self) {
        for group in &self.input.colocated {
            let mut expr = LinExpr::new();
            let mut members = 0;
            for location in group {
                if self.input.loc_type[location].is_distribution() {
                    if let Some(&var) = self.site.get(location) {
                        expr.add_term(var, 1.0);
                        members += 1;
                    }
                }
            }
            if members > 1 {
                self.problem.constrain(expr, Cmp::Le, 1.0);
            }
        }
    }

    fn incoming_flow(&self, location: &str, dn: &str) -> Option<LinExpr> {
        let mut expr = LinExpr::new();
        let mut any = false;
        for key in &self.input.incoming[location] {
            if !self.restricted_links.contains(key) {
                continue;
            }
            expr.add_term(self.flow[&(key.0.clone(), key.1.clone(), dn.to_owned())], 1.0);
            any = true;
        }
        any.then_some(expr)
    }

    fn outgoing_flow(&self, location: &str, dn: &str) -> Option<LinExpr> {
        let mut expr = LinExpr::new();
        let mut any = false;
        for key in &self.input.outgoing[location] {
            if !self.restricted_links.contains(key) {
                continue;
            }
            expr.add_term(self.flow[&(key.0.clone(), key.1.clone(), dn.to_owned())], 1.0);
            any = true;
        }
        any.then_some(expr)
    }

    /// Incoming flow per commodity fits the node capacity of the site
    /// and requires the site selected.
    fn flow_site_limits(&mut self) {
        for location in self.restricted_sites.clone() {
            for dn in self.dns.clone() {
                let cap = if self.input.loc_type[&location] == LocType::Pop {
                    self.caps.pop_node_capacity
                } else if location == dn {
                    self.caps.sink_node_capacity
                } else {
                    self.caps.dn_node_capacity
                };
                if let Some(mut incoming) = self.incoming_flow(&location, &dn) {
                    incoming.add_term(self.site[&location], -cap);
                    self.problem.constrain(incoming, Cmp::Le, 0.0);
                }
            }
        }
    }

    fn flow_balance(&mut self, with_shortage_vars: bool) {
        let mut locations: Vec<String> = self.restricted_sites.iter().cloned().collect();
        locations.push(SUPERSOURCE.to_owned());
        for location in locations {
            for dn in self.dns.clone() {
                let incoming = self.incoming_flow(&location, &dn);
                let outgoing = self.outgoing_flow(&location, &dn);
                if incoming.is_none() && outgoing.is_none() {
                    continue;
                }
                let mut net = LinExpr::new();
                if let Some(expr) = incoming {
                    net.add_expr(&expr, 1.0);
                }
                if let Some(expr) = outgoing {
                    net.add_expr(&expr, -1.0);
                }

                let shortage = |net: &mut LinExpr, scale: f64| {
                    if with_shortage_vars {
                        net.add_term(self.shortage_vars[&dn], scale);
                    } else {
                        net.add_constant(self.shortage_fixed.get(&dn).copied().unwrap_or(0.0) * scale);
                    }
                };
                if location == SUPERSOURCE {
                    // net >= shortage - sink_capacity
                    shortage(&mut net, -1.0);
                    self.problem
                        .constrain(net, Cmp::Ge, -self.caps.sink_node_capacity);
                } else if location == dn {
                    // net >= sink_capacity - shortage
                    shortage(&mut net, 1.0);
                    self.problem
                        .constrain(net, Cmp::Ge, self.caps.sink_node_capacity);
                } else {
                    self.problem.constrain(net, Cmp::Eq, 0.0);
                }
            }
        }
    }

    /// Positive commodity flow forces opposite polarities.
    fn flow_polarity(&mut self) {
        if self.params.ignore_polarities {
            return;
        }
        for key in self.restricted_links.clone() {
            if key.0 == SUPERSOURCE {
                continue;
            }
            if self.input.proposed_links.contains(&key) || self.input.existing_links.contains(&key)
            {
                let mut expr = LinExpr::term(self.odd[&key.0], 1.0);
                expr.add_term(self.odd[&key.1], 1.0);
                self.problem.constrain(expr, Cmp::Eq, 1.0);
                continue;
            }
            for dn in self.dns.clone() {
                let flow = self.flow[&(key.0.clone(), key.1.clone(), dn.clone())];
                let mut both_even = LinExpr::term(flow, 1.0);
                both_even.add_term(self.odd[&key.0], -1.0);
                both_even.add_term(self.odd[&key.1], -1.0);
                self.problem.constrain(both_even, Cmp::Le, 0.0);
                let mut both_odd = LinExpr::term(flow, 1.0);
                both_odd.add_term(self.odd[&key.0], 1.0);
                both_odd.add_term(self.odd[&key.1], 1.0);
                self.problem.constrain(both_odd, Cmp::Le, 2.0);
            }
        }
    }

    fn cost_objective(&mut self) {
        let mut cost = LinExpr::new();
        for location in &self.restricted_sites {
            if self.input.existing_sites.contains(location) {
                continue;
            }
            let var = self.site[location];
            let mut site_cost = self.input.cost_site[location];
            for sector in &self.input.location_sectors[location] {
                if self.input.sector_class[sector].is_imaginary() {
                    continue;
                }
                site_cost += self.input.cost_sector[sector];
            }
            cost.add_term(var, site_cost);
        }
        self.problem.set_objective(Sense::Minimize, cost);
    }

    fn shortage_objective(&mut self) {
        let mut total = LinExpr::new();
        for var in self.shortage_vars.values() {
            total.add_term(*var, 1.0);
        }
        self.problem.set_objective(Sense::Minimize, total);
    }
}

/// Runs the two-phase redundancy optimization and returns the selected
/// backhaul extension, or `None` when no solution exists.
pub fn solve_redundancy(
    input: &ModelInput,
    params: &PlannerParams,
    caps: RedundancyCaps,
    restricted: &BTreeSet<LinkKey>,
) -> Result<Option<PhaseSolution>, OptError> {
    let options = SolveOptions {
        rel_gap: Some(params.redundancy.rel_gap).filter(|gap| *gap > 0.0),
        max_time_minutes: Some(params.redundancy.max_time_minutes),
        threads: params.num_threads,
    };

    // Phase one: minimize total shortage.
    let mut shortage_model =
        RedundancyModel::new(input, params, caps, restricted, "redundant_min_shortage");
    shortage_model.build_skeleton(true);
    shortage_model.shortage_objective();
    solver::dump_lp(
        &shortage_model.problem,
        params.debug_dir.as_deref(),
        "redundant_min_shortage",
    )?;
    let result = solver::solve(&shortage_model.problem, &options)?;
    let Some(solution) = result.usable() else {
        info!("no redundancy shortage solution found");
        return Ok(None);
    };
    let shortage_fixed: BTreeMap<String, f64> = shortage_model
        .shortage_vars
        .iter()
        .map(|(dn, &var)| (dn.clone(), solution.value(var)))
        .collect();

    // Phase two: pin the shortage, minimize cost.
    let mut cost_model =
        RedundancyModel::new(input, params, caps, restricted, "redundant_min_cost");
    cost_model.shortage_fixed = shortage_fixed.clone();
    cost_model.build_skeleton(false);
    cost_model.cost_objective();
    solver::dump_lp(
        &cost_model.problem,
        params.debug_dir.as_deref(),
        "redundant_min_cost",
    )?;
    let result = solver::solve(&cost_model.problem, &options)?;
    let Some(solution) = result.usable() else {
        info!("no redundancy cost solution found");
        return Ok(None);
    };

    // Assemble the phase decisions: selected backhaul plus carried-over
    // CN and polarity state.
    let mut sites: BTreeMap<String, bool> = BTreeMap::new();
    for location in &input.locations {
        if input.loc_type[location].is_imaginary() {
            continue;
        }
        let selected = match cost_model.site.get(location) {
            Some(&var) => solution.selected(var),
            None => {
                // Outside the restricted backhaul: carry input state.
                input.proposed_sites.contains(location)
                    || input.existing_sites.contains(location)
            }
        };
        sites.insert(location.clone(), selected);
    }
    // A CN shadowed by a newly selected co-located DN steps aside.
    for group in &input.colocated {
        let dn_active = group.iter().any(|location| {
            input.loc_type[location].is_distribution()
                && sites.get(location).copied().unwrap_or(false)
        });
        if dn_active {
            for location in group {
                if input.loc_type[location] == LocType::Cn {
                    sites.insert(location.clone(), false);
                }
            }
        }
    }

    let mut odd_sites: BTreeMap<String, bool> = BTreeMap::new();
    for (location, &var) in &cost_model.odd {
        odd_sites.insert(
            location.clone(),
            solution.selected(var) && sites.get(location).copied().unwrap_or(false),
        );
    }
    for location in &input.locations {
        if input.loc_type[location].is_distribution() && !odd_sites.contains_key(location) {
            odd_sites.insert(
                location.clone(),
                sites.get(location).copied().unwrap_or(false)
                    && input.odd_sites.contains(location),
            );
        }
    }

    let mut sectors: BTreeMap<String, bool> = BTreeMap::new();
    for location in &input.locations {
        for sector in &input.location_sectors[location] {
            if input.sector_class[sector].is_imaginary() {
                continue;
            }
            sectors.insert(sector.clone(), sites.get(location).copied().unwrap_or(false));
        }
    }

    // Per-commodity unit flows, summed for reporting.
    let mut flows: BTreeMap<LinkKey, f64> = BTreeMap::new();
    for ((tx, rx, _dn), &var) in &cost_model.flow {
        *flows.entry((tx.clone(), rx.clone())).or_insert(0.0) += solution.value(var);
    }

    let mut links: BTreeMap<LinkKey, bool> = BTreeMap::new();
    for key in &input.links {
        if input.loc_type[&key.0].is_imaginary() || input.loc_type[&key.1].is_imaginary() {
            continue;
        }
        let both = sites.get(&key.0).copied().unwrap_or(false)
            && sites.get(&key.1).copied().unwrap_or(false);
        let polarity_ok = params.ignore_polarities
            || input.wired.contains(key)
            || input.proposed_links.contains(key)
            || input.existing_links.contains(key)
            || !(input.loc_type[&key.0].is_distribution()
                && input.loc_type[&key.1].is_distribution())
            || odd_sites.get(&key.0).copied().unwrap_or(false)
                != odd_sites.get(&key.1).copied().unwrap_or(false);
        links.insert(
            key.clone(),
            both && polarity_ok
                && input.capacity[key] > 0.0
                && !input.inactive_links.contains(key),
        );
    }

    let channels: BTreeMap<String, Option<u8>> = sectors
        .iter()
        .map(|(sector, &selected)| (sector.clone(), selected.then_some(0)))
        .collect();

    Ok(Some(PhaseSolution {
        sites,
        odd_sites,
        sectors,
        channels,
        links,
        flows,
        tdm: BTreeMap::new(),
        shortage: shortage_fixed,
        link_mcs: BTreeMap::new(),
        link_capacity: BTreeMap::new(),
        common_bandwidth: None,
        objective: solution.objective,
        cost: solution.objective,
    }))
}

#[cfg(test)]
mod tests {
    use super::{solve_redundancy, RedundancyCaps};
    use crate::params::{PlannerParams, RedundancyLevel};
    use crate::setup::{LocType, ModelInput};
    use crate::testutil::{topology_from, ToySite};
    use meshtopo::{SiteKind, Status};
    use std::collections::BTreeSet;

    #[test]
    fn test_caps_by_level() {
        assert!(RedundancyCaps::for_level(RedundancyLevel::None, 1).is_none());
        let low = RedundancyCaps::for_level(RedundancyLevel::Low, 1).unwrap();
        assert_eq!(low.sink_node_capacity, 2.0);
        let high_multi = RedundancyCaps::for_level(RedundancyLevel::High, 3).unwrap();
        assert_eq!(high_multi.sink_node_capacity, 4.0);
    }

    /// Base network POP—DN with a two-DN candidate detour; the detour
    /// needs two hops so the polarity parity works out.
    fn detour_topology() -> meshtopo::Topology {
        let mut topology = topology_from(
            &[
                ToySite { kind: SiteKind::Pop, x_m: 0.0, y_m: 0.0 },
                ToySite { kind: SiteKind::Dn, x_m: 600.0, y_m: 0.0 },
                ToySite { kind: SiteKind::Dn, x_m: 200.0, y_m: 150.0 },
                ToySite { kind: SiteKind::Dn, x_m: 400.0, y_m: 150.0 },
            ],
            &[
                (0, 1, 1.8),
                (1, 0, 1.8),
                (0, 2, 1.8),
                (2, 0, 1.8),
                (2, 3, 1.8),
                (3, 2, 1.8),
                (3, 1, 1.8),
                (1, 3, 1.8),
            ],
        );
        // POP and the far DN form the base network; the two middle DNs
        // are candidate detours.
        let ids: Vec<String> = topology.sites.keys().cloned().collect();
        for id in &ids {
            let site = topology.sites.get_mut(id).unwrap();
            if site.xy().y == 0.0 {
                site.status = Status::Proposed;
            }
        }
        topology
    }

    #[test]
    fn test_low_redundancy_buys_the_detour() {
        let topology = detour_topology();
        let params = PlannerParams::default();
        let input = ModelInput::new(&topology, &params);
        let caps = RedundancyCaps::for_level(RedundancyLevel::Low, 1).unwrap();
        let solution = solve_redundancy(&input, &params, caps, &BTreeSet::new())
            .unwrap()
            .unwrap();

        // Two link-disjoint paths to the base DN require both detour
        // DNs.
        let detour_selected = input
            .locations
            .iter()
            .filter(|id| {
                input.loc_type[*id] == LocType::Dn
                    && !input.proposed_sites.contains(*id)
                    && solution.sites[*id]
            })
            .count();
        assert_eq!(detour_selected, 2);
        for shortage in solution.shortage.values() {
            assert!(*shortage < 1e-6);
        }
    }
}
