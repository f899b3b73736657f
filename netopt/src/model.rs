//! Shared MILP construction over the model input tables.
//!
//! Each optimization phase assembles a [`NetModel`], picks the
//! variable families it needs and emits the constraint families it
//! uses. Decisions can be free variables or fixed constants, so the
//! same emitters serve the site-selection phases (sectors tied to
//! sites), the interference phase (sites fixed, links free) and the
//! flow analyzer (everything fixed).

use crate::{
    params::PlannerParams,
    problem::{Cmp, LinExpr, Problem, Sense, VarId},
    setup::{LocType, ModelInput, SectorClass},
    solver::{Solution, EPSILON},
};
use std::collections::{BTreeMap, BTreeSet};

pub type LinkKey = (String, String);

/// A model quantity that is either still open or already decided.
#[derive(Debug, Clone, Copy)]
pub enum Decision {
    Free(VarId),
    Fixed(f64),
}

impl Decision {
    pub fn add_to(self, expr: &mut LinExpr, coef: f64) {
        match self {
            Decision::Free(var) => {
                expr.add_term(var, coef);
            }
            Decision::Fixed(value) => {
                expr.add_constant(value * coef);
            }
        }
    }

    pub fn expr(self, coef: f64) -> LinExpr {
        let mut expr = LinExpr::new();
        self.add_to(&mut expr, coef);
        expr
    }

    pub fn fixed_value(self) -> Option<f64> {
        match self {
            Decision::Fixed(value) => Some(value),
            Decision::Free(_) => None,
        }
    }

    pub fn value_in(self, solution: &Solution) -> f64 {
        match self {
            Decision::Free(var) => solution.value(var),
            Decision::Fixed(value) => value,
        }
    }
}

pub struct NetModel<'a> {
    pub input: &'a ModelInput,
    pub params: &'a PlannerParams,
    /// Channel count of this phase; the site-selection phases run
    /// single-channel.
    pub channels: u8,
    pub problem: Problem,
    pub site: BTreeMap<String, Decision>,
    /// Sector activation per channel. CN sectors and single-channel
    /// phases only use channel 0.
    pub sector: BTreeMap<(String, u8), Decision>,
    pub flow: BTreeMap<LinkKey, VarId>,
    pub tdm: BTreeMap<(String, String, u8), Decision>,
    pub odd: BTreeMap<String, VarId>,
    pub shortage: BTreeMap<String, VarId>,
    pub common_bandwidth: Option<VarId>,
    pub active_link: BTreeMap<LinkKey, VarId>,
    /// Demand sinks known to be connectable, for the common-bandwidth
    /// objective.
    pub connected_demand: BTreeSet<String>,
}

impl<'a> NetModel<'a> {
    pub fn new(input: &'a ModelInput, params: &'a PlannerParams, name: &str, channels: u8) -> Self {
        Self {
            input,
            params,
            channels,
            problem: Problem::new(name),
            site: BTreeMap::new(),
            sector: BTreeMap::new(),
            flow: BTreeMap::new(),
            tdm: BTreeMap::new(),
            odd: BTreeMap::new(),
            shortage: BTreeMap::new(),
            common_bandwidth: None,
            active_link: BTreeMap::new(),
            connected_demand: BTreeSet::new(),
        }
    }

    fn channels_of_sector(&self, sector: &str) -> u8 {
        match self.input.sector_class[sector] {
            SectorClass::Dn => self.channels,
            _ => 1,
        }
    }

    /// Channel-summed activation of a sector as an expression.
    pub fn sector_sum(&self, sector: &str) -> LinExpr {
        let mut expr = LinExpr::new();
        for channel in 0..self.channels_of_sector(sector) {
            if let Some(decision) = self.sector.get(&(sector.to_owned(), channel)) {
                decision.add_to(&mut expr, 1.0);
            }
        }
        expr
    }

    /// Channel-summed tdm of a link as an expression.
    pub fn tdm_sum(&self, key: &LinkKey) -> Option<LinExpr> {
        if !self
            .tdm
            .contains_key(&(key.0.clone(), key.1.clone(), 0))
        {
            return None;
        }
        let mut expr = LinExpr::new();
        for channel in 0..self.channels {
            if let Some(decision) = self.tdm.get(&(key.0.clone(), key.1.clone(), channel)) {
                decision.add_to(&mut expr, 1.0);
            }
        }
        Some(expr)
    }

    // ----- variable families -----

    /// Binary site decision per real location.
    pub fn create_site_vars(&mut self) {
        for location in &self.input.locations {
            if self.input.loc_type[location].is_imaginary() {
                continue;
            }
            let var = self.problem.add_binary(format!("site_{location}"));
            self.site.insert(location.clone(), Decision::Free(var));
        }
    }

    /// Fixes site decisions to the given activation set.
    pub fn fix_site_vars(&mut self, active: &BTreeSet<String>) {
        for location in &self.input.locations {
            if self.input.loc_type[location].is_imaginary() {
                continue;
            }
            let value = if active.contains(location) { 1.0 } else { 0.0 };
            self.site.insert(location.clone(), Decision::Fixed(value));
        }
    }

    /// Binary sector decision per (real sector, channel).
    pub fn create_sector_vars(&mut self) {
        for location in &self.input.locations {
            for sector in &self.input.location_sectors[location] {
                if self.input.sector_class[sector].is_imaginary() {
                    continue;
                }
                for channel in 0..self.channels_of_sector(sector) {
                    let var = self.problem.add_binary(format!("s_{sector}_{channel}"));
                    self.sector
                        .insert((sector.clone(), channel), Decision::Free(var));
                }
            }
        }
    }

    /// Ties each sector decision to its site decision, as in the
    /// site-selection phases where sectors follow sites.
    pub fn tie_sectors_to_sites(&mut self) {
        for location in &self.input.locations {
            for sector in &self.input.location_sectors[location] {
                if self.input.sector_class[sector].is_imaginary() {
                    continue;
                }
                let decision = self.site[location];
                self.sector.insert((sector.clone(), 0), decision);
            }
        }
    }

    /// Unbounded flow variable per link.
    pub fn create_flow_vars(&mut self) {
        for key in &self.input.links {
            let var = self
                .problem
                .add_continuous(format!("flow_{}_{}", key.0, key.1), 0.0, f64::INFINITY);
            self.flow.insert(key.clone(), var);
        }
    }

    /// Unit-bounded flow variable per link, used by the connected
    /// demand model.
    pub fn create_unit_flow_vars(&mut self) {
        for key in &self.input.links {
            let var = self
                .problem
                .add_continuous(format!("flow_{}_{}", key.0, key.1), 0.0, 1.0);
            self.flow.insert(key.clone(), var);
        }
    }

    /// Time-division share per wireless link and channel.
    pub fn create_tdm_vars(&mut self) {
        for key in &self.input.links {
            if !self.input.is_wireless(key) {
                continue;
            }
            for channel in 0..self.channels {
                let var = self.problem.add_continuous(
                    format!("tdm_{}_{}_{channel}", key.0, key.1),
                    0.0,
                    1.0,
                );
                self.tdm
                    .insert((key.0.clone(), key.1.clone(), channel), Decision::Free(var));
            }
        }
    }

    /// Reuses the unit flow variables as tdm, as the connected demand
    /// model does.
    pub fn tie_tdm_to_unit_flow(&mut self) {
        for key in &self.input.links {
            if !self.input.is_wireless(key) {
                continue;
            }
            let var = self.flow[key];
            self.tdm
                .insert((key.0.clone(), key.1.clone(), 0), Decision::Free(var));
        }
    }

    /// Binary polarity per distribution site.
    pub fn create_polarity_vars(&mut self) {
        if self.params.ignore_polarities {
            return;
        }
        for location in &self.input.locations {
            if self.input.loc_type[location].is_distribution() {
                let var = self.problem.add_binary(format!("odd_{location}"));
                self.odd.insert(location.clone(), var);
            }
        }
    }

    /// Shortage per demand sink, bounded by its demand.
    pub fn create_shortage_vars(&mut self) {
        for location in self.input.demand_locations() {
            let var = self.problem.add_continuous(
                format!("shortage_{location}"),
                0.0,
                self.input.demand_at[&location],
            );
            self.shortage.insert(location, var);
        }
    }

    /// Binary wireless link decision per sectored positive-capacity
    /// link.
    pub fn create_active_link_vars(&mut self) {
        for key in &self.input.links {
            if !self.input.is_wireless(key) {
                continue;
            }
            if self.input.capacity[key] <= 0.0 {
                continue;
            }
            let (tx_sector, rx_sector) = &self.input.link_sectors[key];
            if tx_sector.is_none() || rx_sector.is_none() {
                continue;
            }
            let var = self
                .problem
                .add_binary(format!("active_link_{}_{}", key.0, key.1));
            self.active_link.insert(key.clone(), var);
        }
    }

    // ----- constraint families -----

    fn incoming_flow(&self, location: &str) -> Option<LinExpr> {
        let links = &self.input.incoming[location];
        if links.is_empty() {
            return None;
        }
        let mut expr = LinExpr::new();
        for key in links {
            expr.add_term(self.flow[key], 1.0);
        }
        Some(expr)
    }

    fn outgoing_flow(&self, location: &str) -> Option<LinExpr> {
        let links = &self.input.outgoing[location];
        if links.is_empty() {
            return None;
        }
        let mut expr = LinExpr::new();
        for key in links {
            expr.add_term(self.flow[key], 1.0);
        }
        Some(expr)
    }

    /// Flow balance: zero at real sites, demand minus shortage at the
    /// sinks, total draw at the supersource.
    pub fn flow_balance_with_shortage(&mut self) {
        for location in &self.input.locations {
            let incoming = self.incoming_flow(location);
            let outgoing = self.outgoing_flow(location);
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

            match self.input.loc_type[location] {
                LocType::Demand => {
                    // net == demand - shortage
                    net.add_term(self.shortage[location], 1.0);
                    self.problem
                        .constrain(net, Cmp::Eq, self.input.demand_at[location]);
                }
                LocType::Supersource => {
                    // net == -max_throughput + Σ shortage
                    for demand in self.input.demand_locations() {
                        net.add_term(self.shortage[&demand], -1.0);
                    }
                    self.problem
                        .constrain(net, Cmp::Eq, -self.input.max_throughput);
                }
                _ => {
                    self.problem.constrain(net, Cmp::Eq, 0.0);
                }
            }
        }
    }

    /// Flow through a site requires the site to be selected.
    pub fn flow_site_gating(&mut self) {
        for location in &self.input.locations {
            let site = if self.input.loc_type[location].is_imaginary() {
                Decision::Fixed(1.0)
            } else {
                self.site[location]
            };
            let bound = self.input.max_throughput;
            if let Some(mut incoming) = self.incoming_flow(location) {
                site.add_to(&mut incoming, -bound);
                self.problem.constrain(incoming, Cmp::Le, 0.0);
            }
            if let Some(mut outgoing) = self.outgoing_flow(location) {
                site.add_to(&mut outgoing, -bound);
                self.problem.constrain(outgoing, Cmp::Le, 0.0);
            }
        }
    }

    /// POPs draw at most their backbone capacity.
    pub fn pop_load_limits(&mut self) {
        for location in &self.input.locations {
            if self.input.loc_type[location] != LocType::Pop {
                continue;
            }
            if let Some(outgoing) = self.outgoing_flow(location) {
                self.problem
                    .constrain(outgoing, Cmp::Le, self.params.pop_capacity_gbps);
            }
        }
    }

    /// Flow on a wireless link is limited by its effective capacity,
    /// tdm × capacity summed over channels. Wired links are limited by
    /// capacity and total throughput.
    pub fn tdm_flow_relationship(&mut self) {
        for key in &self.input.links {
            let capacity = self.input.capacity[key];
            if let Some(tdm_sum) = self.tdm_sum(key) {
                let mut expr = LinExpr::term(self.flow[key], 1.0);
                expr.add_expr(&tdm_sum, -capacity);
                self.problem.constrain(expr, Cmp::Le, 0.0);
            } else {
                self.problem.constrain(
                    LinExpr::term(self.flow[key], 1.0),
                    Cmp::Le,
                    capacity.min(self.input.max_throughput),
                );
            }
        }
    }

    /// Per sector and channel, incoming and outgoing tdm each fit in
    /// the sector's duty cycle.
    pub fn tdm_sector_relationship(&mut self) {
        for location in &self.input.locations {
            if self.input.loc_type[location].is_imaginary() {
                continue;
            }
            for sector in &self.input.location_sectors[location] {
                if self.input.sector_class[sector].is_imaginary() {
                    continue;
                }
                for channel in 0..self.channels_of_sector(sector) {
                    let Some(sector_decision) =
                        self.sector.get(&(sector.clone(), channel)).copied()
                    else {
                        continue;
                    };

                    let mut outgoing = LinExpr::new();
                    let mut any_outgoing = false;
                    for key in &self.input.outgoing[location] {
                        let (tx_sector, _) = &self.input.link_sectors[key];
                        if tx_sector.as_deref() != Some(sector.as_str()) {
                            continue;
                        }
                        if let Some(decision) =
                            self.tdm.get(&(key.0.clone(), key.1.clone(), channel))
                        {
                            decision.add_to(&mut outgoing, 1.0);
                            any_outgoing = true;
                        }
                    }
                    if any_outgoing {
                        sector_decision.add_to(&mut outgoing, -1.0);
                        self.problem.constrain(outgoing, Cmp::Le, 0.0);
                    }

                    let mut incoming = LinExpr::new();
                    let mut any_incoming = false;
                    for key in &self.input.incoming[location] {
                        let (_, rx_sector) = &self.input.link_sectors[key];
                        if rx_sector.as_deref() != Some(sector.as_str()) {
                            continue;
                        }
                        if let Some(decision) =
                            self.tdm.get(&(key.0.clone(), key.1.clone(), channel))
                        {
                            decision.add_to(&mut incoming, 1.0);
                            any_incoming = true;
                        }
                    }
                    if any_incoming {
                        sector_decision.add_to(&mut incoming, -1.0);
                        self.problem.constrain(incoming, Cmp::Le, 0.0);
                    }
                }
            }
        }
    }

    /// If any tdm flows over a DN–DN link, its endpoints must take
    /// opposite polarities.
    pub fn tdm_polarity_relationship(&mut self) {
        if self.params.ignore_polarities {
            return;
        }
        let input_active: BTreeSet<&LinkKey> = self
            .input
            .proposed_links
            .iter()
            .chain(self.input.existing_links.iter())
            .collect();
        for key in &self.input.links {
            if input_active.contains(key) || self.input.wired.contains(key) {
                continue;
            }
            if !(self.input.loc_type[&key.0].is_distribution()
                && self.input.loc_type[&key.1].is_distribution())
            {
                continue;
            }
            let Some(tdm_sum) = self.tdm_sum(key) else {
                continue;
            };
            // Both even: tdm <= odd_i + odd_j = 0.
            let mut both_even = tdm_sum.clone();
            both_even.add_term(self.odd[&key.0], -1.0);
            both_even.add_term(self.odd[&key.1], -1.0);
            self.problem.constrain(both_even, Cmp::Le, 0.0);
            // Both odd: tdm <= 2 - odd_i - odd_j.
            let mut both_odd = tdm_sum;
            both_odd.add_term(self.odd[&key.0], 1.0);
            both_odd.add_term(self.odd[&key.1], 1.0);
            self.problem.constrain(both_odd, Cmp::Le, 2.0);
        }
    }

    /// Sectors can only be active on selected sites.
    pub fn sector_site_relationship(&mut self) {
        for location in &self.input.locations {
            if self.input.loc_type[location].is_imaginary() {
                continue;
            }
            for sector in &self.input.location_sectors[location] {
                if self.input.sector_class[sector].is_imaginary() {
                    continue;
                }
                if self.sector.get(&(sector.clone(), 0)).is_none() {
                    continue;
                }
                let mut expr = self.sector_sum(sector);
                if expr.is_constant() && expr.constant == 0.0 {
                    continue;
                }
                self.site[location].add_to(&mut expr, -1.0);
                self.problem.constrain(expr, Cmp::Le, 0.0);
            }
        }
    }

    /// Sectors sharing a node activate together.
    pub fn same_node_coupling(&mut self) {
        let mut nodes: BTreeMap<(String, u8), Vec<String>> = BTreeMap::new();
        for location in &self.input.locations {
            for sector in &self.input.location_sectors[location] {
                if self.input.sector_class[sector].is_imaginary() {
                    continue;
                }
                if self.sector.get(&(sector.clone(), 0)).is_none() {
                    continue;
                }
                if let Some(node) = self.input.sector_node.get(sector) {
                    nodes.entry(node.clone()).or_default().push(sector.clone());
                }
            }
        }
        for sectors in nodes.values() {
            for pair in 1..sectors.len() {
                let mut expr = self.sector_sum(&sectors[0]);
                expr.add_expr(&self.sector_sum(&sectors[pair]), -1.0);
                self.problem.constrain(expr, Cmp::Eq, 0.0);
            }
        }
    }

    /// A DN sector picks at most one channel.
    pub fn sector_channel_limits(&mut self) {
        if self.channels == 1 {
            return;
        }
        for location in &self.input.locations {
            for sector in &self.input.location_sectors[location] {
                if self.input.sector_class[sector] != SectorClass::Dn {
                    continue;
                }
                if self.sector.get(&(sector.clone(), 0)).is_none() {
                    continue;
                }
                let expr = self.sector_sum(sector);
                self.problem.constrain(expr, Cmp::Le, 1.0);
            }
        }
    }

    /// Sectors pinned by the input stay selected.
    pub fn pinned_sector_constraints(&mut self) {
        for (location, sectors) in &self.input.proposed_sectors {
            let _ = location;
            for sector in sectors {
                if self.sector.get(&(sector.clone(), 0)).is_none() {
                    continue;
                }
                let expr = self.sector_sum(sector);
                if expr.is_constant() {
                    continue;
                }
                self.problem.constrain(expr, Cmp::Eq, 1.0);
            }
        }
    }

    /// At most one site per physical location, honoring the upgrade
    /// ladder for already active co-located sites.
    pub fn colocated_site_rules(&mut self) {
        let mut input_active: BTreeSet<String> = self
            .input
            .proposed_sites
            .union(&self.input.existing_sites)
            .cloned()
            .collect();
        for key in self
            .input
            .proposed_links
            .iter()
            .chain(self.input.existing_links.iter())
        {
            input_active.insert(key.0.clone());
            input_active.insert(key.1.clone());
        }
        if self.params.always_active_pops {
            for location in &self.input.locations {
                if self.input.loc_type[location] == LocType::Pop
                    && !self.input.inactive_sites.contains(location)
                {
                    input_active.insert(location.clone());
                }
            }
        }

        for group in &self.input.colocated {
            let active: BTreeSet<&String> = group
                .iter()
                .filter(|id| input_active.contains(*id))
                .collect();

            let mut sum = LinExpr::new();
            for id in group {
                self.site[id].add_to(&mut sum, 1.0);
            }
            if active.is_empty() {
                self.problem.constrain(sum, Cmp::Le, 1.0);
                continue;
            }

            // Some co-located site is already active: exactly one of
            // the group is selected and only valid upgrades qualify.
            self.problem.constrain(sum, Cmp::Eq, 1.0);
            let (max_type, valid) = colocated_upgrade_types(
                &active
                    .iter()
                    .map(|id| self.input.loc_type[*id])
                    .collect::<Vec<_>>(),
            );
            let mut invalid = LinExpr::new();
            let mut any_invalid = false;
            for id in group {
                let loc_type = self.input.loc_type[id];
                if !valid.contains(&loc_type)
                    || (loc_type == max_type && !input_active.contains(id))
                {
                    self.site[id].add_to(&mut invalid, 1.0);
                    any_invalid = true;
                }
            }
            if any_invalid {
                self.problem.constrain(invalid, Cmp::Eq, 0.0);
            }
        }
    }

    /// Network cost as an expression over site and sector decisions;
    /// existing hardware is free.
    pub fn cost_expr(&self) -> LinExpr {
        let mut cost = LinExpr::new();
        for location in &self.input.locations {
            if self.input.loc_type[location].is_imaginary()
                || self.input.existing_sites.contains(location)
            {
                continue;
            }
            self.site[location].add_to(&mut cost, self.input.cost_site[location]);
            for sector in &self.input.location_sectors[location] {
                if self.input.sector_class[sector].is_imaginary() {
                    continue;
                }
                if self.sector.get(&(sector.clone(), 0)).is_none() {
                    continue;
                }
                let sector_cost = self.input.cost_sector[sector];
                if sector_cost != 0.0 {
                    let sum = self.sector_sum(sector);
                    cost.add_expr(&sum, sector_cost);
                }
            }
        }
        cost
    }

    pub fn budget_constraint(&mut self) {
        let cost = self.cost_expr();
        if !cost.is_constant() {
            self.problem.constrain(cost, Cmp::Le, self.params.budget);
        }
    }

    pub fn cost_objective(&mut self) {
        let cost = self.cost_expr();
        self.problem.set_objective(Sense::Minimize, cost);
    }

    /// Coverage floor at ratio `gamma`: either per-sink minimum service
    /// (common-bandwidth mode) or a total-shortage ceiling.
    pub fn coverage_constraint(&mut self, gamma: f64) {
        let demands = self.input.demand_locations();
        if demands.is_empty() {
            return;
        }
        if self.params.maximize_common_bandwidth {
            let min_demand = self
                .connected_demand
                .iter()
                .map(|location| self.input.demand_at[location])
                .fold(f64::INFINITY, f64::min);
            if min_demand == f64::INFINITY {
                return;
            }
            for location in &demands {
                if !self.connected_demand.contains(location) {
                    continue;
                }
                // demand - shortage >= gamma * min_demand
                let mut expr = LinExpr::term(self.shortage[location], -1.0);
                expr.add_constant(self.input.demand_at[location]);
                self.problem.constrain(expr, Cmp::Ge, gamma * min_demand);
            }
        } else {
            let total: f64 = demands
                .iter()
                .map(|location| self.input.demand_at[location])
                .sum();
            let mut expr = LinExpr::new();
            for location in &demands {
                expr.add_term(self.shortage[location], 1.0);
            }
            self.problem.constrain(expr, Cmp::Le, (1.0 - gamma) * total);
        }
    }

    /// Auxiliary variable equal to the worst service over connected
    /// sinks.
    pub fn create_common_bandwidth(&mut self) {
        if self.connected_demand.is_empty() {
            return;
        }
        let upper = self
            .connected_demand
            .iter()
            .map(|location| self.input.demand_at[location])
            .fold(f64::INFINITY, f64::min);
        let var = self
            .problem
            .add_continuous("common_bandwidth".into(), 0.0, upper);
        self.common_bandwidth = Some(var);
        for location in self.connected_demand.clone() {
            // common <= demand - shortage
            let mut expr = LinExpr::term(var, 1.0);
            expr.add_term(self.shortage[&location], 1.0);
            self.problem
                .constrain(expr, Cmp::Le, self.input.demand_at[&location]);
        }
    }

    /// Coverage objective term: total shortage, or the negated common
    /// bandwidth in max-min mode.
    pub fn coverage_objective_expr(&mut self) -> LinExpr {
        if self.params.maximize_common_bandwidth {
            self.create_common_bandwidth();
            match self.common_bandwidth {
                Some(var) => LinExpr::term(var, -1.0),
                None => LinExpr::new(),
            }
        } else {
            let mut expr = LinExpr::new();
            for location in self.input.demand_locations() {
                expr.add_term(self.shortage[&location], 1.0);
            }
            expr
        }
    }

    /// Proposed/existing sites stay selected, inactive sites stay out;
    /// co-located groups are handled by their own rule.
    pub fn pinned_site_constraints(&mut self) {
        for location in &self.input.locations {
            if self.input.loc_type[location].is_imaginary() {
                continue;
            }
            let Decision::Free(var) = self.site[location] else {
                continue;
            };
            let solo = self
                .input
                .location_group_size
                .get(location)
                .map(|size| *size <= 1)
                .unwrap_or(true);
            let force_pop = self.params.always_active_pops
                && self.input.loc_type[location] == LocType::Pop
                && !self.input.inactive_sites.contains(location);
            if force_pop && solo {
                self.problem
                    .constrain(LinExpr::term(var, 1.0), Cmp::Eq, 1.0);
            } else if (self.input.proposed_sites.contains(location)
                || self.input.existing_sites.contains(location))
                && solo
            {
                self.problem
                    .constrain(LinExpr::term(var, 1.0), Cmp::Eq, 1.0);
            } else if self.input.inactive_sites.contains(location) {
                self.problem
                    .constrain(LinExpr::term(var, 1.0), Cmp::Eq, 0.0);
            }
        }
    }

    /// Input-active links force opposite polarities outright.
    pub fn pinned_link_polarity_constraints(&mut self) {
        if self.params.ignore_polarities {
            return;
        }
        for key in self
            .input
            .proposed_links
            .iter()
            .chain(self.input.existing_links.iter())
        {
            if let (Some(&odd_tx), Some(&odd_rx)) = (self.odd.get(&key.0), self.odd.get(&key.1)) {
                let mut expr = LinExpr::term(odd_tx, 1.0);
                expr.add_term(odd_rx, 1.0);
                self.problem.constrain(expr, Cmp::Eq, 1.0);
            }
        }
    }

    /// Inactive links carry no flow.
    pub fn inactive_link_flow_constraints(&mut self) {
        for key in &self.input.links {
            if self.input.inactive_links.contains(key) {
                self.problem
                    .constrain(LinExpr::term(self.flow[key], 1.0), Cmp::Eq, 0.0);
            }
        }
    }

    /// Forbids flow on an explicit link set (adversarial links).
    pub fn forbid_flow(&mut self, banned: &BTreeSet<LinkKey>) {
        for key in &self.input.links {
            if banned.contains(key) {
                self.problem
                    .constrain(LinExpr::term(self.flow[key], 1.0), Cmp::Eq, 0.0);
            }
        }
    }

    // ----- extraction helpers -----

    pub fn binary_decision(&self, decision: Decision, solution: &Solution) -> bool {
        decision.value_in(solution) > 1.0 - EPSILON
    }

    /// Sites with at least one selected incident link.
    pub fn sites_with_active_links(&self, links: &BTreeMap<LinkKey, bool>) -> BTreeSet<String> {
        let mut active = BTreeSet::new();
        for (key, selected) in links {
            if *selected {
                active.insert(key.0.clone());
                active.insert(key.1.clone());
            }
        }
        active
    }

    /// Sectors with a selected incident link, expanded over their
    /// whole node.
    pub fn sectors_with_active_links(
        &self,
        links: &BTreeMap<LinkKey, bool>,
    ) -> BTreeSet<String> {
        let mut active = BTreeSet::new();
        for (key, selected) in links {
            if !*selected {
                continue;
            }
            let (tx_sector, rx_sector) = &self.input.link_sectors[key];
            for sector in [tx_sector, rx_sector].into_iter().flatten() {
                if self.input.sector_class[sector].is_imaginary() {
                    continue;
                }
                let Some(node) = self.input.sector_node.get(sector) else {
                    continue;
                };
                for (other, other_node) in &self.input.sector_node {
                    if other_node == node {
                        active.insert(other.clone());
                    }
                }
            }
        }
        active
    }
}

/// The upgrade ladder for co-located sites: CN < DN < POP. A CN may be
/// upgraded to a DN or POP; DN/POP types never change.
pub fn colocated_upgrade_types(active: &[LocType]) -> (LocType, Vec<LocType>) {
    let mut max_type = LocType::Cn;
    for loc_type in active {
        match loc_type {
            LocType::Pop => max_type = LocType::Pop,
            LocType::Dn if max_type != LocType::Pop => max_type = LocType::Dn,
            _ => {}
        }
    }
    let valid = match max_type {
        LocType::Cn => vec![LocType::Cn, LocType::Dn, LocType::Pop],
        LocType::Dn => vec![LocType::Dn],
        LocType::Pop => vec![LocType::Pop],
        _ => vec![],
    };
    (max_type, valid)
}

/// Cancels flow cycles so the planned flow forms a DAG: repeatedly
/// finds a cycle among links with positive flow and subtracts its
/// minimum flow.
pub fn prune_loops(flows: &mut BTreeMap<LinkKey, f64>) {
    loop {
        let mut adjacency: BTreeMap<&str, Vec<&LinkKey>> = BTreeMap::new();
        for (key, &flow) in flows.iter() {
            if flow > EPSILON {
                adjacency.entry(key.0.as_str()).or_default().push(key);
            }
        }

        let cycle = find_cycle(&adjacency);
        let Some(cycle) = cycle else {
            break;
        };
        let reduction = cycle
            .iter()
            .map(|key| flows[*key])
            .fold(f64::INFINITY, f64::min);
        let cycle_keys: Vec<LinkKey> = cycle.iter().map(|key| (*key).clone()).collect();
        for key in cycle_keys {
            *flows.get_mut(&key).unwrap() -= reduction;
        }
    }
}

fn find_cycle<'a>(adjacency: &BTreeMap<&'a str, Vec<&'a LinkKey>>) -> Option<Vec<&'a LinkKey>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut color: BTreeMap<&str, Color> = adjacency.keys().map(|&k| (k, Color::White)).collect();

    fn visit<'a>(
        node: &'a str,
        adjacency: &BTreeMap<&'a str, Vec<&'a LinkKey>>,
        color: &mut BTreeMap<&'a str, Color>,
        stack: &mut Vec<&'a LinkKey>,
    ) -> Option<Vec<&'a LinkKey>> {
        color.insert(node, Color::Gray);
        for key in adjacency.get(node).into_iter().flatten() {
            let next = key.1.as_str();
            match color.get(next).copied().unwrap_or(Color::Black) {
                Color::Gray => {
                    // Back edge: the cycle is the stack suffix from
                    // `next` plus this edge.
                    let mut cycle = Vec::new();
                    let start = stack
                        .iter()
                        .position(|edge| edge.0 == next)
                        .unwrap_or(stack.len());
                    cycle.extend(stack[start..].iter().copied());
                    cycle.push(key);
                    return Some(cycle);
                }
                Color::White => {
                    stack.push(key);
                    if let Some(cycle) = visit(next, adjacency, color, stack) {
                        return Some(cycle);
                    }
                    stack.pop();
                }
                Color::Black => {}
            }
        }
        color.insert(node, Color::Black);
        None
    }

    let nodes: Vec<&str> = adjacency.keys().copied().collect();
    for node in nodes {
        if color[node] == Color::White {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(node, adjacency, &mut color, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{colocated_upgrade_types, prune_loops, LocType};
    use std::collections::BTreeMap;

    #[test]
    fn test_upgrade_ladder() {
        let (max_type, valid) = colocated_upgrade_types(&[LocType::Cn]);
        assert_eq!(max_type, LocType::Cn);
        assert_eq!(valid, vec![LocType::Cn, LocType::Dn, LocType::Pop]);

        let (max_type, valid) = colocated_upgrade_types(&[LocType::Cn, LocType::Dn]);
        assert_eq!(max_type, LocType::Dn);
        assert_eq!(valid, vec![LocType::Dn]);

        let (max_type, _) = colocated_upgrade_types(&[LocType::Dn, LocType::Pop]);
        assert_eq!(max_type, LocType::Pop);
    }

    #[test]
    fn test_prune_loops_cancels_cycle() {
        let mut flows: BTreeMap<(String, String), f64> = BTreeMap::new();
        flows.insert(("a".into(), "b".into()), 1.0);
        flows.insert(("b".into(), "c".into()), 0.7);
        flows.insert(("c".into(), "a".into()), 0.7);
        flows.insert(("b".into(), "d".into()), 0.3);
        prune_loops(&mut flows);
        assert!((flows[&("a".to_string(), "b".to_string())] - 0.3).abs() < 1e-9);
        assert!(flows[&("b".to_string(), "c".to_string())].abs() < 1e-9);
        assert!(flows[&("c".to_string(), "a".to_string())].abs() < 1e-9);
        assert!((flows[&("b".to_string(), "d".to_string())] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_prune_loops_keeps_dag() {
        let mut flows: BTreeMap<(String, String), f64> = BTreeMap::new();
        flows.insert(("a".into(), "b".into()), 1.0);
        flows.insert(("b".into(), "c".into()), 1.0);
        let before = flows.clone();
        prune_loops(&mut flows);
        assert_eq!(flows, before);
    }
}
