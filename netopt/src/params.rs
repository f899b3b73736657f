//! Optimizer configuration surface.

use crate::solver::SolveOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedundancyLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyRouting {
    ShortestPath,
    McsCostPath,
    DpaPath,
}

/// Failure-simulation knobs of the availability report.
///
/// Recognized configuration surface; the simulation itself runs in the
/// reporting layer, outside the optimization pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AvailabilityParams {
    /// Unitless span of the continuous-time failure simulation.
    pub availability_sim_time: f64,
    /// Seed of the failure/repair process.
    pub availability_seed: u64,
    /// Wall-clock budget of the simulation, minutes.
    pub availability_max_time_minutes: f64,
}

impl Default for AvailabilityParams {
    fn default() -> Self {
        Self {
            availability_sim_time: 100.0,
            availability_seed: 0,
            availability_max_time_minutes: 60.0,
        }
    }
}

/// Per-phase solver knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseLimits {
    pub rel_gap: f64,
    pub max_time_minutes: f64,
}

impl Default for PhaseLimits {
    fn default() -> Self {
        Self {
            rel_gap: 0.05,
            max_time_minutes: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerParams {
    pub budget: f64,
    /// Gbps each POP can draw from the backbone.
    pub pop_capacity_gbps: f64,
    pub oversubscription: f64,
    pub pop_site_capex: f64,
    pub dn_site_capex: f64,
    pub cn_site_capex: f64,
    pub number_of_channels: u8,
    pub maximize_common_bandwidth: bool,
    pub always_active_pops: bool,
    pub ignore_polarities: bool,
    pub number_of_extra_pops: u32,
    /// P2MP limit on DN↔DN links per sector.
    pub dn_dn_sector_limit: u32,
    /// P2MP limit on all links per sector.
    pub dn_total_sector_limit: u32,
    pub maximum_number_hops: usize,
    /// Minimum angle between links of different sectors on one site.
    pub diff_sector_angle_limit_deg: f64,
    pub near_far_length_ratio: f64,
    pub near_far_angle_limit_deg: f64,
    pub enable_legacy_redundancy_method: bool,
    pub redundancy_level: RedundancyLevel,
    /// Share of backhaul links ranked adversarial in the legacy method.
    pub backhaul_link_redundancy_ratio: f64,
    pub topology_routing: TopologyRouting,
    pub availability: AvailabilityParams,
    pub num_threads: Option<u32>,
    /// Write one LP file per phase into this directory.
    pub debug_dir: Option<PathBuf>,
    pub pop_proposal: PhaseLimits,
    pub demand_site: PhaseLimits,
    pub min_cost: PhaseLimits,
    pub max_coverage: PhaseLimits,
    pub redundancy: PhaseLimits,
    pub interference: PhaseLimits,
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            budget: 300_000.0,
            pop_capacity_gbps: 10.0,
            oversubscription: 1.0,
            pop_site_capex: 1500.0,
            dn_site_capex: 1500.0,
            cn_site_capex: 250.0,
            number_of_channels: 1,
            maximize_common_bandwidth: false,
            always_active_pops: false,
            ignore_polarities: false,
            number_of_extra_pops: 0,
            dn_dn_sector_limit: 2,
            dn_total_sector_limit: 15,
            maximum_number_hops: 15,
            diff_sector_angle_limit_deg: 25.0,
            near_far_length_ratio: 3.0,
            near_far_angle_limit_deg: 45.0,
            enable_legacy_redundancy_method: false,
            redundancy_level: RedundancyLevel::Medium,
            backhaul_link_redundancy_ratio: 0.2,
            topology_routing: TopologyRouting::ShortestPath,
            availability: AvailabilityParams::default(),
            num_threads: None,
            debug_dir: None,
            pop_proposal: PhaseLimits::default(),
            demand_site: PhaseLimits::default(),
            min_cost: PhaseLimits::default(),
            max_coverage: PhaseLimits::default(),
            redundancy: PhaseLimits::default(),
            interference: PhaseLimits::default(),
        }
    }
}

impl PlannerParams {
    pub fn solve_options(&self, limits: PhaseLimits) -> SolveOptions {
        SolveOptions {
            rel_gap: Some(limits.rel_gap).filter(|gap| *gap > 0.0),
            max_time_minutes: Some(limits.max_time_minutes),
            threads: self.num_threads,
        }
    }
}
