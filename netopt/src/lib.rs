//! # Network Optimization
//!
//! `netopt` turns a candidate mesh topology into a deployment plan
//! through a sequence of mixed integer linear programs: POP proposal,
//! minimum-cost site selection with coverage relaxation, redundancy
//! (legacy coverage maximization or min-cost disjoint-path
//! reinforcement), interference-aware link/channel/MCS selection, and
//! a closing flow analysis.
//!
//! Problems are built into a deterministic in-crate representation
//! ([`problem::Problem`]); the [`solver`] adapter is the only code
//! touching the MILP engine.

pub mod adversarial;
pub mod connected;
pub mod flowphase;
pub mod interference;
pub mod model;
pub mod params;
pub mod pipeline;
pub mod problem;
pub mod prune;
pub mod redundancy;
pub mod setup;
pub mod sitephase;
pub mod solution;
pub mod solver;

mod error;
#[cfg(test)]
mod testutil;

pub use crate::{
    error::OptError,
    flowphase::FlowReport,
    params::{AvailabilityParams, PhaseLimits, PlannerParams, RedundancyLevel, TopologyRouting},
    pipeline::optimize_topology,
    solution::PhaseSolution,
};
