//! # Mesh Topology
//!
//! Data model of a fixed-wireless mesh plan: sites, devices, sectors,
//! links, demand sites and the topology that owns them, plus the
//! candidate graph builder that turns raw site inputs, elevation data
//! and device profiles into a fully attributed candidate network.
//!
//! Every entity carries a stable id derived from a cryptographic hash
//! of its key attributes, and all containers iterate in sorted id
//! order, which keeps downstream optimization deterministic.

mod building;
mod builder;
mod demand;
mod demand_model;
mod device;
mod error;
mod geodesy;
mod ids;
mod link;
mod sector;
mod sectors;
mod site;
mod topology;

pub use crate::{
    building::{detect_building_sites, BuildingOutline, DetectedLocation, SiteDetectionOptions},
    builder::{build_candidate_graph, BuilderOptions, LosModel, SiteInput},
    demand::DemandSite,
    demand_model::{attach_demand, DemandOptions},
    device::{Device, DeviceKind},
    error::TopoError,
    geodesy::{angle_delta, bearing_deg, haversine_m, LocalProjection},
    ids::stable_id,
    link::{Link, LinkKind},
    sector::{Sector, SectorKind},
    site::{Site, SiteKind},
    topology::Topology,
};

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by sites, sectors and links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    /// May be unselected or selected by the optimizer.
    Candidate,
    /// Selected by the optimizer.
    Proposed,
    /// Installed hardware; always part of the plan.
    Existing,
    /// Ruled out by the user.
    Unavailable,
    /// Ruled out by reachability analysis.
    Unreachable,
}

impl Status {
    pub fn is_active(self) -> bool {
        matches!(self, Status::Proposed | Status::Existing)
    }

    pub fn is_inactive(self) -> bool {
        matches!(self, Status::Unavailable | Status::Unreachable)
    }

    pub fn is_reachable(self) -> bool {
        !self.is_inactive()
    }
}

/// Alternating polarity assignment of a distribution site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarity {
    Unassigned,
    Odd,
    Even,
}
