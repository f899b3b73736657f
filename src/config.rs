//! Typed planning configuration.
//!
//! One flat JSON document drives a run. Unknown fields are rejected
//! rather than silently defaulted, so typos surface before any work
//! begins.

use anyhow::{bail, Context, Result};
use demgrid::Grid;
use meshtopo::{
    BuilderOptions, BuildingOutline, DemandOptions, Device, LocalProjection, SiteDetectionOptions,
    SiteInput,
};
use netopt::PlannerParams;
use serde::Deserialize;
use sightline::geo::geometry::{Coord, LineString, Polygon};
use std::{fs::File, io::BufReader, path::{Path, PathBuf}};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanConfig {
    /// Closed boundary ring of the planning region, lon/lat degrees.
    pub boundary: Vec<[f64; 2]>,

    /// Surface raster (`.egr`), meters in the local frame.
    #[serde(default)]
    pub surface_grid: Option<PathBuf>,
    /// Terrain raster; combined with `height_grid` when no surface
    /// raster is given.
    #[serde(default)]
    pub terrain_grid: Option<PathBuf>,
    #[serde(default)]
    pub height_grid: Option<PathBuf>,

    pub sites: Vec<SiteInput>,
    pub devices: Vec<Device>,

    #[serde(default)]
    pub buildings: Vec<BuildingInput>,

    /// Exclusion polygons the sight line may not cross, lon/lat rings.
    #[serde(default)]
    pub exclusion_zones: Vec<Vec<[f64; 2]>>,

    /// Precomputed candidate topology; LOS computation is skipped when
    /// given.
    #[serde(default)]
    pub candidate_topology: Option<PathBuf>,

    #[serde(default)]
    pub line_of_sight: LineOfSightConfig,

    #[serde(default)]
    pub demand: DemandOptions,

    #[serde(default)]
    pub optimizer: PlannerParams,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildingInput {
    pub id: u32,
    /// Footprint ring, lon/lat degrees.
    pub ring: Vec<[f64; 2]>,
    #[serde(default)]
    pub height_m: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LineOfSightConfig {
    /// `cylindrical` or `ellipsoidal`.
    pub model: String,
    pub fresnel_radius_m: f64,
    pub confidence_threshold: f64,
    pub max_los_distance_m: f64,
    pub min_los_distance_m: f64,
    pub max_elevation_angle_deg: f64,
    pub minimum_mcs_of_backhaul_links: Option<u32>,
    pub minimum_mcs_of_access_links: Option<u32>,
    pub site_detection: SiteDetectionOptions,
    pub detect_dns: bool,
    pub detect_cns: bool,
    pub default_mounting_height_m: f64,
    /// LOS worker threads; omit to use every core.
    pub workers: Option<usize>,
}

impl Default for LineOfSightConfig {
    fn default() -> Self {
        let defaults = BuilderOptions::default();
        Self {
            model: "ellipsoidal".into(),
            fresnel_radius_m: 1.0,
            confidence_threshold: defaults.confidence_threshold,
            max_los_distance_m: defaults.max_los_distance_m,
            min_los_distance_m: defaults.min_los_distance_m,
            max_elevation_angle_deg: defaults.max_elevation_angle_deg,
            minimum_mcs_of_backhaul_links: None,
            minimum_mcs_of_access_links: None,
            site_detection: SiteDetectionOptions::default(),
            detect_dns: defaults.detect_dns,
            detect_cns: defaults.detect_cns,
            default_mounting_height_m: defaults.default_mounting_height_m,
            workers: None,
        }
    }
}

impl PlanConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open config file {}", path.display()))?;
        let config: PlanConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.boundary.len() < 3 {
            bail!("the boundary polygon needs at least three vertices");
        }
        if self.devices.is_empty() {
            bail!("no devices are configured");
        }
        if self.sites.is_empty() {
            bail!("no sites are configured");
        }
        if self.surface_grid.is_some() && (self.terrain_grid.is_some() || self.height_grid.is_some())
        {
            bail!("give either a surface raster or terrain plus height rasters, not both");
        }
        if self.candidate_topology.is_some()
            && !self.buildings.is_empty()
            && (self.line_of_sight.detect_dns || self.line_of_sight.detect_cns)
        {
            bail!("a candidate topology cannot be combined with automatic site detection");
        }
        match self.line_of_sight.model.as_str() {
            "cylindrical" | "ellipsoidal" => Ok(()),
            other => bail!("unknown LOS model '{other}'"),
        }
    }

    /// Loads the precomputed candidate topology, if configured.
    pub fn load_candidate_topology(&self) -> Result<Option<meshtopo::Topology>> {
        let Some(path) = &self.candidate_topology else {
            return Ok(None);
        };
        let file = File::open(path)
            .with_context(|| format!("cannot open candidate topology {}", path.display()))?;
        let mut topology: meshtopo::Topology = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid candidate topology {}", path.display()))?;
        topology.rebuild_index();
        Ok(Some(topology))
    }

    /// Projection centered on the boundary ring.
    pub fn projection(&self) -> LocalProjection {
        let n = self.boundary.len() as f64;
        let origin = Coord {
            x: self.boundary.iter().map(|p| p[0]).sum::<f64>() / n,
            y: self.boundary.iter().map(|p| p[1]).sum::<f64>() / n,
        };
        LocalProjection::new(origin)
    }

    /// Loads the surface raster: the surface grid directly, or terrain
    /// plus height composed sample-wise.
    pub fn load_surface(&self) -> Result<Option<Grid>> {
        if let Some(path) = &self.surface_grid {
            let grid = Grid::memmap(path)
                .with_context(|| format!("cannot read surface raster {}", path.display()))?;
            return Ok(Some(grid));
        }
        match (&self.terrain_grid, &self.height_grid) {
            (Some(terrain_path), Some(height_path)) => {
                let terrain = Grid::load(terrain_path).with_context(|| {
                    format!("cannot read terrain raster {}", terrain_path.display())
                })?;
                let heights = Grid::load(height_path).with_context(|| {
                    format!("cannot read height raster {}", height_path.display())
                })?;
                Ok(Some(terrain.add(&heights)?))
            }
            (Some(terrain_path), None) => {
                let terrain = Grid::load(terrain_path).with_context(|| {
                    format!("cannot read terrain raster {}", terrain_path.display())
                })?;
                Ok(Some(terrain))
            }
            _ => Ok(None),
        }
    }

    pub fn building_outlines(&self, projection: &LocalProjection) -> Vec<BuildingOutline> {
        self.buildings
            .iter()
            .map(|building| BuildingOutline {
                id: building.id,
                polygon: project_ring(&building.ring, projection),
                height_m: building.height_m,
            })
            .collect()
    }

    pub fn builder_options(&self, projection: &LocalProjection) -> BuilderOptions {
        let los = &self.line_of_sight;
        BuilderOptions {
            los_model: match los.model.as_str() {
                "cylindrical" => meshtopo::LosModel::Cylindrical {
                    fresnel_radius_m: los.fresnel_radius_m,
                },
                _ => meshtopo::LosModel::Ellipsoidal,
            },
            confidence_threshold: los.confidence_threshold,
            max_los_distance_m: los.max_los_distance_m,
            min_los_distance_m: los.min_los_distance_m,
            max_elevation_angle_deg: los.max_elevation_angle_deg,
            minimum_mcs_of_backhaul_links: los.minimum_mcs_of_backhaul_links,
            minimum_mcs_of_access_links: los.minimum_mcs_of_access_links,
            exclusion_zones: self
                .exclusion_zones
                .iter()
                .map(|ring| project_ring(ring, projection))
                .collect(),
            site_detection: los.site_detection.clone(),
            detect_dns: los.detect_dns,
            detect_cns: los.detect_cns,
            default_mounting_height_m: los.default_mounting_height_m,
            workers: los.workers,
        }
    }
}

fn project_ring(ring: &[[f64; 2]], projection: &LocalProjection) -> Polygon<f64> {
    let coords: Vec<Coord<f64>> = ring
        .iter()
        .map(|point| projection.project(Coord { x: point[0], y: point[1] }))
        .collect();
    Polygon::new(LineString::from(coords), vec![])
}

#[cfg(test)]
mod tests {
    use super::PlanConfig;

    fn minimal_json() -> String {
        r#"{
            "boundary": [[-71.01, 44.0], [-70.99, 44.0], [-71.0, 44.01]],
            "sites": [
                {"longitude": -71.0, "latitude": 44.0, "altitude_m": 10.0,
                 "kind": "Pop", "device_sku": "dn1"}
            ],
            "devices": [
                {"sku": "dn1", "kind": "Dn", "node_capex": 1500.0,
                 "number_of_nodes_per_site": 4, "radio": {}}
            ]
        }"#
        .to_owned()
    }

    #[test]
    fn test_minimal_config_parses() {
        let config: PlanConfig = serde_json::from_str(&minimal_json()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.line_of_sight.model, "ellipsoidal");
    }

    #[test]
    fn test_unknown_field_is_an_error() {
        let json = minimal_json().replacen("\"boundary\"", "\"boundry_typo\": 1, \"boundary\"", 1);
        assert!(serde_json::from_str::<PlanConfig>(&json).is_err());
    }

    #[test]
    fn test_availability_knobs_are_recognized() {
        let json = minimal_json().replacen(
            "\"sites\"",
            "\"optimizer\": {\"availability\": {\"availability_sim_time\": 250.0, \
             \"availability_seed\": 7}}, \"sites\"",
            1,
        );
        let config: PlanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.optimizer.availability.availability_sim_time, 250.0);
        assert_eq!(config.optimizer.availability.availability_seed, 7);
    }

    #[test]
    fn test_contradictory_rasters_rejected() {
        let json = minimal_json().replacen(
            "\"sites\"",
            "\"surface_grid\": \"a.egr\", \"terrain_grid\": \"b.egr\", \"sites\"",
            1,
        );
        let config: PlanConfig = serde_json::from_str(&json).unwrap();
        assert!(config.validate().is_err());
    }
}
