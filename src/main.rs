mod config;
mod options;
mod report;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::PlanConfig;
use log::info;
use meshtopo::{attach_demand, build_candidate_graph};
use options::{Cli, Command};
use sightline::{
    CylindricalValidator, EllipsoidalValidator, LosConfig, LosValidator, ProbeSite,
};
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Plan { config, out } => plan(&config, &out),
        Command::Los {
            config,
            first,
            second,
        } => check_los(&config, first, second),
    }
}

fn plan(config_path: &Path, out_dir: &Path) -> Result<()> {
    let config = PlanConfig::load(config_path)?;
    let projection = config.projection();
    let surface = config.load_surface()?;
    let outlines = config.building_outlines(&projection);
    let builder_options = config.builder_options(&projection);

    let mut topology = match config.load_candidate_topology()? {
        Some(topology) => {
            info!("using precomputed candidate topology, skipping LOS");
            topology
        }
        None => {
            info!("building candidate topology");
            build_candidate_graph(
                &config.sites,
                &config.devices,
                &outlines,
                surface.as_ref(),
                &builder_options,
                &projection,
            )?
        }
    };

    attach_demand(&mut topology, &config.demand, &projection)?;

    info!("optimizing topology");
    let flow = netopt::optimize_topology(&mut topology, &config.optimizer)?;

    report::write_outputs(out_dir, &topology, &flow)?;
    println!(
        "plan written to {}; common bandwidth {:.3} Gbps over {} demand sites",
        out_dir.display(),
        flow.common_bandwidth_gbps,
        flow.connected_demand.len()
    );
    Ok(())
}

fn check_los(config_path: &Path, first: usize, second: usize) -> Result<()> {
    let config = PlanConfig::load(config_path)?;
    if first >= config.sites.len() || second >= config.sites.len() {
        bail!("site index out of range, the config has {} sites", config.sites.len());
    }
    let projection = config.projection();
    let surface = config.load_surface()?;

    let probe = |index: usize| -> Result<ProbeSite> {
        let site = &config.sites[index];
        let xy = projection.project(sightline::geo::geometry::Coord {
            x: site.longitude,
            y: site.latitude,
        });
        let altitude = site
            .altitude_m
            .or_else(|| {
                surface
                    .as_ref()
                    .map(|grid| f64::from(grid.value_clamped(xy)) + 1.5)
            })
            .context("site altitude unknown without a surface raster")?;
        let mut probe = ProbeSite::new(xy.x, xy.y, altitude);
        if let Some(building) = site.building_id {
            probe = probe.on_building(building);
        }
        Ok(probe)
    };
    let a = probe(first)?;
    let b = probe(second)?;

    let builder_options = config.builder_options(&projection);
    let los_config = LosConfig {
        max_distance_m: builder_options.max_los_distance_m,
        min_distance_m: builder_options.min_los_distance_m,
        max_elevation_angle_deg: builder_options.max_elevation_angle_deg,
        confidence_threshold: builder_options.confidence_threshold,
        exclusion_zones: builder_options.exclusion_zones.clone(),
    };
    let confidence = match builder_options.los_model {
        meshtopo::LosModel::Cylindrical { fresnel_radius_m } => {
            CylindricalValidator::new(surface.as_ref(), los_config, fresnel_radius_m)?
                .confidence(&a, &b)
        }
        meshtopo::LosModel::Ellipsoidal => {
            let frequency = config
                .devices
                .iter()
                .map(|device| device.radio.carrier_frequency_mhz)
                .fold(f64::INFINITY, f64::min);
            EllipsoidalValidator::new(surface.as_ref(), los_config, frequency)?
                .confidence(&a, &b)
        }
    };

    let accepted = confidence >= builder_options.confidence_threshold;
    println!(
        "confidence {confidence:.3} -> {}",
        if accepted { "accepted" } else { "rejected" }
    );
    Ok(())
}
