//! Plan outputs: topology JSON and per-site / per-link CSV reports.

use anyhow::{Context, Result};
use meshtopo::Topology;
use netopt::FlowReport;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

pub fn write_outputs(
    out_dir: &Path,
    topology: &Topology,
    flow: &FlowReport,
) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("cannot create output directory {}", out_dir.display()))?;
    write_topology_json(&out_dir.join("topology.json"), topology)?;
    write_site_report(&out_dir.join("sites.csv"), topology, flow)?;
    write_link_report(&out_dir.join("links.csv"), topology, flow)?;
    Ok(())
}

fn write_topology_json(path: &Path, topology: &Topology) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), topology)
        .with_context(|| format!("cannot serialize topology to {}", path.display()))?;
    Ok(())
}

fn write_site_report(path: &Path, topology: &Topology, flow: &FlowReport) -> Result<()> {
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
    );
    writeln!(
        out,
        "site_id,name,type,status,polarity,device_sku,longitude,latitude,altitude_m,\
         incoming_gbps,outgoing_gbps"
    )?;
    for site in topology.sites.values() {
        let incoming: f64 = flow
            .flows
            .iter()
            .filter(|((_, rx), _)| rx.as_str() == site.id())
            .map(|(_, gbps)| gbps)
            .sum();
        let outgoing: f64 = flow
            .flows
            .iter()
            .filter(|((tx, _), _)| tx.as_str() == site.id())
            .map(|(_, gbps)| gbps)
            .sum();
        writeln!(
            out,
            "{},{},{},{:?},{:?},{},{},{},{},{incoming},{outgoing}",
            site.id(),
            site.name,
            site.kind().as_str(),
            site.status,
            site.polarity,
            site.device_sku(),
            site.lonlat().x,
            site.lonlat().y,
            site.altitude_m(),
        )?;
    }
    Ok(())
}

fn write_link_report(path: &Path, topology: &Topology, flow: &FlowReport) -> Result<()> {
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
    );
    writeln!(
        out,
        "link_id,tx_site,rx_site,kind,status,distance_m,mcs,capacity_gbps,\
         rsl_dbm,tdm,flow_gbps,utilization,redundant"
    )?;
    for link in topology.links.values() {
        let key = link.site_pair();
        let planned = flow.flows.get(&key).copied().unwrap_or(0.0);
        let utilization = flow.utilization.get(&key).copied().unwrap_or(0.0);
        writeln!(
            out,
            "{},{},{},{:?},{:?},{:.1},{},{},{},{},{planned},{utilization},{}",
            link.id(),
            link.tx_site(),
            link.rx_site(),
            link.kind,
            link.status,
            link.distance_m,
            link.mcs,
            link.capacity_gbps,
            link.rsl_dbm,
            link.tdm,
            link.is_redundant,
        )?;
    }
    Ok(())
}
