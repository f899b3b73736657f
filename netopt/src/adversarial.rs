//! Outage-impact ranking for the legacy redundancy phase.

use crate::{
    model::LinkKey,
    setup::{LocType, ModelInput, SUPERSOURCE},
};
use log::info;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Demand sinks reachable from the supersource when `removed` edges
/// (both directions) are taken out of the active graph.
fn reachable_demands(
    input: &ModelInput,
    active_sites: &BTreeSet<String>,
    removed: Option<&(String, String)>,
) -> BTreeSet<String> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for key in &input.links {
        if input.capacity[key] <= 0.0 || input.inactive_links.contains(key) {
            continue;
        }
        let tx_real = !input.loc_type[&key.0].is_imaginary();
        let rx_real = !input.loc_type[&key.1].is_imaginary();
        if tx_real && !active_sites.contains(&key.0) {
            continue;
        }
        if rx_real && !active_sites.contains(&key.1) {
            continue;
        }
        if let Some((a, b)) = removed {
            if (&key.0 == a && &key.1 == b) || (&key.0 == b && &key.1 == a) {
                continue;
            }
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

/// Ranks active backhaul links by the number of demand sinks their
/// outage disconnects and returns the top share as directed pairs.
///
/// With an unbounded budget this marks every cut link whose removal
/// strands some sink.
pub fn find_adversarial_links(
    input: &ModelInput,
    active_sites: &BTreeSet<String>,
    redundancy_ratio: f64,
) -> BTreeSet<LinkKey> {
    if redundancy_ratio <= 0.0 {
        return BTreeSet::new();
    }

    let baseline = reachable_demands(input, active_sites, None);

    // Undirected backhaul edges of the active plan.
    let mut edges: BTreeSet<(String, String)> = BTreeSet::new();
    for key in &input.links {
        if !input.is_wireless(key) || input.capacity[key] <= 0.0 {
            continue;
        }
        if !(input.loc_type[&key.0].is_distribution() && input.loc_type[&key.1].is_distribution())
        {
            continue;
        }
        if !(active_sites.contains(&key.0) && active_sites.contains(&key.1)) {
            continue;
        }
        let edge = if key.0 <= key.1 {
            (key.0.clone(), key.1.clone())
        } else {
            (key.1.clone(), key.0.clone())
        };
        edges.insert(edge);
    }

    let mut impact: Vec<((String, String), usize)> = edges
        .into_iter()
        .map(|edge| {
            let after = reachable_demands(input, active_sites, Some(&edge));
            let lost = baseline.difference(&after).count();
            (edge, lost)
        })
        .collect();
    impact.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let take = (redundancy_ratio * impact.len() as f64).ceil() as usize;
    let mut adversarial = BTreeSet::new();
    for (edge, lost) in impact.into_iter().take(take) {
        if lost == 0 {
            break;
        }
        adversarial.insert((edge.0.clone(), edge.1.clone()));
        adversarial.insert((edge.1, edge.0));
    }
    info!("{} adversarial directed links identified", adversarial.len());
    adversarial
}

#[cfg(test)]
mod tests {
    use super::find_adversarial_links;
    use crate::params::PlannerParams;
    use crate::setup::ModelInput;
    use crate::testutil::toy_topology;
    use std::collections::BTreeSet;

    #[test]
    fn test_bridge_link_is_adversarial() {
        let topology = toy_topology();
        let input = ModelInput::new(&topology, &PlannerParams::default());
        let active: BTreeSet<String> = input
            .locations
            .iter()
            .filter(|id| !input.loc_type[*id].is_imaginary())
            .cloned()
            .collect();
        // The POP—DN backhaul is the only path to the far CN: its
        // outage strands a sink, so full ratio must flag it.
        let adversarial = find_adversarial_links(&input, &active, 1.0);
        assert_eq!(adversarial.len(), 2);
    }

    #[test]
    fn test_zero_ratio_flags_nothing() {
        let topology = toy_topology();
        let input = ModelInput::new(&topology, &PlannerParams::default());
        let active: BTreeSet<String> = input
            .locations
            .iter()
            .filter(|id| !input.loc_type[*id].is_imaginary())
            .cloned()
            .collect();
        assert!(find_adversarial_links(&input, &active, 0.0).is_empty());
    }
}
