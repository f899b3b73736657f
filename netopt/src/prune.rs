//! Heuristic candidate-link pruning for the redundancy phase.
//!
//! Max-flow with node splitting yields site-disjoint paths; running it
//! between POPs and DNs, and between Delaunay-neighboring DNs, keeps
//! only the edges those paths use. Nearby DNs with disjoint paths
//! imply the same for far-apart ones, so the triangulation bounds the
//! quadratic pair sweep.

use crate::model::LinkKey;
use delaunator::{triangulate, Point};
use log::info;
use meshtopo::{SiteKind, Topology};
use petgraph::{algo::ford_fulkerson, graph::NodeIndex, visit::EdgeRef, Graph};
use std::collections::{BTreeMap, BTreeSet};

const EPSILON: f64 = 1e-9;

struct SplitGraph {
    graph: Graph<String, f64>,
    source: NodeIndex,
    node_in: BTreeMap<String, NodeIndex>,
    node_out: BTreeMap<String, NodeIndex>,
    /// Site pair of each real edge, by edge index position.
    edge_sites: Vec<Option<LinkKey>>,
}

fn build_split_graph(topology: &Topology, pop_source_capacity: f64) -> SplitGraph {
    let mut graph: Graph<String, f64> = Graph::new();
    let source = graph.add_node("SUPERSOURCE".into());
    let mut node_in = BTreeMap::new();
    let mut node_out = BTreeMap::new();
    let mut edge_sites: Vec<Option<LinkKey>> = Vec::new();

    for site in topology.sites.values() {
        if site.status.is_inactive() || !site.kind().is_distribution() {
            continue;
        }
        let id = site.id().to_owned();
        let n_in = graph.add_node(format!("{id}_in"));
        let n_out = graph.add_node(format!("{id}_out"));
        // The split edge bounds site-disjoint paths through this site.
        let capacity = if site.kind() == SiteKind::Pop {
            pop_source_capacity
        } else {
            1.0
        };
        graph.add_edge(n_in, n_out, capacity);
        edge_sites.push(None);
        if site.kind() == SiteKind::Pop {
            graph.add_edge(source, n_in, pop_source_capacity);
            edge_sites.push(None);
        }
        node_in.insert(id.clone(), n_in);
        node_out.insert(id, n_out);
    }

    for link in topology.links.values() {
        if link.status.is_inactive() || link.capacity_gbps <= 0.0 {
            continue;
        }
        let (Some(&tx_out), Some(&rx_in)) =
            (node_out.get(link.tx_site()), node_in.get(link.rx_site()))
        else {
            continue;
        };
        graph.add_edge(tx_out, rx_in, 1.0);
        edge_sites.push(Some(link.site_pair()));
    }

    SplitGraph {
        graph,
        source,
        node_in,
        node_out,
        edge_sites,
    }
}

fn collect_flow_edges(split: &SplitGraph, flows: &[f64], edges: &mut BTreeSet<LinkKey>) {
    for (index, flow) in flows.iter().enumerate() {
        if *flow > EPSILON {
            if let Some(Some(pair)) = split.edge_sites.get(index) {
                edges.insert(pair.clone());
            }
        }
    }
}

/// Sub-topology edges worth offering to the redundancy MILP.
///
/// `pop_source_capacity` site-disjoint paths are sought from each POP
/// to each DN and `dn_source_capacity` between DN pairs adjacent
/// within two hops of the Delaunay triangulation.
pub fn candidate_edges_for_redundancy(
    topology: &Topology,
    pop_source_capacity: f64,
    dn_source_capacity: f64,
) -> BTreeSet<LinkKey> {
    let mut edges: BTreeSet<LinkKey> = BTreeSet::new();

    let pops: Vec<String> = topology
        .sites
        .values()
        .filter(|site| site.kind() == SiteKind::Pop && site.status.is_active())
        .map(|site| site.id().to_owned())
        .collect();
    let dns: Vec<String> = topology
        .sites
        .values()
        .filter(|site| site.kind() == SiteKind::Dn && site.status.is_active())
        .map(|site| site.id().to_owned())
        .collect();

    if pop_source_capacity > 0.0 {
        let mut split = build_split_graph(topology, pop_source_capacity);
        for dn in &dns {
            let Some(&sink) = split.node_in.get(dn) else {
                continue;
            };
            for pop in &pops {
                // Feed only this POP from the supersource.
                for other in &pops {
                    let Some(&n_in) = split.node_in.get(other) else {
                        continue;
                    };
                    if let Some(edge) = split.graph.find_edge(split.source, n_in) {
                        split.graph[edge] = if other == pop {
                            pop_source_capacity
                        } else {
                            0.0
                        };
                    }
                }
                let (_, flows) = ford_fulkerson(&split.graph, split.source, sink);
                collect_flow_edges(&split, &flows, &mut edges);
            }
        }
    }

    if dn_source_capacity > 0.0 && dns.len() >= 2 {
        let pairs = delaunay_neighbor_pairs(topology, &dns);
        let mut split = build_split_graph(topology, pop_source_capacity.max(1.0));
        // Detach every POP feed; sources rotate among the DNs.
        for pop in &pops {
            if let Some(&n_in) = split.node_in.get(pop) {
                if let Some(edge) = split.graph.find_edge(split.source, n_in) {
                    split.graph[edge] = 0.0;
                }
            }
        }
        for (dn, other) in pairs {
            let (Some(&dn_in), Some(&dn_out), Some(&other_in)) = (
                split.node_in.get(&dn),
                split.node_out.get(&dn),
                split.node_in.get(&other),
            ) else {
                continue;
            };

            // The source DN emits dn_source_capacity and accepts no
            // incoming flow.
            let mut restore: Vec<(petgraph::graph::EdgeIndex, f64)> = Vec::new();
            let incoming: Vec<petgraph::graph::EdgeIndex> = split
                .graph
                .edges_directed(dn_in, petgraph::Direction::Incoming)
                .map(|edge| edge.id())
                .collect();
            for edge in incoming {
                restore.push((edge, split.graph[edge]));
                split.graph[edge] = 0.0;
            }
            let split_edge = split.graph.find_edge(dn_in, dn_out).unwrap();
            restore.push((split_edge, split.graph[split_edge]));
            split.graph[split_edge] = dn_source_capacity;
            let feed = split.graph.add_edge(split.source, dn_in, dn_source_capacity);
            split.edge_sites.push(None);

            let (_, flows) = ford_fulkerson(&split.graph, split.source, other_in);
            collect_flow_edges(&split, &flows, &mut edges);
            // Both directions exist for backhaul pairs.
            let reversed: Vec<LinkKey> = edges
                .iter()
                .filter(|(a, b)| topology.link_between(b, a).is_some())
                .map(|(a, b)| (b.clone(), a.clone()))
                .collect();
            edges.extend(reversed);

            split.graph.remove_edge(feed);
            split.edge_sites.pop();
            for (edge, capacity) in restore {
                split.graph[edge] = capacity;
            }
        }
    }

    info!("redundancy heuristic kept {} candidate edges", edges.len());
    edges
}

/// DN pairs within one or two hops of the Delaunay triangulation of
/// their geographic positions.
fn delaunay_neighbor_pairs(topology: &Topology, dns: &[String]) -> Vec<(String, String)> {
    let mut pairs: BTreeSet<(String, String)> = BTreeSet::new();
    if dns.len() == 2 {
        pairs.insert((dns[0].clone(), dns[1].clone()));
        return pairs.into_iter().collect();
    }

    let points: Vec<Point> = dns
        .iter()
        .map(|dn| {
            let lonlat = topology.sites[dn].lonlat();
            Point {
                x: lonlat.y,
                y: lonlat.x,
            }
        })
        .collect();
    let triangulation = triangulate(&points);

    let mut adjacency: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for triangle in triangulation.triangles.chunks(3) {
        for (a, b) in [
            (triangle[0], triangle[1]),
            (triangle[1], triangle[2]),
            (triangle[2], triangle[0]),
        ] {
            adjacency.entry(a).or_default().insert(b);
            adjacency.entry(b).or_default().insert(a);
        }
    }

    for (&node, neighbors) in &adjacency {
        let mut within: BTreeSet<usize> = neighbors.clone();
        for &neighbor in neighbors {
            if let Some(second) = adjacency.get(&neighbor) {
                within.extend(second.iter().copied());
            }
        }
        within.remove(&node);
        for other in within {
            if node < other {
                pairs.insert((dns[node].clone(), dns[other].clone()));
            }
        }
    }
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::candidate_edges_for_redundancy;
    use crate::testutil::{topology_from, ToySite};
    use meshtopo::{SiteKind, Status};

    /// Square of DNs fed by one POP, all backhaul links present.
    fn active_square() -> meshtopo::Topology {
        let mut topology = topology_from(
            &[
                ToySite { kind: SiteKind::Pop, x_m: 0.0, y_m: 0.0 },
                ToySite { kind: SiteKind::Dn, x_m: 300.0, y_m: 0.0 },
                ToySite { kind: SiteKind::Dn, x_m: 300.0, y_m: 300.0 },
                ToySite { kind: SiteKind::Dn, x_m: 0.0, y_m: 300.0 },
            ],
            &[
                (0, 1, 1.8),
                (1, 0, 1.8),
                (1, 2, 1.8),
                (2, 1, 1.8),
                (2, 3, 1.8),
                (3, 2, 1.8),
                (3, 0, 1.8),
                (0, 3, 1.8),
            ],
        );
        for site in topology.sites.values_mut() {
            site.status = Status::Proposed;
        }
        let ids: Vec<String> = topology.links.keys().cloned().collect();
        for id in ids {
            topology.links.get_mut(&id).unwrap().status = Status::Proposed;
        }
        topology
    }

    #[test]
    fn test_ring_edges_survive_pruning() {
        let topology = active_square();
        let edges = candidate_edges_for_redundancy(&topology, 4.0, 2.0);
        // The ring is the only way to reach disjoint paths; every ring
        // edge must survive in at least one direction.
        assert!(!edges.is_empty());
        for (a, b) in &edges {
            assert!(topology.link_between(a, b).is_some());
        }
    }

    #[test]
    fn test_zero_capacities_prune_everything() {
        let topology = active_square();
        let edges = candidate_edges_for_redundancy(&topology, 0.0, 0.0);
        assert!(edges.is_empty());
    }
}
