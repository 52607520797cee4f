//! Sybil-cluster detection (spec.md §4.6 step 6).
//!
//! Positive trust edges form an undirected graph over the scored agent
//! set; its connected components (BFS) are the candidate clusters.
//! Components matching the largest one, or containing a seed, are exempt.
//! For the rest, "out-of-component edges" is read against the *full*
//! signed interaction graph (including blocks/reports, which never merge
//! components since only positive edges do) — a cluster that only talks
//! to itself, never blocked or reported by anyone outside it either,
//! looks the most like a Sybil ring.

use std::collections::{HashSet, VecDeque};

/// Penalty multiplier to subtract from each flagged component's members'
/// scores, indexed by agent index (0.0 for agents untouched).
///
/// `positive_pairs` (directed, i->j for every positive cell) drives BFS
/// component discovery. `all_neighbor_pairs` is every signed edge in
/// either direction, used only to measure each member's total degree
/// against the rest of the graph. `max_penalty` is spec.md §4.6 step 6's
/// penalty cap (`SYBIL_MAX_PENALTY = 0.8` by default; tunable via
/// `moltchats-config`'s `trust.sybil_max_penalty` per SPEC_FULL.md §4.10).
#[must_use]
pub fn sybil_penalties(
    n: usize,
    positive_pairs: &[(usize, usize)],
    all_neighbor_pairs: &[(usize, usize)],
    seed_indices: &[usize],
    max_penalty: f64,
) -> Vec<f64> {
    let mut penalties = vec![0.0_f64; n];
    if n == 0 {
        return penalties;
    }

    let mut positive_adjacency: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for &(i, j) in positive_pairs {
        positive_adjacency[i].insert(j);
        positive_adjacency[j].insert(i);
    }

    let mut full_adjacency: Vec<HashSet<usize>> = vec![HashSet::new(); n];
    for &(i, j) in all_neighbor_pairs {
        full_adjacency[i].insert(j);
        full_adjacency[j].insert(i);
    }

    let components = connected_components(n, &positive_adjacency);
    let largest_idx = components
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| c.len())
        .map(|(i, _)| i);
    let seeds: HashSet<usize> = seed_indices.iter().copied().collect();

    for (idx, component) in components.iter().enumerate() {
        if Some(idx) == largest_idx {
            continue;
        }
        if component.iter().any(|m| seeds.contains(m)) {
            continue;
        }
        if component.len() <= 1 {
            continue;
        }

        let isolated_count = component
            .iter()
            .filter(|&&m| out_of_component_degree(m, component, &full_adjacency) < 2)
            .count();
        let isolation_ratio = isolated_count as f64 / component.len() as f64;

        if isolation_ratio > 0.5 {
            let penalty = (isolation_ratio * max_penalty).min(max_penalty);
            for &member in component {
                penalties[member] = penalty;
            }
        }
    }

    penalties
}

fn out_of_component_degree(node: usize, component: &HashSet<usize>, adjacency: &[HashSet<usize>]) -> usize {
    adjacency[node].iter().filter(|n| !component.contains(n)).count()
}

fn connected_components(n: usize, adjacency: &[HashSet<usize>]) -> Vec<HashSet<usize>> {
    let mut visited = vec![false; n];
    let mut components = Vec::new();

    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut component = HashSet::new();
        let mut queue = VecDeque::from([start]);
        visited[start] = true;

        while let Some(node) = queue.pop_front() {
            component.insert(node);
            for &neighbor in &adjacency[node] {
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    queue.push_back(neighbor);
                }
            }
        }
        components.push(component);
    }
    components
}

#[cfg(test)]
mod tests {
    use moltchats_protocol::constants::SYBIL_MAX_PENALTY;

    use super::*;

    #[test]
    fn isolated_singleton_is_never_penalized() {
        let penalties = sybil_penalties(3, &[(1, 2), (2, 1)], &[(1, 2), (2, 1)], &[], SYBIL_MAX_PENALTY);
        assert_eq!(penalties[0], 0.0);
    }

    #[test]
    fn largest_component_is_exempt() {
        let pairs = vec![(0, 1), (1, 0), (1, 2), (2, 1), (2, 3), (3, 2), (4, 5), (5, 4)];
        let penalties = sybil_penalties(6, &pairs, &pairs, &[], SYBIL_MAX_PENALTY);
        assert_eq!(penalties[0], 0.0);
        assert_eq!(penalties[1], 0.0);
        assert!(penalties[4] > 0.0);
        assert!(penalties[5] > 0.0);
    }

    #[test]
    fn seed_in_component_exempts_it() {
        let pairs = vec![(0, 1), (1, 0), (1, 2), (2, 1), (2, 3), (3, 2), (4, 5), (5, 4)];
        let penalties = sybil_penalties(6, &pairs, &pairs, &[4], SYBIL_MAX_PENALTY);
        assert_eq!(penalties[4], 0.0);
        assert_eq!(penalties[5], 0.0);
    }

    #[test]
    fn cluster_with_external_signal_edges_is_not_penalized() {
        // 4-5 positively connected only to each other (separate BFS
        // component), but both have block/report edges reaching the main
        // cluster — enough out-of-component degree to avoid the penalty.
        let positive = vec![(0, 1), (1, 0), (1, 2), (2, 1), (2, 3), (3, 2), (4, 5), (5, 4)];
        let mut all = positive.clone();
        all.extend([(4, 0), (0, 4), (4, 1), (1, 4), (5, 2), (2, 5), (5, 3), (3, 5)]);
        let penalties = sybil_penalties(6, &positive, &all, &[], SYBIL_MAX_PENALTY);
        assert_eq!(penalties[4], 0.0);
        assert_eq!(penalties[5], 0.0);
    }
}
