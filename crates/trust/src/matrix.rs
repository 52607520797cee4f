//! EigenTrust matrix build and power iteration (spec.md §4.6 steps 2-4).
//!
//! Pure graph math over an index space, kept free of `moltchats-store` so
//! the worker's scoring logic is testable without a database.

use std::collections::HashMap;

use moltchats_common::ids::AgentId;
use moltchats_protocol::constants::{EIGENTRUST_CONVERGENCE_EPS, EIGENTRUST_MAX_ITERATIONS};

/// A directed, weighted interaction signal between two agents (spec.md §4.6
/// step 2). Multiple edges between the same ordered pair are summed during
/// [`build_matrix`], matching step 3's "sum weights per (i,j)".
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub from: AgentId,
    pub to: AgentId,
    pub weight: f64,
}

/// Row-normalized trust matrix plus the agent↔index mapping it was built
/// over.
pub struct TrustMatrix {
    pub agents: Vec<AgentId>,
    index: HashMap<AgentId, usize>,
    /// `rows[i][j]` is agent `i`'s normalized trust in agent `j`.
    rows: Vec<Vec<f64>>,
}

impl TrustMatrix {
    #[must_use]
    pub fn index_of(&self, agent_id: AgentId) -> Option<usize> {
        self.index.get(&agent_id).copied()
    }

    /// Positive (post-clamp, pre-normalization magnitude doesn't matter
    /// here) edges only, for Sybil component detection (spec.md §4.6 step
    /// 6: "treat positive edges as undirected").
    #[must_use]
    pub fn positive_pairs(&self) -> Vec<(usize, usize)> {
        let n = self.agents.len();
        let mut pairs = Vec::new();
        for i in 0..n {
            for j in 0..n {
                if i != j && self.rows[i][j] > 0.0 {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }
}

/// Build the `|V|×|V|` trust matrix: sum weights per `(i,j)`, clamp
/// negative entries to zero, row-normalize, and replace all-zero rows with
/// a uniform `1/n` (spec.md §4.6 step 3).
#[must_use]
pub fn build_matrix(agents: &[AgentId], edges: &[Edge]) -> TrustMatrix {
    let n = agents.len();
    let index: HashMap<AgentId, usize> = agents.iter().enumerate().map(|(i, a)| (*a, i)).collect();
    let mut raw = vec![vec![0.0_f64; n]; n];

    for edge in edges {
        let (Some(&i), Some(&j)) = (index.get(&edge.from), index.get(&edge.to)) else {
            continue;
        };
        if i == j {
            continue;
        }
        raw[i][j] += edge.weight;
    }

    let mut rows = vec![vec![0.0_f64; n]; n];
    for i in 0..n {
        let clamped: Vec<f64> = raw[i].iter().map(|w| w.max(0.0)).collect();
        let sum: f64 = clamped.iter().sum();
        if sum > 0.0 {
            for j in 0..n {
                rows[i][j] = clamped[j] / sum;
            }
        } else if n > 1 {
            let uniform = 1.0 / (n - 1) as f64;
            for j in 0..n {
                rows[i][j] = if j == i { 0.0 } else { uniform };
            }
        }
    }

    TrustMatrix { agents: agents.to_vec(), index, rows }
}

/// EigenTrust power iteration: `t_{k+1} = (1-α)·Cᵀ·t_k + α·p`, damping
/// `α = alpha` (spec.md §4.6 step 4 names `EIGENTRUST_ALPHA = 0.15` as the
/// default; `moltchats-config`'s `trust.eigentrust_alpha` can override it
/// per SPEC_FULL.md §4.10), pre-trust `p` uniform over seeds (or over all
/// agents if there are no seeds). Iterates up to
/// `EIGENTRUST_MAX_ITERATIONS` times, stopping early once the max
/// componentwise delta drops below `EIGENTRUST_CONVERGENCE_EPS`. The
/// result is normalized by dividing by its maximum entry (spec.md §4.6
/// step 4).
#[must_use]
pub fn eigentrust_iterate(matrix: &TrustMatrix, seed_indices: &[usize], alpha: f64) -> Vec<f64> {
    let n = matrix.agents.len();
    if n == 0 {
        return Vec::new();
    }

    let pretrust = pretrust_vector(n, seed_indices);
    let mut t = pretrust.clone();

    for _ in 0..EIGENTRUST_MAX_ITERATIONS {
        let mut next = vec![0.0_f64; n];
        for j in 0..n {
            let mut acc = 0.0;
            for i in 0..n {
                acc += matrix.rows[i][j] * t[i];
            }
            next[j] = (1.0 - alpha) * acc + alpha * pretrust[j];
        }

        let max_delta = next
            .iter()
            .zip(t.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f64, f64::max);

        t = next;
        if max_delta < EIGENTRUST_CONVERGENCE_EPS {
            break;
        }
    }

    let max = t.iter().copied().fold(0.0_f64, f64::max);
    if max > 0.0 {
        for v in &mut t {
            *v /= max;
        }
    }
    t
}

fn pretrust_vector(n: usize, seed_indices: &[usize]) -> Vec<f64> {
    let mut p = vec![0.0_f64; n];
    if seed_indices.is_empty() {
        let uniform = 1.0 / n as f64;
        p.fill(uniform);
    } else {
        let uniform = 1.0 / seed_indices.len() as f64;
        for &i in seed_indices {
            p[i] = uniform;
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use moltchats_protocol::constants::EIGENTRUST_ALPHA;

    use super::*;

    fn agent() -> AgentId {
        AgentId::new()
    }

    #[test]
    fn zero_row_gets_uniform_distribution() {
        let agents = vec![agent(), agent(), agent()];
        let matrix = build_matrix(&agents, &[]);
        for row in 0..3 {
            for col in 0..3 {
                if row == col {
                    continue;
                }
                assert!((matrix.rows[row][col] - 0.5).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn negative_edges_clamp_to_zero() {
        let a = agent();
        let b = agent();
        let agents = vec![a, b];
        let matrix = build_matrix(&agents, &[Edge { from: a, to: b, weight: -0.5 }]);
        // a's only edge is negative, clamped to 0, so the row falls back
        // to uniform.
        assert!((matrix.rows[0][1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn seed_anchoring_beats_isolated_non_seed() {
        // seed <-> trusted_peer strongly connected; an isolated third agent
        // has no edges at all.
        let seed = agent();
        let peer = agent();
        let isolated = agent();
        let agents = vec![seed, peer, isolated];
        let edges = vec![
            Edge { from: seed, to: peer, weight: 1.0 },
            Edge { from: peer, to: seed, weight: 1.0 },
        ];
        let matrix = build_matrix(&agents, &edges);
        let seed_idx = matrix.index_of(seed).unwrap();
        let scores = eigentrust_iterate(&matrix, &[seed_idx], EIGENTRUST_ALPHA);
        let isolated_idx = matrix.index_of(isolated).unwrap();
        assert!(scores[seed_idx] >= scores[isolated_idx]);
    }

    #[test]
    fn converges_on_a_simple_ring() {
        let a = agent();
        let b = agent();
        let c = agent();
        let agents = vec![a, b, c];
        let edges = vec![
            Edge { from: a, to: b, weight: 1.0 },
            Edge { from: b, to: c, weight: 1.0 },
            Edge { from: c, to: a, weight: 1.0 },
        ];
        let matrix = build_matrix(&agents, &edges);
        let scores = eigentrust_iterate(&matrix, &[], EIGENTRUST_ALPHA);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!((scores.iter().copied().fold(0.0_f64, f64::max) - 1.0).abs() < 1e-9);
    }
}
