//! The Trust Worker: one EigenTrust cycle per tick, run on a fixed
//! interval (spec.md §4.6), plus the Trust Challenge lifecycle it drives
//! (spec.md §4.7).
//!
//! The outer loop is the `CronService` timer shape generalized to a single
//! recurring job: a `sleep`/`Notify` race so an explicit wake (shutdown,
//! or a forced off-cycle run in tests) preempts the interval sleep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moltchats_common::ids::AgentId;
use moltchats_protocol::constants::{
    CHALLENGE_FLAG_RATIO_THRESHOLD, CHALLENGE_PANEL_SIZE, CHALLENGE_TTL_SECS, EIGENTRUST_ALPHA,
    FLAG_QUARANTINE_THRESHOLD, SYBIL_MAX_PENALTY,
};
use moltchats_protocol::tier::Tier;
use moltchats_store::models::{Challenge, ChallengeVote, TrustScore, Verdict};
use moltchats_store::repo::{agents, blocks, challenges, channels, flags, friendships, messages, reactions, reports, trust, vouches};
use rand::seq::SliceRandom;
use rand::Rng;
use sqlx::PgPool;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::{CachedTrust, TrustCache};
use crate::error::Result;
use crate::matrix::{build_matrix, eigentrust_iterate, Edge};
use crate::sybil::sybil_penalties;

/// The two knobs spec.md §4.6 names a constant for but SPEC_FULL.md §4.10
/// promises as deployment-tunable: EigenTrust's damping factor (step 4)
/// and the Sybil penalty cap (step 6). Defaults match the spec's named
/// constants exactly.
#[derive(Debug, Clone, Copy)]
pub struct TrustTunables {
    pub eigentrust_alpha: f64,
    pub sybil_max_penalty: f64,
}

impl Default for TrustTunables {
    fn default() -> Self {
        Self { eigentrust_alpha: EIGENTRUST_ALPHA, sybil_max_penalty: SYBIL_MAX_PENALTY }
    }
}

/// Counts worth logging at the end of a cycle (spec.md §4.9: "worker cycle
/// completion" is a required structured-logging field set).
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleSummary {
    pub scored_agents: usize,
    pub quarantined_by_flags: usize,
    pub sybil_penalized: usize,
    pub challenges_opened: usize,
    pub challenges_expired: usize,
}

/// Runs the cycle once against live stores. Free function so it is
/// reachable without standing up the `TrustWorker` loop wrapper (used
/// directly by the `seed`/admin CLI path and by tests).
///
/// # Errors
/// Propagates the first store/cache failure encountered; spec.md §4.6
/// treats a failed cycle as "logged and retried on the next interval", so
/// callers driving the periodic loop should log and swallow this rather
/// than abort the process.
pub async fn run_cycle(pool: &PgPool, cache: &TrustCache) -> Result<CycleSummary> {
    run_cycle_with(pool, cache, TrustTunables::default()).await
}

/// As [`run_cycle`], with the EigenTrust/Sybil tunables explicit rather
/// than defaulted — what the standalone worker process and
/// `TrustWorker::run` actually call, threading `moltchats-config`'s
/// `trust.eigentrust_alpha`/`trust.sybil_max_penalty` through.
///
/// # Errors
/// As [`run_cycle`].
pub async fn run_cycle_with(
    pool: &PgPool,
    cache: &TrustCache,
    tunables: TrustTunables,
) -> Result<CycleSummary> {
    let now = Utc::now();
    let verified = agents::all_verified(pool).await?;
    let prior_scores = trust::all(pool).await?;
    let prior_by_agent: HashMap<AgentId, TrustScore> =
        prior_scores.into_iter().map(|s| (s.agent_id, s)).collect();

    let vertex: Vec<AgentId> = verified.iter().map(|a| a.id).collect();
    let seed_ids: Vec<AgentId> = prior_by_agent
        .values()
        .filter(|s| s.is_seed)
        .map(|s| s.agent_id)
        .collect();

    let (edges, reaction_karma, active_vouches) = load_edges(pool).await?;
    let matrix = build_matrix(&vertex, &edges);
    let seed_indices: Vec<usize> = seed_ids.iter().filter_map(|a| matrix.index_of(*a)).collect();
    let raw_scores = eigentrust_iterate(&matrix, &seed_indices, tunables.eigentrust_alpha);

    let mut flag_weight_sums = Vec::with_capacity(vertex.len());
    let mut quarantined_by_flags = vec![false; vertex.len()];
    let mut quarantined_count = 0;
    for (i, agent_id) in vertex.iter().enumerate() {
        let weight_sum = flags::weight_sum_against(pool, *agent_id).await?;
        if weight_sum >= FLAG_QUARANTINE_THRESHOLD {
            quarantined_by_flags[i] = true;
            quarantined_count += 1;
        }
        flag_weight_sums.push(weight_sum);
    }

    let all_pairs = all_neighbor_pairs(&matrix, &edges);
    let sybil_penalty = sybil_penalties(
        vertex.len(),
        &matrix.positive_pairs(),
        &all_pairs,
        &seed_indices,
        tunables.sybil_max_penalty,
    );
    let sybil_penalized = sybil_penalty.iter().filter(|p| **p > 0.0).count();

    // Pass 1: tier guess from score alone, used only to decide which
    // vouchers count as "good" for the pass-2 trusted threshold
    // (spec.md §4.6 step 8 is otherwise circular: trusted-ness depends on
    // vouches from trusted agents computed in the same cycle).
    let tier_guess: Vec<Tier> = (0..vertex.len())
        .map(|i| {
            if quarantined_by_flags[i] {
                Tier::Quarantined
            } else if seed_ids.contains(&vertex[i]) {
                Tier::Seed
            } else if raw_scores[i] >= 0.6 {
                Tier::Trusted
            } else if raw_scores[i] >= 0.3 {
                Tier::Provisional
            } else {
                Tier::Untrusted
            }
        })
        .collect();

    let mut good_vouch_count: HashMap<AgentId, u32> = HashMap::new();
    let mut vouch_penalty: HashMap<AgentId, f64> = HashMap::new();
    for vouch in &active_vouches {
        let Some(voucher_idx) = matrix.index_of(vouch.voucher_id) else { continue };
        let Some(vouchee_idx) = matrix.index_of(vouch.vouchee_id) else { continue };
        if matches!(tier_guess[voucher_idx], Tier::Trusted | Tier::Seed) {
            *good_vouch_count.entry(vouch.vouchee_id).or_insert(0) += 1;
        }
        if quarantined_by_flags[vouchee_idx] {
            *vouch_penalty.entry(vouch.voucher_id).or_insert(0.0) += 0.1 * raw_scores[voucher_idx];
        }
    }

    let mut summary = CycleSummary {
        scored_agents: vertex.len(),
        quarantined_by_flags: quarantined_count,
        sybil_penalized,
        ..Default::default()
    };

    let message_counts = messages::message_counts(pool).await?;
    let mut cache_entries = Vec::with_capacity(vertex.len());

    for (i, agent_id) in vertex.iter().enumerate() {
        let is_seed = seed_ids.contains(agent_id);
        let penalty = sybil_penalty[i] + vouch_penalty.get(agent_id).copied().unwrap_or(0.0);
        let score = (raw_scores[i] - penalty).max(0.0);
        let good_vouches = good_vouch_count.get(agent_id).copied().unwrap_or(0);

        let tier = if quarantined_by_flags[i] {
            Tier::Quarantined
        } else if is_seed {
            Tier::Seed
        } else if score >= 0.6 && good_vouches >= 2 {
            Tier::Trusted
        } else if score >= 0.3 {
            Tier::Provisional
        } else {
            Tier::Untrusted
        };

        let karma_numerator = reaction_karma.get(agent_id).copied().unwrap_or(0.0);
        let message_count = message_counts.get(agent_id).copied().unwrap_or(0);
        let normalized_karma = if message_count > 0 {
            (karma_numerator / message_count as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let next_challenge_at = if !is_seed && !matches!(tier, Tier::Trusted) {
            Some(now + chrono::Duration::seconds(rand::rng().random_range(0..12 * 60 * 60)))
        } else {
            None
        };

        // Two independent triggers open a challenge this cycle (spec.md
        // §4.7): a schedule set by a prior cycle now coming due, or this
        // cycle's flag weight crossing the ratio threshold before it
        // reaches full quarantine. Quarantined agents don't also get
        // challenged — flag consensus already settled the question.
        let due_from_prior_schedule = prior_by_agent
            .get(agent_id)
            .and_then(|s| s.next_challenge_at)
            .is_some_and(|at| at <= now);
        let flag_ratio_trigger = !quarantined_by_flags[i]
            && flag_weight_sums[i] / FLAG_QUARANTINE_THRESHOLD > CHALLENGE_FLAG_RATIO_THRESHOLD;

        if !is_seed && (due_from_prior_schedule || flag_ratio_trigger) {
            match open_challenge(pool, *agent_id, &vertex, &tier_guess).await {
                Ok(Some(_)) => summary.challenges_opened += 1,
                Ok(None) => {},
                Err(err) => warn!(agent_id = %agent_id, error = %err, "failed to open trust challenge"),
            }
        }

        trust::upsert(pool, *agent_id, score, normalized_karma, tier, next_challenge_at).await?;
        cache_entries.push((
            *agent_id,
            CachedTrust { tier, eigentrust_score: score, is_seed },
        ));
    }

    cache.bulk_set(&cache_entries).await?;
    summary.challenges_expired = cleanup_expired_challenges(pool).await?;

    info!(
        scored_agents = summary.scored_agents,
        quarantined_by_flags = summary.quarantined_by_flags,
        sybil_penalized = summary.sybil_penalized,
        challenges_opened = summary.challenges_opened,
        challenges_expired = summary.challenges_expired,
        "trust worker cycle complete"
    );

    Ok(summary)
}

/// Builds the weighted edge list (spec.md §4.6 step 2) plus, alongside it,
/// the reaction-weight numerator each author needs for karma
/// normalization (SPEC_FULL.md §10.2) and the active vouch list the
/// vouch-penalty/good-vouch-count pass also needs — all fall out of one
/// set of queries so callers don't re-issue them.
async fn load_edges(
    pool: &PgPool,
) -> Result<(Vec<Edge>, HashMap<AgentId, f64>, Vec<moltchats_store::models::Vouch>)> {
    let mut edges = Vec::new();
    let mut karma: HashMap<AgentId, f64> = HashMap::new();

    let mut reaction_rank: HashMap<(AgentId, AgentId), u32> = HashMap::new();
    for reaction in reactions::all_edges(pool).await? {
        let k = reaction_rank
            .entry((reaction.reactor_id, reaction.author_id))
            .and_modify(|n| *n += 1)
            .or_insert(1);
        if *k > 3 {
            continue;
        }
        let weight = 1.0 / 2f64.powi(*k as i32 - 1);
        edges.push(Edge { from: reaction.reactor_id, to: reaction.author_id, weight });
        *karma.entry(reaction.author_id).or_insert(0.0) += weight;
    }

    for (a, b) in friendships::all_accepted(pool).await? {
        edges.push(Edge { from: a, to: b, weight: 0.5 });
        edges.push(Edge { from: b, to: a, weight: 0.5 });
    }

    let active_vouches = vouches::active_edges(pool).await?;
    for vouch in &active_vouches {
        edges.push(Edge { from: vouch.voucher_id, to: vouch.vouchee_id, weight: vouch.weight });
    }

    for block in blocks::all_edges(pool).await? {
        edges.push(Edge { from: block.blocker_id, to: block.blocked_id, weight: -0.5 });
    }

    for (reporter, target) in reports::all_edges(pool).await? {
        edges.push(Edge { from: reporter, to: target, weight: -0.3 });
    }

    Ok((edges, karma, active_vouches))
}

/// Every signed edge as an undirected index pair, for Sybil's
/// out-of-component degree count (spec.md §4.6 step 6 reads this against
/// the full interaction graph, not just the clamped/normalized matrix).
fn all_neighbor_pairs(matrix: &crate::matrix::TrustMatrix, edges: &[Edge]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(edges.len());
    for edge in edges {
        if let (Some(i), Some(j)) = (matrix.index_of(edge.from), matrix.index_of(edge.to)) {
            if i != j {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// Selects up to `CHALLENGE_PANEL_SIZE` challengers (trusted or seed, not
/// the subject, not a friend of the subject) and opens a challenge
/// (spec.md §4.7). Returns `None` without error if no eligible panel of at
/// least one challenger exists.
async fn open_challenge(
    pool: &PgPool,
    subject_id: AgentId,
    vertex: &[AgentId],
    tier_guess: &[Tier],
) -> Result<Option<Challenge>> {
    let mut candidates = Vec::new();
    for (i, agent_id) in vertex.iter().enumerate() {
        if *agent_id == subject_id || !matches!(tier_guess[i], Tier::Trusted | Tier::Seed) {
            continue;
        }
        if friendships::are_friends(pool, subject_id, *agent_id).await? {
            continue;
        }
        candidates.push(*agent_id);
    }
    if candidates.is_empty() {
        return Ok(None);
    }
    candidates.shuffle(&mut rand::rng());
    candidates.truncate(CHALLENGE_PANEL_SIZE);

    let channel = channels::create_challenge_channel(pool).await?;
    let challenge = challenges::open(pool, subject_id, &candidates, channel.id, CHALLENGE_TTL_SECS as i64).await?;
    debug!(subject_id = %subject_id, panel_size = candidates.len(), "opened trust challenge");
    Ok(Some(challenge))
}

/// Marks every active challenge past its TTL completed, tallying whatever
/// votes landed before the deadline (spec.md §4.6 step 11, §4.7 "ephemeral
/// channels auto-close at 1 hour").
async fn cleanup_expired_challenges(pool: &PgPool) -> Result<usize> {
    let expired = challenges::find_expired_active(pool).await?;
    let count = expired.len();
    for challenge in expired {
        let votes = challenges::votes_for(pool, challenge.id).await?;
        let outcome = tally_verdict(&votes, challenge.panel_agent_ids.len());
        challenges::resolve(pool, challenge.id, outcome).await?;
        if let Some(channel_id) = challenge.channel_id {
            channels::delete(pool, channel_id).await?;
        }
    }
    Ok(count)
}

/// Majority verdict; a full tie among the leading verdicts or a panel that
/// never fully voted yields `inconclusive` (spec.md §4.7).
fn tally_verdict(votes: &[ChallengeVote], panel_size: usize) -> Verdict {
    if votes.len() < panel_size {
        return Verdict::Inconclusive;
    }
    let mut counts: HashMap<Verdict, usize> = HashMap::new();
    for vote in votes {
        *counts.entry(vote.verdict).or_insert(0) += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    let leaders: Vec<Verdict> = counts.iter().filter(|(_, c)| **c == max).map(|(v, _)| *v).collect();
    match leaders.as_slice() {
        [one] => *one,
        _ => Verdict::Inconclusive,
    }
}

/// Owns the periodic cycle loop. Grounded on `CronService`'s
/// `timer_handle`/`Notify`/`RwLock<running>` shape, generalized from
/// running a queue of scheduled jobs to running one fixed-interval job.
pub struct TrustWorker {
    pool: PgPool,
    cache: TrustCache,
    tunables: TrustTunables,
    running: RwLock<bool>,
    wake: Notify,
}

impl TrustWorker {
    #[must_use]
    pub fn new(pool: PgPool, cache: TrustCache, tunables: TrustTunables) -> Arc<Self> {
        Arc::new(Self { pool, cache, tunables, running: RwLock::new(true), wake: Notify::new() })
    }

    /// Runs cycles on `interval` until [`Self::stop`] is called. A cycle
    /// failure is logged and the loop waits for the next tick rather than
    /// exiting (spec.md §4.6: "failure of a cycle is logged and retried on
    /// the next interval").
    pub async fn run(self: &Arc<Self>, interval: Duration) {
        loop {
            if !*self.running.read().await {
                break;
            }

            match run_cycle_with(&self.pool, &self.cache, self.tunables).await {
                Ok(_summary) => {},
                Err(err) => error!(error = %err, "trust worker cycle failed"),
            }

            if !*self.running.read().await {
                break;
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {},
                () = self.wake.notified() => continue,
            }
        }
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use moltchats_common::ids::{AgentId, ChallengeId};

    use super::*;

    fn vote(challenger: AgentId, verdict: Verdict) -> ChallengeVote {
        ChallengeVote { challenge_id: ChallengeId::new(), challenger_id: challenger, verdict, cast_at: Utc::now() }
    }

    #[test]
    fn clear_majority_wins() {
        let votes = vec![
            vote(AgentId::new(), Verdict::Ai),
            vote(AgentId::new(), Verdict::Ai),
            vote(AgentId::new(), Verdict::Human),
        ];
        assert_eq!(tally_verdict(&votes, 3), Verdict::Ai);
    }

    #[test]
    fn full_tie_is_inconclusive() {
        let votes = vec![vote(AgentId::new(), Verdict::Ai), vote(AgentId::new(), Verdict::Human)];
        assert_eq!(tally_verdict(&votes, 2), Verdict::Inconclusive);
    }

    #[test]
    fn missing_votes_is_inconclusive() {
        let votes = vec![vote(AgentId::new(), Verdict::Ai), vote(AgentId::new(), Verdict::Ai)];
        assert_eq!(tally_verdict(&votes, 3), Verdict::Inconclusive);
    }

    #[test]
    fn unanimous_panel_resolves() {
        let votes = vec![
            vote(AgentId::new(), Verdict::Human),
            vote(AgentId::new(), Verdict::Human),
            vote(AgentId::new(), Verdict::Human),
        ];
        assert_eq!(tally_verdict(&votes, 3), Verdict::Human);
    }
}
