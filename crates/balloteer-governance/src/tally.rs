//! Weighted ballot casting and outcome resolution.
//!
//! A proposal keeps two maps: `voter_map` (voter -> current option) and
//! `votes` (option -> total weight). Casting always moves the voter's whole
//! weight, so a recast replaces the earlier ballot instead of adding to it.
//! A weight change moves the voter's live ballots to the new weight through
//! [`reweight_ballots`], so `votes` always sums to the current weights of the
//! voters in `voter_map` while a proposal is open.
//!
//! Results only ever leave this module as a [`TallySnapshot`], which carries
//! per-option totals but never the voter map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use balloteer_types::{
    ActorId, CloseTrigger, CommunityId, OptionTally, Outcome, Proposal, ProposalId, TallySnapshot,
    Voter,
};

use crate::error::GovernanceError;
use crate::lifecycle::is_open_for_voting;
use crate::store::EntityStore;

/// What a successful cast changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastReceipt {
    /// The option the voter held before, when this was a recast.
    pub previous: Option<usize>,
    /// The option the voter holds now.
    pub option: usize,
    /// The weight that was moved.
    pub weight: u64,
}

/// Cast or change `voter`'s ballot on a stored proposal.
///
/// Returns the receipt together with a copy of the updated proposal for
/// write-through.
pub fn cast_vote(
    store: &mut EntityStore,
    community_id: CommunityId,
    proposal_id: ProposalId,
    voter_id: ActorId,
    option: usize,
    now: DateTime<Utc>,
) -> Result<(CastReceipt, Proposal), GovernanceError> {
    let community = store.community_mut(community_id)?;
    let voter = community
        .voters
        .get(&voter_id)
        .ok_or(GovernanceError::NotEligible { voter_id })?;
    let proposal = community
        .proposals
        .iter_mut()
        .find(|p| p.id == proposal_id)
        .ok_or(GovernanceError::ProposalNotFound {
            community_id,
            proposal_id,
        })?;
    let receipt = cast_or_change_vote(proposal, voter, option, now)?;
    Ok((receipt, proposal.clone()))
}

/// Record `voter`'s ballot for `option`, replacing any earlier one.
///
/// The old option loses the voter's current weight, clamped at zero, then
/// the new option gains it. Live ballots always carry the current weight
/// (see [`reweight_ballots`]).
pub fn cast_or_change_vote(
    proposal: &mut Proposal,
    voter: &Voter,
    option: usize,
    now: DateTime<Utc>,
) -> Result<CastReceipt, GovernanceError> {
    let weight = voter
        .eligible_weight()
        .ok_or(GovernanceError::NotEligible { voter_id: voter.id })?;
    if !is_open_for_voting(proposal, now) {
        return Err(GovernanceError::VotingClosed {
            proposal_id: proposal.id,
        });
    }
    let count = proposal.options.len();
    if option >= count {
        return Err(GovernanceError::InvalidOption {
            index: option,
            count,
        });
    }

    let previous = proposal.voter_map.insert(voter.id, option);
    if let Some(old) = previous {
        let slot = proposal.votes.entry(old).or_insert(0);
        *slot = slot.saturating_sub(weight);
    }
    let slot = proposal.votes.entry(option).or_insert(0);
    *slot = slot.saturating_add(weight);

    debug!(
        proposal_id = %proposal.id,
        voter_id = %voter.id,
        option,
        previous = ?previous,
        weight,
        "Ballot recorded"
    );
    Ok(CastReceipt {
        previous,
        option,
        weight,
    })
}

/// Move `voter_id`'s live ballots from `previous` to `weight`.
///
/// Only proposals still open for voting change; closed tallies are frozen.
/// Returns copies of the changed proposals for write-through.
pub fn reweight_ballots(
    store: &mut EntityStore,
    community_id: CommunityId,
    voter_id: ActorId,
    previous: u64,
    weight: u64,
    now: DateTime<Utc>,
) -> Result<Vec<Proposal>, GovernanceError> {
    let community = store.community_mut(community_id)?;
    let mut changed = Vec::new();
    for proposal in &mut community.proposals {
        if !is_open_for_voting(proposal, now) {
            continue;
        }
        let Some(option) = proposal.voter_map.get(&voter_id).copied() else {
            continue;
        };
        let slot = proposal.votes.entry(option).or_insert(0);
        *slot = slot.saturating_sub(previous).saturating_add(weight);
        debug!(
            proposal_id = %proposal.id,
            voter_id = %voter_id,
            option,
            previous,
            weight,
            "Live ballot re-weighted"
        );
        changed.push(proposal.clone());
    }
    Ok(changed)
}

/// Sum of all cast weight.
pub fn total_weight(proposal: &Proposal) -> u64 {
    proposal
        .votes
        .values()
        .fold(0_u64, |acc, w| acc.saturating_add(*w))
}

/// Whether `total` satisfies an optional quorum.
pub const fn quorum_reached(quorum_weight: Option<u64>, total: u64) -> bool {
    match quorum_weight {
        Some(q) => total >= q,
        None => true,
    }
}

/// Rounded share of `weight` in `total`, 0 when `total` is 0.
pub fn percent(weight: u64, total: u64) -> u8 {
    let w = u128::from(weight);
    let t = u128::from(total);
    let rounded = w
        .checked_mul(100)
        .and_then(|x| x.checked_add(t / 2))
        .and_then(|x| x.checked_div(t))
        .unwrap_or(0);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

/// Per-option weights, with absent keys treated as zero.
fn option_weights(proposal: &Proposal) -> Vec<u64> {
    (0..proposal.options.len())
        .map(|i| proposal.votes.get(&i).copied().unwrap_or(0))
        .collect()
}

/// Classify the tally as no-votes, a single winner, or a tie.
pub fn resolve_outcome(proposal: &Proposal) -> Outcome {
    if total_weight(proposal) == 0 {
        return Outcome::NoVotes;
    }
    let weights = option_weights(proposal);
    let max = weights.iter().copied().max().unwrap_or(0);
    let tied: Vec<usize> = weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w == max)
        .map(|(i, _)| i)
        .collect();
    match tied.as_slice() {
        [index] => Outcome::Winner { index: *index },
        _ => Outcome::Tie { indices: tied },
    }
}

/// Build the anonymous, aggregated view of a proposal.
pub fn snapshot(
    community_id: CommunityId,
    proposal: &Proposal,
    closed_by: Option<CloseTrigger>,
) -> TallySnapshot {
    let total = total_weight(proposal);
    let options = proposal
        .options
        .iter()
        .zip(option_weights(proposal))
        .enumerate()
        .map(|(index, (label, weight))| OptionTally {
            index,
            label: label.clone(),
            weight,
            percent: percent(weight, total),
        })
        .collect();

    TallySnapshot {
        community_id,
        proposal_id: proposal.id,
        title: proposal.title.clone(),
        options,
        total_weight: total,
        ballots: proposal.voter_map.len(),
        outcome: resolve_outcome(proposal),
        quorum_weight: proposal.quorum_weight,
        quorum_reached: quorum_reached(proposal.quorum_weight, total),
        status: proposal.status,
        ends_at: proposal.ends_at,
        closed_by,
    }
}

// ---------------------------------------------------------------------------
// Consistency check
// ---------------------------------------------------------------------------

/// A way in which a tally disagrees with its ballots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyAnomaly {
    /// A voter holds an option index the proposal does not have.
    BallotOutOfRange {
        /// The voter.
        voter_id: ActorId,
        /// The stored index.
        index: usize,
    },
    /// The weight map has a key outside the option list.
    WeightOutOfRange {
        /// The stored index.
        index: usize,
    },
    /// An option carries weight although nobody holds it.
    OrphanWeight {
        /// The option.
        index: usize,
        /// The weight found on it.
        weight: u64,
    },
}

/// Result of [`verify_tally`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TallyCheck {
    /// Every structural invariant holds.
    Consistent,
    /// One or more invariants are broken.
    Anomalies(Vec<TallyAnomaly>),
}

/// Check the structural invariants linking `votes` to `voter_map`.
///
/// Per-voter weights are not compared, since the voter records are not part
/// of the proposal. Only index validity and held-vs-weighted options are
/// checked. Run at boot over every loaded proposal.
pub fn verify_tally(proposal: &Proposal) -> TallyCheck {
    let count = proposal.options.len();
    let mut anomalies = Vec::new();
    let mut holders: BTreeMap<usize, usize> = BTreeMap::new();

    for (voter_id, index) in &proposal.voter_map {
        if *index >= count {
            anomalies.push(TallyAnomaly::BallotOutOfRange {
                voter_id: *voter_id,
                index: *index,
            });
        }
        let held = holders.entry(*index).or_insert(0);
        *held = held.saturating_add(1);
    }

    for (index, weight) in &proposal.votes {
        if *index >= count {
            anomalies.push(TallyAnomaly::WeightOutOfRange { index: *index });
        } else if *weight > 0 && !holders.contains_key(index) {
            anomalies.push(TallyAnomaly::OrphanWeight {
                index: *index,
                weight: *weight,
            });
        }
    }

    if anomalies.is_empty() {
        TallyCheck::Consistent
    } else {
        warn!(
            proposal_id = %proposal.id,
            anomalies = anomalies.len(),
            "Tally inconsistency detected"
        );
        TallyCheck::Anomalies(anomalies)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::Duration;

    use balloteer_types::ProposalStatus;

    use super::*;

    fn proposal(options: &[&str]) -> Proposal {
        Proposal {
            id: ProposalId::new(1),
            title: String::from("Fund the hackathon?"),
            options: options.iter().map(|o| (*o).to_owned()).collect(),
            votes: BTreeMap::new(),
            voter_map: BTreeMap::new(),
            status: ProposalStatus::Open,
            quorum_weight: None,
            ends_at: None,
            created_by: None,
            attachment: None,
        }
    }

    fn voter(id: i64, weight: u64) -> Voter {
        let mut v = Voter::pending(ActorId::new(id), format!("v{id}"));
        v.approved = true;
        v.weight = Some(weight);
        v.processed = true;
        v
    }

    #[test]
    fn recast_replaces_rather_than_accumulates() {
        let mut p = proposal(&["Yes", "No"]);
        let v = voter(1, 4);
        let now = Utc::now();
        cast_or_change_vote(&mut p, &v, 0, now).unwrap();
        let receipt = cast_or_change_vote(&mut p, &v, 1, now).unwrap();

        assert_eq!(receipt.previous, Some(0));
        assert_eq!(p.votes.get(&0).copied(), Some(0));
        assert_eq!(p.votes.get(&1).copied(), Some(4));
        assert_eq!(total_weight(&p), 4);
        assert_eq!(p.voter_map.len(), 1);
    }

    #[test]
    fn recast_after_weight_increase_clamps_at_zero() {
        let mut p = proposal(&["Yes", "No"]);
        let now = Utc::now();
        cast_or_change_vote(&mut p, &voter(1, 2), 0, now).unwrap();
        cast_or_change_vote(&mut p, &voter(1, 5), 1, now).unwrap();
        assert_eq!(p.votes.get(&0).copied(), Some(0));
        assert_eq!(p.votes.get(&1).copied(), Some(5));
    }

    #[test]
    fn unapproved_voter_is_refused() {
        let mut p = proposal(&["Yes", "No"]);
        let v = Voter::pending(ActorId::new(9), String::from("x"));
        let result = cast_or_change_vote(&mut p, &v, 0, Utc::now());
        assert!(matches!(result, Err(GovernanceError::NotEligible { .. })));
        assert!(p.voter_map.is_empty());
    }

    #[test]
    fn cast_after_deadline_is_refused_even_while_status_is_open() {
        let now = Utc::now();
        let mut p = proposal(&["Yes", "No"]);
        p.ends_at = Some(now - Duration::seconds(1));
        let result = cast_or_change_vote(&mut p, &voter(1, 1), 0, now);
        assert!(matches!(result, Err(GovernanceError::VotingClosed { .. })));
        assert_eq!(p.status, ProposalStatus::Open);
    }

    #[test]
    fn cast_at_exact_deadline_is_refused() {
        let now = Utc::now();
        let mut p = proposal(&["Yes", "No"]);
        p.ends_at = Some(now);
        let result = cast_or_change_vote(&mut p, &voter(1, 1), 0, now);
        assert!(matches!(result, Err(GovernanceError::VotingClosed { .. })));
    }

    #[test]
    fn out_of_range_option_is_refused() {
        let mut p = proposal(&["Yes", "No"]);
        let result = cast_or_change_vote(&mut p, &voter(1, 1), 2, Utc::now());
        assert_eq!(
            result,
            Err(GovernanceError::InvalidOption { index: 2, count: 2 })
        );
    }

    #[test]
    fn equal_weights_tie() {
        let mut p = proposal(&["A", "B"]);
        p.votes = BTreeMap::from([(0, 5), (1, 5)]);
        assert_eq!(
            resolve_outcome(&p),
            Outcome::Tie {
                indices: vec![0, 1]
            }
        );
    }

    #[test]
    fn clear_majority_wins_with_rounded_percent() {
        let mut p = proposal(&["A", "B"]);
        p.votes = BTreeMap::from([(0, 7), (1, 3)]);
        p.voter_map = BTreeMap::from([(ActorId::new(1), 0), (ActorId::new(2), 1)]);
        let snap = snapshot(CommunityId::new(-1), &p, None);
        assert_eq!(snap.outcome, Outcome::Winner { index: 0 });
        assert_eq!(snap.options[0].percent, 70);
        assert_eq!(snap.options[1].percent, 30);
        assert_eq!(snap.ballots, 2);
    }

    #[test]
    fn no_votes_yields_zero_percent_everywhere() {
        let p = proposal(&["A", "B", "C"]);
        let snap = snapshot(CommunityId::new(-1), &p, None);
        assert_eq!(snap.outcome, Outcome::NoVotes);
        assert!(snap.options.iter().all(|o| o.percent == 0));
        assert_eq!(snap.total_weight, 0);
    }

    #[test]
    fn zero_weight_entries_count_as_no_votes() {
        let mut p = proposal(&["A", "B"]);
        p.votes = BTreeMap::from([(0, 0)]);
        assert_eq!(resolve_outcome(&p), Outcome::NoVotes);
    }

    #[test]
    fn three_way_tie_excludes_lower_option() {
        let mut p = proposal(&["A", "B", "C", "D"]);
        p.votes = BTreeMap::from([(0, 2), (1, 2), (2, 1), (3, 2)]);
        assert_eq!(
            resolve_outcome(&p),
            Outcome::Tie {
                indices: vec![0, 1, 3]
            }
        );
    }

    #[test]
    fn quorum_is_advisory() {
        let mut p = proposal(&["A", "B"]);
        p.quorum_weight = Some(10);
        p.votes = BTreeMap::from([(0, 8)]);
        let snap = snapshot(CommunityId::new(-1), &p, None);
        assert!(!snap.quorum_reached);
        assert_eq!(snap.outcome, Outcome::Winner { index: 0 });

        assert!(quorum_reached(Some(8), 8));
        assert!(quorum_reached(None, 0));
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn snapshot_never_exposes_voters() {
        let mut p = proposal(&["A", "B"]);
        cast_or_change_vote(&mut p, &voter(42, 3), 1, Utc::now()).unwrap();
        let json = serde_json::to_string(&snapshot(CommunityId::new(-1), &p, None)).unwrap();
        assert!(!json.contains("voter_map"));
        assert!(!json.contains("42"));
    }

    #[test]
    fn verify_flags_orphan_and_out_of_range_entries() {
        let mut p = proposal(&["A", "B"]);
        p.votes = BTreeMap::from([(1, 4), (5, 1)]);
        p.voter_map = BTreeMap::from([(ActorId::new(1), 7)]);
        let found = match verify_tally(&p) {
            TallyCheck::Anomalies(found) => found,
            TallyCheck::Consistent => Vec::new(),
        };
        assert_eq!(found.len(), 3);
        assert!(found.contains(&TallyAnomaly::OrphanWeight {
            index: 1,
            weight: 4
        }));
        assert!(found.contains(&TallyAnomaly::WeightOutOfRange { index: 5 }));
        assert!(found.contains(&TallyAnomaly::BallotOutOfRange {
            voter_id: ActorId::new(1),
            index: 7
        }));
    }

    #[test]
    fn lowered_weight_moves_live_ballot_before_recast() {
        let group = CommunityId::new(-100);
        let x = ActorId::new(7);
        let now = Utc::now();
        let mut store = EntityStore::new();
        store.create_or_get_community(group, "dao");
        store.register_voter_if_absent(group, x, "x").unwrap();
        store
            .change_voter_weight(group, x, 5, String::from("founder"), now)
            .unwrap();
        store.insert_proposal(group, proposal(&["A", "B"])).unwrap();
        let mut closed = proposal(&["A", "B"]);
        closed.id = ProposalId::new(2);
        store.insert_proposal(group, closed).unwrap();

        cast_vote(&mut store, group, ProposalId::new(1), x, 0, now).unwrap();
        cast_vote(&mut store, group, ProposalId::new(2), x, 0, now).unwrap();
        store
            .proposal_mut(group, ProposalId::new(2))
            .unwrap()
            .status = ProposalStatus::Closed;

        store
            .change_voter_weight(group, x, 1, String::from("diluted"), now)
            .unwrap();
        let changed = reweight_ballots(&mut store, group, x, 5, 1, now).unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].votes.get(&0).copied(), Some(1));

        let (_, p) = cast_vote(&mut store, group, ProposalId::new(1), x, 1, now).unwrap();
        assert_eq!(p.votes.get(&0).copied(), Some(0));
        assert_eq!(p.votes.get(&1).copied(), Some(1));
        assert_eq!(total_weight(&p), 1);
        assert_eq!(resolve_outcome(&p), Outcome::Winner { index: 1 });

        let frozen = store.proposal(group, ProposalId::new(2)).unwrap();
        assert_eq!(frozen.votes.get(&0).copied(), Some(5));
    }

    #[test]
    fn reweight_ignores_voters_without_ballots() {
        let group = CommunityId::new(-100);
        let now = Utc::now();
        let mut store = EntityStore::new();
        store.create_or_get_community(group, "dao");
        store.insert_proposal(group, proposal(&["A", "B"])).unwrap();
        let changed = reweight_ballots(&mut store, group, ActorId::new(9), 2, 4, now).unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn verify_accepts_cast_ballots() {
        let mut p = proposal(&["A", "B"]);
        let now = Utc::now();
        cast_or_change_vote(&mut p, &voter(1, 3), 0, now).unwrap();
        cast_or_change_vote(&mut p, &voter(2, 1), 1, now).unwrap();
        cast_or_change_vote(&mut p, &voter(1, 3), 1, now).unwrap();
        assert_eq!(verify_tally(&p), TallyCheck::Consistent);
    }
}
