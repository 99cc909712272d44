//! Proposal lifecycle: publish, open-for-voting predicate, and closure.
//!
//! ```text
//! DRAFT (conversation only) --publish--> OPEN --deadline | manual | post-vote--> CLOSED
//! ```
//!
//! Every close path is idempotent. Closing an already closed proposal yields
//! [`CloseResult::AlreadyClosed`] and changes nothing, so a timer that fires
//! after a manual close is harmless.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use balloteer_types::{
    ActorId, Attachment, CloseTrigger, CommunityId, Deadline, PostVoteClose, Proposal, ProposalId,
    ProposalStatus, TallySnapshot,
};

use crate::error::GovernanceError;
use crate::store::EntityStore;
use crate::tally::{self, quorum_reached, total_weight};

/// A fully collected proposal that is not in the store yet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProposalDraft {
    /// The question.
    pub title: String,
    /// Option labels.
    pub options: Vec<String>,
    /// Optional quorum.
    pub quorum_weight: Option<u64>,
    /// Optional deadline.
    pub ends_at: Option<DateTime<Utc>>,
    /// Optional context document.
    pub attachment: Option<Attachment>,
}

/// A newly opened proposal and the counter value to persist with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// The stored proposal.
    pub proposal: Proposal,
    /// The community's counter after allocation.
    pub next_counter: u32,
}

/// A proposal that was closed by the current call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    /// The community.
    pub community_id: CommunityId,
    /// The closed proposal, for write-through.
    pub proposal: Proposal,
    /// Final tally, for the results announcement.
    pub result: TallySnapshot,
}

/// Outcome of a close attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseResult {
    /// This call closed the proposal.
    Closed(Box<Closure>),
    /// The proposal was already closed. Nothing changed.
    AlreadyClosed,
    /// The proposal is open and not yet due.
    NotDue,
}

/// `OPEN` and (no deadline or before it). This, not `status` alone, gates
/// casting.
pub fn is_open_for_voting(proposal: &Proposal, now: DateTime<Utc>) -> bool {
    proposal.status == ProposalStatus::Open && proposal.ends_at.is_none_or(|end| now < end)
}

/// `OPEN` with a deadline that has elapsed.
pub fn is_due(proposal: &Proposal, now: DateTime<Utc>) -> bool {
    proposal.status == ProposalStatus::Open && proposal.ends_at.is_some_and(|end| now >= end)
}

fn validate_draft(draft: &ProposalDraft) -> Result<(), GovernanceError> {
    let invalid = |reason: &str| GovernanceError::InvalidProposal {
        reason: reason.to_owned(),
    };
    if draft.title.trim().is_empty() {
        return Err(invalid("title is empty"));
    }
    if draft.options.len() < 2 {
        return Err(invalid("at least two options are required"));
    }
    if draft.options.iter().any(|o| o.trim().is_empty()) {
        return Err(invalid("options must not be empty"));
    }
    let mut seen = std::collections::BTreeSet::new();
    if !draft.options.iter().all(|o| seen.insert(o.as_str())) {
        return Err(invalid("options must be distinct"));
    }
    if draft.quorum_weight == Some(0) {
        return Err(invalid("quorum must be positive"));
    }
    Ok(())
}

/// Open a drafted proposal in `community_id`.
///
/// Requires `actor` to be the admin. Allocates the next id and seeds empty
/// tallies.
pub fn publish(
    store: &mut EntityStore,
    community_id: CommunityId,
    actor: ActorId,
    draft: ProposalDraft,
) -> Result<Published, GovernanceError> {
    store.require_admin(community_id, actor)?;
    validate_draft(&draft)?;

    let id = store.allocate_proposal_id(community_id)?;
    let proposal = Proposal {
        id,
        title: draft.title,
        options: draft.options,
        votes: std::collections::BTreeMap::new(),
        voter_map: std::collections::BTreeMap::new(),
        status: ProposalStatus::Open,
        quorum_weight: draft.quorum_weight,
        ends_at: draft.ends_at,
        created_by: Some(actor),
        attachment: draft.attachment,
    };
    store.insert_proposal(community_id, proposal.clone())?;
    let next_counter = store.community(community_id)?.proposal_counter;

    info!(
        community_id = %community_id,
        proposal_id = %id,
        options = proposal.options.len(),
        quorum = ?proposal.quorum_weight,
        ends_at = ?proposal.ends_at,
        "Proposal published"
    );
    Ok(Published {
        proposal,
        next_counter,
    })
}

fn close_now(
    store: &mut EntityStore,
    community_id: CommunityId,
    proposal_id: ProposalId,
    trigger: CloseTrigger,
) -> Result<CloseResult, GovernanceError> {
    let proposal = store.proposal_mut(community_id, proposal_id)?;
    if proposal.status == ProposalStatus::Closed {
        return Ok(CloseResult::AlreadyClosed);
    }
    proposal.status = ProposalStatus::Closed;
    let result = tally::snapshot(community_id, proposal, Some(trigger));

    info!(
        community_id = %community_id,
        proposal_id = %proposal_id,
        trigger = ?trigger,
        total_weight = result.total_weight,
        quorum_reached = result.quorum_reached,
        "Proposal closed"
    );
    Ok(CloseResult::Closed(Box::new(Closure {
        community_id,
        proposal: proposal.clone(),
        result,
    })))
}

/// Close by hand. Admin only, allowed at any time.
pub fn close_manual(
    store: &mut EntityStore,
    community_id: CommunityId,
    proposal_id: ProposalId,
    actor: ActorId,
) -> Result<CloseResult, GovernanceError> {
    store.require_admin(community_id, actor)?;
    close_now(store, community_id, proposal_id, CloseTrigger::Manual)
}

/// Close if the deadline has elapsed.
pub fn close_if_due(
    store: &mut EntityStore,
    community_id: CommunityId,
    proposal_id: ProposalId,
    now: DateTime<Utc>,
) -> Result<CloseResult, GovernanceError> {
    let proposal = store.proposal(community_id, proposal_id)?;
    if proposal.status == ProposalStatus::Closed {
        return Ok(CloseResult::AlreadyClosed);
    }
    if !is_due(proposal, now) {
        return Ok(CloseResult::NotDue);
    }
    close_now(store, community_id, proposal_id, CloseTrigger::Deadline)
}

/// Lazy close check run whenever a community is touched.
pub fn close_due_in_community(
    store: &mut EntityStore,
    community_id: CommunityId,
    now: DateTime<Utc>,
) -> Result<Vec<Closure>, GovernanceError> {
    let due: Vec<ProposalId> = store
        .community(community_id)?
        .proposals
        .iter()
        .filter(|p| is_due(p, now))
        .map(|p| p.id)
        .collect();

    let mut closed = Vec::with_capacity(due.len());
    for proposal_id in due {
        if let CloseResult::Closed(closure) = close_if_due(store, community_id, proposal_id, now)? {
            closed.push(*closure);
        }
    }
    if !closed.is_empty() {
        debug!(community_id = %community_id, closed = closed.len(), "Lazy close check");
    }
    Ok(closed)
}

/// Periodic sweep over every community.
pub fn close_all_due(store: &mut EntityStore, now: DateTime<Utc>) -> Vec<Closure> {
    let ids: Vec<CommunityId> = store.communities().map(|c| c.id).collect();
    let mut closed = Vec::new();
    for community_id in ids {
        // Communities come from the store itself, so lookups cannot miss.
        if let Ok(mut batch) = close_due_in_community(store, community_id, now) {
            closed.append(&mut batch);
        }
    }
    closed
}

/// Evaluate the post-vote shortcut after a ballot was recorded.
pub fn close_after_vote(
    store: &mut EntityStore,
    community_id: CommunityId,
    proposal_id: ProposalId,
    rule: PostVoteClose,
) -> Result<CloseResult, GovernanceError> {
    let community = store.community(community_id)?;
    let proposal = store.proposal(community_id, proposal_id)?;
    if proposal.status == ProposalStatus::Closed {
        return Ok(CloseResult::AlreadyClosed);
    }
    let trigger = match rule {
        PostVoteClose::Never => None,
        PostVoteClose::AllVoted => {
            let mut eligible = community
                .voters
                .values()
                .filter(|v| v.eligible_weight().is_some())
                .peekable();
            let all_in = eligible.peek().is_some()
                && eligible.all(|v| proposal.voter_map.contains_key(&v.id));
            all_in.then_some(CloseTrigger::AllVoted)
        }
        PostVoteClose::QuorumReached => proposal
            .quorum_weight
            .filter(|_| quorum_reached(proposal.quorum_weight, total_weight(proposal)))
            .map(|_| CloseTrigger::QuorumReached),
    };
    match trigger {
        Some(trigger) => close_now(store, community_id, proposal_id, trigger),
        None => Ok(CloseResult::NotDue),
    }
}

/// Deadlines of every open proposal, for arming timers at boot.
pub fn open_deadlines(store: &EntityStore) -> Vec<Deadline> {
    store
        .communities()
        .flat_map(|c| {
            c.proposals.iter().filter_map(move |p| match (p.status, p.ends_at) {
                (ProposalStatus::Open, Some(ends_at)) => Some(Deadline {
                    community_id: c.id,
                    proposal_id: p.id,
                    ends_at,
                }),
                _ => None,
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::unreachable)]
mod tests {
    use chrono::Duration;

    use balloteer_types::Outcome;

    use super::*;
    use crate::tally::cast_vote;

    const GROUP: CommunityId = CommunityId::new(-100);
    const ADMIN: ActorId = ActorId::new(1);
    const ALICE: ActorId = ActorId::new(2);
    const BOB: ActorId = ActorId::new(3);

    fn store() -> EntityStore {
        let mut store = EntityStore::new();
        store.create_or_get_community(GROUP, "dao");
        store.claim_admin_if_unset(GROUP, ADMIN).unwrap();
        for (id, weight) in [(ALICE, 3), (BOB, 2)] {
            store.register_voter_if_absent(GROUP, id, "v").unwrap();
            store
                .set_voter_decision(GROUP, id, true, Some(weight), None, Utc::now())
                .unwrap();
        }
        store
    }

    fn draft(ends_at: Option<DateTime<Utc>>) -> ProposalDraft {
        ProposalDraft {
            title: String::from("Adopt the charter?"),
            options: vec![String::from("Yes"), String::from("No")],
            quorum_weight: Some(5),
            ends_at,
            attachment: None,
        }
    }

    #[test]
    fn publish_allocates_sequential_ids() {
        let mut store = store();
        let first = publish(&mut store, GROUP, ADMIN, draft(None)).unwrap();
        let second = publish(&mut store, GROUP, ADMIN, draft(None)).unwrap();
        assert_eq!(first.proposal.id, ProposalId::new(1));
        assert_eq!(second.proposal.id, ProposalId::new(2));
        assert_eq!(second.next_counter, 3);
        assert!(first.proposal.votes.is_empty());
        assert_eq!(first.proposal.created_by, Some(ADMIN));
    }

    #[test]
    fn non_admin_cannot_publish() {
        let mut store = store();
        let result = publish(&mut store, GROUP, ALICE, draft(None));
        assert!(matches!(result, Err(GovernanceError::NotAuthorized { .. })));
        assert_eq!(store.community(GROUP).unwrap().proposal_counter, 1);
    }

    #[test]
    fn duplicate_options_are_refused() {
        let mut store = store();
        let mut bad = draft(None);
        bad.options = vec![String::from("Yes"), String::from("Yes")];
        let result = publish(&mut store, GROUP, ADMIN, bad);
        assert!(matches!(result, Err(GovernanceError::InvalidProposal { .. })));
    }

    #[test]
    fn auto_close_is_idempotent() {
        let now = Utc::now();
        let mut store = store();
        let id = publish(&mut store, GROUP, ADMIN, draft(Some(now + Duration::minutes(10))))
            .unwrap()
            .proposal
            .id;

        assert_eq!(close_if_due(&mut store, GROUP, id, now).unwrap(), CloseResult::NotDue);

        let later = now + Duration::minutes(10);
        assert!(matches!(
            close_if_due(&mut store, GROUP, id, later).unwrap(),
            CloseResult::Closed(_)
        ));
        assert_eq!(
            close_if_due(&mut store, GROUP, id, later).unwrap(),
            CloseResult::AlreadyClosed
        );
        assert!(close_all_due(&mut store, later).is_empty());
    }

    #[test]
    fn stale_timer_after_manual_close_is_a_no_op() {
        let now = Utc::now();
        let mut store = store();
        let id = publish(&mut store, GROUP, ADMIN, draft(Some(now + Duration::minutes(1))))
            .unwrap()
            .proposal
            .id;
        let CloseResult::Closed(closure) = close_manual(&mut store, GROUP, id, ADMIN).unwrap()
        else {
            unreachable!()
        };
        assert_eq!(closure.result.closed_by, Some(CloseTrigger::Manual));

        let fired = close_if_due(&mut store, GROUP, id, now + Duration::minutes(2)).unwrap();
        assert_eq!(fired, CloseResult::AlreadyClosed);
    }

    #[test]
    fn only_admin_closes_by_hand() {
        let mut store = store();
        let id = publish(&mut store, GROUP, ADMIN, draft(None)).unwrap().proposal.id;
        let result = close_manual(&mut store, GROUP, id, ALICE);
        assert!(matches!(result, Err(GovernanceError::NotAuthorized { .. })));
        assert_eq!(
            store.proposal(GROUP, id).unwrap().status,
            ProposalStatus::Open
        );
    }

    #[test]
    fn closed_proposal_refuses_ballots() {
        let now = Utc::now();
        let mut store = store();
        let id = publish(&mut store, GROUP, ADMIN, draft(None)).unwrap().proposal.id;
        close_manual(&mut store, GROUP, id, ADMIN).unwrap();
        let result = cast_vote(&mut store, GROUP, id, ALICE, 0, now);
        assert!(matches!(result, Err(GovernanceError::VotingClosed { .. })));
    }

    #[test]
    fn deadline_close_reports_winner_below_quorum() {
        let now = Utc::now();
        let mut store = store();
        let id = publish(&mut store, GROUP, ADMIN, draft(Some(now + Duration::minutes(10))))
            .unwrap()
            .proposal
            .id;
        cast_vote(&mut store, GROUP, id, ALICE, 0, now).unwrap();

        let closed = close_due_in_community(&mut store, GROUP, now + Duration::minutes(11)).unwrap();
        assert_eq!(closed.len(), 1);
        let result = &closed[0].result;
        assert_eq!(result.outcome, Outcome::Winner { index: 0 });
        assert_eq!(result.options[0].percent, 100);
        assert!(!result.quorum_reached);
        assert_eq!(result.status, ProposalStatus::Closed);
    }

    #[test]
    fn all_voted_shortcut_waits_for_every_eligible_voter() {
        let now = Utc::now();
        let mut store = store();
        let id = publish(&mut store, GROUP, ADMIN, draft(None)).unwrap().proposal.id;

        cast_vote(&mut store, GROUP, id, ALICE, 0, now).unwrap();
        assert_eq!(
            close_after_vote(&mut store, GROUP, id, PostVoteClose::AllVoted).unwrap(),
            CloseResult::NotDue
        );
        cast_vote(&mut store, GROUP, id, BOB, 1, now).unwrap();
        assert!(matches!(
            close_after_vote(&mut store, GROUP, id, PostVoteClose::AllVoted).unwrap(),
            CloseResult::Closed(_)
        ));
    }

    #[test]
    fn quorum_shortcut_and_default_rule() {
        let now = Utc::now();
        let mut store = store();
        let id = publish(&mut store, GROUP, ADMIN, draft(None)).unwrap().proposal.id;
        cast_vote(&mut store, GROUP, id, ALICE, 0, now).unwrap();
        cast_vote(&mut store, GROUP, id, BOB, 0, now).unwrap();

        assert_eq!(
            close_after_vote(&mut store, GROUP, id, PostVoteClose::Never).unwrap(),
            CloseResult::NotDue
        );
        let CloseResult::Closed(closure) =
            close_after_vote(&mut store, GROUP, id, PostVoteClose::QuorumReached).unwrap()
        else {
            unreachable!()
        };
        assert_eq!(closure.result.closed_by, Some(CloseTrigger::QuorumReached));
        assert!(closure.result.quorum_reached);
    }

    #[test]
    fn open_deadlines_skip_closed_and_unbounded_proposals() {
        let now = Utc::now();
        let mut store = store();
        publish(&mut store, GROUP, ADMIN, draft(None)).unwrap();
        let timed = publish(&mut store, GROUP, ADMIN, draft(Some(now + Duration::hours(1))))
            .unwrap()
            .proposal
            .id;
        let closed = publish(&mut store, GROUP, ADMIN, draft(Some(now + Duration::hours(1))))
            .unwrap()
            .proposal
            .id;
        close_manual(&mut store, GROUP, closed, ADMIN).unwrap();

        let deadlines = open_deadlines(&store);
        assert_eq!(deadlines.len(), 1);
        assert_eq!(deadlines[0].proposal_id, timed);
    }
}
