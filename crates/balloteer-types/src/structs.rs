//! Core entity structs: communities, voters, proposals, and tally snapshots.
//!
//! These are plain data. Invariant-preserving mutation lives in
//! `balloteer-governance`; nothing here enforces rules beyond what the
//! types themselves express.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{CloseTrigger, ProposalStatus};
use crate::ids::{ActorId, CommunityId, ProposalId};

/// A file attached to a proposal for context. The engine only stores the
/// reference; the transport owns the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Attachment {
    /// Transport-specific file handle.
    pub file_id: String,
    /// Original file name, when the transport knows it.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// A member (or would-be member) of a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Voter {
    /// The voter's actor id.
    pub id: ActorId,
    /// Display name, refreshed on every join request.
    #[serde(default)]
    pub display_name: String,
    /// Whether the admin approved the voter.
    #[serde(default)]
    pub approved: bool,
    /// Voting power. Only meaningful while `approved` is true.
    #[serde(default)]
    pub weight: Option<u64>,
    /// Whether the admin has made a first decision on this voter.
    #[serde(default)]
    pub processed: bool,
    /// Wallet address bound to this voter, if one was recorded.
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Reason given with the last decision or weight change.
    #[serde(default)]
    pub last_change_reason: Option<String>,
    /// When the decision or weight last changed.
    #[serde(default)]
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl Voter {
    /// A freshly registered voter awaiting the admin's decision.
    pub const fn pending(id: ActorId, display_name: String) -> Self {
        Self {
            id,
            display_name,
            approved: false,
            weight: None,
            processed: false,
            wallet_address: None,
            last_change_reason: None,
            last_modified_at: None,
        }
    }

    /// The weight this voter may cast, if they are eligible at all.
    pub fn eligible_weight(&self) -> Option<u64> {
        if self.approved {
            self.weight.filter(|w| *w > 0)
        } else {
            None
        }
    }
}

/// A votable question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Proposal {
    /// Per-community id.
    pub id: ProposalId,
    /// The question.
    pub title: String,
    /// Ordered, distinct option labels (at least two).
    pub options: Vec<String>,
    /// Total weight per option index. Absent keys mean zero.
    #[serde(default)]
    pub votes: BTreeMap<usize, u64>,
    /// Each voter's current option. At most one live ballot per voter.
    #[serde(default)]
    pub voter_map: BTreeMap<ActorId, usize>,
    /// Lifecycle state.
    pub status: ProposalStatus,
    /// Minimum total weight for the result to count as quorate.
    #[serde(default)]
    pub quorum_weight: Option<u64>,
    /// Deadline after which ballots are refused.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// Admin who published the proposal.
    #[serde(default)]
    pub created_by: Option<ActorId>,
    /// Optional context document.
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

/// A governed group: one admin, many voters, many proposals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Community {
    /// The group chat id.
    pub id: CommunityId,
    /// Group title, refreshed whenever the group is seen.
    pub title: String,
    /// The single admin. First claim wins; never re-assigned implicitly.
    #[serde(default)]
    pub admin_id: Option<ActorId>,
    /// Next proposal id to hand out. Starts at 1.
    #[serde(default = "default_proposal_counter")]
    pub proposal_counter: u32,
    /// Voters keyed by actor id.
    #[serde(default)]
    pub voters: BTreeMap<ActorId, Voter>,
    /// Proposals in ascending id order.
    #[serde(default)]
    pub proposals: Vec<Proposal>,
}

impl Community {
    /// A brand-new community with no admin, voters or proposals.
    pub const fn new(id: CommunityId, title: String) -> Self {
        Self {
            id,
            title,
            admin_id: None,
            proposal_counter: 1,
            voters: BTreeMap::new(),
            proposals: Vec::new(),
        }
    }
}

const fn default_proposal_counter() -> u32 {
    1
}

/// Classification of a proposal's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Outcome {
    /// Nobody cast any weight.
    NoVotes,
    /// A single option holds the maximum weight.
    Winner {
        /// Index of the winning option.
        index: usize,
    },
    /// Two or more options share the maximum weight.
    Tie {
        /// Indices of the tied options, ascending.
        indices: Vec<usize>,
    },
}

/// One option's line in a tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct OptionTally {
    /// Option index.
    pub index: usize,
    /// Option label.
    pub label: String,
    /// Total weight cast for this option.
    pub weight: u64,
    /// Rounded share of the total weight, 0 when nothing was cast.
    pub percent: u8,
}

/// Aggregated, voter-anonymous view of a proposal's tally.
///
/// This is the only shape in which results leave the engine: it never
/// contains who voted for what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TallySnapshot {
    /// Community the proposal belongs to.
    pub community_id: CommunityId,
    /// Proposal id.
    pub proposal_id: ProposalId,
    /// Proposal title.
    pub title: String,
    /// Per-option totals.
    pub options: Vec<OptionTally>,
    /// Sum of all cast weight.
    pub total_weight: u64,
    /// Number of voters holding a live ballot.
    pub ballots: usize,
    /// Winner / tie / no-votes classification.
    pub outcome: Outcome,
    /// Configured quorum, if any.
    pub quorum_weight: Option<u64>,
    /// Advisory: whether the quorum was met. Never blocks closure.
    pub quorum_reached: bool,
    /// Lifecycle state at snapshot time.
    pub status: ProposalStatus,
    /// Deadline, if any.
    pub ends_at: Option<DateTime<Utc>>,
    /// How the proposal closed, when it is closed and the cause is known.
    pub closed_by: Option<CloseTrigger>,
}

/// Short listing entry for a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CommunitySummary {
    /// Community id.
    pub community_id: CommunityId,
    /// Community title.
    pub title: String,
    /// Number of approved voters.
    pub approved_voters: usize,
    /// Number of proposals currently open for voting.
    pub open_proposals: usize,
}

/// Short listing entry for one of the actor's memberships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MembershipSummary {
    /// Community id.
    pub community_id: CommunityId,
    /// Community title.
    pub title: String,
    /// Whether the actor is approved there.
    pub approved: bool,
    /// The actor's weight there.
    pub weight: Option<u64>,
}

/// Short listing entry for an open proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ProposalSummary {
    /// Community id.
    pub community_id: CommunityId,
    /// Proposal id.
    pub proposal_id: ProposalId,
    /// Proposal title.
    pub title: String,
    /// Deadline, if any.
    pub ends_at: Option<DateTime<Utc>>,
}

/// A ballot the actor can still cast or change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct BallotSummary {
    /// Community id.
    pub community_id: CommunityId,
    /// Community title.
    pub community_title: String,
    /// Proposal id.
    pub proposal_id: ProposalId,
    /// Proposal title.
    pub title: String,
    /// Option labels.
    pub options: Vec<String>,
    /// Option the actor currently holds, if any.
    pub current_choice: Option<usize>,
    /// The actor's weight.
    pub weight: u64,
    /// Deadline, if any.
    pub ends_at: Option<DateTime<Utc>>,
}
