//! Enumeration types shared by the engine, its adapters and the web front end.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Lifecycle state of a published proposal.
///
/// Drafts never reach the store; they live inside a conversation flow until
/// they are published, so only the two post-publication states exist here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ProposalStatus {
    /// Accepting ballots (subject to the deadline).
    Open,
    /// Final. Tallies are frozen.
    Closed,
}

impl ProposalStatus {
    /// The string stored in the `status` column.
    pub const fn as_db_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    /// Parse the `status` column. Unknown values are treated as closed so a
    /// corrupted row can never accept votes.
    pub fn from_db_str(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("OPEN") {
            Self::Open
        } else {
            Self::Closed
        }
    }
}

/// The admin's answer to a voter's join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum AdminDecision {
    /// Approve with the configured default weight.
    Approve,
    /// Approve, asking the admin to type the weight first.
    ApproveCustom,
    /// Reject the request.
    Reject,
}

/// The kinds of multi-step conversations the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum FlowKind {
    /// Admin typing a custom weight while approving a join request.
    ApprovalWeight,
    /// Admin changing an existing voter's weight.
    WeightChange,
    /// Admin drafting a new proposal.
    ProposalDraft,
}

/// The question a conversation flow is currently waiting on.
///
/// Flows keep their own step enums; this flattened form is what the
/// router receives so it can render the right prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum PromptStep {
    /// Proposal title.
    Title,
    /// Comma-separated option labels.
    Options,
    /// Minimum total weight, or `skip`.
    Quorum,
    /// Voting window in minutes.
    Duration,
    /// Optional attachment, or `skip`.
    Attachment,
    /// One of the communities the actor administers.
    CommunityChoice,
    /// One of the approved voters of the chosen community.
    VoterChoice,
    /// Positive integer weight for a weight change.
    NewWeight,
    /// Free-text reason, or `skip`.
    Reason,
    /// Positive integer weight for a custom approval.
    CustomWeight,
}

/// What caused a proposal to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum CloseTrigger {
    /// The deadline elapsed (timer, sweep, or lazy check on touch).
    Deadline,
    /// The admin closed it by hand.
    Manual,
    /// Every eligible voter had a live ballot.
    AllVoted,
    /// The cast weight reached the quorum.
    QuorumReached,
}

/// Whether a proposal may close early right after a ballot is recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum PostVoteClose {
    /// Only the deadline or the admin close a proposal.
    #[default]
    Never,
    /// Close once every eligible voter holds a live ballot.
    AllVoted,
    /// Close once the cast weight reaches the quorum (proposals with a quorum only).
    QuorumReached,
}

/// Kind of chat an inbound `start` arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ChatKind {
    /// A group chat; the chat is the community.
    Group,
    /// A one-to-one chat with the engine.
    Private,
}

/// Machine-readable reason attached to a rejected request.
///
/// Every variant is recoverable and user-facing; none changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum RejectReason {
    /// The actor is not the admin of the referenced community.
    NotAuthorized,
    /// The voter already received a first decision.
    AlreadyProcessed,
    /// The voter is not approved or holds no weight.
    NotEligible,
    /// The proposal no longer accepts ballots.
    VotingClosed,
    /// No such proposal in the community.
    ProposalNotFound,
    /// No such community.
    CommunityNotFound,
    /// No such voter in the community.
    VoterNotFound,
    /// The selected option index does not exist.
    InvalidOption,
    /// A weight was zero or otherwise unusable.
    InvalidWeight,
    /// The proposal draft failed validation.
    InvalidProposal,
    /// The input does not fit the current conversation step.
    InvalidStepInput,
    /// The actor already has a conversation open.
    FlowAlreadyActive,
    /// The actor has no conversation open.
    NoActiveFlow,
    /// The conversation's context no longer holds and it was discarded.
    FlowInvalidated,
    /// The actor has not linked a verified wallet.
    WalletLinkRequired,
    /// A counter would overflow.
    Overflow,
}
