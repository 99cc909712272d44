//! Error types for the governance crate.
//!
//! Every variant is local and recoverable: the engine reports it back to the
//! actor as a rejection and no state changes. `AlreadyClosed` is deliberately
//! absent; re-closing is an idempotent no-op reported through
//! [`CloseResult`](crate::lifecycle::CloseResult).

use balloteer_types::{ActorId, CommunityId, ProposalId, RejectReason};

/// Errors raised by the entity store, the tally, and the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GovernanceError {
    /// The actor is not the admin of the community.
    #[error("actor {actor_id} is not the admin of community {community_id}")]
    NotAuthorized {
        /// The actor who tried.
        actor_id: ActorId,
        /// The community they referenced.
        community_id: CommunityId,
    },

    /// The voter already received a first onboarding decision.
    #[error("voter {voter_id} in community {community_id} was already processed")]
    AlreadyProcessed {
        /// The community.
        community_id: CommunityId,
        /// The voter.
        voter_id: ActorId,
    },

    /// The voter is not approved or holds no weight.
    #[error("voter {voter_id} is not eligible to vote")]
    NotEligible {
        /// The voter.
        voter_id: ActorId,
    },

    /// The proposal is closed or past its deadline.
    #[error("voting on proposal {proposal_id} is closed")]
    VotingClosed {
        /// The proposal.
        proposal_id: ProposalId,
    },

    /// No such proposal in the community.
    #[error("proposal {proposal_id} not found in community {community_id}")]
    ProposalNotFound {
        /// The community searched.
        community_id: CommunityId,
        /// The missing proposal.
        proposal_id: ProposalId,
    },

    /// No such community.
    #[error("community {0} not found")]
    CommunityNotFound(CommunityId),

    /// No such voter in the community.
    #[error("voter {voter_id} not found in community {community_id}")]
    VoterNotFound {
        /// The community searched.
        community_id: CommunityId,
        /// The missing voter.
        voter_id: ActorId,
    },

    /// The option index is out of range for the proposal.
    #[error("option {index} does not exist (proposal has {count} options)")]
    InvalidOption {
        /// The index supplied.
        index: usize,
        /// The number of options the proposal has.
        count: usize,
    },

    /// A weight was rejected (zero, or missing on approval).
    #[error("invalid weight: {reason}")]
    InvalidWeight {
        /// What is wrong with it.
        reason: String,
    },

    /// A proposal draft failed validation.
    #[error("invalid proposal: {reason}")]
    InvalidProposal {
        /// What is wrong with it.
        reason: String,
    },

    /// The per-community proposal counter would overflow.
    #[error("proposal counter overflow in community {0}")]
    CounterOverflow(CommunityId),
}

impl GovernanceError {
    /// The user-facing rejection reason for this error.
    pub const fn reason(&self) -> RejectReason {
        match self {
            Self::NotAuthorized { .. } => RejectReason::NotAuthorized,
            Self::AlreadyProcessed { .. } => RejectReason::AlreadyProcessed,
            Self::NotEligible { .. } => RejectReason::NotEligible,
            Self::VotingClosed { .. } => RejectReason::VotingClosed,
            Self::ProposalNotFound { .. } => RejectReason::ProposalNotFound,
            Self::CommunityNotFound(_) => RejectReason::CommunityNotFound,
            Self::VoterNotFound { .. } => RejectReason::VoterNotFound,
            Self::InvalidOption { .. } => RejectReason::InvalidOption,
            Self::InvalidWeight { .. } => RejectReason::InvalidWeight,
            Self::InvalidProposal { .. } => RejectReason::InvalidProposal,
            Self::CounterOverflow(_) => RejectReason::Overflow,
        }
    }
}
