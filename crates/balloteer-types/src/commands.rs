//! Structured commands produced by the dispatch router.
//!
//! The transport decodes whatever it receives (slash commands, button
//! presses, free text, uploaded files) into one [`Command`]. The engine never
//! sees transport-specific encodings such as callback strings.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{AdminDecision, ChatKind};
use crate::ids::{ActorId, CommunityId, ProposalId};
use crate::structs::Attachment;

/// Where an inbound `start` came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChatContext {
    /// Group or private chat.
    pub kind: ChatKind,
    /// The group id, for group chats.
    #[serde(default)]
    pub community_id: Option<CommunityId>,
    /// The group title, for group chats.
    #[serde(default)]
    pub title: Option<String>,
}

impl ChatContext {
    /// A group chat context.
    pub const fn group(community_id: CommunityId, title: String) -> Self {
        Self {
            kind: ChatKind::Group,
            community_id: Some(community_id),
            title: Some(title),
        }
    }

    /// A private chat context.
    pub const fn private() -> Self {
        Self {
            kind: ChatKind::Private,
            community_id: None,
            title: None,
        }
    }
}

/// One answer to whatever step the actor's open conversation is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum FlowInput {
    /// Free text typed by the actor.
    Text {
        /// The raw text.
        text: String,
    },
    /// A file the actor uploaded.
    Attachment {
        /// The file reference.
        attachment: Attachment,
    },
    /// A community picked from a list.
    Community {
        /// The picked community.
        community_id: CommunityId,
    },
    /// A voter picked from a list.
    Voter {
        /// The picked voter.
        voter_id: ActorId,
    },
}

impl FlowInput {
    /// Convenience constructor for typed text.
    pub fn text(raw: impl Into<String>) -> Self {
        Self::Text { text: raw.into() }
    }
}

/// Every operation the engine exposes to the router, as one closed type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "command", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Command {
    /// `/start` in a group (claims admin) or in private (home listing).
    Start {
        /// Who sent it.
        actor_id: ActorId,
        /// Where it was sent.
        chat: ChatContext,
    },
    /// A voter asks to join a community.
    JoinRequest {
        /// The would-be voter.
        actor_id: ActorId,
        /// Their display name.
        display_name: String,
        /// The community they want to join.
        community_id: CommunityId,
    },
    /// The admin answers a join request.
    AdminDecision {
        /// The admin.
        actor_id: ActorId,
        /// The community.
        community_id: CommunityId,
        /// The voter being decided on.
        voter_id: ActorId,
        /// The decision.
        decision: AdminDecision,
    },
    /// The admin starts drafting a proposal.
    NewProposal {
        /// The admin.
        actor_id: ActorId,
    },
    /// The admin starts a weight change.
    SetWeight {
        /// The admin.
        actor_id: ActorId,
    },
    /// Input for the actor's open conversation.
    FlowInput {
        /// The actor.
        actor_id: ActorId,
        /// The input.
        input: FlowInput,
    },
    /// The admin picks the community a finished draft is published to.
    Publish {
        /// The admin.
        actor_id: ActorId,
        /// The target community.
        community_id: CommunityId,
    },
    /// A voter casts or changes a ballot.
    CastVote {
        /// The voter.
        actor_id: ActorId,
        /// The community.
        community_id: CommunityId,
        /// The proposal.
        proposal_id: ProposalId,
        /// The chosen option index.
        option_index: usize,
    },
    /// The admin closes a proposal by hand.
    CloseRequest {
        /// The admin.
        actor_id: ActorId,
        /// The community.
        community_id: CommunityId,
        /// The proposal.
        proposal_id: ProposalId,
    },
    /// The admin asks which proposals can still be closed.
    CloseListing {
        /// The admin.
        actor_id: ActorId,
    },
    /// A voter asks which ballots they can still cast or change.
    MyVotes {
        /// The voter.
        actor_id: ActorId,
    },
    /// Anyone asks for a proposal's aggregated tally.
    ProposalDetail {
        /// The community.
        community_id: CommunityId,
        /// The proposal.
        proposal_id: ProposalId,
    },
    /// The actor abandons whatever conversation is open.
    Cancel {
        /// The actor.
        actor_id: ActorId,
    },
    /// A deadline timer fired.
    AutoCloseCheck {
        /// The community.
        community_id: CommunityId,
        /// The proposal.
        proposal_id: ProposalId,
    },
    /// Periodic sweep over every open proposal.
    Sweep,
}

impl Command {
    /// The actor the command came from, if it came from a person.
    pub const fn actor(&self) -> Option<ActorId> {
        match self {
            Self::Start { actor_id, .. }
            | Self::JoinRequest { actor_id, .. }
            | Self::AdminDecision { actor_id, .. }
            | Self::NewProposal { actor_id }
            | Self::SetWeight { actor_id }
            | Self::FlowInput { actor_id, .. }
            | Self::Publish { actor_id, .. }
            | Self::CastVote { actor_id, .. }
            | Self::CloseRequest { actor_id, .. }
            | Self::CloseListing { actor_id }
            | Self::MyVotes { actor_id }
            | Self::Cancel { actor_id } => Some(*actor_id),
            Self::ProposalDetail { .. } | Self::AutoCloseCheck { .. } | Self::Sweep => None,
        }
    }

    /// Short name for log lines.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::JoinRequest { .. } => "join_request",
            Self::AdminDecision { .. } => "admin_decision",
            Self::NewProposal { .. } => "new_proposal",
            Self::SetWeight { .. } => "set_weight",
            Self::FlowInput { .. } => "flow_input",
            Self::Publish { .. } => "publish",
            Self::CastVote { .. } => "cast_vote",
            Self::CloseRequest { .. } => "close_request",
            Self::CloseListing { .. } => "close_listing",
            Self::MyVotes { .. } => "my_votes",
            Self::ProposalDetail { .. } => "proposal_detail",
            Self::Cancel { .. } => "cancel",
            Self::AutoCloseCheck { .. } => "auto_close_check",
            Self::Sweep => "sweep",
        }
    }
}
