//! Render-agnostic results handed back to the dispatch router.
//!
//! Each command yields exactly one [`Reply`] for the actor who sent it and
//! zero or more [`Notice`]s for third parties (the admin, a voter, or a
//! whole group). The router owns all wording and formatting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{FlowKind, PromptStep, RejectReason};
use crate::ids::{ActorId, CommunityId, ProposalId};
use crate::structs::{
    Attachment, BallotSummary, CommunitySummary, MembershipSummary, ProposalSummary,
    TallySnapshot,
};

/// A selectable entry offered alongside a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Choice {
    /// Raw id of the community or voter this choice selects.
    pub id: i64,
    /// Human-readable label.
    pub label: String,
}

/// The engine's answer to the actor who sent a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Reply {
    /// The actor became admin of the community.
    AdminClaimed {
        /// Community id.
        community_id: CommunityId,
        /// Community title.
        title: String,
    },
    /// The community is known and already has an admin.
    CommunityRegistered {
        /// Community id.
        community_id: CommunityId,
        /// Community title.
        title: String,
        /// The existing admin.
        admin_id: Option<ActorId>,
    },
    /// Private-chat home listing.
    Home {
        /// Communities the actor administers.
        admin_of: Vec<CommunitySummary>,
        /// Communities the actor has joined or asked to join.
        member_of: Vec<MembershipSummary>,
    },
    /// The join request was forwarded to the admin.
    JoinPending {
        /// Community id.
        community_id: CommunityId,
    },
    /// The actor was already decided on in this community.
    AlreadyMember {
        /// Community id.
        community_id: CommunityId,
        /// Current approval state.
        approved: bool,
        /// Current weight.
        weight: Option<u64>,
    },
    /// An onboarding decision or custom-weight approval was applied.
    DecisionApplied {
        /// Community id.
        community_id: CommunityId,
        /// The voter.
        voter_id: ActorId,
        /// Whether the voter is now approved.
        approved: bool,
        /// The voter's weight.
        weight: Option<u64>,
    },
    /// A conversation is waiting for the next answer.
    Prompt {
        /// Which conversation.
        flow: FlowKind,
        /// Which question.
        step: PromptStep,
        /// Selectable entries, for choice steps.
        choices: Vec<Choice>,
    },
    /// A proposal was published.
    ProposalPublished {
        /// Community id.
        community_id: CommunityId,
        /// The newly allocated proposal id.
        proposal_id: ProposalId,
        /// How many private ballots were sent out.
        ballots_sent: usize,
    },
    /// A ballot was recorded.
    VoteRecorded {
        /// Community id.
        community_id: CommunityId,
        /// Proposal id.
        proposal_id: ProposalId,
        /// The option now held.
        option_index: usize,
        /// Its label.
        label: String,
        /// The option previously held, when this was a recast.
        replaced: Option<usize>,
    },
    /// A proposal was closed by this command.
    Closed {
        /// Final tally.
        result: TallySnapshot,
    },
    /// The proposal was already closed; nothing changed.
    AlreadyClosed {
        /// Community id.
        community_id: CommunityId,
        /// Proposal id.
        proposal_id: ProposalId,
    },
    /// Open proposals the admin can close.
    CloseListing {
        /// Candidates, grouped by community in ascending order.
        proposals: Vec<ProposalSummary>,
    },
    /// Ballots the actor can still cast or change.
    MyVotes {
        /// Open ballots.
        ballots: Vec<BallotSummary>,
    },
    /// Aggregated tally for a proposal.
    ProposalDetail {
        /// Current tally.
        result: TallySnapshot,
    },
    /// A voter's weight was changed.
    WeightChanged {
        /// Community id.
        community_id: CommunityId,
        /// The voter.
        voter_id: ActorId,
        /// Weight before the change.
        previous: Option<u64>,
        /// Weight after the change.
        weight: u64,
        /// Reason recorded with the change.
        reason: String,
    },
    /// The actor's conversation was discarded.
    Cancelled {
        /// The conversation that was open, if any.
        flow: Option<FlowKind>,
    },
    /// A scheduler pass finished.
    SweepCompleted {
        /// Number of proposals it closed.
        closed: usize,
    },
    /// A scheduled check found nothing to do.
    Idle,
    /// The request was refused. Nothing changed.
    Rejected {
        /// Machine-readable reason.
        reason: RejectReason,
        /// Diagnostic detail for logs and fallback rendering.
        detail: String,
    },
    /// Conversation input was refused; the same question is asked again.
    Reprompt {
        /// Machine-readable reason.
        reason: RejectReason,
        /// Diagnostic detail for logs and fallback rendering.
        detail: String,
        /// The conversation still open.
        flow: FlowKind,
        /// The question it is waiting on.
        step: PromptStep,
        /// Selectable entries, for choice steps.
        choices: Vec<Choice>,
    },
}

/// Who a [`Notice`] is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "to", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Recipient {
    /// One person, privately.
    Actor {
        /// The person.
        actor_id: ActorId,
    },
    /// A whole community's group chat.
    Group {
        /// The group.
        community_id: CommunityId,
    },
}

/// Content of a third-party notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum NoticeBody {
    /// Ask the admin to decide on a join request.
    ApprovalRequest {
        /// Community id.
        community_id: CommunityId,
        /// Community title.
        community_title: String,
        /// The would-be voter.
        voter_id: ActorId,
        /// Their display name.
        display_name: String,
        /// Weight granted by the one-tap approval.
        default_weight: u64,
    },
    /// Tell a voter they were approved.
    VoterApproved {
        /// Community id.
        community_id: CommunityId,
        /// Community title.
        community_title: String,
        /// Granted weight.
        weight: u64,
    },
    /// Tell a voter they were rejected.
    VoterRejected {
        /// Community id.
        community_id: CommunityId,
        /// Community title.
        community_title: String,
    },
    /// Tell a voter their weight changed.
    WeightChanged {
        /// Community id.
        community_id: CommunityId,
        /// Community title.
        community_title: String,
        /// Weight before the change.
        previous: Option<u64>,
        /// Weight after the change.
        weight: u64,
        /// Reason recorded with the change.
        reason: String,
    },
    /// Announce a new proposal to the group.
    VotingOpen {
        /// Community id.
        community_id: CommunityId,
        /// Proposal id.
        proposal_id: ProposalId,
        /// Proposal title.
        title: String,
        /// Option labels.
        options: Vec<String>,
        /// Quorum, if any.
        quorum_weight: Option<u64>,
        /// Deadline, if any.
        ends_at: Option<DateTime<Utc>>,
    },
    /// A private ballot for one eligible voter.
    Ballot {
        /// Community id.
        community_id: CommunityId,
        /// Community title.
        community_title: String,
        /// Proposal id.
        proposal_id: ProposalId,
        /// Proposal title.
        title: String,
        /// Option labels.
        options: Vec<String>,
        /// The voter's weight.
        weight: u64,
        /// Deadline, if any.
        ends_at: Option<DateTime<Utc>>,
        /// Context document, if any.
        attachment: Option<Attachment>,
    },
    /// Announce the final result to the group.
    FinalResults {
        /// Final tally.
        result: TallySnapshot,
    },
}

/// A best-effort message to someone other than the command's sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Notice {
    /// Addressee.
    pub recipient: Recipient,
    /// Content.
    pub body: NoticeBody,
}

impl Notice {
    /// A private notice to one actor.
    pub const fn to_actor(actor_id: ActorId, body: NoticeBody) -> Self {
        Self {
            recipient: Recipient::Actor { actor_id },
            body,
        }
    }

    /// A notice to a community's group chat.
    pub const fn to_group(community_id: CommunityId, body: NoticeBody) -> Self {
        Self {
            recipient: Recipient::Group { community_id },
            body,
        }
    }
}

/// A proposal deadline the scheduler should arm a timer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Deadline {
    /// Community id.
    pub community_id: CommunityId,
    /// Proposal id.
    pub proposal_id: ProposalId,
    /// When the proposal is due to close.
    pub ends_at: DateTime<Utc>,
}

/// Everything one command produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Dispatch {
    /// Answer for the sender.
    pub reply: Reply,
    /// Notifications for third parties.
    pub notices: Vec<Notice>,
    /// Deadlines created by this command.
    pub deadlines: Vec<Deadline>,
}

impl Dispatch {
    /// A reply with no side notifications.
    pub const fn reply(reply: Reply) -> Self {
        Self {
            reply,
            notices: Vec::new(),
            deadlines: Vec::new(),
        }
    }

    /// A refusal.
    pub fn rejected(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self::reply(Reply::Rejected {
            reason,
            detail: detail.into(),
        })
    }

    /// Attach notices.
    #[must_use]
    pub fn with_notices(mut self, notices: Vec<Notice>) -> Self {
        self.notices.extend(notices);
        self
    }

    /// Attach a deadline to arm.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadlines.push(deadline);
        self
    }

    /// Whether the command was refused.
    pub const fn is_rejected(&self) -> bool {
        matches!(self.reply, Reply::Rejected { .. } | Reply::Reprompt { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn rejected_dispatch_carries_reason() {
        let dispatch = Dispatch::rejected(RejectReason::VotingClosed, "deadline passed");
        assert!(dispatch.is_rejected());
        assert!(dispatch.notices.is_empty());
    }

    #[test]
    fn group_notice_serializes_recipient_tag() {
        let notice = Notice::to_group(
            CommunityId::new(-5),
            NoticeBody::VoterRejected {
                community_id: CommunityId::new(-5),
                community_title: String::from("dao"),
            },
        );
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["recipient"]["to"], "group");
        assert_eq!(json["body"]["kind"], "voter_rejected");
    }

    #[test]
    fn reprompt_names_the_open_step() {
        let dispatch = Dispatch::reply(Reply::Reprompt {
            reason: RejectReason::InvalidStepInput,
            detail: String::from("need at least two options"),
            flow: FlowKind::ProposalDraft,
            step: PromptStep::Options,
            choices: Vec::new(),
        });
        assert!(dispatch.is_rejected());
        let json = serde_json::to_value(&dispatch.reply).unwrap();
        assert_eq!(json["kind"], "reprompt");
        assert_eq!(json["flow"], "proposal_draft");
        assert_eq!(json["step"], "options");
    }
}
