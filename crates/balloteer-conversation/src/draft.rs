//! Proposal drafting: title, options, quorum, duration, attachment, community.

use balloteer_governance::ProposalDraft;
use balloteer_types::{Choice, CommunityId, FlowInput, FlowKind, PromptStep};

use crate::error::ConversationError;
use crate::flow::{Advance, Flow, StepContext};
use crate::input;

/// A completed draft and the community it goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftReady {
    /// Target community, administered by the actor.
    pub community_id: CommunityId,
    /// The collected fields.
    pub draft: ProposalDraft,
}

/// Collects a proposal one answer at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalDraftFlow {
    step: PromptStep,
    draft: ProposalDraft,
}

impl Default for ProposalDraftFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ProposalDraftFlow {
    /// A fresh draft waiting for its title.
    pub fn new() -> Self {
        Self {
            step: PromptStep::Title,
            draft: ProposalDraft::default(),
        }
    }

    /// The fields collected so far.
    pub const fn draft(&self) -> &ProposalDraft {
        &self.draft
    }
}

impl Flow for ProposalDraftFlow {
    type Output = DraftReady;

    const KIND: FlowKind = FlowKind::ProposalDraft;

    fn step(&self) -> PromptStep {
        self.step
    }

    fn choices(&self, ctx: &StepContext<'_>) -> Vec<Choice> {
        if self.step == PromptStep::CommunityChoice {
            ctx.admin_choices()
        } else {
            Vec::new()
        }
    }

    fn invalidated(&self, ctx: &StepContext<'_>) -> Option<String> {
        if self.step == PromptStep::CommunityChoice && ctx.admin_choices().is_empty() {
            return Some(String::from("actor no longer administers any community"));
        }
        None
    }

    fn advance(
        &mut self,
        input: &FlowInput,
        ctx: &StepContext<'_>,
    ) -> Result<Advance<DraftReady>, ConversationError> {
        let step = self.step;
        let next = match step {
            PromptStep::Title => {
                self.draft.title = input::non_empty(step, input)?;
                PromptStep::Options
            }
            PromptStep::Options => {
                self.draft.options = input::options(step, input, ctx.limits.max_options)?;
                PromptStep::Quorum
            }
            PromptStep::Quorum => {
                self.draft.quorum_weight = input::positive_or_skip(step, input)?;
                PromptStep::Duration
            }
            PromptStep::Duration => {
                let ends_at =
                    input::deadline(step, input, ctx.now, ctx.limits.max_duration_minutes)?;
                self.draft.ends_at = Some(ends_at);
                PromptStep::Attachment
            }
            PromptStep::Attachment => {
                self.draft.attachment = input::attachment_or_skip(step, input)?;
                PromptStep::CommunityChoice
            }
            PromptStep::CommunityChoice => {
                let community_id = input::community(step, input)?;
                if !ctx.administers(community_id) {
                    return Err(ConversationError::invalid(
                        step,
                        "you do not administer that community",
                    ));
                }
                return Ok(Advance::Done(DraftReady {
                    community_id,
                    draft: self.draft.clone(),
                }));
            }
            PromptStep::VoterChoice
            | PromptStep::NewWeight
            | PromptStep::Reason
            | PromptStep::CustomWeight => {
                return Err(ConversationError::invalid(step, "not a drafting step"));
            }
        };
        self.step = next;
        Ok(Advance::Next(next))
    }
}
