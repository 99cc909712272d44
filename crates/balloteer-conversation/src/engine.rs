//! Owner of every open conversation, keyed by actor.
//!
//! An actor has at most one open conversation regardless of kind: a weight
//! change and a proposal draft never interleave for the same admin.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use balloteer_types::{ActorId, Choice, FlowInput, FlowKind, PromptStep};

use crate::approval::{ApprovalWeightFlow, CustomApproval};
use crate::draft::{DraftReady, ProposalDraftFlow};
use crate::error::ConversationError;
use crate::flow::{Advance, Flow, StepContext};
use crate::weight::{WeightChangeFlow, WeightChangeRequest};

/// One open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveFlow {
    /// Drafting a proposal.
    ProposalDraft(ProposalDraftFlow),
    /// Changing a voter's weight.
    WeightChange(WeightChangeFlow),
    /// Approving a voter with a custom weight.
    ApprovalWeight(ApprovalWeightFlow),
}

impl ActiveFlow {
    /// Which conversation this is.
    pub const fn kind(&self) -> FlowKind {
        match self {
            Self::ProposalDraft(_) => ProposalDraftFlow::KIND,
            Self::WeightChange(_) => WeightChangeFlow::KIND,
            Self::ApprovalWeight(_) => ApprovalWeightFlow::KIND,
        }
    }

    fn step(&self) -> PromptStep {
        match self {
            Self::ProposalDraft(f) => f.step(),
            Self::WeightChange(f) => f.step(),
            Self::ApprovalWeight(f) => f.step(),
        }
    }

    fn choices(&self, ctx: &StepContext<'_>) -> Vec<Choice> {
        match self {
            Self::ProposalDraft(f) => f.choices(ctx),
            Self::WeightChange(f) => f.choices(ctx),
            Self::ApprovalWeight(f) => f.choices(ctx),
        }
    }

    fn invalidated(&self, ctx: &StepContext<'_>) -> Option<String> {
        match self {
            Self::ProposalDraft(f) => f.invalidated(ctx),
            Self::WeightChange(f) => f.invalidated(ctx),
            Self::ApprovalWeight(f) => f.invalidated(ctx),
        }
    }

    fn advance(
        &mut self,
        input: &FlowInput,
        ctx: &StepContext<'_>,
    ) -> Result<Advance<Finished>, ConversationError> {
        fn lift<T>(advance: Advance<T>, wrap: fn(T) -> Finished) -> Advance<Finished> {
            match advance {
                Advance::Next(step) => Advance::Next(step),
                Advance::Done(out) => Advance::Done(wrap(out)),
            }
        }
        Ok(match self {
            Self::ProposalDraft(f) => lift(f.advance(input, ctx)?, Finished::Draft),
            Self::WeightChange(f) => lift(f.advance(input, ctx)?, Finished::WeightChange),
            Self::ApprovalWeight(f) => lift(f.advance(input, ctx)?, Finished::Approval),
        })
    }
}

/// What a completed conversation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finished {
    /// A proposal ready to publish.
    Draft(DraftReady),
    /// A weight change ready to apply.
    WeightChange(WeightChangeRequest),
    /// A custom-weight approval ready to apply.
    Approval(CustomApproval),
}

/// The question a conversation is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrompt {
    /// Which conversation.
    pub kind: FlowKind,
    /// Which question.
    pub step: PromptStep,
    /// Entries to pick from, for choice steps.
    pub choices: Vec<Choice>,
}

/// Result of [`ConversationEngine::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The conversation continues.
    Prompt(PendingPrompt),
    /// The conversation completed and was removed.
    Finished(Finished),
}

/// All open conversations.
#[derive(Debug, Clone, Default)]
pub struct ConversationEngine {
    flows: BTreeMap<ActorId, ActiveFlow>,
}

impl ConversationEngine {
    /// No open conversations.
    pub const fn new() -> Self {
        Self {
            flows: BTreeMap::new(),
        }
    }

    /// Number of open conversations.
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    /// Whether no conversation is open.
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// The kind of the actor's open conversation, if any.
    pub fn active_kind(&self, actor: ActorId) -> Option<FlowKind> {
        self.flows.get(&actor).map(ActiveFlow::kind)
    }

    /// Open a conversation and return its first prompt.
    pub fn start(
        &mut self,
        flow: ActiveFlow,
        ctx: &StepContext<'_>,
    ) -> Result<PendingPrompt, ConversationError> {
        if let Some(open) = self.flows.get(&ctx.actor) {
            return Err(ConversationError::FlowAlreadyActive { kind: open.kind() });
        }
        let prompt = PendingPrompt {
            kind: flow.kind(),
            step: flow.step(),
            choices: flow.choices(ctx),
        };
        info!(actor_id = %ctx.actor, kind = ?prompt.kind, "Conversation started");
        self.flows.insert(ctx.actor, flow);
        Ok(prompt)
    }

    /// Feed one input to the actor's open conversation.
    ///
    /// With `expected` set, only a conversation of that kind is advanced.
    /// Invalid input leaves the conversation on the same step; a conversation
    /// whose context no longer holds is discarded.
    pub fn advance(
        &mut self,
        expected: Option<FlowKind>,
        input: &FlowInput,
        ctx: &StepContext<'_>,
    ) -> Result<Progress, ConversationError> {
        let actor = ctx.actor;
        let flow = self
            .flows
            .get_mut(&actor)
            .filter(|f| expected.is_none_or(|k| k == f.kind()))
            .ok_or(ConversationError::NoActiveFlow)?;

        if let Some(reason) = flow.invalidated(ctx) {
            let kind = flow.kind();
            self.flows.remove(&actor);
            warn!(actor_id = %actor, kind = ?kind, reason, "Conversation invalidated");
            return Err(ConversationError::FlowInvalidated { kind, reason });
        }

        match flow.advance(input, ctx) {
            Ok(Advance::Next(step)) => {
                debug!(actor_id = %actor, step = ?step, "Conversation advanced");
                Ok(Progress::Prompt(PendingPrompt {
                    kind: flow.kind(),
                    step,
                    choices: flow.choices(ctx),
                }))
            }
            Ok(Advance::Done(finished)) => {
                let kind = flow.kind();
                self.flows.remove(&actor);
                info!(actor_id = %actor, kind = ?kind, "Conversation finished");
                Ok(Progress::Finished(finished))
            }
            Err(err) => {
                debug!(actor_id = %actor, error = %err, "Step input refused");
                Err(err)
            }
        }
    }

    /// Re-prompt the current step, e.g. after refused input.
    pub fn current_prompt(&self, ctx: &StepContext<'_>) -> Option<PendingPrompt> {
        self.flows.get(&ctx.actor).map(|f| PendingPrompt {
            kind: f.kind(),
            step: f.step(),
            choices: f.choices(ctx),
        })
    }

    /// Discard the actor's open conversation unconditionally.
    pub fn cancel(&mut self, actor: ActorId) -> Option<FlowKind> {
        let kind = self.flows.remove(&actor).map(|f| f.kind());
        if let Some(kind) = kind {
            info!(actor_id = %actor, kind = ?kind, "Conversation cancelled");
        }
        kind
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use balloteer_governance::EntityStore;
    use balloteer_types::CommunityId;

    use super::*;
    use crate::flow::FlowLimits;

    const GROUP: CommunityId = CommunityId::new(-100);
    const ADMIN: ActorId = ActorId::new(1);

    fn store() -> EntityStore {
        let mut store = EntityStore::new();
        store.create_or_get_community(GROUP, "dao");
        store.claim_admin_if_unset(GROUP, ADMIN).unwrap();
        store
    }

    fn ctx(store: &EntityStore) -> StepContext<'_> {
        StepContext {
            store,
            actor: ADMIN,
            now: Utc::now(),
            limits: FlowLimits::default(),
        }
    }

    #[test]
    fn kinds_are_mutually_exclusive_per_actor() {
        let store = store();
        let ctx = ctx(&store);
        let mut engine = ConversationEngine::new();
        engine
            .start(ActiveFlow::ProposalDraft(ProposalDraftFlow::new()), &ctx)
            .unwrap();
        let second = engine.start(ActiveFlow::WeightChange(WeightChangeFlow::new()), &ctx);
        assert_eq!(
            second,
            Err(ConversationError::FlowAlreadyActive {
                kind: FlowKind::ProposalDraft
            })
        );
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn refused_input_keeps_the_flow_open() {
        let store = store();
        let ctx = ctx(&store);
        let mut engine = ConversationEngine::new();
        engine
            .start(ActiveFlow::ProposalDraft(ProposalDraftFlow::new()), &ctx)
            .unwrap();
        engine.advance(None, &FlowInput::text("Title"), &ctx).unwrap();
        assert!(engine.advance(None, &FlowInput::text("only"), &ctx).is_err());
        let prompt = engine.current_prompt(&ctx).unwrap();
        assert_eq!(prompt.step, PromptStep::Options);
    }

    #[test]
    fn advancing_the_wrong_kind_is_refused() {
        let store = store();
        let ctx = ctx(&store);
        let mut engine = ConversationEngine::new();
        engine
            .start(ActiveFlow::WeightChange(WeightChangeFlow::new()), &ctx)
            .unwrap();
        let result = engine.advance(
            Some(FlowKind::ProposalDraft),
            &FlowInput::Community { community_id: GROUP },
            &ctx,
        );
        assert_eq!(result, Err(ConversationError::NoActiveFlow));
        assert_eq!(engine.active_kind(ADMIN), Some(FlowKind::WeightChange));
    }

    #[test]
    fn finished_flow_is_removed() {
        let mut store = store();
        let voter = ActorId::new(5);
        store.register_voter_if_absent(GROUP, voter, "v").unwrap();
        let ctx = ctx(&store);
        let mut engine = ConversationEngine::new();
        engine
            .start(
                ActiveFlow::ApprovalWeight(ApprovalWeightFlow::new(GROUP, voter)),
                &ctx,
            )
            .unwrap();
        let progress = engine.advance(None, &FlowInput::text("3"), &ctx).unwrap();
        assert!(matches!(progress, Progress::Finished(Finished::Approval(_))));
        assert!(engine.is_empty());
    }

    #[test]
    fn invalidated_flow_is_discarded() {
        let store = store();
        let mut engine = ConversationEngine::new();
        let stranger = StepContext {
            actor: ActorId::new(77),
            ..ctx(&store)
        };
        engine
            .start(
                ActiveFlow::ApprovalWeight(ApprovalWeightFlow::new(GROUP, ActorId::new(5))),
                &stranger,
            )
            .unwrap();
        let result = engine.advance(None, &FlowInput::text("3"), &stranger);
        assert!(matches!(
            result,
            Err(ConversationError::FlowInvalidated { .. })
        ));
        assert!(engine.is_empty());
    }

    #[test]
    fn cancel_is_unconditional() {
        let store = store();
        let ctx = ctx(&store);
        let mut engine = ConversationEngine::new();
        assert_eq!(engine.cancel(ADMIN), None);
        engine
            .start(ActiveFlow::ProposalDraft(ProposalDraftFlow::new()), &ctx)
            .unwrap();
        assert_eq!(engine.cancel(ADMIN), Some(FlowKind::ProposalDraft));
        assert_eq!(engine.active_kind(ADMIN), None);
    }
}
