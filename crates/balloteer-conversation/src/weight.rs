//! Weight change: community, voter, new weight, reason.

use balloteer_types::{ActorId, Choice, CommunityId, FlowInput, FlowKind, PromptStep};

use crate::error::ConversationError;
use crate::flow::{Advance, Flow, StepContext};
use crate::input;

/// A validated weight change, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightChangeRequest {
    /// The community.
    pub community_id: CommunityId,
    /// The approved voter whose weight changes.
    pub voter_id: ActorId,
    /// The new weight, at least 1.
    pub weight: u64,
    /// Reason to record, `unspecified` when skipped.
    pub reason: String,
}

/// Collects a weight change for an approved voter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightChangeFlow {
    step: PromptStep,
    community_id: Option<CommunityId>,
    voter_id: Option<ActorId>,
    weight: Option<u64>,
}

impl Default for WeightChangeFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightChangeFlow {
    /// A fresh flow waiting for the community.
    pub const fn new() -> Self {
        Self {
            step: PromptStep::CommunityChoice,
            community_id: None,
            voter_id: None,
            weight: None,
        }
    }

    fn is_approved_voter(ctx: &StepContext<'_>, community: CommunityId, voter: ActorId) -> bool {
        ctx.store
            .voter(community, voter)
            .is_ok_and(|v| v.approved)
    }
}

impl Flow for WeightChangeFlow {
    type Output = WeightChangeRequest;

    const KIND: FlowKind = FlowKind::WeightChange;

    fn step(&self) -> PromptStep {
        self.step
    }

    fn choices(&self, ctx: &StepContext<'_>) -> Vec<Choice> {
        match (self.step, self.community_id) {
            (PromptStep::CommunityChoice, _) => ctx.admin_choices(),
            (PromptStep::VoterChoice, Some(community)) => ctx.approved_voter_choices(community),
            _ => Vec::new(),
        }
    }

    fn invalidated(&self, ctx: &StepContext<'_>) -> Option<String> {
        if let Some(community) = self.community_id {
            if !ctx.administers(community) {
                return Some(format!("actor no longer administers community {community}"));
            }
            if let Some(voter) = self.voter_id {
                if !Self::is_approved_voter(ctx, community, voter) {
                    return Some(format!("voter {voter} is no longer approved"));
                }
            }
        }
        None
    }

    fn advance(
        &mut self,
        input: &FlowInput,
        ctx: &StepContext<'_>,
    ) -> Result<Advance<WeightChangeRequest>, ConversationError> {
        let step = self.step;
        let next = match (step, self.community_id, self.voter_id, self.weight) {
            (PromptStep::CommunityChoice, _, _, _) => {
                let community = input::community(step, input)?;
                if !ctx.administers(community) {
                    return Err(ConversationError::invalid(
                        step,
                        "you do not administer that community",
                    ));
                }
                self.community_id = Some(community);
                PromptStep::VoterChoice
            }
            (PromptStep::VoterChoice, Some(community), _, _) => {
                let voter = input::voter(step, input)?;
                if !Self::is_approved_voter(ctx, community, voter) {
                    return Err(ConversationError::invalid(
                        step,
                        "pick an approved voter of that community",
                    ));
                }
                self.voter_id = Some(voter);
                PromptStep::NewWeight
            }
            (PromptStep::NewWeight, Some(_), Some(_), _) => {
                self.weight = Some(input::positive(step, input)?);
                PromptStep::Reason
            }
            (PromptStep::Reason, Some(community_id), Some(voter_id), Some(weight)) => {
                let reason = input::reason(step, input)?;
                return Ok(Advance::Done(WeightChangeRequest {
                    community_id,
                    voter_id,
                    weight,
                    reason,
                }));
            }
            _ => {
                return Err(ConversationError::invalid(step, "not a weight-change step"));
            }
        };
        self.step = next;
        Ok(Advance::Next(next))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::unreachable)]
mod tests {
    use chrono::Utc;

    use balloteer_governance::EntityStore;

    use super::*;
    use crate::flow::FlowLimits;

    const GROUP: CommunityId = CommunityId::new(-100);
    const ADMIN: ActorId = ActorId::new(1);
    const ALICE: ActorId = ActorId::new(2);
    const BOB: ActorId = ActorId::new(3);

    fn store() -> EntityStore {
        let mut store = EntityStore::new();
        store.create_or_get_community(GROUP, "dao");
        store.claim_admin_if_unset(GROUP, ADMIN).unwrap();
        store.register_voter_if_absent(GROUP, ALICE, "alice").unwrap();
        store
            .set_voter_decision(GROUP, ALICE, true, Some(1), None, Utc::now())
            .unwrap();
        store.register_voter_if_absent(GROUP, BOB, "bob").unwrap();
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
    fn weight_change_completes_with_skipped_reason() {
        let store = store();
        let ctx = ctx(&store);
        let mut flow = WeightChangeFlow::new();

        flow.advance(&FlowInput::Community { community_id: GROUP }, &ctx)
            .unwrap();
        assert_eq!(flow.choices(&ctx).len(), 1, "only alice is approved");
        flow.advance(&FlowInput::Voter { voter_id: ALICE }, &ctx).unwrap();
        flow.advance(&FlowInput::text("4"), &ctx).unwrap();
        let Advance::Done(request) = flow.advance(&FlowInput::text("skip"), &ctx).unwrap() else {
            unreachable!()
        };
        assert_eq!(request.voter_id, ALICE);
        assert_eq!(request.weight, 4);
        assert_eq!(request.reason, "unspecified");
    }

    #[test]
    fn unapproved_voter_cannot_be_picked() {
        let store = store();
        let ctx = ctx(&store);
        let mut flow = WeightChangeFlow::new();
        flow.advance(&FlowInput::Community { community_id: GROUP }, &ctx)
            .unwrap();
        let result = flow.advance(&FlowInput::Voter { voter_id: BOB }, &ctx);
        assert!(result.is_err());
        assert_eq!(flow.step(), PromptStep::VoterChoice);
    }

    #[test]
    fn zero_weight_keeps_flow_at_new_weight() {
        let store = store();
        let ctx = ctx(&store);
        let mut flow = WeightChangeFlow::new();
        flow.advance(&FlowInput::Community { community_id: GROUP }, &ctx)
            .unwrap();
        flow.advance(&FlowInput::Voter { voter_id: ALICE }, &ctx).unwrap();
        assert!(flow.advance(&FlowInput::text("0"), &ctx).is_err());
        assert_eq!(flow.step(), PromptStep::NewWeight);
    }

    #[test]
    fn non_admin_sees_no_communities_and_cannot_pick_one() {
        let store = store();
        let ctx = StepContext {
            actor: ALICE,
            ..ctx(&store)
        };
        let mut flow = WeightChangeFlow::new();
        assert!(flow.choices(&ctx).is_empty());
        assert!(flow
            .advance(&FlowInput::Community { community_id: GROUP }, &ctx)
            .is_err());
    }

    #[test]
    fn lost_authority_invalidates_the_flow() {
        let store = store();
        let mut flow = WeightChangeFlow::new();
        flow.advance(&FlowInput::Community { community_id: GROUP }, &ctx(&store))
            .unwrap();

        let outsider = StepContext {
            actor: BOB,
            ..ctx(&store)
        };
        assert!(flow.invalidated(&outsider).is_some());
        assert!(flow.invalidated(&ctx(&store)).is_none());
    }
}
