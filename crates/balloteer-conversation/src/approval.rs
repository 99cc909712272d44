//! Custom-weight approval: the admin types the weight for a pending voter.

use balloteer_types::{ActorId, Choice, CommunityId, FlowInput, FlowKind, PromptStep};

use crate::error::ConversationError;
use crate::flow::{Advance, Flow, StepContext};
use crate::input;

/// An approval with an admin-chosen weight, ready to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomApproval {
    /// The community.
    pub community_id: CommunityId,
    /// The pending voter.
    pub voter_id: ActorId,
    /// The weight to grant, at least 1.
    pub weight: u64,
}

/// Single-step flow opened by the "approve with custom weight" decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalWeightFlow {
    community_id: CommunityId,
    voter_id: ActorId,
}

impl ApprovalWeightFlow {
    /// Ask for the weight of `voter_id` in `community_id`.
    pub const fn new(community_id: CommunityId, voter_id: ActorId) -> Self {
        Self {
            community_id,
            voter_id,
        }
    }
}

impl Flow for ApprovalWeightFlow {
    type Output = CustomApproval;

    const KIND: FlowKind = FlowKind::ApprovalWeight;

    fn step(&self) -> PromptStep {
        PromptStep::CustomWeight
    }

    fn choices(&self, _ctx: &StepContext<'_>) -> Vec<Choice> {
        Vec::new()
    }

    fn invalidated(&self, ctx: &StepContext<'_>) -> Option<String> {
        if !ctx.administers(self.community_id) {
            return Some(format!(
                "actor no longer administers community {}",
                self.community_id
            ));
        }
        match ctx.store.voter(self.community_id, self.voter_id) {
            Ok(voter) if voter.processed => {
                Some(format!("voter {} was already decided on", self.voter_id))
            }
            Ok(_) => None,
            Err(_) => Some(format!("voter {} no longer exists", self.voter_id)),
        }
    }

    fn advance(
        &mut self,
        input: &FlowInput,
        _ctx: &StepContext<'_>,
    ) -> Result<Advance<CustomApproval>, ConversationError> {
        let weight = input::positive(PromptStep::CustomWeight, input)?;
        Ok(Advance::Done(CustomApproval {
            community_id: self.community_id,
            voter_id: self.voter_id,
            weight,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use balloteer_governance::EntityStore;

    use super::*;
    use crate::flow::FlowLimits;

    const GROUP: CommunityId = CommunityId::new(-100);
    const ADMIN: ActorId = ActorId::new(1);
    const ALICE: ActorId = ActorId::new(2);

    #[test]
    fn custom_weight_is_collected_and_revalidated() {
        let mut store = EntityStore::new();
        store.create_or_get_community(GROUP, "dao");
        store.claim_admin_if_unset(GROUP, ADMIN).unwrap();
        store.register_voter_if_absent(GROUP, ALICE, "alice").unwrap();
        let ctx = StepContext {
            store: &store,
            actor: ADMIN,
            now: Utc::now(),
            limits: FlowLimits::default(),
        };

        let mut flow = ApprovalWeightFlow::new(GROUP, ALICE);
        assert!(flow.invalidated(&ctx).is_none());
        assert!(flow.advance(&FlowInput::text("zero"), &ctx).is_err());
        assert_eq!(
            flow.advance(&FlowInput::text("7"), &ctx).unwrap(),
            Advance::Done(CustomApproval {
                community_id: GROUP,
                voter_id: ALICE,
                weight: 7,
            })
        );
    }

    #[test]
    fn already_decided_voter_invalidates() {
        let mut store = EntityStore::new();
        store.create_or_get_community(GROUP, "dao");
        store.claim_admin_if_unset(GROUP, ADMIN).unwrap();
        store.register_voter_if_absent(GROUP, ALICE, "alice").unwrap();
        store
            .set_voter_decision(GROUP, ALICE, false, None, None, Utc::now())
            .unwrap();
        let ctx = StepContext {
            store: &store,
            actor: ADMIN,
            now: Utc::now(),
            limits: FlowLimits::default(),
        };
        assert!(ApprovalWeightFlow::new(GROUP, ALICE).invalidated(&ctx).is_some());
    }
}
