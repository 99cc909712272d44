//! The flow abstraction shared by every conversation.
//!
//! A flow is a small state machine: it sits on one [`PromptStep`], accepts
//! one [`FlowInput`] at a time, and either moves to the next step or finishes
//! with a typed output. Input is fully validated before any field changes, so
//! a failed [`Flow::advance`] leaves the flow exactly where it was.

use chrono::{DateTime, Utc};

use balloteer_governance::EntityStore;
use balloteer_types::{ActorId, Choice, CommunityId, FlowInput, FlowKind, PromptStep};

use crate::error::ConversationError;

/// Bounds applied to drafted proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowLimits {
    /// Most options a proposal may have.
    pub max_options: usize,
    /// Longest voting window, in minutes.
    pub max_duration_minutes: u64,
}

impl Default for FlowLimits {
    fn default() -> Self {
        Self {
            max_options: 10,
            max_duration_minutes: 43_200,
        }
    }
}

/// Read-only view of the world a step is validated against.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// The entity store.
    pub store: &'a EntityStore,
    /// The actor driving the flow.
    pub actor: ActorId,
    /// Current time.
    pub now: DateTime<Utc>,
    /// Draft bounds.
    pub limits: FlowLimits,
}

impl StepContext<'_> {
    /// Whether the actor still administers `community`.
    pub fn administers(&self, community: CommunityId) -> bool {
        self.store.is_admin(community, self.actor)
    }

    /// The communities the actor administers, as choices.
    pub fn admin_choices(&self) -> Vec<Choice> {
        self.store
            .administered_by(self.actor)
            .into_iter()
            .map(|c| Choice {
                id: c.id.into_inner(),
                label: c.title.clone(),
            })
            .collect()
    }

    /// The approved voters of `community`, as choices.
    pub fn approved_voter_choices(&self, community: CommunityId) -> Vec<Choice> {
        self.store
            .community(community)
            .map(|c| {
                c.voters
                    .values()
                    .filter(|v| v.approved)
                    .map(|v| Choice {
                        id: v.id.into_inner(),
                        label: v.display_name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Result of a successful [`Flow::advance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance<T> {
    /// The flow moved on and waits at this step.
    Next(PromptStep),
    /// The flow is complete.
    Done(T),
}

/// A multi-step conversation.
pub trait Flow {
    /// What the flow yields when it completes.
    type Output;

    /// Which conversation this is.
    const KIND: FlowKind;

    /// The step currently waiting for input.
    fn step(&self) -> PromptStep;

    /// Selectable entries for the current step (empty for free-text steps).
    fn choices(&self, ctx: &StepContext<'_>) -> Vec<Choice>;

    /// Why the flow can no longer complete, if its context has gone away.
    ///
    /// Checked before every step, and therefore before any terminal mutation.
    fn invalidated(&self, ctx: &StepContext<'_>) -> Option<String>;

    /// Validate `input` for the current step and move on.
    fn advance(
        &mut self,
        input: &FlowInput,
        ctx: &StepContext<'_>,
    ) -> Result<Advance<Self::Output>, ConversationError>;
}
