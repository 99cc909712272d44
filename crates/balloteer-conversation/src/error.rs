//! Error types for the conversation crate.

use balloteer_types::{FlowKind, PromptStep, RejectReason};

/// Errors raised while starting or advancing a conversation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    /// The input does not fit the current step. The flow stays on that step.
    #[error("invalid input at step {step:?}: {reason}")]
    InvalidStepInput {
        /// The step that is still waiting.
        step: PromptStep,
        /// What was wrong with the input.
        reason: String,
    },

    /// The actor already has a conversation open.
    #[error("a {kind:?} conversation is already open")]
    FlowAlreadyActive {
        /// The open conversation's kind.
        kind: FlowKind,
    },

    /// The actor has no (matching) conversation open.
    #[error("no conversation is open")]
    NoActiveFlow,

    /// The flow's context no longer holds and it was discarded.
    #[error("{kind:?} conversation discarded: {reason}")]
    FlowInvalidated {
        /// The discarded conversation's kind.
        kind: FlowKind,
        /// Why it no longer holds.
        reason: String,
    },
}

impl ConversationError {
    /// The user-facing rejection reason for this error.
    pub const fn reason(&self) -> RejectReason {
        match self {
            Self::InvalidStepInput { .. } => RejectReason::InvalidStepInput,
            Self::FlowAlreadyActive { .. } => RejectReason::FlowAlreadyActive,
            Self::NoActiveFlow => RejectReason::NoActiveFlow,
            Self::FlowInvalidated { .. } => RejectReason::FlowInvalidated,
        }
    }

    pub(crate) fn invalid(step: PromptStep, reason: impl Into<String>) -> Self {
        Self::InvalidStepInput {
            step,
            reason: reason.into(),
        }
    }
}
