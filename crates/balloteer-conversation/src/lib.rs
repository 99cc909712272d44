//! Conversation engine for Balloteer.
//!
//! Multi-step interactions (drafting a proposal, changing a voter's weight,
//! approving a voter with a custom weight) are modelled as small state
//! machines that survive between unrelated messages. Flows only validate and
//! collect; the caller applies the finished result through the same entity
//! store mutators the direct-command path uses.
//!
//! # Modules
//!
//! - [`flow`] -- The [`Flow`] trait, step context and limits
//! - [`input`] -- Parsers for free-text answers
//! - [`draft`] -- Proposal drafting
//! - [`weight`] -- Weight change
//! - [`approval`] -- Custom-weight approval
//! - [`engine`] -- [`ConversationEngine`], the per-actor flow table

pub mod approval;
pub mod draft;
pub mod engine;
pub mod error;
pub mod flow;
pub mod input;
pub mod weight;

pub use approval::{ApprovalWeightFlow, CustomApproval};
pub use draft::{DraftReady, ProposalDraftFlow};
pub use engine::{ActiveFlow, ConversationEngine, Finished, PendingPrompt, Progress};
pub use error::ConversationError;
pub use flow::{Advance, Flow, FlowLimits, StepContext};
pub use weight::{WeightChangeFlow, WeightChangeRequest};
