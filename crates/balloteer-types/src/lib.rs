//! Shared type definitions for the Balloteer governance engine.
//!
//! This crate is the single source of truth for the data that crosses crate
//! and process boundaries: entity records, the command type the dispatch
//! router produces, and the reply records it renders. Types flow downstream
//! to `TypeScript` via `ts-rs` for the web front end.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe wrappers for community, actor and proposal ids
//! - [`enums`] -- Lifecycle, decision, flow and rejection enums
//! - [`structs`] -- Community, voter, proposal and tally records
//! - [`commands`] -- The closed [`Command`] type consumed by the engine
//! - [`replies`] -- [`Reply`], [`Notice`] and [`Dispatch`] produced by the engine

pub mod commands;
pub mod enums;
pub mod ids;
pub mod replies;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use commands::{ChatContext, Command, FlowInput};
pub use enums::{
    AdminDecision, ChatKind, CloseTrigger, FlowKind, PostVoteClose, PromptStep, ProposalStatus,
    RejectReason,
};
pub use ids::{ActorId, CommunityId, ProposalId};
pub use replies::{Choice, Deadline, Dispatch, Notice, NoticeBody, Recipient, Reply};
pub use structs::{
    Attachment, BallotSummary, Community, CommunitySummary, MembershipSummary, OptionTally,
    Outcome, Proposal, ProposalSummary, TallySnapshot, Voter,
};
