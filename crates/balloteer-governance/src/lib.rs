//! Governance core for Balloteer: the entity store, weighted tallying, and
//! the proposal lifecycle.
//!
//! Everything here is synchronous and free of I/O. The caller (the engine in
//! `balloteer-core`) owns the single [`EntityStore`] instance, feeds it one
//! event at a time, and writes the records returned by each mutator through
//! to persistence.
//!
//! # Modules
//!
//! - [`store`] -- Communities, voters, admin claims and onboarding decisions
//! - [`tally`] -- Ballot casting, outcome resolution, consistency checks
//! - [`lifecycle`] -- Publish, open-for-voting predicate, close triggers
//! - [`error`] -- [`GovernanceError`]

pub mod error;
pub mod lifecycle;
pub mod store;
pub mod tally;

pub use error::GovernanceError;
pub use lifecycle::{CloseResult, Closure, ProposalDraft, Published};
pub use store::{CommunityChange, EntityStore};
pub use tally::{CastReceipt, TallyAnomaly, TallyCheck};
