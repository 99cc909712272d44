//! `PostgreSQL` persistence for the Balloteer governance engine.
//!
//! The engine keeps its full state in memory and writes every change
//! through to `PostgreSQL`; the database is read once, at boot.
//!
//! ```text
//! Engine operation
//!     |
//!     +-- mutate EntityStore (memory)
//!     |
//!     +-- write-through --> PostgresPool
//!         |-- CommunityStore   (communities, voters, proposals)
//!         +-- WalletLinkStore  (read-only identity lookup)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration and migrations
//! - [`community_store`] -- Load-all and idempotent upserts
//! - [`wallet_links`] -- Verified wallet lookup
//! - [`error`] -- Shared error types

pub mod community_store;
pub mod error;
pub mod postgres;
pub mod wallet_links;

pub use community_store::{CommunityRow, CommunityStore, ProposalRow, VoterRow};
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use wallet_links::WalletLinkStore;
