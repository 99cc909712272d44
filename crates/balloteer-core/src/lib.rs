//! Command dispatch, persistence seams, and scheduling for Balloteer.
//!
//! This crate wires the governance core and the conversation engine into a
//! single [`Engine`] that accepts one [`Command`](balloteer_types::Command)
//! at a time and answers with a [`Dispatch`](balloteer_types::Dispatch).
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `balloteer-config.yaml`
//! - [`engine`] -- The [`Engine`] and its per-command operations
//! - [`gateway`] -- [`PersistenceGateway`] and [`IdentityLookup`] seams with
//!   in-memory implementations
//! - [`runner`] -- The serial event loop
//! - [`scheduler`] -- Auto-close timers and the periodic sweep
//! - [`error`] -- [`EngineError`]

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod runner;
pub mod scheduler;

pub use config::{BalloteerConfig, ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::EngineError;
pub use gateway::{
    GatewayError, IdentityLookup, LoadedState, MemoryGateway, PersistenceGateway, StaticIdentity,
};
pub use runner::{DiscardSink, ReplySink, RunSummary, run_engine};
pub use scheduler::AutoCloseScheduler;
