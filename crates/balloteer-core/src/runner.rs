//! The serial event loop.
//!
//! [`run_engine`] drains one inbound channel and hands each command to the
//! engine, one at a time. Router traffic and scheduler checks share that
//! channel, so no two operations ever overlap. After each command it arms
//! any new deadlines and passes the resulting [`Dispatch`] to a
//! [`ReplySink`].

use chrono::Utc;
use tokio::sync::mpsc::Receiver;
use tracing::{error, info};

use balloteer_types::{ActorId, Command, Dispatch};

use crate::engine::Engine;
use crate::gateway::{IdentityLookup, PersistenceGateway};
use crate::scheduler::AutoCloseScheduler;

/// Delivers engine output back to the transport.
pub trait ReplySink: Send {
    /// Deliver `dispatch`. `actor` is who sent the command, `None` for
    /// scheduler commands.
    fn deliver(&mut self, actor: Option<ActorId>, dispatch: &Dispatch);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl ReplySink for DiscardSink {
    fn deliver(&mut self, _actor: Option<ActorId>, _dispatch: &Dispatch) {}
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Commands that produced a dispatch.
    pub handled: u64,
    /// Commands that failed on an infrastructure error.
    pub failed: u64,
}

/// Process commands until every sender of `inbound` is gone.
///
/// A failed write-through is logged and counted; the loop keeps going with
/// the in-memory state it has.
pub async fn run_engine<G, I>(
    engine: &mut Engine<G, I>,
    inbound: &mut Receiver<Command>,
    scheduler: &AutoCloseScheduler,
    sink: &mut dyn ReplySink,
) -> RunSummary
where
    G: PersistenceGateway,
    I: IdentityLookup,
{
    let mut summary = RunSummary::default();
    info!("Engine loop started");

    while let Some(command) = inbound.recv().await {
        let actor = command.actor();
        let name = command.name();
        match engine.handle(command, Utc::now()) {
            Ok(dispatch) => {
                for deadline in &dispatch.deadlines {
                    scheduler.arm(*deadline);
                }
                sink.deliver(actor, &dispatch);
                summary.handled = summary.handled.saturating_add(1);
            }
            Err(err) => {
                error!(command = name, actor_id = ?actor, error = %err, "Command failed");
                summary.failed = summary.failed.saturating_add(1);
            }
        }
    }

    info!(
        handled = summary.handled,
        failed = summary.failed,
        "Engine loop stopped"
    );
    summary
}
