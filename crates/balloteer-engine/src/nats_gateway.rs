//! NATS transport between the dispatch router and the engine.
//!
//! # Subject Convention
//!
//! - **Inbound commands:** `{inbound_subject}` (default `balloteer.inbound`),
//!   one JSON-encoded [`Command`] per message.
//! - **Replies:** `{outbound_prefix}.reply.{actor_id}`, a JSON [`Reply`].
//! - **Private notices:** `{outbound_prefix}.actor.{actor_id}`, a JSON
//!   [`NoticeBody`].
//! - **Group notices:** `{outbound_prefix}.group.{community_id}`, a JSON
//!   [`NoticeBody`].
//!
//! Outbound delivery is best-effort: a failed publish is logged and
//! dropped, and engine state is unaffected.

use futures::StreamExt as _;
use tokio::runtime::Handle;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use balloteer_core::ReplySink;
use balloteer_types::{ActorId, Command, Dispatch, Recipient};

use crate::error::ServiceError;

/// Decode one inbound message.
pub fn decode_command(payload: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Subject a reply to `actor` is published on.
pub fn reply_subject(prefix: &str, actor: ActorId) -> String {
    format!("{prefix}.reply.{actor}")
}

/// Subject a notice to `recipient` is published on.
pub fn notice_subject(prefix: &str, recipient: Recipient) -> String {
    match recipient {
        Recipient::Actor { actor_id } => format!("{prefix}.actor.{actor_id}"),
        Recipient::Group { community_id } => format!("{prefix}.group.{community_id}"),
    }
}

/// Connect to NATS.
pub async fn connect(url: &str) -> Result<async_nats::Client, ServiceError> {
    async_nats::connect(url)
        .await
        .map_err(|e| ServiceError::Nats {
            message: format!("failed to connect to NATS at {url}: {e}"),
        })
}

/// Forward inbound commands into the engine's channel until shutdown.
///
/// Stops on Ctrl-C or when the subscription ends. Dropping the forwarder's
/// sender is what lets the engine loop drain and exit.
pub async fn spawn_inbound(
    client: &async_nats::Client,
    subject: &str,
    inbound: Sender<Command>,
) -> Result<JoinHandle<()>, ServiceError> {
    let mut subscription =
        client
            .subscribe(subject.to_owned())
            .await
            .map_err(|e| ServiceError::Nats {
                message: format!("failed to subscribe to {subject}: {e}"),
            })?;
    info!(subject, "Listening for commands");

    Ok(tokio::spawn(async move {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                message = subscription.next() => {
                    let Some(message) = message else {
                        warn!("Command subscription ended");
                        break;
                    };
                    match decode_command(&message.payload) {
                        Ok(command) => {
                            if inbound.send(command).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(
                            subject = %message.subject,
                            error = %e,
                            "Dropping undecodable command"
                        ),
                    }
                }
            }
        }
    }))
}

/// Publishes replies and notices back to the router.
#[derive(Debug)]
pub struct NatsReplySink {
    client: async_nats::Client,
    prefix: String,
    handle: Handle,
}

impl NatsReplySink {
    /// A sink publishing under `prefix`, bridging through the current
    /// runtime.
    pub fn new(client: async_nats::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_owned(),
            handle: Handle::current(),
        }
    }

    async fn publish_all(&self, actor: Option<ActorId>, dispatch: &Dispatch) {
        if let Some(actor) = actor {
            self.publish(reply_subject(&self.prefix, actor), &dispatch.reply)
                .await;
        }
        for notice in &dispatch.notices {
            self.publish(notice_subject(&self.prefix, notice.recipient), &notice.body)
                .await;
        }
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "Failed to flush outbound messages");
        }
    }

    async fn publish<T: serde::Serialize + Sync>(&self, subject: String, body: &T) {
        let payload = match serde_json::to_vec(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subject, error = %e, "Failed to encode outbound message");
                return;
            }
        };
        match self.client.publish(subject.clone(), payload.into()).await {
            Ok(()) => debug!(subject, "Published"),
            Err(e) => warn!(subject, error = %e, "Failed to publish outbound message"),
        }
    }
}

impl ReplySink for NatsReplySink {
    fn deliver(&mut self, actor: Option<ActorId>, dispatch: &Dispatch) {
        let handle = self.handle.clone();
        tokio::task::block_in_place(|| handle.block_on(self.publish_all(actor, dispatch)));
    }
}
