//! `PostgreSQL`-backed persistence gateway and identity lookup.
//!
//! # Sync/Async Bridge
//!
//! The [`PersistenceGateway`] and [`IdentityLookup`] traits are synchronous
//! so the engine stays a plain sequence of calls. The queries are async, so
//! each call enters [`tokio::task::block_in_place`] and drives the query with
//! the runtime handle captured at construction. This requires the
//! multi-threaded runtime.

use std::future::Future;

use tokio::runtime::Handle;

use balloteer_core::{GatewayError, IdentityLookup, LoadedState, PersistenceGateway};
use balloteer_db::{DbError, PostgresPool};
use balloteer_types::{ActorId, CommunityId, Proposal, Voter};

/// Run `query` to completion from synchronous code.
fn bridge<T>(
    handle: &Handle,
    query: impl Future<Output = Result<T, DbError>>,
) -> Result<T, GatewayError> {
    tokio::task::block_in_place(|| handle.block_on(query)).map_err(|e| GatewayError::Backend {
        message: e.to_string(),
    })
}

/// Write-through persistence into `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgGateway {
    db: PostgresPool,
    handle: Handle,
}

impl PgGateway {
    /// Wrap `db`, bridging through the current runtime.
    pub fn new(db: PostgresPool) -> Self {
        Self {
            db,
            handle: Handle::current(),
        }
    }
}

impl PersistenceGateway for PgGateway {
    fn load_all(&mut self) -> Result<LoadedState, GatewayError> {
        let communities = bridge(&self.handle, self.db.communities().load_all())?;
        Ok(LoadedState::from_communities(communities))
    }

    fn upsert_community(
        &mut self,
        id: CommunityId,
        title: &str,
        admin_id: Option<ActorId>,
    ) -> Result<(), GatewayError> {
        bridge(
            &self.handle,
            self.db.communities().upsert_community(id, title, admin_id),
        )
    }

    fn set_proposal_counter(&mut self, id: CommunityId, value: u32) -> Result<(), GatewayError> {
        bridge(
            &self.handle,
            self.db.communities().set_proposal_counter(id, value),
        )
    }

    fn upsert_voter(&mut self, community: CommunityId, voter: &Voter) -> Result<(), GatewayError> {
        bridge(&self.handle, self.db.communities().upsert_voter(community, voter))
    }

    fn upsert_proposal(
        &mut self,
        community: CommunityId,
        proposal: &Proposal,
    ) -> Result<(), GatewayError> {
        bridge(
            &self.handle,
            self.db.communities().upsert_proposal(community, proposal),
        )
    }
}

/// Wallet-link lookup against the `wallet_links` table.
#[derive(Debug, Clone)]
pub struct PgIdentity {
    db: PostgresPool,
    handle: Handle,
}

impl PgIdentity {
    /// Wrap `db`, bridging through the current runtime.
    pub fn new(db: PostgresPool) -> Self {
        Self {
            db,
            handle: Handle::current(),
        }
    }
}

impl IdentityLookup for PgIdentity {
    fn has_verified_wallet(&mut self, actor: ActorId) -> Result<bool, GatewayError> {
        bridge(&self.handle, self.db.wallet_links().has_verified_wallet(actor))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn bridge_maps_db_errors_to_backend() {
        let handle = Handle::current();
        let result: Result<(), GatewayError> = bridge(&handle, async {
            Err(DbError::Config(String::from("bad url")))
        });
        assert_eq!(
            result,
            Err(GatewayError::Backend {
                message: String::from("Configuration error: bad url")
            })
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bridge_returns_query_value() {
        let handle = Handle::current();
        let value = bridge(&handle, async { Ok::<_, DbError>(7_u32) }).unwrap();
        assert_eq!(value, 7);
    }
}
