//! Read access to verified wallet bindings.
//!
//! Links are written by the wallet verification service, not by the engine;
//! the engine only asks whether a verified link exists before accepting a
//! join request.

use sqlx::PgPool;

use balloteer_types::ActorId;

use crate::error::DbError;

/// Operations on the `wallet_links` table.
#[derive(Debug, Clone, Copy)]
pub struct WalletLinkStore<'a> {
    pool: &'a PgPool,
}

impl<'a> WalletLinkStore<'a> {
    /// Bind the store to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Whether `actor` has a verified wallet link.
    pub async fn has_verified_wallet(&self, actor: ActorId) -> Result<bool, DbError> {
        let row: (bool,) = sqlx::query_as(
            r"SELECT EXISTS (
                  SELECT 1 FROM wallet_links
                  WHERE actor_id = $1 AND verified
              )",
        )
        .bind(actor.into_inner())
        .fetch_one(self.pool)
        .await?;
        Ok(row.0)
    }
}
