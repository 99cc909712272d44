//! Persistence of communities, voters and proposals.
//!
//! Every write is an idempotent upsert keyed by natural identity, so
//! replaying a write after a partial failure is harmless. Nothing is ever
//! deleted.
//!
//! Columns added after the first schema (`processed`, audit fields) are
//! nullable and defaulted with `COALESCE` when rows are loaded, so domain
//! code never sees a missing value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use balloteer_types::{
    ActorId, Attachment, Community, CommunityId, Proposal, ProposalId, ProposalStatus, Voter,
};

use crate::error::DbError;

/// Operations on the `communities`, `voters` and `proposals` tables.
#[derive(Debug, Clone, Copy)]
pub struct CommunityStore<'a> {
    pool: &'a PgPool,
}

impl<'a> CommunityStore<'a> {
    /// Bind the store to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Load every community with its voters and proposals.
    ///
    /// Proposals come back in ascending id order.
    pub async fn load_all(&self) -> Result<Vec<Community>, DbError> {
        let community_rows = sqlx::query_as::<_, CommunityRow>(
            r"SELECT id, title, admin_id, proposal_counter
              FROM communities
              ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;

        let voter_rows = sqlx::query_as::<_, VoterRow>(
            r"SELECT community_id, voter_id, display_name,
                     COALESCE(approved, FALSE) AS approved,
                     weight,
                     COALESCE(processed, FALSE) AS processed,
                     wallet_address, last_change_reason, last_modified_at
              FROM voters
              ORDER BY community_id, voter_id",
        )
        .fetch_all(self.pool)
        .await?;

        let proposal_rows = sqlx::query_as::<_, ProposalRow>(
            r"SELECT community_id, proposal_id, title, options,
                     COALESCE(votes, '{}'::jsonb) AS votes,
                     COALESCE(voter_map, '{}'::jsonb) AS voter_map,
                     status, quorum_weight, ends_at, created_by, attachment
              FROM proposals
              ORDER BY community_id, proposal_id",
        )
        .fetch_all(self.pool)
        .await?;

        let voter_count = voter_rows.len();
        let proposal_count = proposal_rows.len();
        let communities = assemble(community_rows, voter_rows, proposal_rows)?;

        tracing::info!(
            communities = communities.len(),
            voters = voter_count,
            proposals = proposal_count,
            "Loaded governance state"
        );
        Ok(communities)
    }

    /// Create a community or refresh its title. An existing admin is never
    /// replaced.
    pub async fn upsert_community(
        &self,
        id: CommunityId,
        title: &str,
        admin_id: Option<ActorId>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r"INSERT INTO communities (id, title, admin_id)
              VALUES ($1, $2, $3)
              ON CONFLICT (id) DO UPDATE
              SET title = EXCLUDED.title,
                  admin_id = COALESCE(communities.admin_id, EXCLUDED.admin_id),
                  updated_at = now()",
        )
        .bind(id.into_inner())
        .bind(title)
        .bind(admin_id.map(ActorId::into_inner))
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Store the next proposal id of a community.
    pub async fn set_proposal_counter(&self, id: CommunityId, value: u32) -> Result<(), DbError> {
        let result = sqlx::query(
            r"UPDATE communities
              SET proposal_counter = $2, updated_at = now()
              WHERE id = $1",
        )
        .bind(id.into_inner())
        .bind(i64::from(value))
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::MissingCommunity(id.into_inner()));
        }
        Ok(())
    }

    /// Create or update a voter.
    pub async fn upsert_voter(&self, community: CommunityId, voter: &Voter) -> Result<(), DbError> {
        let weight = voter
            .weight
            .map(|w| to_i64("weight", w))
            .transpose()?;

        sqlx::query(
            r"INSERT INTO voters (community_id, voter_id, display_name, approved, weight,
                                  processed, wallet_address, last_change_reason, last_modified_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
              ON CONFLICT (community_id, voter_id) DO UPDATE
              SET display_name = EXCLUDED.display_name,
                  approved = EXCLUDED.approved,
                  weight = EXCLUDED.weight,
                  processed = EXCLUDED.processed,
                  wallet_address = EXCLUDED.wallet_address,
                  last_change_reason = EXCLUDED.last_change_reason,
                  last_modified_at = EXCLUDED.last_modified_at",
        )
        .bind(community.into_inner())
        .bind(voter.id.into_inner())
        .bind(&voter.display_name)
        .bind(voter.approved)
        .bind(weight)
        .bind(voter.processed)
        .bind(voter.wallet_address.as_deref())
        .bind(voter.last_change_reason.as_deref())
        .bind(voter.last_modified_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Create or update a proposal, tallies included.
    pub async fn upsert_proposal(
        &self,
        community: CommunityId,
        proposal: &Proposal,
    ) -> Result<(), DbError> {
        let quorum = proposal
            .quorum_weight
            .map(|q| to_i64("quorum_weight", q))
            .transpose()?;

        sqlx::query(
            r"INSERT INTO proposals (community_id, proposal_id, title, options, votes, voter_map,
                                     status, quorum_weight, ends_at, created_by, attachment)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
              ON CONFLICT (community_id, proposal_id) DO UPDATE
              SET title = EXCLUDED.title,
                  options = EXCLUDED.options,
                  votes = EXCLUDED.votes,
                  voter_map = EXCLUDED.voter_map,
                  status = EXCLUDED.status,
                  quorum_weight = EXCLUDED.quorum_weight,
                  ends_at = EXCLUDED.ends_at,
                  created_by = EXCLUDED.created_by,
                  attachment = EXCLUDED.attachment,
                  updated_at = now()",
        )
        .bind(community.into_inner())
        .bind(i64::from(proposal.id.into_inner()))
        .bind(&proposal.title)
        .bind(Json(&proposal.options))
        .bind(Json(&proposal.votes))
        .bind(Json(&proposal.voter_map))
        .bind(proposal.status.as_db_str())
        .bind(quorum)
        .bind(proposal.ends_at)
        .bind(proposal.created_by.map(ActorId::into_inner))
        .bind(proposal.attachment.as_ref().map(Json))
        .execute(self.pool)
        .await?;

        tracing::debug!(
            community_id = %community,
            proposal_id = %proposal.id,
            status = proposal.status.as_db_str(),
            "Proposal written"
        );
        Ok(())
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A row from the `communities` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommunityRow {
    /// Group chat id.
    pub id: i64,
    /// Group title.
    pub title: String,
    /// Admin actor id, if claimed.
    pub admin_id: Option<i64>,
    /// Next proposal id.
    pub proposal_counter: i64,
}

impl CommunityRow {
    /// Convert into an empty domain community.
    pub fn into_community(self) -> Result<Community, DbError> {
        let mut community = Community::new(CommunityId::new(self.id), self.title);
        community.admin_id = self.admin_id.map(ActorId::new);
        community.proposal_counter = to_u32("proposal_counter", self.proposal_counter)?;
        Ok(community)
    }
}

/// A row from the `voters` table, with load-time defaults applied.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VoterRow {
    /// Owning community.
    pub community_id: i64,
    /// Voter actor id.
    pub voter_id: i64,
    /// Display name.
    pub display_name: String,
    /// Approval state.
    pub approved: bool,
    /// Voting weight.
    pub weight: Option<i64>,
    /// Whether a first decision was made.
    pub processed: bool,
    /// Bound wallet address.
    pub wallet_address: Option<String>,
    /// Reason for the last change.
    pub last_change_reason: Option<String>,
    /// Time of the last change.
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl VoterRow {
    /// Convert into a domain voter.
    pub fn into_voter(self) -> Result<Voter, DbError> {
        Ok(Voter {
            id: ActorId::new(self.voter_id),
            display_name: self.display_name,
            approved: self.approved,
            weight: self.weight.map(|w| to_u64("weight", w)).transpose()?,
            processed: self.processed,
            wallet_address: self.wallet_address,
            last_change_reason: self.last_change_reason,
            last_modified_at: self.last_modified_at,
        })
    }
}

/// A row from the `proposals` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProposalRow {
    /// Owning community.
    pub community_id: i64,
    /// Per-community proposal id.
    pub proposal_id: i64,
    /// The question.
    pub title: String,
    /// Option labels.
    pub options: Json<Vec<String>>,
    /// Weight per option index.
    pub votes: Json<BTreeMap<usize, u64>>,
    /// Current option per voter.
    pub voter_map: Json<BTreeMap<ActorId, usize>>,
    /// `OPEN` or `CLOSED`.
    pub status: String,
    /// Quorum, if any.
    pub quorum_weight: Option<i64>,
    /// Deadline, if any.
    pub ends_at: Option<DateTime<Utc>>,
    /// Publishing admin.
    pub created_by: Option<i64>,
    /// Context document.
    pub attachment: Option<Json<Attachment>>,
}

impl ProposalRow {
    /// Convert into a domain proposal.
    pub fn into_proposal(self) -> Result<Proposal, DbError> {
        Ok(Proposal {
            id: ProposalId::new(to_u32("proposal_id", self.proposal_id)?),
            title: self.title,
            options: self.options.0,
            votes: self.votes.0,
            voter_map: self.voter_map.0,
            status: ProposalStatus::from_db_str(&self.status),
            quorum_weight: self
                .quorum_weight
                .map(|q| to_u64("quorum_weight", q))
                .transpose()?,
            ends_at: self.ends_at,
            created_by: self.created_by.map(ActorId::new),
            attachment: self.attachment.map(|a| a.0),
        })
    }
}

/// Group loaded rows into communities.
pub fn assemble(
    communities: Vec<CommunityRow>,
    voters: Vec<VoterRow>,
    proposals: Vec<ProposalRow>,
) -> Result<Vec<Community>, DbError> {
    let mut by_id: BTreeMap<i64, Community> = BTreeMap::new();
    for row in communities {
        by_id.insert(row.id, row.into_community()?);
    }
    for row in voters {
        let owner = row.community_id;
        let voter = row.into_voter()?;
        by_id
            .get_mut(&owner)
            .ok_or(DbError::MissingCommunity(owner))?
            .voters
            .insert(voter.id, voter);
    }
    for row in proposals {
        let owner = row.community_id;
        let proposal = row.into_proposal()?;
        by_id
            .get_mut(&owner)
            .ok_or(DbError::MissingCommunity(owner))?
            .proposals
            .push(proposal);
    }
    for community in by_id.values_mut() {
        community.proposals.sort_by_key(|p| p.id);
    }
    Ok(by_id.into_values().collect())
}

fn to_i64(column: &'static str, value: u64) -> Result<i64, DbError> {
    i64::try_from(value)
        .ok()
        .ok_or_else(|| DbError::out_of_range(column, value))
}

fn to_u64(column: &'static str, value: i64) -> Result<u64, DbError> {
    u64::try_from(value)
        .ok()
        .ok_or_else(|| DbError::out_of_range(column, value))
}

fn to_u32(column: &'static str, value: i64) -> Result<u32, DbError> {
    u32::try_from(value)
        .ok()
        .ok_or_else(|| DbError::out_of_range(column, value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn community_row(id: i64) -> CommunityRow {
        CommunityRow {
            id,
            title: String::from("dao"),
            admin_id: Some(1),
            proposal_counter: 3,
        }
    }

    fn voter_row(community_id: i64, voter_id: i64, weight: Option<i64>) -> VoterRow {
        VoterRow {
            community_id,
            voter_id,
            display_name: String::from("v"),
            approved: weight.is_some(),
            weight,
            processed: true,
            wallet_address: None,
            last_change_reason: None,
            last_modified_at: None,
        }
    }

    fn proposal_row(community_id: i64, proposal_id: i64, status: &str) -> ProposalRow {
        ProposalRow {
            community_id,
            proposal_id,
            title: String::from("Q?"),
            options: Json(vec![String::from("Yes"), String::from("No")]),
            votes: Json(BTreeMap::from([(0, 3)])),
            voter_map: Json(BTreeMap::from([(ActorId::new(2), 0)])),
            status: status.to_owned(),
            quorum_weight: Some(5),
            ends_at: None,
            created_by: Some(1),
            attachment: None,
        }
    }

    #[test]
    fn rows_assemble_into_sorted_communities() {
        let communities = assemble(
            vec![community_row(-100)],
            vec![voter_row(-100, 2, Some(3))],
            vec![proposal_row(-100, 2, "CLOSED"), proposal_row(-100, 1, "OPEN")],
        )
        .unwrap();

        assert_eq!(communities.len(), 1);
        let community = &communities[0];
        assert_eq!(community.admin_id, Some(ActorId::new(1)));
        assert_eq!(community.proposal_counter, 3);
        assert_eq!(community.voters[&ActorId::new(2)].weight, Some(3));
        assert_eq!(community.proposals[0].id, ProposalId::new(1));
        assert_eq!(community.proposals[0].status, ProposalStatus::Open);
        assert_eq!(community.proposals[1].status, ProposalStatus::Closed);
    }

    #[test]
    fn unknown_status_loads_as_closed() {
        let proposal = proposal_row(-100, 1, "ARCHIVED").into_proposal().unwrap();
        assert_eq!(proposal.status, ProposalStatus::Closed);
    }

    #[test]
    fn negative_weight_is_out_of_range() {
        let result = voter_row(-100, 2, Some(-4)).into_voter();
        assert!(matches!(
            result,
            Err(DbError::OutOfRange {
                column: "weight",
                ..
            })
        ));
    }

    #[test]
    fn voter_without_community_row_is_rejected() {
        let result = assemble(Vec::new(), vec![voter_row(-7, 2, None)], Vec::new());
        assert!(matches!(result, Err(DbError::MissingCommunity(-7))));
    }

    #[test]
    fn vote_maps_round_trip_through_jsonb_shape() {
        let votes: BTreeMap<usize, u64> = BTreeMap::from([(0, 3), (1, 4)]);
        let json = serde_json::to_value(&votes).unwrap();
        assert_eq!(json["1"], 4);
        let back: BTreeMap<usize, u64> = serde_json::from_value(json).unwrap();
        assert_eq!(back, votes);
    }
}
