//! Seams to the outside world the engine consumes: the persistence gateway
//! and the identity (wallet link) lookup.
//!
//! Both traits are synchronous. Implementations backed by async I/O bridge
//! into their runtime themselves, so the engine's single event loop stays a
//! plain sequence of calls. The in-memory implementations here back the
//! tests and local runs without a database.

use std::collections::{BTreeMap, BTreeSet};

use balloteer_types::{ActorId, Community, CommunityId, Proposal, Voter};

/// Errors raised by a gateway implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The backend refused or failed the operation.
    #[error("backend error: {message}")]
    Backend {
        /// Description from the backend.
        message: String,
    },

    /// The record references a community the backend does not know.
    #[error("community {0} is unknown to the backend")]
    UnknownCommunity(CommunityId),
}

/// Everything persisted, as loaded at boot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedState {
    /// Every community with its voters and proposals.
    pub communities: Vec<Community>,
    /// Admin actor -> administered communities.
    pub admin_index: BTreeMap<ActorId, BTreeSet<CommunityId>>,
}

impl LoadedState {
    /// Wrap loaded communities, deriving the admin index from them.
    pub fn from_communities(communities: Vec<Community>) -> Self {
        let mut admin_index: BTreeMap<ActorId, BTreeSet<CommunityId>> = BTreeMap::new();
        for community in &communities {
            if let Some(admin) = community.admin_id {
                admin_index.entry(admin).or_default().insert(community.id);
            }
        }
        Self {
            communities,
            admin_index,
        }
    }
}

/// Durable storage for governance entities.
///
/// All writes are idempotent upserts keyed by natural identity. The engine
/// never deletes.
pub trait PersistenceGateway {
    /// Load the full state at boot.
    fn load_all(&mut self) -> Result<LoadedState, GatewayError>;

    /// Create or update a community header.
    fn upsert_community(
        &mut self,
        id: CommunityId,
        title: &str,
        admin_id: Option<ActorId>,
    ) -> Result<(), GatewayError>;

    /// Store the next proposal id of a community.
    fn set_proposal_counter(&mut self, id: CommunityId, value: u32) -> Result<(), GatewayError>;

    /// Create or update a voter.
    fn upsert_voter(&mut self, community: CommunityId, voter: &Voter) -> Result<(), GatewayError>;

    /// Create or update a proposal.
    fn upsert_proposal(
        &mut self,
        community: CommunityId,
        proposal: &Proposal,
    ) -> Result<(), GatewayError>;
}

/// Read-only lookup of verified wallet links.
pub trait IdentityLookup {
    /// Whether `actor` has a verified wallet binding.
    fn has_verified_wallet(&mut self, actor: ActorId) -> Result<bool, GatewayError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Persistence gateway that keeps everything in a map.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    communities: BTreeMap<CommunityId, Community>,
    writes: usize,
    failing: bool,
}

impl MemoryGateway {
    /// An empty gateway.
    pub const fn new() -> Self {
        Self {
            communities: BTreeMap::new(),
            writes: 0,
            failing: false,
        }
    }

    /// A gateway pre-populated with `communities`.
    pub fn with_communities(communities: impl IntoIterator<Item = Community>) -> Self {
        Self {
            communities: communities.into_iter().map(|c| (c.id, c)).collect(),
            writes: 0,
            failing: false,
        }
    }

    /// Make every subsequent write fail (or succeed again).
    pub const fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Number of successful writes.
    pub const fn writes(&self) -> usize {
        self.writes
    }

    /// The persisted copy of a community.
    pub fn community(&self, id: CommunityId) -> Option<&Community> {
        self.communities.get(&id)
    }

    fn write(&mut self, id: CommunityId) -> Result<&mut Community, GatewayError> {
        if self.failing {
            return Err(GatewayError::Backend {
                message: String::from("write refused"),
            });
        }
        self.writes = self.writes.saturating_add(1);
        self.communities
            .get_mut(&id)
            .ok_or(GatewayError::UnknownCommunity(id))
    }
}

impl PersistenceGateway for MemoryGateway {
    fn load_all(&mut self) -> Result<LoadedState, GatewayError> {
        Ok(LoadedState::from_communities(
            self.communities.values().cloned().collect(),
        ))
    }

    fn upsert_community(
        &mut self,
        id: CommunityId,
        title: &str,
        admin_id: Option<ActorId>,
    ) -> Result<(), GatewayError> {
        if self.failing {
            return Err(GatewayError::Backend {
                message: String::from("write refused"),
            });
        }
        self.writes = self.writes.saturating_add(1);
        let community = self
            .communities
            .entry(id)
            .or_insert_with(|| Community::new(id, title.to_owned()));
        title.clone_into(&mut community.title);
        community.admin_id = admin_id;
        Ok(())
    }

    fn set_proposal_counter(&mut self, id: CommunityId, value: u32) -> Result<(), GatewayError> {
        self.write(id)?.proposal_counter = value;
        Ok(())
    }

    fn upsert_voter(&mut self, community: CommunityId, voter: &Voter) -> Result<(), GatewayError> {
        self.write(community)?.voters.insert(voter.id, voter.clone());
        Ok(())
    }

    fn upsert_proposal(
        &mut self,
        community: CommunityId,
        proposal: &Proposal,
    ) -> Result<(), GatewayError> {
        let stored = self.write(community)?;
        match stored.proposals.iter_mut().find(|p| p.id == proposal.id) {
            Some(existing) => existing.clone_from(proposal),
            None => stored.proposals.push(proposal.clone()),
        }
        Ok(())
    }
}

/// Identity lookup answering from a fixed set.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    verified: BTreeSet<ActorId>,
    allow_all: bool,
}

impl StaticIdentity {
    /// Every actor counts as verified.
    pub const fn allow_all() -> Self {
        Self {
            verified: BTreeSet::new(),
            allow_all: true,
        }
    }

    /// Only the listed actors count as verified.
    pub fn verified(actors: impl IntoIterator<Item = ActorId>) -> Self {
        Self {
            verified: actors.into_iter().collect(),
            allow_all: false,
        }
    }
}

impl IdentityLookup for StaticIdentity {
    fn has_verified_wallet(&mut self, actor: ActorId) -> Result<bool, GatewayError> {
        Ok(self.allow_all || self.verified.contains(&actor))
    }
}
