//! The entity store: authoritative in-memory owner of communities, voters
//! and proposals.
//!
//! The store is constructed once at boot from whatever the persistence layer
//! loaded ([`EntityStore::restore`]) and is then handed by reference to every
//! component. It performs no I/O. Every mutator returns the updated record so
//! the caller can write it through to persistence, and every mutator is
//! responsible for its own invariant checks:
//!
//! - an admin, once set, is never replaced implicitly;
//! - a weight is only present on an approved voter, and is never zero;
//! - a processed voter is never re-decided by the onboarding path.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use balloteer_types::{ActorId, Community, CommunityId, Proposal, ProposalId, Voter};

use crate::error::GovernanceError;

/// Authoritative store of all governance entities.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    /// Communities keyed by id.
    communities: BTreeMap<CommunityId, Community>,
    /// Reverse index: admin actor -> communities they administer.
    admin_index: BTreeMap<ActorId, BTreeSet<CommunityId>>,
}

/// Result of [`EntityStore::create_or_get_community`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunityChange {
    /// The community did not exist and was created.
    Created,
    /// The community existed and its title was refreshed.
    Renamed,
    /// The community existed unchanged.
    Unchanged,
}

impl CommunityChange {
    /// Whether the record differs from what persistence holds.
    pub const fn is_dirty(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl EntityStore {
    /// Create an empty store.
    pub const fn new() -> Self {
        Self {
            communities: BTreeMap::new(),
            admin_index: BTreeMap::new(),
        }
    }

    /// Rebuild a store from loaded records.
    ///
    /// Proposals are re-sorted by id and the admin index is derived from the
    /// communities themselves, so a stale persisted index can never disagree
    /// with the records.
    pub fn restore(communities: impl IntoIterator<Item = Community>) -> Self {
        let mut store = Self::new();
        for mut community in communities {
            community.proposals.sort_by_key(|p| p.id);
            if let Some(admin) = community.admin_id {
                store
                    .admin_index
                    .entry(admin)
                    .or_default()
                    .insert(community.id);
            }
            store.communities.insert(community.id, community);
        }
        info!(
            communities = store.communities.len(),
            admins = store.admin_index.len(),
            "Entity store restored"
        );
        store
    }

    /// Number of communities.
    pub fn len(&self) -> usize {
        self.communities.len()
    }

    /// Whether the store holds no communities.
    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    /// Iterate over all communities in id order.
    pub fn communities(&self) -> impl Iterator<Item = &Community> {
        self.communities.values()
    }

    /// The admin -> communities index.
    pub const fn admin_index(&self) -> &BTreeMap<ActorId, BTreeSet<CommunityId>> {
        &self.admin_index
    }

    /// Look up a community.
    pub fn community(&self, id: CommunityId) -> Result<&Community, GovernanceError> {
        self.communities
            .get(&id)
            .ok_or(GovernanceError::CommunityNotFound(id))
    }

    pub(crate) fn community_mut(
        &mut self,
        id: CommunityId,
    ) -> Result<&mut Community, GovernanceError> {
        self.communities
            .get_mut(&id)
            .ok_or(GovernanceError::CommunityNotFound(id))
    }

    /// Create the community if it is unknown, or refresh its title.
    ///
    /// Idempotent. Never touches the admin.
    pub fn create_or_get_community(
        &mut self,
        id: CommunityId,
        title: &str,
    ) -> (&Community, CommunityChange) {
        let mut change = CommunityChange::Unchanged;
        let community = self.communities.entry(id).or_insert_with(|| {
            change = CommunityChange::Created;
            Community::new(id, title.to_owned())
        });
        if change == CommunityChange::Unchanged && community.title != title {
            title.clone_into(&mut community.title);
            change = CommunityChange::Renamed;
        }
        if change == CommunityChange::Created {
            info!(community_id = %id, title, "Community created");
        }
        (community, change)
    }

    /// Make `actor` the admin if the community has none yet.
    ///
    /// Returns `true` iff this call performed the claim. Events are handled
    /// one at a time, so first writer wins without contention.
    pub fn claim_admin_if_unset(
        &mut self,
        id: CommunityId,
        actor: ActorId,
    ) -> Result<bool, GovernanceError> {
        let community = self.community_mut(id)?;
        if community.admin_id.is_some() {
            return Ok(false);
        }
        community.admin_id = Some(actor);
        self.admin_index.entry(actor).or_default().insert(id);
        info!(community_id = %id, admin_id = %actor, "Admin claimed community");
        Ok(true)
    }

    /// Whether `actor` is the admin of `community`.
    pub fn is_admin(&self, community: CommunityId, actor: ActorId) -> bool {
        self.communities
            .get(&community)
            .is_some_and(|c| c.admin_id == Some(actor))
    }

    /// Fail with [`GovernanceError::NotAuthorized`] unless `actor` administers
    /// `community`.
    pub fn require_admin(
        &self,
        community: CommunityId,
        actor: ActorId,
    ) -> Result<&Community, GovernanceError> {
        let found = self.community(community)?;
        if found.admin_id == Some(actor) {
            Ok(found)
        } else {
            Err(GovernanceError::NotAuthorized {
                actor_id: actor,
                community_id: community,
            })
        }
    }

    /// Communities administered by `actor`, in id order.
    pub fn administered_by(&self, actor: ActorId) -> Vec<&Community> {
        self.admin_index
            .get(&actor)
            .into_iter()
            .flatten()
            .filter_map(|id| self.communities.get(id))
            .collect()
    }

    /// Every community where `actor` is registered as a voter.
    pub fn memberships(&self, actor: ActorId) -> Vec<(&Community, &Voter)> {
        self.communities
            .values()
            .filter_map(|c| c.voters.get(&actor).map(|v| (c, v)))
            .collect()
    }

    /// Look up a voter.
    pub fn voter(&self, community: CommunityId, voter: ActorId) -> Result<&Voter, GovernanceError> {
        self.community(community)?
            .voters
            .get(&voter)
            .ok_or(GovernanceError::VoterNotFound {
                community_id: community,
                voter_id: voter,
            })
    }

    /// Register a voter if unknown; otherwise refresh only the display name.
    ///
    /// Never resets `approved`, `weight` or `processed`.
    pub fn register_voter_if_absent(
        &mut self,
        community: CommunityId,
        voter: ActorId,
        display_name: &str,
    ) -> Result<Voter, GovernanceError> {
        let found = self.community_mut(community)?;
        let record = found
            .voters
            .entry(voter)
            .and_modify(|v| {
                if v.display_name != display_name {
                    display_name.clone_into(&mut v.display_name);
                }
            })
            .or_insert_with(|| Voter::pending(voter, display_name.to_owned()));
        debug!(
            community_id = %community,
            voter_id = %voter,
            processed = record.processed,
            "Voter registered"
        );
        Ok(record.clone())
    }

    /// Apply the admin's first onboarding decision.
    ///
    /// Approval requires a non-zero weight; rejection clears the weight.
    /// Fails with [`GovernanceError::AlreadyProcessed`] when the voter was
    /// already decided on -- later changes go through
    /// [`change_voter_weight`](Self::change_voter_weight).
    pub fn set_voter_decision(
        &mut self,
        community: CommunityId,
        voter: ActorId,
        approved: bool,
        weight: Option<u64>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Voter, GovernanceError> {
        let weight = if approved {
            match weight {
                Some(w) if w > 0 => Some(w),
                Some(_) => {
                    return Err(GovernanceError::InvalidWeight {
                        reason: String::from("approval weight must be positive"),
                    });
                }
                None => {
                    return Err(GovernanceError::InvalidWeight {
                        reason: String::from("approval requires a weight"),
                    });
                }
            }
        } else {
            None
        };

        let record = self.voter_mut(community, voter)?;
        if record.processed {
            return Err(GovernanceError::AlreadyProcessed {
                community_id: community,
                voter_id: voter,
            });
        }
        record.approved = approved;
        record.weight = weight;
        record.processed = true;
        record.last_change_reason = reason;
        record.last_modified_at = Some(now);

        info!(
            community_id = %community,
            voter_id = %voter,
            approved,
            weight = ?weight,
            "Onboarding decision applied"
        );
        Ok(record.clone())
    }

    /// Change a voter's weight.
    ///
    /// Allowed regardless of `processed`. Always marks the voter processed
    /// and approved (a weight implies approval) and stamps the audit fields.
    pub fn change_voter_weight(
        &mut self,
        community: CommunityId,
        voter: ActorId,
        new_weight: u64,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Voter, GovernanceError> {
        if new_weight == 0 {
            return Err(GovernanceError::InvalidWeight {
                reason: String::from("weight must be positive"),
            });
        }
        let record = self.voter_mut(community, voter)?;
        let previous = record.weight;
        record.approved = true;
        record.weight = Some(new_weight);
        record.processed = true;
        record.last_change_reason = Some(reason);
        record.last_modified_at = Some(now);

        info!(
            community_id = %community,
            voter_id = %voter,
            previous = ?previous,
            weight = new_weight,
            "Voter weight changed"
        );
        Ok(record.clone())
    }

    fn voter_mut(
        &mut self,
        community: CommunityId,
        voter: ActorId,
    ) -> Result<&mut Voter, GovernanceError> {
        self.community_mut(community)?
            .voters
            .get_mut(&voter)
            .ok_or(GovernanceError::VoterNotFound {
                community_id: community,
                voter_id: voter,
            })
    }

    /// Look up a proposal.
    pub fn proposal(
        &self,
        community: CommunityId,
        proposal: ProposalId,
    ) -> Result<&Proposal, GovernanceError> {
        self.community(community)?
            .proposals
            .iter()
            .find(|p| p.id == proposal)
            .ok_or(GovernanceError::ProposalNotFound {
                community_id: community,
                proposal_id: proposal,
            })
    }

    pub(crate) fn proposal_mut(
        &mut self,
        community: CommunityId,
        proposal: ProposalId,
    ) -> Result<&mut Proposal, GovernanceError> {
        self.community_mut(community)?
            .proposals
            .iter_mut()
            .find(|p| p.id == proposal)
            .ok_or(GovernanceError::ProposalNotFound {
                community_id: community,
                proposal_id: proposal,
            })
    }

    /// Hand out the community's next proposal id and advance the counter.
    pub(crate) fn allocate_proposal_id(
        &mut self,
        community: CommunityId,
    ) -> Result<ProposalId, GovernanceError> {
        let found = self.community_mut(community)?;
        let id = found.proposal_counter;
        found.proposal_counter = id
            .checked_add(1)
            .ok_or(GovernanceError::CounterOverflow(community))?;
        Ok(ProposalId::new(id))
    }

    /// Append a freshly published proposal. Ids are monotonic, so pushing
    /// keeps the list sorted.
    pub(crate) fn insert_proposal(
        &mut self,
        community: CommunityId,
        proposal: Proposal,
    ) -> Result<(), GovernanceError> {
        self.community_mut(community)?.proposals.push(proposal);
        Ok(())
    }
}
