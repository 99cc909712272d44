//! The governance engine: one entry point per dispatch-router operation.
//!
//! The engine owns the entity store and the conversation table, and holds
//! the persistence gateway and identity lookup. Every operation runs to
//! completion before the next one starts, so nothing here is locked.
//!
//! Each operation follows the same shape:
//!
//! 1. Lazy close check on the touched community, where applicable.
//! 2. Validate and mutate through the store / conversation engine.
//! 3. Write every changed record through to the gateway.
//! 4. Return a [`Dispatch`]: one reply plus notices and deadlines.
//!
//! Domain refusals become [`Reply::Rejected`], or [`Reply::Reprompt`] when a
//! conversation is still waiting on a question. Only gateway failures are
//! returned as [`EngineError`], after the in-memory mutation has been kept.
//!
//! Closing a proposal always yields its results announcement. A failed write
//! of a closed proposal is queued and retried by the next sweep, and
//! announcements produced by an operation that then fails are carried into
//! the next reply.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use balloteer_conversation::{
    ActiveFlow, ApprovalWeightFlow, ConversationEngine, ConversationError, CustomApproval,
    DraftReady, Finished, PendingPrompt, Progress, ProposalDraftFlow, StepContext,
    WeightChangeFlow, WeightChangeRequest,
};
use balloteer_governance::lifecycle::{self, is_open_for_voting};
use balloteer_governance::tally::{self, TallyCheck};
use balloteer_governance::{CloseResult, Closure, EntityStore, GovernanceError};
use balloteer_types::{
    ActorId, AdminDecision, BallotSummary, ChatContext, ChatKind, Command, CommunityId,
    CommunitySummary, Deadline, Dispatch, FlowInput, FlowKind, MembershipSummary, Notice,
    NoticeBody, ProposalId, ProposalStatus, ProposalSummary, RejectReason, Reply, Voter,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gateway::{GatewayError, IdentityLookup, PersistenceGateway};

/// Reason recorded with a one-tap approval.
const REASON_APPROVED: &str = "approved";
/// Reason recorded with a custom-weight approval.
const REASON_APPROVED_CUSTOM: &str = "approved with custom weight";
/// Reason recorded with a rejection.
const REASON_REJECTED: &str = "rejected";

/// The governance engine.
#[derive(Debug)]
pub struct Engine<G, I> {
    store: EntityStore,
    conversations: ConversationEngine,
    gateway: G,
    identity: I,
    settings: EngineConfig,
    /// Closed proposals whose write failed.
    unsynced: BTreeSet<(CommunityId, ProposalId)>,
    /// Announcements held back by a failed operation.
    undelivered: Vec<Notice>,
}

impl<G: PersistenceGateway, I: IdentityLookup> Engine<G, I> {
    /// Load all persisted state through `gateway` and build the engine.
    pub fn boot(mut gateway: G, identity: I, settings: EngineConfig) -> Result<Self, EngineError> {
        let loaded = gateway
            .load_all()
            .map_err(|source| EngineError::Load { source })?;
        let persisted_admins = loaded.admin_index.len();
        let store = EntityStore::restore(loaded.communities);

        if store.admin_index().len() != persisted_admins {
            warn!(
                persisted = persisted_admins,
                rebuilt = store.admin_index().len(),
                "Persisted admin index disagreed with communities; using rebuilt index"
            );
        }
        for community in store.communities() {
            for proposal in &community.proposals {
                if let TallyCheck::Anomalies(found) = tally::verify_tally(proposal) {
                    warn!(
                        community_id = %community.id,
                        proposal_id = %proposal.id,
                        anomalies = ?found,
                        "Loaded proposal has an inconsistent tally"
                    );
                }
            }
        }

        info!(communities = store.len(), "Engine booted");
        Ok(Self::with_store(store, gateway, identity, settings))
    }

    /// Build an engine around an existing store without loading.
    pub const fn with_store(store: EntityStore, gateway: G, identity: I, settings: EngineConfig) -> Self {
        Self {
            store,
            conversations: ConversationEngine::new(),
            gateway,
            identity,
            settings,
            unsynced: BTreeSet::new(),
            undelivered: Vec::new(),
        }
    }

    /// Read access to the entity store.
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Read access to the gateway.
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Mutable access to the gateway.
    pub const fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    /// Deadlines of every open proposal, for arming timers at boot.
    pub fn open_deadlines(&self) -> Vec<Deadline> {
        lifecycle::open_deadlines(&self.store)
    }

    /// Route one command to its operation.
    pub fn handle(&mut self, command: Command, now: DateTime<Utc>) -> Result<Dispatch, EngineError> {
        debug!(command = command.name(), actor_id = ?command.actor(), "Handling command");
        let dispatch = match command {
            Command::Start { actor_id, chat } => self.on_start(actor_id, &chat, now),
            Command::JoinRequest {
                actor_id,
                display_name,
                community_id,
            } => self.on_join_request(actor_id, &display_name, community_id),
            Command::AdminDecision {
                actor_id,
                community_id,
                voter_id,
                decision,
            } => self.on_admin_decision(actor_id, community_id, voter_id, decision, now),
            Command::NewProposal { actor_id } => Ok(self.on_new_proposal(actor_id, now)),
            Command::SetWeight { actor_id } => Ok(self.on_set_weight(actor_id, now)),
            Command::FlowInput { actor_id, input } => self.on_flow_input(actor_id, &input, now),
            Command::Publish {
                actor_id,
                community_id,
            } => self.on_publish(actor_id, community_id, now),
            Command::CastVote {
                actor_id,
                community_id,
                proposal_id,
                option_index,
            } => self.on_cast_vote(community_id, proposal_id, actor_id, option_index, now),
            Command::CloseRequest {
                actor_id,
                community_id,
                proposal_id,
            } => self.on_close_request(community_id, proposal_id, actor_id),
            Command::CloseListing { actor_id } => self.on_close_listing(actor_id, now),
            Command::MyVotes { actor_id } => self.on_my_votes(actor_id, now),
            Command::ProposalDetail {
                community_id,
                proposal_id,
            } => self.on_proposal_detail(community_id, proposal_id, now),
            Command::Cancel { actor_id } => Ok(self.on_cancel(actor_id)),
            Command::AutoCloseCheck {
                community_id,
                proposal_id,
            } => self.on_auto_close_check(community_id, proposal_id, now),
            Command::Sweep => self.on_sweep(now),
        }?;
        Ok(self.release_undelivered(dispatch))
    }

    /// Prepend announcements a failed operation held back.
    fn release_undelivered(&mut self, dispatch: Dispatch) -> Dispatch {
        if self.undelivered.is_empty() {
            return dispatch;
        }
        let mut notices = std::mem::take(&mut self.undelivered);
        debug!(count = notices.len(), "Delivering held-back announcements");
        notices.extend(dispatch.notices);
        Dispatch { notices, ..dispatch }
    }

    /// Keep `notices` for the next reply when `result` is a failure.
    fn hold_on_failure<T>(
        &mut self,
        notices: &mut Vec<Notice>,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        if result.is_err() {
            self.undelivered.append(notices);
        }
        result
    }

    // -----------------------------------------------------------------------
    // Communities and onboarding
    // -----------------------------------------------------------------------

    /// `/start`: claim a group, or list the actor's communities in private.
    pub fn on_start(
        &mut self,
        actor: ActorId,
        chat: &ChatContext,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        match (chat.kind, chat.community_id) {
            (ChatKind::Private, _) => Ok(Dispatch::reply(self.home(actor, now))),
            (ChatKind::Group, None) => Ok(Dispatch::rejected(
                RejectReason::CommunityNotFound,
                "group start without a group id",
            )),
            (ChatKind::Group, Some(community_id)) => {
                let title = chat.title.clone().unwrap_or_default();
                let (_, change) = self.store.create_or_get_community(community_id, &title);
                let claimed = match self.store.claim_admin_if_unset(community_id, actor) {
                    Ok(claimed) => claimed,
                    Err(err) => return Ok(rejected(&err)),
                };
                if change.is_dirty() || claimed {
                    self.persist_community(community_id)?;
                }
                let closed = self.touch(community_id, now);

                let admin_id = self
                    .store
                    .community(community_id)
                    .ok()
                    .and_then(|c| c.admin_id);
                let reply = if claimed {
                    Reply::AdminClaimed {
                        community_id,
                        title,
                    }
                } else {
                    Reply::CommunityRegistered {
                        community_id,
                        title,
                        admin_id,
                    }
                };
                Ok(Dispatch::reply(reply).with_notices(closed))
            }
        }
    }

    fn home(&self, actor: ActorId, now: DateTime<Utc>) -> Reply {
        let admin_of = self
            .store
            .administered_by(actor)
            .into_iter()
            .map(|c| CommunitySummary {
                community_id: c.id,
                title: c.title.clone(),
                approved_voters: c.voters.values().filter(|v| v.approved).count(),
                open_proposals: c
                    .proposals
                    .iter()
                    .filter(|p| is_open_for_voting(p, now))
                    .count(),
            })
            .collect();
        let member_of = self
            .store
            .memberships(actor)
            .into_iter()
            .map(|(c, v)| MembershipSummary {
                community_id: c.id,
                title: c.title.clone(),
                approved: v.approved,
                weight: v.weight,
            })
            .collect();
        Reply::Home {
            admin_of,
            member_of,
        }
    }

    /// `/join`: register the voter and ask the admin to decide.
    pub fn on_join_request(
        &mut self,
        actor: ActorId,
        display_name: &str,
        community_id: CommunityId,
    ) -> Result<Dispatch, EngineError> {
        let (community_title, admin_id) = match self.store.community(community_id) {
            Ok(c) => (c.title.clone(), c.admin_id),
            Err(err) => return Ok(rejected(&err)),
        };

        if self.settings.require_wallet_link {
            let linked = self
                .identity
                .has_verified_wallet(actor)
                .map_err(|source| EngineError::Identity { source })?;
            if !linked {
                return Ok(Dispatch::rejected(
                    RejectReason::WalletLinkRequired,
                    format!("actor {actor} has no verified wallet link"),
                ));
            }
        }

        let known_name = self
            .store
            .voter(community_id, actor)
            .ok()
            .map(|v| v.display_name.clone());
        let voter = match self
            .store
            .register_voter_if_absent(community_id, actor, display_name)
        {
            Ok(voter) => voter,
            Err(err) => return Ok(rejected(&err)),
        };
        if voter.processed {
            if known_name.as_deref() != Some(voter.display_name.as_str()) {
                self.persist_voter(community_id, &voter)?;
            }
            return Ok(Dispatch::reply(Reply::AlreadyMember {
                community_id,
                approved: voter.approved,
                weight: voter.weight,
            }));
        }
        self.persist_voter(community_id, &voter)?;

        let dispatch = Dispatch::reply(Reply::JoinPending { community_id });
        let Some(admin_id) = admin_id else {
            warn!(community_id = %community_id, "Join request for a community without an admin");
            return Ok(dispatch);
        };
        Ok(dispatch.with_notices(vec![Notice::to_actor(
            admin_id,
            NoticeBody::ApprovalRequest {
                community_id,
                community_title,
                voter_id: actor,
                display_name: voter.display_name,
                default_weight: self.settings.default_approval_weight,
            },
        )]))
    }

    /// Approval panel: approve, approve with a custom weight, or reject.
    pub fn on_admin_decision(
        &mut self,
        actor: ActorId,
        community_id: CommunityId,
        voter_id: ActorId,
        decision: AdminDecision,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        if let Err(err) = self.store.require_admin(community_id, actor) {
            return Ok(rejected(&err));
        }
        let voter = match self.store.voter(community_id, voter_id) {
            Ok(voter) => voter,
            Err(err) => return Ok(rejected(&err)),
        };
        if voter.processed {
            return Ok(rejected(&GovernanceError::AlreadyProcessed {
                community_id,
                voter_id,
            }));
        }

        match decision {
            AdminDecision::Approve => self.apply_decision(
                community_id,
                voter_id,
                Some(self.settings.default_approval_weight),
                REASON_APPROVED,
                now,
            ),
            AdminDecision::Reject => {
                self.apply_decision(community_id, voter_id, None, REASON_REJECTED, now)
            }
            AdminDecision::ApproveCustom => {
                let flow = ActiveFlow::ApprovalWeight(ApprovalWeightFlow::new(community_id, voter_id));
                Ok(self.start_flow(actor, flow, now))
            }
        }
    }

    /// Apply a first onboarding decision. `weight` of `None` rejects.
    fn apply_decision(
        &mut self,
        community_id: CommunityId,
        voter_id: ActorId,
        weight: Option<u64>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        let approved = weight.is_some();
        let voter = match self.store.set_voter_decision(
            community_id,
            voter_id,
            approved,
            weight,
            Some(reason.to_owned()),
            now,
        ) {
            Ok(voter) => voter,
            Err(err) => return Ok(rejected(&err)),
        };
        self.persist_voter(community_id, &voter)?;

        let community_title = self.community_title(community_id);
        let body = match voter.weight {
            Some(weight) if voter.approved => NoticeBody::VoterApproved {
                community_id,
                community_title,
                weight,
            },
            _ => NoticeBody::VoterRejected {
                community_id,
                community_title,
            },
        };
        Ok(Dispatch::reply(Reply::DecisionApplied {
            community_id,
            voter_id,
            approved: voter.approved,
            weight: voter.weight,
        })
        .with_notices(vec![Notice::to_actor(voter_id, body)]))
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Begin drafting a proposal.
    pub fn on_new_proposal(&mut self, actor: ActorId, now: DateTime<Utc>) -> Dispatch {
        if self.store.administered_by(actor).is_empty() {
            return Dispatch::rejected(
                RejectReason::NotAuthorized,
                "only a community admin can draft proposals",
            );
        }
        self.start_flow(actor, ActiveFlow::ProposalDraft(ProposalDraftFlow::new()), now)
    }

    /// Begin a weight change.
    pub fn on_set_weight(&mut self, actor: ActorId, now: DateTime<Utc>) -> Dispatch {
        if self.store.administered_by(actor).is_empty() {
            return Dispatch::rejected(
                RejectReason::NotAuthorized,
                "only a community admin can change weights",
            );
        }
        self.start_flow(actor, ActiveFlow::WeightChange(WeightChangeFlow::new()), now)
    }

    fn start_flow(&mut self, actor: ActorId, flow: ActiveFlow, now: DateTime<Utc>) -> Dispatch {
        let ctx = step_context(&self.store, actor, now, &self.settings);
        match self.conversations.start(flow, &ctx) {
            Ok(prompt) => Dispatch::reply(prompt_reply(prompt)),
            Err(err) => self.conversation_rejected(actor, now, &err),
        }
    }

    /// Input for whatever conversation the actor has open.
    pub fn on_flow_input(
        &mut self,
        actor: ActorId,
        input: &FlowInput,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        self.advance_flow(actor, None, input, now)
    }

    /// Pick the community a finished draft is published to.
    pub fn on_publish(
        &mut self,
        actor: ActorId,
        community_id: CommunityId,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        let input = FlowInput::Community { community_id };
        self.advance_flow(actor, Some(FlowKind::ProposalDraft), &input, now)
    }

    fn advance_flow(
        &mut self,
        actor: ActorId,
        expected: Option<FlowKind>,
        input: &FlowInput,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        let ctx = step_context(&self.store, actor, now, &self.settings);
        match self.conversations.advance(expected, input, &ctx) {
            Ok(Progress::Prompt(prompt)) => Ok(Dispatch::reply(prompt_reply(prompt))),
            Ok(Progress::Finished(Finished::Draft(ready))) => self.publish_draft(actor, ready),
            Ok(Progress::Finished(Finished::WeightChange(request))) => {
                self.apply_weight_change(request, now)
            }
            Ok(Progress::Finished(Finished::Approval(approval))) => {
                self.apply_custom_approval(approval, now)
            }
            Err(err) => Ok(self.conversation_rejected(actor, now, &err)),
        }
    }

    /// Refuse conversation input, re-asking the open question if there is
    /// one.
    fn conversation_rejected(
        &self,
        actor: ActorId,
        now: DateTime<Utc>,
        err: &ConversationError,
    ) -> Dispatch {
        let ctx = step_context(&self.store, actor, now, &self.settings);
        match self.conversations.current_prompt(&ctx) {
            Some(prompt) => Dispatch::reply(Reply::Reprompt {
                reason: err.reason(),
                detail: err.to_string(),
                flow: prompt.kind,
                step: prompt.step,
                choices: prompt.choices,
            }),
            None => Dispatch::rejected(err.reason(), err.to_string()),
        }
    }

    fn publish_draft(&mut self, actor: ActorId, ready: DraftReady) -> Result<Dispatch, EngineError> {
        let community_id = ready.community_id;
        let published = match lifecycle::publish(&mut self.store, community_id, actor, ready.draft) {
            Ok(published) => published,
            Err(err) => return Ok(rejected(&err)),
        };
        self.persist("set_proposal_counter", |g| {
            g.set_proposal_counter(community_id, published.next_counter)
        })?;
        self.persist("upsert_proposal", |g| {
            g.upsert_proposal(community_id, &published.proposal)
        })?;

        let proposal = published.proposal;
        let community_title = self.community_title(community_id);
        let mut notices = vec![Notice::to_group(
            community_id,
            NoticeBody::VotingOpen {
                community_id,
                proposal_id: proposal.id,
                title: proposal.title.clone(),
                options: proposal.options.clone(),
                quorum_weight: proposal.quorum_weight,
                ends_at: proposal.ends_at,
            },
        )];
        let ballots: Vec<Notice> = self
            .store
            .community(community_id)
            .map(|c| {
                c.voters
                    .values()
                    .filter_map(|v| v.eligible_weight().map(|w| (v.id, w)))
                    .map(|(voter_id, weight)| {
                        Notice::to_actor(
                            voter_id,
                            NoticeBody::Ballot {
                                community_id,
                                community_title: community_title.clone(),
                                proposal_id: proposal.id,
                                title: proposal.title.clone(),
                                options: proposal.options.clone(),
                                weight,
                                ends_at: proposal.ends_at,
                                attachment: proposal.attachment.clone(),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        let ballots_sent = ballots.len();
        notices.extend(ballots);

        let mut dispatch = Dispatch::reply(Reply::ProposalPublished {
            community_id,
            proposal_id: proposal.id,
            ballots_sent,
        })
        .with_notices(notices);
        if let Some(ends_at) = proposal.ends_at {
            dispatch = dispatch.with_deadline(Deadline {
                community_id,
                proposal_id: proposal.id,
                ends_at,
            });
        }
        Ok(dispatch)
    }

    fn apply_weight_change(
        &mut self,
        request: WeightChangeRequest,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        let WeightChangeRequest {
            community_id,
            voter_id,
            weight,
            reason,
        } = request;
        let mut notices = self.touch(community_id, now);
        let previous = self
            .store
            .voter(community_id, voter_id)
            .ok()
            .and_then(|v| v.weight);
        let voter = match self.store.change_voter_weight(
            community_id,
            voter_id,
            weight,
            reason.clone(),
            now,
        ) {
            Ok(voter) => voter,
            Err(err) => return Ok(rejected(&err).with_notices(notices)),
        };
        let written = self.persist_voter(community_id, &voter);
        self.hold_on_failure(&mut notices, written)?;

        let reweighted = tally::reweight_ballots(
            &mut self.store,
            community_id,
            voter_id,
            previous.unwrap_or(0),
            weight,
            now,
        )
        .unwrap_or_default();
        for proposal in &reweighted {
            let written =
                self.persist("upsert_proposal", |g| g.upsert_proposal(community_id, proposal));
            self.hold_on_failure(&mut notices, written)?;
        }

        notices.push(Notice::to_actor(
            voter_id,
            NoticeBody::WeightChanged {
                community_id,
                community_title: self.community_title(community_id),
                previous,
                weight,
                reason: reason.clone(),
            },
        ));
        Ok(Dispatch::reply(Reply::WeightChanged {
            community_id,
            voter_id,
            previous,
            weight,
            reason,
        })
        .with_notices(notices))
    }

    fn apply_custom_approval(
        &mut self,
        approval: CustomApproval,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        self.apply_decision(
            approval.community_id,
            approval.voter_id,
            Some(approval.weight),
            REASON_APPROVED_CUSTOM,
            now,
        )
    }

    /// Discard the actor's open conversation.
    pub fn on_cancel(&mut self, actor: ActorId) -> Dispatch {
        Dispatch::reply(Reply::Cancelled {
            flow: self.conversations.cancel(actor),
        })
    }

    // -----------------------------------------------------------------------
    // Voting and results
    // -----------------------------------------------------------------------

    /// Cast or change a ballot.
    pub fn on_cast_vote(
        &mut self,
        community_id: CommunityId,
        proposal_id: ProposalId,
        voter_id: ActorId,
        option_index: usize,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        let mut notices = self.touch(community_id, now);

        let (receipt, proposal) = match tally::cast_vote(
            &mut self.store,
            community_id,
            proposal_id,
            voter_id,
            option_index,
            now,
        ) {
            Ok(cast) => cast,
            Err(err) => return Ok(rejected(&err).with_notices(notices)),
        };
        let written = self.persist("upsert_proposal", |g| g.upsert_proposal(community_id, &proposal));
        self.hold_on_failure(&mut notices, written)?;

        let label = proposal
            .options
            .get(receipt.option)
            .cloned()
            .unwrap_or_default();
        match lifecycle::close_after_vote(
            &mut self.store,
            community_id,
            proposal_id,
            self.settings.post_vote_close,
        ) {
            Ok(CloseResult::Closed(closure)) => notices.push(self.finish_closure(*closure)),
            Ok(CloseResult::AlreadyClosed | CloseResult::NotDue) => {}
            Err(err) => warn!(error = %err, "Post-vote close check failed"),
        }

        Ok(Dispatch::reply(Reply::VoteRecorded {
            community_id,
            proposal_id,
            option_index: receipt.option,
            label,
            replaced: receipt.previous,
        })
        .with_notices(notices))
    }

    /// Manual close by the admin.
    pub fn on_close_request(
        &mut self,
        community_id: CommunityId,
        proposal_id: ProposalId,
        actor: ActorId,
    ) -> Result<Dispatch, EngineError> {
        match lifecycle::close_manual(&mut self.store, community_id, proposal_id, actor) {
            Ok(CloseResult::Closed(closure)) => {
                let result = closure.result.clone();
                let notice = self.finish_closure(*closure);
                Ok(Dispatch::reply(Reply::Closed { result }).with_notices(vec![notice]))
            }
            Ok(CloseResult::AlreadyClosed | CloseResult::NotDue) => {
                Ok(Dispatch::reply(Reply::AlreadyClosed {
                    community_id,
                    proposal_id,
                }))
            }
            Err(err) => Ok(rejected(&err)),
        }
    }

    /// Open proposals across the admin's communities, after a lazy close.
    pub fn on_close_listing(
        &mut self,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        let ids: Vec<CommunityId> = self
            .store
            .administered_by(actor)
            .into_iter()
            .map(|c| c.id)
            .collect();
        if ids.is_empty() {
            return Ok(Dispatch::rejected(
                RejectReason::NotAuthorized,
                "only a community admin can close proposals",
            ));
        }

        let mut notices = Vec::new();
        let mut proposals = Vec::new();
        for community_id in ids {
            notices.extend(self.touch(community_id, now));
            if let Ok(community) = self.store.community(community_id) {
                proposals.extend(
                    community
                        .proposals
                        .iter()
                        .filter(|p| p.status == ProposalStatus::Open)
                        .map(|p| ProposalSummary {
                            community_id,
                            proposal_id: p.id,
                            title: p.title.clone(),
                            ends_at: p.ends_at,
                        }),
                );
            }
        }
        Ok(Dispatch::reply(Reply::CloseListing { proposals }).with_notices(notices))
    }

    /// Ballots the actor can still cast or change.
    pub fn on_my_votes(&mut self, actor: ActorId, now: DateTime<Utc>) -> Result<Dispatch, EngineError> {
        let ids: Vec<CommunityId> = self
            .store
            .memberships(actor)
            .into_iter()
            .filter(|(_, v)| v.eligible_weight().is_some())
            .map(|(c, _)| c.id)
            .collect();

        let mut notices = Vec::new();
        let mut ballots = Vec::new();
        for community_id in ids {
            notices.extend(self.touch(community_id, now));
            let Ok(community) = self.store.community(community_id) else {
                continue;
            };
            let Some(weight) = community.voters.get(&actor).and_then(Voter::eligible_weight) else {
                continue;
            };
            ballots.extend(
                community
                    .proposals
                    .iter()
                    .filter(|p| is_open_for_voting(p, now))
                    .map(|p| BallotSummary {
                        community_id,
                        community_title: community.title.clone(),
                        proposal_id: p.id,
                        title: p.title.clone(),
                        options: p.options.clone(),
                        current_choice: p.voter_map.get(&actor).copied(),
                        weight,
                        ends_at: p.ends_at,
                    }),
            );
        }
        Ok(Dispatch::reply(Reply::MyVotes { ballots }).with_notices(notices))
    }

    /// Aggregated tally of one proposal, after a lazy close.
    pub fn on_proposal_detail(
        &mut self,
        community_id: CommunityId,
        proposal_id: ProposalId,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        let notices = match self.store.community(community_id) {
            Ok(_) => self.touch(community_id, now),
            Err(err) => return Ok(rejected(&err)),
        };
        match self.store.proposal(community_id, proposal_id) {
            Ok(proposal) => {
                let result = tally::snapshot(community_id, proposal, None);
                Ok(Dispatch::reply(Reply::ProposalDetail { result }).with_notices(notices))
            }
            Err(err) => Ok(rejected(&err).with_notices(notices)),
        }
    }

    // -----------------------------------------------------------------------
    // Scheduler entry points
    // -----------------------------------------------------------------------

    /// A deadline timer fired.
    ///
    /// Stale timers (proposal already closed or gone) are no-ops. A timer
    /// that fired early is re-armed.
    pub fn on_auto_close_check(
        &mut self,
        community_id: CommunityId,
        proposal_id: ProposalId,
        now: DateTime<Utc>,
    ) -> Result<Dispatch, EngineError> {
        match lifecycle::close_if_due(&mut self.store, community_id, proposal_id, now) {
            Ok(CloseResult::Closed(closure)) => {
                let result = closure.result.clone();
                let notice = self.finish_closure(*closure);
                Ok(Dispatch::reply(Reply::Closed { result }).with_notices(vec![notice]))
            }
            Ok(CloseResult::AlreadyClosed) => {
                debug!(community_id = %community_id, proposal_id = %proposal_id, "Stale timer ignored");
                Ok(Dispatch::reply(Reply::Idle))
            }
            Ok(CloseResult::NotDue) => {
                let rearm = self
                    .store
                    .proposal(community_id, proposal_id)
                    .ok()
                    .and_then(|p| p.ends_at)
                    .map(|ends_at| Deadline {
                        community_id,
                        proposal_id,
                        ends_at,
                    });
                let mut dispatch = Dispatch::reply(Reply::Idle);
                if let Some(deadline) = rearm {
                    dispatch = dispatch.with_deadline(deadline);
                }
                Ok(dispatch)
            }
            Err(err) => {
                warn!(error = %err, "Timer fired for an unknown proposal");
                Ok(Dispatch::reply(Reply::Idle))
            }
        }
    }

    /// Periodic sweep over every open proposal.
    ///
    /// Retries the writes of closed proposals that failed earlier, then
    /// closes everything overdue.
    pub fn on_sweep(&mut self, now: DateTime<Utc>) -> Result<Dispatch, EngineError> {
        self.resync_closed();
        let closures = lifecycle::close_all_due(&mut self.store, now);
        let closed = closures.len();
        let notices: Vec<Notice> = closures
            .into_iter()
            .map(|closure| self.finish_closure(closure))
            .collect();
        if closed > 0 {
            info!(closed, "Sweep closed overdue proposals");
        }
        Ok(Dispatch::reply(Reply::SweepCompleted { closed }).with_notices(notices))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Lazy close check; returns the results announcements it produced.
    fn touch(&mut self, community_id: CommunityId, now: DateTime<Utc>) -> Vec<Notice> {
        let closures = lifecycle::close_due_in_community(&mut self.store, community_id, now)
            .unwrap_or_default();
        closures
            .into_iter()
            .map(|closure| self.finish_closure(closure))
            .collect()
    }

    /// Persist a closed proposal and build its group announcement.
    ///
    /// The announcement is built even when the write fails; the proposal is
    /// then queued for the next sweep.
    fn finish_closure(&mut self, closure: Closure) -> Notice {
        let Closure {
            community_id,
            proposal,
            result,
        } = closure;
        if self
            .persist("upsert_proposal", |g| g.upsert_proposal(community_id, &proposal))
            .is_err()
        {
            warn!(
                community_id = %community_id,
                proposal_id = %proposal.id,
                "Closed proposal queued for re-sync"
            );
            self.unsynced.insert((community_id, proposal.id));
        }
        Notice::to_group(community_id, NoticeBody::FinalResults { result })
    }

    /// Retry writes of closed proposals that failed earlier.
    fn resync_closed(&mut self) {
        for (community_id, proposal_id) in std::mem::take(&mut self.unsynced) {
            let Ok(proposal) = self.store.proposal(community_id, proposal_id).cloned() else {
                continue;
            };
            match self.gateway.upsert_proposal(community_id, &proposal) {
                Ok(()) => info!(
                    community_id = %community_id,
                    proposal_id = %proposal_id,
                    "Closed proposal re-synced"
                ),
                Err(source) => {
                    warn!(
                        community_id = %community_id,
                        proposal_id = %proposal_id,
                        error = %source,
                        "Closed proposal still not written"
                    );
                    self.unsynced.insert((community_id, proposal_id));
                }
            }
        }
    }

    fn community_title(&self, community_id: CommunityId) -> String {
        self.store
            .community(community_id)
            .map(|c| c.title.clone())
            .unwrap_or_default()
    }

    fn persist_community(&mut self, community_id: CommunityId) -> Result<(), EngineError> {
        let Ok(community) = self.store.community(community_id) else {
            return Ok(());
        };
        let (title, admin_id) = (community.title.clone(), community.admin_id);
        self.persist("upsert_community", |g| {
            g.upsert_community(community_id, &title, admin_id)
        })
    }

    fn persist_voter(&mut self, community_id: CommunityId, voter: &Voter) -> Result<(), EngineError> {
        self.persist("upsert_voter", |g| g.upsert_voter(community_id, voter))
    }

    fn persist(
        &mut self,
        operation: &'static str,
        write: impl FnOnce(&mut G) -> Result<(), GatewayError>,
    ) -> Result<(), EngineError> {
        write(&mut self.gateway).map_err(|source| {
            error!(operation, error = %source, "Write-through failed; memory and storage diverge");
            EngineError::Persistence { operation, source }
        })
    }
}

fn step_context<'a>(
    store: &'a EntityStore,
    actor: ActorId,
    now: DateTime<Utc>,
    settings: &EngineConfig,
) -> StepContext<'a> {
    StepContext {
        store,
        actor,
        now,
        limits: settings.flow_limits(),
    }
}

fn prompt_reply(prompt: PendingPrompt) -> Reply {
    Reply::Prompt {
        flow: prompt.kind,
        step: prompt.step,
        choices: prompt.choices,
    }
}

fn rejected(err: &GovernanceError) -> Dispatch {
    debug!(error = %err, "Request refused");
    Dispatch::rejected(err.reason(), err.to_string())
}
