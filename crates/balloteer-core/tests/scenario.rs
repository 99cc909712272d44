//! End-to-end governance scenarios against the in-memory gateway.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::unreachable)]

use chrono::{DateTime, Duration, Utc};

use balloteer_core::{EngineConfig, Engine, MemoryGateway, StaticIdentity};
use balloteer_types::{
    ActorId, AdminDecision, ChatContext, CloseTrigger, Command, CommunityId, Dispatch, FlowInput,
    NoticeBody, Outcome, ProposalId, ProposalStatus, Recipient, RejectReason, Reply,
};

const GROUP: CommunityId = CommunityId::new(-1_001);
const ADMIN: ActorId = ActorId::new(10);
const VOTER_A: ActorId = ActorId::new(20);

type TestEngine = Engine<MemoryGateway, StaticIdentity>;

fn send(engine: &mut TestEngine, command: Command, now: DateTime<Utc>) -> Dispatch {
    engine.handle(command, now).unwrap()
}

fn text(actor: ActorId, raw: &str) -> Command {
    Command::FlowInput {
        actor_id: actor,
        input: FlowInput::text(raw),
    }
}

/// Community created, admin claimed, voter A approved at weight 3, and a
/// Yes/No proposal with quorum 5 open for ten minutes.
fn governed_community(now: DateTime<Utc>) -> TestEngine {
    let mut engine = Engine::boot(
        MemoryGateway::new(),
        StaticIdentity::verified([VOTER_A]),
        EngineConfig::default(),
    )
    .unwrap();

    let claimed = send(
        &mut engine,
        Command::Start {
            actor_id: ADMIN,
            chat: ChatContext::group(GROUP, String::from("Treasury DAO")),
        },
        now,
    );
    assert!(matches!(claimed.reply, Reply::AdminClaimed { .. }));

    let joined = send(
        &mut engine,
        Command::JoinRequest {
            actor_id: VOTER_A,
            display_name: String::from("A"),
            community_id: GROUP,
        },
        now,
    );
    assert_eq!(joined.reply, Reply::JoinPending { community_id: GROUP });
    assert!(matches!(
        joined.notices[0].body,
        NoticeBody::ApprovalRequest { voter_id: VOTER_A, .. }
    ));

    send(
        &mut engine,
        Command::AdminDecision {
            actor_id: ADMIN,
            community_id: GROUP,
            voter_id: VOTER_A,
            decision: AdminDecision::ApproveCustom,
        },
        now,
    );
    let approved = send(&mut engine, text(ADMIN, "3"), now);
    assert!(matches!(
        approved.reply,
        Reply::DecisionApplied {
            approved: true,
            weight: Some(3),
            ..
        }
    ));

    send(&mut engine, Command::NewProposal { actor_id: ADMIN }, now);
    for answer in ["Adopt the budget?", "Yes, No", "5", "10", "skip"] {
        let step = send(&mut engine, text(ADMIN, answer), now);
        assert!(matches!(step.reply, Reply::Prompt { .. }), "answer {answer}");
    }
    let published = send(
        &mut engine,
        Command::Publish {
            actor_id: ADMIN,
            community_id: GROUP,
        },
        now,
    );
    assert!(matches!(
        published.reply,
        Reply::ProposalPublished { ballots_sent: 1, .. }
    ));
    assert_eq!(published.deadlines[0].ends_at, now + Duration::minutes(10));
    engine
}

#[test]
fn proposal_closes_on_deadline_with_unmet_quorum() {
    let now = Utc::now();
    let mut engine = governed_community(now);
    let pid = ProposalId::new(1);

    let vote = send(
        &mut engine,
        Command::CastVote {
            actor_id: VOTER_A,
            community_id: GROUP,
            proposal_id: pid,
            option_index: 0,
        },
        now,
    );
    assert!(matches!(vote.reply, Reply::VoteRecorded { ref label, replaced: None, .. } if label == "Yes"));
    let tallied = engine.store().proposal(GROUP, pid).unwrap();
    assert_eq!(tallied.votes.get(&0), Some(&3));

    let after = now + Duration::minutes(10);
    let closed = send(
        &mut engine,
        Command::AutoCloseCheck {
            community_id: GROUP,
            proposal_id: pid,
        },
        after,
    );
    let Reply::Closed { result } = closed.reply else {
        unreachable!()
    };
    assert_eq!(result.status, ProposalStatus::Closed);
    assert_eq!(result.outcome, Outcome::Winner { index: 0 });
    assert_eq!(result.options[0].percent, 100);
    assert_eq!(result.total_weight, 3);
    assert!(!result.quorum_reached);
    assert_eq!(result.closed_by, Some(CloseTrigger::Deadline));
    assert_eq!(closed.notices.len(), 1);
    assert_eq!(closed.notices[0].recipient, Recipient::Group { community_id: GROUP });

    let again = send(
        &mut engine,
        Command::AutoCloseCheck {
            community_id: GROUP,
            proposal_id: pid,
        },
        after,
    );
    assert_eq!(again.reply, Reply::Idle);
    assert!(again.notices.is_empty());
}

#[test]
fn recast_moves_weight_instead_of_adding() {
    let now = Utc::now();
    let mut engine = governed_community(now);
    let pid = ProposalId::new(1);
    for option_index in [0, 1] {
        send(
            &mut engine,
            Command::CastVote {
                actor_id: VOTER_A,
                community_id: GROUP,
                proposal_id: pid,
                option_index,
            },
            now,
        );
    }
    let proposal = engine.store().proposal(GROUP, pid).unwrap();
    assert_eq!(proposal.votes.get(&0).copied().unwrap_or(0), 0);
    assert_eq!(proposal.votes.get(&1), Some(&3));
    assert_eq!(proposal.voter_map.get(&VOTER_A), Some(&1));
}

#[test]
fn processed_voter_cannot_be_decided_again_but_weight_can_change() {
    let now = Utc::now();
    let mut engine = governed_community(now);

    let again = send(
        &mut engine,
        Command::AdminDecision {
            actor_id: ADMIN,
            community_id: GROUP,
            voter_id: VOTER_A,
            decision: AdminDecision::Reject,
        },
        now,
    );
    assert!(matches!(
        again.reply,
        Reply::Rejected {
            reason: RejectReason::AlreadyProcessed,
            ..
        }
    ));

    send(&mut engine, Command::SetWeight { actor_id: ADMIN }, now);
    send(
        &mut engine,
        Command::FlowInput {
            actor_id: ADMIN,
            input: FlowInput::Community { community_id: GROUP },
        },
        now,
    );
    send(
        &mut engine,
        Command::FlowInput {
            actor_id: ADMIN,
            input: FlowInput::Voter { voter_id: VOTER_A },
        },
        now,
    );
    send(&mut engine, text(ADMIN, "7"), now);
    let changed = send(&mut engine, text(ADMIN, "stake grew"), now);
    assert!(matches!(
        changed.reply,
        Reply::WeightChanged {
            previous: Some(3),
            weight: 7,
            ..
        }
    ));
    assert_eq!(
        engine.store().voter(GROUP, VOTER_A).unwrap().weight,
        Some(7)
    );
}

#[test]
fn lowered_weight_cannot_leave_phantom_weight_behind() {
    let now = Utc::now();
    let mut engine = governed_community(now);
    let pid = ProposalId::new(1);
    let cast = |option_index| Command::CastVote {
        actor_id: VOTER_A,
        community_id: GROUP,
        proposal_id: pid,
        option_index,
    };
    send(&mut engine, cast(0), now);

    send(&mut engine, Command::SetWeight { actor_id: ADMIN }, now);
    send(
        &mut engine,
        Command::FlowInput {
            actor_id: ADMIN,
            input: FlowInput::Community { community_id: GROUP },
        },
        now,
    );
    send(
        &mut engine,
        Command::FlowInput {
            actor_id: ADMIN,
            input: FlowInput::Voter { voter_id: VOTER_A },
        },
        now,
    );
    send(&mut engine, text(ADMIN, "1"), now);
    send(&mut engine, text(ADMIN, "stake sold"), now);
    send(&mut engine, cast(1), now);

    let proposal = engine.store().proposal(GROUP, pid).unwrap();
    let total: u64 = proposal.votes.values().sum();
    assert_eq!(total, 1, "tally equals the weight of the only ballot holder");

    let closed = send(
        &mut engine,
        Command::AutoCloseCheck {
            community_id: GROUP,
            proposal_id: pid,
        },
        now + Duration::minutes(10),
    );
    let Reply::Closed { result } = closed.reply else {
        unreachable!()
    };
    assert_eq!(result.outcome, Outcome::Winner { index: 1 });
}

#[test]
fn state_survives_a_restart() {
    let now = Utc::now();
    let mut engine = governed_community(now);
    send(
        &mut engine,
        Command::CastVote {
            actor_id: VOTER_A,
            community_id: GROUP,
            proposal_id: ProposalId::new(1),
            option_index: 1,
        },
        now,
    );

    let persisted = engine.gateway().clone();
    let mut restarted = Engine::boot(
        persisted,
        StaticIdentity::allow_all(),
        EngineConfig::default(),
    )
    .unwrap();

    assert!(restarted.store().is_admin(GROUP, ADMIN));
    assert_eq!(restarted.open_deadlines().len(), 1);
    let proposal = restarted.store().proposal(GROUP, ProposalId::new(1)).unwrap();
    assert_eq!(proposal.votes.get(&1), Some(&3));

    let swept = send(&mut restarted, Command::Sweep, now + Duration::minutes(11));
    assert_eq!(swept.reply, Reply::SweepCompleted { closed: 1 });
    assert_eq!(
        restarted
            .gateway()
            .community(GROUP)
            .unwrap()
            .proposals[0]
            .status,
        ProposalStatus::Closed
    );
}

#[test]
fn unlinked_actor_cannot_join() {
    let now = Utc::now();
    let mut engine = governed_community(now);
    let stranger = ActorId::new(99);
    let refused = send(
        &mut engine,
        Command::JoinRequest {
            actor_id: stranger,
            display_name: String::from("S"),
            community_id: GROUP,
        },
        now,
    );
    assert!(matches!(
        refused.reply,
        Reply::Rejected {
            reason: RejectReason::WalletLinkRequired,
            ..
        }
    ));
}
