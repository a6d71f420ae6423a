//! Reconciliation engine.
//!
//! Folds inbound messages and transport lifecycle signals into the
//! [`SessionStore`]. Every handler runs as one store update, so handlers
//! never interleave and subscribers only ever see the result of a complete
//! step. Snapshots replace the session wholesale; the only repair the engine
//! ever attempts is to throw the projection away and wait for the next one.

use tracing::{debug, info, warn};

use crate::error::Fault;
use crate::protocol::ServerMessage;

use super::connection::{ConnectionState, TransportEvent};
use super::dispatch::Action;
use super::game::{IntegrityFault, RoomId, Session};
use super::player::{InvalidTransition, MembershipEvent, Participant, ParticipantId};
use super::store::{Projection, SessionStore};

/// Result of folding one message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Applied,
    /// Message had no effect on the projection
    Ignored(&'static str),
    /// Projection was cleared because of this fault
    Faulted(Fault),
}

/// Writes inbound state into the session store.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    store: SessionStore,
}

impl Reconciler {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Fold one transport event.
    pub fn on_transport(&self, event: TransportEvent) -> Step {
        match event {
            TransportEvent::Connecting { attempt } => self.on_connecting(attempt),
            TransportEvent::Connected { id } => self.on_connected(id),
            TransportEvent::ConnectionFailed { attempt, cause } => {
                self.on_connection_failed(attempt, cause)
            }
            TransportEvent::Disconnected { reason, voluntary } => {
                self.on_disconnected(reason, voluntary)
            }
            TransportEvent::GaveUp { attempts, cause } => self.on_gave_up(attempts, cause),
            TransportEvent::Message(message) => self.on_message(message),
        }
    }

    /// Fold one inbound coordinator message.
    pub fn on_message(&self, message: ServerMessage) -> Step {
        match message {
            ServerMessage::ConnectionEstablished { .. } => {
                Step::Ignored("handshake already complete")
            }
            ServerMessage::Snapshot { session } => self.on_snapshot(session),
            ServerMessage::ParticipantJoined {
                participant,
                session,
            } => self.on_participant_joined(participant, session),
            ServerMessage::ParticipantLeft {
                participant_id,
                participant_name,
                session,
            } => self.on_participant_left(participant_id, participant_name, session),
            ServerMessage::ParticipantUpdated { participant } => {
                self.on_participant_updated(participant)
            }
            ServerMessage::StatusMessage { text } => self.on_status_message(text),
            ServerMessage::JoinRejected { reason } => self.on_join_rejected(reason),
        }
    }

    // Lifecycle

    pub fn on_connecting(&self, attempt: usize) -> Step {
        self.store.update(|p| {
            p.connection = ConnectionState::Connecting { attempt };
            Step::Applied
        })
    }

    /// The transport is live. Any projection left over is stale; the next
    /// snapshot repopulates it.
    pub fn on_connected(&self, id: ParticipantId) -> Step {
        info!(%id, "connection established");
        self.store.update(|p| {
            p.clear();
            p.connection = ConnectionState::Connected { id };
            p.last_error = None;
            Step::Applied
        })
    }

    pub fn on_connection_failed(&self, attempt: usize, cause: String) -> Step {
        debug!(attempt, %cause, "recording failed attempt");
        self.store.update(|p| {
            p.clear();
            p.connection = ConnectionState::Disconnected;
            p.record(Fault::ConnectionFailed(cause));
            Step::Applied
        })
    }

    /// The link is gone. The coordinator drops our seat with it, so the
    /// membership resets along with the projection.
    pub fn on_disconnected(&self, reason: Option<String>, voluntary: bool) -> Step {
        info!(?reason, voluntary, "connection closed");
        self.store.update(|p| {
            p.clear();
            p.connection = ConnectionState::Disconnected;
            log_rejected(p.membership.apply_mut(MembershipEvent::Reset));
            if !voluntary {
                let cause = reason.unwrap_or_else(|| "connection closed".to_string());
                p.record(Fault::ConnectionLost(cause));
            }
            Step::Applied
        })
    }

    pub fn on_gave_up(&self, attempts: usize, cause: String) -> Step {
        warn!(attempts, %cause, "transport gave up");
        self.store.update(|p| {
            p.clear();
            p.connection = ConnectionState::GaveUp { attempts };
            log_rejected(p.membership.apply_mut(MembershipEvent::Reset));
            p.record(Fault::GaveUp { attempts, cause });
            Step::Applied
        })
    }

    // Inbound

    /// Replace the session wholesale.
    pub fn on_snapshot(&self, session: Session) -> Step {
        debug!(room = %session.session_id, phase = %session.phase, "snapshot");
        self.store.update(|p| adopt(p, session))
    }

    /// A participant joined. Re-delivery is harmless: the roster is keyed by id.
    pub fn on_participant_joined(&self, participant: Participant, mut session: Session) -> Step {
        debug!(id = %participant.id, name = %participant.display_name, "participant joined");
        self.store.update(|p| {
            if p.identity().is_local(&participant.id) && !for_other_room(p, &session) {
                forget_rejection(p);
            }

            session.status_message = format!("{} joined the game", participant.display_name);
            session.upsert_participant(participant);
            adopt(p, session)
        })
    }

    /// A participant left. If it was us, the local session ends here.
    pub fn on_participant_left(
        &self,
        participant_id: ParticipantId,
        participant_name: String,
        mut session: Session,
    ) -> Step {
        debug!(id = %participant_id, name = %participant_name, "participant left");
        self.store.update(|p| {
            if for_other_room(p, &session) {
                debug!(room = %session.session_id, "departure from another room");
                return Step::Ignored("session for another room");
            }
            if p.identity().is_local(&participant_id) {
                info!("local participant left the room");
                p.clear();
                log_rejected(p.membership.apply_mut(MembershipEvent::Departed));
                return Step::Applied;
            }

            session.remove_participant(&participant_id);
            session.status_message = format!("{} left the game", participant_name);
            adopt(p, session)
        })
    }

    /// A single participant record changed.
    pub fn on_participant_updated(&self, participant: Participant) -> Step {
        let participant_id = participant.id.clone();
        self.store.update(|p| {
            let Some(session) = p.session.as_mut() else {
                return Step::Ignored("no session");
            };
            let Some(entry) = session.participant_mut(&participant.id) else {
                warn!(id = %participant.id, "update for participant not in session");
                return Step::Ignored("participant not seated");
            };
            *entry = participant;
            if p.identity().is_local(&participant_id) {
                p.pending_intent = None;
            }
            p.refresh_local();
            Step::Applied
        })
    }

    /// Annotation only. Phase, roster, and bets are left alone.
    pub fn on_status_message(&self, text: String) -> Step {
        self.store.update(|p| match p.session.as_mut() {
            Some(session) => {
                session.status_message = text;
                Step::Applied
            }
            None => Step::Ignored("no session"),
        })
    }

    /// The coordinator refused our join. Existing state stays as it was.
    pub fn on_join_rejected(&self, reason: String) -> Step {
        warn!(%reason, "join rejected");
        self.store.update(|p| {
            log_rejected(p.membership.apply_mut(MembershipEvent::Reject));
            p.record(Fault::JoinRejected(reason));
            Step::Applied
        })
    }

    // Local intents

    /// A join was sent. Switching rooms drops the old room's projection.
    pub fn on_join_requested(&self, room_id: RoomId, name: String) -> Step {
        self.store.update(|p| {
            let switching = p.membership.is_joined();
            match p
                .membership
                .apply_mut(MembershipEvent::RequestJoin { room_id, name })
            {
                Ok(()) => {
                    if switching {
                        p.clear();
                    }
                    forget_rejection(p);
                    Step::Applied
                }
                Err(err) => {
                    log_rejected(Err(err));
                    Step::Ignored("join not applicable")
                }
            }
        })
    }

    /// `action` was sent and waits for the coordinator to reflect it.
    pub fn on_intent_sent(&self, action: Action) -> Step {
        debug!(%action, "intent sent");
        self.store.update(|p| {
            p.pending_intent = Some(action);
            Step::Applied
        })
    }

    /// A leave was sent. The projection goes away now, without waiting for the echo.
    pub fn on_leave_requested(&self) -> Step {
        self.store.update(|p| match p.membership.apply_mut(MembershipEvent::RequestLeave) {
            Ok(()) => {
                p.clear();
                Step::Applied
            }
            Err(err) => {
                log_rejected(Err(err));
                Step::Ignored("leave not applicable")
            }
        })
    }
}

/// Install `session` as the authoritative projection.
fn adopt(p: &mut Projection, session: Session) -> Step {
    if for_other_room(p, &session) {
        debug!(room = %session.session_id, "ignoring session for another room");
        return Step::Ignored("session for another room");
    }

    let local_seated = p.identity().resolve_local(&session).is_some();

    if p.membership.is_leaving() {
        if !local_seated {
            debug!("leave confirmed by snapshot");
            log_rejected(p.membership.apply_mut(MembershipEvent::Departed));
        }
        return Step::Ignored("leave pending");
    }

    if let Err(fault) = session.validate() {
        return integrity_fault(p, fault);
    }

    if local_seated {
        log_rejected(p.membership.apply_mut(MembershipEvent::Confirm {
            room_id: session.session_id.clone(),
        }));
    } else if p.membership.is_joined() {
        info!("local participant no longer seated");
        log_rejected(p.membership.apply_mut(MembershipEvent::Departed));
    }

    p.session = Some(session);
    p.pending_intent = None;
    p.refresh_local();
    Step::Applied
}

/// Membership is bound to a room and `session` belongs to a different one.
fn for_other_room(p: &Projection, session: &Session) -> bool {
    p.membership
        .room_id()
        .is_some_and(|room| *room != session.session_id)
}

fn integrity_fault(p: &mut Projection, fault: IntegrityFault) -> Step {
    warn!(%fault, "discarding inconsistent session");
    p.clear();
    let fault = Fault::DataIntegrity(fault);
    p.record(fault.clone());
    Step::Faulted(fault)
}

fn forget_rejection(p: &mut Projection) {
    let rejected = p
        .last_error
        .as_ref()
        .is_some_and(|record| matches!(record.fault, Fault::JoinRejected(_)));
    if rejected {
        p.last_error = None;
    }
}

fn log_rejected(result: Result<(), InvalidTransition>) {
    if let Err(err) = result {
        debug!("membership unchanged: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::game::{Card, Hand, Phase, Rank, Suit};
    use crate::state::player::{Membership, ParticipantStatus};
    use pretty_assertions::assert_eq;

    fn make_participant(id: &str, chips: u64) -> Participant {
        Participant::new(ParticipantId::from(id), id.to_uppercase(), chips)
    }

    fn make_session(room: &str, phase: Phase, ids: &[&str]) -> Session {
        let mut session = Session::new(RoomId::from(room));
        session.phase = phase;
        for id in ids {
            session.participants.push(make_participant(id, 1000));
        }
        session
    }

    fn connected(local: &str) -> Reconciler {
        let engine = Reconciler::default();
        engine.on_connected(ParticipantId::from(local));
        engine
    }

    fn assert_consistent(projection: &Projection) {
        let session = projection.session().unwrap();
        match projection.identity().resolve_local(session) {
            Some(entry) => assert!(projection.local().unwrap().agrees_with(entry)),
            None => assert!(projection.local().is_none()),
        }
    }

    #[test]
    fn test_snapshot_populates_local_view() {
        let engine = connected("a");
        let step = engine.on_snapshot(make_session("R1", Phase::Waiting, &["a", "b"]));
        assert_eq!(step, Step::Applied);

        let projection = engine.store().current();
        assert_eq!(projection.phase(), Some(Phase::Waiting));
        assert_eq!(projection.local().unwrap().id, ParticipantId::from("a"));
        assert_eq!(
            projection.membership(),
            &Membership::Joined {
                room_id: RoomId::from("R1")
            }
        );
    }

    #[test]
    fn test_local_view_tracks_every_snapshot() {
        let engine = connected("a");

        let mut sessions = Vec::new();
        sessions.push(make_session("R1", Phase::Waiting, &["b"]));
        sessions.push(make_session("R1", Phase::Waiting, &["b", "a"]));

        let mut betting = make_session("R1", Phase::Betting, &["a", "b"]);
        betting.participants[0].bet = 50;
        betting.participants[0].chips = 950;
        betting.participants[0].status = ParticipantStatus::BetPlaced;
        sessions.push(betting);

        let mut playing = make_session("R1", Phase::Playing, &["a", "b"]);
        playing.active_participant_id = Some(ParticipantId::from("a"));
        playing.participants[0].hand = Hand::new(vec![
            Card::new(Rank::Ace, Suit::Hearts),
            Card::new(Rank::King, Suit::Clubs),
        ])
        .with_reported_score(21);
        playing.participants[0].status = ParticipantStatus::Blackjack;
        sessions.push(playing);

        sessions.push(make_session("R1", Phase::GameOver, &["b"]));

        for session in sessions {
            engine.on_snapshot(session);
            assert_consistent(&engine.store().current());
        }

        assert!(engine.store().current().local().is_none());
    }

    #[test]
    fn test_current_turn_flag() {
        let engine = connected("a");
        let mut playing = make_session("R1", Phase::Playing, &["a", "b"]);
        playing.active_participant_id = Some(ParticipantId::from("a"));
        engine.on_snapshot(playing);
        assert!(engine.store().current().local().unwrap().is_current_turn);
    }

    #[test]
    fn test_dangling_active_participant_faults() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a"]));

        let mut broken = make_session("R1", Phase::Playing, &["a"]);
        broken.active_participant_id = Some(ParticipantId::from("ghost"));
        let step = engine.on_snapshot(broken);

        assert!(matches!(step, Step::Faulted(Fault::DataIntegrity(_))));
        let projection = engine.store().current();
        assert!(projection.session().is_none());
        assert!(projection.local().is_none());
        assert_eq!(
            projection.last_error().unwrap().fault,
            Fault::DataIntegrity(IntegrityFault::DanglingActiveParticipant(
                ParticipantId::from("ghost")
            ))
        );

        // Membership survives so the next snapshot resyncs
        assert!(projection.membership().is_joined());
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a"]));
        assert!(engine.store().current().local().is_some());
    }

    #[test]
    fn test_participant_joined_is_idempotent() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a"]));

        // Coordinator state that predates the join
        let stale = make_session("R1", Phase::Waiting, &["a"]);
        engine.on_participant_joined(make_participant("b", 1000), stale.clone());
        let once = engine.store().current().session().unwrap().participants.clone();

        engine.on_participant_joined(make_participant("b", 1000), stale);
        let twice = engine.store().current().session().unwrap().participants.clone();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
        assert_eq!(
            engine.store().current().session().unwrap().status_message,
            "B joined the game"
        );
    }

    #[test]
    fn test_local_join_confirms_and_clears_rejection() {
        let engine = connected("a");
        engine.on_join_requested(RoomId::from("R1"), "A".to_string());
        engine.on_join_rejected("room full".to_string());
        assert!(engine.store().current().last_error().is_some());

        engine.on_join_requested(RoomId::from("R2"), "A".to_string());
        engine.on_participant_joined(
            make_participant("a", 1000),
            make_session("R2", Phase::Waiting, &[]),
        );

        let projection = engine.store().current();
        assert!(projection.last_error().is_none());
        assert!(projection.membership().is_joined());
        assert_eq!(projection.local().unwrap().chips, 1000);
        assert_consistent(&projection);
    }

    #[test]
    fn test_join_rejected_leaves_state_untouched() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Betting, &["a", "b"]));
        let before = engine.store().current();

        engine.on_join_rejected("room full".to_string());

        let after = engine.store().current();
        assert_eq!(after.session(), before.session());
        assert_eq!(after.local(), before.local());
        assert_eq!(
            after.last_error().unwrap().fault,
            Fault::JoinRejected("room full".to_string())
        );
    }

    #[test]
    fn test_remote_participant_left() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a", "b"]));

        engine.on_participant_left(
            ParticipantId::from("b"),
            "Bob".to_string(),
            make_session("R1", Phase::Waiting, &["a", "b"]),
        );

        let projection = engine.store().current();
        let session = projection.session().unwrap();
        assert_eq!(session.participants.len(), 1);
        assert_eq!(session.status_message, "Bob left the game");
        assert!(projection.local().is_some());
    }

    #[test]
    fn test_local_participant_left_unjoins() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a", "b"]));

        engine.on_participant_left(
            ParticipantId::from("a"),
            "A".to_string(),
            make_session("R1", Phase::Waiting, &["b"]),
        );

        let projection = engine.store().current();
        assert!(projection.session().is_none());
        assert!(projection.local().is_none());
        assert_eq!(projection.membership(), &Membership::Unjoined);
        // Leaving is not a disconnect
        assert!(projection.is_connected());
    }

    #[test]
    fn test_status_message_is_annotation_only() {
        let engine = connected("a");
        let mut session = make_session("R1", Phase::Betting, &["a"]);
        session.participants[0].bet = 25;
        engine.on_snapshot(session);
        let before = engine.store().current();

        engine.on_status_message("Dealer shuffles".to_string());

        let after = engine.store().current();
        let (before, after) = (before.session().unwrap(), after.session().unwrap());
        assert_eq!(after.status_message, "Dealer shuffles");
        assert_eq!(after.phase, before.phase);
        assert_eq!(after.participants, before.participants);

        let empty = connected("a");
        assert_eq!(
            empty.on_status_message("hello".to_string()),
            Step::Ignored("no session")
        );
    }

    #[test]
    fn test_participant_update_keeps_views_in_step() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Betting, &["a", "b"]));

        let mut updated = make_participant("a", 900);
        updated.bet = 100;
        updated.status = ParticipantStatus::BetPlaced;
        assert_eq!(engine.on_participant_updated(updated), Step::Applied);

        let projection = engine.store().current();
        assert_eq!(projection.local().unwrap().bet, 100);
        assert_consistent(&projection);

        assert_eq!(
            engine.on_participant_updated(make_participant("z", 1)),
            Step::Ignored("participant not seated")
        );
    }

    #[test]
    fn test_disconnect_clears_everything() {
        let engine = connected("a");
        let mut session = make_session("R1", Phase::Playing, &["a"]);
        session.active_participant_id = Some(ParticipantId::from("a"));
        session.pot_total = 300;
        engine.on_snapshot(session);

        engine.on_disconnected(Some("reset by peer".to_string()), false);
        let projection = engine.store().current();
        assert!(projection.session().is_none());
        assert!(projection.local().is_none());
        assert_eq!(projection.membership(), &Membership::Unjoined);
        assert_eq!(
            projection.last_error().unwrap().fault,
            Fault::ConnectionLost("reset by peer".to_string())
        );

        // Fresh snapshot after reconnect carries nothing over
        engine.on_connected(ParticipantId::from("a2"));
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a2"]));
        let projection = engine.store().current();
        let session = projection.session().unwrap();
        assert_eq!(session.pot_total, 0);
        assert_eq!(session.active_participant_id, None);
        assert_eq!(projection.local().unwrap().id, ParticipantId::from("a2"));
        assert!(projection.last_error().is_none());
    }

    #[test]
    fn test_optimistic_leave() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a", "b"]));

        assert_eq!(engine.on_leave_requested(), Step::Applied);
        let projection = engine.store().current();
        assert!(projection.session().is_none());
        assert!(projection.membership().is_leaving());

        // A snapshot sent before the coordinator saw the leave is not shown
        let step = engine.on_snapshot(make_session("R1", Phase::Waiting, &["a", "b"]));
        assert_eq!(step, Step::Ignored("leave pending"));
        assert!(engine.store().current().session().is_none());

        // One that no longer lists us settles the leave
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["b"]));
        let projection = engine.store().current();
        assert_eq!(projection.membership(), &Membership::Unjoined);
        assert!(projection.session().is_none());
    }

    #[test]
    fn test_switching_rooms_drops_old_projection() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a"]));

        engine.on_join_requested(RoomId::from("R2"), "A".to_string());
        let projection = engine.store().current();
        assert!(projection.session().is_none());
        assert!(projection.membership().is_joining());
    }

    #[test]
    fn test_stale_room_snapshot_after_switch_is_ignored() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a", "b"]));
        engine.on_join_requested(RoomId::from("R2"), "A".to_string());

        // R1 state still in flight when the switch was sent
        let step = engine.on_snapshot(make_session("R1", Phase::Betting, &["a", "b"]));
        assert_eq!(step, Step::Ignored("session for another room"));

        let step = engine.on_participant_left(
            ParticipantId::from("a"),
            "A".to_string(),
            make_session("R1", Phase::Betting, &["b"]),
        );
        assert_eq!(step, Step::Ignored("session for another room"));

        let projection = engine.store().current();
        assert!(projection.session().is_none());
        assert!(projection.local().is_none());
        assert_eq!(
            projection.membership(),
            &Membership::Joining {
                room_id: RoomId::from("R2"),
                name: "A".to_string()
            }
        );
        assert_eq!(projection.room_id(), Some(&RoomId::from("R2")));

        engine.on_snapshot(make_session("R2", Phase::Waiting, &["a"]));
        let projection = engine.store().current();
        assert_eq!(
            projection.membership(),
            &Membership::Joined {
                room_id: RoomId::from("R2")
            }
        );
        assert_consistent(&projection);
    }

    #[test]
    fn test_pending_intent_cleared_by_authoritative_state() {
        let engine = connected("a");
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a", "b"]));

        engine.on_intent_sent(Action::Ready);
        assert_eq!(engine.store().current().pending_intent(), Some(Action::Ready));

        // Another participant's update says nothing about our request
        engine.on_participant_updated(make_participant("b", 1000));
        assert_eq!(engine.store().current().pending_intent(), Some(Action::Ready));

        engine.on_participant_updated(make_participant("a", 1000));
        assert_eq!(engine.store().current().pending_intent(), None);

        engine.on_intent_sent(Action::Ready);
        engine.on_snapshot(make_session("R1", Phase::Waiting, &["a", "b"]));
        assert_eq!(engine.store().current().pending_intent(), None);
    }

    #[test]
    fn test_gave_up() {
        let engine = Reconciler::default();
        engine.on_transport(TransportEvent::Connecting { attempt: 3 });
        assert_eq!(
            engine.store().current().connection(),
            &ConnectionState::Connecting { attempt: 3 }
        );

        engine.on_transport(TransportEvent::GaveUp {
            attempts: 3,
            cause: "refused".to_string(),
        });
        let projection = engine.store().current();
        assert_eq!(
            projection.connection(),
            &ConnectionState::GaveUp { attempts: 3 }
        );
        assert!(matches!(
            projection.last_error().unwrap().fault,
            Fault::GaveUp { attempts: 3, .. }
        ));
    }
}
