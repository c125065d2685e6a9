//! Per-participant tick loop
//!
//! One task per connected participant. Each tick steps the body, binds the
//! local player once the players list has loaded, runs the tag evaluator
//! and broadcasts a frame of what the client should render.

use dashmap::DashMap;
use futures::StreamExt;
use glam::Vec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::store::{AccountId, RecordId, ReplicaId};
use crate::util::time::{tick_delta, tick_period, DEFAULT_TICK_RATE};

use super::attach::{attach_local_player, Attachment, ElectionPolicy};
use super::body::PhysicsBody;
use super::projector::{project_remote_players, RemotePlayerView};
use super::schema::{GameSnapshot, GameStatus};
use super::session::{GameHandle, LoadDepth};
use super::tag::{PositionWriter, TagEvaluator, TickOutcome};
use super::GameError;

/// Messages into a participant loop
#[derive(Debug, Clone)]
pub enum ParticipantInput {
    /// Latest translation from an externally simulated body
    Pose(Vec3),
    Ping { t: u64 },
    Leave,
}

/// What the client renders for one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub tick: u64,
    pub game_id: RecordId,
    pub status: GameStatus,
    pub current_it: Option<RecordId>,
    pub local_player: Option<RecordId>,
    pub is_it: bool,
    pub remotes: Vec<RemotePlayerView>,
}

/// Events out of a participant loop
#[derive(Debug, Clone)]
pub enum ParticipantEvent {
    /// The Game has not replicated yet
    Loading { tick: u64 },
    Frame(Frame),
    Pong { t: u64 },
}

/// Tuning for a participant loop
#[derive(Debug, Clone, Copy)]
pub struct ParticipantSettings {
    pub tick_rate: u32,
    pub election: ElectionPolicy,
}

impl Default for ParticipantSettings {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            election: ElectionPolicy::default(),
        }
    }
}

/// State owned by the participant task
pub struct ParticipantState {
    game: GameHandle,
    body: Box<dyn PhysicsBody>,
    settings: ParticipantSettings,
    rng: ChaCha8Rng,
    tick: u64,
    latest: Option<GameSnapshot>,
    evaluator: Option<TagEvaluator>,
}

impl ParticipantState {
    pub fn new(
        game: GameHandle,
        body: Box<dyn PhysicsBody>,
        settings: ParticipantSettings,
        seed: u64,
    ) -> Self {
        Self {
            game,
            body,
            settings,
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick: 0,
            latest: None,
            evaluator: None,
        }
    }

    pub fn local_player(&self) -> Option<RecordId> {
        self.evaluator.as_ref().map(TagEvaluator::player)
    }

    pub(crate) fn observe(&mut self, snapshot: GameSnapshot) {
        self.latest = Some(snapshot);
    }

    /// Re-read the Game after a local write
    pub(crate) fn refresh(&mut self) {
        match self.game.load(LoadDepth::Deep) {
            Ok(Some(snapshot)) => self.latest = Some(snapshot),
            Ok(None) => {}
            Err(e) => warn!(game_id = %self.game.id(), error = %e, "Failed to reload game"),
        }
    }

    pub(crate) fn run_tick(&mut self) -> ParticipantEvent {
        self.tick += 1;
        self.body.step(tick_delta(self.settings.tick_rate));

        let Some(snapshot) = self.latest.clone() else {
            return ParticipantEvent::Loading { tick: self.tick };
        };

        let snapshot = if self.evaluator.is_none() && self.bind(&snapshot) {
            self.refresh();
            self.latest.clone().unwrap_or(snapshot)
        } else {
            snapshot
        };

        if let Some(evaluator) = self.evaluator.as_mut() {
            match evaluator.tick(&self.game, self.body.as_ref(), &snapshot) {
                Ok(TickOutcome::Tagged { .. }) => self.refresh(),
                Ok(TickOutcome::Mirrored) => {}
                Err(GameError::Body(e)) => {
                    trace!(game_id = %self.game.id(), error = %e, "Body not readable, tick skipped");
                }
                Err(e) => {
                    warn!(game_id = %self.game.id(), error = %e, "Tick skipped");
                }
            }
        }

        match &self.latest {
            Some(latest) => ParticipantEvent::Frame(self.frame(latest)),
            None => ParticipantEvent::Loading { tick: self.tick },
        }
    }

    /// Try to bind the local player. Returns whether anything was written.
    fn bind(&mut self, snapshot: &GameSnapshot) -> bool {
        let attachment = match attach_local_player(
            &self.game,
            snapshot,
            &mut self.rng,
            self.settings.election,
        ) {
            Ok(attachment) => attachment,
            Err(e) => {
                warn!(game_id = %self.game.id(), error = %e, "Failed to attach local player");
                return false;
            }
        };

        let Some(player) = attachment.player() else {
            return false;
        };
        match PositionWriter::claim(&self.game, player) {
            Ok(writer) => self.evaluator = Some(TagEvaluator::new(writer)),
            Err(e) => warn!(game_id = %self.game.id(), player_id = %player, error = %e, "Failed to claim player"),
        }
        matches!(attachment, Attachment::Created { .. })
    }

    fn frame(&self, snapshot: &GameSnapshot) -> Frame {
        let local_player = self.local_player();
        Frame {
            tick: self.tick,
            game_id: snapshot.id,
            status: snapshot.status,
            current_it: snapshot.current_it,
            local_player,
            is_it: local_player.is_some_and(|p| snapshot.is_it(p)),
            remotes: project_remote_players(snapshot, self.game.replica().account()),
        }
    }
}

/// Handle to a running participant
#[derive(Clone)]
pub struct ParticipantHandle {
    pub replica_id: ReplicaId,
    pub account: AccountId,
    pub game_id: RecordId,
    pub input_tx: mpsc::Sender<ParticipantInput>,
    pub events_tx: broadcast::Sender<ParticipantEvent>,
}

impl ParticipantHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ParticipantEvent> {
        self.events_tx.subscribe()
    }
}

/// Registry of running participants
pub struct ParticipantRegistry {
    participants: DashMap<ReplicaId, ParticipantHandle>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self {
            participants: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: ParticipantHandle) {
        self.participants.insert(handle.replica_id, handle);
    }

    pub fn remove(&self, id: &ReplicaId) -> Option<ParticipantHandle> {
        self.participants.remove(id).map(|(_, h)| h)
    }

    pub fn count(&self) -> usize {
        self.participants.len()
    }

    /// Participants connected to `game`
    pub fn in_game(&self, game: RecordId) -> usize {
        self.participants
            .iter()
            .filter(|p| p.value().game_id == game)
            .count()
    }

    /// Distinct games with at least one participant
    pub fn games(&self) -> usize {
        let mut games: Vec<RecordId> = self
            .participants
            .iter()
            .map(|p| p.value().game_id)
            .collect();
        games.sort_unstable();
        games.dedup();
        games.len()
    }
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A participant task
pub struct Participant {
    state: ParticipantState,
    input_rx: mpsc::Receiver<ParticipantInput>,
    events_tx: broadcast::Sender<ParticipantEvent>,
}

impl Participant {
    pub fn new(
        game: GameHandle,
        body: Box<dyn PhysicsBody>,
        settings: ParticipantSettings,
    ) -> (Self, ParticipantHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(64);

        let handle = ParticipantHandle {
            replica_id: game.replica().id(),
            account: game.replica().account(),
            game_id: game.id(),
            input_tx,
            events_tx: events_tx.clone(),
        };

        let participant = Self {
            state: ParticipantState::new(game, body, settings, rand::random()),
            input_rx,
            events_tx,
        };

        (participant, handle)
    }

    /// Run until `Leave` arrives or every input sender is gone
    pub async fn run(mut self) {
        let game_id = self.state.game.id();
        let account = self.state.game.replica().account();
        info!(game_id = %game_id, account_id = %account, "Participant started");

        let mut ticker = interval(tick_period(self.state.settings.tick_rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut snapshots = Box::pin(self.state.game.snapshots());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.process_inputs() {
                        break;
                    }
                    let event = self.state.run_tick();
                    let _ = self.events_tx.send(event);
                }
                Some(snapshot) = snapshots.next() => {
                    self.state.observe(snapshot);
                }
            }
        }

        info!(
            game_id = %game_id,
            account_id = %account,
            player_id = ?self.state.local_player(),
            "Participant left"
        );
    }

    /// Drain pending inputs. Returns false once the participant should stop.
    fn process_inputs(&mut self) -> bool {
        loop {
            match self.input_rx.try_recv() {
                Ok(ParticipantInput::Pose(translation)) => self.state.body.report(translation),
                Ok(ParticipantInput::Ping { t }) => {
                    let _ = self.events_tx.send(ParticipantEvent::Pong { t });
                }
                Ok(ParticipantInput::Leave) => return false,
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!(game_id = %self.state.game.id(), "Input channel closed");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::game::body::RemoteBody;
    use crate::game::projector::IT_COLOR;
    use crate::game::testing::Table;
    use crate::store::Replica;

    fn remote_at(position: Vec3) -> Box<dyn PhysicsBody> {
        let mut body = RemoteBody::default();
        body.report(position);
        Box::new(body)
    }

    fn frame(event: ParticipantEvent) -> Frame {
        match event {
            ParticipantEvent::Frame(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn loading_until_replicated_then_attaches_once() {
        let table = Table::new();
        let replica = Replica::connect(&table.hub, AccountId::new());
        let game = GameHandle::attach(&replica, table.creator.id());
        let mut state =
            ParticipantState::new(game.clone(), remote_at(Vec3::ZERO), Default::default(), 1);

        assert!(matches!(state.run_tick(), ParticipantEvent::Loading { tick: 1 }));

        let snapshot = table.snapshot(&game);
        state.observe(snapshot);
        let first = frame(state.run_tick());
        let player = first.local_player.expect("bound after the list loaded");

        for _ in 0..10 {
            table.hub.deliver_all();
            state.refresh();
            assert_eq!(frame(state.run_tick()).local_player, Some(player));
        }

        let seen = table.snapshot(&table.creator);
        let owned: Vec<_> = seen
            .loaded_players()
            .filter(|p| p.owner == replica.account())
            .collect();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].position, Vec3::ZERO);
    }

    #[test]
    fn creator_starts_as_it_and_tags_close_players() {
        let table = Table::new();
        let mut state = ParticipantState::new(
            table.creator.clone(),
            remote_at(Vec3::ZERO),
            Default::default(),
            2,
        );
        state.observe(table.snapshot(&table.creator));
        let first = frame(state.run_tick());
        assert!(first.is_it);
        assert_eq!(first.status, GameStatus::Playing);

        let (_, near) = table.seat(Vec3::new(0.5, 0.0, 0.0));
        state.observe(table.snapshot(&table.creator));
        let tagged = frame(state.run_tick());
        assert_eq!(tagged.current_it, Some(near));
        assert!(!tagged.is_it);

        let remote = &tagged.remotes[0];
        assert_eq!(remote.id, near);
        assert_eq!(remote.color, IT_COLOR);
    }

    #[test]
    fn reconnecting_account_binds_its_existing_player() {
        let table = Table::new();
        let account = AccountId::new();

        let first = Replica::connect(&table.hub, account);
        let game = GameHandle::attach(&first, table.creator.id());
        let mut state =
            ParticipantState::new(game.clone(), remote_at(Vec3::ZERO), Default::default(), 3);
        state.observe(table.snapshot(&game));
        let player = frame(state.run_tick()).local_player.unwrap();
        drop(state);
        drop(game);
        drop(first);

        let second = Replica::connect(&table.hub, account);
        let game = GameHandle::attach(&second, table.creator.id());
        let mut state =
            ParticipantState::new(game.clone(), remote_at(Vec3::ZERO), Default::default(), 4);
        state.observe(table.snapshot(&game));
        assert_eq!(frame(state.run_tick()).local_player, Some(player));
        assert_eq!(table.snapshot(&game).slots().len(), 1);
    }

    #[test]
    fn unreadable_body_skips_ticks_until_a_pose_arrives() {
        let table = Table::new();
        let game = table.join();
        let mut state = ParticipantState::new(
            game.clone(),
            Box::new(RemoteBody::default()),
            Default::default(),
            5,
        );
        state.observe(table.snapshot(&game));

        let first = frame(state.run_tick());
        let player = first.local_player.expect("bound without a pose");
        let spawned = table.snapshot(&table.creator).player(player).unwrap().position;

        let second = frame(state.run_tick());
        assert_eq!(second.tick, 2);
        assert_eq!(second.local_player, Some(player));
        assert_eq!(
            table.snapshot(&table.creator).player(player).unwrap().position,
            spawned
        );

        let pose = Vec3::new(2.0, 0.0, 3.0);
        state.body.report(pose);
        frame(state.run_tick());
        assert_eq!(table.snapshot(&table.creator).player(player).unwrap().position, pose);
    }

    #[test]
    fn registry_counts_games() {
        let table = Table::new();
        let registry = ParticipantRegistry::new();
        let (_, a) = Participant::new(table.creator.clone(), remote_at(Vec3::ZERO), Default::default());
        let (_, b) = Participant::new(table.join(), remote_at(Vec3::ZERO), Default::default());
        let other = Table::new();
        let (_, c) = Participant::new(other.creator.clone(), remote_at(Vec3::ZERO), Default::default());

        let b_id = b.replica_id;
        registry.insert(a);
        registry.insert(b);
        registry.insert(c);
        assert_eq!(registry.count(), 3);
        assert_eq!(registry.games(), 2);
        assert_eq!(registry.in_game(table.creator.id()), 2);

        assert!(registry.remove(&b_id).is_some());
        assert_eq!(registry.in_game(table.creator.id()), 1);
    }

    #[tokio::test]
    async fn run_loop_emits_frames_and_stops_on_leave() {
        let table = Table::new();
        let settings = ParticipantSettings {
            tick_rate: 200,
            ..Default::default()
        };
        let (participant, handle) =
            Participant::new(table.creator.clone(), Box::new(RemoteBody::default()), settings);
        let mut events = handle.subscribe();
        let task = tokio::spawn(participant.run());

        handle
            .input_tx
            .send(ParticipantInput::Pose(Vec3::new(1.0, 0.0, 0.0)))
            .await
            .unwrap();
        handle.input_tx.send(ParticipantInput::Ping { t: 42 }).await.unwrap();

        let (mut bound, mut pong) = (false, false);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !(bound && pong) {
                match events.recv().await {
                    Ok(ParticipantEvent::Frame(f)) => bound |= f.local_player.is_some(),
                    Ok(ParticipantEvent::Pong { t }) => pong |= t == 42,
                    Ok(ParticipantEvent::Loading { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(e) => panic!("event channel failed: {}", e),
                }
            }
        })
        .await
        .expect("participant produced a bound frame and a pong");

        handle.input_tx.send(ParticipantInput::Leave).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("participant stopped")
            .unwrap();

        let me = table.snapshot(&table.creator);
        let mine = me.player_owned_by(table.creator.replica().account()).unwrap();
        assert_eq!(mine.position, Vec3::new(1.0, 0.0, 0.0));
    }
}
