//! Shared fixtures for game tests

use std::sync::Arc;
use std::time::Duration;

use glam::Vec3;

use crate::store::{AccountId, Owner, RecordId, Replica, SyncHub};

use super::attach::create_player;
use super::schema::{GameSnapshot, GameStatus};
use super::session::{GameHandle, LoadDepth};
use super::tag::PositionWriter;

/// A zero-latency hub with one created game
pub(crate) struct Table {
    pub hub: Arc<SyncHub>,
    pub creator: GameHandle,
}

impl Table {
    pub fn new() -> Self {
        let hub = SyncHub::new(Duration::ZERO);
        let replica = Replica::connect(&hub, AccountId::new());
        let creator = GameHandle::create(&replica).unwrap();
        Self { hub, creator }
    }

    /// The game's permission group
    pub fn group(&self) -> RecordId {
        let view = self.creator.replica().map(self.creator.id()).unwrap().unwrap();
        match view.header.owner {
            Owner::Group(group) => group,
            Owner::Account(_) => panic!("game record owned by an account"),
        }
    }

    /// A new participant attached to the game, fully replicated
    pub fn join(&self) -> GameHandle {
        let replica = Replica::connect(&self.hub, AccountId::new());
        let game = GameHandle::attach(&replica, self.creator.id());
        self.snapshot(&game);
        game
    }

    /// A new participant with a listed player at `position`
    pub fn seat(&self, position: Vec3) -> (GameHandle, RecordId) {
        let game = self.join();
        let list = self.snapshot(&game).players_list;
        let player = create_player(&game, "#abcdef".into()).unwrap();
        PositionWriter::claim(&game, player)
            .unwrap()
            .write(position)
            .unwrap();
        game.append_player(list, player).unwrap();
        self.hub.deliver_all();
        (game, player)
    }

    pub fn set_it(&self, player: RecordId) {
        self.creator.write_status(GameStatus::Playing).unwrap();
        self.creator.write_current_it(player).unwrap();
        self.hub.deliver_all();
    }

    /// Fully resolved snapshot as seen through `game`
    pub fn snapshot(&self, game: &GameHandle) -> GameSnapshot {
        for _ in 0..4 {
            self.hub.deliver_all();
            if let Some(snapshot) = game.load(LoadDepth::Deep).unwrap() {
                if snapshot.players_loaded() {
                    return snapshot;
                }
            }
        }
        panic!("game {} did not replicate", game.id());
    }
}
