//! Tag evaluation, run once per rendered frame
//!
//! Every tick the local body's translation is mirrored into the local Player
//! record. Only the participant whose player is currently "it" then scans
//! the other players, in list (join) order, and hands "it" to the first one
//! strictly inside the tag radius.

use glam::Vec3;
use tracing::info;

use crate::store::{RecordId, StoreError, Value};

use super::body::PhysicsBody;
use super::schema::{keys, GameSnapshot, PlayerSlot};
use super::session::GameHandle;
use super::GameError;

/// Distance below which a tag happens
pub const TAG_DISTANCE: f32 = 1.0;

/// First player other than `local`, in list order, strictly closer than
/// `radius` to `position`. Stubs are never candidates.
pub fn find_tag_target(
    snapshot: &GameSnapshot,
    local: RecordId,
    position: Vec3,
    radius: f32,
) -> Option<RecordId> {
    snapshot
        .slots()
        .iter()
        .filter_map(PlayerSlot::loaded)
        .filter(|p| p.id != local)
        .find(|p| position.distance(p.position) < radius)
        .map(|p| p.id)
}

/// Write access to the position fields of a player owned by the local
/// account
pub struct PositionWriter {
    game: GameHandle,
    player: RecordId,
}

impl PositionWriter {
    /// Claim a player record. Fails unless the local account created it.
    pub fn claim(game: &GameHandle, player: RecordId) -> Result<Self, GameError> {
        let view = game
            .replica()
            .map(player)?
            .ok_or(StoreError::NotLoaded(player))?;
        if view.header.created_by != game.replica().account() {
            return Err(GameError::NotOwner { player });
        }
        Ok(Self {
            game: game.clone(),
            player,
        })
    }

    pub fn player(&self) -> RecordId {
        self.player
    }

    pub fn write(&self, position: Vec3) -> Result<(), GameError> {
        let replica = self.game.replica();
        replica.set(self.player, keys::POSITION_X, Value::Number(position.x as f64))?;
        replica.set(self.player, keys::POSITION_Y, Value::Number(position.y as f64))?;
        replica.set(self.player, keys::POSITION_Z, Value::Number(position.z as f64))?;
        Ok(())
    }
}

/// Right to reassign `currentIt`, held only while the local player is "it"
/// in the snapshot it was issued from
#[derive(Debug)]
pub struct TagAuthority {
    game: RecordId,
}

impl TagAuthority {
    pub fn check(snapshot: &GameSnapshot, local: RecordId) -> Option<Self> {
        snapshot.is_it(local).then_some(Self { game: snapshot.id })
    }

    /// Hand "it" to `target`, giving up the authority
    pub fn pass_to(self, game: &GameHandle, target: RecordId) -> Result<(), GameError> {
        if self.game != game.id() {
            return Err(GameError::StaleAuthority);
        }
        game.write_current_it(target)
    }
}

/// Result of one evaluated tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Position mirrored, "it" unchanged
    Mirrored,
    /// Position mirrored and "it" handed to `target`
    Tagged { target: RecordId },
}

/// Per-tick evaluator for one bound local player
pub struct TagEvaluator {
    writer: PositionWriter,
    radius: f32,
    last_written: Option<Vec3>,
}

impl TagEvaluator {
    pub fn new(writer: PositionWriter) -> Self {
        Self {
            writer,
            radius: TAG_DISTANCE,
            last_written: None,
        }
    }

    pub fn player(&self) -> RecordId {
        self.writer.player()
    }

    pub fn tick(
        &mut self,
        game: &GameHandle,
        body: &dyn PhysicsBody,
        snapshot: &GameSnapshot,
    ) -> Result<TickOutcome, GameError> {
        let position = body.translation()?;

        // Re-writing an unchanged pose changes nothing under LWW.
        if self.last_written != Some(position) {
            self.writer.write(position)?;
            self.last_written = Some(position);
        }

        let Some(authority) = TagAuthority::check(snapshot, self.player()) else {
            return Ok(TickOutcome::Mirrored);
        };

        match find_tag_target(snapshot, self.player(), position, self.radius) {
            Some(target) => {
                authority.pass_to(game, target)?;
                info!(
                    game_id = %game.id(),
                    from = %self.player(),
                    to = %target,
                    "Tagged player"
                );
                Ok(TickOutcome::Tagged { target })
            }
            None => Ok(TickOutcome::Mirrored),
        }
    }
}
