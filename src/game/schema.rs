//! Typed views over the Player and Game records

use glam::Vec3;
use rand::Rng;
use serde::Serialize;

use crate::store::{AccountId, MapView, RecordId, Value};

use super::GameError;

/// Field names as stored in the replicated records
pub mod keys {
    pub const POSITION_X: &str = "positionX";
    pub const POSITION_Y: &str = "positionY";
    pub const POSITION_Z: &str = "positionZ";
    pub const VELOCITY_X: &str = "velocityX";
    pub const VELOCITY_Y: &str = "velocityY";
    pub const VELOCITY_Z: &str = "velocityZ";
    pub const NAME: &str = "name";
    pub const COLOR: &str = "color";

    pub const PLAYERS: &str = "players";
    pub const CURRENT_IT: &str = "currentIt";
    pub const STATUS: &str = "status";
}

/// Where new players appear
pub const SPAWN_POSITION: Vec3 = Vec3::new(0.0, 6.0, 1.0);

/// Display name given to every new player
pub const PLACEHOLDER_NAME: &str = "Player";

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    Waiting,
    Playing,
    /// Retained for compatibility; nothing transitions here yet
    Ended,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Playing => "playing",
            GameStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(GameStatus::Waiting),
            "playing" => Some(GameStatus::Playing),
            "ended" => Some(GameStatus::Ended),
            _ => None,
        }
    }
}

/// Random `#rrggbb` display color
pub fn random_color(rng: &mut impl Rng) -> String {
    format!("#{:06x}", rng.gen_range(0..=0xff_ffff_u32))
}

/// Initial fields of a freshly spawned player
pub(crate) fn new_player_fields(color: String) -> Vec<(String, Value)> {
    let p = SPAWN_POSITION;
    vec![
        (keys::POSITION_X.into(), Value::Number(p.x as f64)),
        (keys::POSITION_Y.into(), Value::Number(p.y as f64)),
        (keys::POSITION_Z.into(), Value::Number(p.z as f64)),
        (keys::VELOCITY_X.into(), Value::Number(0.0)),
        (keys::VELOCITY_Y.into(), Value::Number(0.0)),
        (keys::VELOCITY_Z.into(), Value::Number(0.0)),
        (keys::NAME.into(), Value::Text(PLACEHOLDER_NAME.into())),
        (keys::COLOR.into(), Value::Text(color)),
    ]
}

/// Replicated state of one player
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub id: RecordId,
    /// Account that created the record
    pub owner: AccountId,
    pub position: Vec3,
    /// Stored but never written after spawn
    pub velocity: Vec3,
    pub name: String,
    pub color: String,
}

impl PlayerSnapshot {
    pub fn from_map(view: &MapView) -> Result<Self, GameError> {
        let number = |key: &'static str| {
            view.number(key)
                .map(|n| n as f32)
                .ok_or(GameError::MissingField {
                    record: view.id(),
                    key,
                })
        };
        let text = |key: &'static str| {
            view.text(key)
                .map(str::to_string)
                .ok_or(GameError::MissingField {
                    record: view.id(),
                    key,
                })
        };

        Ok(Self {
            id: view.id(),
            owner: view.header.created_by,
            position: Vec3::new(
                number(keys::POSITION_X)?,
                number(keys::POSITION_Y)?,
                number(keys::POSITION_Z)?,
            ),
            velocity: Vec3::new(
                number(keys::VELOCITY_X)?,
                number(keys::VELOCITY_Y)?,
                number(keys::VELOCITY_Z)?,
            ),
            name: text(keys::NAME)?,
            color: text(keys::COLOR)?,
        })
    }
}

/// One entry of the players list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlayerSlot {
    Loaded(PlayerSnapshot),
    /// Referenced but not replicated yet
    Stub { id: RecordId },
}

impl PlayerSlot {
    #[cfg(test)]
    pub fn id(&self) -> RecordId {
        match self {
            PlayerSlot::Loaded(p) => p.id,
            PlayerSlot::Stub { id } => *id,
        }
    }

    pub fn loaded(&self) -> Option<&PlayerSnapshot> {
        match self {
            PlayerSlot::Loaded(p) => Some(p),
            PlayerSlot::Stub { .. } => None,
        }
    }
}

/// Replicated state of a game session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSnapshot {
    pub id: RecordId,
    /// Account that created the session
    pub creator: AccountId,
    pub status: GameStatus,
    pub current_it: Option<RecordId>,
    pub players_list: RecordId,
    /// `None` while the list record itself has not replicated
    pub players: Option<Vec<PlayerSlot>>,
}

impl GameSnapshot {
    /// List resolved and every entry resolved
    pub fn players_loaded(&self) -> bool {
        self.players
            .as_ref()
            .is_some_and(|slots| slots.iter().all(|s| s.loaded().is_some()))
    }

    pub fn slots(&self) -> &[PlayerSlot] {
        self.players.as_deref().unwrap_or_default()
    }

    pub fn loaded_players(&self) -> impl Iterator<Item = &PlayerSnapshot> {
        self.slots().iter().filter_map(PlayerSlot::loaded)
    }

    #[cfg(test)]
    pub fn player(&self, id: RecordId) -> Option<&PlayerSnapshot> {
        self.loaded_players().find(|p| p.id == id)
    }

    /// The player created by `account`, if any
    pub fn player_owned_by(&self, account: AccountId) -> Option<&PlayerSnapshot> {
        self.loaded_players().find(|p| p.owner == account)
    }

    #[cfg(test)]
    pub fn contains_player(&self, id: RecordId) -> bool {
        self.slots().iter().any(|s| s.id() == id)
    }

    pub fn is_it(&self, player: RecordId) -> bool {
        self.current_it == Some(player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn colors_are_six_digit_hex() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let color = random_color(&mut rng);
            assert_eq!(color.len(), 7);
            assert!(color.starts_with('#'));
            assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn status_text_form_parses_back() {
        for status in [GameStatus::Waiting, GameStatus::Playing, GameStatus::Ended] {
            assert_eq!(GameStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(GameStatus::parse("paused"), None);
    }

    #[test]
    fn stubs_keep_players_unloaded() {
        let stub = RecordId::new();
        let snapshot = GameSnapshot {
            id: RecordId::new(),
            creator: AccountId::new(),
            status: GameStatus::Waiting,
            current_it: None,
            players_list: RecordId::new(),
            players: Some(vec![PlayerSlot::Stub { id: stub }]),
        };
        assert!(!snapshot.players_loaded());
        assert!(snapshot.contains_player(stub));
        assert!(snapshot.player(stub).is_none());

        let unlisted = GameSnapshot {
            players: None,
            ..snapshot
        };
        assert!(!unlisted.players_loaded());
        assert!(unlisted.slots().is_empty());
    }
}
