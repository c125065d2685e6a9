//! Session bootstrap and typed access to the Game record

use futures::Stream;
use tracing::{debug, info, warn};

use crate::store::{Member, RecordId, Replica, Role, Value};

use super::schema::{keys, GameSnapshot, GameStatus, PlayerSlot, PlayerSnapshot};
use super::GameError;

/// How far a load follows references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDepth {
    /// Game fields and list entries. Players already replicated are
    /// resolved, others stay stubs and are not requested.
    Shallow,
    /// Like `Shallow`, but every unresolved player is requested
    Deep,
}

/// Handle to a Game record through one participant's replica
#[derive(Clone)]
pub struct GameHandle {
    replica: Replica,
    id: RecordId,
}

impl GameHandle {
    /// Create a new session: an open-write group, an empty players list
    /// and the Game record itself
    pub fn create(replica: &Replica) -> Result<Self, GameError> {
        let group = replica.create_group();
        replica.grant(group, Member::Everyone, Role::Writer)?;
        let players = replica.create_list(group, Vec::new())?;
        let id = replica.create_map(
            group,
            vec![
                (keys::PLAYERS.into(), Value::Ref(players)),
                (keys::CURRENT_IT.into(), Value::Null),
                (
                    keys::STATUS.into(),
                    Value::Text(GameStatus::Waiting.as_str().into()),
                ),
            ],
        )?;

        info!(game_id = %id, account_id = %replica.account(), "Created game");
        Ok(Self {
            replica: replica.clone(),
            id,
        })
    }

    /// Attach to an existing session. Never creates anything; loads return
    /// `None` until the record has replicated.
    pub fn attach(replica: &Replica, id: RecordId) -> Self {
        if let Err(e) = replica.map(id) {
            warn!(game_id = %id, error = %e, "Session id does not name a game record");
        }
        Self {
            replica: replica.clone(),
            id,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn can_admin(&self) -> bool {
        self.replica.can_admin(self.id)
    }

    /// Read the current snapshot. `Ok(None)` while the Game record itself
    /// has not replicated.
    pub fn load(&self, depth: LoadDepth) -> Result<Option<GameSnapshot>, GameError> {
        let Some(game) = self.replica.map(self.id)? else {
            return Ok(None);
        };

        let status_text = game.text(keys::STATUS).ok_or(GameError::MissingField {
            record: self.id,
            key: keys::STATUS,
        })?;
        let status = GameStatus::parse(status_text).ok_or_else(|| GameError::InvalidStatus {
            record: self.id,
            value: status_text.to_string(),
        })?;
        let players_list = game.reference(keys::PLAYERS).ok_or(GameError::MissingField {
            record: self.id,
            key: keys::PLAYERS,
        })?;

        let players = match self.replica.list(players_list)? {
            Some(list) => Some(
                list.references()
                    .map(|id| self.slot(id, depth))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        Ok(Some(GameSnapshot {
            id: self.id,
            creator: game.header.created_by,
            status,
            current_it: game.reference(keys::CURRENT_IT),
            players_list,
            players,
        }))
    }

    fn slot(&self, id: RecordId, depth: LoadDepth) -> Result<PlayerSlot, GameError> {
        if depth == LoadDepth::Shallow && !self.replica.is_loaded(id) {
            return Ok(PlayerSlot::Stub { id });
        }

        match self.replica.map(id)? {
            Some(view) => match PlayerSnapshot::from_map(&view) {
                Ok(player) => Ok(PlayerSlot::Loaded(player)),
                Err(e) => {
                    warn!(game_id = %self.id, player_id = %id, error = %e, "Malformed player record");
                    Ok(PlayerSlot::Stub { id })
                }
            },
            None => Ok(PlayerSlot::Stub { id }),
        }
    }

    /// Deep snapshots, one per store change that leaves the Game readable.
    /// The first item is produced as soon as the Game has replicated.
    pub fn snapshots(&self) -> impl Stream<Item = GameSnapshot> + Send + 'static {
        let changes = self.replica.subscribe();
        futures::stream::unfold(
            (self.clone(), changes, true),
            |(handle, mut changes, mut first)| async move {
                loop {
                    if !first && changes.changed().await.is_err() {
                        return None;
                    }
                    first = false;
                    changes.borrow_and_update();

                    match handle.load(LoadDepth::Deep) {
                        Ok(Some(snapshot)) => return Some((snapshot, (handle, changes, false))),
                        Ok(None) => {}
                        Err(e) => {
                            debug!(game_id = %handle.id, error = %e, "Skipping unreadable snapshot");
                        }
                    }
                }
            },
        )
    }

    pub(crate) fn append_player(&self, list: RecordId, player: RecordId) -> Result<(), GameError> {
        self.replica.append(list, Value::Ref(player))?;
        Ok(())
    }

    pub(crate) fn write_current_it(&self, player: RecordId) -> Result<(), GameError> {
        self.replica
            .set(self.id, keys::CURRENT_IT, Value::Ref(player))?;
        Ok(())
    }

    pub(crate) fn write_status(&self, status: GameStatus) -> Result<(), GameError> {
        self.replica
            .set(self.id, keys::STATUS, Value::Text(status.as_str().into()))?;
        Ok(())
    }
}

/// Outcome of [`bootstrap`]
pub enum Bootstrap {
    Created(GameHandle),
    Attached(GameHandle),
}

impl Bootstrap {
    pub fn handle(&self) -> &GameHandle {
        match self {
            Bootstrap::Created(h) | Bootstrap::Attached(h) => h,
        }
    }

    pub fn into_handle(self) -> GameHandle {
        match self {
            Bootstrap::Created(h) | Bootstrap::Attached(h) => h,
        }
    }

    pub fn created(&self) -> bool {
        matches!(self, Bootstrap::Created(_))
    }
}

/// Resolve a session identifier: attach when one is given, otherwise
/// create a new Game
pub fn bootstrap(replica: &Replica, session: Option<RecordId>) -> Result<Bootstrap, GameError> {
    match session {
        Some(id) => Ok(Bootstrap::Attached(GameHandle::attach(replica, id))),
        None => GameHandle::create(replica).map(Bootstrap::Created),
    }
}

/// Shareable location other participants use to join
pub fn share_location(game: RecordId) -> String {
    format!("?game={}", game)
}
