//! Tag game core: session bootstrap, player attachment, tag evaluation and
//! remote player projection

pub mod attach;
pub mod body;
pub mod participant;
pub mod projector;
pub mod schema;
pub mod session;
pub mod tag;

#[cfg(test)]
mod testing;

pub use attach::ElectionPolicy;
pub use body::{RemoteBody, WanderBody, WanderStats};
pub use participant::{
    Frame, Participant, ParticipantEvent, ParticipantInput, ParticipantRegistry,
    ParticipantSettings,
};
pub use session::{bootstrap, share_location, GameHandle, LoadDepth};

use crate::store::{RecordId, StoreError};

/// Game layer errors
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Body(#[from] body::BodyError),

    #[error("Record {record} is missing field `{key}`")]
    MissingField { record: RecordId, key: &'static str },

    #[error("Record {record} has unknown status `{value}`")]
    InvalidStatus { record: RecordId, value: String },

    #[error("Player {player} is not owned by the local account")]
    NotOwner { player: RecordId },

    #[error("Tag authority was issued for another game")]
    StaleAuthority,
}
