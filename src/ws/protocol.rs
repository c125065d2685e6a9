//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

use crate::game::{Frame, ParticipantEvent};
use crate::store::{AccountId, RecordId};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// World-space translation of the client's rigid body
    Pose { x: f32, y: f32, z: f32 },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Stop playing. The player record stays in the game.
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once after the session resolves
    Welcome {
        account_id: AccountId,
        game_id: RecordId,
        /// Location other participants open to join
        share: String,
        /// Whether this connection created the game
        created: bool,
        server_time: u64,
    },

    /// The game has not replicated yet
    Loading { tick: u64 },

    /// Per-tick render state
    Frame(Frame),

    /// Pong response
    Pong { t: u64 },

    /// Error message
    Error { code: ErrorCode, message: String },
}

impl From<ParticipantEvent> for ServerMsg {
    fn from(event: ParticipantEvent) -> Self {
        match event {
            ParticipantEvent::Loading { tick } => ServerMsg::Loading { tick },
            ParticipantEvent::Frame(frame) => ServerMsg::Frame(frame),
            ParticipantEvent::Pong { t } => ServerMsg::Pong { t },
        }
    }
}

/// Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidMessage,
    RateLimited,
    SessionFailed,
}
