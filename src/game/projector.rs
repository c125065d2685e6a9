//! Remote player projection for rendering

use glam::Vec3;
use serde::Serialize;

use crate::store::{AccountId, RecordId};

use super::schema::GameSnapshot;

/// Color every client paints the player who is "it"
pub const IT_COLOR: &str = "#ff0000";

/// What a client renders for one remote player
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemotePlayerView {
    pub id: RecordId,
    pub name: String,
    pub position: Vec3,
    pub color: String,
    pub is_it: bool,
    pub is_moving: bool,
    pub is_sprinting: bool,
    pub is_grounded: bool,
}

/// Renderable views of every loaded player not owned by `me`, in list
/// order. Stubs are skipped until they load.
pub fn project_remote_players(snapshot: &GameSnapshot, me: AccountId) -> Vec<RemotePlayerView> {
    snapshot
        .loaded_players()
        .filter(|p| p.owner != me)
        .map(|p| {
            let is_it = snapshot.is_it(p.id);
            RemotePlayerView {
                id: p.id,
                name: p.name.clone(),
                position: p.position,
                color: if is_it { IT_COLOR.to_string() } else { p.color.clone() },
                is_it,
                // Motion state is not replicated.
                is_moving: false,
                is_sprinting: false,
                is_grounded: true,
            }
        })
        .collect()
}
