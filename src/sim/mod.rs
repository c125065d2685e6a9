//! Headless participants
//!
//! Bots are ordinary participants with their own replica and a wander body
//! instead of a client-driven one. They exercise the same bootstrap,
//! attachment and tag paths as connected players.

use glam::Vec3;
use rand::Rng;
use tracing::info;

use crate::app::AppState;
use crate::game::{
    bootstrap, share_location, GameError, Participant, WanderBody, WanderStats,
};
use crate::store::{AccountId, RecordId, Replica};

/// Start `count` bots in `session`, or in a session the first bot creates.
/// Returns the session the bots joined.
pub fn spawn_bots(
    state: &AppState,
    count: usize,
    session: Option<RecordId>,
) -> Result<Option<RecordId>, GameError> {
    let mut session = session;
    let mut rng = rand::thread_rng();

    for index in 0..count {
        let replica = Replica::connect(&state.hub, AccountId::new());
        let outcome = bootstrap(&replica, session)?;
        if outcome.created() {
            info!(
                game_id = %outcome.handle().id(),
                share = %share_location(outcome.handle().id()),
                "Bot created session"
            );
        }
        let game = outcome.into_handle();
        session = Some(game.id());

        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let start = Vec3::new(angle.cos() * 4.0, 1.0, angle.sin() * 4.0);
        let body = WanderBody::new(rng.gen(), start, WanderStats::default());

        let (participant, handle) =
            Participant::new(game, Box::new(body), state.participant_settings());
        info!(bot = index, account_id = %handle.account, "Bot joining");
        state.participants.insert(handle);
        tokio::spawn(participant.run());
    }

    Ok(session)
}
