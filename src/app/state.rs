//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{ParticipantRegistry, ParticipantSettings};
use crate::store::SyncHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<SyncHub>,
    pub participants: Arc<ParticipantRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let hub = SyncHub::new(config.replication_latency);

        Self {
            config,
            hub,
            participants: Arc::new(ParticipantRegistry::new()),
        }
    }

    pub fn participant_settings(&self) -> ParticipantSettings {
        ParticipantSettings {
            tick_rate: self.config.tick_rate,
            election: self.config.election_policy,
        }
    }
}
