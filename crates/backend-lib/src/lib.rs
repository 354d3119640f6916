// ============================
// reflights-backend-lib/src/lib.rs
// ============================
//! Core backend-lib functionality for the referee lights hub.
//!
//! One actor per meet owns the seats, decisions and timers of that meet;
//! WebSocket connections feed it commands and receive its broadcasts.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod meet;
pub mod meet_actor;
pub mod metrics;
pub mod registry;
pub mod timers;
pub mod validation;
pub mod ws_router;

use crate::config::Settings;
use crate::error::AppError;
use crate::meet::MeetManager;
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Live meets
    pub meets: Arc<MeetManager>,
    /// Settings the server was started with
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        settings.validate()?;
        Ok(Self {
            meets: Arc::new(MeetManager::new(settings.session_settings())),
            settings: Arc::new(settings),
        })
    }
}
