// ============================
// crates/backend-lib/src/health.rs
// ============================
//! Referee health: which seats are connected, and whether that is enough
//! to run the platform.
use crate::error::AppError;
use crate::registry::ConnectionRegistry;
use reflights_common::{Seat, ServerMessage, REFEREE_COUNT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefereeHealth {
    pub connected: Vec<Seat>,
    pub required: usize,
}

impl RefereeHealth {
    pub fn from_registry(registry: &ConnectionRegistry) -> Self {
        Self {
            connected: registry.connected_seats(),
            required: REFEREE_COUNT,
        }
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn has_quorum(&self) -> bool {
        self.connected_count() >= self.required
    }

    /// Gate for actions that need every referee present.
    pub fn gate(&self) -> Result<(), AppError> {
        if self.has_quorum() {
            Ok(())
        } else {
            Err(AppError::HealthError {
                connected: self.connected_count(),
                required: self.required,
            })
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::RefereeHealth {
            connected_ref_ids: self.connected.clone(),
            connected_referees: self.connected_count(),
            required_referees: self.required,
        }
    }
}
