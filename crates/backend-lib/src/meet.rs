// ============================
// reflights-backend-lib/src/meet.rs
// ============================
//! Meet management and actor coordination.
use crate::error::AppError;
use crate::meet_actor::{spawn_meet_actor, MeetHandle, SessionSettings, SessionSnapshot};
use crate::metrics as keys;
use crate::validation::validate_meet_name;
use dashmap::DashMap;
use metrics::{counter, gauge};
use reflights_common::Seat;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub type MeetName = String;

/// Manager for all active meets, one actor per meet name
pub struct MeetManager {
    meets: Arc<DashMap<MeetName, MeetHandle>>,
    settings: SessionSettings,
}

impl MeetManager {
    /// Create a new meet manager
    pub fn new(settings: SessionSettings) -> Self {
        MeetManager {
            meets: Arc::new(DashMap::new()),
            settings,
        }
    }

    /// Get the meet's handle, spawning its actor on first use.
    ///
    /// Concurrent first connections to the same meet share one actor. A
    /// handle whose actor has already stopped is replaced.
    pub fn get_or_create(&self, meet_name: &str) -> Result<MeetHandle, AppError> {
        let meet_name = validate_meet_name(meet_name)?;

        let mut created = false;
        let handle = {
            let mut entry = self.meets.entry(meet_name.to_string()).or_insert_with(|| {
                created = true;
                spawn_meet_actor(meet_name, self.settings.clone())
            });
            if entry.is_closed() {
                *entry = spawn_meet_actor(meet_name, self.settings.clone());
                created = true;
            }
            entry.clone()
        };

        if created {
            info!(meet = %meet_name, "meet created");
            counter!(keys::MEET_CREATED).increment(1);
            self.update_gauge();
        }
        Ok(handle)
    }

    /// Get a meet handle by name
    pub fn get(&self, meet_name: &str) -> Option<MeetHandle> {
        self.meets.get(meet_name).map(|entry| entry.value().clone())
    }

    fn lookup(&self, meet_name: &str) -> Result<MeetHandle, AppError> {
        self.get(meet_name).ok_or_else(|| {
            warn!(meet = %meet_name, "meet not found");
            AppError::SessionNotFound(meet_name.to_string())
        })
    }

    /// Clear decisions and timers and vacate every seat. Connections stay attached.
    pub async fn reset(&self, meet_name: &str) -> Result<(), AppError> {
        self.lookup(meet_name)?.reset().await
    }

    /// Stop the meet's actor and forget it. Its connections are closed.
    pub async fn destroy(&self, meet_name: &str) -> Result<(), AppError> {
        let (_, handle) = self.meets.remove(meet_name).ok_or_else(|| {
            warn!(meet = %meet_name, "meet not found");
            AppError::SessionNotFound(meet_name.to_string())
        })?;
        counter!(keys::MEET_DESTROYED).increment(1);
        self.update_gauge();
        if let Err(e) = handle.shutdown().await {
            warn!(meet = %meet_name, error = %e, "meet actor already stopped");
        }
        Ok(())
    }

    /// Release one seat. Returns whether it was occupied.
    pub async fn force_vacate(&self, meet_name: &str, seat: Seat) -> Result<bool, AppError> {
        self.lookup(meet_name)?.force_vacate(seat).await
    }

    pub async fn snapshot(&self, meet_name: &str) -> Result<SessionSnapshot, AppError> {
        self.lookup(meet_name)?.snapshot().await
    }

    /// Destroy meets with no connections that have been quiet for `retention`.
    /// Returns the number of meets removed.
    pub async fn sweep_idle(&self, retention: Duration) -> usize {
        let candidates: Vec<(MeetName, MeetHandle)> = self
            .meets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut removed = 0;
        for (meet_name, handle) in candidates {
            // A handle that errors has already stopped.
            let expired = handle.shutdown_if_idle(retention).await.unwrap_or(true);
            if expired
                && self
                    .meets
                    .remove_if(&meet_name, |_, current| current.same_session(&handle))
                    .is_some()
            {
                counter!(keys::MEET_DESTROYED).increment(1);
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, remaining = self.meets.len(), "idle meets swept");
            self.update_gauge();
        }
        removed
    }

    /// Get all active meet names
    pub fn meet_names(&self) -> Vec<MeetName> {
        self.meets.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.meets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meets.is_empty()
    }

    fn update_gauge(&self) {
        gauge!(keys::MEET_ACTIVE).set(self.meets.len() as f64);
    }
}

impl Default for MeetManager {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}
