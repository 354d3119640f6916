// ============================
// crates/backend-lib/src/timers.rs
// ============================
//! Platform-ready and next-attempt countdowns for one meet.
//!
//! The scheduler never sleeps itself. The owning actor asks for
//! [`TimerScheduler::next_deadline`], sleeps until then and calls
//! [`TimerScheduler::poll`]. Remaining time is always derived from the
//! instant a countdown started, so a late wake-up reports the current value
//! once instead of replaying the missed ticks.
use crate::error::AppError;
use reflights_common::ServerMessage;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    pub platform_ready_secs: u32,
    pub next_attempt_secs: u32,
    /// Wall-clock length of one countdown step
    pub tick: Duration,
    /// Maximum number of live next-attempt timers
    pub max_next_attempt: usize,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            platform_ready_secs: 60,
            next_attempt_secs: 60,
            tick: Duration::from_secs(1),
            max_next_attempt: 3,
        }
    }
}

/// A countdown from `total` to zero, one step per `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    started_at: Instant,
    total: u32,
    elapsed: u32,
    tick: Duration,
}

impl Countdown {
    pub fn start(now: Instant, total: u32, tick: Duration) -> Self {
        Self {
            started_at: now,
            total,
            elapsed: 0,
            tick,
        }
    }

    /// Last value reported
    pub fn remaining(&self) -> u32 {
        self.total - self.elapsed
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.total
    }

    /// When the next step is due
    pub fn next_wake(&self) -> Option<Instant> {
        (!self.is_finished()).then(|| self.started_at + self.tick * (self.elapsed + 1))
    }

    /// Catch up with `now`, returning the new remaining value if it changed.
    fn advance(&mut self, now: Instant) -> Option<u32> {
        let since_start = now.saturating_duration_since(self.started_at);
        let due = since_start.as_nanos() / self.tick.as_nanos().max(1);
        let due = u32::try_from(due).unwrap_or(u32::MAX).min(self.total);
        if due > self.elapsed {
            self.elapsed = due;
            Some(self.remaining())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlatformState {
    Idle,
    Running(Countdown),
    Stopped { remaining: u32 },
}

/// Externally visible state of the platform-ready timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformTimerState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    PlatformTick { time_left: u32 },
    PlatformExpired,
    NextAttemptTick { index: u32, time_left: u32 },
    NextAttemptExpired { index: u32 },
}

impl TimerEvent {
    pub fn into_message(self) -> ServerMessage {
        match self {
            TimerEvent::PlatformTick { time_left } => {
                ServerMessage::UpdatePlatformReadyTime { time_left }
            },
            TimerEvent::PlatformExpired => ServerMessage::PlatformReadyExpired,
            TimerEvent::NextAttemptTick { index, time_left } => {
                ServerMessage::UpdateNextAttemptTime { index, time_left }
            },
            TimerEvent::NextAttemptExpired { index } => ServerMessage::NextAttemptExpired { index },
        }
    }
}

#[derive(Debug)]
pub struct TimerScheduler {
    settings: TimerSettings,
    platform: PlatformState,
    next_attempt: BTreeMap<u32, Countdown>,
    /// Ids of expired next-attempt timers; unusable until `clear_all`
    retired: BTreeSet<u32>,
    last_allocated: u32,
}

impl TimerScheduler {
    pub fn new(settings: TimerSettings) -> Self {
        Self {
            settings,
            platform: PlatformState::Idle,
            next_attempt: BTreeMap::new(),
            retired: BTreeSet::new(),
            last_allocated: 0,
        }
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub fn is_platform_running(&self) -> bool {
        matches!(self.platform, PlatformState::Running(_))
    }

    /// Start the platform-ready countdown from its full length. Callers are
    /// expected to have checked referee health and that it is not running.
    pub fn start_platform_ready(&mut self, now: Instant) -> u32 {
        let countdown = Countdown::start(now, self.settings.platform_ready_secs, self.settings.tick);
        self.platform = PlatformState::Running(countdown);
        countdown.remaining()
    }

    /// Halt a running countdown, keeping its value. Returns false if it was not running.
    pub fn stop_platform_ready(&mut self) -> bool {
        match self.platform {
            PlatformState::Running(countdown) => {
                self.platform = PlatformState::Stopped {
                    remaining: countdown.remaining(),
                };
                true
            },
            PlatformState::Idle | PlatformState::Stopped { .. } => false,
        }
    }

    /// Halt the countdown and restore the full length.
    pub fn reset_platform_ready(&mut self) -> u32 {
        self.platform = PlatformState::Idle;
        self.settings.platform_ready_secs
    }

    /// Start a next-attempt countdown under `index`, or under a fresh id.
    ///
    /// Restarting a live id is always allowed; creating a new one fails once
    /// the configured maximum is running. An id that already expired stays
    /// retired until [`TimerScheduler::clear_all`].
    pub fn start_next_attempt(&mut self, index: Option<u32>, now: Instant) -> Result<u32, AppError> {
        let countdown = Countdown::start(now, self.settings.next_attempt_secs, self.settings.tick);

        if let Some(id) = index {
            if let Some(existing) = self.next_attempt.get_mut(&id) {
                *existing = countdown;
                return Ok(id);
            }
            if self.retired.contains(&id) {
                return Err(AppError::TimerIdRetired(id));
            }
        }

        if self.next_attempt.len() >= self.settings.max_next_attempt {
            return Err(AppError::NextAttemptLimit(self.next_attempt.len()));
        }

        let id = match index {
            Some(id) => id,
            None => self.allocate_id(),
        };
        self.next_attempt.insert(id, countdown);
        Ok(id)
    }

    fn allocate_id(&mut self) -> u32 {
        loop {
            self.last_allocated = self.last_allocated.wrapping_add(1).max(1);
            let id = self.last_allocated;
            if !self.next_attempt.contains_key(&id) && !self.retired.contains(&id) {
                return self.last_allocated;
            }
        }
    }

    /// Cancel every timer silently and make every id available again.
    pub fn clear_all(&mut self) {
        self.platform = PlatformState::Idle;
        self.next_attempt.clear();
        self.retired.clear();
        self.last_allocated = 0;
    }

    /// Earliest instant at which [`TimerScheduler::poll`] has something to report
    pub fn next_deadline(&self) -> Option<Instant> {
        let platform = match &self.platform {
            PlatformState::Running(countdown) => countdown.next_wake(),
            PlatformState::Idle | PlatformState::Stopped { .. } => None,
        };
        self.next_attempt
            .values()
            .filter_map(Countdown::next_wake)
            .chain(platform)
            .min()
    }

    /// Advance every countdown to `now`. Platform events come first, then
    /// next-attempt events in id order.
    pub fn poll(&mut self, now: Instant) -> Vec<TimerEvent> {
        let mut events = Vec::new();

        if let PlatformState::Running(countdown) = &mut self.platform {
            if let Some(time_left) = countdown.advance(now) {
                events.push(TimerEvent::PlatformTick { time_left });
            }
            if countdown.is_finished() {
                events.push(TimerEvent::PlatformExpired);
                self.platform = PlatformState::Idle;
            }
        }

        let mut expired = Vec::new();
        for (&index, countdown) in self.next_attempt.iter_mut() {
            if let Some(time_left) = countdown.advance(now) {
                events.push(TimerEvent::NextAttemptTick { index, time_left });
            }
            if countdown.is_finished() {
                events.push(TimerEvent::NextAttemptExpired { index });
                expired.push(index);
            }
        }
        for index in expired {
            self.next_attempt.remove(&index);
            self.retired.insert(index);
        }

        events
    }

    pub fn platform_status(&self) -> (PlatformTimerState, u32) {
        match self.platform {
            PlatformState::Idle => (PlatformTimerState::Idle, self.settings.platform_ready_secs),
            PlatformState::Running(countdown) => (PlatformTimerState::Running, countdown.remaining()),
            PlatformState::Stopped { remaining } => (PlatformTimerState::Stopped, remaining),
        }
    }

    /// `(index, remaining)` for every live next-attempt timer
    pub fn live_next_attempts(&self) -> Vec<(u32, u32)> {
        self.next_attempt
            .iter()
            .map(|(index, countdown)| (*index, countdown.remaining()))
            .collect()
    }
}
