// ============================
// reflights-backend-lib/src/config.rs
// ============================
//! Configuration management.
use crate::error::AppError;
use crate::meet_actor::SessionSettings;
use crate::timers::TimerSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// File looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "reflights.toml";

/// Prefix for environment overrides, e.g. `REFLIGHTS_BIND_ADDR`
pub const ENV_PREFIX: &str = "REFLIGHTS_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

const ONE_DAY_SECS: u64 = 24 * 60 * 60;

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Default log level when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Platform-ready countdown length, in ticks
    pub platform_ready_secs: u32,
    /// Next-attempt countdown length, in ticks
    pub next_attempt_secs: u32,
    /// Length of one countdown tick
    pub tick_interval_ms: u64,
    /// Maximum number of concurrently running next-attempt timers per meet
    pub max_next_attempt_timers: usize,
    /// How long results stay on the lights before being cleared (0 keeps them)
    pub results_display_secs: u64,
    /// Start a next-attempt timer whenever results are displayed
    pub auto_next_attempt: bool,
    /// Per-connection outbound queue capacity
    pub send_buffer: usize,
    /// WebSocket ping period
    pub ping_interval_secs: u64,
    /// A connection that sends nothing (pongs included) for this long is closed
    pub pong_wait_secs: u64,
    /// Largest inbound frame accepted
    pub max_message_bytes: usize,
    /// Idle meets without connections are dropped after this long
    pub session_retention_secs: u64,
    /// How often the idle sweeper runs
    pub sweep_interval_secs: u64,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            platform_ready_secs: 60,
            next_attempt_secs: 60,
            tick_interval_ms: 1000,
            max_next_attempt_timers: 3,
            results_display_secs: 15,
            auto_next_attempt: true,
            send_buffer: 64,
            ping_interval_secs: 30,
            pong_wait_secs: 60,
            max_message_bytes: 2048,
            session_retention_secs: 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the TOML file, then `REFLIGHTS_*` environment variables.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let file = match path {
            Some(path) if !path.exists() => {
                return Err(AppError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            },
            Some(path) => Toml::file(path),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };

        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| AppError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(AppError::Config(format!("invalid log level: {}", self.log_level)));
        }

        let non_zero = [
            ("platform_ready_secs", self.platform_ready_secs as u64),
            ("next_attempt_secs", self.next_attempt_secs as u64),
            ("tick_interval_ms", self.tick_interval_ms),
            ("send_buffer", self.send_buffer as u64),
            ("ping_interval_secs", self.ping_interval_secs),
            ("pong_wait_secs", self.pong_wait_secs),
            ("max_message_bytes", self.max_message_bytes as u64),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{name} must be greater than 0")));
        }

        let bounded = [
            ("platform_ready_secs", self.platform_ready_secs as u64, ONE_DAY_SECS),
            ("next_attempt_secs", self.next_attempt_secs as u64, ONE_DAY_SECS),
            ("tick_interval_ms", self.tick_interval_ms, 60_000),
            ("results_display_secs", self.results_display_secs, ONE_DAY_SECS),
            ("ping_interval_secs", self.ping_interval_secs, ONE_DAY_SECS),
            ("pong_wait_secs", self.pong_wait_secs, ONE_DAY_SECS),
            ("session_retention_secs", self.session_retention_secs, 30 * ONE_DAY_SECS),
            ("sweep_interval_secs", self.sweep_interval_secs, ONE_DAY_SECS),
        ];
        if let Some((name, _, max)) = bounded.iter().find(|(_, value, max)| value > max) {
            return Err(AppError::Config(format!("{name} must be at most {max}")));
        }

        if self.pong_wait_secs <= self.ping_interval_secs {
            return Err(AppError::Config(
                "pong_wait_secs must be greater than ping_interval_secs".to_string(),
            ));
        }

        Ok(())
    }

    pub fn timer_settings(&self) -> TimerSettings {
        TimerSettings {
            platform_ready_secs: self.platform_ready_secs,
            next_attempt_secs: self.next_attempt_secs,
            tick: Duration::from_millis(self.tick_interval_ms),
            max_next_attempt: self.max_next_attempt_timers,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            timers: self.timer_settings(),
            results_display: (self.results_display_secs > 0)
                .then(|| Duration::from_secs(self.results_display_secs)),
            auto_next_attempt: self.auto_next_attempt,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
