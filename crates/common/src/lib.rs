// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between the referee-lights clients and server.
//! This module defines the WebSocket protocol messages and supporting types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of voting referees on a platform.
pub const REFEREE_COUNT: usize = 3;

/// One of the three voting referee positions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Seat {
    Left,
    #[serde(alias = "centre")]
    Center,
    Right,
}

impl Seat {
    /// All seats in display order (left to right).
    pub const ALL: [Seat; REFEREE_COUNT] = [Seat::Left, Seat::Center, Seat::Right];

    /// Position of the seat in [`Seat::ALL`].
    pub fn index(self) -> usize {
        match self {
            Seat::Left => 0,
            Seat::Center => 1,
            Seat::Right => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Seat::Left => "left",
            Seat::Center => "center",
            Seat::Right => "right",
        }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a connection plays inside a meet.
///
/// Referees hold one of the three seats. `lights` displays and
/// `admin-observer` connections never hold a seat and any number of
/// them may be attached.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    Referee(Seat),
    Lights,
    Observer,
}

impl Role {
    pub fn seat(self) -> Option<Seat> {
        match self {
            Role::Referee(seat) => Some(seat),
            Role::Lights | Role::Observer => None,
        }
    }
}

/// Error returned when a `judgeId` is not a known role.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown judge id `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Role::Referee(Seat::Left)),
            "center" | "centre" => Ok(Role::Referee(Seat::Center)),
            "right" => Ok(Role::Referee(Seat::Right)),
            "lights" => Ok(Role::Lights),
            "admin-observer" => Ok(Role::Observer),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Referee(seat) => f.write_str(seat.as_str()),
            Role::Lights => f.write_str("lights"),
            Role::Observer => f.write_str("admin-observer"),
        }
    }
}

/// A single referee's call on an attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    White,
    Red,
}

/// Aggregated outcome of an attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Good,
    NoLift,
}

impl Verdict {
    /// Majority rule: good iff at least two of three lights are white.
    pub fn from_decisions(decisions: [Decision; REFEREE_COUNT]) -> Self {
        let whites = decisions.iter().filter(|d| **d == Decision::White).count();
        if whites >= 2 {
            Verdict::Good
        } else {
            Verdict::NoLift
        }
    }
}

/// Messages sent from client to server
///
/// Every message is a JSON object tagged by its `action` field. `meetName`
/// is optional on every action because the connection is already bound to
/// a meet by the WebSocket URL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Bind the connection to a seat or a non-voting role
    RegisterRef {
        judge_id: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meet_name: Option<String>,
    },
    /// Submit a decision for the current attempt
    SubmitDecision {
        judge_id: Role,
        decision: Decision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meet_name: Option<String>,
    },
    /// Start the platform-ready countdown (requires all referees)
    StartTimer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meet_name: Option<String>,
    },
    /// Halt the platform-ready countdown, keeping its value
    StopTimer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meet_name: Option<String>,
    },
    /// Halt the platform-ready countdown and restore the full duration
    ResetTimer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meet_name: Option<String>,
    },
    /// Clear all decisions for the current attempt
    ResetLights {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meet_name: Option<String>,
    },
    /// Start (or restart) a next-attempt countdown
    StartNextAttemptTimer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meet_name: Option<String>,
    },
}

impl ClientMessage {
    /// Actions understood by [`ClientMessage`].
    pub const ACTIONS: [&'static str; 7] = [
        "registerRef",
        "submitDecision",
        "startTimer",
        "stopTimer",
        "resetTimer",
        "resetLights",
        "startNextAttemptTimer",
    ];

    /// Server-originated actions that some clients echo back; these are dropped quietly.
    pub const ECHOED_ACTIONS: [&'static str; 2] = ["updatePlatformReadyTime", "updateNextAttemptTime"];

    /// The meet name the client claims to be talking to, if it sent one.
    pub fn meet_name(&self) -> Option<&str> {
        match self {
            ClientMessage::RegisterRef { meet_name, .. }
            | ClientMessage::SubmitDecision { meet_name, .. }
            | ClientMessage::StartTimer { meet_name }
            | ClientMessage::StopTimer { meet_name }
            | ClientMessage::ResetTimer { meet_name }
            | ClientMessage::ResetLights { meet_name }
            | ClientMessage::StartNextAttemptTimer { meet_name, .. } => meet_name.as_deref(),
        }
    }

    /// Wire name of the action.
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::RegisterRef { .. } => "registerRef",
            ClientMessage::SubmitDecision { .. } => "submitDecision",
            ClientMessage::StartTimer { .. } => "startTimer",
            ClientMessage::StopTimer { .. } => "stopTimer",
            ClientMessage::ResetTimer { .. } => "resetTimer",
            ClientMessage::ResetLights { .. } => "resetLights",
            ClientMessage::StartNextAttemptTimer { .. } => "startNextAttemptTimer",
        }
    }
}

/// Decision frame sent by older referee pages, which carry no `action`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDecision {
    judge_id: Role,
    decision: Decision,
    #[serde(default)]
    meet_name: Option<String>,
}

/// Reasons an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("echo of server action `{0}`")]
    ServerEcho(String),
}

/// Parse one inbound text frame.
///
/// # Errors
/// Returns [`ProtocolError`] for invalid JSON, missing or unknown actions,
/// and for server actions echoed back by a client.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let Some(action) = value.get("action") else {
        if value.get("judgeId").is_some() && value.get("decision").is_some() {
            let legacy: LegacyDecision = serde_json::from_value(value)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            return Ok(ClientMessage::SubmitDecision {
                judge_id: legacy.judge_id,
                decision: legacy.decision,
                meet_name: legacy.meet_name,
            });
        }
        return Err(ProtocolError::Malformed("missing `action` field".to_string()));
    };

    let action = action
        .as_str()
        .ok_or_else(|| ProtocolError::Malformed("`action` must be a string".to_string()))?;

    if ClientMessage::ECHOED_ACTIONS.contains(&action) {
        return Err(ProtocolError::ServerEcho(action.to_string()));
    }
    if !ClientMessage::ACTIONS.contains(&action) {
        return Err(ProtocolError::UnknownAction(action.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Which referee seats currently have a live connection
    RefereeHealth {
        #[serde(rename = "connectedRefIDs")]
        connected_ref_ids: Vec<Seat>,
        connected_referees: usize,
        required_referees: usize,
    },
    /// A quorum-gated action was refused (unicast)
    HealthError { message: String },
    /// The platform-ready countdown has (re)started
    StartTimer { time_left: u32 },
    /// Platform-ready countdown tick
    UpdatePlatformReadyTime { time_left: u32 },
    /// Platform-ready countdown reached zero
    PlatformReadyExpired,
    /// Next-attempt countdown tick
    UpdateNextAttemptTime { index: u32, time_left: u32 },
    /// Next-attempt countdown reached zero and was removed
    NextAttemptExpired { index: u32 },
    /// A referee has submitted (or changed) a decision
    JudgeSubmitted { judge_id: Seat },
    /// Official result of the attempt
    DisplayResults {
        left_decision: Decision,
        center_decision: Decision,
        right_decision: Decision,
        verdict: Verdict,
    },
    /// Decisions were cleared; displays reset circles and indicators
    ClearResults,
    /// Who holds each seat
    OccupancyChanged {
        left_user: Option<String>,
        center_user: Option<String>,
        right_user: Option<String>,
    },
    /// Request-specific rejection (unicast)
    Error { code: String, message: String },
}
