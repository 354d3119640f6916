// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_MESSAGE_REJECTED: &str = "ws.message_rejected";
pub const MEET_CREATED: &str = "meet.created";
pub const MEET_DESTROYED: &str = "meet.destroyed";
pub const MEET_ACTIVE: &str = "meet.active";
pub const REFEREE_REGISTERED: &str = "referee.registered";
pub const DECISION_SUBMITTED: &str = "decision.submitted";
pub const RESULT_DISPLAYED: &str = "result.displayed";
pub const HEALTH_ERROR: &str = "health.error";
pub const TIMER_STARTED: &str = "timer.started";
pub const BROADCAST_DROPPED: &str = "broadcast.dropped";
