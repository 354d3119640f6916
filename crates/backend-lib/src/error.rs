// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use reflights_common::{ProtocolError, Seat};
use thiserror::Error;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Meet not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid meet name: {0}")]
    InvalidMeetName(String),

    #[error("The {0} seat is already occupied")]
    SeatOccupied(Seat),

    #[error("Cannot start timer: {connected} of {required} referees connected")]
    HealthError { connected: usize, required: usize },

    #[error("Unauthorized submission: {0}")]
    UnauthorizedSubmission(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Next attempt timer limit reached ({0} running)")]
    NextAttemptLimit(usize),

    #[error("Next attempt timer {0} has expired and cannot be reused until the meet is reset")]
    TimerIdRetired(u32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::SessionNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidMeetName(_) | AppError::MalformedMessage(_) => StatusCode::BAD_REQUEST,
            AppError::SeatOccupied(_)
            | AppError::NextAttemptLimit(_)
            | AppError::TimerIdRetired(_) => StatusCode::CONFLICT,
            AppError::HealthError { .. } => StatusCode::PRECONDITION_FAILED,
            AppError::UnauthorizedSubmission(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::SessionNotFound(_) => "MEET_001",
            AppError::InvalidMeetName(_) => "MEET_002",
            AppError::SeatOccupied(_) => "SEAT_001",
            AppError::HealthError { .. } => "HEALTH_001",
            AppError::UnauthorizedSubmission(_) => "DECISION_001",
            AppError::MalformedMessage(_) => "MSG_001",
            AppError::NextAttemptLimit(_) => "TIMER_001",
            AppError::TimerIdRetired(_) => "TIMER_002",
            AppError::NotFound(_) => "NF_001",
            AppError::Config(_) => "CFG_001",
            AppError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Internal(_) | AppError::Config(_) => {
                "An internal server error occurred".to_string()
            },
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AppError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AppError::Internal("Meet session is no longer running".to_string())
    }
}

impl From<ProtocolError> for AppError {
    fn from(err: ProtocolError) -> Self {
        AppError::MalformedMessage(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for AppError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        AppError::Internal("Meet session stopped before replying".to_string())
    }
}
