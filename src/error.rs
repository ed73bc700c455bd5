use axum::{http::StatusCode, response::IntoResponse};
use std::fmt::Display;

use crate::model::Platform;

pub type AppResult<T> = Result<T, AppErr>;

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Queue is empty")]
    EmptyQueue,

    #[error("Track not found: {0}")]
    TrackNotFound(String),

    #[error("Invalid track: {0}")]
    InvalidTrack(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("{platform} player failed to load: {message}")]
    AdapterLoad { platform: Platform, message: String },

    #[error("{platform} player cannot {action} programmatically")]
    AdapterControlUnsupported { platform: Platform, action: &'static str },

    #[error("Action failed, try again (no reply within {0} ms)")]
    TransportTimeout(u64),

    #[error("Transport closed: {0}")]
    Transport(String),

    #[error("Bad request: {0}")]
    Bad(String),

    #[error("Config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("DB: {0}")]
    Db(#[from] sqlx::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppErr {
    /// Errors that are a normal negative answer to a command, not a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppErr::PermissionDenied(_)
                | AppErr::EmptyQueue
                | AppErr::TrackNotFound(_)
                | AppErr::InvalidTrack(_)
                | AppErr::NotInRoom
                | AppErr::Bad(_)
        )
    }
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let (code, body) = match self {
            AppErr::Bad(msg) | AppErr::InvalidTrack(msg) => (StatusCode::BAD_REQUEST, msg),
            AppErr::PermissionDenied(msg) => (StatusCode::FORBIDDEN, msg),
            AppErr::TrackNotFound(id) => (StatusCode::NOT_FOUND, id),
            AppErr::EmptyQueue | AppErr::NotInRoom => (StatusCode::CONFLICT, self.to_string()),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        };
        (code, body).into_response()
    }
}

/* ── helper: wrap any error as Bad ── */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }
