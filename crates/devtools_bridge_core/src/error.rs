use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DevtoolsError {
    #[error("Launch failed: {0}")]
    LaunchFailure(String),

    #[error("Debug endpoint not ready after {elapsed:?}")]
    ConnectTimeout { elapsed: Duration },

    #[error("Connect failed: {0}")]
    ConnectFailure(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl DevtoolsError {
    pub fn launch(message: impl Into<String>) -> Self {
        Self::LaunchFailure(message.into())
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::ConnectFailure(message.into())
    }

    /// Stable snake_case tag used in reports and in the entries the orchestrator records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LaunchFailure(_) => "launch_failure",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::ConnectFailure(_) => "connect_failure",
            Self::Http(_) => "http",
            Self::WebSocket(_) => "websocket",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}
