use serde::{Deserialize, Serialize};

/// One console line emitted by the target, with the console API type it was emitted through
/// (`log`, `info`, `warning`, `error`, `debug`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub kind: String,
    pub text: String,
}

impl ConsoleLine {
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncaughtError {
    pub message: String,
    pub stack: Option<String>,
}

/// Everything the connector pushes into a session's feed, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Console(ConsoleLine),
    UncaughtError(UncaughtError),
}
