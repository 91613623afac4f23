//! DevTools Bridge Core
//!
//! Launches a target with its remote-debugging port open, attaches over the DevTools
//! protocol, collects the structured log lines it prints to the console, and reduces a
//! fixed capture window to a summary an agent can triage.

pub mod client;
pub mod collector;
pub mod config;
pub mod connector;
pub mod error;
pub mod launcher;
pub mod orchestrator;
pub mod types;

// Re-export commonly used types
pub use client::DiscoveryClient;
pub use collector::{CollectorArtifacts, LogCollector};
pub use config::RunConfig;
pub use connector::{Connector, Session};
pub use error::DevtoolsError;
pub use launcher::{ProcessHandle, ProcessLauncher};
pub use orchestrator::{DebugRun, RunOutcome, RunReport, RunState};

/// Result type alias using DevtoolsError
pub type Result<T> = std::result::Result<T, DevtoolsError>;
