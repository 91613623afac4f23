//! One debug cycle: launch, attach, capture for a fixed window, summarize, tear down.
//!
//! Whatever phase fails, a run that got a process handle terminates it exactly once and
//! every run disposes its collector exactly once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::collector::{CollectorArtifacts, LogCollector};
use crate::config::RunConfig;
use crate::connector::{Connector, Session};
use crate::launcher::{ProcessHandle, ProcessLauncher};
use crate::types::{DebugEndpoint, FeedEvent, Summary};
use crate::{DevtoolsError, Result};

/// Source recorded on entries the orchestrator writes about its own failures.
pub const ORCHESTRATOR_SOURCE: &str = "debug-run-orchestrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Launching,
    AwaitingReady,
    Connected,
    Capturing,
    Summarizing,
    TearingDown,
    Closed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Closed | RunState::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Closed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub kind: String,
    pub message: String,
}

impl From<&DevtoolsError> for RunFailure {
    fn from(error: &DevtoolsError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    /// Every state the run passed through, `Idle` first.
    pub states: Vec<RunState>,
    pub cancelled: bool,
    pub failure: Option<RunFailure>,
    pub summary: Summary,
    pub artifacts: CollectorArtifacts,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        self.summary.has_errors()
    }

    /// Closed normally and captured no error entries.
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Closed && !self.has_errors()
    }
}

/// Starts and stops the target. Implemented by [`ProcessLauncher`].
#[async_trait]
pub trait TargetLauncher: Send + Sync {
    type Handle: Send + Sync;

    fn spawn(&self, config: &RunConfig) -> Result<Self::Handle>;

    async fn await_ready(&self, handle: &Self::Handle, timeout: Duration) -> Result<DebugEndpoint>;

    async fn terminate(&self, handle: &Self::Handle);
}

/// Attaches to a ready endpoint. Implemented by [`Connector`].
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, endpoint: &DebugEndpoint) -> Result<Session>;
}

#[async_trait]
impl TargetLauncher for ProcessLauncher {
    type Handle = ProcessHandle;

    fn spawn(&self, config: &RunConfig) -> Result<ProcessHandle> {
        ProcessLauncher::spawn(self, config)
    }

    async fn await_ready(&self, handle: &ProcessHandle, timeout: Duration) -> Result<DebugEndpoint> {
        ProcessLauncher::await_ready(self, handle, timeout).await
    }

    async fn terminate(&self, handle: &ProcessHandle) {
        ProcessLauncher::terminate(self, handle).await
    }
}

#[async_trait]
impl SessionConnector for Connector {
    async fn connect(&self, endpoint: &DebugEndpoint) -> Result<Session> {
        Connector::connect(self, endpoint).await
    }
}

struct StateTrail {
    run_id: Uuid,
    states: Vec<RunState>,
}

impl StateTrail {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            states: vec![RunState::Idle],
        }
    }

    fn enter(&mut self, next: RunState) {
        let current = self.current();
        tracing::info!(run_id = %self.run_id, "{:?} -> {:?}", current, next);
        self.states.push(next);
    }

    fn current(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Idle)
    }
}

#[derive(Debug, Clone)]
pub struct DebugRun<L = ProcessLauncher, C = Connector> {
    launcher: L,
    connector: C,
}

impl DebugRun {
    pub fn new() -> Self {
        Self::with_parts(ProcessLauncher::new(), Connector::new())
    }
}

impl Default for DebugRun {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, C> DebugRun<L, C>
where
    L: TargetLauncher,
    C: SessionConnector,
{
    pub fn with_parts(launcher: L, connector: C) -> Self {
        Self {
            launcher,
            connector,
        }
    }

    /// Runs one cycle whose only stop condition is the capture window elapsing.
    pub async fn run(&self, config: &RunConfig) -> Result<RunReport> {
        self.run_with_cancel(config, CancellationToken::new()).await
    }

    /// Runs one cycle. Cancelling during the capture window ends it early and still closes
    /// the run normally; cancelling before that aborts it.
    ///
    /// Only a collector that cannot be created is returned as `Err`; every later failure
    /// is reported in [`RunReport::failure`] after teardown.
    pub async fn run_with_cancel(
        &self,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let collector = Arc::new(
            LogCollector::create(&config.output_dir, config.buffer_capacity, config.capture_raw)
                .await?,
        );
        let mut trail = StateTrail::new(run_id);

        trail.enter(RunState::Launching);
        let handle = match self.launcher.spawn(config) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(run_id = %run_id, "Launch failed: {}", e);
                let failure = record_failure(&collector, &e).await;
                let summary = collector.summary();
                dispose(&collector).await;
                trail.enter(RunState::Aborted);
                return Ok(RunReport {
                    run_id,
                    outcome: RunOutcome::Aborted,
                    states: trail.states,
                    cancelled: false,
                    failure: Some(failure),
                    summary,
                    artifacts: collector.artifacts().clone(),
                });
            }
        };

        trail.enter(RunState::AwaitingReady);
        let captured = self
            .attach_and_capture(config, &handle, &collector, &cancel, &mut trail)
            .await;

        let (failure, cancelled) = match captured {
            Ok(cancelled) => (None, cancelled),
            Err(e) => {
                tracing::error!(run_id = %run_id, "Run failed in {:?}: {}", trail.current(), e);
                (Some(record_failure(&collector, &e).await), cancel.is_cancelled())
            }
        };
        let summary = collector.summary();

        trail.enter(RunState::TearingDown);
        dispose(&collector).await;
        self.launcher.terminate(&handle).await;

        let outcome = if failure.is_some() {
            trail.enter(RunState::Aborted);
            RunOutcome::Aborted
        } else {
            trail.enter(RunState::Closed);
            RunOutcome::Closed
        };

        tracing::info!(
            run_id = %run_id,
            "Run finished {:?}: {} entries, {} errors, {} warnings",
            outcome,
            summary.stats.total_entries,
            summary.stats.errors,
            summary.stats.warnings
        );

        Ok(RunReport {
            run_id,
            outcome,
            states: trail.states,
            cancelled,
            failure,
            summary,
            artifacts: collector.artifacts().clone(),
        })
    }

    /// Returns whether the capture window was cut short by `cancel`.
    async fn attach_and_capture(
        &self,
        config: &RunConfig,
        handle: &L::Handle,
        collector: &Arc<LogCollector>,
        cancel: &CancellationToken,
        trail: &mut StateTrail,
    ) -> Result<bool> {
        let endpoint = tokio::select! {
            ready = self.launcher.await_ready(handle, config.ready_timeout) => ready?,
            _ = cancel.cancelled() => {
                return Err(DevtoolsError::connect(
                    "Cancelled while waiting for the debug endpoint",
                ));
            }
        };

        let mut session = self.connector.connect(&endpoint).await?;
        let events = session
            .take_events()
            .ok_or_else(|| DevtoolsError::connect("Session feed already has a consumer"))?;
        trail.enter(RunState::Connected);

        let stop = CancellationToken::new();
        let pump = tokio::spawn(pump_feed(events, collector.clone(), stop.clone()));

        trail.enter(RunState::Capturing);
        let cancelled = tokio::select! {
            _ = sleep(config.duration) => false,
            _ = cancel.cancelled() => {
                tracing::info!("Capture window cancelled");
                true
            }
        };

        trail.enter(RunState::Summarizing);
        session.close();
        stop.cancel();
        match pump.await {
            Ok(delivered) => tracing::debug!("Feed pump delivered {} events", delivered),
            Err(e) => tracing::warn!("Feed pump failed: {}", e),
        }

        Ok(cancelled)
    }
}

/// Drains the feed into the collector in arrival order. After `stop`, whatever is already
/// queued is still delivered.
async fn pump_feed(
    mut events: mpsc::Receiver<FeedEvent>,
    collector: Arc<LogCollector>,
    stop: CancellationToken,
) -> usize {
    let mut delivered = 0;
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => {
                    deliver(&collector, event).await;
                    delivered += 1;
                }
                None => break,
            },
            _ = stop.cancelled() => {
                events.close();
                while let Some(event) = events.recv().await {
                    deliver(&collector, event).await;
                    delivered += 1;
                }
                break;
            }
        }
    }
    delivered
}

async fn deliver(collector: &LogCollector, event: FeedEvent) {
    match event {
        FeedEvent::Console(line) => {
            collector.ingest(&line).await;
        }
        FeedEvent::UncaughtError(error) => {
            collector.record_uncaught(&error).await;
        }
    }
}

async fn record_failure(collector: &LogCollector, error: &DevtoolsError) -> RunFailure {
    let mut data = json!({ "kind": error.kind() });
    if let DevtoolsError::ConnectTimeout { elapsed } = error {
        data["elapsedMs"] = json!(elapsed.as_millis() as u64);
    }
    collector
        .record_failure(ORCHESTRATOR_SOURCE, error.to_string(), Some(data))
        .await;
    RunFailure::from(error)
}

async fn dispose(collector: &LogCollector) {
    if let Err(e) = collector.dispose().await {
        tracing::warn!("Collector dispose reported an error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConsoleLine, Level, UncaughtError};

    #[test]
    fn states_serialize_as_snake_case() {
        assert_eq!(
            serde_json::to_value(RunState::AwaitingReady).unwrap(),
            "awaiting_ready"
        );
        assert!(RunState::Aborted.is_terminal());
        assert!(!RunState::TearingDown.is_terminal());
    }

    #[test]
    fn failure_carries_error_kind() {
        let failure = RunFailure::from(&DevtoolsError::ConnectTimeout {
            elapsed: Duration::from_secs(30),
        });
        assert_eq!(failure.kind, "connect_timeout");
        assert!(failure.message.contains("30s"));
    }

    #[tokio::test]
    async fn pump_delivers_queued_events_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Arc::new(LogCollector::create(dir.path(), 100, false).await.unwrap());
        let (tx, rx) = mpsc::channel(16);

        for i in 0..3 {
            let text = format!(
                r#"[DEBUG_LOG] {{"timestamp":{i},"level":"info","source":"A","message":"{i}"}}"#
            );
            tx.send(FeedEvent::Console(ConsoleLine::new("log", text))).await.unwrap();
        }
        tx.send(FeedEvent::UncaughtError(UncaughtError {
            message: "boom".to_string(),
            stack: None,
        }))
        .await
        .unwrap();

        let stop = CancellationToken::new();
        stop.cancel();
        let delivered = pump_feed(rx, collector.clone(), stop).await;

        assert_eq!(delivered, 4);
        let messages: Vec<String> = collector
            .entries()
            .into_iter()
            .map(|e| e.entry.message)
            .collect();
        assert_eq!(messages, vec!["0", "1", "2", "boom"]);
        assert_eq!(collector.by_level(Level::Error).len(), 1);
        assert!(tx.is_closed());
    }
}
