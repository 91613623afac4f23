//! Attaches to a ready debug endpoint and turns its websocket into an ordered feed of
//! console lines and uncaught errors.

pub mod cdp;

use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::client::DiscoveryClient;
use crate::types::{ConsoleLine, DebugEndpoint, FeedEvent, TargetInfo, UncaughtError};
use crate::{DevtoolsError, Result};

pub const DEFAULT_PAGE_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_PAGE_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// The reader awaits free space instead of dropping, so a slow consumer applies
/// backpressure to the socket rather than losing lines.
pub const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Connector {
    client: DiscoveryClient,
    page_grace: Duration,
    page_poll_interval: Duration,
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector {
    pub fn new() -> Self {
        Self {
            client: DiscoveryClient::default(),
            page_grace: DEFAULT_PAGE_GRACE,
            page_poll_interval: DEFAULT_PAGE_POLL_INTERVAL,
        }
    }

    pub fn with_page_grace(mut self, grace: Duration, poll_interval: Duration) -> Self {
        self.page_grace = grace;
        self.page_poll_interval = poll_interval;
        self
    }

    /// Opens the first page target of `endpoint` and enables runtime events on it.
    pub async fn connect(&self, endpoint: &DebugEndpoint) -> Result<Session> {
        let (target, page_url) = self.find_page(endpoint).await?;
        tracing::info!("Attaching to page '{}' ({})", target.title, target.id);

        let (socket, _) = tokio_tungstenite::connect_async(page_url.as_str())
            .await
            .map_err(|e| DevtoolsError::connect(format!("Websocket to {page_url} failed: {e}")))?;
        let (mut sink, stream) = socket.split();

        sink.send(Message::text(cdp::command(1, cdp::RUNTIME_ENABLE)))
            .await
            .map_err(|e| DevtoolsError::connect(format!("Failed to enable runtime events: {e}")))?;

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let page_id = target.id.clone();
        let reader = tokio::spawn(async move {
            // The sink lives as long as the reader so the socket stays open.
            let _sink = sink;
            reader_loop(stream, tx).await;
            tracing::debug!("Feed reader for page {} exited", page_id);
        });

        Ok(Session {
            target,
            events: Some(rx),
            reader: Some(reader),
        })
    }

    async fn find_page(&self, endpoint: &DebugEndpoint) -> Result<(TargetInfo, String)> {
        let base_url = endpoint.http_base();
        let deadline = Instant::now() + self.page_grace;
        let mut last_problem = String::from("no targets listed");

        loop {
            match self.client.targets(&base_url).await {
                Ok(targets) => {
                    let page = targets.into_iter().find_map(|target| {
                        let url = target.web_socket_debugger_url.clone()?;
                        target.is_page().then_some((target, url))
                    });
                    if let Some(found) = page {
                        return Ok(found);
                    }
                    last_problem = "no attachable page target".to_string();
                }
                Err(e) => last_problem = e.to_string(),
            }

            if Instant::now() + self.page_poll_interval > deadline {
                return Err(DevtoolsError::connect(format!(
                    "No page on {} after {:?}: {}",
                    base_url, self.page_grace, last_problem
                )));
            }
            tracing::debug!("Waiting for a page target on {}: {}", base_url, last_problem);
            sleep(self.page_poll_interval).await;
        }
    }
}

async fn reader_loop<S>(mut stream: S, tx: mpsc::Sender<FeedEvent>)
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                tracing::info!("Debug session closed by target: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Debug session read failed: {}", e);
                break;
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Skipping non-JSON frame: {}", e);
                continue;
            }
        };

        if let Some(event) = cdp::parse_event(&value) {
            if tx.send(event).await.is_err() {
                tracing::debug!("Feed receiver dropped; stopping reader");
                break;
            }
        }
    }
}

/// A live attachment to one page. Closing it never touches the target process.
#[derive(Debug)]
pub struct Session {
    target: TargetInfo,
    events: Option<mpsc::Receiver<FeedEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl Session {
    /// Session over an already-produced feed, without a socket behind it.
    pub fn from_feed(target: TargetInfo, events: mpsc::Receiver<FeedEvent>) -> Self {
        Self {
            target,
            events: Some(events),
            reader: None,
        }
    }

    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    /// Hands the feed to a single consumer. `None` once taken.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<FeedEvent>> {
        self.events.take()
    }

    /// Drives two callbacks from the feed on one task, in emission order.
    pub fn subscribe<L, E>(&mut self, mut on_line: L, mut on_uncaught_error: E) -> Result<Subscription>
    where
        L: FnMut(ConsoleLine) + Send + 'static,
        E: FnMut(UncaughtError) + Send + 'static,
    {
        let mut events = self
            .take_events()
            .ok_or_else(|| DevtoolsError::connect("Session feed already has a consumer"))?;

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    FeedEvent::Console(line) => on_line(line),
                    FeedEvent::UncaughtError(error) => on_uncaught_error(error),
                }
            }
        });
        Ok(Subscription { task })
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none() && self.events.is_none()
    }

    /// Stops the reader and drops the socket. Idempotent.
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            tracing::info!("Closed debug session for page {}", self.target.id);
        }
        self.events = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Handle to the callback task started by [`Session::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Resolves once the feed has ended and every event has been delivered.
    pub async fn finished(self) {
        let _ = self.task.await;
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}
