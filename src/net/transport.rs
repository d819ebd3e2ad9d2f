//! WebSocket transport
//!
//! One [`ConnectionManager`] per arena view. Each `open` spawns a session
//! task that owns the socket and reports back over a channel; every event is
//! tagged with the generation of the `open` that produced it, and events from
//! any generation other than the current one are dropped on receipt. Closing
//! aborts the task and bumps the generation, so nothing from a closed session
//! can reach the view afterwards.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::metrics::ViewerMetrics;
use crate::net::connection::{ConnectionState, Endpoint};
use crate::net::protocol::UPDATE_REQUEST;

/// Transport failures, reported as events and never raised to the view
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Connection error: {0}")]
    Receive(String),
    #[error("Failed to send: {0}")]
    Send(String),
}

/// What a session reports to the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    /// One raw text frame
    Message(String),
    /// A frame that is not valid UTF-8; the session stays open
    Malformed(String),
    /// Session ended with an error; no further events follow
    Error(TransportError),
    /// Server closed the session
    Disconnected,
}

#[derive(Debug)]
struct Tagged {
    generation: u64,
    event: ConnectionEvent,
}

/// Outcome of [`ConnectionManager::request_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRequest {
    /// Token queued on the live connection
    Sent,
    /// Not connected, so the connection was reopened instead
    Reopened,
    /// Nothing to reopen
    NotOpen,
}

/// Sending half handed to a session task
struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Tagged>,
}

impl EventSink {
    fn emit(&self, event: ConnectionEvent) {
        // Receiver gone means the manager was dropped
        let _ = self.tx.send(Tagged {
            generation: self.generation,
            event,
        });
    }
}

/// Owns the single live connection of one arena view
pub struct ConnectionManager {
    endpoint: Endpoint,
    arena_id: Option<String>,
    generation: u64,
    state: ConnectionState,
    events_tx: mpsc::UnboundedSender<Tagged>,
    events_rx: mpsc::UnboundedReceiver<Tagged>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
    metrics: Arc<ViewerMetrics>,
}

impl ConnectionManager {
    pub fn new(endpoint: Endpoint, metrics: Arc<ViewerMetrics>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            endpoint,
            arena_id: None,
            generation: 0,
            state: ConnectionState::Idle,
            events_tx,
            events_rx,
            outbound: None,
            task: None,
            metrics,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn arena_id(&self) -> Option<&str> {
        self.arena_id.as_deref()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Open a connection scoped to `arena_id`, closing any existing one first
    pub fn open(&mut self, arena_id: &str) {
        self.close();

        self.generation += 1;
        self.arena_id = Some(arena_id.to_string());
        self.state = ConnectionState::Connecting;
        self.metrics.connection_attempts.fetch_add(1, Ordering::Relaxed);

        let url = self.endpoint.url_for(arena_id);
        info!("Connecting to {} (generation {})", url, self.generation);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let sink = EventSink {
            generation: self.generation,
            tx: self.events_tx.clone(),
        };
        self.outbound = Some(outbound_tx);
        self.task = Some(tokio::spawn(run_session(url, sink, outbound_rx)));
    }

    /// Reopen the last arena, if there is one
    pub fn reopen(&mut self) -> bool {
        match self.arena_id.clone() {
            Some(id) => {
                self.open(&id);
                true
            }
            None => false,
        }
    }

    /// Release the connection; safe to call any number of times
    pub fn close(&mut self) {
        let had_session = self.task.is_some();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.outbound = None;
        if had_session {
            // Anything still queued from the old session is now stale
            self.generation += 1;
            debug!("Connection closed (generation now {})", self.generation);
        }
        if self.state != ConnectionState::Idle {
            self.state = ConnectionState::Closed;
        }
    }

    /// Ask the server for a fresh snapshot, or reopen if not connected
    pub fn request_update(&mut self) -> UpdateRequest {
        if self.state == ConnectionState::Connected {
            if let Some(outbound) = &self.outbound {
                if outbound.send(UPDATE_REQUEST.to_string()).is_ok() {
                    self.metrics.update_requests_sent.fetch_add(1, Ordering::Relaxed);
                    return UpdateRequest::Sent;
                }
            }
        }
        if self.reopen() {
            UpdateRequest::Reopened
        } else {
            UpdateRequest::NotOpen
        }
    }

    /// Wait for the next event of the current generation
    ///
    /// Cancel-safe, so it can sit in a `select!` arm.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        loop {
            let tagged = self.events_rx.recv().await?;
            if tagged.generation != self.generation {
                debug!(
                    "Dropping event from generation {} (current {})",
                    tagged.generation, self.generation
                );
                continue;
            }
            self.observe(&tagged.event);
            return Some(tagged.event);
        }
    }

    fn observe(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                self.state = ConnectionState::Connected;
                self.metrics.connections_opened.fetch_add(1, Ordering::Relaxed);
            }
            ConnectionEvent::Message(_) => {}
            ConnectionEvent::Malformed(_) => {
                self.metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
            }
            ConnectionEvent::Error(_) => {
                self.state = ConnectionState::Disconnected;
                self.metrics.transport_errors.fetch_add(1, Ordering::Relaxed);
                self.task = None;
                self.outbound = None;
            }
            ConnectionEvent::Disconnected => {
                self.state = ConnectionState::Disconnected;
                self.task = None;
                self.outbound = None;
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Binary frames are accepted when they hold UTF-8 text
fn binary_frame(bytes: Vec<u8>) -> ConnectionEvent {
    match String::from_utf8(bytes) {
        Ok(text) => ConnectionEvent::Message(text),
        Err(e) => ConnectionEvent::Malformed(format!("binary frame is not UTF-8: {}", e.utf8_error())),
    }
}

/// Session task: connect, then pump frames both ways until either side stops
async fn run_session(url: String, sink: EventSink, mut outbound: mpsc::UnboundedReceiver<String>) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", url, e);
            sink.emit(ConnectionEvent::Error(TransportError::Connect {
                url,
                reason: e.to_string(),
            }));
            return;
        }
    };

    info!("Connected to {}", url);
    sink.emit(ConnectionEvent::Connected);

    let (mut ws_sender, mut ws_receiver) = stream.split();

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => sink.emit(ConnectionEvent::Message(text)),
                Some(Ok(Message::Binary(bytes))) => sink.emit(binary_frame(bytes)),
                Some(Ok(Message::Close(frame))) => {
                    info!("Server closed {}: {:?}", url, frame);
                    sink.emit(ConnectionEvent::Disconnected);
                    return;
                }
                // Ping/pong is answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Connection error on {}: {}", url, e);
                    sink.emit(ConnectionEvent::Error(TransportError::Receive(e.to_string())));
                    return;
                }
                None => {
                    info!("Stream ended for {}", url);
                    sink.emit(ConnectionEvent::Disconnected);
                    return;
                }
            },
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        warn!("Failed to send on {}: {}", url, e);
                        sink.emit(ConnectionEvent::Error(TransportError::Send(e.to_string())));
                        return;
                    }
                }
                None => {
                    // Manager dropped its sender: close politely
                    let _ = ws_sender.close().await;
                    return;
                }
            },
        }
    }
}
