//! Arena view
//!
//! One [`ArenaView`] per watched arena. It owns the connection, the
//! reconciler and the scene backend, and drives them from a single task:
//! connection events, effect deadlines, user commands and the frame clock
//! are all multiplexed in [`ArenaView::run`]. Faults never escape the view;
//! they end up in [`ViewStatus`] and in the banner of the next frame.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::arena::effects::{EffectManager, ExpiryReport};
use crate::arena::entity_tracker::EntityTracker;
use crate::arena::reconciler::{IngestOutcome, StateReconciler};
use crate::config::ViewerConfig;
use crate::metrics::{ViewReport, ViewerMetrics};
use crate::net::connection::{ConnectionState, Endpoint};
use crate::net::transport::{ConnectionEvent, ConnectionManager, TransportError, UpdateRequest};
use crate::render::{draw_frame, Banner, RenderError, SceneBackend, SceneFrame};

/// Lifecycle of one arena view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Initializing,
    Connecting,
    Connected,
    /// Transport failed; waits for an explicit retry
    Errored,
    Closed,
}

impl ViewState {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewState::Initializing => "initializing",
            ViewState::Connecting => "connecting",
            ViewState::Connected => "connected",
            ViewState::Errored => "errored",
            ViewState::Closed => "closed",
        }
    }
}

/// Last fault surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewFault {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Bad message from server: {0}")]
    Parse(String),
    #[error("Server: {0}")]
    ServerNotice(String),
    #[error("Render failed: {0}")]
    Render(String),
}

/// Observable view status
#[derive(Debug, Clone, PartialEq)]
pub struct ViewStatus {
    pub arena_id: String,
    pub state: ViewState,
    pub connection: ConnectionState,
    pub last_error: Option<ViewFault>,
    pub has_snapshot: bool,
    pub effects: usize,
}

/// External commands for [`ArenaView::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    Retry,
    RequestUpdate,
    SwitchArena(String),
    Quit,
}

/// Sleep until `deadline`, or forever without one
async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub struct ArenaView {
    config: ViewerConfig,
    state: ViewState,
    mounted: bool,
    connection: ConnectionManager,
    reconciler: StateReconciler,
    backend: Box<dyn SceneBackend>,
    metrics: Arc<ViewerMetrics>,
    last_error: Option<ViewFault>,
}

impl ArenaView {
    pub fn new(
        config: ViewerConfig,
        arena_id: impl Into<String>,
        backend: Box<dyn SceneBackend>,
        metrics: Arc<ViewerMetrics>,
    ) -> Self {
        let connection = ConnectionManager::new(Endpoint::from_config(&config), metrics.clone());
        let reconciler = Self::reconciler_for(&config, arena_id.into(), &metrics);
        Self {
            config,
            state: ViewState::Initializing,
            mounted: false,
            connection,
            reconciler,
            backend,
            metrics,
            last_error: None,
        }
    }

    fn reconciler_for(
        config: &ViewerConfig,
        arena_id: String,
        metrics: &Arc<ViewerMetrics>,
    ) -> StateReconciler {
        StateReconciler::new(
            arena_id,
            EntityTracker::new(config.move_animation),
            EffectManager::new(config.laser_active, config.laser_fade),
            metrics.clone(),
        )
    }

    pub fn arena_id(&self) -> &str {
        self.reconciler.arena_id()
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn reconciler(&self) -> &StateReconciler {
        &self.reconciler
    }

    pub fn status(&self) -> ViewStatus {
        ViewStatus {
            arena_id: self.arena_id().to_string(),
            state: self.state,
            connection: self.connection.state(),
            last_error: self.last_error.clone(),
            has_snapshot: self.reconciler.snapshot().is_some(),
            effects: self.reconciler.effects().len(),
        }
    }

    /// Expose the current status on the metrics endpoint
    fn publish(&self) {
        let status = self.status();
        self.metrics.publish_view(ViewReport {
            arena_id: status.arena_id,
            state: status.state.as_str(),
            connection: status.connection.as_str(),
            last_error: status.last_error.map(|fault| fault.to_string()),
            has_snapshot: status.has_snapshot,
            effects: status.effects,
        });
    }

    /// Effects never survive a reconnect
    fn connect(&mut self) {
        let dropped = self.reconciler.clear_effects();
        if dropped > 0 {
            debug!("Dropped {} effect(s) before reconnecting", dropped);
        }
        self.state = ViewState::Connecting;
        let arena_id = self.arena_id().to_string();
        self.connection.open(&arena_id);
    }

    pub fn mount(&mut self) {
        if self.mounted {
            return;
        }
        info!(
            "Mounting arena view {} with {} backend",
            self.arena_id(),
            self.backend.name()
        );
        self.mounted = true;
        self.connect();
    }

    /// Point the view at another arena; state of the old one is discarded
    pub fn set_arena(&mut self, arena_id: &str) {
        if arena_id == self.arena_id() {
            return;
        }
        info!("Switching arena {} -> {}", self.arena_id(), arena_id);
        self.connection.close();
        self.state = ViewState::Closed;
        self.reconciler.reset();
        self.reconciler = Self::reconciler_for(&self.config, arena_id.to_string(), &self.metrics);
        self.last_error = None;
        if self.mounted {
            self.connect();
        }
    }

    /// Explicit retry after an error or disconnect
    pub fn retry(&mut self) {
        if !self.mounted {
            return;
        }
        info!("Retrying arena {}", self.arena_id());
        self.last_error = None;
        self.connect();
    }

    /// Ask for an out-of-band snapshot; reconnects when not connected
    pub fn request_update(&mut self) -> UpdateRequest {
        if !self.mounted {
            return UpdateRequest::NotOpen;
        }
        let outcome = self.connection.request_update();
        if outcome == UpdateRequest::Reopened {
            self.reconciler.clear_effects();
            self.last_error = None;
            self.state = ViewState::Connecting;
        }
        outcome
    }

    pub fn handle_event(&mut self, event: ConnectionEvent, now: Instant) {
        if !self.mounted {
            return;
        }
        match event {
            ConnectionEvent::Connected => {
                info!("Arena {} connected", self.arena_id());
                self.state = ViewState::Connected;
                self.last_error = None;
            }
            ConnectionEvent::Message(raw) => self.ingest(&raw, now),
            ConnectionEvent::Malformed(reason) => {
                warn!("Arena {} sent an undecodable frame: {}", self.arena_id(), reason);
                self.last_error = Some(ViewFault::Parse(reason));
            }
            ConnectionEvent::Error(e) => {
                warn!("Arena {} transport error: {}", self.arena_id(), e);
                self.state = ViewState::Errored;
                self.last_error = Some(ViewFault::Transport(e));
            }
            ConnectionEvent::Disconnected => {
                // No automatic retry; the last snapshot stays on screen as stale
                info!("Arena {} disconnected", self.arena_id());
                self.state = ViewState::Connecting;
            }
        }
    }

    fn ingest(&mut self, raw: &str, now: Instant) {
        match self.reconciler.ingest(raw, now) {
            IngestOutcome::Snapshot(applied) => {
                if applied.rebuild {
                    if let Some(snap) = self.reconciler.snapshot() {
                        self.backend.rebuild(snap.width, snap.height);
                    }
                }
                if matches!(
                    self.last_error,
                    Some(ViewFault::Parse(_)) | Some(ViewFault::ServerNotice(_))
                ) {
                    self.last_error = None;
                }
            }
            IngestOutcome::Effect { .. } => {}
            IngestOutcome::ServerNotice(msg) => {
                self.last_error = Some(ViewFault::ServerNotice(msg));
            }
            IngestOutcome::Rejected(e) => {
                self.last_error = Some(ViewFault::Parse(e.to_string()));
            }
        }
    }

    pub fn expire_effects(&mut self, now: Instant) -> ExpiryReport {
        self.reconciler.expire_effects(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.reconciler.effects().next_deadline()
    }

    fn banner(&self, now: Instant) -> Option<Banner> {
        let has_snapshot = self.reconciler.snapshot().is_some();
        let age = || {
            self.metrics
                .since_last_snapshot(now)
                .map_or(0, |age| age.as_secs())
        };
        match (self.state, &self.last_error) {
            (ViewState::Closed, _) => Some(Banner::Closed),
            // The last known scene stays visible, marked with its age
            (ViewState::Errored, Some(fault)) => Some(Banner::Error {
                message: fault.to_string(),
                stale_seconds: has_snapshot.then(age),
            }),
            _ if !has_snapshot => Some(Banner::Connecting),
            (ViewState::Connected, Some(fault)) => Some(Banner::Error {
                message: fault.to_string(),
                stale_seconds: None,
            }),
            (ViewState::Connected, None) => None,
            _ => Some(Banner::Stale { seconds: age() }),
        }
    }

    /// Read-only projection of the current state
    pub fn frame(&self, now: Instant) -> SceneFrame {
        SceneFrame::project(
            self.reconciler.snapshot(),
            self.reconciler.tracker(),
            self.reconciler.effects(),
            self.banner(now),
            self.config.action_log_limit,
            now,
        )
    }

    pub fn render(&mut self, now: Instant) -> Result<(), RenderError> {
        if !self.mounted {
            return Err(RenderError::TornDown);
        }
        let frame = self.frame(now);
        match draw_frame(self.backend.as_mut(), &frame) {
            Ok(()) => {
                self.metrics.frames_rendered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.metrics.render_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Close the connection, cancel every timer and release the backend
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        info!("Unmounting arena view {}", self.arena_id());
        self.connection.close();
        self.reconciler.clear_effects();
        self.backend.teardown();
        self.state = ViewState::Closed;
        self.mounted = false;
    }

    fn apply_command(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::Retry => self.retry(),
            ViewCommand::RequestUpdate => {
                let outcome = self.request_update();
                debug!("Update request: {:?}", outcome);
            }
            ViewCommand::SwitchArena(id) => self.set_arena(&id),
            ViewCommand::Quit => {}
        }
    }

    /// Drive the view until `shutdown` resolves or a quit command arrives
    ///
    /// A closed command channel only stops command handling.
    pub async fn run<S>(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ViewCommand>,
        shutdown: S,
    ) -> ViewStatus
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.mount();

        let mut frames = tokio::time::interval(self.config.frame_interval());
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = self.connection.next_event() => match event {
                    Some(event) => self.handle_event(event, Instant::now()),
                    None => break,
                },
                _ = until(deadline) => {
                    let report = self.expire_effects(Instant::now());
                    debug!(
                        "Effect timers: {} faded, {} removed, {} stale",
                        report.faded.len(),
                        report.removed.len(),
                        report.stale
                    );
                }
                command = commands.recv(), if commands_open => match command {
                    Some(ViewCommand::Quit) => break,
                    Some(command) => self.apply_command(command),
                    // Input source went away; keep watching until shutdown
                    None => commands_open = false,
                },
                _ = frames.tick() => {
                    if let Err(e) = self.render(Instant::now()) {
                        warn!("Render error: {}", e);
                        self.last_error = Some(ViewFault::Render(e.to_string()));
                    }
                }
            }
            self.publish();
        }

        self.unmount();
        self.publish();
        self.status()
    }
}
