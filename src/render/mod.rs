//! Scene rendering
//!
//! Reconciliation never talks to a presentation layer directly. Each frame
//! the view projects its canonical state into a read-only [`SceneFrame`] and
//! hands it to whichever [`SceneBackend`] was chosen at composition time.
//! Both backends share [`GridLayout`], so placement and the vertical flip
//! are identical under either one.

pub mod markup;
#[cfg(feature = "raster")]
pub mod raster;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::time::Instant;

use crate::arena::effects::{EffectManager, EffectPhase};
use crate::arena::entity_tracker::{visual_variant, EntityTracker, VisualVariant};
use crate::arena::model::{ActionLogEntry, ArenaSnapshot, EntityId, Facing, GridPos, ObstacleGroup};
use crate::config::ViewerConfig;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to write frame to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "raster")]
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("{0} backend is not available in this build")]
    Unavailable(&'static str),
    #[error("Backend has been torn down")]
    TornDown,
    #[error("Arena {width}x{height} is too large to draw")]
    Oversized { width: u32, height: u32 },
}

// ============================================================================
// Backend selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// HTML document with an inline SVG scene
    Markup,
    /// RGBA framebuffer written as PNG
    Raster,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Markup => "markup",
            BackendKind::Raster => "raster",
        }
    }

    pub fn default_output(self) -> &'static str {
        match self {
            BackendKind::Markup => "arena.html",
            BackendKind::Raster => "arena.png",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown backend '{0}' (expected markup or raster)")]
pub struct UnknownBackend(pub String);

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markup" | "dom" | "html" | "svg" => Ok(BackendKind::Markup),
            "raster" | "canvas" | "png" => Ok(BackendKind::Raster),
            _ => Err(UnknownBackend(s.to_string())),
        }
    }
}

/// Presentation capability shared by both backends
///
/// A frame is drawn as `render_snapshot`, then `render_effect` once per
/// visible effect, then `present`.
pub trait SceneBackend: Send {
    fn name(&self) -> &'static str;

    /// Discard any cached scene resources sized for the previous arena
    fn rebuild(&mut self, width: u32, height: u32);

    /// Start a frame with the static scene: floor, obstacles, robots, overlays
    fn render_snapshot(&mut self, frame: &SceneFrame) -> Result<(), RenderError>;

    /// Draw one laser on top of the current frame
    fn render_effect(&mut self, effect: &EffectSprite) -> Result<(), RenderError>;

    /// Finish the frame and push it to the output
    fn present(&mut self) -> Result<(), RenderError>;

    /// Release every resource; later calls fail with [`RenderError::TornDown`]
    fn teardown(&mut self);
}

/// Build the backend named by the configuration
pub fn compose(config: &ViewerConfig) -> Result<Box<dyn SceneBackend>, RenderError> {
    let output = config.output_path();
    match config.backend {
        BackendKind::Markup => Ok(Box::new(
            markup::MarkupBackend::new(config.cell_px).with_output(output),
        )),
        #[cfg(feature = "raster")]
        BackendKind::Raster => Ok(Box::new(
            raster::RasterBackend::new(config.cell_px).with_output(output),
        )),
        #[cfg(not(feature = "raster"))]
        BackendKind::Raster => Err(RenderError::Unavailable("raster")),
    }
}

/// Draw one complete frame through `backend`
pub fn draw_frame(backend: &mut dyn SceneBackend, frame: &SceneFrame) -> Result<(), RenderError> {
    backend.render_snapshot(frame)?;
    for effect in &frame.effects {
        backend.render_effect(effect)?;
    }
    backend.present()
}

// ============================================================================
// Layout
// ============================================================================

/// Maps arena grid cells to output pixels
///
/// Grid row 0 is the bottom of the arena, pixel row 0 is the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub width: u32,
    pub height: u32,
    pub cell_px: u32,
}

impl GridLayout {
    pub fn new(width: u32, height: u32, cell_px: u32) -> Self {
        Self {
            width,
            height,
            cell_px,
        }
    }

    pub fn pixel_width(&self) -> u32 {
        self.width.saturating_mul(self.cell_px)
    }

    pub fn pixel_height(&self) -> u32 {
        self.height.saturating_mul(self.cell_px)
    }

    /// Exact pixel size, or `None` when it does not fit in a `u32`
    pub fn checked_pixel_size(&self) -> Option<(u32, u32)> {
        Some((
            self.width.checked_mul(self.cell_px)?,
            self.height.checked_mul(self.cell_px)?,
        ))
    }

    /// Fractional position of a cell's top-left corner inside the arena
    pub fn normalized(&self, x: f32, y: f32) -> (f32, f32) {
        let h = self.height.max(1) as f32;
        let w = self.width.max(1) as f32;
        (x / w, (h - 1.0 - y) / h)
    }

    /// Pixel coordinates of a cell's top-left corner
    pub fn cell_origin(&self, x: f32, y: f32) -> (f32, f32) {
        let cell = self.cell_px as f32;
        let flipped = self.height.max(1) as f32 - 1.0 - y;
        (x * cell, flipped * cell)
    }

    /// Pixel coordinates of a cell's center
    pub fn cell_center(&self, x: f32, y: f32) -> (f32, f32) {
        let (px, py) = self.cell_origin(x, y);
        let half = self.cell_px as f32 / 2.0;
        (px + half, py + half)
    }

    pub fn grid_center(&self, pos: GridPos) -> (f32, f32) {
        self.cell_center(pos.x as f32, pos.y as f32)
    }
}

// ============================================================================
// Frame projection
// ============================================================================

/// Status overlay shown above the scene
#[derive(Debug, Clone, PartialEq)]
pub enum Banner {
    /// No snapshot yet
    Connecting,
    /// Showing the last known snapshot while disconnected
    Stale { seconds: u64 },
    /// Transport failure or server notice; `stale_seconds` is set while an
    /// older snapshot is still on screen after the connection failed
    Error {
        message: String,
        stale_seconds: Option<u64>,
    },
    /// View unmounted
    Closed,
}

impl Banner {
    pub fn text(&self) -> String {
        match self {
            Banner::Connecting => "Connecting to arena...".to_string(),
            Banner::Stale { seconds } => {
                format!("Connection lost, showing state from {}s ago", seconds)
            }
            Banner::Error {
                message,
                stale_seconds: None,
            } => format!("Error: {}", message),
            Banner::Error {
                message,
                stale_seconds: Some(seconds),
            } => format!("Error: {} (showing state from {}s ago)", message, seconds),
            Banner::Closed => "Viewer closed".to_string(),
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            Banner::Connecting => "connecting",
            Banner::Stale { .. } => "stale",
            Banner::Error {
                stale_seconds: None,
                ..
            } => "error",
            Banner::Error { .. } => "error stale",
            Banner::Closed => "closed",
        }
    }
}

/// One robot as drawn this frame
#[derive(Debug, Clone, PartialEq)]
pub struct EntityView {
    pub id: EntityId,
    pub name: String,
    /// Interpolated grid position
    pub x: f32,
    pub y: f32,
    pub facing: Facing,
    pub status: String,
    pub variant: VisualVariant,
    pub remaining_distance: u32,
}

/// One laser as drawn this frame
#[derive(Debug, Clone, PartialEq)]
pub struct EffectSprite {
    pub from: GridPos,
    pub to: GridPos,
    pub hit: bool,
    /// Burst location; only set for hits
    pub burst_at: Option<GridPos>,
    pub phase: EffectPhase,
    pub intensity: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinnerView {
    pub id: EntityId,
    pub name: String,
    /// False when the winner is no longer in the entity map
    pub present: bool,
}

impl WinnerView {
    pub fn label(&self) -> String {
        if self.present {
            format!("winner: {}", self.name)
        } else {
            format!("winner: {} (no longer present)", self.name)
        }
    }
}

/// Static part of a frame, present once a snapshot exists
#[derive(Debug, Clone, PartialEq)]
pub struct ArenaScene {
    pub arena_id: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub phase: String,
    pub obstacles: Vec<ObstacleGroup>,
    pub entities: Vec<EntityView>,
    pub winner: Option<WinnerView>,
    /// Tail of the action log, most recent last
    pub actions: Vec<ActionLogEntry>,
}

/// Read-only projection handed to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct SceneFrame {
    pub scene: Option<ArenaScene>,
    pub effects: Vec<EffectSprite>,
    pub banner: Option<Banner>,
}

impl SceneFrame {
    /// Project canonical state at `now`
    pub fn project(
        snapshot: Option<&ArenaSnapshot>,
        tracker: &EntityTracker,
        effects: &EffectManager,
        banner: Option<Banner>,
        action_log_limit: usize,
        now: Instant,
    ) -> Self {
        let scene = snapshot.map(|snap| project_scene(snap, tracker, action_log_limit, now));

        // A beam needs both ends; pathless effects are not drawn
        let effects = effects
            .visible(now)
            .filter_map(|view| {
                let (from, to) = (view.effect.origin()?, view.effect.terminus()?);
                Some(EffectSprite {
                    from,
                    to,
                    hit: view.effect.hit,
                    burst_at: view
                        .effect
                        .hit
                        .then(|| view.effect.hit_position.unwrap_or(to)),
                    phase: view.phase,
                    intensity: view.intensity,
                })
            })
            .collect();

        Self {
            scene,
            effects,
            banner,
        }
    }

    pub fn entity(&self, id: &EntityId) -> Option<&EntityView> {
        self.scene
            .as_ref()
            .and_then(|s| s.entities.iter().find(|e| &e.id == id))
    }
}

fn project_scene(
    snap: &ArenaSnapshot,
    tracker: &EntityTracker,
    action_log_limit: usize,
    now: Instant,
) -> ArenaScene {
    let entities = snap
        .entities
        .values()
        .map(|state| {
            let (x, y) = tracker
                .get(&state.id)
                .map(|rendered| rendered.position_at(now))
                .unwrap_or((state.position.x as f32, state.position.y as f32));
            EntityView {
                id: state.id.clone(),
                name: state.name.clone(),
                x,
                y,
                facing: state.facing,
                status: state.status.as_str().to_string(),
                variant: visual_variant(&state.status, snap.is_winner(&state.id)),
                remaining_distance: state.remaining_distance,
            }
        })
        .collect();

    let winner = snap.active_winner().map(|w| {
        let current = snap.entities.get(&w.id);
        WinnerView {
            id: w.id.clone(),
            name: w
                .name
                .clone()
                .or_else(|| current.map(|e| e.name.clone()))
                .unwrap_or_else(|| w.id.to_string()),
            present: current.is_some(),
        }
    });

    let skip = snap.recent_actions.len().saturating_sub(action_log_limit);
    let actions = snap.recent_actions[skip..].to_vec();

    ArenaScene {
        arena_id: snap.arena_id.clone(),
        name: snap.name.clone(),
        width: snap.width,
        height: snap.height,
        phase: snap.phase.as_str().to_string(),
        obstacles: snap.obstacles.clone(),
        entities,
        winner,
        actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use crate::arena::model::{BattlePhase, EntityState, EntityStatus, LaserEffect, Winner};

    fn snapshot(phase: &str, winner: Option<&str>) -> ArenaSnapshot {
        let mut entities = BTreeMap::new();
        for (id, x, y, status) in [("1", 5, 5, "IDLE"), ("2", 15, 15, "DESTROYED")] {
            entities.insert(
                EntityId::from(id),
                EntityState {
                    id: EntityId::from(id),
                    name: format!("Robot {}", id),
                    position: GridPos::new(x, y),
                    facing: Facing::East,
                    status: EntityStatus::new(status),
                    target_distance: 0,
                    remaining_distance: 0,
                },
            );
        }
        ArenaSnapshot {
            arena_id: "9".to_string(),
            name: "Arena".to_string(),
            width: 20,
            height: 20,
            tick_interval_seconds: 1.0,
            phase: BattlePhase::new(phase),
            entities,
            obstacles: vec![],
            winner: winner.map(|id| Winner {
                id: EntityId::from(id),
                name: Some(format!("Robot {}", id)),
            }),
            recent_actions: (0..15)
                .map(|i| ActionLogEntry {
                    entity_id: EntityId::from("1"),
                    entity_name: "Robot 1".to_string(),
                    action_kind: format!("MOVE{}", i),
                    timestamp: String::new(),
                })
                .collect(),
        }
    }

    fn project(snap: &ArenaSnapshot) -> SceneFrame {
        let now = Instant::now();
        let mut tracker = EntityTracker::new(Duration::from_millis(300));
        tracker.apply(&snap.entities, now);
        let effects = EffectManager::new(Duration::from_secs(1), Duration::from_secs(3));
        SceneFrame::project(Some(snap), &tracker, &effects, None, 10, now)
    }

    #[test]
    fn test_layout_flips_vertical_axis() {
        let layout = GridLayout::new(20, 20, 10);
        assert_eq!(layout.cell_origin(0.0, 0.0), (0.0, 190.0));
        assert_eq!(layout.cell_origin(0.0, 19.0), (0.0, 0.0));
        assert_eq!(layout.grid_center(GridPos::new(5, 5)), (55.0, 145.0));
        let (nx, ny) = layout.normalized(10.0, 9.0);
        assert_eq!((nx, ny), (0.5, 0.5));
    }

    #[test]
    fn test_winner_overrides_status() {
        let frame = project(&snapshot("COMPLETED", Some("2")));
        let winner = frame.entity(&EntityId::from("2")).unwrap();
        assert_eq!(winner.variant, VisualVariant::Winner);
        assert_eq!(
            frame.entity(&EntityId::from("1")).unwrap().variant,
            VisualVariant::Idle
        );
        let label = frame.scene.unwrap().winner.unwrap().label();
        assert_eq!(label, "winner: Robot 2");
    }

    #[test]
    fn test_no_highlight_before_completion() {
        let frame = project(&snapshot("IN_PROGRESS", Some("2")));
        assert_eq!(
            frame.entity(&EntityId::from("2")).unwrap().variant,
            VisualVariant::Destroyed
        );
        assert!(frame.scene.unwrap().winner.is_none());
    }

    #[test]
    fn test_absent_winner_degrades() {
        let frame = project(&snapshot("COMPLETED", Some("99")));
        let scene = frame.scene.unwrap();
        assert!(scene.entities.iter().all(|e| e.variant != VisualVariant::Winner));
        let winner = scene.winner.unwrap();
        assert!(!winner.present);
        assert_eq!(winner.label(), "winner: Robot 99 (no longer present)");
    }

    #[test]
    fn test_action_log_tail() {
        let frame = project(&snapshot("IN_PROGRESS", None));
        let actions = frame.scene.unwrap().actions;
        assert_eq!(actions.len(), 10);
        assert_eq!(actions.last().unwrap().action_kind, "MOVE14");
        assert_eq!(actions[0].action_kind, "MOVE5");
    }

    #[test]
    fn test_effect_sprites_follow_phase() {
        let now = Instant::now();
        let tracker = EntityTracker::new(Duration::from_millis(300));
        let mut effects = EffectManager::new(Duration::from_secs(1), Duration::from_secs(3));
        let laser = |hit| LaserEffect {
            hit,
            hit_entity_id: None,
            hit_entity_name: None,
            damage: None,
            range: 5.0,
            direction: Facing::North,
            path: vec![GridPos::new(1, 1), GridPos::new(1, 4)],
            hit_position: None,
            blocked_by: None,
            origin_entity_id: None,
        };
        effects.add(laser(true), None, None, now);
        effects.add(laser(false), None, None, now);

        let frame = SceneFrame::project(None, &tracker, &effects, Some(Banner::Connecting), 10, now);
        assert!(frame.scene.is_none());
        assert_eq!(frame.effects.len(), 2);
        assert_eq!(frame.effects[0].burst_at, Some(GridPos::new(1, 4)));
        assert!(frame.effects[1].burst_at.is_none());
        assert_eq!(frame.effects[0].phase, EffectPhase::Active);
    }

    #[test]
    fn test_pathless_effect_is_not_drawn() {
        let now = Instant::now();
        let tracker = EntityTracker::new(Duration::from_millis(300));
        let mut effects = EffectManager::new(Duration::from_secs(1), Duration::from_secs(3));
        effects.add(
            LaserEffect {
                hit: true,
                hit_entity_id: None,
                hit_entity_name: None,
                damage: None,
                range: 0.0,
                direction: Facing::Unknown,
                path: vec![],
                hit_position: None,
                blocked_by: None,
                origin_entity_id: None,
            },
            None,
            None,
            now,
        );

        let frame = SceneFrame::project(None, &tracker, &effects, None, 10, now);
        assert!(frame.effects.is_empty());
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("markup".parse::<BackendKind>(), Ok(BackendKind::Markup));
        assert_eq!("Canvas".parse::<BackendKind>(), Ok(BackendKind::Raster));
        assert!("webgl".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Raster.default_output(), "arena.png");
    }

    #[test]
    fn test_banner_text() {
        assert!(Banner::Stale { seconds: 12 }.text().contains("12s"));
        let fresh = Banner::Error {
            message: "boom".into(),
            stale_seconds: None,
        };
        assert_eq!(fresh.css_class(), "error");
        assert_eq!(fresh.text(), "Error: boom");

        let stale = Banner::Error {
            message: "reset".into(),
            stale_seconds: Some(4),
        };
        assert_eq!(stale.css_class(), "error stale");
        assert!(stale.text().contains("4s ago"));
    }
}
