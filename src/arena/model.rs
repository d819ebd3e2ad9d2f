//! Canonical arena state
//!
//! The authoritative world state for one arena view. Every snapshot replaces
//! the whole model; laser effects are tracked separately and never live here.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable entity (robot) identifier
///
/// The server sends ids either as JSON numbers or strings; both collapse to
/// their textual form so `7` and `"7"` address the same robot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Integer grid position, origin bottom-left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Facing direction of a robot or a laser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Facing {
    North,
    East,
    South,
    West,
    #[default]
    Unknown,
}

impl Facing {
    /// Parse the server's direction label (case-insensitive, unknown labels tolerated)
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "NORTH" | "N" | "UP" => Facing::North,
            "EAST" | "E" | "RIGHT" => Facing::East,
            "SOUTH" | "S" | "DOWN" => Facing::South,
            "WEST" | "W" | "LEFT" => Facing::West,
            _ => Facing::Unknown,
        }
    }

    /// Unit step on the grid (y grows upward)
    pub fn delta(self) -> (i32, i32) {
        match self {
            Facing::North => (0, 1),
            Facing::East => (1, 0),
            Facing::South => (0, -1),
            Facing::West => (-1, 0),
            Facing::Unknown => (0, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Facing::North => "north",
            Facing::East => "east",
            Facing::South => "south",
            Facing::West => "west",
            Facing::Unknown => "unknown",
        }
    }
}

/// Robot status as sent by the server
///
/// Treated as an opaque label; only the known values get dedicated visuals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityStatus(String);

impl EntityStatus {
    pub const IDLE: &'static str = "IDLE";
    pub const MOVING: &'static str = "MOVING";
    pub const CRASHED: &'static str = "CRASHED";
    pub const DESTROYED: &'static str = "DESTROYED";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_moving(&self) -> bool {
        self.0.eq_ignore_ascii_case(Self::MOVING)
    }
}

/// Battle phase label (`WAITING`, `READY`, `IN_PROGRESS`, `COMPLETED`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BattlePhase(String);

impl BattlePhase {
    pub const WAITING: &'static str = "WAITING";
    pub const READY: &'static str = "READY";
    pub const IN_PROGRESS: &'static str = "IN_PROGRESS";
    pub const COMPLETED: &'static str = "COMPLETED";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_completed(&self) -> bool {
        self.0.eq_ignore_ascii_case(Self::COMPLETED)
    }

    pub fn is_in_progress(&self) -> bool {
        self.0.eq_ignore_ascii_case(Self::IN_PROGRESS)
    }
}

/// One robot inside a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub id: EntityId,
    pub name: String,
    pub position: GridPos,
    pub facing: Facing,
    pub status: EntityStatus,
    /// Blocks the robot was ordered to travel
    pub target_distance: u32,
    /// Blocks still to travel
    pub remaining_distance: u32,
}

/// A group of occupied cells sharing one obstacle kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObstacleGroup {
    pub kind: String,
    pub cells: Vec<GridPos>,
}

/// One line of the battle's action log
#[derive(Debug, Clone, PartialEq)]
pub struct ActionLogEntry {
    pub entity_id: EntityId,
    pub entity_name: String,
    pub action_kind: String,
    /// Server timestamp, kept verbatim
    pub timestamp: String,
}

/// Winner announced by a completed battle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    pub id: EntityId,
    pub name: Option<String>,
}

/// Full authoritative world state for one arena
#[derive(Debug, Clone, PartialEq)]
pub struct ArenaSnapshot {
    pub arena_id: String,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub tick_interval_seconds: f64,
    pub phase: BattlePhase,
    /// Keyed by id; ordered so every frame lists robots the same way
    pub entities: BTreeMap<EntityId, EntityState>,
    pub obstacles: Vec<ObstacleGroup>,
    pub winner: Option<Winner>,
    /// Most recent last
    pub recent_actions: Vec<ActionLogEntry>,
}

impl ArenaSnapshot {
    /// Winner highlight only applies once the battle is completed
    pub fn active_winner(&self) -> Option<&Winner> {
        if self.phase.is_completed() {
            self.winner.as_ref()
        } else {
            None
        }
    }

    pub fn is_winner(&self, id: &EntityId) -> bool {
        self.active_winner().is_some_and(|w| &w.id == id)
    }

    /// Entity currently standing on `pos`, if any
    pub fn entity_at(&self, pos: GridPos) -> Option<&EntityState> {
        self.entities.values().find(|e| e.position == pos)
    }

    pub fn same_dimensions(&self, other: &ArenaSnapshot) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// A laser shot as reported by the server
#[derive(Debug, Clone, PartialEq)]
pub struct LaserEffect {
    pub hit: bool,
    pub hit_entity_id: Option<EntityId>,
    pub hit_entity_name: Option<String>,
    pub damage: Option<f64>,
    pub range: f64,
    pub direction: Facing,
    /// Origin first, terminus last; decoded shots carry at least two cells
    pub path: Vec<GridPos>,
    pub hit_position: Option<GridPos>,
    pub blocked_by: Option<String>,
    pub origin_entity_id: Option<EntityId>,
}

impl LaserEffect {
    pub fn origin(&self) -> Option<GridPos> {
        self.path.first().copied()
    }

    pub fn terminus(&self) -> Option<GridPos> {
        self.path.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(phase: &str, winner: Option<&str>) -> ArenaSnapshot {
        let mut entities = BTreeMap::new();
        entities.insert(
            EntityId::from("1"),
            EntityState {
                id: EntityId::from("1"),
                name: "Alpha".to_string(),
                position: GridPos::new(5, 5),
                facing: Facing::North,
                status: EntityStatus::new("IDLE"),
                target_distance: 0,
                remaining_distance: 0,
            },
        );
        ArenaSnapshot {
            arena_id: "b1".to_string(),
            name: "Test".to_string(),
            width: 20,
            height: 20,
            tick_interval_seconds: 1.0,
            phase: BattlePhase::new(phase),
            entities,
            obstacles: vec![],
            winner: winner.map(|id| Winner {
                id: EntityId::from(id),
                name: Some("Alpha".to_string()),
            }),
            recent_actions: vec![],
        }
    }

    #[test]
    fn test_facing_parse() {
        assert_eq!(Facing::parse("north"), Facing::North);
        assert_eq!(Facing::parse(" WEST "), Facing::West);
        assert_eq!(Facing::parse("sideways"), Facing::Unknown);
        assert_eq!(Facing::North.delta(), (0, 1));
    }

    #[test]
    fn test_winner_only_when_completed() {
        let running = snapshot("IN_PROGRESS", Some("1"));
        assert!(running.active_winner().is_none());
        assert!(!running.is_winner(&EntityId::from("1")));

        let done = snapshot("COMPLETED", Some("1"));
        assert!(done.is_winner(&EntityId::from("1")));
        assert!(!done.is_winner(&EntityId::from("2")));
    }

    #[test]
    fn test_entity_at() {
        let snap = snapshot("IN_PROGRESS", None);
        assert_eq!(
            snap.entity_at(GridPos::new(5, 5)).map(|e| e.id.as_str()),
            Some("1")
        );
        assert!(snap.entity_at(GridPos::new(0, 0)).is_none());
    }

    #[test]
    fn test_laser_ends() {
        let mut laser = LaserEffect {
            hit: false,
            hit_entity_id: None,
            hit_entity_name: None,
            damage: None,
            range: 3.0,
            direction: Facing::East,
            path: vec![GridPos::new(1, 1), GridPos::new(2, 1), GridPos::new(4, 1)],
            hit_position: None,
            blocked_by: None,
            origin_entity_id: None,
        };
        assert_eq!(laser.origin(), Some(GridPos::new(1, 1)));
        assert_eq!(laser.terminus(), Some(GridPos::new(4, 1)));

        laser.path.clear();
        assert_eq!(laser.origin(), None);
        assert_eq!(laser.terminus(), None);
    }

    #[test]
    fn test_status_labels() {
        assert!(EntityStatus::new("moving").is_moving());
        assert!(!EntityStatus::new("IDLE").is_moving());
        assert!(BattlePhase::new("COMPLETED").is_completed());
        assert!(BattlePhase::new("IN_PROGRESS").is_in_progress());
    }
}
