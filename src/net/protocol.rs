//! Wire protocol for the arena feed
//!
//! The server pushes three JSON shapes over one WebSocket: full battle
//! snapshots, laser shots and error notices. They carry no type tag, so
//! [`classify`] inspects the shape first and only then deserializes into one
//! variant of [`InboundMessage`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::arena::model::{
    ActionLogEntry, ArenaSnapshot, BattlePhase, EntityId, EntityState, EntityStatus, Facing,
    GridPos, LaserEffect, ObstacleGroup, Winner,
};

/// The only outbound payload: asks the server for an out-of-band snapshot
pub const UPDATE_REQUEST: &str = "update";

/// Field whose non-empty presence marks a laser message
const LASER_PATH_FIELD: &str = "laserPath";
/// Field whose presence marks a server error notice
const ERROR_FIELD: &str = "error";

/// Messages from server to viewer
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Full battle state replacing everything before it
    Snapshot(SnapshotMessage),
    /// Transient laser shot
    Laser(LaserMessage),
    /// Explicit server-side error
    Error(ErrorMessage),
}

/// Ids arrive as numbers or strings depending on the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Int(i64),
    Text(String),
}

impl From<WireId> for EntityId {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Int(n) => EntityId::new(n.to_string()),
            WireId::Text(s) => EntityId::new(s),
        }
    }
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Int(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePos {
    pub x: i32,
    pub y: i32,
}

impl From<WirePos> for GridPos {
    fn from(p: WirePos) -> Self {
        GridPos::new(p.x, p.y)
    }
}

/// Battle snapshot as sent by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMessage {
    pub battle_id: WireId,
    #[serde(default)]
    pub battle_name: String,
    pub arena_width: i64,
    pub arena_height: i64,
    #[serde(default)]
    pub robot_movement_time_seconds: f64,
    #[serde(default)]
    pub battle_state: String,
    #[serde(default)]
    pub robots: Vec<RobotMessage>,
    #[serde(default)]
    pub walls: Vec<WallMessage>,
    #[serde(default)]
    pub winner_id: Option<WireId>,
    #[serde(default)]
    pub winner_name: Option<String>,
    #[serde(default)]
    pub robot_actions: Option<Vec<RobotActionMessage>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotMessage {
    pub id: WireId,
    #[serde(default)]
    pub name: String,
    pub position_x: i32,
    pub position_y: i32,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub target_blocks: u32,
    #[serde(default)]
    pub blocks_remaining: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WallMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub positions: Vec<WirePos>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotActionMessage {
    pub robot_id: WireId,
    #[serde(default)]
    pub robot_name: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub timestamp: Value,
}

/// Laser shot as sent by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaserMessage {
    #[serde(default)]
    pub hit: bool,
    #[serde(default)]
    pub range: f64,
    #[serde(default)]
    pub direction: String,
    pub laser_path: Vec<WirePos>,
    #[serde(default)]
    pub hit_robot_id: Option<WireId>,
    #[serde(default)]
    pub hit_robot_name: Option<String>,
    #[serde(default)]
    pub damage_dealt: Option<f64>,
    #[serde(default)]
    pub hit_position: Option<WirePos>,
    #[serde(default)]
    pub blocked_by: Option<String>,
    #[serde(default)]
    pub firing_robot_id: Option<WireId>,
}

/// `{ "error": ... }` notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub message: String,
}

/// Battle directory entry handed over by the external listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleSummary {
    pub id: WireId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arena_width: i64,
    #[serde(default)]
    pub arena_height: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub robots: Vec<Value>,
}

impl BattleSummary {
    pub fn arena_id(&self) -> String {
        self.id.clone().into_string()
    }
}

/// Pick the most interesting battle from a directory listing
///
/// Running battles first, then ready, then waiting; completed battles only
/// if nothing else is left.
pub fn select_battle(battles: &[BattleSummary]) -> Option<&BattleSummary> {
    fn rank(state: &str) -> u8 {
        match state.to_ascii_uppercase().as_str() {
            BattlePhase::IN_PROGRESS => 0,
            BattlePhase::READY => 1,
            BattlePhase::WAITING => 2,
            _ => 3,
        }
    }
    battles.iter().min_by_key(|b| rank(&b.state))
}

/// Errors produced while classifying an inbound payload
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("Invalid laser message: {0}")]
    InvalidLaser(String),
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Classify and parse one raw text frame
///
/// Shape is checked before any structural validation: a non-empty
/// `laserPath` array wins, then a top-level `error` key, and everything else
/// must be a snapshot.
pub fn classify(raw: &str) -> Result<InboundMessage, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let obj = match &value {
        Value::Object(obj) => obj,
        Value::Array(_) => return Err(DecodeError::NotAnObject("array")),
        Value::String(_) => return Err(DecodeError::NotAnObject("string")),
        Value::Number(_) => return Err(DecodeError::NotAnObject("number")),
        Value::Bool(_) => return Err(DecodeError::NotAnObject("bool")),
        Value::Null => return Err(DecodeError::NotAnObject("null")),
    };

    let is_laser = obj
        .get(LASER_PATH_FIELD)
        .and_then(Value::as_array)
        .is_some_and(|path| !path.is_empty());
    if is_laser {
        let laser: LaserMessage = serde_json::from_value(value)
            .map_err(|e| DecodeError::InvalidLaser(e.to_string()))?;
        if laser.laser_path.len() < 2 {
            return Err(DecodeError::InvalidLaser(format!(
                "laserPath needs at least 2 points, got {}",
                laser.laser_path.len()
            )));
        }
        return Ok(InboundMessage::Laser(laser));
    }

    if let Some(error) = obj.get(ERROR_FIELD) {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(InboundMessage::Error(ErrorMessage { message }));
    }

    let snapshot: SnapshotMessage = serde_json::from_value(value)
        .map_err(|e| DecodeError::InvalidSnapshot(e.to_string()))?;
    Ok(InboundMessage::Snapshot(snapshot))
}

impl SnapshotMessage {
    /// Convert into the canonical model, enforcing snapshot invariants
    pub fn into_snapshot(self) -> Result<ArenaSnapshot, DecodeError> {
        let width = positive_dimension("arenaWidth", self.arena_width)?;
        let height = positive_dimension("arenaHeight", self.arena_height)?;

        let mut entities = BTreeMap::new();
        for robot in self.robots {
            let id = EntityId::from(robot.id);
            let state = EntityState {
                id: id.clone(),
                name: robot.name,
                position: GridPos::new(robot.position_x, robot.position_y),
                facing: Facing::parse(&robot.direction),
                status: EntityStatus::new(robot.status),
                target_distance: robot.target_blocks,
                remaining_distance: robot.blocks_remaining,
            };
            if entities.insert(id.clone(), state).is_some() {
                return Err(DecodeError::InvalidSnapshot(format!(
                    "duplicate robot id {}",
                    id
                )));
            }
        }

        let obstacles = self
            .walls
            .into_iter()
            .map(|wall| ObstacleGroup {
                kind: wall.kind,
                cells: wall.positions.into_iter().map(GridPos::from).collect(),
            })
            .collect();

        let winner_name = self.winner_name;
        let winner = self.winner_id.map(|id| Winner {
            id: EntityId::from(id),
            name: winner_name,
        });

        let recent_actions = self
            .robot_actions
            .unwrap_or_default()
            .into_iter()
            .map(|a| ActionLogEntry {
                entity_id: EntityId::from(a.robot_id),
                entity_name: a.robot_name,
                action_kind: a.action,
                timestamp: match a.timestamp {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
            })
            .collect();

        Ok(ArenaSnapshot {
            arena_id: self.battle_id.into_string(),
            name: self.battle_name,
            width,
            height,
            tick_interval_seconds: self.robot_movement_time_seconds,
            phase: BattlePhase::new(self.battle_state),
            entities,
            obstacles,
            winner,
            recent_actions,
        })
    }
}

fn positive_dimension(field: &str, value: i64) -> Result<u32, DecodeError> {
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(DecodeError::InvalidSnapshot(format!(
            "{} must be a positive integer, got {}",
            field, value
        ))),
    }
}

impl From<LaserMessage> for LaserEffect {
    fn from(msg: LaserMessage) -> Self {
        LaserEffect {
            hit: msg.hit,
            hit_entity_id: msg.hit_robot_id.map(EntityId::from),
            hit_entity_name: msg.hit_robot_name,
            damage: msg.damage_dealt,
            range: msg.range,
            direction: Facing::parse(&msg.direction),
            path: msg.laser_path.into_iter().map(GridPos::from).collect(),
            hit_position: msg.hit_position.map(GridPos::from),
            blocked_by: msg.blocked_by,
            origin_entity_id: msg.firing_robot_id.map(EntityId::from),
        }
    }
}
