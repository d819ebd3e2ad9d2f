//! Entity tracking across snapshots
//!
//! Keeps one renderable record per live robot, keyed by id, and diffs each
//! new snapshot against it. Records are updated in place so a robot keeps its
//! animation state between snapshots; the diff tells the caller which robots
//! moved or disappeared so their laser effects can be invalidated.

use std::collections::BTreeMap;
use std::time::Duration;

use hashbrown::HashMap;
use tokio::time::Instant;

use crate::arena::model::{EntityId, EntityState, EntityStatus, GridPos};

/// Visual variant of a robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisualVariant {
    Idle,
    Moving,
    Crashed,
    Destroyed,
    Winner,
}

impl VisualVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            VisualVariant::Idle => "idle",
            VisualVariant::Moving => "moving",
            VisualVariant::Crashed => "crashed",
            VisualVariant::Destroyed => "destroyed",
            VisualVariant::Winner => "winner",
        }
    }
}

/// Appearance of a robot given its status and whether it won
///
/// Winner overrides everything; unknown statuses render as idle.
pub fn visual_variant(status: &EntityStatus, is_winner: bool) -> VisualVariant {
    if is_winner {
        return VisualVariant::Winner;
    }
    match status.as_str().to_ascii_uppercase().as_str() {
        EntityStatus::MOVING => VisualVariant::Moving,
        EntityStatus::CRASHED => VisualVariant::Crashed,
        EntityStatus::DESTROYED => VisualVariant::Destroyed,
        _ => VisualVariant::Idle,
    }
}

/// In-flight movement between two grid cells
#[derive(Debug, Clone, Copy, PartialEq)]
struct Motion {
    from: GridPos,
    to: GridPos,
    started: Instant,
    duration: Duration,
}

impl Motion {
    fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }
}

/// Renderable record for one robot
#[derive(Debug, Clone)]
pub struct RenderedEntity {
    pub state: EntityState,
    motion: Option<Motion>,
}

impl RenderedEntity {
    fn new(state: EntityState) -> Self {
        Self {
            state,
            motion: None,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.state.id
    }

    pub fn position(&self) -> GridPos {
        self.state.position
    }

    /// Position to draw at `now`, interpolated while a move animation runs
    pub fn position_at(&self, now: Instant) -> (f32, f32) {
        let target = self.state.position;
        match self.motion {
            Some(m) => {
                let t = m.progress(now);
                let x = m.from.x as f32 + (m.to.x - m.from.x) as f32 * t;
                let y = m.from.y as f32 + (m.to.y - m.from.y) as f32 * t;
                (x, y)
            }
            None => (target.x as f32, target.y as f32),
        }
    }

    pub fn is_animating(&self, now: Instant) -> bool {
        self.motion.is_some_and(|m| m.progress(now) < 1.0)
    }

    /// Apply a new state; returns (changed, moved)
    fn apply(&mut self, next: &EntityState, now: Instant, move_duration: Duration) -> (bool, bool) {
        let moved = self.state.position != next.position;
        let changed = moved
            || self.state.name != next.name
            || self.state.facing != next.facing
            || self.state.status != next.status
            || self.state.target_distance != next.target_distance
            || self.state.remaining_distance != next.remaining_distance;

        if moved {
            // Animate only real moves between two known cells; everything else snaps
            self.motion = if next.status.is_moving() {
                Some(Motion {
                    from: self.state.position,
                    to: next.position,
                    started: now,
                    duration: move_duration,
                })
            } else {
                None
            };
        }

        if changed {
            self.state = next.clone();
        }
        (changed, moved)
    }
}

/// Result of diffing one snapshot against the tracked set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    pub created: Vec<EntityId>,
    /// Entities whose fields changed (includes the moved ones)
    pub updated: Vec<EntityId>,
    /// Subset of `updated` whose position changed
    pub moved: Vec<EntityId>,
    pub removed: Vec<EntityId>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Entities whose effects must be dropped: moved or gone
    pub fn invalidated(&self) -> impl Iterator<Item = &EntityId> {
        self.moved.iter().chain(self.removed.iter())
    }
}

/// Tracks renderable robots across snapshots
#[derive(Debug)]
pub struct EntityTracker {
    entities: HashMap<EntityId, RenderedEntity>,
    move_duration: Duration,
}

impl EntityTracker {
    pub fn new(move_duration: Duration) -> Self {
        Self {
            entities: HashMap::new(),
            move_duration,
        }
    }

    /// Diff `next` against the tracked set and bring the set in line with it
    ///
    /// Afterwards the tracked ids are exactly the keys of `next`.
    pub fn apply(&mut self, next: &BTreeMap<EntityId, EntityState>, now: Instant) -> DiffReport {
        let mut report = DiffReport::default();

        let gone: Vec<EntityId> = self
            .entities
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        for id in gone {
            self.entities.remove(&id);
            report.removed.push(id);
        }
        report.removed.sort();

        for (id, state) in next {
            match self.entities.get_mut(id) {
                Some(existing) => {
                    let (changed, moved) = existing.apply(state, now, self.move_duration);
                    if changed {
                        report.updated.push(id.clone());
                    }
                    if moved {
                        report.moved.push(id.clone());
                    }
                }
                None => {
                    self.entities
                        .insert(id.clone(), RenderedEntity::new(state.clone()));
                    report.created.push(id.clone());
                }
            }
        }

        report
    }

    pub fn get(&self, id: &EntityId) -> Option<&RenderedEntity> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn position_of(&self, id: &EntityId) -> Option<GridPos> {
        self.entities.get(id).map(RenderedEntity::position)
    }

    /// Drop every record (arena switch / teardown)
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}
