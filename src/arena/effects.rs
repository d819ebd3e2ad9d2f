//! Laser effect lifecycle
//!
//! Every effect gets two timers at creation: the end of its active phase and
//! its final discard. Timers live in a min-heap and are cancelled lazily: an
//! invalidated effect is removed from the table right away, and when one of
//! its timers later comes due it finds nothing and is skipped. The owning
//! view sleeps until [`EffectManager::next_deadline`] and then calls
//! [`EffectManager::advance`].

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tokio::time::Instant;
use tracing::debug;

use crate::arena::model::{EntityId, GridPos, LaserEffect};

/// Draw intensity during the active phase
pub const ACTIVE_INTENSITY: f32 = 1.0;
/// Draw intensity once demoted to history
pub const FADED_INTENSITY: f32 = 0.35;

/// Handle to one tracked effect; increases with creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EffectId(u64);

impl EffectId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Bucket used for bulk invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OriginKey {
    Entity(EntityId),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectPhase {
    Active,
    Faded,
}

impl EffectPhase {
    pub fn intensity(self) -> f32 {
        match self {
            EffectPhase::Active => ACTIVE_INTENSITY,
            EffectPhase::Faded => FADED_INTENSITY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EffectPhase::Active => "active",
            EffectPhase::Faded => "faded",
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedEffect {
    effect: LaserEffect,
    origin: OriginKey,
    /// Where the origin stood when the shot was received
    origin_position: Option<GridPos>,
    created_at: Instant,
    phase: EffectPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    ActiveEnds,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    deadline: Instant,
    /// Tie-breaker so timers due at the same instant fire in scheduling order
    seq: u64,
    effect: EffectId,
    kind: TimerKind,
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Read-only view of a visible effect
#[derive(Debug, Clone, Copy)]
pub struct EffectView<'a> {
    pub id: EffectId,
    pub effect: &'a LaserEffect,
    pub phase: EffectPhase,
    pub intensity: f32,
    pub age: Duration,
}

/// What one [`EffectManager::advance`] pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    /// Demoted from active to faded
    pub faded: Vec<EffectId>,
    /// Discarded, either at end of life or because the origin had moved
    pub removed: Vec<EffectId>,
    /// Timers that fired for effects already gone
    pub stale: usize,
}

/// Owns all transient effects of one arena view
#[derive(Debug)]
pub struct EffectManager {
    active_duration: Duration,
    lifetime: Duration,
    next_id: u64,
    next_seq: u64,
    effects: BTreeMap<EffectId, TrackedEffect>,
    by_origin: FxHashMap<OriginKey, SmallVec<[EffectId; 4]>>,
    timers: BinaryHeap<Reverse<Timer>>,
}

impl EffectManager {
    /// `lifetime` is measured from creation and must not be shorter than `active_duration`
    pub fn new(active_duration: Duration, lifetime: Duration) -> Self {
        Self {
            active_duration,
            lifetime: lifetime.max(active_duration),
            next_id: 0,
            next_seq: 0,
            effects: BTreeMap::new(),
            by_origin: FxHashMap::default(),
            timers: BinaryHeap::new(),
        }
    }

    pub fn active_duration(&self) -> Duration {
        self.active_duration
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Register an effect and schedule both of its timers
    pub fn add(
        &mut self,
        effect: LaserEffect,
        origin: Option<EntityId>,
        origin_position: Option<GridPos>,
        now: Instant,
    ) -> EffectId {
        let id = EffectId(self.next_id);
        self.next_id += 1;

        let origin = origin.map_or(OriginKey::Unknown, OriginKey::Entity);
        self.by_origin.entry(origin.clone()).or_default().push(id);
        self.effects.insert(
            id,
            TrackedEffect {
                effect,
                origin,
                origin_position,
                created_at: now,
                phase: EffectPhase::Active,
            },
        );

        self.schedule(id, now + self.active_duration, TimerKind::ActiveEnds);
        self.schedule(id, now + self.lifetime, TimerKind::Discard);
        id
    }

    fn schedule(&mut self, effect: EffectId, deadline: Instant, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Reverse(Timer {
            deadline,
            seq,
            effect,
            kind,
        }));
    }

    /// Remove every effect fired by `entity`, synchronously
    ///
    /// Their timers stay queued and become no-ops.
    pub fn invalidate(&mut self, entity: &EntityId) -> usize {
        let key = OriginKey::Entity(entity.clone());
        let Some(ids) = self.by_origin.remove(&key) else {
            return 0;
        };
        let mut removed = 0;
        for id in ids {
            if self.effects.remove(&id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Invalidated {} effect(s) from entity {}", removed, entity);
        }
        removed
    }

    fn remove(&mut self, id: EffectId) -> Option<TrackedEffect> {
        let tracked = self.effects.remove(&id)?;
        if let Some(group) = self.by_origin.get_mut(&tracked.origin) {
            group.retain(|other| *other != id);
            if group.is_empty() {
                self.by_origin.remove(&tracked.origin);
            }
        }
        Some(tracked)
    }

    /// Fire every timer due at or before `now`
    ///
    /// `position_of` reports where an entity currently stands; an effect
    /// whose origin is gone or stands elsewhere is dropped at the end of its
    /// active phase instead of fading.
    pub fn advance<F>(&mut self, now: Instant, position_of: F) -> ExpiryReport
    where
        F: Fn(&EntityId) -> Option<GridPos>,
    {
        let mut report = ExpiryReport::default();

        while let Some(Reverse(timer)) = self.timers.peek().copied() {
            if timer.deadline > now {
                break;
            }
            self.timers.pop();

            let Some(tracked) = self.effects.get_mut(&timer.effect) else {
                report.stale += 1;
                continue;
            };

            match timer.kind {
                TimerKind::ActiveEnds => {
                    let origin_moved = match (&tracked.origin, tracked.origin_position) {
                        (OriginKey::Entity(entity), Some(then)) => {
                            position_of(entity) != Some(then)
                        }
                        _ => false,
                    };
                    if origin_moved {
                        self.remove(timer.effect);
                        report.removed.push(timer.effect);
                    } else {
                        tracked.phase = EffectPhase::Faded;
                        report.faded.push(timer.effect);
                    }
                }
                TimerKind::Discard => {
                    self.remove(timer.effect);
                    report.removed.push(timer.effect);
                }
            }
        }

        report
    }

    /// Earliest queued timer, stale ones included
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(t)| t.deadline)
    }

    /// Visible effects in creation order
    pub fn visible(&self, now: Instant) -> impl Iterator<Item = EffectView<'_>> {
        self.effects.iter().map(move |(id, tracked)| EffectView {
            id: *id,
            effect: &tracked.effect,
            phase: tracked.phase,
            intensity: tracked.phase.intensity(),
            age: now.saturating_duration_since(tracked.created_at),
        })
    }

    pub fn phase(&self, id: EffectId) -> Option<EffectPhase> {
        self.effects.get(&id).map(|t| t.phase)
    }

    /// Effects currently grouped under `origin`
    pub fn group_len(&self, origin: &OriginKey) -> usize {
        self.by_origin.get(origin).map_or(0, |g| g.len())
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Drop every effect and cancel every timer; returns effects dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.effects.len();
        self.effects.clear();
        self.by_origin.clear();
        self.timers.clear();
        dropped
    }
}
