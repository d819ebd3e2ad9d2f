//! State reconciliation
//!
//! Turns raw inbound frames into canonical state. Each frame is classified
//! first and then applied: snapshots replace the canonical model and run the
//! entity diff, lasers become tracked effects, server notices are surfaced.
//! Anything that fails to classify or validate leaves every structure
//! untouched.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::arena::effects::{EffectId, EffectManager, ExpiryReport};
use crate::arena::entity_tracker::{DiffReport, EntityTracker};
use crate::arena::model::{ArenaSnapshot, EntityId, LaserEffect};
use crate::metrics::ViewerMetrics;
use crate::net::protocol::{classify, DecodeError, InboundMessage, SnapshotMessage};

/// Why an inbound frame was rejected
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Snapshot for arena {got} does not belong to arena {expected}")]
    WrongArena { expected: String, got: String },
}

/// Result of applying one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotApplied {
    pub diff: DiffReport,
    /// Effects dropped because their origin moved or vanished
    pub invalidated_effects: usize,
    /// Scene must be rebuilt: first snapshot or arena dimensions changed
    pub rebuild: bool,
}

/// What one call to [`StateReconciler::ingest`] did
#[derive(Debug)]
pub enum IngestOutcome {
    Snapshot(SnapshotApplied),
    Effect {
        id: EffectId,
        origin: Option<EntityId>,
    },
    ServerNotice(String),
    Rejected(IngestError),
}

/// Canonical state and derived structures for one arena
#[derive(Debug)]
pub struct StateReconciler {
    arena_id: String,
    snapshot: Option<ArenaSnapshot>,
    tracker: EntityTracker,
    effects: EffectManager,
    metrics: Arc<ViewerMetrics>,
}

impl StateReconciler {
    pub fn new(
        arena_id: impl Into<String>,
        tracker: EntityTracker,
        effects: EffectManager,
        metrics: Arc<ViewerMetrics>,
    ) -> Self {
        Self {
            arena_id: arena_id.into(),
            snapshot: None,
            tracker,
            effects,
            metrics,
        }
    }

    pub fn arena_id(&self) -> &str {
        &self.arena_id
    }

    pub fn snapshot(&self) -> Option<&ArenaSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn tracker(&self) -> &EntityTracker {
        &self.tracker
    }

    pub fn effects(&self) -> &EffectManager {
        &self.effects
    }

    /// Classify and apply one raw frame
    ///
    /// Never fails: rejections come back as [`IngestOutcome::Rejected`].
    pub fn ingest(&mut self, raw: &str, now: Instant) -> IngestOutcome {
        self.metrics.record_message(raw.len());

        let outcome = match classify(raw) {
            Ok(InboundMessage::Snapshot(msg)) => self.apply_snapshot(msg, now),
            Ok(InboundMessage::Laser(msg)) => {
                let (id, origin) = self.add_effect(LaserEffect::from(msg), now);
                IngestOutcome::Effect { id, origin }
            }
            Ok(InboundMessage::Error(notice)) => {
                warn!("Server notice for arena {}: {}", self.arena_id, notice.message);
                self.metrics.server_notices.fetch_add(1, Ordering::Relaxed);
                IngestOutcome::ServerNotice(notice.message)
            }
            Err(e) => IngestOutcome::Rejected(e.into()),
        };

        if let IngestOutcome::Rejected(e) = &outcome {
            warn!("Rejected frame for arena {}: {}", self.arena_id, e);
            self.metrics.parse_errors.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    fn apply_snapshot(&mut self, msg: SnapshotMessage, now: Instant) -> IngestOutcome {
        // Validate fully before touching anything
        let next = match msg.into_snapshot() {
            Ok(next) => next,
            Err(e) => return IngestOutcome::Rejected(e.into()),
        };
        if next.arena_id != self.arena_id {
            return IngestOutcome::Rejected(IngestError::WrongArena {
                expected: self.arena_id.clone(),
                got: next.arena_id,
            });
        }

        let rebuild = match &self.snapshot {
            Some(prev) if prev.same_dimensions(&next) => false,
            Some(prev) => {
                info!(
                    "Arena {} resized {}x{} -> {}x{}, rebuilding scene",
                    self.arena_id, prev.width, prev.height, next.width, next.height
                );
                true
            }
            None => true,
        };

        let diff = self.tracker.apply(&next.entities, now);

        // Invalidation completes before the new snapshot becomes visible
        let mut invalidated_effects = 0;
        for id in diff.invalidated() {
            invalidated_effects += self.effects.invalidate(id);
        }

        debug!(
            "Snapshot applied for arena {}: {} created, {} updated, {} removed, {} effect(s) invalidated",
            self.arena_id,
            diff.created.len(),
            diff.updated.len(),
            diff.removed.len(),
            invalidated_effects
        );

        self.snapshot = Some(next);

        let m = &self.metrics;
        m.record_snapshot(now);
        m.entities_created.fetch_add(diff.created.len() as u64, Ordering::Relaxed);
        m.entities_updated.fetch_add(diff.updated.len() as u64, Ordering::Relaxed);
        m.entities_removed.fetch_add(diff.removed.len() as u64, Ordering::Relaxed);
        m.entities_live.store(self.tracker.len() as u64, Ordering::Relaxed);
        m.effects_invalidated.fetch_add(invalidated_effects as u64, Ordering::Relaxed);
        m.effects_live.store(self.effects.len() as u64, Ordering::Relaxed);
        if rebuild {
            m.scene_rebuilds.fetch_add(1, Ordering::Relaxed);
        }

        IngestOutcome::Snapshot(SnapshotApplied {
            diff,
            invalidated_effects,
            rebuild,
        })
    }

    /// Resolve who fired the shot
    ///
    /// Explicit firing id first, otherwise whoever stands on the first beam cell.
    fn resolve_origin(&self, effect: &LaserEffect) -> Option<EntityId> {
        if let Some(id) = &effect.origin_entity_id {
            return Some(id.clone());
        }
        self.snapshot
            .as_ref()
            .zip(effect.origin())
            .and_then(|(snap, pos)| snap.entity_at(pos))
            .map(|entity| entity.id.clone())
    }

    fn add_effect(&mut self, effect: LaserEffect, now: Instant) -> (EffectId, Option<EntityId>) {
        let origin = self.resolve_origin(&effect);
        let origin_position = origin.as_ref().and_then(|id| self.tracker.position_of(id));

        debug!(
            "Laser in arena {} from {:?}: hit={} path={} cells",
            self.arena_id,
            origin.as_ref().map(EntityId::as_str),
            effect.hit,
            effect.path.len()
        );

        let id = self.effects.add(effect, origin.clone(), origin_position, now);
        self.metrics.lasers_received.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .effects_live
            .store(self.effects.len() as u64, Ordering::Relaxed);
        (id, origin)
    }

    /// Fire due effect timers
    pub fn expire_effects(&mut self, now: Instant) -> ExpiryReport {
        let tracker = &self.tracker;
        let report = self.effects.advance(now, |id| tracker.position_of(id));

        let m = &self.metrics;
        m.effects_faded.fetch_add(report.faded.len() as u64, Ordering::Relaxed);
        m.effects_expired.fetch_add(report.removed.len() as u64, Ordering::Relaxed);
        m.stale_timers.fetch_add(report.stale as u64, Ordering::Relaxed);
        m.effects_live.store(self.effects.len() as u64, Ordering::Relaxed);
        report
    }

    /// Drop all effects and their timers (reconnect or teardown)
    pub fn clear_effects(&mut self) -> usize {
        let dropped = self.effects.clear();
        self.metrics.effects_live.store(0, Ordering::Relaxed);
        dropped
    }

    /// Forget everything, snapshot included
    pub fn reset(&mut self) {
        self.clear_effects();
        self.tracker.clear();
        self.snapshot = None;
        self.metrics.entities_live.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::arena::effects::EffectPhase;
    use crate::arena::model::GridPos;

    const ACTIVE: Duration = Duration::from_millis(1000);
    const LIFETIME: Duration = Duration::from_millis(2500);

    fn reconciler() -> StateReconciler {
        StateReconciler::new(
            "7",
            EntityTracker::new(Duration::from_millis(300)),
            EffectManager::new(ACTIVE, LIFETIME),
            Arc::new(ViewerMetrics::new()),
        )
    }

    fn snapshot_json(width: u32, robots: &[(u32, i32, i32, &str)]) -> String {
        let robots: Vec<String> = robots
            .iter()
            .map(|(id, x, y, status)| {
                format!(
                    r#"{{"id": {}, "name": "R{}", "positionX": {}, "positionY": {}, "direction": "NORTH", "status": "{}"}}"#,
                    id, id, x, y, status
                )
            })
            .collect();
        format!(
            r#"{{"battleId": 7, "battleName": "Test", "arenaWidth": {}, "arenaHeight": 20,
                "robotMovementTimeSeconds": 1.0, "battleState": "IN_PROGRESS",
                "robots": [{}], "walls": []}}"#,
            width,
            robots.join(",")
        )
    }

    const LASER_FROM_5_5: &str = r#"{"hit": true, "range": 5, "direction": "NORTH",
        "laserPath": [{"x": 5, "y": 5}, {"x": 5, "y": 10}], "hitPosition": {"x": 5, "y": 10}}"#;

    #[tokio::test(start_paused = true)]
    async fn test_movement_invalidates_effects_scenario() {
        let mut rec = reconciler();
        let now = Instant::now();

        let first = rec.ingest(
            &snapshot_json(20, &[(1, 5, 5, "IDLE"), (2, 15, 15, "IDLE")]),
            now,
        );
        let IngestOutcome::Snapshot(applied) = first else {
            panic!("Expected snapshot");
        };
        assert_eq!(applied.diff.created.len(), 2);
        assert!(applied.rebuild);

        // Origin inferred from the entity standing on the first beam cell
        let IngestOutcome::Effect { origin, .. } = rec.ingest(LASER_FROM_5_5, now) else {
            panic!("Expected effect");
        };
        assert_eq!(origin, Some(EntityId::from("1")));
        assert_eq!(rec.effects().len(), 1);

        let second = rec.ingest(
            &snapshot_json(20, &[(1, 6, 6, "MOVING"), (2, 15, 15, "IDLE")]),
            now,
        );
        let IngestOutcome::Snapshot(applied) = second else {
            panic!("Expected snapshot");
        };
        assert_eq!(applied.diff.updated, vec![EntityId::from("1")]);
        assert!(!applied.rebuild);
        assert_eq!(applied.invalidated_effects, 1);
        assert!(rec.effects().is_empty());

        // Stale timers fire silently later
        let report = rec.expire_effects(now + LIFETIME);
        assert_eq!(report.stale, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_laser_lifecycle_without_movement() {
        let mut rec = reconciler();
        let start = Instant::now();
        rec.ingest(&snapshot_json(20, &[(1, 5, 5, "IDLE")]), start);
        let IngestOutcome::Effect { id, .. } = rec.ingest(LASER_FROM_5_5, start) else {
            panic!("Expected effect");
        };
        assert_eq!(rec.effects().phase(id), Some(EffectPhase::Active));

        tokio::time::advance(ACTIVE).await;
        rec.expire_effects(Instant::now());
        assert_eq!(rec.effects().phase(id), Some(EffectPhase::Faded));

        tokio::time::advance(LIFETIME - ACTIVE).await;
        rec.expire_effects(Instant::now());
        assert!(rec.effects().is_empty());
    }

    #[test]
    fn test_malformed_input_leaves_state_unchanged() {
        let mut rec = reconciler();
        let now = Instant::now();
        let raw = snapshot_json(20, &[(1, 5, 5, "IDLE")]);
        rec.ingest(&raw, now);
        rec.ingest(LASER_FROM_5_5, now);

        let before = rec.snapshot().cloned();
        let outcome = rec.ingest(&raw[..raw.len() / 2], now);

        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(IngestError::Decode(DecodeError::Malformed(_)))
        ));
        assert_eq!(rec.snapshot().cloned(), before);
        assert_eq!(rec.tracker().len(), 1);
        assert_eq!(rec.effects().len(), 1);
    }

    #[test]
    fn test_server_notice_preserves_snapshot() {
        let mut rec = reconciler();
        let now = Instant::now();
        rec.ingest(&snapshot_json(20, &[(1, 5, 5, "IDLE")]), now);

        match rec.ingest(r#"{"error": "Battle paused"}"#, now) {
            IngestOutcome::ServerNotice(msg) => assert_eq!(msg, "Battle paused"),
            other => panic!("Expected notice, got {:?}", other),
        }
        assert_eq!(rec.snapshot().map(|s| s.entities.len()), Some(1));
    }

    #[test]
    fn test_laser_does_not_mutate_snapshot() {
        let mut rec = reconciler();
        let now = Instant::now();
        rec.ingest(&snapshot_json(20, &[(1, 5, 5, "IDLE")]), now);
        let before = rec.snapshot().cloned();

        rec.ingest(LASER_FROM_5_5, now);
        assert_eq!(rec.snapshot().cloned(), before);
    }

    #[test]
    fn test_explicit_firing_id_wins() {
        let mut rec = reconciler();
        let now = Instant::now();
        rec.ingest(&snapshot_json(20, &[(1, 5, 5, "IDLE"), (2, 0, 0, "IDLE")]), now);

        let raw = r#"{"hit": false, "laserPath": [{"x": 5, "y": 5}, {"x": 9, "y": 5}], "firingRobotId": 2}"#;
        let IngestOutcome::Effect { origin, .. } = rec.ingest(raw, now) else {
            panic!("Expected effect");
        };
        assert_eq!(origin, Some(EntityId::from("2")));
    }

    #[test]
    fn test_laser_before_any_snapshot_goes_to_unknown_bucket() {
        let mut rec = reconciler();
        let IngestOutcome::Effect { origin, .. } = rec.ingest(LASER_FROM_5_5, Instant::now()) else {
            panic!("Expected effect");
        };
        assert!(origin.is_none());
    }

    #[test]
    fn test_snapshot_for_other_arena_rejected() {
        let mut rec = reconciler();
        let raw = r#"{"battleId": 8, "arenaWidth": 10, "arenaHeight": 10}"#;
        assert!(matches!(
            rec.ingest(raw, Instant::now()),
            IngestOutcome::Rejected(IngestError::WrongArena { .. })
        ));
        assert!(rec.snapshot().is_none());
    }

    #[test]
    fn test_dimension_change_requests_rebuild() {
        let mut rec = reconciler();
        let now = Instant::now();
        rec.ingest(&snapshot_json(20, &[]), now);
        let IngestOutcome::Snapshot(applied) = rec.ingest(&snapshot_json(30, &[]), now) else {
            panic!("Expected snapshot");
        };
        assert!(applied.rebuild);
        assert_eq!(rec.snapshot().map(|s| s.width), Some(30));
    }

    #[test]
    fn test_removed_entity_invalidates_its_effects() {
        let mut rec = reconciler();
        let now = Instant::now();
        rec.ingest(&snapshot_json(20, &[(1, 5, 5, "IDLE"), (2, 1, 1, "IDLE")]), now);
        rec.ingest(LASER_FROM_5_5, now);

        let IngestOutcome::Snapshot(applied) = rec.ingest(&snapshot_json(20, &[(2, 1, 1, "IDLE")]), now)
        else {
            panic!("Expected snapshot");
        };
        assert_eq!(applied.diff.removed, vec![EntityId::from("1")]);
        assert_eq!(applied.invalidated_effects, 1);
        assert_eq!(rec.tracker().position_of(&EntityId::from("2")), Some(GridPos::new(1, 1)));
    }

    #[test]
    fn test_metrics_follow_ingest() {
        let metrics = Arc::new(ViewerMetrics::new());
        let mut rec = StateReconciler::new(
            "7",
            EntityTracker::new(Duration::from_millis(300)),
            EffectManager::new(ACTIVE, LIFETIME),
            metrics.clone(),
        );
        let now = Instant::now();
        rec.ingest(&snapshot_json(20, &[(1, 5, 5, "IDLE")]), now);
        rec.ingest("not json", now);

        assert_eq!(metrics.snapshots_applied.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.parse_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.messages_received.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.last_snapshot_at(), Some(now));
    }
}
