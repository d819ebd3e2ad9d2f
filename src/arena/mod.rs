//! Arena synchronization core
//!
//! Canonical model, entity tracking, effect lifecycle, reconciliation and the
//! per-view state machine that ties them to a connection and a backend.

pub mod effects;
pub mod entity_tracker;
pub mod model;
pub mod reconciler;
pub mod view;
