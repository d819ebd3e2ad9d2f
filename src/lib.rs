//! Arena Viewer Library
//!
//! Live spectator client for grid robot battles. A WebSocket feed delivers
//! full battle snapshots and transient laser shots; the viewer reconciles
//! them into a canonical arena state and draws frames through one of two
//! interchangeable backends.
//!
//! # Features
//!
//! - `raster` - RGBA framebuffer backend with PNG frame output (enabled by default)

pub mod arena;
pub mod config;
pub mod metrics;
pub mod net;
pub mod render;
