use std::path::PathBuf;
use std::time::Duration;

use crate::render::BackendKind;

/// Errors reported by [`ViewerConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("server host cannot be empty")]
    EmptyHost,
    #[error("{0} must be greater than 0")]
    ZeroDuration(&'static str),
    #[error("LASER_FADE_MS ({fade_ms}) cannot be shorter than LASER_ACTIVE_MS ({active_ms})")]
    FadeShorterThanActive { active_ms: u64, fade_ms: u64 },
    #[error("render fps must be 1-120, got {0}")]
    RenderFps(u32),
    #[error("cell size must be 4-128 px, got {0}")]
    CellSize(u32),
}

/// Viewer configuration
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Host (and optional port) of the battle server
    pub server_host: String,
    /// Whether the hosting page is served over https (selects wss)
    pub secure: bool,
    /// Path prefix the arena id is appended to
    pub ws_path_prefix: String,
    /// Arena to watch
    pub arena_id: Option<String>,
    /// Battle listing to pick an arena from when no id is set
    pub directory_file: Option<PathBuf>,
    /// Presentation backend
    pub backend: BackendKind,
    /// Frame output path (defaults depend on the backend)
    pub output: Option<PathBuf>,
    pub render_fps: u32,
    /// Active phase of a laser effect
    pub laser_active: Duration,
    /// Total laser lifetime, measured from creation
    pub laser_fade: Duration,
    pub move_animation: Duration,
    /// Pixels per grid cell for the raster backend
    pub cell_px: u32,
    /// Action log lines kept in each frame
    pub action_log_limit: usize,
    pub metrics_port: Option<u16>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost:8080".to_string(),
            secure: false,
            ws_path_prefix: "/ws/battles/".to_string(),
            arena_id: None,
            directory_file: None,
            backend: BackendKind::Markup,
            output: None,
            render_fps: 10,
            laser_active: Duration::from_millis(1000),
            laser_fade: Duration::from_millis(2500),
            move_animation: Duration::from_millis(300),
            cell_px: 24,
            action_log_limit: 10,
            metrics_port: None,
        }
    }
}

/// Parse a millisecond duration variable, keeping `current` on bad input
fn env_millis(name: &str, current: Duration) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            Ok(_) => {
                tracing::warn!("{} must be > 0, using default", name);
                current
            }
            Err(_) => {
                tracing::warn!("Invalid {} '{}', using default", name, raw);
                current
            }
        },
        Err(_) => current,
    }
}

impl ViewerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("ARENA_SERVER_HOST") {
            let host = host.trim();
            if host.is_empty() {
                tracing::warn!("ARENA_SERVER_HOST is empty, using default");
            } else {
                config.server_host = host.to_string();
            }
        }

        if let Ok(scheme) = std::env::var("ARENA_PAGE_SCHEME") {
            match scheme.trim().to_ascii_lowercase().as_str() {
                "https" | "wss" => config.secure = true,
                "http" | "ws" => config.secure = false,
                _ => tracing::warn!("Invalid ARENA_PAGE_SCHEME '{}', using http", scheme),
            }
        }

        if let Ok(prefix) = std::env::var("ARENA_WS_PATH_PREFIX") {
            config.ws_path_prefix = prefix;
        }

        if let Ok(id) = std::env::var("ARENA_ID") {
            if !id.trim().is_empty() {
                config.arena_id = Some(id.trim().to_string());
            }
        }

        if let Ok(path) = std::env::var("ARENA_DIRECTORY_FILE") {
            config.directory_file = Some(PathBuf::from(path));
        }

        if let Ok(backend) = std::env::var("ARENA_BACKEND") {
            match backend.parse::<BackendKind>() {
                Ok(kind) => config.backend = kind,
                Err(e) => tracing::warn!("{}, using default", e),
            }
        }

        if let Ok(output) = std::env::var("ARENA_OUTPUT") {
            config.output = Some(PathBuf::from(output));
        }

        if let Ok(fps) = std::env::var("ARENA_RENDER_FPS") {
            if let Ok(parsed) = fps.parse::<u32>() {
                if (1..=120).contains(&parsed) {
                    config.render_fps = parsed;
                } else {
                    tracing::warn!("ARENA_RENDER_FPS must be 1-120, using default");
                }
            } else {
                tracing::warn!("Invalid ARENA_RENDER_FPS '{}', using default", fps);
            }
        }

        config.laser_active = env_millis("LASER_ACTIVE_MS", config.laser_active);
        config.laser_fade = env_millis("LASER_FADE_MS", config.laser_fade);
        config.move_animation = env_millis("MOVE_ANIMATION_MS", config.move_animation);

        if let Ok(cell) = std::env::var("ARENA_CELL_PX") {
            if let Ok(parsed) = cell.parse::<u32>() {
                if (4..=128).contains(&parsed) {
                    config.cell_px = parsed;
                } else {
                    tracing::warn!("ARENA_CELL_PX must be 4-128, using default");
                }
            } else {
                tracing::warn!("Invalid ARENA_CELL_PX '{}', using default", cell);
            }
        }

        if let Ok(limit) = std::env::var("ACTION_LOG_LIMIT") {
            if let Ok(parsed) = limit.parse::<usize>() {
                config.action_log_limit = parsed;
            } else {
                tracing::warn!("Invalid ACTION_LOG_LIMIT '{}', using default", limit);
            }
        }

        if let Ok(port) = std::env::var("METRICS_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => config.metrics_port = Some(parsed),
                _ => tracing::warn!("Invalid METRICS_PORT '{}', metrics disabled", port),
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.laser_active.is_zero() {
            return Err(ConfigError::ZeroDuration("LASER_ACTIVE_MS"));
        }
        if self.laser_fade.is_zero() {
            return Err(ConfigError::ZeroDuration("LASER_FADE_MS"));
        }
        if self.move_animation.is_zero() {
            return Err(ConfigError::ZeroDuration("MOVE_ANIMATION_MS"));
        }
        if self.laser_fade < self.laser_active {
            return Err(ConfigError::FadeShorterThanActive {
                active_ms: self.laser_active.as_millis() as u64,
                fade_ms: self.laser_fade.as_millis() as u64,
            });
        }
        if !(1..=120).contains(&self.render_fps) {
            return Err(ConfigError::RenderFps(self.render_fps));
        }
        if !(4..=128).contains(&self.cell_px) {
            return Err(ConfigError::CellSize(self.cell_px));
        }
        Ok(())
    }

    /// Interval between rendered frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.render_fps.max(1) as f64)
    }

    /// Frame output path, falling back to the backend's default file name
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.backend.default_output()))
    }
}
