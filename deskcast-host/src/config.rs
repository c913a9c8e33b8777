//! Configuration for the deskcast host.
//!
//! Sources, later ones winning: built-in defaults, the TOML file,
//! `REMOTE_*` environment variables, then CLI flags. Everything is read
//! once at start-up.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use deskcast_core::{CaptureConfig, ManagerConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub network: NetworkConfig,
    pub capture: CaptureSettings,
    pub session: SessionConfig,
    pub input: InputConfig,
    pub logging: LoggingConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bind address.
    pub host: String,
    /// WebSocket port.
    pub port: u16,
    /// Viewers allowed at once; extra connections are closed with 1013.
    pub max_connections: usize,
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureBackend {
    /// Primary display (needs the `scrap-capture` feature).
    Native,
    /// Synthetic gradient.
    TestPattern,
}

/// Capture loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Soft target frame rate.
    pub fps: u32,
    /// JPEG quality, 1..=95.
    pub jpeg_quality: u8,
    /// Downscale factor; values below 1.0 reduce bandwidth.
    pub resize_scale: f32,
    /// Cursor overlay. Accepted but not rendered yet.
    pub send_cursor: bool,
    pub source: CaptureBackend,
    /// Test-pattern size.
    pub pattern_width: u32,
    pub pattern_height: u32,
    /// How long a native grab waits for a fresh frame.
    pub frame_timeout_ms: u64,
}

/// Per-session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Frames buffered per viewer before the oldest is dropped.
    pub queue_capacity: usize,
}

/// Input replay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Inject viewer input into the OS. When off, events are only logged.
    pub enabled: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8765,
            max_connections: 5,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fps: 12,
            jpeg_quality: 60,
            resize_scale: 1.0,
            send_cursor: true,
            source: if cfg!(feature = "scrap-capture") {
                CaptureBackend::Native
            } else {
                CaptureBackend::TestPattern
            },
            pattern_width: 1280,
            pattern_height: 720,
            frame_timeout_ms: 100,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { queue_capacity: 2 }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Apply `REMOTE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply `REMOTE_*` overrides from `lookup`. A value that does not
    /// parse leaves the current setting alone.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("REMOTE_HOST") {
            let host = host.trim();
            if !host.is_empty() {
                self.network.host = host.to_string();
            }
        }
        override_parsed(&lookup, "REMOTE_PORT", &mut self.network.port);
        override_parsed(&lookup, "REMOTE_FPS", &mut self.capture.fps);
        override_parsed(&lookup, "REMOTE_JPEG_QUALITY", &mut self.capture.jpeg_quality);
        override_parsed(&lookup, "REMOTE_MAX_CONNECTIONS", &mut self.network.max_connections);
        override_parsed(&lookup, "REMOTE_RESIZE_SCALE", &mut self.capture.resize_scale);
        override_parsed(&lookup, "REMOTE_QUEUE_CAPACITY", &mut self.session.queue_capacity);
        if let Some(flag) = lookup("REMOTE_SEND_CURSOR").as_deref().and_then(parse_flag) {
            self.capture.send_cursor = flag;
        }
    }

    /// Clamp every setting into its usable range.
    pub fn normalized(mut self) -> Self {
        self.capture.fps = self.capture.fps.clamp(1, 60);
        self.capture.jpeg_quality = self.capture.jpeg_quality.clamp(1, 95);
        let scale = self.capture.resize_scale;
        self.capture.resize_scale = if scale.is_finite() && scale > 0.0 {
            scale.min(1.0)
        } else {
            1.0
        };
        self.network.max_connections = self.network.max_connections.max(1);
        self.session.queue_capacity = self.session.queue_capacity.clamp(1, 8);
        self.capture.pattern_width = self.capture.pattern_width.max(1);
        self.capture.pattern_height = self.capture.pattern_height.max(1);
        self
    }

    /// `host:port` for the listener. IPv6 literals get brackets.
    pub fn bind_addr(&self) -> String {
        let host = self.network.host.as_str();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{}", self.network.port)
        } else {
            format!("{host}:{}", self.network.port)
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_fps: self.capture.fps,
            quality: self.capture.jpeg_quality,
            scale: self.capture.resize_scale,
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_connections: self.network.max_connections,
            queue_capacity: self.session.queue_capacity,
        }
    }
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!("ignoring {key}={raw:?}: not a valid value"),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────
