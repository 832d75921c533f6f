//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for game-qa, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for a local detector and a visible browser window
//! - Builder-style overrides from the command line
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `GAME_QA_DETECTOR_URL` | Detector service base URL | `http://127.0.0.1:7000` |
//! | `GAME_QA_DETECTOR_TIMEOUT` | Detector request timeout in seconds | `10` |
//! | `GAME_QA_DETECTOR_CONNECT_TIMEOUT` | Detector connection timeout in seconds | `5` |
//! | `GAME_QA_CHROMIUM_PATH` | Chromium executable (auto-detect when unset) | - |
//! | `GAME_QA_HEADLESS` | Run the browser without a visible window | `false` |
//! | `GAME_QA_VIEWPORT` | Window size as `WxH` | `1280x800` |
//! | `GAME_QA_READINESS` | `selector:<css>`, `event:<name>` or `delay` | `selector:canvas` |
//! | `GAME_QA_READY_TIMEOUT` | Readiness wait bound in milliseconds | `20000` |
//! | `GAME_QA_READY_POLL` | Readiness poll interval in milliseconds | `500` |
//! | `GAME_QA_SETTLE_DELAY` | Wait after a synthesized click in milliseconds | `10000` |
//! | `GAME_QA_SESSION_DIR` | Base directory for session artifacts | `/tmp/game-qa` |
//!
//! # Example
//!
//! ```bash
//! # Point at a remote detector and wait for a renderer-emitted event
//! export GAME_QA_DETECTOR_URL="http://10.0.0.5:7000"
//! export GAME_QA_READINESS="event:canvas-ready"
//! ```

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use crate::window::ReadinessStrategy;

// ============================================================================
// Default Values
// ============================================================================

/// Default detector base URL
pub const DEFAULT_DETECTOR_URL: &str = "http://127.0.0.1:7000";

/// Default detector request timeout (seconds)
pub const DEFAULT_DETECTOR_TIMEOUT: u64 = 10;

/// Default detector connection timeout (seconds)
pub const DEFAULT_DETECTOR_CONNECT_TIMEOUT: u64 = 5;

/// Default window width (pixels)
pub const DEFAULT_WINDOW_WIDTH: u32 = 1280;

/// Default window height (pixels)
pub const DEFAULT_WINDOW_HEIGHT: u32 = 800;

/// Default readiness specification
pub const DEFAULT_READINESS: &str = "selector:canvas";

/// Default bound on the readiness wait (milliseconds)
pub const DEFAULT_READY_TIMEOUT: u64 = 20_000;

/// Default readiness poll interval (milliseconds)
pub const DEFAULT_READY_POLL: u64 = 500;

/// Default settle delay after a click (milliseconds)
pub const DEFAULT_SETTLE_DELAY: u64 = 10_000;

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = "/tmp/game-qa";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_DETECTOR_URL: &str = "GAME_QA_DETECTOR_URL";
pub const ENV_DETECTOR_TIMEOUT: &str = "GAME_QA_DETECTOR_TIMEOUT";
pub const ENV_DETECTOR_CONNECT_TIMEOUT: &str = "GAME_QA_DETECTOR_CONNECT_TIMEOUT";
pub const ENV_CHROMIUM_PATH: &str = "GAME_QA_CHROMIUM_PATH";
pub const ENV_HEADLESS: &str = "GAME_QA_HEADLESS";
pub const ENV_VIEWPORT: &str = "GAME_QA_VIEWPORT";
pub const ENV_READINESS: &str = "GAME_QA_READINESS";
pub const ENV_READY_TIMEOUT: &str = "GAME_QA_READY_TIMEOUT";
pub const ENV_READY_POLL: &str = "GAME_QA_READY_POLL";
pub const ENV_SETTLE_DELAY: &str = "GAME_QA_SETTLE_DELAY";
pub const ENV_SESSION_DIR: &str = "GAME_QA_SESSION_DIR";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for game-qa
#[derive(Debug, Clone)]
pub struct Config {
    /// Detector client configuration
    pub detector: DetectorSettings,
    /// Controlled window configuration
    pub window: WindowSettings,
    /// Session artifact configuration
    pub session: SessionSettings,
}

/// Detector-related settings
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Base URL of the detector service
    pub base_url: String,
    /// Whole-request timeout (seconds)
    pub timeout: u64,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
}

/// Window-related settings
#[derive(Debug, Clone)]
pub struct WindowSettings {
    /// Chromium executable, auto-detected when `None`
    pub chromium_path: Option<String>,
    /// Launch without a visible window
    pub headless: bool,
    /// Window width in pixels
    pub width: u32,
    /// Window height in pixels
    pub height: u32,
    /// How to decide a freshly loaded page is ready
    pub readiness: ReadinessStrategy,
    /// Wait after each synthesized click
    pub settle_delay: Duration,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for session storage
    pub base_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            detector: DetectorSettings::from_env(),
            window: WindowSettings::from_env(),
            session: SessionSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            detector: DetectorSettings::defaults(),
            window: WindowSettings::defaults(),
            session: SessionSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DetectorSettings {
    /// Create detector settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_url: env::var(ENV_DETECTOR_URL)
                .unwrap_or_else(|_| DEFAULT_DETECTOR_URL.to_string()),
            timeout: env_parse(ENV_DETECTOR_TIMEOUT).unwrap_or(DEFAULT_DETECTOR_TIMEOUT),
            connect_timeout: env_parse(ENV_DETECTOR_CONNECT_TIMEOUT)
                .unwrap_or(DEFAULT_DETECTOR_CONNECT_TIMEOUT),
        }
    }

    /// Create detector settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_url: DEFAULT_DETECTOR_URL.to_string(),
            timeout: DEFAULT_DETECTOR_TIMEOUT,
            connect_timeout: DEFAULT_DETECTOR_CONNECT_TIMEOUT,
        }
    }
}

impl WindowSettings {
    /// Create window settings from environment variables
    pub fn from_env() -> Self {
        let (width, height) = env::var(ENV_VIEWPORT)
            .ok()
            .and_then(|s| parse_viewport(&s))
            .unwrap_or((DEFAULT_WINDOW_WIDTH, DEFAULT_WINDOW_HEIGHT));

        let ready_timeout = Duration::from_millis(
            env_parse(ENV_READY_TIMEOUT).unwrap_or(DEFAULT_READY_TIMEOUT),
        );
        let ready_poll =
            Duration::from_millis(env_parse(ENV_READY_POLL).unwrap_or(DEFAULT_READY_POLL));
        let readiness = env::var(ENV_READINESS)
            .ok()
            .and_then(|s| parse_readiness(&s, ready_timeout, ready_poll))
            .unwrap_or_else(|| default_readiness(ready_timeout, ready_poll));

        Self {
            chromium_path: env::var(ENV_CHROMIUM_PATH).ok().filter(|s| !s.is_empty()),
            headless: env::var(ENV_HEADLESS)
                .ok()
                .map(|s| parse_bool(&s))
                .unwrap_or(false),
            width,
            height,
            readiness,
            settle_delay: Duration::from_millis(
                env_parse(ENV_SETTLE_DELAY).unwrap_or(DEFAULT_SETTLE_DELAY),
            ),
        }
    }

    /// Create window settings with defaults
    pub fn defaults() -> Self {
        Self {
            chromium_path: None,
            headless: false,
            width: DEFAULT_WINDOW_WIDTH,
            height: DEFAULT_WINDOW_HEIGHT,
            readiness: default_readiness(
                Duration::from_millis(DEFAULT_READY_TIMEOUT),
                Duration::from_millis(DEFAULT_READY_POLL),
            ),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY),
        }
    }
}

impl SessionSettings {
    /// Create session settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SESSION_DIR)
                .unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    /// Create session settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn default_readiness(timeout: Duration, interval: Duration) -> ReadinessStrategy {
    ReadinessStrategy::PollSelector {
        selector: "canvas".to_string(),
        timeout,
        interval,
    }
}

/// Parse a viewport string of the form `WxH`
pub fn parse_viewport(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.trim().split_once('x')?;
    let w = w.parse().ok()?;
    let h = h.parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}

/// Parse a readiness specification.
///
/// Supports `selector:<css>`, `event:<name>`, `delay` (waits the full timeout)
/// and `delay:<ms>`.
pub fn parse_readiness(
    spec: &str,
    timeout: Duration,
    interval: Duration,
) -> Option<ReadinessStrategy> {
    let spec = spec.trim();
    if spec == "delay" {
        return Some(ReadinessStrategy::FixedDelay(timeout));
    }
    let (kind, value) = spec.split_once(':')?;
    let value = value.trim();
    match kind.trim() {
        "selector" if !value.is_empty() => Some(ReadinessStrategy::PollSelector {
            selector: value.to_string(),
            timeout,
            interval,
        }),
        "event" if !value.is_empty() => Some(ReadinessStrategy::ReadyEvent {
            event: value.to_string(),
            timeout,
        }),
        "delay" => value
            .parse()
            .ok()
            .map(|ms| ReadinessStrategy::FixedDelay(Duration::from_millis(ms))),
        _ => None,
    }
}

/// Get session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().session.base_dir.clone()
}
