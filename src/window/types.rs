// Core types for the controlled browser window

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::detector::ClassId;

/// Class id routed to canvas pointer-event simulation; every other id uses
/// low-level mouse input.
pub const CANVAS_CLASS_ID: ClassId = 0;

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Error types for window operations
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    /// No live window to act on
    #[error("test window is not available")]
    NotOpen,

    /// Browser process could not be started
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// Page failed to load
    #[error("failed to load {url}: {message}")]
    Navigation { url: String, message: String },

    /// Screenshot could not be produced
    #[error("capture failed: {0}")]
    Capture(String),

    /// Input event could not be dispatched
    #[error("input dispatch failed: {0}")]
    Input(String),

    /// In-page script failed
    #[error("script evaluation failed: {0}")]
    Script(String),

    /// Image encode/decode failure
    #[error("image error: {0}")]
    Image(String),
}

impl From<image::ImageError> for WindowError {
    fn from(err: image::ImageError) -> Self {
        WindowError::Image(err.to_string())
    }
}

/// How to decide a freshly loaded page is ready for capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessStrategy {
    /// Poll the DOM until `selector` matches
    PollSelector {
        selector: String,
        timeout: Duration,
        interval: Duration,
    },
    /// Wait for the page to dispatch `event` on `window`
    ReadyEvent { event: String, timeout: Duration },
    /// Wait a fixed duration
    FixedDelay(Duration),
}

impl ReadinessStrategy {
    /// Upper bound on how long the wait may take
    pub fn bound(&self) -> Duration {
        match self {
            ReadinessStrategy::PollSelector { timeout, .. } => *timeout,
            ReadinessStrategy::ReadyEvent { timeout, .. } => *timeout,
            ReadinessStrategy::FixedDelay(d) => *d,
        }
    }
}

/// Result of opening or reusing the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOutcome {
    pub success: bool,
    /// An already-live window was reused
    pub reused: bool,
}

/// Which input path delivered a click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClickVia {
    /// Pointer events dispatched on the topmost canvas
    Canvas,
    /// Low-level mouse move/press/release
    LowLevel,
    /// In-page element-stack dispatcher
    InDom,
    /// Dispatcher reported failure, low-level click used instead
    FallbackLowLevel,
    /// Dispatcher threw, low-level click used instead
    FallbackOnError,
}

/// Result of a synthesized click
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickOutcome {
    pub success: bool,
    pub via: ClickVia,
    /// Raw dispatcher report, when one ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ClickOutcome {
    pub fn ok(via: ClickVia) -> Self {
        Self {
            success: true,
            via,
            detail: None,
        }
    }
}

/// Options for the in-page click dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomClickOptions {
    pub max_retries: u32,
    /// Milliseconds between attempts
    pub retry_delay: u64,
    /// Selector clicked when nothing is found at the point
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_selector: Option<String>,
}

impl Default for DomClickOptions {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: 100,
            fallback_selector: None,
        }
    }
}

/// Size and scale of the controlled window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowMetrics {
    pub width: u32,
    pub height: u32,
    pub zoom_factor: f64,
    pub device_pixel_ratio: f64,
}

/// The single browser window a flow drives.
///
/// Implementations:
/// - `CdpWindow` drives Chromium over the DevTools protocol
/// - `MockWindow` renders an in-memory framebuffer and records clicks
#[async_trait]
pub trait WindowHost: Send {
    /// Load `url`, creating the window if needed, and wait until it is ready
    async fn open_or_reuse(&mut self, url: &str) -> WindowResult<OpenOutcome>;

    /// Whether a live window exists
    async fn is_alive(&mut self) -> bool;

    /// PNG of the currently visible frame
    async fn capture_screenshot(&mut self) -> WindowResult<Vec<u8>>;

    /// Click at window coordinates, routed by class id, then wait for the UI to settle
    async fn perform_click(
        &mut self,
        class_id: ClassId,
        x: f64,
        y: f64,
    ) -> WindowResult<ClickOutcome>;

    /// Try the in-page dispatcher, falling back to a low-level click
    async fn click_in_dom(
        &mut self,
        x: f64,
        y: f64,
        options: &DomClickOptions,
    ) -> WindowResult<ClickOutcome>;

    /// Current window metrics
    async fn window_metrics(&mut self) -> WindowResult<WindowMetrics>;

    /// Release the window
    async fn close(&mut self) -> WindowResult<()>;

    /// Source identifier, e.g. "cdp" or "mock"
    fn source_type(&self) -> &str;
}

pub(crate) fn ensure_finite(x: f64, y: f64) -> WindowResult<()> {
    if x.is_finite() && y.is_finite() {
        Ok(())
    } else {
        Err(WindowError::Input(format!("non-finite coordinates ({}, {})", x, y)))
    }
}
