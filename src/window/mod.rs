//! The controlled browser window a flow drives.
//!
//! A flow only needs a handful of primitives from its window: load a url,
//! capture the visible frame, click (routed by class id), and report metrics.
//! [`WindowHost`] captures that seam; `CdpWindow` implements it against a real
//! Chromium and [`MockWindow`] against an in-memory framebuffer.

#[cfg(feature = "browser")]
pub mod cdp;
pub mod mock;
pub mod scripts;
pub mod types;

#[cfg(feature = "browser")]
pub use cdp::{CdpWindow, CdpWindowConfig};
pub use mock::{Framebuffer, MockProbe, MockWindow, RecordedClick};
pub use types::{
    CANVAS_CLASS_ID, ClickOutcome, ClickVia, DomClickOptions, OpenOutcome, ReadinessStrategy,
    WindowError, WindowHost, WindowMetrics, WindowResult,
};
