//! game-qa - stepwise UI compliance testing for browser-hosted games.
//!
//! This crate provides:
//! - A controlled browser window (Chromium over CDP) and an in-memory mock
//! - A client for the detection service that judges each screenshot
//! - The step loop: capture, detect, click, record, advance
//! - Mid-run cancel, click-coordinate override and step retry
//! - Per-run artifact directories with screenshots and a summary
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use game_qa::{DetectorConfig, FlowController, HttpDetector, MockWindow, RunParams};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let detector = HttpDetector::new(&DetectorConfig::new("http://127.0.0.1:7000"))?;
//! let mut controller = FlowController::new(Arc::new(detector), Box::new(MockWindow::default()));
//! let summary = controller
//!     .run(RunParams::new("https://example.com", "Regression"), |update| {
//!         println!("class {} passed={}", update.step_result.class_id, update.step_result.passed);
//!     })
//!     .await?;
//! println!("{} steps", summary.history.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod detector;
pub mod flow;
pub mod runner;
pub mod session;
pub mod window;

// Re-export detector client
pub use detector::{
    ClassId, Coordinates, Detection, Detector, DetectorConfig, DetectorError, DetectorResult,
    HttpDetector, NextStep, StepResponse, StepResult, StepStatus, encode_data_uri,
};

// Re-export orchestration types
pub use flow::{
    FinalResult, FlowController, FlowError, FlowHandle, FlowResult, FlowStatus, History,
    PlanAction, RunParams, SessionSummary, StepExecutor, StepUpdate, TestSession,
};

// Re-export report types
pub use runner::{RunReport, StepRecord};

// Re-export session management
pub use session::Session;

// Re-export window hosts
#[cfg(feature = "browser")]
pub use window::{CdpWindow, CdpWindowConfig};
pub use window::{
    CANVAS_CLASS_ID, ClickOutcome, ClickVia, DomClickOptions, Framebuffer, MockWindow,
    ReadinessStrategy, WindowError, WindowHost, WindowMetrics,
};
