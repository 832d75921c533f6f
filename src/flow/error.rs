use crate::detector::{ClassId, DetectorError};
use crate::window::WindowError;

/// Result type for flow operations
pub type FlowResult<T> = Result<T, FlowError>;

/// Everything that can stop a step, a retry or a run
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A step or retry was requested before a test id was issued
    #[error("test has not been started")]
    SessionNotStarted,

    /// The window could not produce a screenshot
    #[error("screenshot capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The detector could not be reached or rejected the request
    #[error("detection request failed: {0}")]
    DetectionRequest(#[source] DetectorError),

    /// The detector answered outside its contract
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Retry of a class id that has no history entry
    #[error("cannot retry class_id {class_id} because it has not been executed yet")]
    RetryOfUnexecutedStep { class_id: ClassId },

    /// The run observed a cancel request
    #[error("test was cancelled")]
    Cancelled,

    /// The window could not be opened or driven
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// An intervention arrived while no run was draining the inbox
    #[error("no flow is running")]
    NotRunning,

    /// The controller dropped an intervention without answering it
    #[error("intervention was dropped before it was handled")]
    InterventionDropped,
}

impl From<DetectorError> for FlowError {
    /// A 2xx body that does not decode broke the contract rather than the request
    fn from(error: DetectorError) -> Self {
        match error {
            DetectorError::InvalidResponse(message) => FlowError::ProtocolViolation(format!(
                "malformed detector response: {message}"
            )),
            other => FlowError::DetectionRequest(other),
        }
    }
}
