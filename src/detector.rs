//! Detector service client.
//!
//! The detector receives a screenshot plus the class id of the UI element the
//! current step targets, and answers with a pass/fail judgment, optional
//! detection geometry and the next step to attempt.
//!
//! Endpoints:
//! - `POST /run-test` starts a session and returns the first class id
//! - `POST /run-test-step` judges one screenshot
//! - `GET /` health
//! - `GET /test-types` available test types
//!
//! # Configuration
//!
//! Defaults come from [`crate::config`]; see `GAME_QA_DETECTOR_URL`,
//! `GAME_QA_DETECTOR_TIMEOUT` and `GAME_QA_DETECTOR_CONNECT_TIMEOUT`.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config;
use crate::flow::plan::PlanAction;

/// Integer tag identifying which UI element a step targets
pub type ClassId = u32;

/// Result type for detector operations
pub type DetectorResult<T> = Result<T, DetectorError>;

/// Errors that can occur talking to the detector
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// Transport failure, including timeouts
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Detector answered with a non-success status
    #[error("detector returned {status}: {detail}")]
    Api {
        /// HTTP status code
        status: u16,
        /// `detail` field of the error body, or the raw body
        detail: String,
    },
    /// Body could not be decoded into the expected shape
    #[error("invalid detector response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// Wire types
// ============================================================================

/// Pixel coordinates in capture space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

impl Coordinates {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Detection box corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// The detector's geometry for a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Confidence in `[0, 1]`
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub click_x: Option<f64>,
    #[serde(default)]
    pub click_y: Option<f64>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

impl Detection {
    /// Click point, only when both axes are present
    pub fn click_point(&self) -> Option<Coordinates> {
        match (self.click_x, self.click_y) {
            (Some(x), Some(y)) => Some(Coordinates { x, y }),
            _ => None,
        }
    }
}

/// Outcome of one step attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub class_id: ClassId,
    pub passed: bool,
    #[serde(default)]
    pub detection: Option<Detection>,
}

/// What the detector wants attempted next
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NextStep {
    #[serde(default)]
    pub class_id: Option<ClassId>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

/// Whether the flow goes on after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Continue,
    Complete,
}

/// Context about the previous step's action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionResult {
    pub clicked: bool,
}

/// Body of `POST /run-test`
#[derive(Debug, Clone, Serialize)]
pub struct StartTestRequest {
    #[serde(rename = "gameUrl")]
    pub game_url: String,
    #[serde(rename = "testType")]
    pub test_type: String,
    #[serde(rename = "additionalParams", skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<serde_json::Value>,
}

/// Response of `POST /run-test`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTestResponse {
    pub test_id: String,
    #[serde(default)]
    pub next_step: Option<NextStep>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub results: Option<serde_json::Value>,
}

/// Body of `POST /run-test-step`
#[derive(Debug, Clone, Serialize)]
pub struct StepRequest {
    pub test_id: String,
    pub class_id: ClassId,
    /// `data:image/png;base64,...`
    pub screenshot: String,
    pub action_result: ActionResult,
}

/// Response of `POST /run-test-step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub step_result: StepResult,
    #[serde(default)]
    pub next_step: Option<NextStep>,
    pub status: StepStatus,
    #[serde(default)]
    pub final_result: Option<serde_json::Value>,
    /// Declarative follow-up actions, interpreted locally
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<PlanAction>,
}

impl StepResponse {
    /// Class id the detector wants next, if any
    pub fn next_class_id(&self) -> Option<ClassId> {
        self.next_step.as_ref().and_then(|n| n.class_id)
    }
}

/// Response of `GET /test-types`
#[derive(Debug, Clone, Deserialize)]
struct TestTypesResponse {
    test_types: Vec<String>,
}

/// Encode PNG bytes as the data URI the detector expects
pub fn encode_data_uri(png: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(png);
    format!("data:image/png;base64,{}", encoded)
}

// ============================================================================
// Client
// ============================================================================

/// Operations the flow needs from a detector
#[async_trait]
pub trait Detector: Send + Sync {
    /// Start a session
    async fn start_test(&self, request: &StartTestRequest) -> DetectorResult<StartTestResponse>;

    /// Judge one screenshot
    async fn submit_step(&self, request: &StepRequest) -> DetectorResult<StepResponse>;
}

/// Configuration for the HTTP detector client
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Base URL, without a trailing slash
    pub base_url: String,
    /// Whole-request timeout (seconds)
    pub timeout: u64,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            base_url: cfg.detector.base_url.clone(),
            timeout: cfg.detector.timeout,
            connect_timeout: cfg.detector.connect_timeout,
        }
    }
}

impl DetectorConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout = seconds;
        self
    }
}

/// JSON-over-HTTP detector client
#[derive(Debug, Clone)]
pub struct HttpDetector {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDetector {
    /// Build a client from configuration
    pub fn new(config: &DetectorConfig) -> DetectorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .build()?;
        Ok(Self::with_client(&config.base_url, client))
    }

    /// Use a preconfigured reqwest client
    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check whether the detector answers its root endpoint
    pub async fn check_health(&self) -> DetectorResult<bool> {
        let resp = self.client.get(format!("{}/", self.base_url)).send().await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;
        Ok(body["status"].as_str().map(|s| s == "healthy").unwrap_or(true))
    }

    /// List the test types the detector accepts
    pub async fn test_types(&self) -> DetectorResult<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/test-types", self.base_url))
            .send()
            .await?;
        let body: TestTypesResponse = decode(resp).await?;
        Ok(body.test_types)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> DetectorResult<R>
    where
        B: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "detector request");
        let resp = self.client.post(&url).json(body).send().await?;
        decode(resp).await
    }
}

async fn decode<R: serde::de::DeserializeOwned>(resp: reqwest::Response) -> DetectorResult<R> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(DetectorError::Api {
            status: status.as_u16(),
            detail: error_detail(&body),
        });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| DetectorError::InvalidResponse(e.to_string()))
}

/// Prefer the `detail` field of a JSON error body
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").map(|d| match d {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl Detector for HttpDetector {
    async fn start_test(&self, request: &StartTestRequest) -> DetectorResult<StartTestResponse> {
        self.post("/run-test", request).await
    }

    async fn submit_step(&self, request: &StepRequest) -> DetectorResult<StepResponse> {
        debug!(
            class_id = request.class_id,
            screenshot_len = request.screenshot.len(),
            clicked = request.action_result.clicked,
            "submitting step"
        );
        self.post("/run-test-step", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_step_response_decodes_full_payload() {
        let json = r#"{
            "step_result": {
                "class_id": 0,
                "passed": true,
                "detection": {
                    "confidence": 0.9,
                    "click_x": 100.0,
                    "click_y": 50.0,
                    "bounding_box": {"x1": 90.0, "y1": 40.0, "x2": 110.0, "y2": 60.0}
                }
            },
            "next_step": {"class_id": 1},
            "status": "continue"
        }"#;
        let resp: StepResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, StepStatus::Continue);
        assert_eq!(resp.next_class_id(), Some(1));
        let detection = resp.step_result.detection.unwrap();
        assert_eq!(detection.click_point(), Some(Coordinates::new(100.0, 50.0)));
        assert!(resp.plan.is_empty());
    }

    #[test]
    fn test_detection_without_click_point() {
        let json = r#"{"confidence": 0.0, "click_x": null, "click_y": null, "bounding_box": null}"#;
        let detection: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(detection.click_point(), None);
    }

    #[test]
    fn test_start_request_uses_camel_case() {
        let req = StartTestRequest {
            game_url: "https://example.com".to_string(),
            test_type: "Regression".to_string(),
            additional_params: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"gameUrl": "https://example.com", "testType": "Regression"})
        );
    }

    #[test]
    fn test_encode_data_uri() {
        let uri = encode_data_uri(&[0x89, b'P', b'N', b'G']);
        assert_eq!(uri, "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_error_detail_prefers_detail_field() {
        assert_eq!(error_detail(r#"{"detail": "Invalid test type"}"#), "Invalid test type");
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_detector_config_builder() {
        let config = DetectorConfig::new("http://localhost:7000")
            .timeout(30)
            .connect_timeout(2);
        assert_eq!(config.base_url, "http://localhost:7000");
        assert_eq!(config.timeout, 30);
        assert_eq!(config.connect_timeout, 2);
    }
}
