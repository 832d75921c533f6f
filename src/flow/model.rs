//! Session, history and flow state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::detector::{ClassId, Coordinates, NextStep, StepResponse, StepResult, StepStatus};

/// Lifecycle of a flow controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
    #[default]
    Idle,
    Running,
    Cancelled,
    Errored,
    Complete,
}

impl FlowStatus {
    /// Complete, cancelled or errored
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FlowStatus::Complete | FlowStatus::Cancelled | FlowStatus::Errored
        )
    }
}

/// Inputs for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub game_url: String,
    pub test_type: String,
    /// Forwarded to the detector as `additionalParams`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_params: Option<serde_json::Value>,
    /// Click overrides registered after the run's implicit reset
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<ClassId, Coordinates>,
}

impl RunParams {
    pub fn new(game_url: impl Into<String>, test_type: impl Into<String>) -> Self {
        Self {
            game_url: game_url.into(),
            test_type: test_type.into(),
            additional_params: None,
            overrides: HashMap::new(),
        }
    }

    pub fn additional_params(mut self, params: serde_json::Value) -> Self {
        self.additional_params = Some(params);
        self
    }

    pub fn override_click(mut self, class_id: ClassId, x: f64, y: f64) -> Self {
        self.overrides.insert(class_id, Coordinates::new(x, y));
        self
    }
}

/// A detector-issued session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub test_id: String,
    pub game_url: String,
    pub test_type: String,
}

/// Every step attempt, in execution order.
///
/// Entries are never removed or edited; retries append.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct History(Vec<StepResult>);

impl History {
    pub fn push(&mut self, result: StepResult) {
        self.0.push(result);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&StepResult> {
        self.0.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StepResult> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[StepResult] {
        &self.0
    }

    /// Whether `class_id` was attempted at least once
    pub fn contains_class(&self, class_id: ClassId) -> bool {
        self.0.iter().any(|r| r.class_id == class_id)
    }

    /// Most recent attempt for `class_id`
    pub fn latest_for(&self, class_id: ClassId) -> Option<&StepResult> {
        self.0.iter().rev().find(|r| r.class_id == class_id)
    }

    /// Class ids whose latest attempt failed, in first-seen order
    pub fn failed_classes(&self) -> Vec<ClassId> {
        let mut seen = Vec::new();
        for r in &self.0 {
            if !seen.contains(&r.class_id) {
                seen.push(r.class_id);
            }
        }
        seen.into_iter()
            .filter(|c| self.latest_for(*c).map(|r| !r.passed).unwrap_or(false))
            .collect()
    }

    pub fn to_vec(&self) -> Vec<StepResult> {
        self.0.clone()
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a StepResult;
    type IntoIter = std::slice::Iter<'a, StepResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Terminal outcome of a run, set exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub status: FlowStatus,
    /// Detector's `final_result` on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FinalResult {
    pub fn complete(payload: Option<serde_json::Value>) -> Self {
        Self {
            status: FlowStatus::Complete,
            payload: Some(payload.unwrap_or_else(|| serde_json::json!({ "status": "complete" }))),
            error: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: FlowStatus::Cancelled,
            payload: None,
            error: Some("test was cancelled".to_string()),
        }
    }

    pub fn errored(error: impl std::fmt::Display) -> Self {
        Self {
            status: FlowStatus::Errored,
            payload: None,
            error: Some(error.to_string()),
        }
    }
}

/// Mutable state a controller owns for one session
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    pub status: FlowStatus,
    pub session: Option<TestSession>,
    pub current_class_id: Option<ClassId>,
    pub history: History,
    pub final_result: Option<FinalResult>,
    pub cancel_requested: bool,
    /// Manual click points; consulted before detector coordinates
    pub override_coordinates: HashMap<ClassId, Coordinates>,
    pub last_step_response_by_class_id: HashMap<ClassId, StepResponse>,
}

impl FlowState {
    /// Enter a terminal status, recording its result
    pub(crate) fn finish(&mut self, result: FinalResult) {
        self.status = result.status;
        self.final_result = Some(result);
    }
}

/// What a completed run returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub test_id: String,
    pub final_result: Option<serde_json::Value>,
    pub history: Vec<StepResult>,
}

/// Progress notification after each step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepUpdate {
    pub step_result: StepResult,
    pub next_step: Option<NextStep>,
    pub status: StepStatus,
}

impl From<&StepResponse> for StepUpdate {
    fn from(resp: &StepResponse) -> Self {
        Self {
            step_result: resp.step_result.clone(),
            next_step: resp.next_step.clone(),
            status: resp.status,
        }
    }
}
