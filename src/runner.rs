//! Report of a finished run, as printed by the CLI.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::detector::ClassId;
use crate::flow::{FlowController, FlowStatus};

/// One step attempt in a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based position in the history
    pub step: usize,

    pub class_id: ClassId,

    pub passed: bool,

    /// Detector confidence, when a detection was returned
    pub confidence: Option<f64>,

    /// Saved screenshot, when artifacts are enabled
    pub screenshot_path: Option<PathBuf>,
}

/// Result of a complete run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Whether the detector reported completion
    pub success: bool,

    pub status: FlowStatus,

    /// Detector-issued test id, if the session started
    pub test_id: Option<String>,

    /// Detector's final result payload
    pub final_result: Option<serde_json::Value>,

    /// Error message if the run did not complete
    pub error: Option<String>,

    /// Every attempt, retries included
    pub steps: Vec<StepRecord>,

    /// Class ids whose latest attempt failed
    pub failed_classes: Vec<ClassId>,

    /// Artifact directory
    pub session_dir: Option<PathBuf>,
}

impl RunReport {
    /// Snapshot the controller's current state
    pub fn from_controller(controller: &FlowController) -> Self {
        let artifacts = controller.artifacts();
        let steps = controller
            .history()
            .iter()
            .enumerate()
            .map(|(i, r)| StepRecord {
                step: i + 1,
                class_id: r.class_id,
                passed: r.passed,
                confidence: r.detection.as_ref().map(|d| d.confidence),
                screenshot_path: artifacts
                    .map(|s| s.step_path(i + 1, r.class_id))
                    .filter(|p| p.exists()),
            })
            .collect();

        let final_result = controller.final_result();
        Self {
            success: controller.status() == FlowStatus::Complete,
            status: controller.status(),
            test_id: controller.session().map(|s| s.test_id.clone()),
            final_result: final_result.and_then(|r| r.payload.clone()),
            error: final_result.and_then(|r| r.error.clone()),
            steps,
            failed_classes: controller.history().failed_classes(),
            session_dir: artifacts.map(|s| s.dir.clone()),
        }
    }

    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.passed).count()
    }
}
