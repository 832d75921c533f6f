//! One capture, detect, click cycle.

use tracing::{debug, info, warn};

use super::error::{FlowError, FlowResult};
use super::model::FlowState;
use super::plan;
use crate::detector::{
    ActionResult, ClassId, Coordinates, Detector, StepRequest, StepResponse, encode_data_uri,
};
use crate::session::Session;
use crate::window::WindowHost;

/// Runs single steps against a detector and a window.
///
/// Borrowed for the duration of one step; the controller owns the pieces.
pub struct StepExecutor<'a> {
    detector: &'a dyn Detector,
    window: &'a mut dyn WindowHost,
    artifacts: Option<&'a Session>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(detector: &'a dyn Detector, window: &'a mut dyn WindowHost) -> Self {
        Self {
            detector,
            window,
            artifacts: None,
        }
    }

    /// Save each captured frame into `session`
    pub fn with_artifacts(mut self, session: Option<&'a Session>) -> Self {
        self.artifacts = session;
        self
    }

    /// Execute `class_id` once and record the result in `state`.
    ///
    /// History is only touched once the detector has answered. Click and plan
    /// failures after that point are logged and do not fail the step.
    pub async fn perform_step(
        &mut self,
        state: &mut FlowState,
        class_id: ClassId,
    ) -> FlowResult<StepResponse> {
        let test_id = state
            .session
            .as_ref()
            .map(|s| s.test_id.clone())
            .ok_or(FlowError::SessionNotStarted)?;

        let png = self
            .window
            .capture_screenshot()
            .await
            .map_err(|e| FlowError::CaptureUnavailable(e.to_string()))?;

        let action_result = ActionResult {
            clicked: state.history.last().map(|r| r.passed).unwrap_or(false),
        };
        let request = StepRequest {
            test_id,
            class_id,
            screenshot: encode_data_uri(&png),
            action_result,
        };
        debug!(class_id, png_bytes = png.len(), "captured step frame");

        let response = self.detector.submit_step(&request).await?;
        let passed = response.step_result.passed;

        state.history.push(response.step_result.clone());
        state
            .last_step_response_by_class_id
            .insert(class_id, response.clone());
        let step_no = state.history.len();
        info!(step = step_no, class_id, passed, status = ?response.status, "step judged");

        if let Some(session) = self.artifacts {
            if let Err(e) = session.write_step(step_no, class_id, &png) {
                warn!(error = %e, "failed to save step screenshot");
            }
        }

        if !passed {
            return Ok(response);
        }

        match resolve_click_point(state, class_id, &response) {
            Some(point) => {
                debug!(class_id, x = point.x, y = point.y, "clicking");
                match self.window.perform_click(class_id, point.x, point.y).await {
                    Ok(outcome) if !outcome.success => {
                        warn!(class_id, via = ?outcome.via, "click reported failure")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(class_id, error = %e, "click failed"),
                }
            }
            None => debug!(class_id, "passed without a click point"),
        }

        if !response.plan.is_empty() {
            if let Err(e) = plan::execute(&response.plan, class_id, &mut *self.window).await {
                warn!(class_id, error = %e, "plan action failed");
            }
        }

        Ok(response)
    }
}

/// Override, then the detector's next-step coordinates, then the detection centre
pub fn resolve_click_point(
    state: &FlowState,
    class_id: ClassId,
    response: &StepResponse,
) -> Option<Coordinates> {
    state
        .override_coordinates
        .get(&class_id)
        .copied()
        .or_else(|| response.next_step.as_ref().and_then(|n| n.coordinates))
        .or_else(|| {
            response
                .step_result
                .detection
                .as_ref()
                .and_then(|d| d.click_point())
        })
}
