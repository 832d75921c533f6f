//! Session lifecycle and the step loop.
//!
//! ```text
//! Idle ──run──▶ Running ──▶ Complete | Cancelled | Errored
//!   ▲                                  │
//!   └──────────────── reset ───────────┘
//! ```

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::{FlowError, FlowResult};
use super::executor::StepExecutor;
use super::inbox::{FlowHandle, Inbox, Intervention};
use super::model::{
    FinalResult, FlowState, FlowStatus, History, RunParams, SessionSummary, StepUpdate,
    TestSession,
};
use crate::detector::{ClassId, Coordinates, Detector, StartTestRequest, StepResponse, StepStatus};
use crate::session::Session;
use crate::window::WindowHost;

/// Drives one test session at a time against a detector and a window
pub struct FlowController {
    detector: Arc<dyn Detector>,
    window: Box<dyn WindowHost>,
    artifacts: Option<Session>,
    state: FlowState,
    inbox: Inbox,
}

impl FlowController {
    pub fn new(detector: Arc<dyn Detector>, window: Box<dyn WindowHost>) -> Self {
        Self {
            detector,
            window,
            artifacts: None,
            state: FlowState::default(),
            inbox: Inbox::new(),
        }
    }

    /// Save step screenshots into `session`
    pub fn with_artifacts(mut self, session: Session) -> Self {
        self.artifacts = Some(session);
        self
    }

    /// Sender for interventions while [`run`](Self::run) holds the controller
    pub fn handle(&self) -> FlowHandle {
        self.inbox.handle()
    }

    /// Run a whole flow: open the window, start a session, then step until
    /// the detector reports completion or a cancel is observed.
    ///
    /// The status stays `Idle` while the window is acquired and becomes
    /// `Running` once the detector has issued a test id.
    ///
    /// `on_update` sees every step, including retries requested through a
    /// [`FlowHandle`] during the run.
    pub async fn run<F>(&mut self, params: RunParams, mut on_update: F) -> FlowResult<SessionSummary>
    where
        F: FnMut(&StepUpdate),
    {
        self.reset();
        for (class_id, point) in &params.overrides {
            self.override_click_coords(*class_id, point.x, point.y);
        }
        self.inbox.open();

        let result = self.drive(&params, &mut on_update).await;

        let dropped = self.inbox.close();
        if dropped > 0 {
            debug!(dropped, "discarded interventions left after the run");
        }

        match result {
            Ok(summary) => Ok(summary),
            Err(FlowError::Cancelled) => {
                info!(steps = self.state.history.len(), "test cancelled");
                self.state.finish(FinalResult::cancelled());
                Err(FlowError::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "test errored");
                self.state.finish(FinalResult::errored(&e));
                Err(e)
            }
        }
    }

    async fn drive<F>(&mut self, params: &RunParams, on_update: &mut F) -> FlowResult<SessionSummary>
    where
        F: FnMut(&StepUpdate),
    {
        let opened = self.window.open_or_reuse(&params.game_url).await?;
        debug!(reused = opened.reused, source = self.window.source_type(), "window acquired");

        let start = self
            .detector
            .start_test(&StartTestRequest {
                game_url: params.game_url.clone(),
                test_type: params.test_type.clone(),
                additional_params: params.additional_params.clone(),
            })
            .await?;
        info!(test_id = %start.test_id, test_type = %params.test_type, "test started");

        self.state.session = Some(TestSession {
            test_id: start.test_id.clone(),
            game_url: params.game_url.clone(),
            test_type: params.test_type.clone(),
        });
        self.state.status = FlowStatus::Running;
        if let Some(session) = &self.artifacts {
            if let Err(e) = session.init() {
                warn!(dir = %session.dir.display(), error = %e, "failed to create artifact dir");
            }
        }

        let first = start
            .next_step
            .as_ref()
            .and_then(|n| n.class_id)
            .ok_or_else(|| {
                FlowError::ProtocolViolation("backend did not provide next class_id".to_string())
            })?;
        self.state.current_class_id = Some(first);

        loop {
            self.apply_interventions(on_update).await;
            if self.state.cancel_requested {
                return Err(FlowError::Cancelled);
            }

            let class_id = self.state.current_class_id.ok_or_else(|| {
                FlowError::ProtocolViolation("no class_id to execute".to_string())
            })?;
            let response = self.execute(class_id).await?;
            on_update(&StepUpdate::from(&response));

            if response.status == StepStatus::Complete {
                info!(steps = self.state.history.len(), "test complete");
                self.state
                    .finish(FinalResult::complete(response.final_result.clone()));
                return self.summary().ok_or(FlowError::SessionNotStarted);
            }

            self.state.current_class_id = response.next_class_id();
            if self.state.current_class_id.is_none() {
                return Err(FlowError::ProtocolViolation(
                    "flow terminated unexpectedly without completion".to_string(),
                ));
            }
        }
    }

    async fn apply_interventions<F>(&mut self, on_update: &mut F)
    where
        F: FnMut(&StepUpdate),
    {
        for intervention in self.inbox.drain() {
            match intervention {
                Intervention::Cancel => {
                    debug!("cancel requested");
                    self.state.cancel_requested = true;
                }
                Intervention::Override { class_id, coords } => {
                    self.override_click_coords(class_id, coords.x, coords.y);
                }
                Intervention::Retry { class_id, reply } => {
                    let result = self.retry_step(class_id, &mut *on_update).await;
                    if reply.send(result).is_err() {
                        debug!(class_id, "retry requester went away");
                    }
                }
            }
        }
    }

    async fn execute(&mut self, class_id: ClassId) -> FlowResult<StepResponse> {
        StepExecutor::new(&*self.detector, &mut *self.window)
            .with_artifacts(self.artifacts.as_ref())
            .perform_step(&mut self.state, class_id)
            .await
    }

    /// Re-run a class id that has already been attempted.
    ///
    /// Appends a new history entry; `current_class_id` and any terminal
    /// status are left alone.
    pub async fn retry_step<F>(&mut self, class_id: ClassId, mut on_update: F) -> FlowResult<StepResponse>
    where
        F: FnMut(&StepUpdate),
    {
        if self.state.session.is_none() {
            return Err(FlowError::SessionNotStarted);
        }
        if !self.state.history.contains_class(class_id) {
            return Err(FlowError::RetryOfUnexecutedStep { class_id });
        }
        info!(class_id, "retrying step");
        let response = self.execute(class_id).await?;
        on_update(&StepUpdate::from(&response));
        Ok(response)
    }

    /// Click at `(x, y)` whenever `class_id` passes from now on
    pub fn override_click_coords(&mut self, class_id: ClassId, x: f64, y: f64) {
        info!(class_id, x, y, "click override registered");
        self.state
            .override_coordinates
            .insert(class_id, Coordinates::new(x, y));
    }

    /// Stop before the next step; idempotent
    pub fn cancel(&mut self) {
        self.state.cancel_requested = true;
    }

    /// Forget the session and return to `Idle`. The window stays open.
    pub fn reset(&mut self) {
        self.state = FlowState::default();
        self.inbox.close();
    }

    /// Release the window
    pub async fn close(&mut self) -> FlowResult<()> {
        self.window.close().await?;
        Ok(())
    }

    pub fn status(&self) -> FlowStatus {
        self.state.status
    }

    pub fn current_class_id(&self) -> Option<ClassId> {
        self.state.current_class_id
    }

    pub fn history(&self) -> &History {
        &self.state.history
    }

    pub fn final_result(&self) -> Option<&FinalResult> {
        self.state.final_result.as_ref()
    }

    pub fn session(&self) -> Option<&TestSession> {
        self.state.session.as_ref()
    }

    pub fn last_response(&self, class_id: ClassId) -> Option<&StepResponse> {
        self.state.last_step_response_by_class_id.get(&class_id)
    }

    pub fn override_for(&self, class_id: ClassId) -> Option<Coordinates> {
        self.state.override_coordinates.get(&class_id).copied()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.state.cancel_requested
    }

    pub fn artifacts(&self) -> Option<&Session> {
        self.artifacts.as_ref()
    }

    /// Snapshot of the current session, if one was started
    pub fn summary(&self) -> Option<SessionSummary> {
        let session = self.state.session.as_ref()?;
        Some(SessionSummary {
            test_id: session.test_id.clone(),
            final_result: self
                .state
                .final_result
                .as_ref()
                .and_then(|r| r.payload.clone()),
            history: self.state.history.to_vec(),
        })
    }
}
