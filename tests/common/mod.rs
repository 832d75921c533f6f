//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use game_qa::detector::{
    ClassId, Coordinates, Detection, Detector, DetectorError, DetectorResult, NextStep,
    StartTestRequest, StartTestResponse, StepRequest, StepResponse, StepResult, StepStatus,
};
use std::collections::VecDeque;
use std::sync::Mutex;

type SubmitHook = Box<dyn Fn(usize) + Send + Sync>;

/// Detector that replays a fixed script and records every request
pub struct ScriptedDetector {
    first_class: Option<ClassId>,
    steps: Mutex<VecDeque<StepResponse>>,
    starts: Mutex<Vec<StartTestRequest>>,
    requests: Mutex<Vec<StepRequest>>,
    on_submit: Option<SubmitHook>,
}

impl ScriptedDetector {
    pub fn new(first_class: Option<ClassId>, steps: Vec<StepResponse>) -> Self {
        Self {
            first_class,
            steps: Mutex::new(steps.into()),
            starts: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            on_submit: None,
        }
    }

    /// Called with the 1-based submission number, before the response is returned
    pub fn on_submit(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_submit = Some(Box::new(hook));
        self
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested_classes(&self) -> Vec<ClassId> {
        self.requests().iter().map(|r| r.class_id).collect()
    }

    pub fn starts(&self) -> Vec<StartTestRequest> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn start_test(&self, request: &StartTestRequest) -> DetectorResult<StartTestResponse> {
        self.starts.lock().unwrap().push(request.clone());
        Ok(StartTestResponse {
            test_id: "t1".to_string(),
            next_step: Some(NextStep {
                class_id: self.first_class,
                coordinates: None,
            }),
            status: Some("started".to_string()),
            message: None,
            results: None,
        })
    }

    async fn submit_step(&self, request: &StepRequest) -> DetectorResult<StepResponse> {
        // Give concurrently polled futures a chance to run mid-step
        tokio::task::yield_now().await;

        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if let Some(hook) = &self.on_submit {
            hook(n);
        }

        let mut resp = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DetectorError::Api {
                status: 500,
                detail: "script exhausted".to_string(),
            })?;
        resp.step_result.class_id = request.class_id;
        Ok(resp)
    }
}

/// A `continue` response pointing at `next`
pub fn step(passed: bool, next: ClassId) -> StepResponse {
    StepResponse {
        step_result: StepResult {
            class_id: 0,
            passed,
            detection: None,
        },
        next_step: Some(NextStep {
            class_id: Some(next),
            coordinates: None,
        }),
        status: StepStatus::Continue,
        final_result: None,
        plan: Vec::new(),
    }
}

/// A `complete` response
pub fn complete(passed: bool, final_result: Option<serde_json::Value>) -> StepResponse {
    StepResponse {
        step_result: StepResult {
            class_id: 0,
            passed,
            detection: None,
        },
        next_step: None,
        status: StepStatus::Complete,
        final_result,
        plan: Vec::new(),
    }
}

pub fn with_detection(mut resp: StepResponse, x: f64, y: f64) -> StepResponse {
    resp.step_result.detection = Some(Detection {
        confidence: 0.9,
        click_x: Some(x),
        click_y: Some(y),
        bounding_box: None,
        class_name: None,
    });
    resp
}

pub fn with_next_coordinates(mut resp: StepResponse, x: f64, y: f64) -> StepResponse {
    let next = resp.next_step.get_or_insert_with(NextStep::default);
    next.coordinates = Some(Coordinates::new(x, y));
    resp
}
