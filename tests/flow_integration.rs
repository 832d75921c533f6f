//! End-to-end flow tests against the mock window and a scripted detector

mod common;

use std::sync::{Arc, Mutex};

use common::{ScriptedDetector, complete, step, with_detection, with_next_coordinates};
use game_qa::detector::{ActionResult, StepResult};
use game_qa::flow::{FlowController, FlowError, FlowStatus, PlanAction, RunParams, StepUpdate};
use game_qa::runner::RunReport;
use game_qa::session::Session;
use game_qa::window::{ClickVia, MockProbe, MockWindow};
use pretty_assertions::assert_eq;

fn params() -> RunParams {
    RunParams::new("https://example.com", "Regression")
}

fn setup(detector: ScriptedDetector) -> (FlowController, Arc<ScriptedDetector>, MockProbe) {
    let detector = Arc::new(detector);
    let window = MockWindow::new(640, 360);
    let probe = window.probe();
    let controller = FlowController::new(detector.clone(), Box::new(window));
    (controller, detector, probe)
}

#[tokio::test]
async fn test_scenario_a_passed_step_clicks_and_advances() {
    let (mut ctl, detector, probe) = setup(ScriptedDetector::new(
        Some(0),
        vec![
            with_detection(step(true, 1), 100.0, 50.0),
            complete(false, None),
        ],
    ));

    ctl.run(params(), |_| {}).await.unwrap();

    let starts = detector.starts();
    assert_eq!(starts[0].game_url, "https://example.com");
    assert_eq!(starts[0].test_type, "Regression");

    let clicks = probe.clicks();
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0].class_id, Some(0));
    assert_eq!((clicks[0].x, clicks[0].y), (100.0, 50.0));
    assert_eq!(clicks[0].via, ClickVia::Canvas);

    assert_eq!(detector.requested_classes(), vec![0, 1]);
    assert_eq!(ctl.current_class_id(), Some(1));
}

#[tokio::test]
async fn test_scenario_b_failed_step_advances_without_click() {
    let (mut ctl, detector, probe) = setup(ScriptedDetector::new(
        Some(0),
        vec![
            with_detection(step(false, 1), 100.0, 50.0),
            complete(false, None),
        ],
    ));

    ctl.run(params(), |_| {}).await.unwrap();

    assert!(probe.clicks().is_empty());
    assert_eq!(detector.requested_classes(), vec![0, 1]);
    let requests = detector.requests();
    assert_eq!(requests[1].action_result, ActionResult { clicked: false });
}

#[tokio::test]
async fn test_scenario_c_completion_returns_summary() {
    let (mut ctl, _detector, _probe) = setup(ScriptedDetector::new(
        Some(0),
        vec![
            step(true, 1),
            complete(true, Some(serde_json::json!({"status": "success"}))),
        ],
    ));

    let summary = ctl.run(params(), |_| {}).await.unwrap();

    assert_eq!(summary.test_id, "t1");
    assert_eq!(summary.final_result, Some(serde_json::json!({"status": "success"})));
    assert_eq!(summary.history.len(), 2);
    assert_eq!(ctl.status(), FlowStatus::Complete);
    assert_eq!(ctl.final_result().unwrap().status, FlowStatus::Complete);
}

#[tokio::test]
async fn test_scenario_d_retry_of_unexecuted_step() {
    let (mut ctl, _detector, _probe) =
        setup(ScriptedDetector::new(Some(0), vec![complete(true, None)]));
    ctl.run(params(), |_| {}).await.unwrap();
    let before = ctl.history().clone();

    let err = ctl.retry_step(5, |_| {}).await.unwrap_err();

    assert!(matches!(err, FlowError::RetryOfUnexecutedStep { class_id: 5 }));
    assert_eq!(ctl.history(), &before);
}

#[tokio::test]
async fn test_scenario_e_missing_initial_class_id() {
    let (mut ctl, detector, _probe) = setup(ScriptedDetector::new(None, vec![]));

    let err = ctl.run(params(), |_| {}).await.unwrap_err();

    match err {
        FlowError::ProtocolViolation(msg) => assert!(msg.contains("next class_id")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctl.status(), FlowStatus::Errored);
    let result = ctl.final_result().unwrap();
    assert_eq!(result.status, FlowStatus::Errored);
    assert!(result.error.is_some());
    assert!(detector.requests().is_empty());
}

#[tokio::test]
async fn test_history_is_append_only() {
    let (mut ctl, _detector, probe) = setup(ScriptedDetector::new(
        Some(0),
        vec![
            step(true, 1),
            step(false, 2),
            complete(true, None),
            step(true, 9),
            step(false, 9),
        ],
    ));

    let seen: Arc<Mutex<Vec<StepResult>>> = Arc::default();
    let sink = Arc::clone(&seen);
    ctl.run(params(), move |update: &StepUpdate| {
        sink.lock().unwrap().push(update.step_result.clone());
    })
    .await
    .unwrap();
    assert_eq!(ctl.history().len(), 3);
    assert_eq!(probe.captures(), 3);

    // Every retry takes its own screenshot
    ctl.retry_step(1, |_| {}).await.unwrap();
    assert_eq!(ctl.history().len(), 4);
    assert_eq!(probe.captures(), 4);
    ctl.retry_step(1, |_| {}).await.unwrap();
    assert_eq!(probe.captures(), 5);

    // Earlier entries are untouched by the retry
    let seen = seen.lock().unwrap();
    assert_eq!(&ctl.history().as_slice()[..3], seen.as_slice());
    assert_eq!(ctl.history().len(), 5);
    assert_eq!(ctl.history().last().unwrap().class_id, 1);
    assert!(!ctl.history().last().unwrap().passed);
    assert_eq!(ctl.status(), FlowStatus::Complete);
}

#[tokio::test]
async fn test_click_requires_pass_and_coordinates() {
    let (mut ctl, _detector, probe) = setup(ScriptedDetector::new(
        Some(0),
        vec![
            // passed, nothing to click
            step(true, 1),
            // failed with coordinates
            with_detection(step(false, 2), 5.0, 5.0),
            // passed with coordinates
            with_detection(complete(true, None), 7.0, 8.0),
        ],
    ));

    ctl.run(params(), |_| {}).await.unwrap();

    let clicks = probe.clicks();
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0].class_id, Some(2));
    assert_eq!((clicks[0].x, clicks[0].y), (7.0, 8.0));
    assert_eq!(clicks[0].via, ClickVia::LowLevel);
}

#[tokio::test]
async fn test_override_beats_detector_coordinates() {
    let (mut ctl, _detector, probe) = setup(ScriptedDetector::new(
        Some(3),
        vec![
            with_next_coordinates(with_detection(step(true, 4), 10.0, 10.0), 20.0, 20.0),
            complete(false, None),
        ],
    ));

    ctl.run(params().override_click(3, 300.0, 200.0), |_| {})
        .await
        .unwrap();

    let clicks = probe.clicks();
    assert_eq!(clicks.len(), 1);
    assert_eq!((clicks[0].x, clicks[0].y), (300.0, 200.0));
    assert!(ctl.override_for(3).is_some());
}

#[tokio::test]
async fn test_handle_refuses_requests_outside_a_run() {
    let (mut ctl, _detector, probe) = setup(ScriptedDetector::new(
        Some(3),
        vec![with_detection(complete(true, None), 10.0, 10.0)],
    ));
    let handle = ctl.handle();

    // Nothing would drain these, so they fail instead of vanishing
    assert!(matches!(
        handle.override_click_coords(3, 77.0, 66.0),
        Err(FlowError::NotRunning)
    ));
    assert!(matches!(handle.cancel(), Err(FlowError::NotRunning)));

    ctl.run(params().override_click(3, 77.0, 66.0), |_| {})
        .await
        .unwrap();

    let clicks = probe.clicks();
    assert_eq!(clicks.len(), 1);
    assert_eq!((clicks[0].x, clicks[0].y), (77.0, 66.0));
    assert_eq!(ctl.status(), FlowStatus::Complete);
    assert!(matches!(
        handle.override_click_coords(3, 1.0, 1.0),
        Err(FlowError::NotRunning)
    ));
}

#[tokio::test]
async fn test_override_through_handle_mid_run() {
    let (mut ctl, _detector, probe) = setup(ScriptedDetector::new(
        Some(0),
        vec![step(false, 1), with_detection(complete(true, None), 1.0, 1.0)],
    ));
    let handle = ctl.handle();

    ctl.run(params(), |update| {
        if update.step_result.class_id == 0 {
            handle.override_click_coords(1, 42.0, 24.0).unwrap();
        }
    })
    .await
    .unwrap();

    let clicks = probe.clicks();
    assert_eq!(clicks.len(), 1);
    assert_eq!((clicks[0].x, clicks[0].y), (42.0, 24.0));
}

#[tokio::test]
async fn test_cancel_is_observed_at_next_boundary() {
    let detector = ScriptedDetector::new(Some(0), vec![step(true, 1), step(true, 2), step(true, 3)]);
    let (mut ctl, _, _probe) = setup(detector);
    let handle = ctl.handle();

    let mut updates = 0;
    let err = ctl
        .run(params(), |_| {
            updates += 1;
            if updates == 2 {
                handle.cancel().unwrap();
                handle.cancel().unwrap();
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Cancelled));
    // Step 2 finished; step 3 never started
    assert_eq!(updates, 2);
    assert_eq!(ctl.history().len(), 2);
    assert_eq!(ctl.status(), FlowStatus::Cancelled);
    assert_eq!(ctl.final_result().unwrap().status, FlowStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_during_step_does_not_abort_it() {
    let handle_slot: Arc<Mutex<Option<game_qa::flow::FlowHandle>>> = Arc::default();
    let slot = Arc::clone(&handle_slot);
    let detector = ScriptedDetector::new(
        Some(0),
        vec![with_detection(step(true, 1), 9.0, 9.0), step(true, 2)],
    )
    .on_submit(move |n| {
        if n == 1 {
            if let Some(handle) = slot.lock().unwrap().as_ref() {
                handle.cancel().unwrap();
            }
        }
    });
    let (mut ctl, detector, probe) = setup(detector);
    *handle_slot.lock().unwrap() = Some(ctl.handle());

    let err = ctl.run(params(), |_| {}).await.unwrap_err();

    assert!(matches!(err, FlowError::Cancelled));
    assert_eq!(detector.requests().len(), 1);
    assert_eq!(ctl.history().len(), 1);
    // The in-flight step still clicked
    assert_eq!(probe.clicks().len(), 1);
}

#[tokio::test]
async fn test_retry_through_handle_during_run() {
    let (mut ctl, detector, _probe) = setup(ScriptedDetector::new(
        Some(0),
        vec![step(false, 1), step(true, 9), complete(true, None)],
    ));
    let handle = ctl.handle();

    let mut updates = Vec::new();
    let retry = async {
        while !handle.is_running() {
            tokio::task::yield_now().await;
        }
        handle.retry_step(0).await
    };
    let run = ctl.run(params(), |u| updates.push(u.step_result.class_id));
    let (run_result, retry_result) = tokio::join!(run, retry);

    run_result.unwrap();
    let retried = retry_result.unwrap();
    assert!(retried.step_result.passed);
    assert_eq!(detector.requested_classes(), vec![0, 0, 1]);
    assert_eq!(updates, vec![0, 0, 1]);
    // Retry did not move the flow
    assert_eq!(ctl.current_class_id(), Some(1));
}

#[tokio::test]
async fn test_retry_after_run_is_rejected_through_handle() {
    let (mut ctl, _detector, _probe) =
        setup(ScriptedDetector::new(Some(0), vec![complete(true, None)]));
    let handle = ctl.handle();
    ctl.run(params(), |_| {}).await.unwrap();

    assert!(matches!(
        handle.retry_step(0).await,
        Err(FlowError::NotRunning)
    ));
}

#[tokio::test]
async fn test_detector_failure_errors_the_run() {
    // Script runs out after the first step
    let (mut ctl, _detector, _probe) = setup(ScriptedDetector::new(Some(0), vec![step(true, 1)]));

    let err = ctl.run(params(), |_| {}).await.unwrap_err();

    assert!(matches!(err, FlowError::DetectionRequest(_)));
    assert_eq!(ctl.status(), FlowStatus::Errored);
    assert_eq!(ctl.history().len(), 1);
    assert!(ctl.final_result().unwrap().error.is_some());
}

#[tokio::test]
async fn test_capture_failure_errors_the_run() {
    let (mut ctl, _detector, probe) =
        setup(ScriptedDetector::new(Some(0), vec![complete(true, None)]));
    probe.set_fail_capture(true);

    let err = ctl.run(params(), |_| {}).await.unwrap_err();

    assert!(matches!(err, FlowError::CaptureUnavailable(_)));
    assert!(ctl.history().is_empty());
}

#[tokio::test]
async fn test_final_result_only_in_terminal_states() {
    let (mut ctl, _detector, _probe) =
        setup(ScriptedDetector::new(Some(0), vec![complete(true, None)]));
    assert_eq!(ctl.status(), FlowStatus::Idle);
    assert!(ctl.final_result().is_none());

    ctl.run(params(), |_| {}).await.unwrap();
    assert!(ctl.status().is_terminal());
    assert!(ctl.final_result().is_some());

    ctl.reset();
    assert_eq!(ctl.status(), FlowStatus::Idle);
    assert!(ctl.final_result().is_none());
}

#[tokio::test]
async fn test_window_reopened_after_external_close() {
    let (mut ctl, _detector, probe) = setup(ScriptedDetector::new(
        Some(0),
        vec![complete(true, None), complete(true, None)],
    ));

    ctl.run(params(), |_| {}).await.unwrap();
    probe.close_externally();
    ctl.run(params(), |_| {}).await.unwrap();

    assert!(probe.is_open());
    assert_eq!(probe.urls().len(), 2);
    assert_eq!(probe.captures(), 2);
}

#[tokio::test]
async fn test_plan_runs_only_for_passed_steps() {
    let mut passed = with_detection(step(true, 1), 10.0, 10.0);
    passed.plan = vec![
        PlanAction::Wait { ms: 1 },
        PlanAction::ClickInDom {
            x: 50.0,
            y: 60.0,
            fallback_selector: None,
        },
    ];
    let mut failed = complete(false, None);
    failed.plan = vec![PlanAction::Click {
        x: 1.0,
        y: 1.0,
        class_id: None,
    }];
    let (mut ctl, _detector, probe) = setup(ScriptedDetector::new(Some(0), vec![passed, failed]));

    ctl.run(params(), |_| {}).await.unwrap();

    let clicks = probe.clicks();
    assert_eq!(clicks.len(), 2);
    assert_eq!(clicks[0].via, ClickVia::Canvas);
    assert_eq!(clicks[1].via, ClickVia::InDom);
    assert_eq!((clicks[1].x, clicks[1].y), (50.0, 60.0));
}

#[tokio::test]
async fn test_artifacts_and_report() {
    let tmp = tempfile::tempdir().unwrap();
    let session = Session::in_dir(tmp.path().join("run"));
    let detector = Arc::new(ScriptedDetector::new(
        Some(0),
        vec![step(false, 1), complete(true, Some(serde_json::json!({"score": 1})))],
    ));
    let mut ctl = FlowController::new(detector, Box::new(MockWindow::new(200, 100)))
        .with_artifacts(session);

    let summary = ctl.run(params(), |_| {}).await.unwrap();
    let path = ctl.artifacts().unwrap().write_summary(&summary).unwrap();
    assert!(path.ends_with("summary.json"));

    let report = RunReport::from_controller(&ctl);
    assert!(report.success);
    assert_eq!(report.test_id.as_deref(), Some("t1"));
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.passed_count(), 1);
    assert_eq!(report.failed_classes, vec![0]);
    assert!(report.steps.iter().all(|s| s.screenshot_path.is_some()));
    assert_eq!(ctl.artifacts().unwrap().list_captures().unwrap().len(), 2);
}
