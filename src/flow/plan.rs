//! Declarative follow-up actions attached to a step response.
//!
//! The detector may describe extra work for a passed step as data; a fixed
//! interpreter here maps each action onto a window primitive. Nothing the
//! detector sends is evaluated as code.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::detector::ClassId;
use crate::window::{ClickOutcome, DomClickOptions, WindowHost, WindowResult};

/// Upper bound on a single `wait` action
pub const MAX_PLAN_WAIT: Duration = Duration::from_secs(60);

/// One follow-up action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
    /// Click routed by class id (the step's own class when omitted)
    Click {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class_id: Option<ClassId>,
    },
    /// Click through the in-page dispatcher
    ClickInDom {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback_selector: Option<String>,
    },
    /// Pause
    Wait { ms: u64 },
}

/// Run `plan` in order against `window`, stopping at the first failure.
///
/// Returns the outcome of each click action that ran.
pub async fn execute(
    plan: &[PlanAction],
    step_class_id: ClassId,
    window: &mut dyn WindowHost,
) -> WindowResult<Vec<ClickOutcome>> {
    let mut outcomes = Vec::new();
    for action in plan {
        debug!(?action, "plan action");
        match action {
            PlanAction::Click { x, y, class_id } => {
                let class_id = class_id.unwrap_or(step_class_id);
                outcomes.push(window.perform_click(class_id, *x, *y).await?);
            }
            PlanAction::ClickInDom {
                x,
                y,
                fallback_selector,
            } => {
                let options = DomClickOptions {
                    fallback_selector: fallback_selector.clone(),
                    ..Default::default()
                };
                outcomes.push(window.click_in_dom(*x, *y, &options).await?);
            }
            PlanAction::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms).min(MAX_PLAN_WAIT)).await;
            }
        }
    }
    Ok(outcomes)
}
