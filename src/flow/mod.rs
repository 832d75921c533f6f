//! Stepwise test orchestration.
//!
//! A flow is the sequence of class ids the detector walks a game through.
//! [`FlowController`] owns one session at a time and loops
//! [`StepExecutor::perform_step`] until the detector reports completion;
//! [`FlowHandle`] lets other tasks cancel, override or retry mid-run.

pub mod controller;
pub mod error;
pub mod executor;
pub mod inbox;
pub mod model;
pub mod plan;

pub use controller::FlowController;
pub use error::{FlowError, FlowResult};
pub use executor::{StepExecutor, resolve_click_point};
pub use inbox::{FlowHandle, Intervention};
pub use model::{
    FinalResult, FlowState, FlowStatus, History, RunParams, SessionSummary, StepUpdate,
    TestSession,
};
pub use plan::PlanAction;
