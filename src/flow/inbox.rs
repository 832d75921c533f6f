//! Interventions delivered to a running flow.
//!
//! A [`FlowHandle`] can be cloned freely and used from other tasks (a signal
//! handler, a UI) while [`FlowController::run`](super::FlowController::run)
//! holds the controller. The loop drains pending interventions once per
//! iteration boundary, before starting the next step.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

use super::error::{FlowError, FlowResult};
use crate::detector::{ClassId, Coordinates, StepResponse};

/// A request for the running loop
#[derive(Debug)]
pub enum Intervention {
    Cancel,
    Override {
        class_id: ClassId,
        coords: Coordinates,
    },
    Retry {
        class_id: ClassId,
        reply: oneshot::Sender<FlowResult<StepResponse>>,
    },
}

impl Intervention {
    /// Answer a retry that will never run; other kinds are simply dropped
    pub(crate) fn reject(self, error: FlowError) {
        if let Intervention::Retry { reply, .. } = self {
            let _ = reply.send(Err(error));
        }
    }
}

/// Whether a run is draining the inbox.
///
/// Senders hold the lock across the check and the send, and the run holds it
/// while it stops and empties the queue, so nothing is enqueued after the
/// final drain.
type RunningFlag = Arc<Mutex<bool>>;

fn lock(flag: &RunningFlag) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Receiving side, owned by the controller
#[derive(Debug)]
pub(crate) struct Inbox {
    tx: mpsc::UnboundedSender<Intervention>,
    rx: mpsc::UnboundedReceiver<Intervention>,
    running: RunningFlag,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            running: Arc::new(Mutex::new(false)),
        }
    }

    pub(crate) fn handle(&self) -> FlowHandle {
        FlowHandle {
            tx: self.tx.clone(),
            running: Arc::clone(&self.running),
        }
    }

    /// Start accepting interventions
    pub(crate) fn open(&self) {
        *lock(&self.running) = true;
    }

    /// Stop accepting interventions and reject whatever is still queued.
    ///
    /// Returns how many were dropped.
    pub(crate) fn close(&mut self) -> usize {
        let mut running = lock(&self.running);
        *running = false;
        let mut count = 0;
        while let Ok(item) = self.rx.try_recv() {
            item.reject(FlowError::NotRunning);
            count += 1;
        }
        count
    }

    /// Everything queued right now, in arrival order
    pub(crate) fn drain(&mut self) -> Vec<Intervention> {
        let mut pending = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            pending.push(item);
        }
        pending
    }
}

/// Cloneable sender for cancel, override and retry requests.
///
/// Every request fails with [`FlowError::NotRunning`] unless a run is
/// draining the inbox; use [`RunParams::override_click`](super::RunParams::override_click)
/// for overrides that must be in place before the first step.
#[derive(Debug, Clone)]
pub struct FlowHandle {
    tx: mpsc::UnboundedSender<Intervention>,
    running: RunningFlag,
}

impl FlowHandle {
    /// Whether a run is currently draining this handle's inbox
    pub fn is_running(&self) -> bool {
        *lock(&self.running)
    }

    /// Ask the loop to stop before its next step
    pub fn cancel(&self) -> FlowResult<()> {
        self.send(Intervention::Cancel)
    }

    /// Register manual click coordinates for `class_id`
    pub fn override_click_coords(&self, class_id: ClassId, x: f64, y: f64) -> FlowResult<()> {
        self.send(Intervention::Override {
            class_id,
            coords: Coordinates::new(x, y),
        })
    }

    /// Re-run `class_id` at the next iteration boundary and wait for its response
    pub async fn retry_step(&self, class_id: ClassId) -> FlowResult<StepResponse> {
        let (reply, rx) = oneshot::channel();
        self.send(Intervention::Retry { class_id, reply })?;
        rx.await.map_err(|_| FlowError::InterventionDropped)?
    }

    fn send(&self, intervention: Intervention) -> FlowResult<()> {
        let running = lock(&self.running);
        if !*running {
            return Err(FlowError::NotRunning);
        }
        self.tx
            .send(intervention)
            .map_err(|_| FlowError::InterventionDropped)
    }
}
