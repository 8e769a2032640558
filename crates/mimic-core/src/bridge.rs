//! Single-slot bridge between an out-of-band capture event and an awaitable outcome.
//!
//! The platform capture UI reports its result through a callback that may fire
//! on any thread, at most once. The bridge owns a one-shot slot per request:
//! `Idle -> Pending (request_capture) -> Resolved (deliver) -> Idle (outcome consumed)`.
//! The first delivery wins; later ones are ignored. There is no timeout.

use crate::types::CaptureOutcome;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("a capture request is already pending")]
    CaptureInFlight,
}

/// Observable bridge state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Pending,
    Resolved,
}

enum Slot {
    Idle,
    Pending {
        id: u64,
        reply: oneshot::Sender<CaptureOutcome>,
    },
    Resolved {
        id: u64,
    },
}

struct Inner {
    slot: Slot,
    next_id: u64,
}

/// Clone-safe handle to the capture slot.
#[derive(Clone)]
pub struct CaptureCompletionBridge {
    inner: Arc<Mutex<Inner>>,
}

impl Default for CaptureCompletionBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureCompletionBridge {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::Idle,
                next_id: 1,
            })),
        }
    }

    pub fn state(&self) -> BridgeState {
        match self.inner.lock().slot {
            Slot::Idle => BridgeState::Idle,
            Slot::Pending { .. } => BridgeState::Pending,
            Slot::Resolved { .. } => BridgeState::Resolved,
        }
    }

    /// Open the slot for a new capture. Fails if a previous request has not
    /// been consumed yet.
    pub fn request_capture(&self) -> Result<PendingCapture, BridgeError> {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Idle) {
            return Err(BridgeError::CaptureInFlight);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let (reply, rx) = oneshot::channel();
        inner.slot = Slot::Pending { id, reply };
        tracing::debug!(request = id, "capture requested");

        Ok(PendingCapture {
            id,
            rx,
            bridge: self.clone(),
        })
    }

    /// Resolve whichever request is currently pending.
    ///
    /// Returns `false` (and drops the outcome) if nothing is pending.
    pub fn deliver(&self, outcome: CaptureOutcome) -> bool {
        let id = match self.inner.lock().slot {
            Slot::Pending { id, .. } => id,
            _ => {
                tracing::debug!("capture outcome delivered with no pending request; ignored");
                return false;
            }
        };
        self.complete(id, outcome)
    }

    fn complete(&self, id: u64, outcome: CaptureOutcome) -> bool {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.slot, Slot::Idle) {
            Slot::Pending { id: pending, reply } if pending == id => {
                inner.slot = Slot::Resolved { id };
                drop(inner);
                tracing::debug!(request = id, outcome = outcome_kind(&outcome), "capture resolved");
                // Receiver is only gone if the waiter was dropped; the slot is
                // released by that drop, so the outcome is simply discarded.
                let _ = reply.send(outcome);
                true
            }
            other => {
                inner.slot = other;
                tracing::debug!(request = id, "late or stale capture outcome ignored");
                false
            }
        }
    }

    fn release(&self, id: u64) {
        let mut inner = self.inner.lock();
        let owned = match inner.slot {
            Slot::Pending { id: current, .. } | Slot::Resolved { id: current } => current == id,
            Slot::Idle => false,
        };
        if owned {
            inner.slot = Slot::Idle;
        }
    }
}

fn outcome_kind(outcome: &CaptureOutcome) -> &'static str {
    match outcome {
        CaptureOutcome::Success { .. } => "success",
        CaptureOutcome::Cancelled => "cancelled",
        CaptureOutcome::Failed(_) => "failed",
    }
}

/// The caller's side of one capture request.
///
/// Dropping it (after awaiting the outcome or not) returns the bridge to idle.
pub struct PendingCapture {
    id: u64,
    rx: oneshot::Receiver<CaptureOutcome>,
    bridge: CaptureCompletionBridge,
}

impl PendingCapture {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Completion handle for the external capture collaborator, bound to
    /// this request only.
    pub fn completer(&self) -> CaptureCompleter {
        CaptureCompleter {
            id: self.id,
            bridge: self.bridge.clone(),
        }
    }

    /// Wait for the outcome. Never times out.
    pub async fn outcome(mut self) -> CaptureOutcome {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => CaptureOutcome::failed("capture bridge closed"),
        }
    }
}

impl Drop for PendingCapture {
    fn drop(&mut self) {
        self.bridge.release(self.id);
    }
}

/// Handed to the capture collaborator; resolves exactly one request.
#[derive(Clone)]
pub struct CaptureCompleter {
    id: u64,
    bridge: CaptureCompletionBridge,
}

impl CaptureCompleter {
    /// Try-set the outcome. Returns `true` only for the first delivery
    /// while the bound request is still pending.
    pub fn deliver(&self, outcome: CaptureOutcome) -> bool {
        self.bridge.complete(self.id, outcome)
    }

    pub fn request_id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for CaptureCompleter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCompleter").field("id", &self.id).finish()
    }
}
