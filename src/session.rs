//! Per-connection session: one engine, one request gate, one delivery task.
//!
//! DESIGN
//! ======
//! Each websocket connection gets its own selection state. The engine's
//! only subscriber is a `CommandOutbox`; the delivery task drains it into a
//! `FrameSink`, which turns overlay and viewport commands into outbound
//! frames on the connection's channel. The request gate pushes its state
//! the same way once a background eligibility check finishes.
//!
//! LIFECYCLE
//! =========
//! 1. `start` → engine + outbox + delivery task + gate
//! 2. Handlers call `engine()` / `gate()`; commands flow out asynchronously
//! 3. `close` drops the engine (closing the outbox) and waits for delivery

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::delivery::{CommandOutbox, OverlaySink, ViewportSink, spawn_delivery_task};
use crate::frame::Frame;
use crate::projection::BBox;
use crate::reaction::{OverlayUpdate, ReactionEngine, ViewportFit};
use crate::request::{CheckOutcome, EligibilityGate, GateSettings, PendingCheck};
use crate::state::AppState;

pub const SYSCALL_OVERLAY_UPDATE: &str = "overlay:update";
pub const SYSCALL_VIEWPORT_FIT: &str = "viewport:fit";
pub const SYSCALL_REQUEST_STATE: &str = "request:state";
pub const SYSCALL_REQUEST_NOTIFY: &str = "request:notify";

// =============================================================================
// FRAME SINK
// =============================================================================

/// Map sinks backed by the connection's outbound frame channel.
pub struct FrameSink {
    outbound: mpsc::Sender<Frame>,
}

impl FrameSink {
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Frame>) -> Self {
        Self { outbound }
    }

    async fn send(&self, frame: Frame) {
        push_frame(&self.outbound, frame).await;
    }
}

/// Queue a frame for the client. A closed channel means the socket is gone.
async fn push_frame(outbound: &mpsc::Sender<Frame>, frame: Frame) {
    let syscall = frame.syscall.clone();
    if outbound.send(frame).await.is_err() {
        debug!(%syscall, "session: outbound closed, frame dropped");
    }
}

#[async_trait]
impl OverlaySink for FrameSink {
    async fn update_overlay(&self, update: OverlayUpdate) {
        self.send(Frame::push(SYSCALL_OVERLAY_UPDATE, &update)).await;
    }
}

#[async_trait]
impl ViewportSink for FrameSink {
    async fn fit_bounds(&self, bbox: BBox, crs: &str) {
        let fit = ViewportFit { bbox, crs: crs.to_string() };
        self.send(Frame::push(SYSCALL_VIEWPORT_FIT, &fit)).await;
    }
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    engine: ReactionEngine,
    gate: EligibilityGate,
    outbound: mpsc::Sender<Frame>,
    delivery: JoinHandle<()>,
}

impl Session {
    /// Wire a fresh engine and gate to `outbound`.
    pub fn start(state: &AppState, outbound: mpsc::Sender<Frame>) -> Self {
        let mut engine = ReactionEngine::new(state.context.as_ref().clone());
        let (outbox, rx) = CommandOutbox::channel();
        engine.subscribe(move |command| outbox.push(command));

        let sink = Arc::new(FrameSink::new(outbound.clone()));
        let delivery = spawn_delivery_task(rx, engine.latest_generation(), sink.clone(), sink);
        let gate = EligibilityGate::new(GateSettings::from(&*state.config), Arc::clone(&state.eligibility));

        Self { engine, gate, outbound, delivery }
    }

    #[must_use]
    pub fn engine(&self) -> &ReactionEngine {
        &self.engine
    }

    #[must_use]
    pub fn gate(&self) -> &EligibilityGate {
        &self.gate
    }

    /// Run a started eligibility check in the background. When it settles,
    /// the gate state (and a notification on failure) is pushed to the client.
    pub fn spawn_check(&self, check: PendingCheck) -> JoinHandle<()> {
        let gate = self.gate.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            let outcome = check.run().await;
            if outcome == CheckOutcome::Superseded {
                return;
            }
            if let CheckOutcome::Failed(notification) = &outcome {
                push_frame(&outbound, Frame::push(SYSCALL_REQUEST_NOTIFY, notification)).await;
            }
            push_frame(&outbound, Frame::push(SYSCALL_REQUEST_STATE, &gate.snapshot())).await;
        })
    }

    /// Stop accepting commands and wait for queued ones to be delivered.
    pub async fn close(self) {
        let Self { engine, delivery, .. } = self;
        drop(engine);
        if let Err(e) = delivery.await {
            info!(error = %e, "session: delivery task ended abnormally");
        }
    }
}
