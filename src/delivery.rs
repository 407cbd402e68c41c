//! Command delivery: engine commands out to the map sinks.
//!
//! DESIGN
//! ======
//! The engine's subscribers are synchronous, so the `CommandOutbox`
//! subscriber only enqueues. A background task drains the queue and calls
//! the async sinks in order.
//!
//! Before an overlay update is handed to the sink, its generation is
//! compared with the newest one the engine has issued. Anything older has
//! already been replaced by a later full upsert and is dropped. Untagged
//! updates (zoom) are always delivered.
//!
//! ERROR HANDLING
//! ==============
//! Sinks are fire-and-forget: they report nothing back. A closed outbox is
//! logged and ignored; the session is already shutting down.

#[cfg(test)]
#[path = "delivery_test.rs"]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::projection::BBox;
use crate::reaction::{Command, OverlayUpdate};

// =============================================================================
// SINKS
// =============================================================================

/// Host map overlay layer. `update_overlay` is a full, idempotent upsert.
#[async_trait]
pub trait OverlaySink: Send + Sync {
    async fn update_overlay(&self, update: OverlayUpdate);
}

/// Host map viewport.
#[async_trait]
pub trait ViewportSink: Send + Sync {
    async fn fit_bounds(&self, bbox: BBox, crs: &str);
}

// =============================================================================
// OUTBOX
// =============================================================================

/// Engine subscriber that queues commands for the delivery task.
#[derive(Clone)]
pub struct CommandOutbox {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandOutbox {
    /// Create an outbox and the receiver the delivery task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn push(&self, command: &Command) {
        if self.tx.send(command.clone()).is_err() {
            warn!("delivery: outbox closed, command dropped");
        }
    }
}

// =============================================================================
// DELIVERY TASK
// =============================================================================

/// Spawn the delivery task. It runs until every outbox is dropped.
pub fn spawn_delivery_task(
    mut rx: mpsc::UnboundedReceiver<Command>,
    latest_generation: Arc<AtomicU64>,
    overlay: Arc<dyn OverlaySink>,
    viewport: Arc<dyn ViewportSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                Command::UpdateOverlay(update) => {
                    if is_superseded(&update, &latest_generation) {
                        debug!(generation = ?update.generation, "delivery: superseded overlay update dropped");
                        continue;
                    }
                    overlay.update_overlay(update).await;
                }
                Command::FitBounds(fit) => viewport.fit_bounds(fit.bbox, &fit.crs).await,
            }
        }
        debug!("delivery: outbox closed, task exiting");
    })
}

fn is_superseded(update: &OverlayUpdate, latest_generation: &AtomicU64) -> bool {
    update
        .generation
        .is_some_and(|generation| generation < latest_generation.load(Ordering::SeqCst))
}
