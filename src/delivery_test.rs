use super::*;
use crate::config::{CadastreConfig, CadastreContext};
use crate::plots::{Feature, Geometry, GeometryValue, PlotRecord};
use crate::reaction::{Intent, ReactionEngine};
use std::sync::Mutex;
use tokio::time::{Duration, timeout};

#[derive(Default)]
struct RecordingOverlay {
    updates: Mutex<Vec<OverlayUpdate>>,
}

#[async_trait]
impl OverlaySink for RecordingOverlay {
    async fn update_overlay(&self, update: OverlayUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

#[derive(Default)]
struct RecordingViewport {
    fits: Mutex<Vec<(BBox, String)>>,
}

#[async_trait]
impl ViewportSink for RecordingViewport {
    async fn fit_bounds(&self, bbox: BBox, crs: &str) {
        self.fits.lock().unwrap().push((bbox, crs.to_string()));
    }
}

fn engine_with_outbox() -> (ReactionEngine, mpsc::UnboundedReceiver<Command>) {
    let mut engine = ReactionEngine::new(CadastreContext::from(&CadastreConfig::default()));
    let (outbox, rx) = CommandOutbox::channel();
    engine.subscribe(move |command| outbox.push(command));
    (engine, rx)
}

fn plot(id: &str, x: f64, y: f64) -> PlotRecord {
    PlotRecord::new(id, Feature::from(Geometry::new(GeometryValue::Point(vec![x, y]))))
}

async fn finish(handle: JoinHandle<()>) {
    timeout(Duration::from_millis(500), handle)
        .await
        .expect("delivery task did not exit")
        .expect("delivery task panicked");
}

#[tokio::test]
async fn superseded_overlay_updates_are_dropped() {
    let (engine, rx) = engine_with_outbox();
    engine.dispatch(Intent::AddTab);
    engine.dispatch(Intent::AddPlots { tab: None, plots: vec![plot("P1", 0.0, 0.0)] });
    engine.dispatch(Intent::SelectPlots { ids: vec!["P1".into()] });

    let overlay = Arc::new(RecordingOverlay::default());
    let viewport = Arc::new(RecordingViewport::default());
    let handle = spawn_delivery_task(rx, engine.latest_generation(), overlay.clone(), viewport.clone());
    drop(engine);
    finish(handle).await;

    let updates = overlay.updates.lock().unwrap();
    assert_eq!(updates.len(), 1, "only the newest full upsert should reach the map");
    assert_eq!(updates[0].generation, Some(3));
    assert_eq!(updates[0].options.features.len(), 1);
    assert!(viewport.fits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn zoom_commands_are_never_dropped() {
    let (engine, rx) = engine_with_outbox();
    engine.dispatch(Intent::AddTab);
    engine.dispatch(Intent::AddPlots { tab: None, plots: vec![plot("A", 1.0, 2.0), plot("B", 3.0, 4.0)] });
    engine.dispatch(Intent::ZoomToResults);
    engine.dispatch(Intent::RemoveSelection);

    let overlay = Arc::new(RecordingOverlay::default());
    let viewport = Arc::new(RecordingViewport::default());
    let handle = spawn_delivery_task(rx, engine.latest_generation(), overlay.clone(), viewport.clone());
    drop(engine);
    finish(handle).await;

    let fits = viewport.fits.lock().unwrap();
    assert_eq!(fits.len(), 1);
    assert_eq!(fits[0].0, BBox { min_x: 1.0, min_y: 2.0, max_x: 3.0, max_y: 4.0 });
    assert_eq!(fits[0].1, "EPSG:4326");

    let updates = overlay.updates.lock().unwrap();
    assert_eq!(updates.len(), 2);
    assert!(updates[0].generation.is_none(), "zoom overlay comes first");
    assert_eq!(updates[1].generation, Some(3));
}

#[tokio::test]
async fn updates_flow_through_while_task_is_running() {
    let (engine, rx) = engine_with_outbox();
    let overlay = Arc::new(RecordingOverlay::default());
    let viewport = Arc::new(RecordingViewport::default());
    let handle = spawn_delivery_task(rx, engine.latest_generation(), overlay.clone(), viewport.clone());

    engine.dispatch(Intent::AddTab);
    timeout(Duration::from_millis(500), async {
        while overlay.updates.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("overlay update not delivered");

    drop(engine);
    finish(handle).await;
    assert_eq!(overlay.updates.lock().unwrap().len(), 1);
}

#[test]
fn push_after_receiver_dropped_does_not_panic() {
    let (outbox, rx) = CommandOutbox::channel();
    drop(rx);
    let engine = ReactionEngine::new(CadastreContext::from(&CadastreConfig::default()));
    for command in engine.dispatch(Intent::AddTab) {
        outbox.push(&command);
    }
}
