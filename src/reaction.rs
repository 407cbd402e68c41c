//! Reaction engine: intents in, overlay/viewport commands out.
//!
//! DESIGN
//! ======
//! `dispatch` is the single entry point. Under the state write lock it
//! applies the intent to the current snapshot, projects the result, and
//! swaps the new snapshot in. The lock is released before subscribers are
//! called, so a slow subscriber never blocks readers.
//!
//! Every state-mutating intent produces exactly one `UpdateOverlay` with the
//! full feature list, tagged with a fresh overlay generation. Delivery drops
//! any overlay update whose generation is older than `latest_generation`
//! (switch-latest). `ZoomToResults` emits `FitBounds` then `UpdateOverlay`,
//! untagged, so both always reach the map in order.
//!
//! Subscribers must not call `dispatch` re-entrantly.

#[cfg(test)]
#[path = "reaction_test.rs"]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CadastreContext;
use crate::plots::{ParcelId, PlotRecord, StyleKind, StyleSet, StyleSpec};
use crate::projection::{self, BBox, FEATURE_CRS, RenderedFeature};
use crate::selection::SelectionStore;

// =============================================================================
// INTENTS
// =============================================================================

/// Everything the client can ask the engine to do.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Start a new search tab and make it current.
    AddTab,
    RemoveTab {
        index: usize,
    },
    /// Merge search results into a tab (the current one when `tab` is absent).
    AddPlots {
        #[serde(default)]
        tab: Option<usize>,
        plots: Vec<PlotRecord>,
    },
    RemovePlots {
        #[serde(default)]
        tab: Option<usize>,
        ids: Vec<ParcelId>,
    },
    SetActiveTab {
        index: usize,
    },
    RemoveSelection,
    SelectPlots {
        ids: Vec<ParcelId>,
    },
    DeselectPlots {
        ids: Vec<ParcelId>,
    },
    SetLayerStyle {
        kind: StyleKind,
        style: StyleSpec,
    },
    SetStyles {
        styles: StyleSet,
    },
    ZoomToResults,
}

impl Intent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddTab => "add_tab",
            Self::RemoveTab { .. } => "remove_tab",
            Self::AddPlots { .. } => "add_plots",
            Self::RemovePlots { .. } => "remove_plots",
            Self::SetActiveTab { .. } => "set_active_tab",
            Self::RemoveSelection => "remove_selection",
            Self::SelectPlots { .. } => "select_plots",
            Self::DeselectPlots { .. } => "deselect_plots",
            Self::SetLayerStyle { .. } => "set_layer_style",
            Self::SetStyles { .. } => "set_styles",
            Self::ZoomToResults => "zoom_to_results",
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Layer options: the configured base options plus the feature list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayOptions {
    #[serde(flatten)]
    pub base: serde_json::Map<String, serde_json::Value>,
    pub features: Vec<RenderedFeature>,
}

/// Full upsert of the overlay layer. Never a delta.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayUpdate {
    pub layer_id: String,
    pub owner: String,
    pub kind: String,
    pub options: OverlayOptions,
    /// Supersession tag; `None` for updates that must always be delivered.
    #[serde(skip)]
    pub generation: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewportFit {
    pub bbox: BBox,
    pub crs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    UpdateOverlay(OverlayUpdate),
    FitBounds(ViewportFit),
}

pub type Subscriber = Box<dyn Fn(&Command) + Send + Sync>;

// =============================================================================
// ENGINE STATE
// =============================================================================

/// Everything the overlay is derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub selection: SelectionStore,
    pub styles: StyleSet,
}

impl EngineState {
    /// Apply one state-mutating intent. `ZoomToResults` leaves state untouched.
    #[must_use]
    pub fn apply(&self, intent: Intent) -> Self {
        let selection = &self.selection;
        let active = selection.active_index();
        let (selection, styles) = match intent {
            Intent::AddTab => (selection.add_tab(), None),
            Intent::RemoveTab { index } => (selection.remove_tab(index), None),
            Intent::AddPlots { tab, plots } => (selection.add_plots(tab.unwrap_or(active), plots), None),
            Intent::RemovePlots { tab, ids } => (selection.remove_plots(tab.unwrap_or(active), &ids), None),
            Intent::SetActiveTab { index } => (selection.set_active_tab(index), None),
            Intent::RemoveSelection => (selection.remove_selection(), None),
            Intent::SelectPlots { ids } => (selection.select_plots(&ids), None),
            Intent::DeselectPlots { ids } => (selection.deselect_plots(&ids), None),
            Intent::SetLayerStyle { kind, style } => (selection.clone(), Some(self.styles.clone().with(kind, style))),
            Intent::SetStyles { styles } => (selection.clone(), Some(styles)),
            Intent::ZoomToResults => (selection.clone(), None),
        };
        Self { selection, styles: styles.unwrap_or_else(|| self.styles.clone()) }
    }

    /// Overlay features for the current tab.
    #[must_use]
    pub fn current_features(&self) -> Vec<RenderedFeature> {
        projection::project(self.selection.current_tab(), &self.styles)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct ReactionEngine {
    context: CadastreContext,
    state: RwLock<Arc<EngineState>>,
    subscribers: Vec<Subscriber>,
    overlay_generation: Arc<AtomicU64>,
}

impl ReactionEngine {
    #[must_use]
    pub fn new(context: CadastreContext) -> Self {
        let state = EngineState {
            selection: SelectionStore::new(context.max_tabs),
            styles: context.initial_styles.clone(),
        };
        Self {
            context,
            state: RwLock::new(Arc::new(state)),
            subscribers: Vec::new(),
            overlay_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a subscriber. Subscribers are called in registration order.
    pub fn subscribe(&mut self, subscriber: impl Fn(&Command) + Send + Sync + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// Shared handle on the newest overlay generation issued.
    #[must_use]
    pub fn latest_generation(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.overlay_generation)
    }

    /// Consistent view of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<EngineState> {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Apply an intent, notify subscribers, and return the emitted commands.
    pub fn dispatch(&self, intent: Intent) -> Vec<Command> {
        let name = intent.name();
        let commands = {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if matches!(intent, Intent::ZoomToResults) {
                self.zoom_commands(&guard)
            } else {
                let next = Arc::new(guard.apply(intent));
                let generation = self.overlay_generation.fetch_add(1, Ordering::SeqCst) + 1;
                let update = self.overlay_update(next.current_features(), Some(generation));
                *guard = next;
                vec![Command::UpdateOverlay(update)]
            }
        };

        debug!(intent = name, commands = commands.len(), "reaction: dispatched");
        for command in &commands {
            for subscriber in &self.subscribers {
                subscriber(command);
            }
        }
        commands
    }

    fn zoom_commands(&self, state: &EngineState) -> Vec<Command> {
        let features = projection::project_all(state.selection.tabs());
        if features.is_empty() {
            debug!("reaction: zoom skipped, no results");
            return Vec::new();
        }

        let mut commands = Vec::with_capacity(2);
        match projection::bounding_box(&features) {
            Some(bbox) => {
                info!(features = features.len(), ?bbox, "reaction: zoom to results");
                commands.push(Command::FitBounds(ViewportFit { bbox, crs: FEATURE_CRS.into() }));
            }
            None => debug!(features = features.len(), "reaction: results carry no coordinates"),
        }
        let rendered = projection::with_style(features, &state.styles.default);
        commands.push(Command::UpdateOverlay(self.overlay_update(rendered, None)));
        commands
    }

    fn overlay_update(&self, features: Vec<RenderedFeature>, generation: Option<u64>) -> OverlayUpdate {
        let target = &self.context.overlay;
        OverlayUpdate {
            layer_id: target.layer_id.clone(),
            owner: target.owner.clone(),
            kind: "overlay".into(),
            options: OverlayOptions { base: target.base_options.clone(), features },
            generation,
        }
    }
}
