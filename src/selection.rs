//! Selection store: per-tab plot results and selected parcel ids.
//!
//! DESIGN
//! ======
//! `SelectionStore` is an immutable snapshot. Every transition borrows the
//! current snapshot and returns a new one; tabs are `Arc`-shared so an
//! untouched tab is never copied (`Arc::make_mut` clones only the tab being
//! written). The reaction engine swaps snapshots atomically, so readers never
//! observe a half-applied transition.
//!
//! ERROR HANDLING
//! ==============
//! Transitions are total. Unknown tab indices and unknown parcel ids are
//! no-ops logged at `debug`, never errors.

#[cfg(test)]
#[path = "selection_test.rs"]
mod tests;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::plots::{Feature, ParcelId, PlotRecord};

// =============================================================================
// TAB
// =============================================================================

/// One search context: ordered results plus the selected subset.
///
/// Invariant: every id in `selected` names a record in `data`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tab {
    data: Vec<Arc<PlotRecord>>,
    selected: BTreeSet<ParcelId>,
}

static EMPTY_TAB: Tab = Tab { data: Vec::new(), selected: BTreeSet::new() };

impl Tab {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in insertion order.
    #[must_use]
    pub fn data(&self) -> &[Arc<PlotRecord>] {
        &self.data
    }

    #[must_use]
    pub fn selected(&self) -> &BTreeSet<ParcelId> {
        &self.selected
    }

    #[must_use]
    pub fn is_selected(&self, id: &ParcelId) -> bool {
        self.selected.contains(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ParcelId) -> bool {
        self.data.iter().any(|record| &record.parcelle == id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn known_ids(&self) -> HashSet<&ParcelId> {
        self.data.iter().map(|record| &record.parcelle).collect()
    }
}

// =============================================================================
// STORE SNAPSHOT
// =============================================================================

/// Immutable snapshot of every open tab and which one is current.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionStore {
    tabs: Vec<Arc<Tab>>,
    active: usize,
    /// Upper bound for lazily created tabs. `0` disables dynamic creation.
    max_tabs: usize,
}

impl SelectionStore {
    /// Empty store. `max_tabs = 0` means tabs are only created by `add_tab`.
    #[must_use]
    pub fn new(max_tabs: usize) -> Self {
        Self { tabs: Vec::new(), active: 0, max_tabs }
    }

    // -------------------------------------------------------------------------
    // selectors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn tabs(&self) -> &[Arc<Tab>] {
        &self.tabs
    }

    #[must_use]
    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    #[must_use]
    pub fn active_index(&self) -> usize {
        self.active
    }

    #[must_use]
    pub fn max_tabs(&self) -> usize {
        self.max_tabs
    }

    /// Current tab, or an empty tab when none exist.
    #[must_use]
    pub fn current_tab(&self) -> &Tab {
        self.tabs.get(self.active).map_or(&EMPTY_TAB, |tab| &**tab)
    }

    #[must_use]
    pub fn current_plot_data(&self) -> &[Arc<PlotRecord>] {
        self.current_tab().data()
    }

    #[must_use]
    pub fn selected_plot_ids(&self) -> &BTreeSet<ParcelId> {
        self.current_tab().selected()
    }

    /// Selected records of the current tab, in insertion order.
    #[must_use]
    pub fn selected_plots(&self) -> Vec<&PlotRecord> {
        let tab = self.current_tab();
        tab.data
            .iter()
            .filter(|record| tab.is_selected(&record.parcelle))
            .map(|record| &**record)
            .collect()
    }

    #[must_use]
    pub fn selected_features(&self) -> Vec<&Feature> {
        self.selected_plots()
            .into_iter()
            .map(|record| &record.feature)
            .collect()
    }

    /// Records of every tab, one slice per tab.
    #[must_use]
    pub fn plot_data(&self) -> Vec<&[Arc<PlotRecord>]> {
        self.tabs.iter().map(|tab| tab.data()).collect()
    }

    // -------------------------------------------------------------------------
    // transitions
    // -------------------------------------------------------------------------

    /// Append records to a tab. Ids already present (or repeated within the
    /// batch) are dropped; the first record with a given id wins.
    #[must_use]
    pub fn add_plots(&self, tab_index: usize, records: impl IntoIterator<Item = PlotRecord>) -> Self {
        let mut next = self.clone();
        let Some(slot) = next.tabs.get_mut(tab_index) else {
            debug!(tab_index, tabs = self.tabs.len(), "add_plots: no such tab");
            return next;
        };
        let tab = Arc::make_mut(slot);
        let mut known: HashSet<ParcelId> = tab.data.iter().map(|r| r.parcelle.clone()).collect();
        for record in records {
            if known.insert(record.parcelle.clone()) {
                tab.data.push(Arc::new(record));
            } else {
                debug!(parcelle = %record.parcelle, "add_plots: duplicate dropped");
            }
        }
        next
    }

    /// Delete records by id from a tab and purge the same ids from its selection.
    #[must_use]
    pub fn remove_plots(&self, tab_index: usize, ids: &[ParcelId]) -> Self {
        let mut next = self.clone();
        let Some(slot) = next.tabs.get_mut(tab_index) else {
            debug!(tab_index, tabs = self.tabs.len(), "remove_plots: no such tab");
            return next;
        };
        let doomed: HashSet<&ParcelId> = ids.iter().collect();
        let tab = Arc::make_mut(slot);
        tab.data.retain(|record| !doomed.contains(&record.parcelle));
        tab.selected.retain(|id| !doomed.contains(id));
        next
    }

    /// Make `index` the current tab.
    ///
    /// Out-of-range indices create empty tabs up to `min(index, max_tabs - 1)`
    /// when dynamic creation is enabled, and clamp to the last tab otherwise.
    #[must_use]
    pub fn set_active_tab(&self, index: usize) -> Self {
        let mut next = self.clone();
        let len = self.tabs.len();
        if index < len {
            next.active = index;
        } else if self.max_tabs > 0 {
            let target = index.min(self.max_tabs - 1);
            while next.tabs.len() <= target {
                next.tabs.push(Arc::new(Tab::new()));
            }
            next.active = target;
        } else if len > 0 {
            debug!(index, len, "set_active_tab: clamped to last tab");
            next.active = len - 1;
        } else {
            debug!(index, "set_active_tab: store is empty");
        }
        next
    }

    /// Add `ids` to the current tab's selection. Ids without a record are ignored.
    #[must_use]
    pub fn select_plots(&self, ids: &[ParcelId]) -> Self {
        let mut next = self.clone();
        let Some(slot) = next.tabs.get_mut(self.active) else {
            return next;
        };
        let additions: Vec<ParcelId> = {
            let known = slot.known_ids();
            ids.iter()
                .filter(|id| known.contains(id) && !slot.is_selected(id))
                .cloned()
                .collect()
        };
        if !additions.is_empty() {
            Arc::make_mut(slot).selected.extend(additions);
        }
        next
    }

    /// Remove `ids` from the current tab's selection.
    #[must_use]
    pub fn deselect_plots(&self, ids: &[ParcelId]) -> Self {
        let mut next = self.clone();
        let Some(slot) = next.tabs.get_mut(self.active) else {
            return next;
        };
        if ids.iter().any(|id| slot.is_selected(id)) {
            let tab = Arc::make_mut(slot);
            for id in ids {
                tab.selected.remove(id);
            }
        }
        next
    }

    /// Clear the current tab's selection; records stay.
    #[must_use]
    pub fn remove_selection(&self) -> Self {
        let mut next = self.clone();
        if let Some(slot) = next.tabs.get_mut(self.active) {
            if !slot.selected.is_empty() {
                Arc::make_mut(slot).selected.clear();
            }
        }
        next
    }

    /// Open a new empty tab and make it current.
    #[must_use]
    pub fn add_tab(&self) -> Self {
        let mut next = self.clone();
        if self.max_tabs > 0 && self.tabs.len() >= self.max_tabs {
            debug!(max_tabs = self.max_tabs, "add_tab: tab limit reached");
            return next;
        }
        next.tabs.push(Arc::new(Tab::new()));
        next.active = next.tabs.len() - 1;
        next
    }

    /// Close a tab. The current tab moves back by one when it sat at or after
    /// the removed index.
    #[must_use]
    pub fn remove_tab(&self, index: usize) -> Self {
        let mut next = self.clone();
        if index >= self.tabs.len() {
            debug!(index, tabs = self.tabs.len(), "remove_tab: no such tab");
            return next;
        }
        next.tabs.remove(index);
        if next.active > index || (next.active == index && index > 0) {
            next.active -= 1;
        }
        next.active = next.active.min(next.tabs.len().saturating_sub(1));
        next
    }
}
