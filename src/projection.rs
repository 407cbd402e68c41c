//! Feature projection: store snapshot to styled GeoJSON features.
//!
//! Pure functions only. Nothing here reads engine state, so callers may
//! project any snapshot at any time.

#[cfg(test)]
#[path = "projection_test.rs"]
mod tests;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::plots::{Feature, StyleSet, StyleSpec, for_each_position};
use crate::selection::Tab;

/// CRS of every geometry handed to the overlay and viewport sinks.
pub const FEATURE_CRS: &str = "EPSG:4326";

/// A parcel feature annotated with the style it should be drawn with. Every
/// member of the source feature is carried over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedFeature {
    #[serde(flatten)]
    pub feature: Feature,
    pub style: StyleSpec,
}

/// `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl From<[f64; 4]> for BBox {
    fn from([min_x, min_y, max_x, max_y]: [f64; 4]) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.min_x, b.min_y, b.max_x, b.max_y]
    }
}

/// Style every record of `tab` in insertion order: `styles.selected` when the
/// record's parcel is selected in that tab, `styles.default` otherwise.
#[must_use]
pub fn project(tab: &Tab, styles: &StyleSet) -> Vec<RenderedFeature> {
    tab.data()
        .iter()
        .map(|record| {
            let style = if tab.is_selected(&record.parcelle) { &styles.selected } else { &styles.default };
            RenderedFeature { feature: record.feature.clone(), style: style.clone() }
        })
        .collect()
}

/// Features of every tab concatenated, selection ignored.
#[must_use]
pub fn project_all(tabs: &[Arc<Tab>]) -> Vec<Feature> {
    tabs.iter()
        .flat_map(|tab| tab.data().iter().map(|record| record.feature.clone()))
        .collect()
}

/// Style every feature with one style (used when showing all results).
#[must_use]
pub fn with_style(features: Vec<Feature>, style: &StyleSpec) -> Vec<RenderedFeature> {
    features
        .into_iter()
        .map(|feature| RenderedFeature { feature, style: style.clone() })
        .collect()
}

/// Bounding box over every position of every geometry. `None` when the
/// features carry no coordinates at all.
#[must_use]
pub fn bounding_box<'a>(features: impl IntoIterator<Item = &'a Feature>) -> Option<BBox> {
    let mut bbox: Option<BBox> = None;
    for geometry in features.into_iter().filter_map(|f| f.geometry.as_ref()) {
        for_each_position(&geometry.value, &mut |position| {
            let (Some(&x), Some(&y)) = (position.first(), position.get(1)) else {
                return;
            };
            bbox = Some(match bbox {
                None => BBox { min_x: x, min_y: y, max_x: x, max_y: y },
                Some(b) => BBox {
                    min_x: b.min_x.min(x),
                    min_y: b.min_y.min(y),
                    max_x: b.max_x.max(x),
                    max_y: b.max_y.max(y),
                },
            });
        });
    }
    bbox
}
