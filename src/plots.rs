//! Plot records, GeoJSON features, and overlay styles.
//!
//! DESIGN
//! ======
//! A `PlotRecord` is one cadastre search result. Its `parcelle` id is the
//! stable identity used for selection and styling; the `feature` carries the
//! parcel geometry. Any other search-result columns are kept verbatim in
//! `extra` so the client gets back exactly what it sent.

#[cfg(test)]
#[path = "plots_test.rs"]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// PARCEL ID
// =============================================================================

/// Cadastral parcel identifier (e.g. `"350238000BI0064"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParcelId(String);

impl ParcelId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParcelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParcelId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// Parcel features travel as plain GeoJSON. Members the search API adds
/// beyond the standard ones (`geometry_name`, ...) stay in `foreign_members`.
pub use geojson::{Feature, Geometry, Value as GeometryValue};

/// Visit every position of `value`, depth first.
pub fn for_each_position(value: &GeometryValue, f: &mut impl FnMut(&[f64])) {
    match value {
        GeometryValue::Point(position) => f(position.as_slice()),
        GeometryValue::MultiPoint(positions) | GeometryValue::LineString(positions) => {
            positions.iter().for_each(|p| f(p.as_slice()));
        }
        GeometryValue::MultiLineString(lines) | GeometryValue::Polygon(lines) => {
            lines.iter().flatten().for_each(|p| f(p.as_slice()));
        }
        GeometryValue::MultiPolygon(polygons) => polygons.iter().flatten().flatten().for_each(|p| f(p.as_slice())),
        GeometryValue::GeometryCollection(geometries) => {
            for geometry in geometries {
                for_each_position(&geometry.value, f);
            }
        }
    }
}

// =============================================================================
// PLOT RECORD
// =============================================================================

/// One search result row. Immutable once added to a tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotRecord {
    pub parcelle: ParcelId,
    pub feature: Feature,
    /// Remaining search-result columns (owner, address, surface, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PlotRecord {
    #[must_use]
    pub fn new(parcelle: impl Into<String>, feature: Feature) -> Self {
        Self { parcelle: ParcelId::new(parcelle), feature, extra: serde_json::Map::new() }
    }
}

// =============================================================================
// STYLES
// =============================================================================

/// Vector style applied to one rendered parcel.
///
/// Stroke fields use the map engine's `color`/`weight` names on the wire and
/// accept `strokeColor`/`strokeWeight` on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleSpec {
    pub fill_color: String,
    pub opacity: f64,
    pub fill_opacity: f64,
    #[serde(rename = "color", alias = "strokeColor")]
    pub stroke_color: String,
    #[serde(rename = "weight", alias = "strokeWeight")]
    pub stroke_weight: f64,
}

impl StyleSpec {
    #[must_use]
    pub fn selected_preset() -> Self {
        Self {
            fill_color: "#81BEF7".into(),
            opacity: 0.6,
            fill_opacity: 0.6,
            stroke_color: "#111111".into(),
            stroke_weight: 4.0,
        }
    }

    #[must_use]
    pub fn default_preset() -> Self {
        Self {
            fill_color: "#222111".into(),
            opacity: 0.4,
            fill_opacity: 0.4,
            stroke_color: "#111222".into(),
            stroke_weight: 2.0,
        }
    }
}

/// Which of the two presets an intent targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleKind {
    Selected,
    Default,
}

/// The two overlay style presets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleSet {
    pub selected: StyleSpec,
    pub default: StyleSpec,
}

impl StyleSet {
    #[must_use]
    pub fn get(&self, kind: StyleKind) -> &StyleSpec {
        match kind {
            StyleKind::Selected => &self.selected,
            StyleKind::Default => &self.default,
        }
    }

    /// Replace one preset, leaving the other untouched.
    #[must_use]
    pub fn with(mut self, kind: StyleKind, style: StyleSpec) -> Self {
        match kind {
            StyleKind::Selected => self.selected = style,
            StyleKind::Default => self.default = style,
        }
        self
    }
}

impl Default for StyleSet {
    fn default() -> Self {
        Self { selected: StyleSpec::selected_preset(), default: StyleSpec::default_preset() }
    }
}
