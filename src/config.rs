//! Service configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Configuration is read once at startup into `CadastreConfig` and never
//! mutated afterwards. The engine does not read the environment itself: it
//! receives a `CadastreContext` derived from the config at construction.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use serde_json::json;

use crate::plots::StyleSet;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OVERLAY_LAYER_ID: &str = "__CADASTRAPP_RASTER_LAYER__";
pub const DEFAULT_OVERLAY_OWNER: &str = "CADASTRAPP";
pub const DEFAULT_OVERLAY_NAME: &str = "cadastrapp";
pub const DEFAULT_MAX_REQUESTS: u32 = 10;
pub const DEFAULT_MAX_TABS: usize = 0;
pub const DEFAULT_CADASTRAPP_BASE_URL: &str = "http://localhost:8080/cadastrapp";
pub const DEFAULT_ELIGIBILITY_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ELIGIBILITY_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_ELIGIBILITY_DEBOUNCE_MS: u64 = 250;
pub const DEFAULT_REQUEST_OBJECT_MIN_LASTNAME: usize = 2;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CadastreConfig {
    pub port: u16,
    /// Id of the overlay layer this service owns on the host map.
    pub overlay_layer_id: String,
    /// Owner tag stamped on every overlay update.
    pub overlay_owner: String,
    /// Display name carried in the overlay base options.
    pub overlay_name: String,
    pub styles: StyleSet,
    /// Fallback extract-request allowance when the service reports none.
    pub max_requests_default: u32,
    /// Upper bound for lazily created tabs. `0` disables lazy creation.
    pub max_tabs: usize,
    pub cadastrapp_base_url: String,
    pub eligibility_timeouts: EligibilityTimeouts,
    pub eligibility_debounce_ms: u64,
    /// Lastname length a non-individual requester must exceed before the
    /// request object section is shown.
    pub request_object_min_lastname: usize,
}

impl CadastreConfig {
    /// Build typed config from environment variables.
    ///
    /// All optional; defaults in parentheses:
    /// - `PORT` (3000)
    /// - `CADASTRE_OVERLAY_LAYER_ID` (`__CADASTRAPP_RASTER_LAYER__`)
    /// - `CADASTRE_OVERLAY_OWNER` (`CADASTRAPP`)
    /// - `CADASTRE_OVERLAY_NAME` (`cadastrapp`)
    /// - `CADASTRE_STYLES`: JSON `{"selected": {...}, "default": {...}}` (built-in presets)
    /// - `CADASTRE_MAX_REQUESTS` (10)
    /// - `CADASTRE_MAX_TABS` (0)
    /// - `CADASTRAPP_BASE_URL` (`http://localhost:8080/cadastrapp`)
    /// - `ELIGIBILITY_REQUEST_TIMEOUT_SECS` (30), `ELIGIBILITY_CONNECT_TIMEOUT_SECS` (5)
    /// - `ELIGIBILITY_DEBOUNCE_MS` (250)
    /// - `REQUEST_OBJECT_MIN_LASTNAME` (2)
    ///
    /// # Errors
    ///
    /// Returns an error if `CADASTRE_STYLES` is set but is not a valid style set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let styles = match std::env::var("CADASTRE_STYLES") {
            Ok(raw) => parse_styles(&raw)?,
            Err(_) => StyleSet::default(),
        };

        Ok(Self {
            port: env_parse("PORT", DEFAULT_PORT),
            overlay_layer_id: env_string("CADASTRE_OVERLAY_LAYER_ID", DEFAULT_OVERLAY_LAYER_ID),
            overlay_owner: env_string("CADASTRE_OVERLAY_OWNER", DEFAULT_OVERLAY_OWNER),
            overlay_name: env_string("CADASTRE_OVERLAY_NAME", DEFAULT_OVERLAY_NAME),
            styles,
            max_requests_default: env_parse("CADASTRE_MAX_REQUESTS", DEFAULT_MAX_REQUESTS),
            max_tabs: env_parse("CADASTRE_MAX_TABS", DEFAULT_MAX_TABS),
            cadastrapp_base_url: env_string("CADASTRAPP_BASE_URL", DEFAULT_CADASTRAPP_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            eligibility_timeouts: EligibilityTimeouts {
                request_secs: env_parse("ELIGIBILITY_REQUEST_TIMEOUT_SECS", DEFAULT_ELIGIBILITY_REQUEST_TIMEOUT_SECS),
                connect_secs: env_parse("ELIGIBILITY_CONNECT_TIMEOUT_SECS", DEFAULT_ELIGIBILITY_CONNECT_TIMEOUT_SECS),
            },
            eligibility_debounce_ms: env_parse("ELIGIBILITY_DEBOUNCE_MS", DEFAULT_ELIGIBILITY_DEBOUNCE_MS),
            request_object_min_lastname: env_parse("REQUEST_OBJECT_MIN_LASTNAME", DEFAULT_REQUEST_OBJECT_MIN_LASTNAME),
        })
    }
}

impl Default for CadastreConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            overlay_layer_id: DEFAULT_OVERLAY_LAYER_ID.into(),
            overlay_owner: DEFAULT_OVERLAY_OWNER.into(),
            overlay_name: DEFAULT_OVERLAY_NAME.into(),
            styles: StyleSet::default(),
            max_requests_default: DEFAULT_MAX_REQUESTS,
            max_tabs: DEFAULT_MAX_TABS,
            cadastrapp_base_url: DEFAULT_CADASTRAPP_BASE_URL.into(),
            eligibility_timeouts: EligibilityTimeouts {
                request_secs: DEFAULT_ELIGIBILITY_REQUEST_TIMEOUT_SECS,
                connect_secs: DEFAULT_ELIGIBILITY_CONNECT_TIMEOUT_SECS,
            },
            eligibility_debounce_ms: DEFAULT_ELIGIBILITY_DEBOUNCE_MS,
            request_object_min_lastname: DEFAULT_REQUEST_OBJECT_MIN_LASTNAME,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_styles(raw: &str) -> Result<StyleSet, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::Invalid { var: "CADASTRE_STYLES", reason: e.to_string() })
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Where overlay updates go on the host map.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayTarget {
    pub layer_id: String,
    pub owner: String,
    /// Layer options sent with every update, before `features` is added.
    pub base_options: serde_json::Map<String, serde_json::Value>,
}

/// Read-only startup context handed to the reaction engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CadastreContext {
    pub overlay: OverlayTarget,
    pub initial_styles: StyleSet,
    pub max_tabs: usize,
}

impl From<&CadastreConfig> for CadastreContext {
    fn from(config: &CadastreConfig) -> Self {
        let mut base_options = serde_json::Map::new();
        base_options.insert("id".into(), json!(config.overlay_layer_id));
        base_options.insert("type".into(), json!("vector"));
        base_options.insert("name".into(), json!(config.overlay_name));
        base_options.insert("visibility".into(), json!(true));

        Self {
            overlay: OverlayTarget {
                layer_id: config.overlay_layer_id.clone(),
                owner: config.overlay_owner.clone(),
                base_options,
            },
            initial_styles: config.styles.clone(),
            max_tabs: config.max_tabs,
        }
    }
}
