//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds only what every connection shares: the startup config, the engine
//! context derived from it, and the eligibility service. Selection state is
//! per connection and lives in `session::Session`.

use std::sync::Arc;

use crate::config::{CadastreConfig, CadastreContext};
use crate::eligibility::EligibilityService;

/// Clone is required by Axum; every field is Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CadastreConfig>,
    pub context: Arc<CadastreContext>,
    pub eligibility: Arc<dyn EligibilityService>,
}

impl AppState {
    #[must_use]
    pub fn new(config: CadastreConfig, eligibility: Arc<dyn EligibilityService>) -> Self {
        let context = CadastreContext::from(&config);
        Self { config: Arc::new(config), context: Arc::new(context), eligibility }
    }
}
