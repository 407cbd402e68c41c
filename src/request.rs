//! Request form and eligibility gate.
//!
//! ARCHITECTURE
//! ============
//! The extract-request form is plain data (`RequestForm`) with pure
//! visibility selectors. `EligibilityGate` owns one form per session and
//! runs the eligibility lookup when the identifier field loses focus:
//!
//! ```text
//!   idle ──blur(cni ≥ 3, type set)──▶ checking ──ok──▶ resolved
//!                                        │
//!                                        └──err──▶ failed (+ notification)
//! ```
//!
//! DESIGN
//! ======
//! Every check takes a fresh generation. When a response comes back it is
//! applied only if its generation is still the newest AND the form still
//! holds the `(cni, type)` the lookup was keyed on; otherwise it is dropped
//! and the form is left alone. The lock is never held across an await.
//!
//! ERROR HANDLING
//! ==============
//! Lookup failures never touch the form. They move the gate to `failed` and
//! return one `Notification` for the client. Re-blurring the identifier
//! retries.

#[cfg(test)]
#[path = "request_test.rs"]
mod tests;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CadastreConfig;
use crate::eligibility::{EligibilityQuery, EligibilityResponse, EligibilityService};

/// Shortest trimmed identifier that triggers a lookup.
pub const MIN_IDENTIFIER_LEN: usize = 3;

pub const NOTIFICATION_TITLE: &str = "Error";
pub const AVAILABLE_REQ_ERROR: &str = "cadastrapp.requestForm.availableReqError";

// =============================================================================
// FORM
// =============================================================================

/// Who is filing the request. `P3` is a private individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequesterType {
    A,
    P1,
    P2,
    P3,
}

impl RequesterType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }

    #[must_use]
    pub fn is_individual(self) -> bool {
        self == Self::P3
    }
}

impl fmt::Display for RequesterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the request is made or answered. Serialized as 1, 2 or 3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeliveryChannel {
    #[default]
    Counter,
    Mail,
    Email,
}

impl TryFrom<u8> for DeliveryChannel {
    type Error = FormError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Counter),
            2 => Ok(Self::Mail),
            3 => Ok(Self::Email),
            other => Err(FormError::InvalidChannel(other.to_string())),
        }
    }
}

impl From<DeliveryChannel> for u8 {
    fn from(channel: DeliveryChannel) -> Self {
        match channel {
            DeliveryChannel::Counter => 1,
            DeliveryChannel::Mail => 2,
            DeliveryChannel::Email => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormField {
    Cni,
    Lastname,
    Firstname,
    Adress,
    Codepostal,
    Commune,
    Mail,
    Askby,
    Responseby,
}

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("invalid delivery channel: {0}")]
    InvalidChannel(String),
}

impl crate::frame::ErrorCode for FormError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidChannel(_) => "E_INVALID_CHANNEL",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestForm {
    #[serde(rename = "type")]
    pub requester_type: Option<RequesterType>,
    pub cni: String,
    pub firstname: String,
    pub lastname: String,
    pub adress: String,
    pub codepostal: String,
    pub commune: String,
    pub mail: String,
    pub askby: DeliveryChannel,
    pub responseby: DeliveryChannel,
}

impl RequestForm {
    /// A blank form with only the requester type chosen.
    #[must_use]
    pub fn with_type(requester_type: RequesterType) -> Self {
        Self { requester_type: Some(requester_type), ..Self::default() }
    }

    /// Write one field. Channels accept "1", "2" or "3".
    ///
    /// # Errors
    ///
    /// Returns `FormError::InvalidChannel` for an unknown channel value.
    pub fn set(&mut self, field: FormField, value: &str) -> Result<(), FormError> {
        let slot = match field {
            FormField::Askby | FormField::Responseby => {
                let channel = value
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| FormError::InvalidChannel(value.to_string()))
                    .and_then(DeliveryChannel::try_from)?;
                if field == FormField::Askby {
                    self.askby = channel;
                } else {
                    self.responseby = channel;
                }
                return Ok(());
            }
            FormField::Cni => &mut self.cni,
            FormField::Lastname => &mut self.lastname,
            FormField::Firstname => &mut self.firstname,
            FormField::Adress => &mut self.adress,
            FormField::Codepostal => &mut self.codepostal,
            FormField::Commune => &mut self.commune,
            FormField::Mail => &mut self.mail,
        };
        value.clone_into(slot);
        Ok(())
    }

    fn is_individual(&self) -> bool {
        self.requester_type.is_some_and(RequesterType::is_individual)
    }

    fn is_organisation(&self) -> bool {
        self.requester_type.is_some_and(|t| !t.is_individual())
    }

    fn has_cni(&self) -> bool {
        !self.cni.is_empty()
    }

    /// Whether the ask-by / response-by channel pickers are shown.
    #[must_use]
    pub fn shows_routing_fields(&self) -> bool {
        self.is_organisation() || (self.is_individual() && self.has_cni())
    }

    /// Whether the request object section is shown, ignoring any check in flight.
    #[must_use]
    pub fn shows_request_object(&self, min_lastname: usize) -> bool {
        (self.is_organisation() && self.lastname.chars().count() > min_lastname)
            || (self.is_individual() && self.has_cni())
    }

    /// Nothing is editable until a type is chosen; an individual must give
    /// their identifier before anything else.
    #[must_use]
    pub fn field_enabled(&self, field: FormField) -> bool {
        if self.requester_type.is_none() {
            return false;
        }
        field == FormField::Cni || !(self.is_individual() && !self.has_cni())
    }

    /// Individuals must provide an identifier.
    #[must_use]
    pub fn cni_invalid(&self) -> bool {
        self.is_individual() && !self.has_cni()
    }

    fn query_key(&self) -> Option<EligibilityQuery> {
        Some(EligibilityQuery { cni: self.cni.clone(), requester_type: self.requester_type? })
    }

    /// Copy identity fields the service returned. Absent fields are left alone.
    fn merge_identity(&mut self, response: &EligibilityResponse) {
        let Some(user) = &response.user else {
            return;
        };
        let fields = [
            (&user.first_name, &mut self.firstname),
            (&user.last_name, &mut self.lastname),
            (&user.code_postal, &mut self.codepostal),
            (&user.adress, &mut self.adress),
            (&user.commune, &mut self.commune),
            (&user.mail, &mut self.mail),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                value.clone_into(slot);
            }
        }
    }
}

// =============================================================================
// GATE STATE
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateState {
    #[default]
    Idle,
    Checking,
    Resolved,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

impl Notification {
    fn available_request_error() -> Self {
        Self { title: NOTIFICATION_TITLE.into(), message: AVAILABLE_REQ_ERROR.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    pub routing_fields: bool,
    pub request_object: bool,
    pub cni_invalid: bool,
}

/// What the client renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSnapshot {
    pub state: GateState,
    pub form: RequestForm,
    pub available_requests: u32,
    pub visibility: Visibility,
}

/// Result of one identifier blur.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Identifier too short, no type chosen, or another field blurred.
    NotTriggered,
    Resolved { available_requests: u32 },
    Failed(Notification),
    /// A newer check or a form edit made this response irrelevant.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    pub max_requests_default: u32,
    pub min_lastname: usize,
    pub debounce: Duration,
}

impl From<&CadastreConfig> for GateSettings {
    fn from(config: &CadastreConfig) -> Self {
        Self {
            max_requests_default: config.max_requests_default,
            min_lastname: config.request_object_min_lastname,
            debounce: Duration::from_millis(config.eligibility_debounce_ms),
        }
    }
}

// =============================================================================
// GATE
// =============================================================================

struct GateInner {
    form: RequestForm,
    state: GateState,
    available_requests: u32,
    generation: u64,
}

#[derive(Clone)]
pub struct EligibilityGate {
    settings: GateSettings,
    service: Arc<dyn EligibilityService>,
    inner: Arc<Mutex<GateInner>>,
}

impl EligibilityGate {
    pub fn new(settings: GateSettings, service: Arc<dyn EligibilityService>) -> Self {
        let inner = GateInner {
            form: RequestForm::default(),
            state: GateState::Idle,
            available_requests: settings.max_requests_default,
            generation: 0,
        };
        Self { settings, service, inner: Arc::new(Mutex::new(inner)) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> GateSnapshot {
        let inner = self.lock();
        let form = &inner.form;
        let visibility = Visibility {
            routing_fields: form.shows_routing_fields(),
            request_object: form.shows_request_object(self.settings.min_lastname)
                && inner.state != GateState::Checking,
            cni_invalid: form.cni_invalid(),
        };
        GateSnapshot {
            state: inner.state,
            form: form.clone(),
            available_requests: inner.available_requests,
            visibility,
        }
    }

    #[must_use]
    pub fn available_requests(&self) -> u32 {
        self.lock().available_requests
    }

    /// Choose the requester type. The form restarts blank with that type and
    /// any check in flight is abandoned.
    pub fn set_type(&self, requester_type: RequesterType) {
        let mut inner = self.lock();
        inner.form = RequestForm::with_type(requester_type);
        inner.state = GateState::Idle;
        inner.generation += 1;
        debug!(%requester_type, "request: type chosen");
    }

    /// Edit one field as typed (untrimmed).
    ///
    /// # Errors
    ///
    /// Returns `FormError` when a channel field gets an unknown value.
    pub fn set_field(&self, field: FormField, value: &str) -> Result<(), FormError> {
        self.lock().form.set(field, value)
    }

    /// Field lost focus: store the trimmed value and, for the identifier,
    /// run the eligibility check.
    ///
    /// # Errors
    ///
    /// Returns `FormError` when a channel field gets an unknown value.
    pub async fn on_blur(&self, field: FormField, value: &str) -> Result<CheckOutcome, FormError> {
        match self.blur(field, value)? {
            Some(check) => Ok(check.run().await),
            None => Ok(CheckOutcome::NotTriggered),
        }
    }

    /// Synchronous half of `on_blur`: store the trimmed value and, when a
    /// check is due, move to `checking` and hand back the lookup to run.
    ///
    /// # Errors
    ///
    /// Returns `FormError` when a channel field gets an unknown value.
    pub fn blur(&self, field: FormField, value: &str) -> Result<Option<PendingCheck>, FormError> {
        let trimmed = value.trim();
        let mut inner = self.lock();
        inner.form.set(field, trimmed)?;
        if field != FormField::Cni || trimmed.chars().count() < MIN_IDENTIFIER_LEN {
            return Ok(None);
        }
        let Some(key) = inner.form.query_key() else {
            return Ok(None);
        };
        inner.generation += 1;
        inner.state = GateState::Checking;
        Ok(Some(PendingCheck { gate: self.clone(), generation: inner.generation, key }))
    }

    async fn run_check(&self, generation: u64, key: EligibilityQuery) -> CheckOutcome {
        if !self.settings.debounce.is_zero() {
            tokio::time::sleep(self.settings.debounce).await;
            if self.lock().generation != generation {
                debug!(generation, "request: check superseded during debounce");
                return CheckOutcome::Superseded;
            }
        }

        let result = self.service.check_eligibility(&key).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(generation, latest = inner.generation, "request: stale response dropped");
            return CheckOutcome::Superseded;
        }
        if inner.form.query_key().as_ref() != Some(&key) {
            debug!(generation, "request: form changed, response dropped");
            inner.state = GateState::Idle;
            return CheckOutcome::Superseded;
        }

        match result {
            Ok(response) => {
                inner.form.merge_identity(&response);
                // An explicit 0 is a real answer, not a missing allowance.
                inner.available_requests = response
                    .request_available
                    .unwrap_or(self.settings.max_requests_default);
                inner.state = GateState::Resolved;
                info!(requester_type = %key.requester_type, available = inner.available_requests, "request: eligibility resolved");
                CheckOutcome::Resolved { available_requests: inner.available_requests }
            }
            Err(e) => {
                inner.state = GateState::Failed;
                warn!(error = %e, "request: eligibility check failed");
                CheckOutcome::Failed(Notification::available_request_error())
            }
        }
    }

    /// Close the form: blank form, full allowance, back to idle.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.form = RequestForm::default();
        inner.available_requests = self.settings.max_requests_default;
        inner.state = GateState::Idle;
        inner.generation += 1;
        debug!("request: form closed");
    }
}

/// A lookup that has been started but not yet sent.
pub struct PendingCheck {
    gate: EligibilityGate,
    generation: u64,
    key: EligibilityQuery,
}

impl PendingCheck {
    #[must_use]
    pub fn key(&self) -> &EligibilityQuery {
        &self.key
    }

    pub async fn run(self) -> CheckOutcome {
        self.gate.run_check(self.generation, self.key).await
    }
}
