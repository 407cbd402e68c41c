//! Eligibility lookup: how many extract requests a requester may still file.
//!
//! DESIGN
//! ======
//! `EligibilityService` is the seam the request gate depends on; the HTTP
//! client is one implementation, tests supply their own. The client issues
//! a single `GET {base}/services/checkRequestLimitation?cni=..&type=..` and
//! decodes the body with `parse_response`.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures, non-200 statuses and undecodable bodies all map to
//! `EligibilityError`. The gate turns any of them into a `failed` state and
//! one user notification; nothing here retries.

#[cfg(test)]
#[path = "eligibility_test.rs"]
mod tests;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EligibilityTimeouts;
use crate::request::RequesterType;

const CHECK_PATH: &str = "/services/checkRequestLimitation";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EligibilityError {
    #[error("eligibility request failed: {0}")]
    Request(String),

    #[error("eligibility service returned status {status}")]
    Status { status: u16, body: String },

    #[error("eligibility response parse failed: {0}")]
    Parse(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Lookup key: identifier plus requester type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EligibilityQuery {
    pub cni: String,
    #[serde(rename = "type")]
    pub requester_type: RequesterType,
}

/// Identity fields the service may know for the identifier. Any subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialIdentity {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub code_postal: Option<String>,
    #[serde(default)]
    pub adress: Option<String>,
    #[serde(default)]
    pub commune: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityResponse {
    #[serde(default)]
    pub user: Option<PartialIdentity>,
    /// Remaining requests; absent means "use the configured maximum".
    #[serde(default)]
    pub request_available: Option<u32>,
}

/// Decode a `checkRequestLimitation` body.
///
/// # Errors
///
/// Returns `EligibilityError::Parse` if the body is not the expected JSON object.
pub fn parse_response(text: &str) -> Result<EligibilityResponse, EligibilityError> {
    serde_json::from_str(text).map_err(|e| EligibilityError::Parse(e.to_string()))
}

// =============================================================================
// SERVICE
// =============================================================================

#[async_trait]
pub trait EligibilityService: Send + Sync {
    async fn check_eligibility(&self, query: &EligibilityQuery) -> Result<EligibilityResponse, EligibilityError>;
}

pub struct HttpEligibilityClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEligibilityClient {
    /// Build a client for the cadastrapp services rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeouts: EligibilityTimeouts) -> Result<Self, EligibilityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| EligibilityError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}{CHECK_PATH}", self.base_url)
    }
}

#[async_trait]
impl EligibilityService for HttpEligibilityClient {
    async fn check_eligibility(&self, query: &EligibilityQuery) -> Result<EligibilityResponse, EligibilityError> {
        debug!(requester_type = %query.requester_type, "eligibility: checking");
        let response = self
            .http
            .get(self.endpoint())
            .query(&[("cni", query.cni.as_str()), ("type", query.requester_type.as_str())])
            .send()
            .await
            .map_err(|e| EligibilityError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| EligibilityError::Request(e.to_string()))?;
        if status != 200 {
            warn!(status, "eligibility: non-success status");
            return Err(EligibilityError::Status { status, body: text });
        }
        parse_response(&text)
    }
}
