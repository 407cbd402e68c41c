//! Frame: the message envelope exchanged with the map client.
//!
//! ARCHITECTURE
//! ============
//! The client sends one request frame per intent (`plots:add`,
//! `selection:select`, `request:blur`, ...). The session answers with
//! `done`/`error` replies and pushes engine commands (`overlay:update`,
//! `viewport:fit`) as unsolicited request frames.
//!
//! DESIGN
//! ======
//! - Flat data: payload is always `Map<String, Value>`.
//! - Responses correlate to requests via `parent_id`.
//! - Routing looks at the `syscall` prefix only; handlers own `data`.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload.
pub type Data = HashMap<String, serde_json::Value>;

/// Lifecycle position of a frame in a request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    pub ts: i64,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create a request frame.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self { id: Uuid::new_v4(), parent_id: None, ts: now_ms(), syscall: syscall.into(), status: Status::Request, data }
    }

    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Terminal reply carrying a payload.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create an error response from a plain string. Terminal.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(message.into()));
        self.reply(Status::Error, data)
    }

    /// Create a structured error response from a typed error. Terminal.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), serde_json::Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), serde_json::Value::Bool(err.retryable()));
        self.reply(Status::Error, data)
    }

    /// Build a reply frame. Inherits `parent_id` and `syscall`.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: now_ms(),
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }

    /// Create a request frame whose data is the fields of `payload`.
    pub fn push(syscall: impl Into<String>, payload: &impl Serialize) -> Self {
        Self::request(syscall, data_from(payload))
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Flatten a serializable struct into frame data. Non-object values are
/// stored under `value`.
pub fn data_from(payload: &impl Serialize) -> Data {
    match serde_json::to_value(payload) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
        Ok(other) => Data::from([("value".to_string(), other)]),
        Err(e) => {
            warn!(error = %e, "frame: payload not serializable");
            Data::new()
        }
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// Extract the syscall prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.syscall.split_once(':') else {
            return &self.syscall;
        };
        prefix
    }

    /// Extract the syscall verb (everything after the first ':').
    #[must_use]
    pub fn verb(&self) -> &str {
        self.syscall
            .split_once(':')
            .map_or("", |(_, verb)| verb)
    }

    /// The whole `data` map as one JSON object, for typed decoding.
    #[must_use]
    pub fn data_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.data.clone().into_iter().collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================
