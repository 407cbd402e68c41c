//! WebSocket handler: intents in, map commands out.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID, starts a `Session`, and enters a
//! `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames pushed by the session (overlay, viewport, request state) →
//!   forward to client
//!
//! Handler functions turn one frame into one engine intent or gate call and
//! return an `Outcome`. They never write to the socket; overlay and viewport
//! commands reach the client through the session's delivery task.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. Client sends frames → dispatch → handler returns Outcome → reply
//! 3. Close → drain session delivery → drop

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame, Status, data_from};
use crate::plots::ParcelId;
use crate::reaction::Intent;
use crate::request::{FormField, RequesterType};
use crate::session::Session;
use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),

    #[error("invalid payload for {syscall}: {reason}")]
    InvalidPayload { syscall: String, reason: String },
}

impl ErrorCode for FrameError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
            Self::InvalidPayload { .. } => "E_INVALID_PAYLOAD",
        }
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// What a handler wants sent back to the client.
enum Outcome {
    /// Send done+data to sender.
    Reply(Data),
    /// Send empty done to sender.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for frames pushed by the session.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(256);
    let session = Session::start(&state, client_tx);

    let welcome = Frame::request("session:connected", Data::new()).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&session, client_id, &text) {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    // Nobody reads pushed frames any more; let delivery fail fast.
    drop(client_rx);
    session.close().await;
    info!(%client_id, "ws: client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data.get("code").and_then(|v| v.as_str()).unwrap_or("-");
        let message = frame.data.get("message").and_then(|v| v.as_str()).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Kept apart from the socket so tests can drive a session end-to-end.
fn process_inbound_text(session: &Session, client_id: Uuid, text: &str) -> Vec<Frame> {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    info!(%client_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");

    let result = match req.prefix() {
        "tabs" | "plots" | "selection" | "styles" | "results" => handle_engine(session, &req),
        "request" => handle_request(session, &req),
        _ => Err(FrameError::UnknownSyscall(req.syscall.clone()).into()),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Err(HandlerError(err)) => vec![req.error_from(err.as_ref())],
    }
}

/// Any typed error a handler can fail with.
struct HandlerError(Box<dyn ErrorCode + Send>);

impl<E: ErrorCode + Send + 'static> From<E> for HandlerError {
    fn from(err: E) -> Self {
        Self(Box::new(err))
    }
}

fn decode<T: DeserializeOwned>(req: &Frame, payload: Value) -> Result<T, FrameError> {
    serde_json::from_value(payload)
        .map_err(|e| FrameError::InvalidPayload { syscall: req.syscall.clone(), reason: e.to_string() })
}

// =============================================================================
// ENGINE HANDLERS
// =============================================================================

fn intent_name(syscall: &str) -> Option<&'static str> {
    let name = match syscall {
        "tabs:add" => "add_tab",
        "tabs:remove" => "remove_tab",
        "tabs:activate" => "set_active_tab",
        "plots:add" => "add_plots",
        "plots:remove" => "remove_plots",
        "selection:select" => "select_plots",
        "selection:deselect" => "deselect_plots",
        "selection:clear" => "remove_selection",
        "styles:set" => "set_styles",
        "styles:set_layer" => "set_layer_style",
        "results:zoom" => "zoom_to_results",
        _ => return None,
    };
    Some(name)
}

fn handle_engine(session: &Session, req: &Frame) -> Result<Outcome, HandlerError> {
    let Some(name) = intent_name(&req.syscall) else {
        return Err(FrameError::UnknownSyscall(req.syscall.clone()).into());
    };
    let mut payload = req.data_value();
    if let Value::Object(map) = &mut payload {
        map.insert("intent".into(), Value::from(name));
    }
    let intent: Intent = decode(req, payload)?;
    session.engine().dispatch(intent);
    Ok(Outcome::Reply(selection_summary(session)))
}

/// Tab and selection counters the client mirrors after each intent.
fn selection_summary(session: &Session) -> Data {
    let snapshot = session.engine().snapshot();
    let selection = &snapshot.selection;
    let selected: Vec<&str> = selection.selected_plot_ids().iter().map(ParcelId::as_str).collect();

    let mut data = Data::new();
    data.insert("tab_count".into(), json!(selection.tab_count()));
    data.insert("active_index".into(), json!(selection.active_index()));
    data.insert("result_count".into(), json!(selection.current_plot_data().len()));
    data.insert("selected".into(), json!(selected));
    data
}

// =============================================================================
// REQUEST HANDLERS
// =============================================================================

#[derive(Deserialize)]
struct TypePayload {
    #[serde(rename = "type")]
    requester_type: RequesterType,
}

#[derive(Deserialize)]
struct FieldPayload {
    field: FormField,
    #[serde(default)]
    value: Value,
}

impl FieldPayload {
    /// Radio buttons send numbers, text inputs send strings.
    fn text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

fn handle_request(session: &Session, req: &Frame) -> Result<Outcome, HandlerError> {
    let gate = session.gate();
    match req.verb() {
        "type" => {
            let payload: TypePayload = decode(req, req.data_value())?;
            gate.set_type(payload.requester_type);
        }
        "field" => {
            let payload: FieldPayload = decode(req, req.data_value())?;
            gate.set_field(payload.field, &payload.text())?;
        }
        "blur" => {
            let payload: FieldPayload = decode(req, req.data_value())?;
            if let Some(check) = gate.blur(payload.field, &payload.text())? {
                session.spawn_check(check);
            }
        }
        "close" => {
            gate.close();
            return Ok(Outcome::Done);
        }
        "state" => {}
        _ => return Err(FrameError::UnknownSyscall(req.syscall.clone()).into()),
    }
    Ok(Outcome::Reply(data_from(&gate.snapshot())))
}
