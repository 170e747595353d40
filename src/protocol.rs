//! Wire message shapes for the bidirectional endpoint (§4.1).
//!
//! Every inbound frame is a UTF-8 JSON object with at least a string
//! `type` and a string `connectionId`. This module defines the recognized
//! `type` values and their per-type required fields, and the codec that
//! parses/validates a raw frame into a [`ClientMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Max accepted frame size, in bytes (§4.1).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;
/// Max accepted `code` payload size, in bytes (§4.1).
pub const MAX_CODE_SIZE: usize = 10 * 1024 * 1024;
/// Max accepted `userId` length, in characters (§4.1).
pub const MAX_USER_ID_LEN: usize = 255;

/// A message received from a peer, after type dispatch and field
/// validation but before role/registry checks.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// First frame establishing (or confirming) a connection id with no
    /// role yet.
    ConnectionInit { connection_id: String },
    /// Registers the sender as a browser for `user_id`.
    BrowserConnect {
        connection_id: String,
        user_id: String,
    },
    /// Registers the sender as a desktop agent for `user_id`.
    DesktopConnect {
        connection_id: String,
        user_id: String,
    },
    /// Registers the sender as a status observer.
    StatusConnect { connection_id: String },
    /// A browser asking to open (or re-open) an edit session.
    EditRequest {
        connection_id: String,
        user_id: String,
        snippet_id: String,
        code: String,
        file_type: String,
    },
    /// A desktop agent reporting a saved edit back to the browser.
    CodeUpdate {
        connection_id: String,
        user_id: String,
        snippet_id: String,
        code: String,
        file_type: Option<String>,
    },
    /// A free-form informational message, forwarded verbatim between
    /// browser and desktop.
    Info {
        connection_id: String,
        user_id: String,
        snippet_id: String,
        message: String,
    },
    /// Liveness probe; answered with [`ServerMessage::Pong`] carrying the
    /// same `timestamp` back.
    Ping {
        connection_id: String,
        timestamp: Value,
    },
}

impl ClientMessage {
    /// The `connectionId` carried by this message.
    pub fn connection_id(&self) -> &str {
        match self {
            ClientMessage::ConnectionInit { connection_id }
            | ClientMessage::BrowserConnect { connection_id, .. }
            | ClientMessage::DesktopConnect { connection_id, .. }
            | ClientMessage::StatusConnect { connection_id }
            | ClientMessage::EditRequest { connection_id, .. }
            | ClientMessage::CodeUpdate { connection_id, .. }
            | ClientMessage::Info { connection_id, .. }
            | ClientMessage::Ping { connection_id, .. } => connection_id,
        }
    }
}

/// Outbound message shapes (§4.1, "out"/"in/out" rows).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Role-establishment acknowledgement.
    #[serde(rename = "connection_ack")]
    ConnectionAck {
        #[serde(rename = "connectionId")]
        connection_id: String,
        status: &'static str,
        role: &'static str,
    },
    /// Informs a browser whether its user's desktop is connected.
    #[serde(rename = "status_update")]
    DesktopConnectedUpdate {
        #[serde(rename = "desktopConnected")]
        desktop_connected: bool,
    },
    /// Informs a desktop whether its user has any browsers connected.
    #[serde(rename = "status_update")]
    BrowserConnectedUpdate {
        #[serde(rename = "browserConnected")]
        browser_connected: bool,
    },
    /// Forwarded edit request, desktop-bound.
    #[serde(rename = "edit_request")]
    EditRequest {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "snippetId")]
        snippet_id: String,
        code: String,
        #[serde(rename = "fileType")]
        file_type: String,
    },
    /// Forwarded code update, browser-bound.
    #[serde(rename = "code_update")]
    CodeUpdate {
        #[serde(rename = "snippetId")]
        snippet_id: String,
        code: String,
    },
    /// Free-form informational message.
    #[serde(rename = "info")]
    Info {
        #[serde(rename = "snippetId")]
        snippet_id: String,
        message: String,
    },
    /// Liveness response, echoing the request's timestamp.
    #[serde(rename = "pong")]
    Pong { timestamp: Value },
    /// Rejection of a malformed, oversize, or otherwise invalid frame.
    #[serde(rename = "error")]
    Error { message: String, code: &'static str },
}

/// Parses and validates a raw inbound JSON frame into a [`ClientMessage`].
///
/// Returns `Err(message)` with a human-readable description on any
/// validation failure; callers turn this into a [`ServerMessage::Error`]
/// frame rather than closing the connection, per `spec.md` §4.1.
pub fn parse_frame(raw: &str) -> Result<ClientMessage, String> {
    if raw.len() > MAX_FRAME_SIZE {
        return Err("frame exceeds maximum size".to_owned());
    }
    let value: Value = serde_json::from_str(raw).map_err(|err| format!("invalid json: {err}"))?;
    let obj = value.as_object().ok_or("frame must be a JSON object")?;

    let msg_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or("missing string field: type")?;
    let connection_id = require_string(obj, "connectionId")?;
    if connection_id.is_empty() {
        return Err("connectionId must be a non-empty string".to_owned());
    }

    match msg_type {
        "connection_init" => Ok(ClientMessage::ConnectionInit { connection_id }),
        "browser_connect" => Ok(ClientMessage::BrowserConnect {
            connection_id,
            user_id: require_user_id(obj)?,
        }),
        "desktop_connect" => Ok(ClientMessage::DesktopConnect {
            connection_id,
            user_id: require_user_id(obj)?,
        }),
        "status_connect" => Ok(ClientMessage::StatusConnect { connection_id }),
        "edit_request" => Ok(ClientMessage::EditRequest {
            connection_id,
            user_id: require_user_id(obj)?,
            snippet_id: require_string(obj, "snippetId")?,
            code: require_code(obj)?,
            file_type: require_string(obj, "fileType")?,
        }),
        "code_update" => Ok(ClientMessage::CodeUpdate {
            connection_id,
            user_id: require_user_id(obj)?,
            snippet_id: require_string(obj, "snippetId")?,
            code: require_code(obj)?,
            file_type: obj
                .get("fileType")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }),
        "info" => {
            // Accept both the flat shape (fields at top level) and a
            // legacy nested `payload` shape on input; always emit flat.
            let (snippet_id, message) = if let Some(payload) =
                obj.get("payload").and_then(Value::as_object)
            {
                (
                    require_string(payload, "snippetId")?,
                    require_string(payload, "message")?,
                )
            } else {
                (require_string(obj, "snippetId")?, require_string(obj, "message")?)
            };
            Ok(ClientMessage::Info {
                connection_id,
                user_id: require_user_id(obj)?,
                snippet_id,
                message,
            })
        }
        "ping" => Ok(ClientMessage::Ping {
            connection_id,
            timestamp: obj.get("timestamp").cloned().unwrap_or(Value::Null),
        }),
        other => Err(format!("unrecognized message type: {other}")),
    }
}

fn require_string(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String, String> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| format!("missing string field: {field}"))
}

fn require_user_id(obj: &serde_json::Map<String, Value>) -> Result<String, String> {
    let user_id = require_string(obj, "userId")?;
    if user_id.is_empty() {
        return Err("userId must be a non-empty string".to_owned());
    }
    if user_id.chars().count() > MAX_USER_ID_LEN {
        return Err(format!("userId exceeds {MAX_USER_ID_LEN} characters"));
    }
    Ok(user_id)
}

fn require_code(obj: &serde_json::Map<String, Value>) -> Result<String, String> {
    let code = require_string(obj, "code")?;
    if code.len() > MAX_CODE_SIZE {
        return Err("code exceeds maximum size".to_owned());
    }
    Ok(code)
}

/// Normalizes line endings in `code`: CRLF becomes LF, then any remaining
/// CR becomes LF. Applied to inbound `edit_request`/`code_update` payloads
/// when `normalizeLineEndings` is enabled (§4.1).
pub fn normalize_line_endings(code: &str) -> String {
    code.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_type() {
        let err = parse_frame(r#"{"connectionId":"c1"}"#).unwrap_err();
        assert!(err.contains("type"));
    }

    #[test]
    fn rejects_empty_connection_id() {
        let err = parse_frame(r#"{"type":"ping","connectionId":""}"#).unwrap_err();
        assert!(err.contains("connectionId"));
    }

    #[test]
    fn parses_edit_request() {
        let msg = parse_frame(
            r#"{"type":"edit_request","connectionId":"c1","userId":"alice","snippetId":"t1","code":"x=1\n","fileType":"js"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::EditRequest {
                user_id,
                snippet_id,
                code,
                file_type,
                ..
            } => {
                assert_eq!(user_id, "alice");
                assert_eq!(snippet_id, "t1");
                assert_eq!(code, "x=1\n");
                assert_eq!(file_type, "js");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn accepts_legacy_nested_info_shape() {
        let msg = parse_frame(
            r#"{"type":"info","connectionId":"c1","userId":"alice","payload":{"snippetId":"t1","message":"hi"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Info {
                snippet_id, message, ..
            } => {
                assert_eq!(snippet_id, "t1");
                assert_eq!(message, "hi");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_oversize_user_id() {
        let long_user = "a".repeat(MAX_USER_ID_LEN + 1);
        let frame = format!(
            r#"{{"type":"browser_connect","connectionId":"c1","userId":"{long_user}"}}"#
        );
        assert!(parse_frame(&frame).is_err());
    }

    #[test]
    fn normalizes_crlf_and_bare_cr() {
        assert_eq!(normalize_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn rejects_unrecognized_type() {
        assert!(parse_frame(r#"{"type":"bogus","connectionId":"c1"}"#).is_err());
    }

    #[test]
    fn ping_captures_timestamp() {
        let msg = parse_frame(r#"{"type":"ping","connectionId":"c1","timestamp":1234}"#).unwrap();
        match msg {
            ClientMessage::Ping { timestamp, .. } => assert_eq!(timestamp, 1234),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn ping_without_timestamp_defaults_to_null() {
        let msg = parse_frame(r#"{"type":"ping","connectionId":"c1"}"#).unwrap();
        match msg {
            ClientMessage::Ping { timestamp, .. } => assert!(timestamp.is_null()),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
