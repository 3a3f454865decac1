//! Core wire types for the Taskpulse real-time protocol.
//!
//! Every type here travels on the wire as JSON. The shapes are fixed by the
//! client contract: internally tagged messages (`"type"` discriminator in
//! kebab-case) with camelCase payload fields, e.g.
//!
//! ```text
//! {"type":"join-task","taskId":"t-42"}
//! {"type":"connection-status","userId":"u-1","online":true}
//! ```
//!
//! Task resources are carried as opaque JSON documents ([`serde_json::Value`]).
//! The store that owns them lives outside this subsystem; broadcast only
//! relays what the mutation handlers already committed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a user.
///
/// Newtype over `String` because the upstream store issues string ids
/// (UUIDs). `#[serde(transparent)]` keeps the wire representation a plain
/// JSON string, not `{"0":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A unique identifier for a task resource.
///
/// Same newtype pattern as [`UserId`]. Task ids address the shared
/// `task:<id>` rooms that connections subscribe to while viewing a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// ClientMessage — what clients send
// ---------------------------------------------------------------------------

/// Messages a client sends to the server.
///
/// `Authenticate` is only valid as the very first frame of a connection
/// (the handshake). Everything else is valid only after the handshake has
/// completed; the server drops anything out of order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Handshake frame carrying the credential token.
    ///
    /// The token may instead arrive in the HTTP `Authorization` header of
    /// the WebSocket upgrade; `None` here means "use the header fallback".
    Authenticate { token: Option<String> },

    /// Liveness probe. The server answers with [`ServerMessage::Pong`]
    /// on this connection only.
    Ping,

    /// Subscribe this connection to the `task:<taskId>` room.
    #[serde(rename_all = "camelCase")]
    JoinTask { task_id: TaskId },

    /// Unsubscribe this connection from the `task:<taskId>` room.
    #[serde(rename_all = "camelCase")]
    LeaveTask { task_id: TaskId },

    /// Ask the server to confirm session continuity. Answered with
    /// [`ServerMessage::ConnectionConfirmed`] carrying the connection's
    /// own identity.
    CheckConnection,
}

// ---------------------------------------------------------------------------
// ServerMessage — what the server sends
// ---------------------------------------------------------------------------

/// Messages the server sends to clients.
///
/// These are immutable value objects with no delivery-tracking metadata:
/// delivery is at-most-once per connection, fire-and-forget.
///
/// All timestamps are unix epoch milliseconds (`u64`); durations are
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Pushed once, immediately after a successful handshake.
    #[serde(rename_all = "camelCase")]
    ServerInfo {
        server_start_time: u64,
        server_uptime: u64,
        connected_users: usize,
    },

    /// Reply to [`ClientMessage::Ping`].
    Pong,

    /// Reply to [`ClientMessage::CheckConnection`]: the connection's own
    /// identity as the server sees it.
    #[serde(rename_all = "camelCase")]
    ConnectionConfirmed {
        user_id: UserId,
        socket_id: String,
        server_time: u64,
    },

    /// Presence transition for a user, sent to that user's own room.
    ///
    /// Fired exactly once when the user's connection count goes 0 -> 1
    /// (`online: true`) and once when it goes 1 -> 0 (`online: false`),
    /// never per connection.
    #[serde(rename_all = "camelCase")]
    ConnectionStatus { user_id: UserId, online: bool },

    /// A task was created. The payload is the full resource document.
    TaskCreated { task: serde_json::Value },

    /// A task was updated. The payload is the full updated resource.
    TaskUpdated { task: serde_json::Value },

    /// A task was deleted.
    #[serde(rename_all = "camelCase")]
    TaskDeleted { task_id: TaskId },

    /// Something went wrong. `code` follows HTTP conventions
    /// (401 = unauthorized, 400 = bad request).
    Error { code: u16, message: String },
}

/// Current time as unix epoch milliseconds, the protocol's timestamp unit.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The wire contract defines exact JSON shapes. These tests pin the
    //! serde attributes to that contract; a mismatch means deployed
    //! clients can no longer parse our messages.

    use super::*;
    use serde_json::json;

    // =====================================================================
    // Identity types
    // =====================================================================

    #[test]
    fn test_user_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&UserId::from("u-7")).unwrap();
        assert_eq!(json, "\"u-7\"");
    }

    #[test]
    fn test_user_id_deserializes_from_plain_string() {
        let uid: UserId = serde_json::from_str("\"u-7\"").unwrap();
        assert_eq!(uid, UserId::from("u-7"));
    }

    #[test]
    fn test_task_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&TaskId::from("t-3")).unwrap();
        assert_eq!(json, "\"t-3\"");
    }

    #[test]
    fn test_id_display_is_bare_value() {
        assert_eq!(UserId::from("abc").to_string(), "abc");
        assert_eq!(TaskId::from("xyz").to_string(), "xyz");
    }

    // =====================================================================
    // ClientMessage — JSON shape per variant
    // =====================================================================

    #[test]
    fn test_client_message_authenticate_json_format() {
        let msg = ClientMessage::Authenticate {
            token: Some("jwt-abc".into()),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "authenticate");
        assert_eq!(json["token"], "jwt-abc");
    }

    #[test]
    fn test_client_message_authenticate_without_token() {
        let msg = ClientMessage::Authenticate { token: None };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "authenticate");
        assert!(json["token"].is_null());
    }

    #[test]
    fn test_client_message_ping_json_format() {
        let json: serde_json::Value =
            serde_json::to_value(&ClientMessage::Ping).unwrap();
        assert_eq!(json, json!({"type": "ping"}));
    }

    #[test]
    fn test_client_message_join_task_uses_camel_case_field() {
        let msg = ClientMessage::JoinTask {
            task_id: TaskId::from("t-1"),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "join-task");
        assert_eq!(json["taskId"], "t-1");
    }

    #[test]
    fn test_client_message_leave_task_round_trip() {
        let msg = ClientMessage::LeaveTask {
            task_id: TaskId::from("t-9"),
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: ClientMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_client_message_check_connection_json_format() {
        let json: serde_json::Value =
            serde_json::to_value(&ClientMessage::CheckConnection).unwrap();
        assert_eq!(json, json!({"type": "check-connection"}));
    }

    // =====================================================================
    // ServerMessage — JSON shape per variant
    // =====================================================================

    #[test]
    fn test_server_message_server_info_json_format() {
        let msg = ServerMessage::ServerInfo {
            server_start_time: 1_700_000_000_000,
            server_uptime: 5_000,
            connected_users: 3,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "server-info");
        assert_eq!(json["serverStartTime"], 1_700_000_000_000u64);
        assert_eq!(json["serverUptime"], 5_000);
        assert_eq!(json["connectedUsers"], 3);
    }

    #[test]
    fn test_server_message_pong_json_format() {
        let json: serde_json::Value =
            serde_json::to_value(&ServerMessage::Pong).unwrap();
        assert_eq!(json, json!({"type": "pong"}));
    }

    #[test]
    fn test_server_message_connection_confirmed_json_format() {
        let msg = ServerMessage::ConnectionConfirmed {
            user_id: UserId::from("u-1"),
            socket_id: "conn-42".into(),
            server_time: 12_345,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "connection-confirmed");
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["socketId"], "conn-42");
        assert_eq!(json["serverTime"], 12_345);
    }

    #[test]
    fn test_server_message_connection_status_json_format() {
        let msg = ServerMessage::ConnectionStatus {
            user_id: UserId::from("u-1"),
            online: true,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "connection-status");
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["online"], true);
    }

    #[test]
    fn test_server_message_task_created_carries_opaque_document() {
        let task = json!({"id": "t-1", "title": "write spec", "done": false});
        let msg = ServerMessage::TaskCreated { task: task.clone() };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "task-created");
        assert_eq!(json["task"], task);
    }

    #[test]
    fn test_server_message_task_updated_round_trip() {
        let msg = ServerMessage::TaskUpdated {
            task: json!({"id": "t-1", "title": "renamed"}),
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: ServerMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_server_message_task_deleted_uses_camel_case_field() {
        let msg = ServerMessage::TaskDeleted {
            task_id: TaskId::from("t-1"),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "task-deleted");
        assert_eq!(json["taskId"], "t-1");
    }

    #[test]
    fn test_server_message_error_json_format() {
        let msg = ServerMessage::Error {
            code: 401,
            message: "invalid authentication token".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], 401);
        assert_eq!(json["message"], "invalid authentication token");
    }

    // =====================================================================
    // Malformed input
    // =====================================================================

    #[test]
    fn test_decode_garbage_returns_error() {
        let garbage = b"not json at all";
        let result: Result<ClientMessage, _> =
            serde_json::from_slice(garbage);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_unknown_type_tag_returns_error() {
        let unknown = r#"{"type": "fly-to-moon", "speed": 9000}"#;
        let result: Result<ClientMessage, _> =
            serde_json::from_str(unknown);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_missing_required_field_returns_error() {
        // join-task without its taskId.
        let wrong = r#"{"type": "join-task"}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(wrong);
        assert!(result.is_err());
    }

    #[test]
    fn test_epoch_millis_is_monotone_enough() {
        let a = epoch_millis();
        let b = epoch_millis();
        assert!(b >= a);
        // Sanity: after 2020-01-01 in millis.
        assert!(a > 1_577_836_800_000);
    }
}
