//! IPC protocol types for the scan service.
//!
//! One JSON object per line. Requests carry `{id, method, params}`; replies
//! carry either `{id, result}` or `{id, error: {code, message}}`.

use checkin_core::{AttendeeRow, DuplicatePolicy, ScanRequest};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (error.code)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_INTERNAL: i64 = -32603;

/// Service-specific error codes.
pub const ERR_NOT_FOUND: i64 = 404;
pub const ERR_SHUTTING_DOWN: i64 = 503;
pub const ERR_STORAGE: i64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub id: RequestId,
    pub error: RpcErrorBody,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub capabilities: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// scan.sync
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSyncParams {
    pub scans: Vec<ScanRequest>,
}

// ─────────────────────────────────────────────────────────────────────────────
// attendees.*
// ─────────────────────────────────────────────────────────────────────────────

/// Params for `attendees.replace` and `attendees.add`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendeesImportParams {
    pub attendees: Vec<AttendeeRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendeeGetParams {
    pub id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// scans.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScansListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendee_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScansRecentParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusResult {
    pub uptime_s: u64,
    pub attendees: usize,
    pub scans: usize,
    pub connections: u32,
    pub duplicate_policy: DuplicatePolicy,
    pub event_days: u32,
}
