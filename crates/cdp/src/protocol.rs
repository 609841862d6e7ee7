//! Wire envelopes
//!
//! The three JSON shapes that share the transport: commands (id, outbound),
//! responses (id, inbound) and events (no id, inbound). Responses and events
//! are split by the presence of `id` via an untagged enum. Keep these types
//! minimal; domain payloads stay as raw `Value`s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id - monotonically increasing, unique per connection
pub type RequestId = u64;

/// Target id assigned by the browser
pub type TargetId = String;

/// Session id for attached targets; the root session uses the empty sentinel
pub type SessionId = String;

/// Command sent to the browser
#[derive(Debug, Clone, Serialize)]
pub struct CdpCommand {
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// Response from the browser, correlated by id
#[derive(Debug, Clone, Deserialize)]
pub struct CdpResponse {
    pub id: RequestId,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<CdpResponseError>,
}

/// Error object inside a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Unsolicited event pushed by the browser (no id)
#[derive(Debug, Clone, Deserialize)]
pub struct CdpEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

/// Inbound frame: a response if it carries an id, an event otherwise
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CdpMessage {
    Response(CdpResponse),
    Event(CdpEvent),
}

/// Target description from `Target.*` notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInfo {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
    #[serde(rename = "type")]
    pub target_type: String,
    pub title: String,
    pub url: String,
    pub attached: bool,
    #[serde(rename = "browserContextId", default)]
    pub browser_context_id: Option<String>,
}

/// Params of `Target.attachedToTarget`
#[derive(Debug, Clone, Deserialize)]
pub struct AttachedToTargetParams {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    #[serde(rename = "targetInfo")]
    pub target_info: TargetInfo,
    #[serde(rename = "waitingForDebugger", default)]
    pub waiting_for_debugger: bool,
}

/// Params of `Target.detachedFromTarget`
#[derive(Debug, Clone, Deserialize)]
pub struct DetachedFromTargetParams {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    #[serde(rename = "targetId", default)]
    pub target_id: Option<TargetId>,
}
