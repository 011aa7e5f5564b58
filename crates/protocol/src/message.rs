//! Protocol message envelopes.
//!
//! Every frame on the wire carries exactly one of these shapes:
//!
//! - [`Request`] - outbound call with a correlation id
//! - [`Response`] - inbound reply carrying `result` or `error` for one id
//! - [`Event`] - unsolicited inbound message addressed to a guid, with no id
//!
//! Field names here are plain snake_case; the transport rewrites keys to the
//! driver's camelCase convention on the way out and back on the way in, so
//! nothing in this module needs `#[serde(rename)]`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to every outbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Unix timestamp in milliseconds.
    pub wall_time: i64,
    /// Whether this is an internal call (not user-facing API).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<bool>,
    /// Source location where the API was called.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Optional title for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Source code location for a protocol call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i32>,
}

impl Metadata {
    /// Creates minimal metadata with the current timestamp.
    pub fn now() -> Self {
        Self {
            wall_time: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
            internal: Some(false),
            location: None,
            title: None,
        }
    }
}

/// Outbound call sent to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, unique per in-flight call, process-wide monotonic.
    pub id: u32,
    /// Guid of the target remote object. `""` addresses the root.
    #[serde(
        serialize_with = "serialize_arc_str",
        deserialize_with = "deserialize_arc_str"
    )]
    pub guid: Arc<str>,
    /// Remote operation name.
    pub method: String,
    /// Named arguments. Always contains `timeout` (milliseconds).
    pub params: Value,
    /// Timing and location metadata.
    pub metadata: Metadata,
}

/// Serde helper for `Arc<str>` fields.
pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(arc)
}

/// Serde helper for `Arc<str>` fields.
pub fn deserialize_arc_str<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    Ok(Arc::from(s.as_str()))
}

/// Reply from the driver correlating to exactly one prior [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request id this response answers.
    pub id: u32,
    /// Success result (mutually exclusive with `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error result (mutually exclusive with `result`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorWrapper>,
}

/// Wrapper matching the driver's nested error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
    pub error: ErrorPayload,
}

/// Error details reported by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
    /// Error type name (e.g., "TimeoutError").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Driver-side stack trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Unsolicited message from the driver, addressed by guid.
///
/// Lifecycle events use `method = "create"` (params carry the new object's
/// guid and initializer; the envelope guid is the parent) and
/// `method = "dispose"` (the envelope guid is the object being destroyed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(
        serialize_with = "serialize_arc_str",
        deserialize_with = "deserialize_arc_str"
    )]
    pub guid: Arc<str>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Discriminated union over inbound protocol messages.
///
/// Serde tries variants in order: anything with an `id` is a [`Response`],
/// anything with a `guid` and `method` but no id is an [`Event`], and the
/// catch-all keeps unknown shapes from killing the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Response(Response),
    Event(Event),
    Unknown(Value),
}
