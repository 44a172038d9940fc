//! JSON frame parsing and reply builders.
//!
//! Inbound frames are freely typed: they parse into a loose
//! string-to-value map, the dispatch switch keys off a
//! case-insensitive `messageType`, and each handler narrows its own
//! fields with explicit type and length checks. Unknown keys are
//! ignored.

use crate::error::ProtoError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Maximum accepted length for UAIDs and channel ids off the wire.
pub const MAX_ID_LEN: usize = 100;

/// A versioned signal for one channel. The `version` is strictly
/// monotonically increasing per channel; no payload is carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    #[serde(rename = "channelID")]
    pub channel_id: String,
    pub version: i64,
}

/// Loose inbound frame representation.
pub type Frame = Map<String, Value>;

/// Parse an inbound text frame. Anything that is not a JSON object is
/// unusable and terminates the session upstream.
pub fn parse(text: &str) -> Result<Frame, ProtoError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ProtoError::InvalidData),
    }
}

/// Extract the lowercased `messageType`. An empty frame is a ping;
/// a frame without the key (or with a non-string value) yields `None`
/// and is answered with `UnknownCommand`.
pub fn message_type(frame: &Frame) -> Option<String> {
    if frame.is_empty() {
        return Some("ping".to_string());
    }
    frame
        .get("messageType")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
}

/// Narrow a string field, tolerating absence.
pub fn str_field<'f>(frame: &'f Frame, key: &str) -> Option<&'f str> {
    frame.get(key).and_then(Value::as_str)
}

pub fn hello_reply(status: u16, uaid: &str) -> String {
    json!({"messageType": "hello", "status": status, "uaid": uaid}).to_string()
}

pub fn redirect_reply(status: u16, redirect: &str, uaid: &str) -> String {
    json!({"messageType": "hello", "status": status, "redirect": redirect, "uaid": uaid})
        .to_string()
}

pub fn register_reply(uaid: &str, channel_id: &str, endpoint: &str) -> String {
    json!({
        "messageType": "register",
        "status": 200,
        "uaid": uaid,
        "channelID": channel_id,
        "pushEndpoint": endpoint,
    })
    .to_string()
}

pub fn unregister_reply(channel_id: &str) -> String {
    json!({"messageType": "unregister", "status": 200, "channelID": channel_id}).to_string()
}

/// Notification envelope. `expired` is only present when non-empty.
pub fn notification(updates: &[Update], expired: &[String]) -> String {
    let mut frame = json!({"messageType": "notification", "updates": updates});
    if !expired.is_empty() {
        frame["expired"] = json!(expired);
    }
    frame.to_string()
}

/// Server ping reply: a full frame for deployments that want long
/// pongs, the two-byte object otherwise.
pub fn ping_reply(long_pong: bool) -> String {
    if long_pong {
        json!({"messageType": "ping", "status": 200}).to_string()
    } else {
        "{}".to_string()
    }
}

pub fn purge_reply() -> String {
    "{}".to_string()
}

/// Error frame echoing the (lowercased) command that failed.
pub fn error_reply(message_type: &str, err: ProtoError) -> String {
    json!({
        "messageType": message_type,
        "status": err.status(),
        "error": err.to_string(),
    })
    .to_string()
}
