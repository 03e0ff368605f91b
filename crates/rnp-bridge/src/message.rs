//! Cross-process message envelope
//!
//! Every message exchanged over a [`ChannelEnd`](crate::channel::ChannelEnd) is one of
//! three commands, serialized as a flat JSON object:
//!
//! ```json
//! {"command":"call","callId":3,"object":"session","method":"start","args":[{"callbackRef":1}]}
//! {"command":"callResult","callId":3,"result":{"phase":"running"}}
//! {"command":"callback","callbackId":1,"args":[{"event":"ready"}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use rnp_core::prelude::*;

/// Key of the placeholder object that stands in for a function argument
pub const CALLBACK_REF_KEY: &str = "callbackRef";

/// A single message on the channel, in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum BridgeMessage {
    /// Invoke `method` on the named remote object
    #[serde(rename_all = "camelCase")]
    Call {
        call_id: u64,
        object: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Answer to a `call`. A non-null `error` means the call was rejected.
    #[serde(rename_all = "camelCase")]
    CallResult {
        call_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },

    /// Invocation of a callback previously passed by the receiving side
    #[serde(rename_all = "camelCase")]
    Callback {
        callback_id: u64,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl BridgeMessage {
    pub fn call_result(call_id: u64, outcome: Result<Value>) -> Self {
        match outcome {
            Ok(result) => BridgeMessage::CallResult {
                call_id,
                result: Some(result),
                error: None,
            },
            Err(e) => BridgeMessage::CallResult {
                call_id,
                result: None,
                error: Some(e.to_payload()),
            },
        }
    }

    /// Parse one NDJSON line
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| Error::protocol(format!("Malformed bridge message: {}", e)))
    }

    /// Serialize to a single line (no trailing newline)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// `callId` of a line that failed to parse but is recognizably a `call`,
    /// so the peer's call can still be rejected instead of left hanging.
    pub fn malformed_call_id(line: &str) -> Option<u64> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        if value.get("command")?.as_str()? != "call" {
            return None;
        }
        value.get("callId")?.as_u64()
    }

    /// Short label for logging
    pub fn command(&self) -> &'static str {
        match self {
            BridgeMessage::Call { .. } => "call",
            BridgeMessage::CallResult { .. } => "callResult",
            BridgeMessage::Callback { .. } => "callback",
        }
    }
}

/// Build the wire placeholder for a callback
pub fn callback_marker(callback_id: u64) -> Value {
    json!({ CALLBACK_REF_KEY: callback_id })
}

/// Recognize a callback placeholder.
///
/// Only an object whose single key is `callbackRef` with an unsigned integer
/// value counts; anything else is an ordinary value.
pub fn parse_callback_marker(value: &Value) -> Option<u64> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get(CALLBACK_REF_KEY)?.as_u64()
}
