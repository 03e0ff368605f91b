//! Application error types with rich context

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::types::SessionPhase;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// What a failed device-tooling invocation looked like when it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// Program that was run (e.g. `xcrun`)
    pub program: String,
    /// Exit code, `None` when the process could not be spawned or was killed
    pub code: Option<i32>,
    /// Trimmed stderr, or a description of why the output was unusable
    pub detail: String,
}

impl ExitInfo {
    pub fn new(program: impl Into<String>, code: Option<i32>, detail: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            code,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} exited with code {}", self.program, code)?,
            None => write!(f, "{} did not exit normally", self.program)?,
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timed out: {message}")]
    Timeout { message: String },

    // ─────────────────────────────────────────────────────────────
    // Bridge/Channel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed")]
    ChannelClosed,

    /// The remote side answered a call with an error payload.
    /// The payload is kept exactly as it was received.
    #[error("Remote call rejected: {payload}")]
    CallRejected { payload: Value },

    #[error("No pending entry for id {id}")]
    UnknownCorrelation { id: u64 },

    #[error("Bridge protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Device Tooling Errors
    // ─────────────────────────────────────────────────────────────
    #[error("{operation} failed: {exit}")]
    Tooling {
        operation: &'static str,
        exit: ExitInfo,
    },

    #[error("Stream binary not found under {searched}")]
    BinaryNotFound { searched: PathBuf },

    #[error("Failed to spawn {program}: {reason}")]
    ProcessSpawn { program: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Cannot {operation} while session is {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: SessionPhase,
    },

    #[error("Superseded by a newer session request")]
    Superseded,

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn tooling(operation: &'static str, exit: ExitInfo) -> Self {
        Self::Tooling { operation, exit }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn invalid_state(operation: &'static str, state: SessionPhase) -> Self {
        Self::InvalidStateTransition { operation, state }
    }

    /// Name of the tooling operation that failed, if this is a tooling error.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Error::Tooling { operation, .. } => Some(operation),
            _ => None,
        }
    }

    /// Stable camelCase name of the variant, as sent to the peer
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Timeout { .. } => "timeout",
            Error::ChannelClosed => "channelClosed",
            Error::CallRejected { .. } => "callRejected",
            Error::UnknownCorrelation { .. } => "unknownCorrelation",
            Error::Protocol { .. } => "protocol",
            Error::Tooling { .. } => "tooling",
            Error::BinaryNotFound { .. } => "binaryNotFound",
            Error::ProcessSpawn { .. } => "processSpawn",
            Error::InvalidStateTransition { .. } => "invalidStateTransition",
            Error::Superseded => "superseded",
            Error::Config { .. } => "config",
        }
    }

    /// Convert this error into the JSON payload sent in a `callResult`.
    ///
    /// A rejection received from the peer is forwarded unchanged. Anything
    /// else becomes an object with `kind`, `message` and `recoverable`, plus
    /// the variant's own fields, so the peer never has to match on text:
    ///
    /// ```json
    /// {"kind":"invalidStateTransition","message":"Cannot send touch while session is booting",
    ///  "recoverable":true,"operation":"send touch","state":"booting"}
    /// ```
    pub fn to_payload(&self) -> Value {
        let details = match self {
            Error::CallRejected { payload } => return payload.clone(),
            Error::Tooling { operation, exit } => json!({
                "operation": operation,
                "exit": exit,
            }),
            Error::InvalidStateTransition { operation, state } => json!({
                "operation": operation,
                "state": state,
            }),
            Error::BinaryNotFound { searched } => json!({
                "searched": searched.display().to_string(),
            }),
            Error::ProcessSpawn { program, .. } => json!({ "program": program }),
            _ => Value::Null,
        };

        let mut payload = json!({
            "kind": self.kind(),
            "message": self.to_string(),
            "recoverable": self.is_recoverable(),
        });
        if let (Some(fields), Value::Object(details)) = (payload.as_object_mut(), details) {
            fields.extend(details);
        }
        payload
    }

    /// Errors the peer can get past by retrying or issuing another intent
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Tooling { .. }
                | Error::Timeout { .. }
                | Error::CallRejected { .. }
                | Error::UnknownCorrelation { .. }
                | Error::InvalidStateTransition { .. }
                | Error::Superseded
                | Error::Config { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tooling_error_display_names_operation() {
        let err = Error::tooling(
            "install",
            ExitInfo::new("xcrun", Some(149), "No such file or directory"),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("install failed"));
        assert!(msg.contains("xcrun exited with code 149"));
        assert!(msg.contains("No such file"));
        assert_eq!(err.operation(), Some("install"));
    }

    #[test]
    fn test_exit_info_without_code() {
        let exit = ExitInfo::new("adb", None, "");
        assert_eq!(exit.to_string(), "adb did not exit normally");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_call_rejected_payload_is_verbatim() {
        let payload = json!({"code": 7, "message": "nope"});
        let err = Error::CallRejected {
            payload: payload.clone(),
        };
        assert_eq!(err.to_payload(), payload);
    }

    #[test]
    fn test_invalid_state_payload_is_structured() {
        let err = Error::invalid_state("send touch", SessionPhase::Booting);
        assert_eq!(
            err.to_payload(),
            json!({
                "kind": "invalidStateTransition",
                "message": "Cannot send touch while session is booting",
                "recoverable": true,
                "operation": "send touch",
                "state": "booting",
            })
        );
    }

    #[test]
    fn test_tooling_payload_carries_exit() {
        let err = Error::tooling("boot", ExitInfo::new("xcrun", Some(164), "Invalid device"));
        let payload = err.to_payload();
        assert_eq!(payload["kind"], "tooling");
        assert_eq!(payload["operation"], "boot");
        assert_eq!(
            payload["exit"],
            json!({"program": "xcrun", "code": 164, "detail": "Invalid device"})
        );
    }

    #[test]
    fn test_payload_kinds_distinguish_errors() {
        let not_found = Error::BinaryNotFound {
            searched: PathBuf::from("/builds"),
        }
        .to_payload();
        assert_eq!(not_found["kind"], "binaryNotFound");
        assert_eq!(not_found["searched"], "/builds");
        assert_eq!(not_found["recoverable"], false);

        let superseded = Error::Superseded.to_payload();
        assert_eq!(superseded["kind"], "superseded");
        assert_eq!(superseded["recoverable"], true);

        assert_eq!(Error::ChannelClosed.to_payload()["kind"], "channelClosed");
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::Superseded.is_recoverable());
        assert!(Error::UnknownCorrelation { id: 4 }.is_recoverable());
        assert!(Error::invalid_state("restart", SessionPhase::Disposed).is_recoverable());
        assert!(!Error::ChannelClosed.is_recoverable());
    }
}
