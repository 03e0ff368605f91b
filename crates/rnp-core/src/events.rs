//! Lifecycle events emitted by a device session

use serde::Serialize;

use crate::types::{FailurePhase, SessionPhase};

/// Events broadcast by a device session to its observers.
///
/// Serialized with an `event` tag so the UI side can switch on it directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },

    /// The app is running and its screen is being streamed
    #[serde(rename_all = "camelCase")]
    Ready {
        device_id: String,
        stream_url: String,
    },

    /// A step of the start sequence failed; the session is now in `Error`
    #[serde(rename_all = "camelCase")]
    Failed {
        phase: FailurePhase,
        /// Platform of the failing device, so the UI can show remediation hints
        platform: Option<crate::types::Platform>,
        message: String,
    },

    Disposed,
}

impl SessionEvent {
    /// Short label for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "phase_changed",
            Self::Ready { .. } => "ready",
            Self::Failed { .. } => "failed",
            Self::Disposed => "disposed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;
    use serde_json::json;

    #[test]
    fn test_ready_event_serialization() {
        let event = SessionEvent::Ready {
            device_id: "phone-1".to_string(),
            stream_url: "http://localhost:4000/stream".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "ready",
                "deviceId": "phone-1",
                "streamUrl": "http://localhost:4000/stream",
            })
        );
    }

    #[test]
    fn test_failed_event_carries_phase() {
        let event = SessionEvent::Failed {
            phase: FailurePhase::Install,
            platform: Some(Platform::Android),
            message: "install failed".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "failed");
        assert_eq!(value["phase"], "install");
        assert_eq!(value["platform"], "android");
    }

    #[test]
    fn test_phase_changed_serialization() {
        let event = SessionEvent::PhaseChanged {
            from: SessionPhase::Idle,
            to: SessionPhase::Booting,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"event": "phaseChanged", "from": "idle", "to": "booting"}));
        assert_eq!(event.event_type(), "phase_changed");
        assert_eq!(SessionEvent::Disposed.event_type(), "disposed");
    }
}
