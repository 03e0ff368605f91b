//! Typed client side of the remote objects
//!
//! The UI process holds an [`RpcBridge`] to the controller; these wrappers
//! turn method calls into bridge calls on the matching object.

use serde_json::{json, Value};

use rnp_bridge::{Arg, Callback, RpcBridge};
use rnp_core::prelude::*;
use rnp_core::{DeviceDescriptor, DeviceSettings, KeyDirection, TouchKind};

use crate::objects::{DEVICES_OBJECT, SESSION_OBJECT};
use crate::session::SessionSnapshot;

/// Calls on the controller's `session` object
#[derive(Debug, Clone)]
pub struct SessionProxy {
    bridge: RpcBridge,
}

impl SessionProxy {
    pub fn new(bridge: RpcBridge) -> Self {
        Self { bridge }
    }

    async fn call(&self, method: &str, args: Vec<Arg>) -> Result<Value> {
        self.bridge.call(SESSION_OBJECT, method, args).await
    }

    /// Start on a configured device; resolves with the stream URL
    pub async fn start(&self, device_id: &str) -> Result<String> {
        self.bridge
            .call_as(SESSION_OBJECT, "start", vec![json!(device_id).into()])
            .await
    }

    pub async fn select_device(
        &self,
        device_id: &str,
        settings: Option<DeviceSettings>,
    ) -> Result<String> {
        self.bridge
            .call_as(
                SESSION_OBJECT,
                "selectDevice",
                vec![json!(device_id).into(), serde_json::to_value(settings)?.into()],
            )
            .await
    }

    pub async fn restart(&self) -> Result<String> {
        self.bridge.call_as(SESSION_OBJECT, "restart", vec![]).await
    }

    pub async fn change_settings(&self, settings: DeviceSettings) -> Result<()> {
        self.call("changeSettings", vec![serde_json::to_value(settings)?.into()])
            .await?;
        Ok(())
    }

    pub async fn send_touch(&self, kind: TouchKind, x: f64, y: f64) -> Result<()> {
        let args = vec![serde_json::to_value(kind)?.into(), json!(x).into(), json!(y).into()];
        self.call("sendTouch", args).await?;
        Ok(())
    }

    pub async fn send_key(&self, code: u32, direction: KeyDirection) -> Result<()> {
        let args = vec![json!(code).into(), serde_json::to_value(direction)?.into()];
        self.call("sendKey", args).await?;
        Ok(())
    }

    pub async fn dispose(&self) -> Result<()> {
        self.call("dispose", vec![]).await?;
        Ok(())
    }

    pub async fn get_state(&self) -> Result<SessionSnapshot> {
        self.bridge.call_as(SESSION_OBJECT, "getState", vec![]).await
    }

    /// Receive every session event as one JSON argument
    pub async fn add_listener(&self, listener: Callback) -> Result<()> {
        self.call("addListener", vec![listener.into()]).await?;
        Ok(())
    }
}

/// Calls on the controller's `devices` object
#[derive(Debug, Clone)]
pub struct DevicesProxy {
    bridge: RpcBridge,
}

impl DevicesProxy {
    pub fn new(bridge: RpcBridge) -> Self {
        Self { bridge }
    }

    pub async fn list(&self) -> Result<Vec<DeviceDescriptor>> {
        self.bridge.call_as(DEVICES_OBJECT, "list", vec![]).await
    }

    /// Per-platform tool report, as JSON
    pub async fn check_dependencies(&self) -> Result<Value> {
        self.bridge
            .call(DEVICES_OBJECT, "checkDependencies", vec![])
            .await
    }
}
