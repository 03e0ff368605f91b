//! Objects the controller exposes to the UI over the bridge
//!
//! - `session` ([`SessionObject`]) - intents, input, state, event listeners
//! - `devices` ([`DevicesObject`]) - configured devices, tool diagnostics

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures_util::future::{self, FutureExt};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use rnp_bridge::{unknown_method, Args, CallFuture, Callback, CallbackIdentity, RemoteObject};
use rnp_core::prelude::*;
use rnp_core::{DeviceDescriptor, DeviceSettings, KeyDirection, SessionEvent, TouchKind};
use rnp_daemon::{DeviceProvider, ToolAvailability};

use crate::session::DeviceSession;

pub const SESSION_OBJECT: &str = "session";
pub const DEVICES_OBJECT: &str = "devices";

/// Resolves a result right away, for methods whose work is synchronous
fn ready(result: Result<Value>) -> CallFuture {
    future::ready(result).boxed()
}

fn find_device(devices: &[DeviceDescriptor], id: &str) -> Result<DeviceDescriptor> {
    devices
        .iter()
        .find(|d| d.id == id)
        .cloned()
        .ok_or_else(|| Error::config(format!("Unknown device '{}'", id)))
}

// ─────────────────────────────────────────────────────────────────
// session
// ─────────────────────────────────────────────────────────────────

/// The `session` object.
///
/// Intents start their sequence inside `dispatch`, so calls take effect in
/// the order the peer sent them even though their results arrive later.
pub struct SessionObject<P: DeviceProvider> {
    session: DeviceSession<P>,
    devices: Arc<[DeviceDescriptor]>,
    listeners: Listeners,
}

/// Identities of the callbacks currently receiving events
type Listeners = Arc<Mutex<HashSet<CallbackIdentity>>>;

impl<P: DeviceProvider> SessionObject<P> {
    pub fn new(session: DeviceSession<P>, devices: Arc<[DeviceDescriptor]>) -> Self {
        Self {
            session,
            devices,
            listeners: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn start(&self, args: &Args) -> CallFuture {
        let descriptor = match args
            .value::<String>(0, "deviceId")
            .and_then(|id| find_device(&self.devices, &id))
        {
            Ok(descriptor) => descriptor,
            Err(e) => return ready(Err(e)),
        };
        self.session.start(descriptor).map(|r| r.map(Value::String)).boxed()
    }

    fn select_device(&self, args: &Args) -> CallFuture {
        let selection = args
            .value::<String>(0, "deviceId")
            .and_then(|id| find_device(&self.devices, &id))
            .and_then(|descriptor| {
                let settings = args.value_or_default::<Option<DeviceSettings>>(1, "settings")?;
                Ok((descriptor, settings))
            });
        match selection {
            Ok((descriptor, settings)) => self
                .session
                .select_device(descriptor, settings)
                .map(|r| r.map(Value::String))
                .boxed(),
            Err(e) => ready(Err(e)),
        }
    }

    fn change_settings(&self, args: &Args) -> CallFuture {
        match args.value::<DeviceSettings>(0, "settings") {
            Ok(settings) => self
                .session
                .change_settings(settings)
                .map(|r| r.map(|()| Value::Null))
                .boxed(),
            Err(e) => ready(Err(e)),
        }
    }

    fn send_touch(&self, args: &Args) -> Result<Value> {
        let kind: TouchKind = args.value(0, "kind")?;
        let x: f64 = args.value(1, "x")?;
        let y: f64 = args.value(2, "y")?;
        self.session.send_touch(kind, x, y)?;
        Ok(Value::Null)
    }

    fn send_key(&self, args: &Args) -> Result<Value> {
        let code: u32 = args.value(0, "keyCode")?;
        let direction: KeyDirection = args.value(1, "direction")?;
        self.session.send_key(code, direction)?;
        Ok(Value::Null)
    }

    /// Forward every session event to `listener` until the session goes away.
    ///
    /// Adding the same callback again is a no-op while it is still being
    /// forwarded to.
    fn add_listener(&self, args: &Args) -> Result<Value> {
        let listener = args.callback(0, "listener")?;
        {
            let mut listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
            if !listeners.insert(listener.identity()) {
                debug!("Listener already registered");
                return Ok(Value::Null);
            }
        }

        let events = self.session.subscribe();
        tokio::spawn(forward_events(events, listener, self.listeners.clone()));
        Ok(Value::Null)
    }

    fn state(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.session.snapshot())?)
    }
}

/// Runs until `Disposed` or the session is dropped, then forgets `listener`.
/// Dropping the last handle lets the bridge evict its stub.
async fn forward_events(
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    listener: Callback,
    listeners: Listeners,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let last = matches!(event, SessionEvent::Disposed);
                match serde_json::to_value(&event) {
                    Ok(value) => listener.invoke(vec![value]),
                    Err(e) => warn!("Failed to serialize {} event: {}", event.event_type(), e),
                }
                if last {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Listener lagged, {} session event(s) dropped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    listeners
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .remove(&listener.identity());
    trace!("Listener forwarding ended");
}

impl<P: DeviceProvider> RemoteObject for SessionObject<P> {
    fn dispatch(&self, method: &str, args: Args) -> CallFuture {
        match method {
            "start" => self.start(&args),
            "selectDevice" => self.select_device(&args),
            "restart" => self
                .session
                .restart()
                .map(|r| r.map(Value::String))
                .boxed(),
            "changeSettings" => self.change_settings(&args),
            "sendTouch" => ready(self.send_touch(&args)),
            "sendKey" => ready(self.send_key(&args)),
            "dispose" => {
                self.session.dispose();
                ready(Ok(Value::Null))
            }
            "getState" => ready(self.state()),
            "addListener" => ready(self.add_listener(&args)),
            _ => ready(Err(unknown_method(SESSION_OBJECT, method))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// devices
// ─────────────────────────────────────────────────────────────────

/// The `devices` object
pub struct DevicesObject {
    devices: Arc<[DeviceDescriptor]>,
}

impl DevicesObject {
    pub fn new(devices: Arc<[DeviceDescriptor]>) -> Self {
        Self { devices }
    }
}

impl RemoteObject for DevicesObject {
    fn dispatch(&self, method: &str, _args: Args) -> CallFuture {
        match method {
            "list" => ready(serde_json::to_value(&*self.devices).map_err(Error::from)),
            "checkDependencies" => async {
                let report = ToolAvailability::check().await.report();
                serde_json::to_value(report).map_err(Error::from)
            }
            .boxed(),
            _ => ready(Err(unknown_method(DEVICES_OBJECT, method))),
        }
    }
}
