//! Controller wiring: expose the session over a bridge and run until the
//! peer goes away

use std::sync::Arc;

use rnp_bridge::{ChannelEnd, RemoteObject, RpcBridge};
use rnp_core::prelude::*;
use rnp_core::DeviceDescriptor;
use rnp_daemon::DeviceProvider;

use crate::objects::{DevicesObject, SessionObject, DEVICES_OBJECT, SESSION_OBJECT};
use crate::session::DeviceSession;

/// The `session` and `devices` objects, ready to register on a bridge
pub fn controller_objects<P: DeviceProvider>(
    session: DeviceSession<P>,
    devices: Vec<DeviceDescriptor>,
) -> Vec<(String, Arc<dyn RemoteObject>)> {
    let devices: Arc<[DeviceDescriptor]> = devices.into();
    let session: Arc<dyn RemoteObject> = Arc::new(SessionObject::new(session, devices.clone()));
    let devices: Arc<dyn RemoteObject> = Arc::new(DevicesObject::new(devices));
    vec![
        (SESSION_OBJECT.to_string(), session),
        (DEVICES_OBJECT.to_string(), devices),
    ]
}

/// Serve the session over `channel` until the channel closes, then dispose
/// the session.
pub async fn serve<P: DeviceProvider>(
    channel: ChannelEnd,
    session: DeviceSession<P>,
    devices: Vec<DeviceDescriptor>,
) {
    info!("Serving {} configured device(s)", devices.len());
    let bridge = RpcBridge::with_objects(channel, controller_objects(session.clone(), devices));

    bridge.closed().await;
    info!("Controller channel closed, disposing session");
    session.dispose();
}
