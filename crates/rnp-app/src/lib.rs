//! rnp-app - Device session orchestration for React Native Preview
//!
//! This crate implements the device session state machine, the objects the
//! controller exposes over the RPC bridge with their client-side proxies,
//! configuration loading, and the controller wiring that ties them together.

pub mod config;
pub mod controller;
pub mod objects;
pub mod ports;
pub mod proxy;
pub mod session;

// Re-export primary types
pub use config::{load_settings, Settings};
pub use controller::{controller_objects, serve};
pub use objects::{DevicesObject, SessionObject, DEVICES_OBJECT, SESSION_OBJECT};
pub use proxy::{DevicesProxy, SessionProxy};
pub use session::{DeviceSession, SessionConfig, SessionSnapshot};

// Re-export daemon types for the binary
pub use rnp_daemon::{StreamBinary, SystemDeviceProvider, ToolAvailability};
