//! # rnp-daemon - Device Tooling and Stream Processes
//!
//! Drives virtual devices through their platform tooling and supervises the
//! frame-streaming server process.
//!
//! Depends on [`rnp_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Tool Invocation
//! - [`ToolRunner`] - Runs device-tooling commands (scriptable in tests)
//! - [`SystemRunner`] - Runs them as real child processes
//! - [`ToolAvailability`] - Check for Xcode and Android SDK tools
//!
//! ### Stream Server
//! - [`SubprocessStream`] - Spawn, read the stream URL, forward input, kill
//! - [`StreamBinary`] - Locate the server binary (explicit or newest build)
//!
//! ### Devices
//! - [`DeviceHandle`] - Boot, install, launch, settings, stream for one device
//! - [`DeviceProvider`] - Creates handles from [`rnp_core::DeviceDescriptor`]s
//! - [`PlatformDevice`] - [`IosSimulatorDevice`] or [`AndroidEmulatorDevice`]

pub mod avds;
pub mod binary;
pub mod device;
pub mod process;
pub mod simulators;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;
pub mod tooling;

pub use avds::AndroidEmulatorDevice;
pub use binary::{find_newest_binary, StreamBinary};
pub use device::{
    default_ios_device_set, DeviceHandle, DeviceProvider, PlatformDevice, SystemDeviceProvider,
};
pub use process::SubprocessStream;
pub use simulators::IosSimulatorDevice;
pub use tool_availability::{AndroidSdk, DependencyReport, ToolAvailability};
pub use tooling::{Invocation, SystemRunner, ToolOutput, ToolRunner};
