//! Uniform device operations over platform tooling

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rnp_core::prelude::*;
use rnp_core::{DeviceDescriptor, DeviceSettings, ExitInfo, Platform};

use crate::avds::AndroidEmulatorDevice;
use crate::binary::StreamBinary;
use crate::process::SubprocessStream;
use crate::simulators::IosSimulatorDevice;
use crate::tool_availability::AndroidSdk;
use crate::tooling::{SystemRunner, ToolRunner};

/// Operations on one virtual device.
///
/// Each operation is independently fallible; tool failures surface as
/// [`Error::Tooling`] carrying the operation name.
#[trait_variant::make(DeviceHandle: Send)]
pub trait LocalDeviceHandle {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Make sure the device is running and return its identifier.
    ///
    /// Idempotent: a suitable running device is reused.
    async fn boot(&self) -> Result<String>;

    /// Point the installed app's JS runtime at `localhost:<port>`
    async fn configure_networking(&self, app_id: &str, port: u16) -> Result<()>;

    async fn install(&self, path: &Path) -> Result<()>;

    /// Configure networking, stop any running instance, then launch
    async fn launch(&self, app_id: &str, port: u16) -> Result<()>;

    /// Apply appearance and text size. Both are attempted; failures are
    /// reported together.
    async fn change_settings(&self, settings: &DeviceSettings) -> Result<()>;

    /// Stream server process targeting this device
    fn make_stream_handle(&self) -> Result<SubprocessStream>;
}

/// Creates device handles from descriptors
pub trait DeviceProvider: Send + Sync + 'static {
    type Device: DeviceHandle + Send + Sync + 'static;

    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Self::Device>;
}

/// A device of either platform, chosen by [`DeviceDescriptor::platform`]
#[derive(Debug)]
pub enum PlatformDevice<R = SystemRunner> {
    Ios(IosSimulatorDevice<R>),
    Android(AndroidEmulatorDevice<R>),
}

impl<R> DeviceHandle for PlatformDevice<R>
where
    R: ToolRunner + Send + Sync + 'static,
{
    fn descriptor(&self) -> &DeviceDescriptor {
        match self {
            PlatformDevice::Ios(d) => DeviceHandle::descriptor(d),
            PlatformDevice::Android(d) => DeviceHandle::descriptor(d),
        }
    }

    async fn boot(&self) -> Result<String> {
        match self {
            PlatformDevice::Ios(d) => DeviceHandle::boot(d).await,
            PlatformDevice::Android(d) => DeviceHandle::boot(d).await,
        }
    }

    async fn configure_networking(&self, app_id: &str, port: u16) -> Result<()> {
        match self {
            PlatformDevice::Ios(d) => DeviceHandle::configure_networking(d, app_id, port).await,
            PlatformDevice::Android(d) => DeviceHandle::configure_networking(d, app_id, port).await,
        }
    }

    async fn install(&self, path: &Path) -> Result<()> {
        match self {
            PlatformDevice::Ios(d) => DeviceHandle::install(d, path).await,
            PlatformDevice::Android(d) => DeviceHandle::install(d, path).await,
        }
    }

    async fn launch(&self, app_id: &str, port: u16) -> Result<()> {
        match self {
            PlatformDevice::Ios(d) => DeviceHandle::launch(d, app_id, port).await,
            PlatformDevice::Android(d) => DeviceHandle::launch(d, app_id, port).await,
        }
    }

    async fn change_settings(&self, settings: &DeviceSettings) -> Result<()> {
        match self {
            PlatformDevice::Ios(d) => DeviceHandle::change_settings(d, settings).await,
            PlatformDevice::Android(d) => DeviceHandle::change_settings(d, settings).await,
        }
    }

    fn make_stream_handle(&self) -> Result<SubprocessStream> {
        match self {
            PlatformDevice::Ios(d) => DeviceHandle::make_stream_handle(d),
            PlatformDevice::Android(d) => DeviceHandle::make_stream_handle(d),
        }
    }
}

/// Provider for real simulators and emulators
#[derive(Debug, Clone)]
pub struct SystemDeviceProvider<R = SystemRunner> {
    runner: R,
    stream: Arc<StreamBinary>,
    ios_device_set: PathBuf,
    android_sdk: AndroidSdk,
}

impl SystemDeviceProvider<SystemRunner> {
    pub fn new(stream: StreamBinary) -> Result<Self> {
        Ok(Self::with_runner(
            SystemRunner,
            stream,
            default_ios_device_set()?,
            AndroidSdk::locate(),
        ))
    }
}

impl<R: Clone> SystemDeviceProvider<R> {
    pub fn with_runner(
        runner: R,
        stream: StreamBinary,
        ios_device_set: PathBuf,
        android_sdk: AndroidSdk,
    ) -> Self {
        Self {
            runner,
            stream: Arc::new(stream),
            ios_device_set,
            android_sdk,
        }
    }
}

impl<R> DeviceProvider for SystemDeviceProvider<R>
where
    R: ToolRunner + Clone + Send + Sync + 'static,
{
    type Device = PlatformDevice<R>;

    fn create(&self, descriptor: &DeviceDescriptor) -> Result<Self::Device> {
        debug!("Creating {} device '{}'", descriptor.platform, descriptor.id);
        Ok(match descriptor.platform {
            Platform::Ios => PlatformDevice::Ios(IosSimulatorDevice::new(
                descriptor.clone(),
                self.runner.clone(),
                Arc::clone(&self.stream),
                self.ios_device_set.clone(),
            )),
            Platform::Android => PlatformDevice::Android(AndroidEmulatorDevice::new(
                descriptor.clone(),
                self.runner.clone(),
                Arc::clone(&self.stream),
                self.android_sdk.clone(),
            )),
        })
    }
}

/// `<cache>/rn-preview/Devices/iOS`
pub fn default_ios_device_set() -> Result<PathBuf> {
    let cache = dirs::cache_dir().ok_or_else(|| Error::config("No cache directory available"))?;
    Ok(cache.join("rn-preview").join("Devices").join("iOS"))
}

/// Combine the failures of independently attempted sub-operations
pub(crate) fn aggregate_failures(
    operation: &'static str,
    program: &str,
    mut errors: Vec<Error>,
) -> Result<()> {
    if errors.len() <= 1 {
        return errors.pop().map_or(Ok(()), Err);
    }

    let detail = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(Error::tooling(operation, ExitInfo::new(program, None, detail)))
}

/// Error for an operation that needs a booted device
pub(crate) fn not_booted(operation: &'static str, program: &str) -> Error {
    Error::tooling(
        operation,
        ExitInfo::new(program, None, "device has not been booted"),
    )
}
