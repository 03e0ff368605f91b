//! iOS simulators driven through `xcrun simctl`
//!
//! Simulators live in a private device set so they never clash with the
//! user's own Xcode simulators. Every `simctl` invocation passes `--set`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use rnp_core::prelude::*;
use rnp_core::{DeviceDescriptor, DeviceSettings};

use crate::binary::StreamBinary;
use crate::device::{aggregate_failures, not_booted, DeviceHandle};
use crate::process::SubprocessStream;
use crate::tooling::{parse_tool_json, run_checked, Invocation, ToolRunner};

const XCRUN: &str = "xcrun";
const PLIST_BUDDY: &str = "/usr/libexec/PlistBuddy";

/// User-defaults key React Native reads the packager location from
const JS_LOCATION_KEY: &str = "RCT_jsLocation";

// ─────────────────────────────────────────────────────────────────
// simctl JSON output
// ─────────────────────────────────────────────────────────────────

/// `simctl list devices --json`
#[derive(Debug, Deserialize)]
struct SimctlDevices {
    devices: HashMap<String, Vec<SimctlDevice>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimctlDevice {
    udid: String,
    name: String,
    state: String,
    #[serde(default)]
    is_available: Option<bool>,
}

impl SimctlDevice {
    fn is_booted(&self) -> bool {
        self.state.eq_ignore_ascii_case("booted")
    }
}

/// `simctl list runtimes --json`
#[derive(Debug, Deserialize)]
struct SimctlRuntimes {
    runtimes: Vec<SimctlRuntime>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimctlRuntime {
    identifier: String,
    version: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    is_available: bool,
}

impl SimctlRuntime {
    fn is_ios(&self) -> bool {
        match &self.platform {
            Some(platform) => platform == "iOS",
            None => self.identifier.contains(".iOS-"),
        }
    }
}

/// `simctl list devicetypes --json`
#[derive(Debug, Deserialize)]
struct SimctlDeviceTypes {
    devicetypes: Vec<SimctlDeviceType>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimctlDeviceType {
    identifier: String,
    name: String,
    #[serde(default)]
    product_family: String,
    #[serde(default)]
    min_runtime_version: u32,
    #[serde(default)]
    max_runtime_version: Option<u32>,
}

/// Compare dotted version strings numerically ("17.10" > "17.2")
pub fn parse_version(version: &str) -> Vec<u32> {
    version
        .split('.')
        .map(|part| part.trim().parse().unwrap_or(0))
        .collect()
}

/// Version in simctl's packed form: `major << 16 | minor << 8 | patch`
fn packed_version(version: &[u32]) -> u32 {
    let part = |i: usize| version.get(i).copied().unwrap_or(0).min(0xff);
    (version.first().copied().unwrap_or(0) << 16) | (part(1) << 8) | part(2)
}

fn newest_runtime(runtimes: Vec<SimctlRuntime>) -> Option<SimctlRuntime> {
    runtimes
        .into_iter()
        .filter(|r| r.is_available && r.is_ios())
        .max_by(|a, b| parse_version(&a.version).cmp(&parse_version(&b.version)))
}

/// iPhone profile with the highest minimum runtime the chosen runtime supports
fn default_device_type(
    device_types: Vec<SimctlDeviceType>,
    runtime_version: &[u32],
) -> Option<SimctlDeviceType> {
    let packed = packed_version(runtime_version);
    device_types
        .into_iter()
        .filter(|t| t.product_family == "iPhone")
        .filter(|t| t.min_runtime_version <= packed)
        .filter(|t| t.max_runtime_version.map_or(true, |max| packed <= max))
        .max_by_key(|t| t.min_runtime_version)
}

// ─────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────

/// An iOS simulator in the private device set
#[derive(Debug)]
pub struct IosSimulatorDevice<R> {
    descriptor: DeviceDescriptor,
    runner: R,
    stream: Arc<StreamBinary>,
    device_set: PathBuf,
    udid: Mutex<Option<String>>,
    /// Serializes boots so overlapping requests cannot create two simulators
    boot_lock: tokio::sync::Mutex<()>,
}

impl<R> IosSimulatorDevice<R>
where
    R: ToolRunner + Send + Sync + 'static,
{
    pub fn new(
        descriptor: DeviceDescriptor,
        runner: R,
        stream: Arc<StreamBinary>,
        device_set: PathBuf,
    ) -> Self {
        Self {
            descriptor,
            runner,
            stream,
            device_set,
            udid: Mutex::new(None),
            boot_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn device_set(&self) -> &Path {
        &self.device_set
    }

    /// Identifier of the booted simulator
    pub fn udid(&self) -> Option<String> {
        self.udid.lock().ok().and_then(|udid| udid.clone())
    }

    fn require_udid(&self, operation: &'static str) -> Result<String> {
        self.udid().ok_or_else(|| not_booted(operation, XCRUN))
    }

    fn simctl<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut full = vec![
            "simctl".to_string(),
            "--set".to_string(),
            self.device_set.display().to_string(),
        ];
        full.extend(args.into_iter().map(Into::into));
        Invocation::new(XCRUN, full)
    }

    async fn list_devices(&self) -> Result<Vec<SimctlDevice>> {
        let stdout = run_checked(&self.runner, "boot", self.simctl(["list", "devices", "--json"]))
            .await?;
        let parsed: SimctlDevices = parse_tool_json("boot", XCRUN, &stdout)?;
        Ok(parsed
            .devices
            .into_values()
            .flatten()
            .filter(|d| d.is_available.unwrap_or(true))
            .collect())
    }

    async fn already_booted(&self, udid: &str) -> bool {
        match self.list_devices().await {
            Ok(devices) => devices.iter().any(|d| d.udid == udid && d.is_booted()),
            Err(e) => {
                debug!("Could not re-list simulators: {}", e);
                false
            }
        }
    }

    async fn create_simulator(&self) -> Result<String> {
        let stdout = run_checked(
            &self.runner,
            "boot",
            Invocation::new(XCRUN, ["simctl", "list", "runtimes", "--json"]),
        )
        .await?;
        let runtimes: SimctlRuntimes = parse_tool_json("boot", XCRUN, &stdout)?;

        let runtime = match &self.descriptor.runtime {
            Some(wanted) => runtimes
                .runtimes
                .into_iter()
                .find(|r| &r.identifier == wanted)
                .ok_or_else(|| not_available("boot", format!("runtime {} is not installed", wanted)))?,
            None => newest_runtime(runtimes.runtimes)
                .ok_or_else(|| not_available("boot", "no available iOS runtime"))?,
        };

        let stdout = run_checked(
            &self.runner,
            "boot",
            Invocation::new(XCRUN, ["simctl", "list", "devicetypes", "--json"]),
        )
        .await?;
        let types: SimctlDeviceTypes = parse_tool_json("boot", XCRUN, &stdout)?;
        let device_type = default_device_type(types.devicetypes, &parse_version(&runtime.version))
            .ok_or_else(|| {
                not_available("boot", format!("no iPhone profile supports {}", runtime.name))
            })?;

        info!(
            "Creating simulator '{}' ({}, {})",
            self.descriptor.name, device_type.name, runtime.identifier
        );
        let udid = run_checked(
            &self.runner,
            "boot",
            self.simctl([
                "create",
                self.descriptor.name.as_str(),
                device_type.identifier.as_str(),
                runtime.identifier.as_str(),
            ]),
        )
        .await?;

        let udid = udid.trim().to_string();
        if udid.is_empty() {
            return Err(not_available("boot", "simctl create printed no device id"));
        }
        Ok(udid)
    }

    fn remember(&self, udid: &str) {
        if let Ok(mut slot) = self.udid.lock() {
            *slot = Some(udid.to_string());
        }
    }

    async fn set_js_location(&self, plist: &Path, port: u16) -> Result<()> {
        let plist = plist.display().to_string();
        let location = format!("localhost:{}", port);

        let existing = self
            .runner
            .run(&Invocation::new(
                PLIST_BUDDY,
                ["-c", &format!("Print :{}", JS_LOCATION_KEY), &plist],
            ))
            .await;

        let command = match existing {
            Ok(output) if output.is_success() => {
                debug!("Updating {} in {}", JS_LOCATION_KEY, plist);
                format!("Set :{} {}", JS_LOCATION_KEY, location)
            }
            _ => {
                debug!("Adding {} to {}", JS_LOCATION_KEY, plist);
                format!("Add :{} string {}", JS_LOCATION_KEY, location)
            }
        };

        run_checked(
            &self.runner,
            "configure networking",
            Invocation::new(PLIST_BUDDY, ["-c", command.as_str(), plist.as_str()]),
        )
        .await?;
        Ok(())
    }
}

fn not_available(operation: &'static str, detail: impl Into<String>) -> Error {
    Error::tooling(operation, rnp_core::ExitInfo::new(XCRUN, Some(0), detail))
}

impl<R> DeviceHandle for IosSimulatorDevice<R>
where
    R: ToolRunner + Send + Sync + 'static,
{
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    async fn boot(&self) -> Result<String> {
        let _guard = self.boot_lock.lock().await;

        tokio::fs::create_dir_all(&self.device_set).await?;

        let existing = self
            .list_devices()
            .await?
            .into_iter()
            .find(|d| d.name == self.descriptor.name);

        let udid = match existing {
            Some(device) if device.is_booted() => {
                debug!("Reusing booted simulator {}", device.udid);
                self.remember(&device.udid);
                return Ok(device.udid);
            }
            Some(device) => device.udid,
            None => self.create_simulator().await?,
        };

        info!("Booting simulator {}", udid);
        if let Err(e) = run_checked(&self.runner, "boot", self.simctl(["boot", udid.as_str()])).await {
            // Booted between the listing and the boot call
            if !self.already_booted(&udid).await {
                return Err(e);
            }
            debug!("Simulator {} was already booted", udid);
        }

        self.remember(&udid);
        Ok(udid)
    }

    async fn configure_networking(&self, app_id: &str, port: u16) -> Result<()> {
        let udid = self.require_udid("configure networking")?;
        let container = run_checked(
            &self.runner,
            "configure networking",
            self.simctl(["get_app_container", udid.as_str(), app_id, "data"]),
        )
        .await?;

        let plist = Path::new(container.trim())
            .join("Library")
            .join("Preferences")
            .join(format!("{}.plist", app_id));

        self.set_js_location(&plist, port).await
    }

    async fn install(&self, path: &Path) -> Result<()> {
        let udid = self.require_udid("install")?;
        info!("Installing {} on {}", path.display(), udid);
        run_checked(
            &self.runner,
            "install",
            self.simctl([
                "install".to_string(),
                udid,
                path.display().to_string(),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn launch(&self, app_id: &str, port: u16) -> Result<()> {
        let udid = self.require_udid("launch")?;
        self.configure_networking(app_id, port).await?;

        info!("Launching {} on {}", app_id, udid);
        run_checked(
            &self.runner,
            "launch",
            self.simctl(["launch", "--terminate-running-process", udid.as_str(), app_id]),
        )
        .await?;
        Ok(())
    }

    async fn change_settings(&self, settings: &DeviceSettings) -> Result<()> {
        let udid = self.require_udid("change settings")?;
        let mut errors = Vec::new();

        if let Err(e) = run_checked(
            &self.runner,
            "set appearance",
            self.simctl(["ui", udid.as_str(), "appearance", settings.appearance.as_str()]),
        )
        .await
        {
            errors.push(e);
        }

        if let Err(e) = run_checked(
            &self.runner,
            "set content size",
            self.simctl([
                "ui",
                udid.as_str(),
                "content_size",
                settings.content_size.simctl_name(),
            ]),
        )
        .await
        {
            errors.push(e);
        }

        aggregate_failures("change settings", XCRUN, errors)
    }

    fn make_stream_handle(&self) -> Result<SubprocessStream> {
        let udid = self.require_udid("make stream")?;
        let binary = self.stream.resolve()?;
        Ok(SubprocessStream::new(
            binary,
            ["ios".to_string(), udid, self.device_set.display().to_string()],
        ))
    }
}
