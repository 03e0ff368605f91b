//! Configuration types for React Native Preview
//!
//! Defines:
//! - `Settings` - Contents of `.rnpreview/config.toml`
//! - `AppTarget` - What to install and launch on one platform
//! - Related sub-types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use rnp_core::{DeviceDescriptor, Platform};
use rnp_daemon::StreamBinary;

use super::settings::expand_home;

/// Application settings (.rnpreview/config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub app: AppSettings,

    #[serde(default)]
    pub dev_server: DevServerSettings,

    #[serde(default)]
    pub stream: StreamSettings,

    /// Devices the user can preview on
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

/// Built app bundles, per platform
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppSettings {
    #[serde(default)]
    pub ios: Option<IosAppSettings>,

    #[serde(default)]
    pub android: Option<AndroidAppSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IosAppSettings {
    /// `.app` bundle built for the simulator
    pub bundle_path: PathBuf,
    pub bundle_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AndroidAppSettings {
    pub apk_path: PathBuf,
    pub package: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DevServerSettings {
    /// Fixed packager port; an ephemeral port is allocated when unset
    #[serde(default)]
    pub port: Option<u16>,
}

/// Stream server binary location and startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamSettings {
    /// Explicit binary, skipping discovery
    #[serde(default)]
    pub binary: Option<PathBuf>,

    #[serde(default = "default_search_root")]
    pub search_root: PathBuf,

    #[serde(default = "default_binary_suffix")]
    pub binary_suffix: PathBuf,

    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            binary: None,
            search_root: default_search_root(),
            binary_suffix: default_binary_suffix(),
            start_timeout_secs: default_start_timeout_secs(),
        }
    }
}

fn default_search_root() -> PathBuf {
    PathBuf::from("~/Library/Developer/Xcode/DerivedData")
}

fn default_binary_suffix() -> PathBuf {
    PathBuf::from("Build/Products/Debug/SimulatorStreamServer")
}

fn default_start_timeout_secs() -> u64 {
    30
}

impl StreamSettings {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn to_binary(&self) -> StreamBinary {
        match &self.binary {
            Some(binary) => StreamBinary::explicit(expand_home(binary)),
            None => StreamBinary::discover(expand_home(&self.search_root), self.binary_suffix.clone()),
        }
    }
}

/// The app to install and launch on one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTarget {
    /// Bundle or APK, absolute
    pub install_path: PathBuf,
    /// Bundle identifier or package name
    pub app_id: String,
}

/// App targets for both platforms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppTargets {
    pub ios: Option<AppTarget>,
    pub android: Option<AppTarget>,
}

impl AppTargets {
    pub fn for_platform(&self, platform: Platform) -> Option<&AppTarget> {
        match platform {
            Platform::Ios => self.ios.as_ref(),
            Platform::Android => self.android.as_ref(),
        }
    }
}

impl Settings {
    /// App targets with relative paths resolved against `project_path`
    pub fn app_targets(&self, project_path: &Path) -> AppTargets {
        let resolve = |path: &Path| {
            let path = expand_home(path);
            if path.is_absolute() {
                path
            } else {
                project_path.join(path)
            }
        };

        AppTargets {
            ios: self.app.ios.as_ref().map(|ios| AppTarget {
                install_path: resolve(&ios.bundle_path),
                app_id: ios.bundle_id.clone(),
            }),
            android: self.app.android.as_ref().map(|android| AppTarget {
                install_path: resolve(&android.apk_path),
                app_id: android.package.clone(),
            }),
        }
    }

    pub fn find_device(&self, id: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.id == id)
    }
}
