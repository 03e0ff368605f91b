//! Tool availability checking for device management
//!
//! Locates the external tools the device layer drives: `xcrun simctl` (iOS)
//! and `emulator`, `adb`, `avdmanager` (Android SDK).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;

/// Locations of the Android SDK tools, when found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidSdk {
    pub emulator: Option<PathBuf>,
    pub adb: Option<PathBuf>,
    pub avdmanager: Option<PathBuf>,
}

impl AndroidSdk {
    /// Look in `ANDROID_HOME`, `ANDROID_SDK_ROOT`, then `PATH`
    pub fn locate() -> Self {
        let roots = Self::sdk_roots();
        Self {
            emulator: find_tool(&roots, "emulator", &["emulator/emulator"]),
            adb: find_tool(&roots, "adb", &["platform-tools/adb"]),
            avdmanager: find_tool(
                &roots,
                "avdmanager",
                &[
                    "cmdline-tools/latest/bin/avdmanager",
                    "tools/bin/avdmanager",
                ],
            ),
        }
    }

    fn sdk_roots() -> Vec<PathBuf> {
        ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .map(PathBuf::from)
            .collect()
    }

    /// Program to run for `emulator`, falling back to a `PATH` lookup at spawn time
    pub fn emulator_program(&self) -> String {
        program_or(&self.emulator, "emulator")
    }

    pub fn adb_program(&self) -> String {
        program_or(&self.adb, "adb")
    }

    pub fn avdmanager_program(&self) -> String {
        program_or(&self.avdmanager, "avdmanager")
    }
}

fn program_or(path: &Option<PathBuf>, fallback: &str) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

fn find_tool(roots: &[PathBuf], name: &str, relative: &[&str]) -> Option<PathBuf> {
    roots
        .iter()
        .flat_map(|root| relative.iter().map(move |rel| root.join(rel)))
        .find(|candidate| candidate.is_file())
        .or_else(|| which::which(name).ok())
}

/// Availability of external tools for device management
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAvailability {
    /// Whether `xcrun simctl` is available (macOS with Xcode)
    pub xcrun_simctl: bool,

    /// Whether the Android `emulator` command ran successfully
    pub android_emulator: bool,

    pub android_sdk: AndroidSdk,
}

impl ToolAvailability {
    /// Probe the tools (run on demand; results are not cached)
    pub async fn check() -> Self {
        let xcrun_simctl = Self::check_xcrun_simctl().await;
        let android_sdk = AndroidSdk::locate();
        let android_emulator = match &android_sdk.emulator {
            Some(path) => Self::check_android_emulator(path).await,
            None => false,
        };

        Self {
            xcrun_simctl,
            android_emulator,
            android_sdk,
        }
    }

    /// Check if xcrun simctl is available
    async fn check_xcrun_simctl() -> bool {
        // Only available on macOS
        #[cfg(not(target_os = "macos"))]
        return false;

        #[cfg(target_os = "macos")]
        {
            Command::new("xcrun")
                .args(["simctl", "help"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .inspect_err(|e| tracing::debug!("xcrun simctl check failed: {}", e))
                .unwrap_or(false)
        }
    }

    async fn check_android_emulator(path: &Path) -> bool {
        Command::new(path)
            .arg("-list-avds")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .inspect_err(|e| {
                tracing::debug!("Android emulator check failed for {}: {}", path.display(), e)
            })
            .unwrap_or(false)
    }

    pub fn ios_available(&self) -> bool {
        self.xcrun_simctl
    }

    pub fn android_available(&self) -> bool {
        self.android_emulator && self.android_sdk.adb.is_some()
    }

    /// Get user-friendly message for unavailable iOS tools
    pub fn ios_unavailable_message(&self) -> Option<&'static str> {
        if self.xcrun_simctl {
            None
        } else {
            #[cfg(target_os = "macos")]
            {
                Some("Xcode not installed. Install Xcode to manage iOS simulators.")
            }

            #[cfg(not(target_os = "macos"))]
            {
                Some("iOS simulators are only available on macOS.")
            }
        }
    }

    /// Get user-friendly message for unavailable Android tools
    pub fn android_unavailable_message(&self) -> Option<&'static str> {
        if !self.android_emulator {
            Some("Android SDK not found. Set ANDROID_HOME or install Android Studio.")
        } else if self.android_sdk.adb.is_none() {
            Some("adb not found. Install the Android SDK platform-tools.")
        } else if self.android_sdk.avdmanager.is_none() {
            Some("avdmanager not found. Install the Android SDK command-line tools to create devices.")
        } else {
            None
        }
    }

    /// Per-platform summary sent to the UI
    pub fn report(&self) -> DependencyReport {
        DependencyReport {
            ios: PlatformReport {
                available: self.ios_available(),
                message: self.ios_unavailable_message(),
            },
            android: PlatformReport {
                available: self.android_available(),
                message: self.android_unavailable_message(),
            },
            tools: self.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformReport {
    pub available: bool,
    pub message: Option<&'static str>,
}

/// Result of `devices.checkDependencies`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    pub ios: PlatformReport,
    pub android: PlatformReport,
    pub tools: ToolAvailability,
}
