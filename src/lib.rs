//! React Native Preview - live device previews for React Native apps
//!
//! Library half of the `rnpreview` binary. Loads the project configuration,
//! builds the device session, and serves it to the UI process over
//! stdin/stdout.

use std::path::Path;

use rnp_app::{
    load_settings, DeviceSession, SessionConfig, Settings, SystemDeviceProvider, ToolAvailability,
};
use rnp_core::prelude::*;

/// Serve the controller over stdin/stdout until the UI closes the channel
pub async fn run_controller(project_path: &Path) -> Result<()> {
    let settings = load_settings(project_path);
    info!(
        "Project {} with {} device(s)",
        project_path.display(),
        settings.devices.len()
    );

    let provider = SystemDeviceProvider::new(settings.stream.to_binary())?;
    let session = DeviceSession::new(
        provider,
        SessionConfig::from_settings(&settings, project_path),
    );

    rnp_app::serve(rnp_bridge::stdio(), session, settings.devices).await;
    info!("Controller finished");
    Ok(())
}

/// Configured devices as pretty JSON
pub fn describe_devices(settings: &Settings) -> Result<String> {
    Ok(serde_json::to_string_pretty(&settings.devices)?)
}

/// Probe the device tooling and render the report as pretty JSON
pub async fn describe_tools() -> Result<String> {
    let report = ToolAvailability::check().await.report();
    Ok(serde_json::to_string_pretty(&report)?)
}
