//! Loading `.rnpreview/config.toml`

use std::path::{Path, PathBuf};

use rnp_core::prelude::*;

use super::types::Settings;

pub const RNPREVIEW_DIR: &str = ".rnpreview";
pub const CONFIG_FILENAME: &str = "config.toml";

/// Load settings from `<project>/.rnpreview/config.toml`.
///
/// A missing file yields defaults; a malformed one is logged and also yields
/// defaults.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(RNPREVIEW_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Replace a leading `~` with the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
