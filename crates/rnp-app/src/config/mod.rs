//! Configuration file parsing for React Native Preview
//!
//! Supports `.rnpreview/config.toml` in the project directory.

pub mod settings;
pub mod types;

pub use settings::{expand_home, load_settings, CONFIG_FILENAME, RNPREVIEW_DIR};
pub use types::*;
