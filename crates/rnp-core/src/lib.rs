//! # rnp-core - Core Domain Types
//!
//! Foundation crate for React Native Preview. Provides domain types, the error
//! taxonomy, session events, and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`DeviceDescriptor`] - Declarative description of a virtual device
//! - [`Platform`] - iOS or Android
//! - [`DeviceSettings`] - Appearance and text size applied to a device
//! - [`SessionPhase`] - Lifecycle phase of a device session
//! - [`InputCommand`] - Touch and key commands for the stream server
//!
//! ### Events (`events`)
//! - [`SessionEvent`] - Phase changes, ready, failure, disposal
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum with structured payloads for the peer
//! - [`ExitInfo`] - How a device-tooling invocation ended
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//!
//! ## Prelude
//!
//! ```rust
//! use rnp_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all React Native Preview crates
pub mod prelude {
    pub use super::error::{Error, Result};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, ExitInfo, Result};
pub use events::SessionEvent;
pub use types::{
    Appearance, ContentSize, DeviceDescriptor, DeviceSettings, FailurePhase, InputCommand,
    KeyDirection, Platform, SessionPhase, TouchKind,
};
