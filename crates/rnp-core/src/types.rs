//! Domain types shared by the bridge, the device layer, and the session

use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────────────

/// Platform a virtual device runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "iOS")]
    Ios,
    #[serde(alias = "Android")]
    Android,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ios => write!(f, "iOS"),
            Platform::Android => write!(f, "Android"),
        }
    }
}

/// Declarative description of a virtual device the user can preview on.
///
/// Descriptors come from configuration and are never mutated by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub id: String,
    pub platform: Platform,
    pub name: String,
    /// iOS runtime identifier or Android system image package
    #[serde(default)]
    pub runtime: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, platform: Platform, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            platform,
            name: name.into(),
            runtime: None,
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }
}

/// Light or dark system appearance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Appearance {
    #[default]
    Light,
    Dark,
}

impl Appearance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Appearance::Light => "light",
            Appearance::Dark => "dark",
        }
    }
}

/// Accessibility text size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSize {
    Xsmall,
    Small,
    #[default]
    Normal,
    Large,
    Xlarge,
    Xxlarge,
    Xxxlarge,
}

impl ContentSize {
    /// Name understood by `simctl ui <udid> content_size`
    pub fn simctl_name(&self) -> &'static str {
        match self {
            ContentSize::Xsmall => "extra-small",
            ContentSize::Small => "small",
            ContentSize::Normal => "medium",
            ContentSize::Large => "large",
            ContentSize::Xlarge => "extra-large",
            ContentSize::Xxlarge => "extra-extra-large",
            ContentSize::Xxxlarge => "extra-extra-extra-large",
        }
    }

    /// Value for Android's `font_scale` system setting
    pub fn font_scale(&self) -> f32 {
        match self {
            ContentSize::Xsmall => 0.85,
            ContentSize::Small => 0.9,
            ContentSize::Normal => 1.0,
            ContentSize::Large => 1.15,
            ContentSize::Xlarge => 1.3,
            ContentSize::Xxlarge => 1.5,
            ContentSize::Xxxlarge => 1.75,
        }
    }
}

/// OS-level settings applied to a booted device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    #[serde(default)]
    pub appearance: Appearance,
    #[serde(default)]
    pub content_size: ContentSize,
}

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

/// Lifecycle phase of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Booting,
    Installing,
    Launching,
    Running,
    Error,
    Disposed,
}

impl SessionPhase {
    pub fn is_disposed(&self) -> bool {
        matches!(self, SessionPhase::Disposed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Booting => "booting",
            SessionPhase::Installing => "installing",
            SessionPhase::Launching => "launching",
            SessionPhase::Running => "running",
            SessionPhase::Error => "in error",
            SessionPhase::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Which step of the start sequence failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePhase {
    Boot,
    Install,
    Launch,
    Stream,
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailurePhase::Boot => "boot",
            FailurePhase::Install => "install",
            FailurePhase::Launch => "launch",
            FailurePhase::Stream => "stream",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────
// Input
// ─────────────────────────────────────────────────────────────────

/// Touch event kind understood by the stream server
///
/// Deserializes from `down` as well as the wire spelling `touchDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchKind {
    #[serde(alias = "touchDown")]
    Down,
    #[serde(alias = "touchMove")]
    Move,
    #[serde(alias = "touchUp")]
    Up,
}

/// Key press direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDirection {
    #[serde(alias = "keyDown")]
    Down,
    #[serde(alias = "keyUp")]
    Up,
}

/// A single command line written to the stream server's stdin
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputCommand {
    Touch { kind: TouchKind, x: f64, y: f64 },
    Key { direction: KeyDirection, code: u32 },
}

impl InputCommand {
    /// Touch at normalized screen coordinates, clamped to `[0, 1]`
    pub fn touch(kind: TouchKind, x: f64, y: f64) -> Self {
        InputCommand::Touch {
            kind,
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }

    pub fn key(direction: KeyDirection, code: u32) -> Self {
        InputCommand::Key { direction, code }
    }
}

impl fmt::Display for InputCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputCommand::Touch { kind, x, y } => {
                let kind = match kind {
                    TouchKind::Down => "touchDown",
                    TouchKind::Move => "touchMove",
                    TouchKind::Up => "touchUp",
                };
                write!(f, "{} {} {}", kind, x, y)
            }
            InputCommand::Key { direction, code } => {
                let direction = match direction {
                    KeyDirection::Down => "keyDown",
                    KeyDirection::Up => "keyUp",
                };
                write!(f, "{} {}", direction, code)
            }
        }
    }
}
