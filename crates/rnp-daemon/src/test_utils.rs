//! Test utilities for the device layer
//!
//! - [`ScriptedRunner`] answers tool invocations from a script and records them
//! - [`FakeDeviceProvider`] hands out [`FakeDevice`]s whose stream server is a
//!   small `sh` script that announces a URL and appends its stdin to a file

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rnp_core::prelude::*;
use rnp_core::{DeviceDescriptor, DeviceSettings, ExitInfo};

use crate::device::{DeviceHandle, DeviceProvider};
use crate::process::SubprocessStream;
use crate::tooling::{Invocation, ToolOutput, ToolRunner};

// ─────────────────────────────────────────────────────────────────
// ScriptedRunner
// ─────────────────────────────────────────────────────────────────

struct Rule {
    program: String,
    window: Vec<String>,
    outputs: VecDeque<ToolOutput>,
}

#[derive(Default)]
struct Script {
    rules: Vec<Rule>,
    calls: Vec<Invocation>,
    detached: Vec<Invocation>,
}

/// [`ToolRunner`] that answers from registered rules.
///
/// A rule matches when the program is equal and `window` appears as a
/// contiguous run in the arguments. The most recently registered matching
/// rule wins. Unmatched invocations succeed with empty output.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

fn contains_window(args: &[String], window: &[String]) -> bool {
    window.is_empty() || args.windows(window.len()).any(|w| w == window)
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer matching invocations with `output`
    pub fn on(&self, program: &str, window: &[&str], output: ToolOutput) {
        self.on_sequence(program, window, vec![output]);
    }

    /// Answer matching invocations with `outputs` in order; the last repeats
    pub fn on_sequence(&self, program: &str, window: &[&str], outputs: Vec<ToolOutput>) {
        let mut script = self.lock();
        script.rules.push(Rule {
            program: program.to_string(),
            window: window.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.into(),
        });
    }

    /// Every `run` invocation so far, in order
    pub fn calls(&self) -> Vec<Invocation> {
        self.lock().calls.clone()
    }

    /// Invocations of `program` whose arguments contain `window`
    pub fn calls_matching(&self, program: &str, window: &[&str]) -> Vec<Invocation> {
        let window: Vec<String> = window.iter().map(|s| s.to_string()).collect();
        self.lock()
            .calls
            .iter()
            .filter(|c| c.program == program && contains_window(&c.args, &window))
            .cloned()
            .collect()
    }

    /// Every `spawn_detached` invocation so far
    pub fn detached(&self) -> Vec<Invocation> {
        self.lock().detached.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn answer(&self, invocation: &Invocation) -> ToolOutput {
        let mut script = self.lock();
        script.calls.push(invocation.clone());

        let rule = script.rules.iter_mut().rev().find(|r| {
            r.program == invocation.program && contains_window(&invocation.args, &r.window)
        });

        match rule {
            Some(rule) if rule.outputs.len() > 1 => rule.outputs.pop_front().unwrap_or_default(),
            Some(rule) => rule.outputs.front().cloned().unwrap_or_default(),
            None => ToolOutput::success(""),
        }
    }
}

impl ToolRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ToolOutput> {
        Ok(self.answer(invocation))
    }

    fn spawn_detached(&self, invocation: &Invocation) -> std::io::Result<()> {
        self.lock().detached.push(invocation.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// FakeDeviceProvider
// ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeState {
    operations: Vec<String>,
    failures: HashSet<&'static str>,
    boot_delay: Duration,
    booted: HashMap<String, String>,
}

/// Provider of [`FakeDevice`]s sharing one operation log
#[derive(Clone)]
pub struct FakeDeviceProvider {
    state: Arc<Mutex<FakeState>>,
    input_log: PathBuf,
}

impl FakeDeviceProvider {
    /// Streams append the input they receive to `input_log`
    pub fn new(input_log: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::default(),
            input_log: input_log.into(),
        }
    }

    /// Make `operation` fail: one of `boot`, `install`, `launch`,
    /// `change settings`, `stream`
    pub fn fail(&self, operation: &'static str) {
        self.lock().failures.insert(operation);
    }

    pub fn succeed(&self, operation: &'static str) {
        self.lock().failures.remove(operation);
    }

    /// Delay every boot, so tests can overlap intents
    pub fn set_boot_delay(&self, delay: Duration) {
        self.lock().boot_delay = delay;
    }

    /// Operations performed so far, e.g. `boot phone-1`
    pub fn operations(&self) -> Vec<String> {
        self.lock().operations.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }

    pub fn input_log(&self) -> &Path {
        &self.input_log
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl DeviceProvider for FakeDeviceProvider {
    type Device = FakeDevice;

    fn create(&self, descriptor: &DeviceDescriptor) -> Result<FakeDevice> {
        Ok(FakeDevice {
            descriptor: descriptor.clone(),
            provider: self.clone(),
        })
    }
}

/// Device whose operations only record themselves
pub struct FakeDevice {
    descriptor: DeviceDescriptor,
    provider: FakeDeviceProvider,
}

impl FakeDevice {
    fn record(&self, operation: &'static str, detail: String) -> Result<()> {
        let mut state = self.provider.lock();
        state.operations.push(format!("{} {}", operation, detail).trim_end().to_string());
        if state.failures.contains(operation) {
            return Err(Error::tooling(
                operation,
                ExitInfo::new("fake", Some(1), format!("{} failed on purpose", operation)),
            ));
        }
        Ok(())
    }
}

impl DeviceHandle for FakeDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    async fn boot(&self) -> Result<String> {
        let delay = self.provider.lock().boot_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record("boot", self.descriptor.id.clone())?;

        let mut state = self.provider.lock();
        let next = state.booted.len() + 1;
        Ok(state
            .booted
            .entry(self.descriptor.id.clone())
            .or_insert_with(|| format!("FAKE-{}", next))
            .clone())
    }

    async fn configure_networking(&self, app_id: &str, port: u16) -> Result<()> {
        self.record("configure networking", format!("{} {}", app_id, port))
    }

    async fn install(&self, path: &Path) -> Result<()> {
        self.record("install", path.display().to_string())
    }

    async fn launch(&self, app_id: &str, port: u16) -> Result<()> {
        self.configure_networking(app_id, port).await?;
        self.record("launch", format!("{} {}", app_id, port))
    }

    async fn change_settings(&self, settings: &DeviceSettings) -> Result<()> {
        self.record(
            "change settings",
            format!(
                "{} {}",
                settings.appearance.as_str(),
                settings.content_size.simctl_name()
            ),
        )
    }

    fn make_stream_handle(&self) -> Result<SubprocessStream> {
        if self.record("stream", self.descriptor.id.clone()).is_err() {
            return Ok(SubprocessStream::new("/nonexistent/rnp-stream-server", ["fake"]));
        }

        let script = format!(
            "echo 'http://localhost:7007/{}'; exec cat >> '{}'",
            self.descriptor.id,
            self.provider.input_log.display()
        );
        Ok(SubprocessStream::new("sh", ["-c".to_string(), script]))
    }
}
