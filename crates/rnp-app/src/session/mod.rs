//! Device session state machine
//!
//! A [`DeviceSession`] boots a device, installs and launches the app, then
//! starts the stream server and forwards input to it:
//!
//! ```text
//! Idle -> Booting -> Installing -> Launching -> Running
//!            \___________\_____________\______-> Error
//! any -> Disposed
//! ```
//!
//! Intents (`start`, `select_device`, `restart`, `dispose`) bump a generation
//! counter synchronously, before their future is returned. A running sequence
//! commits each transition only while its generation is still current, so a
//! superseded sequence changes nothing and emits nothing.


use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use rnp_core::prelude::*;
use rnp_core::{
    DeviceDescriptor, DeviceSettings, FailurePhase, InputCommand, KeyDirection, SessionEvent,
    SessionPhase, TouchKind,
};
use rnp_daemon::{DeviceHandle, DeviceProvider, SubprocessStream};

use crate::config::{AppTargets, Settings};
use crate::ports::allocate_port;

/// Buffered events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 256;

/// What a session needs besides its device provider
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub apps: AppTargets,
    /// Fixed dev-server port; allocated on first launch when unset
    pub dev_server_port: Option<u16>,
    /// How long the stream server gets to announce its URL
    pub start_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            apps: AppTargets::default(),
            dev_server_port: None,
            start_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings, project_path: &Path) -> Self {
        Self {
            apps: settings.app_targets(project_path),
            dev_server_port: settings.dev_server.port,
            start_timeout: settings.stream.start_timeout(),
        }
    }
}

/// Point-in-time view of a session, as returned by `getState`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub device_id: Option<String>,
    pub stream_url: Option<String>,
}

/// A request that (re)runs the start sequence
enum Intent {
    Start(DeviceDescriptor),
    Select(DeviceDescriptor),
    Restart,
}

impl Intent {
    fn name(&self) -> &'static str {
        match self {
            Intent::Start(_) => "start",
            Intent::Select(_) => "select device",
            Intent::Restart => "restart",
        }
    }
}

struct SessionState<D> {
    phase: SessionPhase,
    generation: u64,
    device: Option<Arc<D>>,
    /// At most one stream per session
    stream: Option<Arc<SubprocessStream>>,
    stream_url: Option<String>,
    settings: Option<DeviceSettings>,
    /// `settings` still has to reach the device
    settings_pending: bool,
    port: Option<u16>,
}

impl<D> Default for SessionState<D> {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            generation: 0,
            device: None,
            stream: None,
            stream_url: None,
            settings: None,
            settings_pending: false,
            port: None,
        }
    }
}

/// The device session. Cheap to clone; clones share one session.
pub struct DeviceSession<P: DeviceProvider> {
    inner: Arc<Inner<P>>,
}

impl<P: DeviceProvider> Clone for DeviceSession<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: DeviceProvider> std::fmt::Debug for DeviceSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}

struct Inner<P: DeviceProvider> {
    provider: P,
    config: SessionConfig,
    state: Mutex<SessionState<P::Device>>,
    events: broadcast::Sender<SessionEvent>,
}

impl<P: DeviceProvider> DeviceSession<P> {
    pub fn new(provider: P, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                provider,
                config,
                state: Mutex::new(SessionState::default()),
                events,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Intents
    // ─────────────────────────────────────────────────────────────

    /// Boot `descriptor` and bring the app up on it.
    ///
    /// Supersedes a sequence already in flight. Rejected while `Running`; use
    /// [`DeviceSession::restart`] or [`DeviceSession::select_device`] there.
    /// Resolves with the stream URL.
    pub fn start(
        &self,
        descriptor: DeviceDescriptor,
    ) -> impl Future<Output = Result<String>> + Send + 'static {
        self.run(Intent::Start(descriptor))
    }

    /// Switch to `descriptor` in any state, storing `settings` to apply after
    /// boot. The current stream is torn down first.
    pub fn select_device(
        &self,
        descriptor: DeviceDescriptor,
        settings: Option<DeviceSettings>,
    ) -> impl Future<Output = Result<String>> + Send + 'static {
        if let Some(settings) = settings {
            let mut state = self.inner.lock();
            if !state.phase.is_disposed() {
                state.settings = Some(settings);
                state.settings_pending = true;
            }
        }
        self.run(Intent::Select(descriptor))
    }

    /// Tear down the stream and rerun the sequence on the current device
    pub fn restart(&self) -> impl Future<Output = Result<String>> + Send + 'static {
        self.run(Intent::Restart)
    }

    fn run(&self, intent: Intent) -> impl Future<Output = Result<String>> + Send + 'static {
        let begun = self.inner.begin(intent);
        let inner = self.inner.clone();
        async move {
            let (generation, device) = begun?;
            inner.run_sequence(generation, device).await
        }
    }

    /// Store `settings` and apply them: immediately while `Running`,
    /// otherwise right after the next successful boot.
    pub fn change_settings(
        &self,
        settings: DeviceSettings,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let device = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            if state.phase.is_disposed() {
                Err(Error::invalid_state("change settings", state.phase))
            } else {
                state.settings = Some(settings);
                match (&state.phase, &state.device) {
                    (SessionPhase::Running, Some(device)) => {
                        state.settings_pending = false;
                        Ok(Some(device.clone()))
                    }
                    _ => {
                        debug!("Deferring device settings until the next boot");
                        state.settings_pending = true;
                        Ok(None)
                    }
                }
            }
        };

        async move {
            match device? {
                Some(device) => device.change_settings(&settings).await,
                None => Ok(()),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────

    pub fn send_touch(&self, kind: TouchKind, x: f64, y: f64) -> Result<()> {
        self.send_input(InputCommand::touch(kind, x, y))
    }

    pub fn send_key(&self, code: u32, direction: KeyDirection) -> Result<()> {
        self.send_input(InputCommand::key(direction, code))
    }

    /// Forward `command` to the stream server. Only accepted while `Running`.
    pub fn send_input(&self, command: InputCommand) -> Result<()> {
        let state = self.inner.lock();
        match (&state.phase, &state.stream) {
            (SessionPhase::Running, Some(stream)) => {
                trace!("Input: {}", command);
                stream.send_input(&command);
                Ok(())
            }
            _ => Err(Error::invalid_state("send input", state.phase)),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Kill the stream and enter `Disposed`. Idempotent; the `disposed` event
    /// is emitted once.
    pub fn dispose(&self) {
        let stream = {
            let mut state = self.inner.lock();
            if state.phase.is_disposed() {
                return;
            }
            state.generation += 1;
            state.stream_url = None;
            let stream = state.stream.take();
            self.inner.transition(&mut state, SessionPhase::Disposed);
            self.inner.emit(SessionEvent::Disposed);
            stream
        };

        if let Some(stream) = stream {
            stream.dispose();
        }
        info!("Session disposed");
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.lock();
        SessionSnapshot {
            phase: state.phase,
            device_id: state.device.as_ref().map(|d| d.descriptor().id.clone()),
            stream_url: state.stream_url.clone(),
        }
    }

    /// Settings last requested, applied or not
    pub fn settings(&self) -> Option<DeviceSettings> {
        self.inner.lock().settings
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}

impl<P: DeviceProvider> Inner<P> {
    fn lock(&self) -> MutexGuard<'_, SessionState<P::Device>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        trace!("Session event: {}", event.event_type());
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn transition(&self, state: &mut SessionState<P::Device>, to: SessionPhase) {
        let from = state.phase;
        if from == to {
            return;
        }
        debug!("Session {} -> {}", from, to);
        state.phase = to;
        self.emit(SessionEvent::PhaseChanged { from, to });
    }

    /// Synchronous half of an intent: validate, bump the generation, settle
    /// on a device, and enter `Booting`.
    fn begin(&self, intent: Intent) -> Result<(u64, Arc<P::Device>)> {
        let operation = intent.name();
        let restarting = matches!(intent, Intent::Restart);
        let mut state = self.lock();

        match (&intent, state.phase) {
            (_, SessionPhase::Disposed) | (Intent::Start(_), SessionPhase::Running) => {
                return Err(Error::invalid_state(operation, state.phase));
            }
            _ => {}
        }

        let device = match intent {
            Intent::Start(descriptor) | Intent::Select(descriptor) => match &state.device {
                Some(device) if device.descriptor() == &descriptor => device.clone(),
                _ => {
                    info!("Using device {} ({})", descriptor.id, descriptor.platform);
                    Arc::new(self.provider.create(&descriptor)?)
                }
            },
            Intent::Restart => match &state.device {
                Some(device) => device.clone(),
                None => return Err(Error::invalid_state(operation, state.phase)),
            },
        };

        state.generation += 1;
        let generation = state.generation;
        state.device = Some(device.clone());
        state.stream_url = None;
        let stale = state.stream.take();

        if restarting {
            self.transition(&mut state, SessionPhase::Idle);
        }
        self.transition(&mut state, SessionPhase::Booting);
        drop(state);

        if let Some(stream) = stale {
            debug!("Disposing previous stream");
            stream.dispose();
        }

        Ok((generation, device))
    }

    async fn run_sequence(
        self: Arc<Self>,
        generation: u64,
        device: Arc<P::Device>,
    ) -> Result<String> {
        let descriptor = device.descriptor().clone();

        // Boot
        match device.boot().await {
            Ok(identifier) => info!("Booted {} as {}", descriptor.id, identifier),
            Err(e) => return Err(self.fail(generation, FailurePhase::Boot, e)),
        }
        self.apply_pending_settings(generation, &device).await?;

        // Install
        let target = match self.config.apps.for_platform(descriptor.platform) {
            Some(target) => target.clone(),
            None => {
                let e = Error::config(format!("No {} app configured", descriptor.platform));
                return Err(self.fail(generation, FailurePhase::Install, e));
            }
        };
        self.advance(generation, SessionPhase::Installing)?;
        if let Err(e) = device.install(&target.install_path).await {
            return Err(self.fail(generation, FailurePhase::Install, e));
        }

        // Launch
        self.advance(generation, SessionPhase::Launching)?;
        let port = match self.dev_server_port() {
            Ok(port) => port,
            Err(e) => return Err(self.fail(generation, FailurePhase::Launch, e)),
        };
        if let Err(e) = device.launch(&target.app_id, port).await {
            return Err(self.fail(generation, FailurePhase::Launch, e));
        }

        // Stream
        let stream = match device.make_stream_handle() {
            Ok(stream) => Arc::new(stream),
            Err(e) => return Err(self.fail(generation, FailurePhase::Stream, e)),
        };
        self.attach_stream(generation, &stream)?;

        let timeout = self.config.start_timeout;
        let url = match tokio::time::timeout(timeout, stream.start()).await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => return Err(self.fail(generation, FailurePhase::Stream, e)),
            Err(_) => {
                let e = Error::timeout(format!(
                    "stream server did not announce a URL within {}s",
                    timeout.as_secs()
                ));
                return Err(self.fail(generation, FailurePhase::Stream, e));
            }
        };

        self.finish(generation, &descriptor, &stream, &url)?;
        Ok(url)
    }

    /// Enter `to` if `generation` is still current
    fn advance(&self, generation: u64, to: SessionPhase) -> Result<()> {
        let mut state = self.lock();
        if state.generation != generation {
            return Err(Error::Superseded);
        }
        self.transition(&mut state, to);
        Ok(())
    }

    fn dev_server_port(&self) -> Result<u16> {
        let mut state = self.lock();
        if let Some(port) = state.port {
            return Ok(port);
        }
        let port = allocate_port(self.config.dev_server_port)?;
        state.port = Some(port);
        Ok(port)
    }

    async fn apply_pending_settings(&self, generation: u64, device: &P::Device) -> Result<()> {
        let settings = {
            let state = self.lock();
            if state.generation != generation {
                return Err(Error::Superseded);
            }
            match state.settings {
                Some(settings) if state.settings_pending => settings,
                _ => return Ok(()),
            }
        };

        match device.change_settings(&settings).await {
            Ok(()) => {
                let mut state = self.lock();
                if state.settings == Some(settings) {
                    state.settings_pending = false;
                }
            }
            // Not fatal: the app still runs with the device defaults
            Err(e) => warn!("Failed to apply device settings after boot: {}", e),
        }
        Ok(())
    }

    fn attach_stream(&self, generation: u64, stream: &Arc<SubprocessStream>) -> Result<()> {
        let mut state = self.lock();
        if state.generation != generation {
            return Err(Error::Superseded);
        }
        state.stream = Some(stream.clone());
        Ok(())
    }

    fn finish(
        &self,
        generation: u64,
        descriptor: &DeviceDescriptor,
        stream: &SubprocessStream,
        url: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.generation != generation {
            drop(state);
            debug!("Dropping stream of a superseded sequence");
            stream.dispose();
            return Err(Error::Superseded);
        }

        state.stream_url = Some(url.to_string());
        self.transition(&mut state, SessionPhase::Running);
        self.emit(SessionEvent::Ready {
            device_id: descriptor.id.clone(),
            stream_url: url.to_string(),
        });
        info!("Streaming {} at {}", descriptor.id, url);
        Ok(())
    }

    /// Enter `Error` for `phase` if `generation` is current, and hand back the
    /// error to return. A stale sequence gets [`Error::Superseded`] instead.
    fn fail(&self, generation: u64, phase: FailurePhase, error: Error) -> Error {
        let stream = {
            let mut state = self.lock();
            if state.generation != generation {
                debug!("Ignoring {} failure of a superseded sequence: {}", phase, error);
                return Error::Superseded;
            }

            state.stream_url = None;
            let stream = state.stream.take();
            self.transition(&mut state, SessionPhase::Error);
            self.emit(SessionEvent::Failed {
                phase,
                platform: state.device.as_ref().map(|d| d.descriptor().platform),
                message: error.to_string(),
            });
            stream
        };

        if let Some(stream) = stream {
            stream.dispose();
        }
        error!("Session {} failed: {}", phase, error);
        error
    }
}
