//! Frame-streaming subprocess management

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use rnp_core::prelude::*;
use rnp_core::InputCommand;

/// Marker the server prints on the line announcing its stream URL
const URL_MARKER: &str = "http://";

/// A stream server child process.
///
/// The server prints its stream URL on stdout and reads one input command per
/// line on stdin. The `Child` handle lives in a background wait task; this
/// value keeps a kill channel, a stdin sender, and an exit flag.
#[derive(Debug)]
pub struct SubprocessStream {
    program: PathBuf,
    args: Vec<String>,
    /// First URL line, set once
    url: Arc<OnceLock<String>>,
    state: Mutex<StreamState>,
}

#[derive(Debug, Default)]
enum StreamState {
    #[default]
    NotStarted,
    Started(Running),
    Disposed,
}

#[derive(Debug)]
struct Running {
    stdin_tx: mpsc::UnboundedSender<String>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited: Arc<AtomicBool>,
    pid: Option<u32>,
}

impl SubprocessStream {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            url: Arc::new(OnceLock::new()),
            state: Mutex::new(StreamState::NotStarted),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Stream URL, once announced
    pub fn url(&self) -> Option<&str> {
        self.url.get().map(String::as_str)
    }

    /// Whether the process was started and has not exited or been disposed
    pub fn is_alive(&self) -> bool {
        match &*self.lock_state() {
            StreamState::Started(running) => !running.exited.load(Ordering::Acquire),
            _ => false,
        }
    }

    /// Spawn the server and wait for its stream URL.
    ///
    /// Resolves with the first stdout line containing `http://`, trimmed.
    /// Fails immediately if the process cannot be spawned. If the process
    /// exits without announcing a URL the future does not resolve, so callers
    /// should bound it with a timeout.
    pub async fn start(&self) -> Result<String> {
        let url_rx = self.spawn()?;

        match url_rx.await {
            Ok(url) => Ok(url),
            Err(_) => {
                warn!(
                    "{} exited without announcing a stream URL",
                    self.program.display()
                );
                std::future::pending().await
            }
        }
    }

    fn spawn(&self) -> Result<oneshot::Receiver<String>> {
        let mut state = self.lock_state();
        match &*state {
            StreamState::NotStarted => {}
            StreamState::Started(_) => {
                return Err(Error::ProcessSpawn {
                    program: self.program.display().to_string(),
                    reason: "stream already started".to_string(),
                })
            }
            StreamState::Disposed => {
                return Err(Error::ProcessSpawn {
                    program: self.program.display().to_string(),
                    reason: "stream was disposed".to_string(),
                })
            }
        }

        info!(
            "Launching stream server: {} {}",
            self.program.display(),
            self.args.join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ProcessSpawn {
                program: self.program.display().to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        info!("Stream server started with PID: {:?}", pid);

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::ProcessSpawn {
                program: self.program.display().to_string(),
                reason: "stdio pipes unavailable".to_string(),
            });
        };

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(Self::stdin_writer(stdin, stdin_rx));

        let (url_tx, url_rx) = oneshot::channel();
        tokio::spawn(Self::stdout_reader(stdout, url_tx, Arc::clone(&self.url)));

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("stream stderr: {}", line);
            }
        });

        let exited = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(Self::wait_for_exit(child, kill_rx, Arc::clone(&exited)));

        *state = StreamState::Started(Running {
            stdin_tx,
            kill_tx: Some(kill_tx),
            exited,
            pid,
        });

        Ok(url_rx)
    }

    /// Write one command line to the server's stdin.
    ///
    /// Fire-and-forget: before start and after exit or disposal this does
    /// nothing. Commands are written in call order.
    pub fn send_input(&self, command: &InputCommand) {
        self.send_line(command.to_string());
    }

    /// Write a raw line to the server's stdin, see [`SubprocessStream::send_input`]
    pub fn send_line(&self, line: String) {
        let state = self.lock_state();
        let StreamState::Started(running) = &*state else {
            trace!("Dropping input, stream not running: {}", line);
            return;
        };
        if running.exited.load(Ordering::Acquire) {
            trace!("Dropping input, stream exited: {}", line);
            return;
        }
        let _ = running.stdin_tx.send(line);
    }

    /// Kill the process. Idempotent; never fails.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), StreamState::Disposed);
        if let StreamState::Started(mut running) = previous {
            info!("Disposing stream server (PID {:?})", running.pid);
            if let Some(kill_tx) = running.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, StreamState> {
        // No code panics while holding this lock; recover the data regardless
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn stdout_reader(
        stdout: ChildStdout,
        url_tx: oneshot::Sender<String>,
        url: Arc<OnceLock<String>>,
    ) {
        let mut reader = BufReader::new(stdout).lines();
        let mut url_tx = Some(url_tx);

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("stream stdout: {}", line);

            if url_tx.is_some() && line.contains(URL_MARKER) {
                let announced = line.trim().to_string();
                info!("Stream server ready at {}", announced);
                let _ = url.set(announced.clone());
                if let Some(tx) = url_tx.take() {
                    let _ = tx.send(announced);
                }
            }
        }

        debug!("stream stdout reader finished");
    }

    async fn stdin_writer(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(command) = rx.recv().await {
            trace!("stream input: {}", command);

            if let Err(e) = stdin.write_all(command.as_bytes()).await {
                debug!("Failed to write to stream stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                debug!("Failed to write newline: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                debug!("Failed to flush stream stdin: {}", e);
                break;
            }
        }
    }

    async fn wait_for_exit(mut child: Child, kill_rx: oneshot::Receiver<()>, exited: Arc<AtomicBool>) {
        tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => info!("Stream server exited with status: {:?}", status),
                    Err(e) => error!("Error waiting for stream server: {}", e),
                }
            }
            _ = kill_rx => {
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill stream server: {}", e);
                }
                let _ = child.wait().await;
                info!("Stream server killed");
            }
        }

        exited.store(true, Ordering::Release);
    }
}

impl Drop for SubprocessStream {
    fn drop(&mut self) {
        self.dispose();
    }
}
