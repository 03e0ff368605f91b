//! Running device-tooling commands
//!
//! Every `xcrun`/`adb`/`emulator` call made by the device layer goes through a
//! [`ToolRunner`], so the command lines can be scripted in tests and every
//! failure is turned into a typed [`Error::Tooling`] at one place.

use std::fmt;
use std::process::Stdio;

use tokio::process::Command;

use rnp_core::prelude::*;
use rnp_core::ExitInfo;

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the arguments start with `prefix`
    pub fn args_start_with(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len() && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }

    /// Whether `needle` appears anywhere in the arguments
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes device-tooling commands
#[trait_variant::make(ToolRunner: Send)]
pub trait LocalToolRunner {
    /// Run to completion and capture output. Only spawn failures are errors;
    /// a non-zero exit is reported through [`ToolOutput::code`].
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ToolOutput>;

    /// Start a long-lived process (an emulator) and leave it running
    fn spawn_detached(&self, invocation: &Invocation) -> std::io::Result<()>;
}

/// Run `invocation` and require a zero exit status.
///
/// Spawn failures and non-zero exits both become [`Error::Tooling`] tagged
/// with `operation`. Returns stdout on success.
pub async fn run_checked<R>(runner: &R, operation: &'static str, invocation: Invocation) -> Result<String>
where
    R: ToolRunner + Sync,
{
    debug!("[{}] {}", operation, invocation);

    let output = runner.run(&invocation).await.map_err(|e| {
        Error::tooling(
            operation,
            ExitInfo::new(&invocation.program, None, e.to_string()),
        )
    })?;

    if !output.is_success() {
        let detail = output.stderr.trim();
        let detail = if detail.is_empty() {
            output.stdout.trim()
        } else {
            detail
        };
        warn!("[{}] {} failed: {}", operation, invocation.program, detail);
        return Err(Error::tooling(
            operation,
            ExitInfo::new(&invocation.program, output.code, detail),
        ));
    }

    Ok(output.stdout)
}

/// Parse JSON produced by a tool, mapping malformed output to [`Error::Tooling`]
pub fn parse_tool_json<T: serde::de::DeserializeOwned>(
    operation: &'static str,
    program: &str,
    stdout: &str,
) -> Result<T> {
    serde_json::from_str(stdout).map_err(|e| {
        Error::tooling(
            operation,
            ExitInfo::new(program, Some(0), format!("unparseable output: {}", e)),
        )
    })
}

/// [`ToolRunner`] backed by real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ToolOutput> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn_detached(&self, invocation: &Invocation) -> std::io::Result<()> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        info!("Started {} (PID {:?})", invocation.program, child.id());

        // Reap it when it exits; it keeps running after we stop waiting
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display_and_matching() {
        let inv = Invocation::new("xcrun", ["simctl", "--set", "/tmp/set", "boot", "ABC"]);
        assert_eq!(inv.to_string(), "xcrun simctl --set /tmp/set boot ABC");
        assert!(inv.args_start_with(&["simctl", "--set"]));
        assert!(!inv.args_start_with(&["simctl", "boot"]));
        assert!(inv.has_arg("boot"));
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let inv = Invocation::new("sh", ["-c", "echo out; echo err >&2; exit 3"]);
        let output = ToolRunner::run(&SystemRunner, &inv).await.unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_checked_maps_exit_to_tooling_error() {
        let inv = Invocation::new("sh", ["-c", "echo 'no such app' >&2; exit 4"]);
        let err = run_checked(&SystemRunner, "install", inv).await.unwrap_err();
        match err {
            Error::Tooling { operation, exit } => {
                assert_eq!(operation, "install");
                assert_eq!(exit.code, Some(4));
                assert_eq!(exit.detail, "no such app");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_checked_maps_spawn_failure() {
        let inv = Invocation::new("/nonexistent/rnp-tool", Vec::<String>::new());
        let err = run_checked(&SystemRunner, "boot", inv).await.unwrap_err();
        assert_eq!(err.operation(), Some("boot"));
    }

    #[test]
    fn test_parse_tool_json_malformed() {
        let err = parse_tool_json::<serde_json::Value>("boot", "xcrun", "not json").unwrap_err();
        assert!(err.to_string().contains("unparseable output"));
    }
}
