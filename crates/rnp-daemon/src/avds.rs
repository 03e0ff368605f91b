//! Android emulators driven through `emulator`, `adb`, and `avdmanager`
//!
//! Each device descriptor maps to one AVD named `rnpreview_<id>`. Booting
//! reuses a running emulator for that AVD, otherwise creates the AVD when
//! missing and starts the emulator in the background.

use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use tokio::time::{Duration, Instant};

use rnp_core::prelude::*;
use rnp_core::{Appearance, DeviceDescriptor, DeviceSettings, ExitInfo};

use crate::binary::StreamBinary;
use crate::device::{aggregate_failures, not_booted, DeviceHandle};
use crate::process::SubprocessStream;
use crate::tool_availability::AndroidSdk;
use crate::tooling::{run_checked, Invocation, ToolRunner};

/// How long a cold emulator boot may take
const BOOT_TIMEOUT: Duration = Duration::from_secs(180);

const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shared-preferences key React Native reads the packager host from
const DEBUG_HTTP_HOST_KEY: &str = "debug_http_host";

static DEBUG_HTTP_HOST_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<string name="debug_http_host">[^<]*</string>"#)
        .expect("Invalid debug_http_host regex")
});

/// Name of the AVD backing `descriptor`
pub fn avd_name(descriptor: &DeviceDescriptor) -> String {
    let id: String = descriptor
        .id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("rnpreview_{}", id)
}

/// Serials of emulators `adb devices` reports as fully connected
fn parse_emulator_serials(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            (serial.starts_with("emulator-") && state == "device").then(|| serial.to_string())
        })
        .collect()
}

/// Set the packager host in a shared-preferences document.
///
/// Replaces an existing entry, inserts one into an existing map, or builds a
/// new document when there is none.
pub fn upsert_debug_http_host(existing: Option<&str>, host: &str) -> String {
    let entry = format!(r#"<string name="{}">{}</string>"#, DEBUG_HTTP_HOST_KEY, host);

    match existing {
        Some(xml) if DEBUG_HTTP_HOST_ENTRY.is_match(xml) => DEBUG_HTTP_HOST_ENTRY
            .replace(xml, regex::NoExpand(&entry))
            .into_owned(),
        Some(xml) if xml.contains("<map/>") => xml.replace("<map/>", &format!("<map>\n    {}\n</map>", entry)),
        Some(xml) if xml.contains("</map>") => xml.replace("</map>", &format!("    {}\n</map>", entry)),
        _ => format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"yes\" ?>\n<map>\n    {}\n</map>\n",
            entry
        ),
    }
}

/// Quote for a POSIX shell single-quoted word
fn sh_single_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote for a POSIX shell double-quoted word
fn sh_double_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// An Android emulator backed by a dedicated AVD
#[derive(Debug)]
pub struct AndroidEmulatorDevice<R> {
    descriptor: DeviceDescriptor,
    runner: R,
    stream: Arc<StreamBinary>,
    sdk: AndroidSdk,
    serial: Mutex<Option<String>>,
    boot_lock: tokio::sync::Mutex<()>,
}

impl<R> AndroidEmulatorDevice<R>
where
    R: ToolRunner + Send + Sync + 'static,
{
    pub fn new(
        descriptor: DeviceDescriptor,
        runner: R,
        stream: Arc<StreamBinary>,
        sdk: AndroidSdk,
    ) -> Self {
        Self {
            descriptor,
            runner,
            stream,
            sdk,
            serial: Mutex::new(None),
            boot_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// adb serial of the running emulator
    pub fn serial(&self) -> Option<String> {
        self.serial.lock().ok().and_then(|serial| serial.clone())
    }

    fn require_serial(&self, operation: &'static str) -> Result<String> {
        self.serial().ok_or_else(|| not_booted(operation, "adb"))
    }

    fn remember(&self, serial: &str) {
        if let Ok(mut slot) = self.serial.lock() {
            *slot = Some(serial.to_string());
        }
    }

    fn adb<I, S>(&self, serial: &str, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut full = vec!["-s".to_string(), serial.to_string()];
        full.extend(args.into_iter().map(Into::into));
        Invocation::new(self.sdk.adb_program(), full)
    }

    /// Serial of a running emulator for `avd`, if any
    async fn find_running(&self, avd: &str) -> Result<Option<String>> {
        let devices = run_checked(
            &self.runner,
            "boot",
            Invocation::new(self.sdk.adb_program(), ["devices"]),
        )
        .await?;

        for serial in parse_emulator_serials(&devices) {
            let name = self
                .runner
                .run(&self.adb(&serial, ["emu", "avd", "name"]))
                .await;
            if let Ok(output) = name {
                if output.stdout.lines().next().map(str::trim) == Some(avd) {
                    return Ok(Some(serial));
                }
            }
        }
        Ok(None)
    }

    async fn ensure_avd(&self, avd: &str) -> Result<()> {
        let listed = run_checked(
            &self.runner,
            "boot",
            Invocation::new(self.sdk.emulator_program(), ["-list-avds"]),
        )
        .await?;
        if listed.lines().any(|line| line.trim() == avd) {
            return Ok(());
        }

        let image = self.descriptor.runtime.as_deref().ok_or_else(|| {
            Error::tooling(
                "boot",
                ExitInfo::new(
                    "avdmanager",
                    None,
                    format!("AVD {} does not exist and no system image is configured", avd),
                ),
            )
        })?;

        info!("Creating AVD {} from {}", avd, image);
        run_checked(
            &self.runner,
            "boot",
            Invocation::new(
                self.sdk.avdmanager_program(),
                ["create", "avd", "--name", avd, "--package", image, "--force"],
            ),
        )
        .await?;
        Ok(())
    }

    async fn wait_for_boot(&self, avd: &str) -> Result<String> {
        let deadline = Instant::now() + BOOT_TIMEOUT;

        loop {
            if let Some(serial) = self.find_running(avd).await? {
                let completed = self
                    .runner
                    .run(&self.adb(&serial, ["shell", "getprop", "sys.boot_completed"]))
                    .await;
                if matches!(&completed, Ok(out) if out.is_success() && out.stdout.trim() == "1") {
                    return Ok(serial);
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::tooling(
                    "boot",
                    ExitInfo::new(
                        self.sdk.emulator_program(),
                        None,
                        format!("{} did not finish booting within {:?}", avd, BOOT_TIMEOUT),
                    ),
                ));
            }
            tokio::time::sleep(BOOT_POLL_INTERVAL).await;
        }
    }

    async fn read_preferences(&self, serial: &str, package: &str, file: &str) -> Option<String> {
        let output = self
            .runner
            .run(&self.adb(serial, ["shell", "run-as", package, "cat", file]))
            .await
            .ok()?;
        output.is_success().then_some(output.stdout)
    }
}

impl<R> DeviceHandle for AndroidEmulatorDevice<R>
where
    R: ToolRunner + Send + Sync + 'static,
{
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    async fn boot(&self) -> Result<String> {
        let _guard = self.boot_lock.lock().await;
        let avd = avd_name(&self.descriptor);

        if let Some(serial) = self.find_running(&avd).await? {
            debug!("Reusing running emulator {} for {}", serial, avd);
            self.remember(&serial);
            return Ok(serial);
        }

        self.ensure_avd(&avd).await?;

        info!("Starting emulator for {}", avd);
        let start = Invocation::new(
            self.sdk.emulator_program(),
            ["-avd", avd.as_str(), "-no-boot-anim", "-no-audio"],
        );
        self.runner.spawn_detached(&start).map_err(|e| {
            Error::tooling("boot", ExitInfo::new(&start.program, None, e.to_string()))
        })?;

        let serial = self.wait_for_boot(&avd).await?;
        info!("Emulator {} booted as {}", avd, serial);
        self.remember(&serial);
        Ok(serial)
    }

    async fn configure_networking(&self, app_id: &str, port: u16) -> Result<()> {
        let serial = self.require_serial("configure networking")?;
        let tcp = format!("tcp:{}", port);
        run_checked(
            &self.runner,
            "configure networking",
            self.adb(&serial, ["reverse", tcp.as_str(), tcp.as_str()]),
        )
        .await?;

        let file = format!("shared_prefs/{}_preferences.xml", app_id);
        let existing = self.read_preferences(&serial, app_id, &file).await;
        match &existing {
            Some(_) => debug!("Updating {} for {}", DEBUG_HTTP_HOST_KEY, app_id),
            None => debug!("Creating preferences with {} for {}", DEBUG_HTTP_HOST_KEY, app_id),
        }
        let xml = upsert_debug_http_host(existing.as_deref(), &format!("localhost:{}", port));

        let script = format!(
            "mkdir -p shared_prefs && printf '%s' {} > {}",
            sh_single_quote(&xml),
            sh_single_quote(&file)
        );
        let command = format!("run-as {} sh -c {}", app_id, sh_double_quote(&script));
        run_checked(
            &self.runner,
            "configure networking",
            self.adb(&serial, ["shell".to_string(), command]),
        )
        .await?;
        Ok(())
    }

    async fn install(&self, path: &Path) -> Result<()> {
        let serial = self.require_serial("install")?;
        info!("Installing {} on {}", path.display(), serial);
        run_checked(
            &self.runner,
            "install",
            self.adb(
                &serial,
                ["install".to_string(), "-r".to_string(), path.display().to_string()],
            ),
        )
        .await?;
        Ok(())
    }

    async fn launch(&self, app_id: &str, port: u16) -> Result<()> {
        let serial = self.require_serial("launch")?;
        self.configure_networking(app_id, port).await?;

        run_checked(
            &self.runner,
            "launch",
            self.adb(&serial, ["shell", "am", "force-stop", app_id]),
        )
        .await?;

        info!("Launching {} on {}", app_id, serial);
        run_checked(
            &self.runner,
            "launch",
            self.adb(
                &serial,
                [
                    "shell",
                    "monkey",
                    "-p",
                    app_id,
                    "-c",
                    "android.intent.category.LAUNCHER",
                    "1",
                ],
            ),
        )
        .await?;
        Ok(())
    }

    async fn change_settings(&self, settings: &DeviceSettings) -> Result<()> {
        let serial = self.require_serial("change settings")?;
        let mut errors = Vec::new();

        let night = match settings.appearance {
            Appearance::Dark => "yes",
            Appearance::Light => "no",
        };
        if let Err(e) = run_checked(
            &self.runner,
            "set appearance",
            self.adb(&serial, ["shell", "cmd", "uimode", "night", night]),
        )
        .await
        {
            errors.push(e);
        }

        let scale = settings.content_size.font_scale().to_string();
        if let Err(e) = run_checked(
            &self.runner,
            "set content size",
            self.adb(
                &serial,
                ["shell", "settings", "put", "system", "font_scale", scale.as_str()],
            ),
        )
        .await
        {
            errors.push(e);
        }

        aggregate_failures("change settings", "adb", errors)
    }

    fn make_stream_handle(&self) -> Result<SubprocessStream> {
        let serial = self.require_serial("make stream")?;
        let binary = self.stream.resolve()?;
        Ok(SubprocessStream::new(binary, ["android".to_string(), serial]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedRunner;
    use crate::tooling::ToolOutput;
    use rnp_core::{ContentSize, Platform};

    const DEVICES_RUNNING: &str =
        "List of devices attached\nemulator-5554\tdevice\nemulator-5556\toffline\nR58M\tdevice\n\n";
    const DEVICES_NONE: &str = "List of devices attached\n\n";

    fn sdk() -> AndroidSdk {
        AndroidSdk {
            emulator: Some("/sdk/emulator/emulator".into()),
            adb: Some("/sdk/platform-tools/adb".into()),
            avdmanager: Some("/sdk/cmdline-tools/latest/bin/avdmanager".into()),
        }
    }

    const ADB: &str = "/sdk/platform-tools/adb";
    const EMULATOR: &str = "/sdk/emulator/emulator";
    const AVDMANAGER: &str = "/sdk/cmdline-tools/latest/bin/avdmanager";

    fn device(runner: ScriptedRunner, runtime: Option<&str>) -> AndroidEmulatorDevice<ScriptedRunner> {
        let mut descriptor = DeviceDescriptor::new("pixel 7", Platform::Android, "Pixel 7");
        descriptor.runtime = runtime.map(str::to_string);
        AndroidEmulatorDevice::new(
            descriptor,
            runner,
            Arc::new(StreamBinary::explicit("/opt/stream-server")),
            sdk(),
        )
    }

    async fn booted(runner: &ScriptedRunner) -> AndroidEmulatorDevice<ScriptedRunner> {
        runner.on(ADB, &["devices"], ToolOutput::success(DEVICES_RUNNING));
        runner.on(
            ADB,
            &["emu", "avd", "name"],
            ToolOutput::success("rnpreview_pixel_7\r\nOK\r\n"),
        );
        let emu = device(runner.clone(), None);
        emu.boot().await.unwrap();
        emu
    }

    #[test]
    fn test_avd_name_is_sanitized() {
        let descriptor = DeviceDescriptor::new("pixel 7/pro", Platform::Android, "Pixel");
        assert_eq!(avd_name(&descriptor), "rnpreview_pixel_7_pro");
    }

    #[test]
    fn test_parse_emulator_serials() {
        assert_eq!(parse_emulator_serials(DEVICES_RUNNING), vec!["emulator-5554"]);
        assert!(parse_emulator_serials(DEVICES_NONE).is_empty());
    }

    #[test]
    fn test_upsert_creates_document() {
        let xml = upsert_debug_http_host(None, "localhost:8081");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<string name="debug_http_host">localhost:8081</string>"#));
    }

    #[test]
    fn test_upsert_inserts_into_existing_map() {
        let existing = "<?xml version='1.0' encoding='utf-8' standalone='yes' ?>\n<map>\n    <boolean name=\"js_dev_mode_debug\" value=\"true\" />\n</map>\n";
        let xml = upsert_debug_http_host(Some(existing), "localhost:8081");
        assert!(xml.contains("js_dev_mode_debug"));
        assert!(xml.contains(r#"<string name="debug_http_host">localhost:8081</string>"#));
        assert_eq!(xml.matches("</map>").count(), 1);

        let empty = upsert_debug_http_host(Some("<map/>"), "localhost:1");
        assert!(empty.contains(r#"<string name="debug_http_host">localhost:1</string>"#));
    }

    #[test]
    fn test_upsert_replaces_existing_entry() {
        let existing = "<map>\n    <string name=\"debug_http_host\">10.0.2.2:8081</string>\n</map>\n";
        let xml = upsert_debug_http_host(Some(existing), "localhost:9000");
        assert!(!xml.contains("10.0.2.2"));
        assert_eq!(xml.matches("debug_http_host").count(), 1);
        assert!(xml.contains("localhost:9000"));
    }

    #[test]
    fn test_shell_quoting() {
        assert_eq!(sh_single_quote("it's"), r"'it'\''s'");
        assert_eq!(sh_double_quote(r#"a "b" $c"#), r#""a \"b\" \$c""#);
    }

    #[tokio::test]
    async fn test_boot_reuses_running_emulator() {
        let runner = ScriptedRunner::new();
        let emu = booted(&runner).await;
        assert_eq!(emu.serial().as_deref(), Some("emulator-5554"));
        assert_eq!(emu.boot().await.unwrap(), "emulator-5554");
        assert!(runner.detached().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_creates_avd_and_waits_for_completion() {
        let runner = ScriptedRunner::new();
        runner.on_sequence(
            ADB,
            &["devices"],
            vec![
                ToolOutput::success(DEVICES_NONE),
                ToolOutput::success(DEVICES_NONE),
                ToolOutput::success("List of devices attached\nemulator-5560\tdevice\n"),
            ],
        );
        runner.on(ADB, &["emu", "avd", "name"], ToolOutput::success("rnpreview_pixel_7\nOK\n"));
        runner.on_sequence(
            ADB,
            &["getprop", "sys.boot_completed"],
            vec![ToolOutput::success("\n"), ToolOutput::success("1\n")],
        );
        runner.on(EMULATOR, &["-list-avds"], ToolOutput::success("Other_AVD\n"));

        let emu = device(runner.clone(), Some("system-images;android-34;google_apis;arm64-v8a"));
        assert_eq!(emu.boot().await.unwrap(), "emulator-5560");

        let create = runner.calls_matching(AVDMANAGER, &["create", "avd"]);
        assert_eq!(create.len(), 1);
        assert!(create[0].has_arg("rnpreview_pixel_7"));
        assert!(create[0].has_arg("system-images;android-34;google_apis;arm64-v8a"));

        let detached = runner.detached();
        assert_eq!(detached.len(), 1);
        assert!(detached[0].args_start_with(&["-avd", "rnpreview_pixel_7"]));
    }

    #[tokio::test]
    async fn test_boot_without_avd_or_image_fails() {
        let runner = ScriptedRunner::new();
        runner.on(ADB, &["devices"], ToolOutput::success(DEVICES_NONE));
        runner.on(EMULATOR, &["-list-avds"], ToolOutput::success(""));

        let err = device(runner.clone(), None).boot().await.unwrap_err();
        assert_eq!(err.operation(), Some("boot"));
        assert!(runner.detached().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_times_out() {
        let runner = ScriptedRunner::new();
        runner.on(ADB, &["devices"], ToolOutput::success(DEVICES_NONE));
        runner.on(EMULATOR, &["-list-avds"], ToolOutput::success("rnpreview_pixel_7\n"));

        let err = device(runner, None).boot().await.unwrap_err();
        assert!(err.to_string().contains("did not finish booting"));
    }

    #[tokio::test]
    async fn test_configure_networking_writes_preferences() {
        let runner = ScriptedRunner::new();
        let emu = booted(&runner).await;
        runner.on(ADB, &["run-as", "com.example.app", "cat"], ToolOutput::failure(1, "No such file"));

        emu.configure_networking("com.example.app", 8081).await.unwrap();

        assert_eq!(runner.calls_matching(ADB, &["reverse", "tcp:8081", "tcp:8081"]).len(), 1);
        let writes: Vec<_> = runner
            .calls_matching(ADB, &["shell"])
            .into_iter()
            .filter(|c| c.args.last().is_some_and(|a| a.starts_with("run-as com.example.app sh -c")))
            .collect();
        assert_eq!(writes.len(), 1);
        let command = writes[0].args.last().unwrap();
        assert!(command.contains("localhost:8081"));
        assert!(command.contains("shared_prefs/com.example.app_preferences.xml"));
    }

    #[tokio::test]
    async fn test_launch_force_stops_first() {
        let runner = ScriptedRunner::new();
        let emu = booted(&runner).await;

        emu.launch("com.example.app", 8081).await.unwrap();

        let calls = runner.calls();
        let stop = calls.iter().position(|c| c.has_arg("force-stop")).unwrap();
        let start = calls.iter().position(|c| c.has_arg("monkey")).unwrap();
        let reverse = calls.iter().position(|c| c.has_arg("reverse")).unwrap();
        assert!(reverse < stop && stop < start);
    }

    #[tokio::test]
    async fn test_change_settings_attempts_both() {
        let runner = ScriptedRunner::new();
        let emu = booted(&runner).await;
        runner.on(ADB, &["uimode"], ToolOutput::failure(255, "cmd: Can't find service"));

        let settings = DeviceSettings {
            appearance: Appearance::Dark,
            content_size: ContentSize::Large,
        };
        let err = emu.change_settings(&settings).await.unwrap_err();
        assert_eq!(err.operation(), Some("set appearance"));
        assert_eq!(
            runner.calls_matching(ADB, &["font_scale", "1.15"]).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_stream_handle_targets_serial() {
        let runner = ScriptedRunner::new();
        let emu = booted(&runner).await;
        let stream = emu.make_stream_handle().unwrap();
        assert_eq!(stream.args(), &["android".to_string(), "emulator-5554".to_string()]);
    }
}
