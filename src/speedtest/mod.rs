//! Upstream speed measurement via the Ookla CLI.
//!
//! # Algorithm
//! - Stage a private working directory: CA bundle at 0600, then the
//!   per-architecture CLI tarball, downloaded and extracted with the
//!   hardened extractor.
//! - Run the CLI once per server entry (one auto-select plus region pins),
//!   each with a 90-second budget, and fold its JSONL output into a
//!   `SpeedEntry`.
//! - A rate-limited entry aborts the remaining servers; the peer asked us
//!   to back off.

pub mod cacert;
pub mod parse;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::{
    SPEEDTEST_CLI_BIN, SPEEDTEST_CLI_DIR, SPEEDTEST_CMD_TIMEOUT_SECS, SPEEDTEST_TGZ,
};
use crate::net::HttpClient;
use crate::os::interrupt::{stop_requested, CancelToken};
use crate::os::pipe::ChildPipe;

const DOWNLOAD_URL_BASE: &str = "https://install.speedtest.net/app/cli";
const CLI_VERSION: &str = "1.2.0";

/// Fixed measurement set: automatic selection plus a geographic spread.
pub const SERVERS: [(&str, &str); 7] = [
    ("", "Speedtest.net (Auto)"),
    ("59016", "Singapore, SG"),
    ("5905", "Los Angeles, US"),
    ("59219", "Montreal, CA"),
    ("41840", "Paris, FR"),
    ("3386", "Amsterdam, NL"),
    ("46114", "Melbourne, AU"),
];

/// Outcome of one server attempt.
#[derive(Debug, Clone)]
pub struct SpeedEntry {
    /// Empty means automatic server selection.
    pub server_id: String,
    pub server_label: String,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    /// Formatted percentage, or `"-"` when the CLI did not report it.
    pub packet_loss: String,
    pub ok: bool,
    pub error: String,
    pub rate_limited: bool,
}

impl SpeedEntry {
    pub fn new(server_id: &str, server_label: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            server_label: server_label.to_string(),
            download_mbps: 0.0,
            upload_mbps: 0.0,
            latency_ms: 0.0,
            packet_loss: String::new(),
            ok: false,
            error: String::new(),
            rate_limited: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SpeedTestReport {
    pub entries: Vec<SpeedEntry>,
    pub rate_limited: bool,
}

/// Spinner lifecycle notifications for the UI layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpinnerEvent {
    Start,
    Stop,
}

pub type SpinnerFn<'a> = dyn Fn(SpinnerEvent, &str) + 'a;

/// Staged working state for one measurement run. The temp directory and
/// everything staged inside it disappear on drop.
pub struct SpeedTest<'a> {
    http: &'a HttpClient,
    base: TempDir,
    cli_dir: PathBuf,
    cli_path: PathBuf,
    tgz_path: PathBuf,
    cert_path: PathBuf,
}

impl<'a> SpeedTest<'a> {
    pub fn new(http: &'a HttpClient) -> Result<Self, String> {
        let base = tempfile::Builder::new()
            .prefix("bench_")
            .tempdir()
            .map_err(|e| format!("Failed to create secure temp dir: {e}"))?;
        fs::set_permissions(base.path(), fs::Permissions::from_mode(0o700))
            .map_err(|e| format!("Failed to restrict temp dir: {e}"))?;

        let cert_path = cacert::stage_ca_bundle(base.path())?;
        let cli_dir = base.path().join(SPEEDTEST_CLI_DIR);
        let cli_path = cli_dir.join(SPEEDTEST_CLI_BIN);
        let tgz_path = base.path().join(SPEEDTEST_TGZ);

        Ok(Self {
            http,
            base,
            cli_dir,
            cli_path,
            tgz_path,
            cert_path,
        })
    }

    /// Downloads and extracts the CLI for the running architecture, then
    /// marks the binary executable.
    pub fn install(&self) -> Result<(), String> {
        let arch = cli_arch(&uname_machine()?)?;
        let url = format!(
            "{DOWNLOAD_URL_BASE}/ookla-speedtest-{CLI_VERSION}-linux-{arch}.tgz"
        );

        self.http.download(&url, &self.tgz_path)?;

        fs::create_dir_all(&self.cli_dir)
            .map_err(|e| format!("Failed to create CLI directory: {e}"))?;
        crate::archive::extract(&self.tgz_path, &self.cli_dir)
            .map_err(|e| format!("Failed to extract speedtest CLI: {e}"))?;

        if !self.cli_path.exists() {
            return Err("Failed to extract speedtest-cli".to_string());
        }
        let mut perms = fs::metadata(&self.cli_path)
            .map_err(|e| format!("Failed to stat CLI binary: {e}"))?
            .permissions();
        perms.set_mode(perms.mode() | 0o700);
        fs::set_permissions(&self.cli_path, perms)
            .map_err(|e| format!("Failed to mark CLI executable: {e}"))?;
        Ok(())
    }

    /// Runs the server list, short-circuiting on rate limiting and on
    /// interruption.
    pub fn run(&self, spinner: Option<&SpinnerFn>, cancel: &CancelToken) -> SpeedTestReport {
        let mut report = SpeedTestReport::default();

        for (id, label) in SERVERS {
            if stop_requested(cancel) {
                break;
            }
            let _spin = SpinnerScope::start(spinner, label);
            let mut entry = SpeedEntry::new(id, label);

            match self.run_one(id, cancel) {
                Ok(output) => parse::apply_cli_output(&output, &mut entry),
                Err(err) => {
                    if stop_requested(cancel) {
                        entry.error = "Interrupted by user".to_string();
                        report.entries.push(entry);
                        break;
                    }
                    entry.error = err;
                }
            }

            if entry.rate_limited {
                report.rate_limited = true;
                report.entries.push(entry);
                return report;
            }
            report.entries.push(entry);
        }

        report
    }

    fn run_one(&self, server_id: &str, cancel: &CancelToken) -> Result<String, String> {
        let mut args: Vec<String> = vec![
            self.cli_path.display().to_string(),
            "-f".to_string(),
            "json".to_string(),
            "--accept-license".to_string(),
            "--accept-gdpr".to_string(),
            format!("--ca-certificate={}", self.cert_path.display()),
        ];
        if !server_id.is_empty() {
            args.push(format!("--server-id={server_id}"));
        }

        let mut pipe = ChildPipe::spawn(&args)?;
        pipe.read_all(
            Duration::from_secs(SPEEDTEST_CMD_TIMEOUT_SECS),
            Some(cancel),
            false,
        )
    }

    pub fn base_dir(&self) -> &std::path::Path {
        self.base.path()
    }
}

/// RAII wrapper for the spinner callback: start on construction, stop on
/// drop, so every early exit from the server loop stops the spinner.
struct SpinnerScope<'a> {
    spinner: Option<&'a SpinnerFn<'a>>,
    label: &'a str,
}

impl<'a> SpinnerScope<'a> {
    fn start(spinner: Option<&'a SpinnerFn<'a>>, label: &'a str) -> Self {
        if let Some(cb) = spinner {
            cb(SpinnerEvent::Start, label);
        }
        Self { spinner, label }
    }
}

impl Drop for SpinnerScope<'_> {
    fn drop(&mut self) {
        if let Some(cb) = self.spinner {
            cb(SpinnerEvent::Stop, self.label);
        }
    }
}

/// `uname(2)` machine field.
fn uname_machine() -> Result<String, String> {
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return Err(format!(
            "Failed to query machine architecture: {}",
            std::io::Error::last_os_error()
        ));
    }
    let bytes: Vec<u8> = uts
        .machine
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8(bytes).map_err(|_| "Non-UTF8 machine architecture".to_string())
}

/// Maps the kernel's machine name onto the CLI's release names. Unknown
/// machines are an error, not a guess.
pub fn cli_arch(machine: &str) -> Result<&'static str, String> {
    match machine {
        "x86_64" => Ok("x86_64"),
        "aarch64" | "arm64" => Ok("aarch64"),
        "i386" | "i686" => Ok("i386"),
        "armv7l" => Ok("armhf"),
        other => Err(format!("Unsupported architecture: {other}")),
    }
}
