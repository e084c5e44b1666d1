//! Shared helpers: byte formatting, path utilities, aligned allocation.

pub mod aligned;
pub mod fmt;

pub use aligned::AlignedBuf;
pub use fmt::{format_bytes, trim};

use std::fs;
use std::path::{Path, PathBuf};

/// Directory containing the running executable, falling back to the current
/// directory when `/proc/self/exe` cannot be resolved.
pub fn exe_dir() -> PathBuf {
    if let Ok(exe) = fs::read_link("/proc/self/exe") {
        if let Some(parent) = exe.parent() {
            return parent.to_path_buf();
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Removes leftover work products from earlier runs (staged speed-test CLI,
/// downloaded tarball, benchmark files) in both the current directory and the
/// executable's directory. Best effort; errors are ignored.
pub fn cleanup_artifacts(bench_file_stem: &str) {
    let names = [
        crate::config::SPEEDTEST_TGZ,
        crate::config::SPEEDTEST_CLI_DIR,
        bench_file_stem,
    ];
    let exe = exe_dir();
    for name in names {
        remove_matching(Path::new("."), name);
        remove_matching(&exe, name);
    }
}

// Removes `dir/name` and any `dir/name.<suffix>` (stale PID-suffixed
// benchmark files from crashed runs).
fn remove_matching(dir: &Path, name: &str) {
    let exact = dir.join(name);
    if exact.is_dir() {
        let _ = fs::remove_dir_all(&exact);
    } else {
        let _ = fs::remove_file(&exact);
    }

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let prefix = format!("{name}.");
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with(&prefix)
            && file_name[prefix.len()..].bytes().all(|b| b.is_ascii_digit())
        {
            let _ = fs::remove_file(entry.path());
        }
    }
}
