//! Timed direct-I/O disk benchmark.
//!
//! # Invariants
//! - The benchmark file name is unique per process (PID suffix) and the file
//!   is removed on every exit path, early errors included.
//! - At most `queue_depth` requests are in flight per phase; every error
//!   path drains in-flight work before returning.
//! - Buffers, offsets and lengths are 4096-aligned so `O_DIRECT` holds.
//!
//! # Design Notes
//! - The preferred engine is an in-kernel io_uring queue; when ring setup
//!   fails the same bounded-window contract runs on a pool of threads.
//! - Open-mode fallback consumes `EINVAL` only; any other errno surfaces
//!   verbatim. Kernels that report `O_DIRECT` misses differently will not
//!   fall through.

pub mod threads;
pub mod uring;

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::{Duration, Instant};

use crate::config::{
    BENCH_FILE_STEM, DISK_BENCH_MAX_SECONDS, IO_ALIGNMENT, IO_READ_BLOCK_SIZE,
    IO_READ_QUEUE_DEPTH, IO_WRITE_BLOCK_SIZE, IO_WRITE_QUEUE_DEPTH,
};
use crate::os::interrupt::CancelToken;
use crate::util::aligned::{fill_incompressible, AlignedBuf};
use crate::util::format_bytes;

pub(crate) const INTERRUPTED_MSG: &str = "Operation interrupted by user";
pub(crate) const TIMED_OUT_MSG: &str = "Disk Test timed out (operation took too long)";

/// One timed run: write pass then read pass over the same file.
#[derive(Debug, Clone)]
pub struct DiskRunResult {
    pub label: String,
    pub write_mbps: f64,
    pub read_mbps: f64,
}

/// How the benchmark file was opened, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    DirectAndSync,
    Direct,
    Sync,
    Buffered,
}

impl StorageMode {
    fn extra_write_flags(self) -> libc::c_int {
        match self {
            StorageMode::DirectAndSync => libc::O_DIRECT | libc::O_DSYNC,
            StorageMode::Direct => libc::O_DIRECT,
            StorageMode::Sync => libc::O_DSYNC,
            StorageMode::Buffered => 0,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            StorageMode::DirectAndSync => "O_DIRECT|O_DSYNC",
            StorageMode::Direct => "O_DIRECT",
            StorageMode::Sync => "O_DSYNC",
            StorageMode::Buffered => "buffered",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseDir {
    Write,
    Read,
}

impl PhaseDir {
    pub(crate) fn op_name(self) -> &'static str {
        match self {
            PhaseDir::Write => "write",
            PhaseDir::Read => "read",
        }
    }
}

/// Everything one I/O phase needs, shared with the engines.
pub(crate) struct IoPhase<'a> {
    pub dir: PhaseDir,
    pub fd: RawFd,
    pub total_blocks: u64,
    pub total_bytes: u64,
    pub block_size: usize,
    pub queue_depth: u32,
    pub deadline: Instant,
    pub label: &'a str,
}

impl IoPhase<'_> {
    /// Transfer length for `block_idx`: the block size, truncated to the
    /// remaining bytes for the final block.
    #[inline]
    pub(crate) fn chunk_len(&self, block_idx: u64) -> usize {
        let offset = block_idx * self.block_size as u64;
        (self.total_bytes - offset).min(self.block_size as u64) as usize
    }
}

/// Runs one benchmark in the current directory. The progress callback is
/// invoked every two completions and once at phase end with
/// `(completed, total, label)`.
pub fn run_io_test(
    size_mib: u32,
    label: &str,
    progress: Option<&dyn Fn(u64, u64, &str)>,
    cancel: &CancelToken,
) -> Result<DiskRunResult, String> {
    run_io_test_in(Path::new("."), size_mib, label, progress, cancel)
}

/// Same as [`run_io_test`] with an explicit working directory.
pub fn run_io_test_in(
    dir: &Path,
    size_mib: u32,
    label: &str,
    progress: Option<&dyn Fn(u64, u64, &str)>,
    cancel: &CancelToken,
) -> Result<DiskRunResult, String> {
    let path = dir.join(format!("{BENCH_FILE_STEM}.{}", std::process::id()));
    let _cleaner = FileCleaner { path: path.clone() };

    let total_bytes = u64::from(size_mib) * 1024 * 1024;
    check_free_space(dir, total_bytes)?;

    let mut write_buf = AlignedBuf::zeroed(IO_WRITE_BLOCK_SIZE, IO_ALIGNMENT);
    fill_incompressible(write_buf.as_mut_slice());
    let mut read_bufs: Vec<AlignedBuf> = (0..IO_READ_QUEUE_DEPTH.max(1))
        .map(|_| {
            let mut buf = AlignedBuf::zeroed(IO_READ_BLOCK_SIZE, IO_ALIGNMENT);
            fill_incompressible(buf.as_mut_slice());
            buf
        })
        .collect();

    let total_write_blocks = total_bytes.div_ceil(IO_WRITE_BLOCK_SIZE as u64);
    let total_read_blocks = total_bytes.div_ceil(IO_READ_BLOCK_SIZE as u64);
    let write_label = format!("{label} Write");
    let read_label = format!("{label} Read");

    let write_start = Instant::now();
    {
        let (file, mode) = open_write_target(&path)?;
        if mode != StorageMode::DirectAndSync {
            warn_cache_mode(mode);
        }
        preallocate(&file, total_bytes)?;

        let phase = IoPhase {
            dir: PhaseDir::Write,
            fd: file.as_raw_fd(),
            total_blocks: total_write_blocks,
            total_bytes,
            block_size: IO_WRITE_BLOCK_SIZE,
            queue_depth: IO_WRITE_QUEUE_DEPTH.max(1),
            deadline: write_start + Duration::from_secs(DISK_BENCH_MAX_SECONDS),
            label: &write_label,
        };
        run_phase(&phase, Some(&write_buf), &mut [], cancel, progress)?;
        if let Some(cb) = progress {
            cb(total_write_blocks, total_write_blocks, &write_label);
        }

        if unsafe { libc::fdatasync(file.as_raw_fd()) } == -1 {
            let err = io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(format!("Disk sync failed: {}", errno_message(err, "sync")));
        }
        // Advisory; a refusal does not affect the measurement.
        unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_DONTNEED) };
    }
    let write_secs = write_start.elapsed().as_secs_f64();
    let write_mbps = if write_secs <= 0.0 {
        0.0
    } else {
        f64::from(size_mib) / write_secs
    };

    let read_file = open_read_source(&path)?;
    let read_start = Instant::now();
    let phase = IoPhase {
        dir: PhaseDir::Read,
        fd: read_file.as_raw_fd(),
        total_blocks: total_read_blocks,
        total_bytes,
        block_size: IO_READ_BLOCK_SIZE,
        queue_depth: IO_READ_QUEUE_DEPTH.max(1),
        deadline: read_start + Duration::from_secs(DISK_BENCH_MAX_SECONDS),
        label: &read_label,
    };
    run_phase(&phase, None, &mut read_bufs, cancel, progress)?;
    if let Some(cb) = progress {
        cb(total_read_blocks, total_read_blocks, &read_label);
    }
    drop(read_file);
    let read_secs = read_start.elapsed().as_secs_f64();
    let read_mbps = if read_secs <= 0.0 {
        0.0
    } else {
        f64::from(size_mib) / read_secs
    };

    Ok(DiskRunResult {
        label: label.to_string(),
        write_mbps,
        read_mbps,
    })
}

/// Prefers the in-kernel queue; a ring that cannot be set up demotes the
/// phase to the thread pool with the same bounded-window contract.
fn run_phase(
    phase: &IoPhase,
    write_buf: Option<&AlignedBuf>,
    read_bufs: &mut [AlignedBuf],
    cancel: &CancelToken,
    progress: Option<&dyn Fn(u64, u64, &str)>,
) -> Result<(), String> {
    match uring::UringEngine::new(phase.queue_depth) {
        Ok(mut engine) => engine.run(phase, write_buf, read_bufs, cancel, progress),
        Err(err) => {
            warn_no_uring(&err);
            threads::run_threaded_phase(phase, write_buf, read_bufs, cancel, progress)
        }
    }
}

/// Tries the open-flag ladder, strictest first, recording the accepted mode.
/// Only `EINVAL` falls through to the next level.
fn open_write_target(path: &Path) -> Result<(File, StorageMode), String> {
    const LADDER: [StorageMode; 4] = [
        StorageMode::DirectAndSync,
        StorageMode::Direct,
        StorageMode::Sync,
        StorageMode::Buffered,
    ];

    for (i, mode) in LADDER.iter().enumerate() {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .truncate(true)
            .mode(0o600)
            .custom_flags(mode.extra_write_flags())
            .open(path)
        {
            Ok(file) => return Ok((file, *mode)),
            Err(err) => {
                let is_last = i + 1 == LADDER.len();
                if !is_last && err.raw_os_error() == Some(libc::EINVAL) {
                    // Some filesystems create the entry before refusing
                    // O_DIRECT; clear it so O_EXCL holds on the next try.
                    let _ = fs::remove_file(path);
                    continue;
                }
                return Err(errno_message(err.raw_os_error().unwrap_or(0), "create"));
            }
        }
    }
    unreachable!("open ladder covers the buffered mode")
}

fn open_read_source(path: &Path) -> Result<File, String> {
    match OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECT)
        .open(path)
    {
        Ok(file) => Ok(file),
        Err(err) if err.raw_os_error() == Some(libc::EINVAL) => OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| errno_message(e.raw_os_error().unwrap_or(0), "open/read")),
        Err(err) => Err(errno_message(err.raw_os_error().unwrap_or(0), "open/read")),
    }
}

fn preallocate(file: &File, len: u64) -> Result<(), String> {
    let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, len as libc::off_t) };
    if rc != 0 && rc != libc::EINVAL && rc != libc::ENOTSUP {
        return Err(format!(
            "Preallocation failed: {}",
            io::Error::from_raw_os_error(rc)
        ));
    }
    Ok(())
}

fn check_free_space(dir: &Path, required: u64) -> Result<(), String> {
    let Ok(c_dir) = std::ffi::CString::new(dir.as_os_str().as_encoded_bytes().to_vec()) else {
        return Ok(());
    };
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_dir.as_ptr(), &mut vfs) } == 0 {
        let available = vfs.f_bavail as u64 * vfs.f_frsize as u64;
        if available < required {
            return Err(format!(
                "Insufficient free space for disk benchmark (needs {})",
                format_bytes(required)
            ));
        }
    }
    Ok(())
}

/// Maps a benchmark errno to operator-facing text.
pub(crate) fn errno_message(err: libc::c_int, operation: &str) -> String {
    match err {
        libc::ENOSPC => "Storage capacity limit reached (Disk Full)".to_string(),
        libc::EDQUOT => "User disk quota exceeded".to_string(),
        libc::EIO => "Critical I/O error (Hardware failure suspected)".to_string(),
        libc::EROFS => "File system is Read-Only".to_string(),
        libc::EACCES | libc::EPERM => {
            if operation == "create" {
                "Permission denied. Cannot create file in this directory.".to_string()
            } else {
                "Permission denied during write operation.".to_string()
            }
        }
        libc::EINVAL => {
            if operation == "create" {
                "Invalid arguments (O_DIRECT not supported on this filesystem?)".to_string()
            } else {
                "Invalid argument provided".to_string()
            }
        }
        _ => format!(
            "Operation '{operation}' failed: {}",
            io::Error::from_raw_os_error(err)
        ),
    }
}

fn warn_cache_mode(mode: StorageMode) {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        eprintln!(
            "Warning: benchmark file opened with {} (not O_DIRECT|O_DSYNC); \
             results may reflect RAM cache rather than disk speed.",
            mode.describe()
        );
    });
}

fn warn_no_uring(err: &io::Error) {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        eprintln!("Note: io_uring unavailable ({err}); using threaded I/O fallback.");
    });
}

struct FileCleaner {
    path: PathBuf,
}

impl Drop for FileCleaner {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    fn bench_path(dir: &Path) -> PathBuf {
        dir.join(format!("{BENCH_FILE_STEM}.{}", std::process::id()))
    }

    #[test]
    fn happy_path_reports_positive_throughput_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        let calls = AtomicU64::new(0);
        let progress = |_done: u64, _total: u64, _label: &str| {
            calls.fetch_add(1, Ordering::Relaxed);
        };

        let result =
            run_io_test_in(tmp.path(), 4, "I/O Speed (Test)", Some(&progress), &cancel).unwrap();

        assert!(result.write_mbps > 0.0);
        assert!(result.read_mbps > 0.0);
        assert_eq!(result.label, "I/O Speed (Test)");
        assert!(calls.load(Ordering::Relaxed) >= 2);
        assert!(!bench_path(tmp.path()).exists());
    }

    #[test]
    fn back_to_back_runs_leave_no_residue() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        let first = run_io_test_in(tmp.path(), 2, "Run", None, &cancel).unwrap();
        let second = run_io_test_in(tmp.path(), 2, "Run", None, &cancel).unwrap();
        assert!(first.write_mbps > 0.0);
        assert!(second.write_mbps > 0.0);
        assert!(!bench_path(tmp.path()).exists());
    }

    #[test]
    fn cancellation_aborts_and_removes_file() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_io_test_in(tmp.path(), 4, "Run", None, &cancel).unwrap_err();
        assert_eq!(err, INTERRUPTED_MSG);
        assert!(!bench_path(tmp.path()).exists());
    }

    #[test]
    fn free_space_probe_rejects_absurd_sizes() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        // 3 PiB will not fit anywhere this test runs.
        let err = run_io_test_in(tmp.path(), 3 * 1024 * 1024 * 1024, "Run", None, &cancel)
            .unwrap_err();
        assert!(err.contains("Insufficient free space"), "{err}");
    }

    #[test]
    fn errno_text_classifies_common_failures() {
        assert_eq!(
            errno_message(libc::ENOSPC, "write"),
            "Storage capacity limit reached (Disk Full)"
        );
        assert!(errno_message(libc::EINVAL, "create").contains("O_DIRECT"));
        assert!(errno_message(libc::EBADF, "read").contains("Operation 'read' failed"));
    }
}
