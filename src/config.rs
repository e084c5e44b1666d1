//! Central tunables.
//!
//! Nothing here is user-configurable at run time; the report layout and the
//! benchmark defaults are calibrated against these values.

pub const APP_NAME: &str = "hostbench";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Timed disk runs contributing to the average row.
pub const DISK_IO_RUNS: u32 = 3;
/// Payload per disk run, MiB.
pub const DISK_TEST_SIZE_MIB: u32 = 1024;
/// Per-phase deadline for a disk run, seconds.
pub const DISK_BENCH_MAX_SECONDS: u64 = 600;

pub const IO_WRITE_QUEUE_DEPTH: u32 = 16;
pub const IO_READ_QUEUE_DEPTH: u32 = 16;
pub const IO_WRITE_BLOCK_SIZE: usize = 1024 * 1024;
pub const IO_READ_BLOCK_SIZE: usize = 1024 * 1024;
/// Direct I/O requires buffers, offsets and lengths aligned to this.
pub const IO_ALIGNMENT: usize = 4096;
/// Benchmark file stem; the live file carries a `.<pid>` suffix.
pub const BENCH_FILE_STEM: &str = "benchtest_file";

/// Hard cap on captured child-process output.
pub const PIPE_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

// Archive extraction quotas. Exceeding any of them aborts the extraction.
pub const TGZ_MAX_FILES: u32 = 10_000;
pub const TGZ_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const TGZ_MAX_TOTAL_SIZE: u64 = 500 * 1024 * 1024;
pub const TGZ_MAX_PATH_DEPTH: u32 = 20;
pub const TGZ_MAX_NAME_LENGTH: usize = 255;
pub const TGZ_MAX_TOTAL_PATH_LENGTH: usize = 4096;

pub const SPEEDTEST_CLI_DIR: &str = "speedtest-cli";
pub const SPEEDTEST_CLI_BIN: &str = "speedtest";
pub const SPEEDTEST_TGZ: &str = "speedtest.tgz";
pub const SPEEDTEST_CMD_TIMEOUT_SECS: u64 = 90;
pub const SPEEDTEST_DL_TIMEOUT_SECS: u64 = 60;

pub const HTTP_TIMEOUT_SECS: u64 = 10;
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const CHECK_CONN_TIMEOUT_SECS: u64 = 5;
pub const CHECK_CONN_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const HTTP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const UI_SPINNER_DELAY_MS: u64 = 150;
pub const IO_LABEL_WIDTH: usize = 22;
pub const PROGRESS_BAR_WIDTH: usize = 26;
pub const INFO_LABEL_WIDTH: usize = 18;
pub const TERM_WIDTH: usize = 78;
