//! Read-only hardware and OS facts for the report.
//!
//! Everything here is best effort: a fact that cannot be read degrades to
//! `"Unknown"` (or zero) rather than failing the run.

pub mod cpu;
pub mod os;
pub mod storage;

pub use cpu::{cache_size, cores_freq, has_aes, has_vmx, model_name};
pub use os::{
    arch_display, kernel, load_average, os_pretty_name, tcp_congestion_control, uptime,
    virtualization,
};
pub use storage::{device_name, disk_usage, memory_status, swaps};

#[derive(Debug, Default, Clone, Copy)]
pub struct MemInfo {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiskInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub available: u64,
}

#[derive(Debug, Clone)]
pub struct SwapEntry {
    /// Partition, File, ZRAM, ZSwap.
    pub kind: String,
    /// Device path, or `"Enabled"` for zswap.
    pub path: String,
    pub size: u64,
    pub used: u64,
    pub is_zswap: bool,
}
