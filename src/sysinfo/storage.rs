//! Memory, swap, and disk facts.

use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::sysinfo::{DiskInfo, MemInfo, SwapEntry};
use crate::util::trim;

pub fn memory_status() -> MemInfo {
    let mut info = MemInfo::default();
    let Ok(text) = fs::read_to_string("/proc/meminfo") else {
        return info;
    };
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            info.total = parse_kib(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            info.available = parse_kib(rest);
        }
        if info.total != 0 && info.available != 0 {
            break;
        }
    }
    info.used = info.total.saturating_sub(info.available);
    info
}

fn parse_kib(rest: &str) -> u64 {
    trim(rest)
        .split_ascii_whitespace()
        .next()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|kib| kib * 1024)
        .unwrap_or(0)
}

pub fn disk_usage(mountpoint: &Path) -> DiskInfo {
    let mut info = DiskInfo::default();
    let Ok(c_path) = CString::new(mountpoint.as_os_str().as_bytes()) else {
        return info;
    };
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut vfs) } == 0 {
        let frsize = vfs.f_frsize as u64;
        info.total = vfs.f_blocks as u64 * frsize;
        info.free = vfs.f_bfree as u64 * frsize;
        info.available = vfs.f_bavail as u64 * frsize;
        info.used = (vfs.f_blocks as u64).saturating_sub(vfs.f_bfree as u64) * frsize;
    }
    info
}

/// Active swap devices from /proc/swaps, plus a synthetic entry when zswap
/// is enabled.
pub fn swaps() -> Vec<SwapEntry> {
    let mut entries = Vec::new();

    if let Ok(text) = fs::read_to_string("/proc/swaps") {
        // Filename Type Size Used Priority
        for line in text.lines().skip(1) {
            let mut fields = line.split_ascii_whitespace();
            let (Some(path), Some(kind), Some(size), Some(used)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let kind = if path.contains("zram") {
                "ZRAM".to_string()
            } else {
                capitalize(kind)
            };
            entries.push(SwapEntry {
                kind,
                path: path.to_string(),
                size: size.parse::<u64>().map(|v| v * 1024).unwrap_or(0),
                used: used.parse::<u64>().map(|v| v * 1024).unwrap_or(0),
                is_zswap: false,
            });
        }
    }

    if let Ok(text) = fs::read_to_string("/sys/module/zswap/parameters/enabled") {
        if matches!(trim(&text), "Y" | "y" | "1") {
            entries.push(SwapEntry {
                kind: "ZSwap".to_string(),
                path: "Enabled".to_string(),
                size: 0,
                used: 0,
                is_zswap: true,
            });
        }
    }

    entries
}

fn capitalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
        out.extend(chars);
    }
    out
}

/// Resolves the filesystem source backing `path` via /proc/self/mountinfo:
/// the longest mount point that prefixes `path` wins, with an exact
/// major:minor match as fallback.
pub fn device_name(path: &Path) -> String {
    const UNKNOWN: &str = "unknown device";

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return UNKNOWN.to_string();
    };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(c_path.as_ptr(), &mut st) } != 0 {
        return UNKNOWN.to_string();
    }
    let Ok(mountinfo) = fs::read_to_string("/proc/self/mountinfo") else {
        return UNKNOWN.to_string();
    };

    let target_dev = format!("{}:{}", libc::major(st.st_dev), libc::minor(st.st_dev));
    let path_str = path.to_string_lossy();

    let mut best_match = UNKNOWN.to_string();
    let mut best_len = 0usize;
    let mut exact_dev_match = String::new();

    // 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw
    // (0)id (1)parent (2)maj:min (3)root (4)mountpoint ... - fstype source
    for line in mountinfo.lines() {
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();
        if fields.len() < 7 {
            continue;
        }
        let Some(sep) = fields.iter().position(|&f| f == "-") else {
            continue;
        };
        if sep + 2 >= fields.len() {
            continue;
        }
        let major_minor = fields[2];
        let mount_point = fields[4];
        let fs_type = fields[sep + 1];
        let source = fields[sep + 2];

        let display = if source == fs_type {
            source.to_string()
        } else {
            format!("{source} ({fs_type})")
        };

        if major_minor == target_dev {
            exact_dev_match = display.clone();
        }

        if path_str.starts_with(mount_point) {
            let boundary_ok = path_str.len() == mount_point.len()
                || mount_point == "/"
                || path_str.as_bytes()[mount_point.len()] == b'/';
            if boundary_ok && mount_point.len() > best_len {
                best_len = mount_point.len();
                best_match = display;
            }
        }
    }

    if best_len > 0 && best_match != UNKNOWN {
        return best_match;
    }
    if !exact_dev_match.is_empty() {
        return exact_dev_match;
    }
    best_match
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_status_reads_proc() {
        let mem = memory_status();
        assert!(mem.total > 0);
        assert!(mem.available <= mem.total);
        assert_eq!(mem.used, mem.total - mem.available);
    }

    #[test]
    fn disk_usage_of_root_is_sane() {
        let disk = disk_usage(Path::new("/"));
        assert!(disk.total > 0);
        assert!(disk.free <= disk.total);
        assert!(disk.available <= disk.total);
    }

    #[test]
    fn device_name_resolves_root() {
        let name = device_name(Path::new("/"));
        assert!(!name.is_empty());
    }

    #[test]
    fn capitalize_swap_types() {
        assert_eq!(capitalize("partition"), "Partition");
        assert_eq!(capitalize("file"), "File");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn parse_kib_field() {
        assert_eq!(parse_kib("    8056220 kB"), 8056220 * 1024);
        assert_eq!(parse_kib(" garbage"), 0);
    }
}
