//! OS, kernel, and environment facts.

use std::fs;
use std::path::Path;

use crate::util::trim;

pub fn os_pretty_name() -> String {
    if let Ok(text) = fs::read_to_string("/etc/os-release") {
        for line in text.lines() {
            if let Some(value) = line.strip_prefix("PRETTY_NAME=") {
                let value = value.trim_matches(|c| c == '"' || c == '\'');
                if !value.is_empty() {
                    return value.to_string();
                }
                return "Linux".to_string();
            }
        }
    }
    "Linux".to_string()
}

pub(crate) fn raw_arch() -> String {
    uname_field(|uts| uts.machine).unwrap_or_else(|| "unknown".to_string())
}

/// `"x86_64 (64 Bit)"` style display.
pub fn arch_display() -> String {
    let arch = raw_arch();
    if arch == "unknown" {
        return "Unknown".to_string();
    }
    let mut bits = (std::mem::size_of::<usize>() * 8) as u32;
    if arch.contains("64") || arch == "s390x" {
        bits = 64;
    } else if arch.contains("86") || arch.starts_with("arm") {
        bits = 32;
    }
    format!("{arch} ({bits} Bit)")
}

pub fn kernel() -> String {
    uname_field(|uts| uts.release).unwrap_or_else(|| "Unknown".to_string())
}

pub fn tcp_congestion_control() -> String {
    match fs::read_to_string("/proc/sys/net/ipv4/tcp_congestion_control") {
        Ok(text) if !trim(&text).is_empty() => trim(&text).to_string(),
        _ => "Unknown".to_string(),
    }
}

pub fn uptime() -> String {
    let Ok(text) = fs::read_to_string("/proc/uptime") else {
        return "Unknown".to_string();
    };
    let Some(seconds) = text
        .split_ascii_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
    else {
        return "Unknown".to_string();
    };
    format_uptime(seconds as u64)
}

fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let mins = (total_secs % 3_600) / 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days} {}, ", if days == 1 { "day" } else { "days" }));
    }
    if days > 0 || hours > 0 {
        out.push_str(&format!(
            "{hours} {}, ",
            if hours == 1 { "hour" } else { "hours" }
        ));
    }
    out.push_str(&format!("{mins} {}", if mins == 1 { "min" } else { "mins" }));
    out
}

pub fn load_average() -> String {
    let mut loads = [0.0f64; 3];
    let rc = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    if rc == -1 {
        return "Unknown".to_string();
    }
    format!("{:.2}, {:.2}, {:.2}", loads[0], loads[1], loads[2])
}

/// Container/hypervisor guess from well-known markers, most specific first.
pub fn virtualization() -> String {
    if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
        return "Docker".to_string();
    }

    if let Ok(environ) = fs::read("/proc/1/environ") {
        for var in environ.split(|&b| b == 0) {
            if var.starts_with(b"container=lxc") {
                return "LXC".to_string();
            }
            if var.starts_with(b"WSL_DISTRO_NAME=")
                || var.starts_with(b"WSL_INTEROP=")
                || var.starts_with(b"WSLENV=")
            {
                return "WSL".to_string();
            }
        }
    }

    if Path::new("/proc/user_beancounters").exists() {
        return "OpenVZ".to_string();
    }

    let release = kernel();
    if release.contains("Microsoft") || release.contains("WSL") {
        return "WSL".to_string();
    }
    if ["/dev/dxg", "/dev/lxss", "/usr/lib/wsl", "/mnt/wsl"]
        .iter()
        .any(|p| Path::new(p).exists())
    {
        return "WSL".to_string();
    }

    if let Ok(product) = fs::read_to_string("/sys/class/dmi/id/product_name") {
        for (marker, name) in [
            ("KVM", "KVM"),
            ("QEMU", "QEMU"),
            ("VirtualBox", "VirtualBox"),
            ("VMware", "VMware"),
            ("Virtual Machine", "Hyper-V"),
        ] {
            if product.contains(marker) {
                return name.to_string();
            }
        }
    }

    if crate::sysinfo::cpu::hypervisor_flag() {
        return "Dedicated (Virtual)".to_string();
    }
    "Dedicated".to_string()
}

fn uname_field(select: fn(&libc::utsname) -> [libc::c_char; 65]) -> Option<String> {
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return None;
    }
    let field = select(&uts);
    let bytes: Vec<u8> = field
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8(bytes).ok()
}
