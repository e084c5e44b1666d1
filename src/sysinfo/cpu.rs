//! CPU facts from /proc/cpuinfo and sysfs.

use std::fs;
use std::sync::OnceLock;

use crate::util::trim;

fn cpuinfo() -> &'static str {
    static CACHE: OnceLock<String> = OnceLock::new();
    CACHE.get_or_init(|| fs::read_to_string("/proc/cpuinfo").unwrap_or_default())
}

// Keys are searched in priority order across the whole file, so a generic
// key ("cpu") never shadows a specific one ("model name") on an earlier line.
fn cpuinfo_value(keys: &[&str]) -> Option<String> {
    for key in keys {
        for line in cpuinfo().lines() {
            if line.len() >= key.len() && line[..key.len()].eq_ignore_ascii_case(key) {
                if let Some((_, value)) = line.split_once(':') {
                    let value = trim(value);
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }
    None
}

/// Whether the flags/Features line lists `flag` as a standalone token.
fn cpu_has_flag(flag: &str) -> bool {
    for line in cpuinfo().lines() {
        if line.starts_with("flags") || line.starts_with("Features") {
            if let Some((_, value)) = line.split_once(':') {
                return value.split_ascii_whitespace().any(|token| token == flag);
            }
        }
    }
    false
}

pub fn model_name() -> String {
    if let Some(model) = cpuinfo_value(&["model name", "hardware", "cpu", "Model"]) {
        return model;
    }
    if let Ok(model) = fs::read_to_string("/sys/firmware/devicetree/base/model") {
        let model = trim(model.trim_end_matches('\0'));
        if !model.is_empty() {
            return model.to_string();
        }
    }
    let arch = crate::sysinfo::os::raw_arch();
    if arch != "unknown" {
        return arch;
    }
    "Unknown CPU".to_string()
}

/// `"<online cores> @ <max MHz> MHz"`.
pub fn cores_freq() -> String {
    let cores = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) }.max(1);

    let mut freq_mhz = 0.0f64;
    if let Ok(text) = fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq") {
        if let Ok(khz) = trim(&text).parse::<u64>() {
            freq_mhz = khz as f64 / 1000.0;
        }
    }
    if freq_mhz == 0.0 {
        if let Some(mhz) = cpuinfo_value(&["cpu MHz"]) {
            freq_mhz = mhz.parse().unwrap_or(0.0);
        }
    }
    format!("{cores} @ {freq_mhz:.1} MHz")
}

/// Largest cache level sysfs reports for cpu0, scaled for display.
pub fn cache_size() -> String {
    for index in ["3", "2", "1", "0"] {
        let path = format!("/sys/devices/system/cpu/cpu0/cache/index{index}/size");
        if let Ok(text) = fs::read_to_string(path) {
            return format_cache(trim(&text));
        }
    }
    "Unknown".to_string()
}

fn format_cache(text: &str) -> String {
    if text.is_empty() {
        return "Unknown".to_string();
    }
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    let Ok(value) = digits.parse::<u64>() else {
        return text.to_string();
    };
    let suffix = text[digits.len()..].chars().next();
    let bytes = match suffix.map(|c| c.to_ascii_uppercase()) {
        Some('K') => value * 1024,
        Some('M') => value * 1024 * 1024,
        // sysfs sizes are in KiB when no unit survives.
        _ => value * 1024,
    };
    if bytes >= 1024 * 1024 {
        format!("{:.0} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.0} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

pub fn has_aes() -> bool {
    cpu_has_flag("aes")
}

pub fn has_vmx() -> bool {
    cpu_has_flag("vmx") || cpu_has_flag("svm")
}

/// True when the kernel itself reports running under a hypervisor.
pub(crate) fn hypervisor_flag() -> bool {
    cpu_has_flag("hypervisor")
}
