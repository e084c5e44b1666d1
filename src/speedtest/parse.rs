//! Interpreter for the speed-test CLI's line-delimited JSON output.
//!
//! # Design Notes
//! - Lines that fail to parse as JSON are expected (progress noise) and
//!   ignored without error.
//! - A `result` line wins and ends interpretation; log-level errors only
//!   set the entry's error text.
//! - Rate limiting is matched on raw substrings first so it is caught even
//!   when the CLI emits it outside JSON.

use serde_json::Value;

use crate::speedtest::SpeedEntry;
use crate::util::trim;

const RATE_LIMIT_MARKERS: [&str; 2] = ["Limit reached", "Too many requests"];

/// Folds one CLI invocation's combined output into `entry`.
pub fn apply_cli_output(output: &str, entry: &mut SpeedEntry) {
    let mut last_raw_line = "";
    let mut found_result = false;

    for raw_line in output.lines() {
        let line = trim(raw_line);
        if line.is_empty() {
            continue;
        }
        last_raw_line = line;

        if RATE_LIMIT_MARKERS.iter().any(|m| line.contains(m)) {
            entry.rate_limited = true;
            entry.error = "Rate Limit Reached".to_string();
            break;
        }

        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        if let Some(error) = value.get("error") {
            entry.error = match error.as_str() {
                Some(text) => sanitize_error(text),
                None => "Unknown CLI Error".to_string(),
            };
            continue;
        }

        match value.get("type").and_then(Value::as_str) {
            Some("result") => {
                let download = value.pointer("/download/bandwidth").and_then(Value::as_f64);
                let upload = value.pointer("/upload/bandwidth").and_then(Value::as_f64);
                let (Some(download), Some(upload)) = (download, upload) else {
                    entry.error = "Malformed result (missing speed data)".to_string();
                    continue;
                };

                entry.download_mbps = download * 8.0 / 1_000_000.0;
                entry.upload_mbps = upload * 8.0 / 1_000_000.0;
                entry.latency_ms = value
                    .pointer("/ping/latency")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                entry.packet_loss = match value.get("packetLoss").and_then(Value::as_f64) {
                    Some(loss) => format!("{loss:.2} %"),
                    None => "-".to_string(),
                };
                entry.ok = true;
                found_result = true;
                break;
            }
            Some("log") => {
                if value.get("level").and_then(Value::as_str) == Some("error") {
                    let message = value
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error");
                    if RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m)) {
                        entry.rate_limited = true;
                        entry.error = "Rate Limit Reached".to_string();
                        break;
                    }
                    if message.contains("No servers defined") {
                        entry.error = "Server Offline/Changed".to_string();
                    } else {
                        entry.error = sanitize_error(message);
                    }
                }
            }
            _ => {}
        }
    }

    if !found_result && !entry.ok && entry.error.is_empty() {
        if last_raw_line.is_empty() {
            entry.error = "No Result Data (Empty Output)".to_string();
        } else {
            entry.error = format!("CLI Error: {}", clip(last_raw_line, 50));
        }
    }
}

/// First line, trimmed, with a leading `"Error: "` stripped.
fn sanitize_error(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("");
    let cleaned = trim(first_line);
    cleaned.strip_prefix("Error: ").unwrap_or(cleaned).to_string()
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> SpeedEntry {
        SpeedEntry::new("1234", "Testville, TT")
    }

    #[test]
    fn result_line_fills_the_entry() {
        let mut e = entry();
        apply_cli_output(
            r#"{"type":"testStart","server":{"id":1234}}
{"type":"result","download":{"bandwidth":12500000},"upload":{"bandwidth":2500000},"ping":{"latency":14.25},"packetLoss":0.5}"#,
            &mut e,
        );
        assert!(e.ok);
        assert!((e.download_mbps - 100.0).abs() < 1e-9);
        assert!((e.upload_mbps - 20.0).abs() < 1e-9);
        assert!((e.latency_ms - 14.25).abs() < 1e-9);
        assert_eq!(e.packet_loss, "0.50 %");
        assert!(!e.rate_limited);
    }

    #[test]
    fn missing_packet_loss_renders_dash() {
        let mut e = entry();
        apply_cli_output(
            r#"{"type":"result","download":{"bandwidth":1000},"upload":{"bandwidth":1000}}"#,
            &mut e,
        );
        assert!(e.ok);
        assert_eq!(e.packet_loss, "-");
        assert_eq!(e.latency_ms, 0.0);
    }

    #[test]
    fn result_without_bandwidth_is_malformed() {
        let mut e = entry();
        apply_cli_output(r#"{"type":"result","download":{}}"#, &mut e);
        assert!(!e.ok);
        assert_eq!(e.error, "Malformed result (missing speed data)");
    }

    #[test]
    fn error_field_is_sanitized() {
        let mut e = entry();
        apply_cli_output(
            "{\"error\":\"Error: Configuration - cannot reach server \\nsecond line\"}",
            &mut e,
        );
        assert_eq!(e.error, "Configuration - cannot reach server");
        assert!(!e.ok);
    }

    #[test]
    fn non_string_error_is_unknown() {
        let mut e = entry();
        apply_cli_output(r#"{"error":{"code":7}}"#, &mut e);
        assert_eq!(e.error, "Unknown CLI Error");
    }

    #[test]
    fn raw_rate_limit_marker_short_circuits() {
        let mut e = entry();
        apply_cli_output(
            "plain text: Too many requests received\n{\"type\":\"result\"}",
            &mut e,
        );
        assert!(e.rate_limited);
        assert_eq!(e.error, "Rate Limit Reached");
        assert!(!e.ok);
    }

    #[test]
    fn log_level_rate_limit_short_circuits() {
        let mut e = entry();
        apply_cli_output(
            r#"{"type":"log","level":"error","message":"Limit reached. Try again later."}"#,
            &mut e,
        );
        assert!(e.rate_limited);
        assert_eq!(e.error, "Rate Limit Reached");
    }

    #[test]
    fn no_servers_defined_maps_to_offline() {
        let mut e = entry();
        apply_cli_output(
            r#"{"type":"log","level":"error","message":"No servers defined for this request"}"#,
            &mut e,
        );
        assert_eq!(e.error, "Server Offline/Changed");
    }

    #[test]
    fn log_info_lines_are_ignored() {
        let mut e = entry();
        apply_cli_output(
            r#"{"type":"log","level":"info","message":"starting"}
{"type":"result","download":{"bandwidth":125000},"upload":{"bandwidth":125000}}"#,
            &mut e,
        );
        assert!(e.ok);
        assert!(e.error.is_empty());
    }

    #[test]
    fn malformed_json_noise_is_tolerated() {
        let mut e = entry();
        apply_cli_output(
            "not json at all {{{\n\n{\"type\":\"result\",\"download\":{\"bandwidth\":125000},\"upload\":{\"bandwidth\":125000}}",
            &mut e,
        );
        assert!(e.ok);
    }

    #[test]
    fn fallback_error_clips_the_last_raw_line() {
        let mut e = entry();
        let noise = "x".repeat(80);
        apply_cli_output(&noise, &mut e);
        assert!(e.error.starts_with("CLI Error: "));
        assert!(e.error.ends_with("..."));
        assert_eq!(e.error.len(), "CLI Error: ".len() + 50);
    }

    #[test]
    fn empty_output_reports_no_data() {
        let mut e = entry();
        apply_cli_output("", &mut e);
        assert_eq!(e.error, "No Result Data (Empty Output)");
    }
}
