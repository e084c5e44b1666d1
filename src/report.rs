//! Terminal rendering: headers, info rows, progress bar, spinner, tables.
//!
//! The report is the product; it goes to stdout. Warnings and notes go to
//! stderr so piping the report stays clean.

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use colored::Colorize;

use crate::config::{INFO_LABEL_WIDTH, PROGRESS_BAR_WIDTH, TERM_WIDTH, UI_SPINNER_DELAY_MS};
use crate::speedtest::{SpeedTestReport, SpinnerEvent};

const BRAILLE_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const ASCII_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];

pub fn term_width() -> usize {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc == 0 && ws.ws_col > 0 {
        return (ws.ws_col as usize).min(TERM_WIDTH);
    }
    TERM_WIDTH
}

pub fn print_line() {
    println!("{}", "-".repeat(term_width()));
}

pub fn print_centered_header(text: &str) {
    let width = term_width();
    let len = text.chars().count();
    if len + 2 >= width {
        println!("{text}");
        return;
    }
    let remaining = width - len - 2;
    let left = remaining / 2;
    let right = remaining - left;
    println!("{} {text} {}", "-".repeat(left), "-".repeat(right));
}

pub fn print_section(title: &str) {
    println!("\n -> {}", title.bold());
}

pub fn info_row(label: &str, value: impl fmt::Display) {
    println!(" {label:<INFO_LABEL_WIDTH$} : {value}");
}

pub fn clear_current_line() {
    print!("\r\x1b[2K");
    let _ = io::stdout().flush();
}

/// In-place progress bar for the disk benchmark, one render per callback.
pub fn make_progress_renderer(label_width: usize) -> impl Fn(u64, u64, &str) {
    move |done, total, label| {
        let filled = if total == 0 {
            PROGRESS_BAR_WIDTH
        } else {
            ((done as usize).saturating_mul(PROGRESS_BAR_WIDTH) / total as usize)
                .min(PROGRESS_BAR_WIDTH)
        };
        let bar: String =
            "#".repeat(filled) + &"-".repeat(PROGRESS_BAR_WIDTH - filled);
        print!(" {label:<label_width$}: [{bar}] {done}/{total}\r");
        let _ = io::stdout().flush();
    }
}

/// `"812.41 Mbps"` / `"1.02 Gbps"`.
pub fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        return format!("{:.2} Gbps", mbps / 1000.0);
    }
    format!("{mbps:.2} Mbps")
}

pub fn render_speed_results(report: &SpeedTestReport) {
    println!(
        "{:<24}{:<18}{:<18}{:<12}{:<8}",
        " Node Name", "Download", "Upload", "Latency", "Loss"
    );
    // Width formatting happens before colorization; escape codes inside a
    // padded field would skew the columns.
    for entry in &report.entries {
        let name = format!(" {}", entry.server_label);
        if !entry.ok {
            let mut err = entry.error.clone();
            if err.chars().count() > 45 {
                err = err.chars().take(42).collect::<String>() + "...";
            }
            println!(
                "{}{}",
                format!("{name:<24}").yellow(),
                format!("Error: {err}").red()
            );
            continue;
        }

        let latency = if entry.latency_ms > 0.0 {
            format!("{:.2} ms", entry.latency_ms)
        } else {
            "-".to_string()
        };
        let loss = if entry.packet_loss.is_empty() {
            "-"
        } else {
            &entry.packet_loss
        };
        println!(
            "{}{}{}{}{}",
            format!("{name:<24}").yellow(),
            format!("{:<18}", format_speed(entry.download_mbps)).green(),
            format!("{:<18}", format_speed(entry.upload_mbps)).red(),
            format!("{latency:<12}").cyan(),
            format!("{loss:<8}").red()
        );
    }
}

/// `"2 min 13 sec"` past the minute mark, `"47 sec"` below it.
pub fn format_elapsed(seconds: f64) -> String {
    if seconds >= 100.0 {
        let minutes = (seconds / 60.0) as u64;
        let rest = seconds - (minutes as f64) * 60.0;
        return format!("{minutes} min {rest:.0} sec");
    }
    format!("{seconds:.0} sec")
}

/// Braille (or ASCII, without UTF-8 locales) spinner on its own thread. It
/// only renders; shared state is the stop flag and the label.
pub struct UiSpinner {
    inner: Mutex<SpinnerInner>,
}

#[derive(Default)]
struct SpinnerInner {
    stop: Option<Arc<AtomicBool>>,
    handle: Option<JoinHandle<()>>,
}

impl UiSpinner {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SpinnerInner::default()),
        }
    }

    pub fn start(&self, label: &str) {
        self.stop_current();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_seen = Arc::clone(&stop);
        let label = label.to_string();
        let started = Instant::now();
        let frames: &'static [&'static str] = if utf8_locale() {
            &BRAILLE_FRAMES
        } else {
            &ASCII_FRAMES
        };

        let handle = thread::spawn(move || {
            let mut idx = 0usize;
            while !stop_seen.load(Ordering::Relaxed) {
                let elapsed = started.elapsed().as_secs_f64();
                print!(
                    "\r {:<28} {} {:4.1}s",
                    label,
                    frames[idx % frames.len()],
                    elapsed
                );
                let _ = io::stdout().flush();
                idx += 1;
                thread::sleep(Duration::from_millis(UI_SPINNER_DELAY_MS));
            }
            clear_current_line();
        });

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.stop = Some(stop);
        inner.handle = Some(handle);
    }

    pub fn stop_current(&self) {
        let (stop, handle) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            (inner.stop.take(), inner.handle.take())
        };
        if let Some(stop) = stop {
            stop.store(true, Ordering::Relaxed);
        }
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Default for UiSpinner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UiSpinner {
    fn drop(&mut self) {
        self.stop_current();
    }
}

/// Adapts a [`UiSpinner`] to the speed-test driver's callback shape.
pub fn make_spinner_callback() -> impl Fn(SpinnerEvent, &str) {
    let spinner = UiSpinner::new();
    move |event, label| match event {
        SpinnerEvent::Start => spinner.start(label),
        SpinnerEvent::Stop => spinner.stop_current(),
    }
}

fn utf8_locale() -> bool {
    std::env::var("LANG")
        .map(|lang| lang.contains("UTF-8") || lang.contains("utf8"))
        .unwrap_or(false)
}
