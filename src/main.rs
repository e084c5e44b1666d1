use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use colored::Colorize;

use hostbench::config::{
    APP_NAME, APP_VERSION, BENCH_FILE_STEM, DISK_IO_RUNS, DISK_TEST_SIZE_MIB, IO_LABEL_WIDTH,
};
use hostbench::net::{fetch_net_meta, HttpClient};
use hostbench::os::interrupt::{install_signal_handlers, is_interrupted, CancelToken};
use hostbench::report::{
    clear_current_line, format_elapsed, info_row, make_progress_renderer, make_spinner_callback,
    print_centered_header, print_line, print_section, render_speed_results,
};
use hostbench::speedtest::SpeedTest;
use hostbench::util::{cleanup_artifacts, format_bytes};
use hostbench::{diskbench, sysinfo};

fn show_help(app_name: &str) {
    println!("Usage: {app_name}");
    println!();
    println!("Options:");
    println!("  -h, --help              Show this help message");
    println!("  -v, --version           Show version information");
    println!();
    println!("Examples:");
    println!("  ./{app_name}            # Run server profiling");
}

fn show_version() {
    println!("{APP_NAME} v{APP_VERSION}");
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let app_name = args
        .first()
        .map(|a| {
            Path::new(a)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| APP_NAME.to_string())
        })
        .unwrap_or_else(|| APP_NAME.to_string());

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => {
                show_help(&app_name);
                return ExitCode::SUCCESS;
            }
            "-v" | "--version" => {
                show_version();
                return ExitCode::SUCCESS;
            }
            other => {
                eprintln!("{}", format!("Error: Unknown option '{other}'").red());
                show_help(&app_name);
                return ExitCode::FAILURE;
            }
        }
    }

    let code = match run(&app_name) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("\n{}", format!("Fatal Error: {err}").red());
            ExitCode::FAILURE
        }
    };
    cleanup_artifacts(BENCH_FILE_STEM);
    code
}

fn run(app_name: &str) -> Result<(), String> {
    install_signal_handlers().map_err(|e| format!("Failed to install signal handlers: {e}"))?;
    let http = HttpClient::new()?;
    let start_time = Instant::now();

    print!("\x1bc");
    print_centered_header(&format!("{APP_NAME} - Rapid Server Profiler (v{APP_VERSION})"));
    println!(" {:<10} : https://github.com/hostbench/hostbench", "GitHub");
    println!(" {:<10} : ./{app_name}", "Usage");
    print_line();

    render_hardware_sections();

    let test_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    render_storage_section(&test_dir);
    render_network_section(&http);
    print_line();

    run_disk_suite();
    print_line();

    run_speed_test(&http);
    print_line();

    println!(
        " Finished in        : {}",
        format_elapsed(start_time.elapsed().as_secs_f64())
    );
    Ok(())
}

fn render_hardware_sections() {
    print_section("CPU & Hardware");
    info_row("CPU Model", sysinfo::model_name().cyan());
    info_row("CPU Cores", sysinfo::cores_freq().cyan());
    info_row("CPU Cache", sysinfo::cache_size().cyan());
    info_row("AES-NI", enabled_mark(sysinfo::has_aes()));
    info_row("VM-x/AMD-V", enabled_mark(sysinfo::has_vmx()));

    print_section("System Info");
    info_row("OS", sysinfo::os_pretty_name().cyan());
    info_row("Arch", sysinfo::arch_display().yellow());
    info_row("Kernel", sysinfo::kernel().yellow());
    info_row("TCP CC", sysinfo::tcp_congestion_control().yellow());
    info_row("Virtualization", sysinfo::virtualization().cyan());
    info_row("System Uptime", sysinfo::uptime().cyan());
    info_row("Load Average", sysinfo::load_average().yellow());
}

fn enabled_mark(enabled: bool) -> colored::ColoredString {
    if enabled {
        "✓ Enabled".green()
    } else {
        "✗ Disabled".red()
    }
}

fn render_storage_section(test_dir: &Path) {
    print_section("Storage & Memory");
    let device = sysinfo::device_name(test_dir);
    info_row(
        "Disk Test Path",
        format!(
            "{} ({})",
            test_dir.display().to_string().cyan(),
            device.yellow()
        ),
    );

    let disk = sysinfo::disk_usage(test_dir);
    info_row(
        "Total Disk",
        format!(
            "{} ({} Used)",
            format_bytes(disk.total).yellow(),
            format_bytes(disk.used).cyan()
        ),
    );

    let mem = sysinfo::memory_status();
    info_row(
        "Total Mem",
        format!(
            "{} ({} Used)",
            format_bytes(mem.total).yellow(),
            format_bytes(mem.used).cyan()
        ),
    );

    let swaps = sysinfo::swaps();
    if swaps.is_empty() {
        return;
    }
    let total: u64 = swaps.iter().map(|s| s.size).sum();
    let used: u64 = swaps.iter().map(|s| s.used).sum();
    info_row(
        "Total Swap",
        format!(
            "{} ({} Used)",
            format_bytes(total).yellow(),
            format_bytes(used).cyan()
        ),
    );
    for swap in &swaps {
        let label = format!("   -> {}", swap.kind);
        if swap.is_zswap {
            println!(" {label:<18} : {}", swap.path.green());
        } else {
            let usage = format!(
                "{} ({} Used)",
                format_bytes(swap.size),
                format_bytes(swap.used)
            );
            println!(" {label:<18} : {} ({})", usage.cyan(), swap.path);
        }
    }
}

fn render_network_section(http: &HttpClient) {
    print_section("Network");
    let v4 = http.check_connectivity("ipv4.google.com");
    let v6 = http.check_connectivity("ipv6.google.com");
    info_row(
        "IPv4/IPv6",
        format!("{} / {}", online_mark(v4), online_mark(v6)),
    );

    match fetch_net_meta(http) {
        Ok(meta) => {
            let isp = meta.isp_display();
            if !isp.is_empty() {
                info_row("ISP", isp.cyan());
            }
            let city = if meta.city.is_empty() { "-" } else { &meta.city };
            let country = if meta.country.is_empty() {
                "-"
            } else {
                &meta.country
            };
            info_row("Location", format!("{} / {}", city.cyan(), country.cyan()));
            if !meta.region.is_empty() {
                info_row("Region", meta.region.cyan());
            }
        }
        Err(err) => {
            info_row("IP Info", format!("Failed: {err}").red());
        }
    }
}

fn online_mark(online: bool) -> colored::ColoredString {
    if online {
        "✓ Online".green()
    } else {
        "✗ Offline".red()
    }
}

fn run_disk_suite() {
    println!(
        "Running I/O Test ({} File)...",
        format_bytes(u64::from(DISK_TEST_SIZE_MIB) * 1024 * 1024)
    );

    let cancel = CancelToken::new();
    let mut runs = Vec::with_capacity(DISK_IO_RUNS as usize);
    let mut failed = false;

    for i in 1..=DISK_IO_RUNS {
        let label = format!(" I/O Speed (Run #{i})");
        let progress = make_progress_renderer(IO_LABEL_WIDTH);

        let result =
            diskbench::run_io_test(DISK_TEST_SIZE_MIB, &label, Some(&progress), &cancel);
        clear_current_line();

        match result {
            Ok(run) => {
                println!(
                    " {:<IO_LABEL_WIDTH$}: {}   {}",
                    run.label,
                    format!("Write {:>8.1} MB/s", run.write_mbps).yellow(),
                    format!("Read {:>8.1} MB/s", run.read_mbps).cyan()
                );
                runs.push(run);
            }
            Err(err) => {
                println!("{}", format!("[!] Disk Test Aborted: {err}").red());
                failed = true;
                break;
            }
        }
    }

    if failed || runs.is_empty() {
        return;
    }
    let avg_write = runs.iter().map(|r| r.write_mbps).sum::<f64>() / runs.len() as f64;
    let avg_read = runs.iter().map(|r| r.read_mbps).sum::<f64>() / runs.len() as f64;
    println!(
        " {:<IO_LABEL_WIDTH$}: {}   {}",
        " I/O Speed (Average)",
        format!("Write {avg_write:>8.1} MB/s").yellow(),
        format!("Read {avg_read:>8.1} MB/s").cyan()
    );
    println!(
        "{}",
        "Note: Write speed reflects real disk commit speed (O_DIRECT).".bold()
    );
}

fn run_speed_test(http: &HttpClient) {
    if is_interrupted() {
        return;
    }
    let speed_test = match SpeedTest::new(http) {
        Ok(st) => st,
        Err(err) => {
            eprintln!("\n{}", format!("Speedtest Error: {err}").red());
            return;
        }
    };

    println!("Downloading Speedtest CLI...");
    if let Err(err) = speed_test.install() {
        eprintln!("\n{}", format!("Speedtest Error: {err}").red());
        return;
    }

    let cancel = CancelToken::new();
    let spinner = make_spinner_callback();
    let report = speed_test.run(Some(&spinner), &cancel);
    render_speed_results(&report);
}
