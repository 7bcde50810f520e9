//! System Diagnostics and Status Reporting
//!
//! Provides runtime diagnostics, status reporting, and system information
//! for debugging and monitoring.

use std::path::Path;

use sysinfo::System;
use tracing::info;

use crate::config::Config;

/// System information for diagnostics
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// Operating system name (e.g., "Linux", "Ubuntu")
    pub os_name: String,
    /// Operating system version string
    pub os_version: String,

    /// Kernel version string
    pub kernel_version: String,

    /// Number of logical CPU cores
    pub cpu_count: usize,

    /// Total system memory in megabytes
    pub total_memory_mb: u64,

    /// System hostname
    pub hostname: String,
}

impl SystemInfo {
    /// Gather system information
    pub fn gather() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            os_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version().unwrap_or_else(|| "Unknown".to_string()),
            cpu_count: sys.cpus().len(),
            total_memory_mb: sys.total_memory() / 1024 / 1024,
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        }
    }

    /// Log system information
    pub fn log(&self) {
        info!("=== System Information ===");
        info!("  OS: {} {}", self.os_name, self.os_version);
        info!("  Kernel: {}", self.kernel_version);
        info!("  Hostname: {}", self.hostname);
        info!("  CPUs: {}", self.cpu_count);
        info!("  Memory: {} MB", self.total_memory_mb);
    }
}

/// Detect the session type this process was started from
pub fn detect_session_type() -> Option<String> {
    if let Ok(session) = std::env::var("XDG_SESSION_TYPE") {
        return Some(session);
    }

    if let Ok(display) = std::env::var("DISPLAY") {
        return Some(format!("x11 ({})", display));
    }

    None
}

/// Get the X server version string
pub fn get_xserver_version(xorg_path: &Path) -> Option<String> {
    // Xorg prints its version banner to stderr
    std::process::Command::new(xorg_path)
        .arg("-version")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stderr).ok())
        .and_then(|text| {
            text.lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        })
}

/// Log complete diagnostics on startup
pub fn log_startup_diagnostics(config: &Config) {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║          Startup Diagnostics                              ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    // System info
    let sys_info = SystemInfo::gather();
    sys_info.log();

    // Environment
    info!("=== Environment ===");
    if let Some(session) = detect_session_type() {
        info!("  Session: {}", session);
    } else {
        info!("  Session: none (console start)");
    }

    if let Some(version) = get_xserver_version(&config.display.xorg_path) {
        info!("  X server: {}", version);
    } else {
        info!("  X server: not found at {:?}", config.display.xorg_path);
    }

    info!("=== Helper Binaries ===");
    for (name, path) in [
        ("compositor", &config.display.compositor_path),
        ("hsetroot", &config.display.hsetroot_path),
        ("xsetroot", &config.display.xsetroot_path),
    ] {
        if path.exists() {
            info!("  {}: {:?}", name, path);
        } else {
            info!("  {}: missing ({:?})", name, path);
        }
    }

    info!("=== Manager Configuration ===");
    info!("  Version: {}", env!("CARGO_PKG_VERSION"));
    info!("  PAM service: {}", config.auth.service);
    info!("  Sessions dir: {:?}", config.session.xsessions_dir);
    #[cfg(debug_assertions)]
    info!("  Build: debug");
    #[cfg(not(debug_assertions))]
    info!("  Build: release");

    info!("╚════════════════════════════════════════════════════════════╝");
}
