//! Utility Functions and Diagnostics
//!
//! System diagnostics and user-friendly error formatting.
//!
//! # Overview
//!
//! This module provides two utilities for operational visibility and debugging:
//!
//! 1. **Diagnostics** - System information and environment detection
//! 2. **Error Formatting** - User-friendly error messages with troubleshooting hints
//!
//! ## Diagnostics
//!
//! The [`diagnostics`] module helps understand the runtime environment:
//!
//! ```no_run
//! use limen::utils::SystemInfo;
//!
//! // Gather system information
//! let sys_info = SystemInfo::gather();
//! sys_info.log();  // Logs: OS, kernel, CPU count, memory
//! ```
//!
//! At startup the binary logs the full picture: session type, X server
//! version, and whether the configured helper binaries exist.
//!
//! ## Error Formatting
//!
//! The [`errors`] module provides user-friendly error messages:
//!
//! ```no_run
//! use limen::utils::format_user_error;
//!
//! # fn operation() -> anyhow::Result<()> { Ok(()) }
//! if let Err(e) = operation() {
//!     eprintln!("{}", format_user_error(&e));
//!     // Shows:
//!     // - Formatted error with box drawing
//!     // - Context-specific troubleshooting steps
//!     // - Common causes and solutions
//!     // - Technical details
//! }
//! ```
//!
//! Error categories with context-aware help:
//! - Console errors → VT access, root requirement, container limitations
//! - Display errors → X server binary, stale locks, competing display managers
//! - Authentication errors → PAM service file, shadow access
//! - Config errors → Syntax validation, value ranges
//!
//! This makes troubleshooting accessible to users unfamiliar with VT/PAM internals.

pub mod diagnostics;
pub mod errors;

// Re-export key types
pub use diagnostics::{
    detect_session_type, get_xserver_version, log_startup_diagnostics, SystemInfo,
};
pub use errors::format_user_error;
