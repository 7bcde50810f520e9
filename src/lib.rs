//! # limen
//!
//! Console display manager for Linux - brings up an X display, prompts for
//! credentials, and supervises one user session at a time.
//!
//! This crate integrates four cooperating components:
//! - [`display`] - X server bring-up on a free display and virtual terminal
//! - [`auth`] - credential validation against the PAM stack
//! - [`session`] - the per-attempt lifecycle state machine
//! - [`manager`] - the run loop tying prompt, signals, and sessions together
//!
//! # Architecture
//!
//! ```text
//! limen
//!   ├─> DisplaySupervisor (X server, compositor readiness, styling)
//!   ├─> Greeter (login prompt; built-in console implementation)
//!   ├─> Validator (PAM transaction: authenticate, open/close session)
//!   ├─> UserSession (authenticate → login → wait → logout)
//!   └─> LoginManager (run loop, signal ring, attempt worker)
//! ```
//!
//! # Control Flow
//!
//! **Login Path:** Greeter → LoginManager → UserSession → Validator → child process
//!
//! **Signal Path:** kernel → signal ring → LoginManager poll → decision
//!
//! The manager polls a ring of recorded signal deliveries instead of
//! deciding inside handlers, so the pid-1 SIGTERM rule and termination
//! logging run in ordinary code.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Credential validation (PAM)
pub mod auth;

/// Manager configuration
pub mod config;

/// X server and compositor supervision
pub mod display;

/// Reserved process exit codes
pub mod exit;

/// Login prompt seam and the console implementation
pub mod greet;

/// Run loop and deferred signal handling
pub mod manager;

/// User session lifecycle
///
/// A [`session::UserSession`] walks one attempt through
/// authenticate → login → wait → logout, holding the validator handle so
/// the account session is closed exactly once. The [`session::registry`]
/// submodule discovers installed session commands from `.desktop` entries
/// and remembers the last choice.
pub mod session;

/// Utility functions
pub mod utils;

// Re-export the types a greeter or embedder needs most
pub use auth::{Credentials, Validator};
pub use greet::{Greeter, GreeterEvent};
pub use manager::LoginManager;
