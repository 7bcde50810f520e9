//! Installed session discovery
//!
//! Reads the `Name=` and `Exec=` keys of `*.desktop` entries under the
//! configured xsessions directory and remembers the last chosen one in a
//! plain-text file, so the next login reuses it without asking.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use super::SessionCommand;
use crate::config::SessionConfig;

/// Fallback when neither the remembered choice nor the configured default
/// yields a runnable command.
const FALLBACK_COMMAND: &str = "/usr/bin/xterm";

/// One installed session entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    /// Display name (`Name=` key)
    pub name: String,

    /// Exec line (`Exec=` key, uninterpreted)
    pub exec: String,
}

/// List the installed sessions under `dir`, sorted by name.
///
/// An unreadable directory yields an empty list; entries missing either key
/// are skipped.
pub fn available(dir: &Path) -> Vec<SessionEntry> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read session directory {:?}: {}", dir, e);
            return Vec::new();
        }
    };

    let mut sessions = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "desktop") {
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(contents) => {
                if let Some(session) = parse_desktop_entry(&contents) {
                    debug!("Found session {:?} ({})", session.name, session.exec);
                    sessions.push(session);
                } else {
                    debug!("Skipping {:?}: missing Name= or Exec=", path);
                }
            }
            Err(e) => warn!("Cannot read session entry {:?}: {}", path, e),
        }
    }

    sessions.sort_by(|a, b| a.name.cmp(&b.name));
    sessions
}

/// Extract the first `Name=` and `Exec=` keys from a desktop entry.
fn parse_desktop_entry(contents: &str) -> Option<SessionEntry> {
    let mut name = None;
    let mut exec = None;

    for line in contents.lines() {
        let line = line.trim();
        if name.is_none() {
            if let Some(value) = line.strip_prefix("Name=") {
                name = Some(value.trim().to_string());
            }
        }
        if exec.is_none() {
            if let Some(value) = line.strip_prefix("Exec=") {
                exec = Some(value.trim().to_string());
            }
        }
        if name.is_some() && exec.is_some() {
            break;
        }
    }

    match (name, exec) {
        (Some(name), Some(exec)) if !name.is_empty() && !exec.is_empty() => {
            Some(SessionEntry { name, exec })
        }
        _ => None,
    }
}

/// The session name remembered from the previous login, if any.
pub fn last_choice(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let name = contents.trim();
            if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            }
        }
        Err(_) => None,
    }
}

/// Persist the chosen session name for the next login.
pub fn remember(path: &Path, name: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", name))
}

/// Resolve the command to launch for the next session.
///
/// Prefers the remembered choice when it still names an installed session,
/// then the configured default, then a plain xterm.
pub fn resolve_command(config: &SessionConfig) -> SessionCommand {
    if let Some(name) = last_choice(&config.last_session_file) {
        let sessions = available(&config.xsessions_dir);
        if let Some(entry) = sessions.iter().find(|entry| entry.name == name) {
            if let Some(command) = SessionCommand::parse(&entry.exec) {
                debug!("Using remembered session {:?}", name);
                return command;
            }
        }
        warn!("Remembered session {:?} is not installed; using default", name);
    }

    SessionCommand::parse(&config.default_command).unwrap_or_else(|| {
        warn!(
            "Configured session command {:?} is empty; falling back to {}",
            config.default_command, FALLBACK_COMMAND
        );
        SessionCommand {
            program: FALLBACK_COMMAND.into(),
            args: Vec::new(),
        }
    })
}
