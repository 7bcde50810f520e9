//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - Environment variables
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Display server configuration
    #[serde(default)]
    pub display: DisplayConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Session launch configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Display server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// X server binary
    pub xorg_path: PathBuf,

    /// Compositing manager binary (spawned once the server log settles)
    pub compositor_path: PathBuf,

    /// X server log file, also used for readiness detection
    pub server_log: PathBuf,

    /// X authority file passed to the server and exported to sessions
    pub auth_file: PathBuf,

    /// How many display numbers to probe for a free one
    pub max_displays: u32,

    /// Wallpaper applied to the root window
    pub wallpaper: PathBuf,

    /// Wallpaper helper binary
    pub hsetroot_path: PathBuf,

    /// Root window attribute helper binary
    pub xsetroot_path: PathBuf,

    /// Cursor name given to the attribute helper
    pub cursor_name: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            xorg_path: PathBuf::from("/usr/bin/Xorg"),
            compositor_path: PathBuf::from("/usr/bin/xcompmgr"),
            server_log: PathBuf::from("/var/log/limen/xserver.log"),
            auth_file: PathBuf::from("/var/lib/limen/limen.auth"),
            max_displays: 16,
            wallpaper: PathBuf::from("/usr/share/limen/wallpaper.jpg"),
            hsetroot_path: PathBuf::from("/usr/bin/hsetroot"),
            xsetroot_path: PathBuf::from("/usr/bin/xsetroot"),
            cursor_name: "left_ptr".to_string(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// PAM service name
    pub service: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service: "limen".to_string(),
        }
    }
}

/// Session launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Command launched when no remembered session applies
    pub default_command: String,

    /// Directory of installed `*.desktop` session entries
    pub xsessions_dir: PathBuf,

    /// File remembering the last chosen session name
    pub last_session_file: PathBuf,

    /// Extra environment exported to session processes
    pub environment: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_command: "/usr/bin/xterm".to_string(),
            xsessions_dir: PathBuf::from("/usr/share/xsessions"),
            last_session_file: PathBuf::from("/var/lib/limen/last-session"),
            environment: BTreeMap::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level ("error", "warn", "info", "debug", "trace")
    pub level: String,

    /// Console log format ("pretty", "compact", "json")
    pub format: String,

    /// Directory for the log file (None = console only)
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_dir: Some(PathBuf::from("/var/log/limen")),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, the system path, or the user path,
    /// falling back to defaults when no file exists.
    ///
    /// An explicit path that fails to load is an error; the fallback
    /// locations are only used when present.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let system = Self::system_path();
        if system.exists() {
            return Self::load(&system);
        }

        if let Some(user) = Self::user_path() {
            if user.exists() {
                return Self::load(&user);
            }
        }

        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {:?}", parent))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context(format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// System-wide configuration path.
    pub fn system_path() -> PathBuf {
        PathBuf::from("/etc/limen/config.toml")
    }

    /// Per-user configuration path (used for preview runs).
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("limen").join("config.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.display.max_displays == 0 {
            anyhow::bail!("display.max_displays must be at least 1");
        }

        if self.auth.service.trim().is_empty() {
            anyhow::bail!("auth.service must not be empty");
        }

        if self.session.default_command.trim().is_empty() {
            anyhow::bail!("session.default_command must not be empty");
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            other => anyhow::bail!("Invalid logging format: {}", other),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auth.service, "limen");
        assert_eq!(config.display.max_displays, 16);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [auth]
            service = "login"

            [display]
            max_displays = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.service, "login");
        assert_eq!(config.display.max_displays, 4);
        // Untouched sections keep their defaults
        assert_eq!(config.session.default_command, "/usr/bin/xterm");
        assert_eq!(config.display.cursor_name, "left_ptr");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.display.max_displays = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth.service = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("config.toml");

        let mut config = Config::default();
        config.auth.service = "limen-test".to_string();
        config
            .session
            .environment
            .insert("LANG".to_string(), "C.UTF-8".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.auth.service, "limen-test");
        assert_eq!(
            loaded.session.environment.get("LANG"),
            Some(&"C.UTF-8".to_string())
        );
    }

    #[test]
    fn test_load_or_default_without_files() {
        // No explicit path and no system file in the test environment
        // reachable from a tempdir-relative path; defaults must validate.
        let config = Config::load_or_default(None);
        // The system path may exist on a packaged host; accept either a
        // loaded or a default config as long as it validates.
        if let Ok(config) = config {
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let missing = Path::new("/nonexistent/limen-config.toml");
        assert!(Config::load_or_default(Some(missing)).is_err());
    }
}
