//! Configuration for termrun.
//!
//! Settings are read from `~/.termrun/config.toml`. Every field is optional;
//! a missing or unreadable file means defaults.
//!
//! # Configuration File
//!
//! ```toml
//! # Shell used to run commands (default: /bin/sh, or cmd on Windows)
//! shell = "/bin/bash"
//! # Flag that makes the shell run one command line (default: -c, or /C)
//! shell_flag = "-c"
//!
//! # Log level for ~/.termrun/termrun.log
//! log_level = "debug"
//!
//! # Bytes per pipe read
//! read_buffer_size = 4096
//!
//! [colors]
//! echo = { r = 0, g = 255, b = 0 }
//! status = { r = 0, g = 255, b = 0 }
//! error = { r = 255, g = 0, b = 0 }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::process;
use crate::core::session::SessionOptions;
use crate::core::term;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell program, overriding the platform default
    pub shell: Option<String>,
    /// Flag passed before the command line, overriding `-c` / `/C`
    pub shell_flag: Option<String>,
    /// Log level name (error, warn, info, debug, trace)
    pub log_level: String,
    /// Bytes per pipe read
    pub read_buffer_size: usize,
    /// Colors of session messages
    pub colors: ColorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            shell_flag: None,
            log_level: "info".to_string(),
            read_buffer_size: process::DEFAULT_READ_BUFFER,
            colors: ColorConfig::default(),
        }
    }
}

/// Colors of the messages the session writes itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub echo: Color,
    pub status: Color,
    pub error: Color,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            echo: Color::new(0, 255, 0),
            status: Color::new(0, 255, 0),
            error: Color::new(255, 0, 0),
        }
    }
}

/// Color definition (RGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl From<Color> for term::Color {
    fn from(c: Color) -> Self {
        term::Color::Rgb(c.r, c.g, c.b)
    }
}

impl Config {
    /// Load configuration from file. A missing file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        data_dir().map(|dir| dir.join("config.toml"))
    }

    /// Options for a session built from this configuration
    pub fn session_options(&self) -> SessionOptions {
        let (shell, flag) = process::default_shell();
        SessionOptions {
            shell: self.shell.clone().unwrap_or_else(|| shell.to_string()),
            shell_flag: self.shell_flag.clone().unwrap_or_else(|| flag.to_string()),
            read_buffer: self.read_buffer_size.max(1),
            echo_color: self.colors.echo.into(),
            status_color: self.colors.status.into(),
            error_color: self.colors.error.into(),
        }
    }
}

/// `~/.termrun`, created on first use
pub fn data_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".termrun");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        let options = config.session_options();
        let (shell, flag) = process::default_shell();

        assert_eq!(options.shell, shell);
        assert_eq!(options.shell_flag, flag);
        assert_eq!(options.read_buffer, 4096);
        assert_eq!(options.error_color, term::Color::Rgb(255, 0, 0));
    }

    #[test]
    fn test_partial_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "shell = \"/bin/bash\"\nread_buffer_size = 0\n\n[colors]\nerror = { r = 200, g = 10, b = 10 }\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.colors.echo, Color::new(0, 255, 0));
        assert_eq!(config.colors.error, Color::new(200, 10, 10));

        let options = config.session_options();
        assert_eq!(options.shell, "/bin/bash");
        assert_eq!(options.read_buffer, 1);
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "shell = [not toml").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config::load_from(&temp.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unreadable_path_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as a file
        let err = Config::load_from(temp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = Config {
            shell: Some("/bin/zsh".to_string()),
            ..Config::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<Config>(&text).unwrap(), config);
    }
}
