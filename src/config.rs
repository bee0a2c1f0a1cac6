//! Configuration and color scheme management for runpane.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.runpane/config.toml`
//! - Built-in color schemes for rendering output (default, gruvbox, ...)
//! - User language definitions
//!
//! # Configuration File
//!
//! ```toml
//! # Color scheme: default, gruvbox-dark, solarized-dark,
//! #               monokai, nord, dracula, tokyo-night
//! color_scheme = "gruvbox-dark"
//!
//! # Log level when RUNPANE_LOG is not set
//! log_level = "info"
//!
//! [buffer]
//! max_lines = 10000
//!
//! [session]
//! retained_records = 10000
//!
//! [scratch]
//! dir = "/tmp/runpane"
//!
//! [[languages]]
//! name = "Ruby"
//! extension = "rb"
//! run_command = "ruby {file}"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ansi::{Color, Palette};
use crate::core::buffer::DEFAULT_MAX_LINES;
use crate::core::record::OutputKind;
use crate::core::session::SessionOptions;
use crate::language::LanguageSpec;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config: {0}")]
    Write(#[source] io::Error),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Color scheme name
    pub color_scheme: String,
    /// Log level used when `RUNPANE_LOG` is unset
    pub log_level: String,
    pub buffer: BufferConfig,
    pub session: SessionConfig,
    pub scratch: ScratchConfig,
    /// User languages
    pub languages: Vec<LanguageSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            color_scheme: "default".to_string(),
            log_level: "info".to_string(),
            buffer: BufferConfig::default(),
            session: SessionConfig::default(),
            scratch: ScratchConfig::default(),
            languages: Vec::new(),
        }
    }
}

/// Output buffer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub max_lines: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

/// Process session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub retained_records: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retained_records: DEFAULT_MAX_LINES,
        }
    }
}

impl SessionConfig {
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            retained_records: self.retained_records,
        }
    }
}

/// Scratch file settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Directory for scripts; defaults to `<os temp>/runpane`
    pub dir: Option<PathBuf>,
}

impl ScratchConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(crate::scratch::default_dir)
    }
}

impl Config {
    /// Load `~/.runpane/config.toml`. A missing file gives the defaults.
    ///
    /// # Errors
    ///
    /// Read or parse failures of an existing file.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    ///
    /// # Errors
    ///
    /// Read or parse failures.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Read)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a specific file
    ///
    /// # Errors
    ///
    /// Serialize or write failures.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Write)?;
        }
        fs::write(path, content).map_err(ConfigError::Write)
    }

    /// `~/.runpane/config.toml`
    pub fn config_path() -> Option<PathBuf> {
        data_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get the color scheme
    pub fn get_color_scheme(&self) -> ColorScheme {
        ColorScheme::by_name(&self.color_scheme)
    }
}

/// `~/.runpane`
pub fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".runpane"))
}

/// Output color scheme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorScheme {
    pub name: String,

    // Default foreground per record kind
    pub stdout: Color,
    pub stderr: Color,
    pub stdin: Color,
    pub system: Color,

    /// ANSI colors used by escape sequences
    pub palette: Palette,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self::default_scheme()
    }
}

impl ColorScheme {
    /// Foreground a record starts with before any escape sequence
    pub fn default_fg(&self, kind: OutputKind) -> Color {
        match kind {
            OutputKind::Stdout => self.stdout,
            OutputKind::Stderr => self.stderr,
            OutputKind::Stdin => self.stdin,
            OutputKind::System => self.system,
        }
    }

    /// Default color scheme
    pub fn default_scheme() -> Self {
        Self {
            name: "default".to_string(),

            stdout: Color::new(229, 229, 229),
            stderr: Color::new(241, 76, 76),
            stdin: Color::new(150, 150, 150),
            system: Color::new(100, 150, 255),

            palette: Palette::default(),
        }
    }

    /// Gruvbox Dark scheme
    pub fn gruvbox_dark() -> Self {
        Self {
            name: "gruvbox-dark".to_string(),

            stdout: Color::new(235, 219, 178),
            stderr: Color::new(251, 73, 52),
            stdin: Color::new(168, 153, 132),
            system: Color::new(131, 165, 152),

            palette: Palette::new([
                Color::new(40, 40, 40),
                Color::new(251, 73, 52),
                Color::new(184, 187, 38),
                Color::new(250, 189, 47),
                Color::new(131, 165, 152),
                Color::new(211, 134, 155),
                Color::new(142, 192, 124),
                Color::new(235, 219, 178),
                Color::new(146, 131, 116),
                Color::new(251, 73, 52),
                Color::new(184, 187, 38),
                Color::new(250, 189, 47),
                Color::new(131, 165, 152),
                Color::new(211, 134, 155),
                Color::new(142, 192, 124),
                Color::new(251, 241, 199),
            ]),
        }
    }

    /// Solarized Dark scheme
    pub fn solarized_dark() -> Self {
        Self {
            name: "solarized-dark".to_string(),

            stdout: Color::new(147, 161, 161),
            stderr: Color::new(220, 50, 47),
            stdin: Color::new(101, 123, 131),
            system: Color::new(38, 139, 210),

            palette: Palette::new([
                Color::new(7, 54, 66),
                Color::new(220, 50, 47),
                Color::new(133, 153, 0),
                Color::new(181, 137, 0),
                Color::new(38, 139, 210),
                Color::new(211, 54, 130),
                Color::new(42, 161, 152),
                Color::new(238, 232, 213),
                Color::new(0, 43, 54),
                Color::new(203, 75, 22),
                Color::new(88, 110, 117),
                Color::new(101, 123, 131),
                Color::new(131, 148, 150),
                Color::new(108, 113, 196),
                Color::new(147, 161, 161),
                Color::new(253, 246, 227),
            ]),
        }
    }

    /// Monokai scheme
    pub fn monokai() -> Self {
        Self {
            name: "monokai".to_string(),

            stdout: Color::new(248, 248, 242),
            stderr: Color::new(249, 38, 114),
            stdin: Color::new(150, 150, 140),
            system: Color::new(102, 217, 239),

            palette: Palette::new([
                Color::new(39, 40, 34),
                Color::new(249, 38, 114),
                Color::new(166, 226, 46),
                Color::new(244, 191, 117),
                Color::new(102, 217, 239),
                Color::new(174, 129, 255),
                Color::new(161, 239, 228),
                Color::new(248, 248, 242),
                Color::new(117, 113, 94),
                Color::new(249, 38, 114),
                Color::new(166, 226, 46),
                Color::new(244, 191, 117),
                Color::new(102, 217, 239),
                Color::new(174, 129, 255),
                Color::new(161, 239, 228),
                Color::new(249, 248, 245),
            ]),
        }
    }

    /// Nord scheme
    pub fn nord() -> Self {
        Self {
            name: "nord".to_string(),

            stdout: Color::new(216, 222, 233),
            stderr: Color::new(191, 97, 106),
            stdin: Color::new(147, 161, 181),
            system: Color::new(136, 192, 208),

            palette: Palette::new([
                Color::new(59, 66, 82),
                Color::new(191, 97, 106),
                Color::new(163, 190, 140),
                Color::new(235, 203, 139),
                Color::new(129, 161, 193),
                Color::new(180, 142, 173),
                Color::new(136, 192, 208),
                Color::new(229, 233, 240),
                Color::new(76, 86, 106),
                Color::new(191, 97, 106),
                Color::new(163, 190, 140),
                Color::new(235, 203, 139),
                Color::new(129, 161, 193),
                Color::new(180, 142, 173),
                Color::new(143, 188, 187),
                Color::new(236, 239, 244),
            ]),
        }
    }

    /// Dracula scheme
    pub fn dracula() -> Self {
        Self {
            name: "dracula".to_string(),

            stdout: Color::new(248, 248, 242),
            stderr: Color::new(255, 85, 85),
            stdin: Color::new(98, 114, 164),
            system: Color::new(189, 147, 249),

            palette: Palette::new([
                Color::new(33, 34, 44),
                Color::new(255, 85, 85),
                Color::new(80, 250, 123),
                Color::new(241, 250, 140),
                Color::new(189, 147, 249),
                Color::new(255, 121, 198),
                Color::new(139, 233, 253),
                Color::new(248, 248, 242),
                Color::new(98, 114, 164),
                Color::new(255, 110, 110),
                Color::new(105, 255, 148),
                Color::new(255, 255, 165),
                Color::new(214, 172, 255),
                Color::new(255, 146, 223),
                Color::new(164, 255, 255),
                Color::new(255, 255, 255),
            ]),
        }
    }

    /// Tokyo Night scheme
    pub fn tokyo_night() -> Self {
        Self {
            name: "tokyo-night".to_string(),

            stdout: Color::new(169, 177, 214),
            stderr: Color::new(247, 118, 142),
            stdin: Color::new(86, 95, 137),
            system: Color::new(122, 162, 247),

            palette: Palette::new([
                Color::new(21, 22, 30),
                Color::new(247, 118, 142),
                Color::new(158, 206, 106),
                Color::new(224, 175, 104),
                Color::new(122, 162, 247),
                Color::new(187, 154, 247),
                Color::new(125, 207, 255),
                Color::new(169, 177, 214),
                Color::new(65, 72, 104),
                Color::new(247, 118, 142),
                Color::new(158, 206, 106),
                Color::new(224, 175, 104),
                Color::new(122, 162, 247),
                Color::new(187, 154, 247),
                Color::new(125, 207, 255),
                Color::new(192, 202, 245),
            ]),
        }
    }

    /// Get scheme by name
    pub fn by_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "gruvbox-dark" | "gruvbox_dark" | "gruvbox" => Self::gruvbox_dark(),
            "solarized-dark" | "solarized_dark" => Self::solarized_dark(),
            "monokai" => Self::monokai(),
            "nord" => Self::nord(),
            "dracula" => Self::dracula(),
            "tokyo-night" | "tokyo_night" | "tokyonight" => Self::tokyo_night(),
            _ => Self::default_scheme(),
        }
    }

    /// List available schemes
    pub fn list() -> Vec<&'static str> {
        vec![
            "default",
            "gruvbox-dark",
            "solarized-dark",
            "monokai",
            "nord",
            "dracula",
            "tokyo-night",
        ]
    }
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
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.buffer.max_lines, 10_000);
        assert_eq!(config.session.options().retained_records, 10_000);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            color_scheme = "nord"

            [buffer]
            max_lines = 50

            [[languages]]
            name = "Ruby"
            extension = "rb"
            run_command = "ruby {file}"
            "#,
        )
        .unwrap();

        assert_eq!(config.get_color_scheme().name, "nord");
        assert_eq!(config.buffer.max_lines, 50);
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.languages[0].run_command, "ruby {file}");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            color_scheme: "dracula".to_string(),
            scratch: ScratchConfig {
                dir: Some(dir.path().join("scratch")),
            },
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        assert_eq!(config.scratch.dir(), dir.path().join("scratch"));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load_from(&dir.path().join("missing.toml")),
            Err(ConfigError::Read(_))
        ));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "buffer = 3").unwrap();
        assert!(matches!(Config::load_from(&bad), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_schemes_by_name() {
        for name in ColorScheme::list() {
            assert_eq!(ColorScheme::by_name(name).name, name);
        }
        assert_eq!(ColorScheme::by_name("GRUVBOX").name, "gruvbox-dark");
        assert_eq!(ColorScheme::by_name("unknown").name, "default");
    }

    #[test]
    fn test_default_fg_per_kind() {
        let scheme = ColorScheme::gruvbox_dark();
        assert_eq!(scheme.default_fg(OutputKind::Stdout), scheme.stdout);
        assert_eq!(scheme.default_fg(OutputKind::Stderr), scheme.stderr);
        assert_eq!(scheme.default_fg(OutputKind::System), scheme.system);
    }
}
