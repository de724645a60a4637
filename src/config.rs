//! Sorter settings.

use std::error::Error;
use std::fmt::{self, Display};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::line::{Decoration, TemplateError};

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// Settings file could not be read.
    Io(io::Error),
    /// Settings file is not valid JSON or has unexpected fields.
    Parse(serde_json::Error),
    /// A setting is out of its allowed range.
    Invalid(String),
    /// Line template does not yield a usable decoration.
    Template(TemplateError),
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
            ConfigError::Template(err) => Some(err),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ConfigError::Io(err) => write!(f, "settings not read: {}", err),
            ConfigError::Parse(err) => write!(f, "settings not parsed: {}", err),
            ConfigError::Invalid(msg) => write!(f, "invalid settings: {}", msg),
            ConfigError::Template(err) => write!(f, "{}", err),
        }
    }
}

/// Sorter settings, as found in `appsettings.json`:
///
/// ```json
/// {
///   "MaxTempFiles": 40,
///   "LinesToSortAtOnce": 4000000,
///   "LineFormat": "{0}. {1}",
///   "CustomTempFolderPath": "temp"
/// }
/// ```
///
/// Missing keys take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct Config {
    /// Maximum number of temporary files alive at once, at least 3. Merges read at most
    /// `max_temp_files - 1` files at a time.
    pub max_temp_files: u16,
    /// Lines per chunk sorted in memory, at least 2.
    pub lines_to_sort_at_once: usize,
    /// Line template, `{0}` being the number and `{1}` the text.
    pub line_format: String,
    /// Directory hosting the temporary working directories.
    pub custom_temp_folder_path: PathBuf,
}

impl Config {
    pub const MIN_TEMP_FILES: u16 = 3;
    pub const MIN_LINES_TO_SORT_AT_ONCE: usize = 2;

    /// Reads settings from a JSON file. The result is not validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
        return serde_json::from_str(&content).map_err(ConfigError::Parse);
    }

    /// Checks every setting and returns the decoration derived from the line template.
    pub fn validate(&self) -> Result<Decoration, ConfigError> {
        if self.max_temp_files < Self::MIN_TEMP_FILES {
            return Err(ConfigError::Invalid(format!(
                "MaxTempFiles must be at least {}, got {}",
                Self::MIN_TEMP_FILES,
                self.max_temp_files
            )));
        }
        if self.lines_to_sort_at_once < Self::MIN_LINES_TO_SORT_AT_ONCE {
            return Err(ConfigError::Invalid(format!(
                "LinesToSortAtOnce must be at least {}, got {}",
                Self::MIN_LINES_TO_SORT_AT_ONCE,
                self.lines_to_sort_at_once
            )));
        }
        if self.line_format.is_empty() {
            return Err(ConfigError::Invalid("LineFormat is required".to_string()));
        }
        if self.custom_temp_folder_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("CustomTempFolderPath is required".to_string()));
        }

        return Decoration::from_template(&self.line_format).map_err(ConfigError::Template);
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_temp_files: 40,
            lines_to_sort_at_once: 1_000_000,
            line_format: "{0}. {1}".to_string(),
            custom_temp_folder_path: std::env::temp_dir(),
        }
    }
}
