//! Tool configuration
//!
//! Settings come from an optional TOML file; command-line flags override it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unwind bound used when neither the target nor the settings give one
pub const DEFAULT_UNWIND: u32 = 5;

/// Per-target wall-clock limit in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Model checker executable
    pub backend: PathBuf,
    /// Compiler producing the artifact handed to the backend
    pub compiler: PathBuf,
    pub timeout_ms: u64,
    /// Global unwind bound; `None` means the built-in default
    pub unwind: Option<u32>,
    /// Extra backend flags; an entry may hold several space-separated flags
    pub backend_args: Vec<String>,
    /// Extra compiler classpath entries
    pub classpath: Vec<PathBuf>,
    /// Keep the staging directory after the run
    pub keep_translation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: PathBuf::from("jbmc"),
            compiler: PathBuf::from("javac"),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            unwind: None,
            backend_args: Vec::new(),
            classpath: Vec::new(),
            keep_translation: false,
        }
    }
}

/// Command-line values that override the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub backend: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub unwind: Option<u32>,
    pub backend_args: Vec<String>,
    pub classpath: Vec<PathBuf>,
    pub keep_translation: bool,
}

impl Settings {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads `path`, or returns the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Scalars from the command line replace file values, lists are appended
    pub fn merge_cli(mut self, cli: CliOverrides) -> Self {
        if let Some(backend) = cli.backend {
            self.backend = backend;
        }
        if let Some(timeout) = cli.timeout_ms {
            self.timeout_ms = timeout;
        }
        if cli.unwind.is_some() {
            self.unwind = cli.unwind;
        }
        self.backend_args.extend(cli.backend_args);
        self.classpath.extend(cli.classpath);
        self.keep_translation |= cli.keep_translation;
        self
    }

    pub fn with_backend(mut self, backend: impl Into<PathBuf>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_unwind(mut self, unwind: u32) -> Self {
        self.unwind = Some(unwind);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// A target's explicit bound wins over the global one
    pub fn effective_unwind(&self, explicit: Option<u32>) -> u32 {
        explicit.or(self.unwind).unwrap_or(DEFAULT_UNWIND)
    }

    /// Pass-through backend flags, split on whitespace
    pub fn extra_backend_args(&self) -> Vec<String> {
        self.backend_args
            .iter()
            .flat_map(|entry| entry.split_whitespace())
            .map(str::to_string)
            .collect()
    }
}
