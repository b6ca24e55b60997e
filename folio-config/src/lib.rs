//! Shared configuration loader for the folio language server.
//!
//! `defaults/folio.default.toml` is embedded into the binary so defaults and
//! documentation stay in sync. The server layers an optional user file on
//! top of the defaults via [`Loader`] before deserializing into
//! [`FolioConfig`].

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_TOML: &str = include_str!("../defaults/folio.default.toml");

/// Top-level configuration consumed by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct FolioConfig {
    pub analysis: AnalysisConfig,
    pub workspace: WorkspaceConfig,
}

/// Knobs for the re-analysis pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub debounce_ms: u64,
    pub validate_record_keys: bool,
}

/// Knobs for workspace folder scans.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    pub max_scan_depth: usize,
}

impl FolioConfig {
    /// The embedded defaults with no user layering.
    pub fn default_config() -> Result<Self, ConfigError> {
        Loader::new().load()
    }
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig {
                debounce_ms: 500,
                validate_record_keys: false,
            },
            workspace: WorkspaceConfig { max_scan_depth: 16 },
        }
    }
}

/// Helper for layering user overrides over the built-in defaults.
#[derive(Debug, Clone)]
pub struct Loader {
    builder: ConfigBuilder<DefaultState>,
}

impl Loader {
    /// Start a loader seeded with the embedded defaults.
    pub fn new() -> Self {
        let builder = Config::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml));
        Self { builder }
    }

    /// Layer a configuration file. Missing files trigger an error.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(true);
        self.builder = self.builder.add_source(source);
        self
    }

    pub fn load(self) -> Result<FolioConfig, ConfigError> {
        self.builder.build()?.try_deserialize()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
