//! Configuration file loading and management
//!
//! This module handles loading and parsing the host configuration from
//! `$XDG_CONFIG_HOME/modlink/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use modlink::{is_bare_identifier, GraphOptions, ResolverOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Runtime wiring and graph behaviour
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// File naming conventions used during resolution
    #[serde(default)]
    pub resolution: ResolverOptions,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identifier loaded from the root when a root is loaded
    /// Default: "loader"
    pub loader: String,
    /// Name of the module-storage directory
    /// Default: "node_modules"
    pub module_dir: String,
    /// Return failures of module error handlers instead of logging them
    /// Default: false
    pub strict_reports: bool,
    /// Deepest dependent chain a reload cascade may walk
    /// Default: 512
    pub max_cascade_depth: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loader: "loader".to_string(),
            module_dir: modlink::DEFAULT_MODULE_DIR.to_string(),
            strict_reports: false,
            max_cascade_depth: 512,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Graph options derived from this configuration
    pub fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            strict_reports: self.strict_reports,
            max_cascade_depth: self.max_cascade_depth,
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/modlink/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "raibid-labs", "modlink")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    pub fn default_config_content() -> String {
        r#"# modlink Host Configuration

[runtime]
# Identifier loaded from a root when the root is loaded
# Default: "loader"
loader = "loader"

# Name of the module-storage directory searched for bare identifiers
# Default: "node_modules"
module_dir = "node_modules"

# Return failures of module error handlers instead of logging them.
# Useful for test harnesses.
# Default: false
strict_reports = false

# Deepest dependent chain a reload cascade may walk
# Default: 512
max_cascade_depth = 512

[resolution]
# Extension of script files, without the dot
script_extension = "js"

# Extension of structured data files, without the dot
data_extension = "json"

# Package descriptor file name inside a module directory
package_descriptor = "package.json"

# Stem of a directory's conventional entry file
index_name = "index"

[logging]
# Log level: trace, debug, info, warn, error
# Default: "info"
level = "info"
"#
        .to_string()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let loader = self.runtime.loader.trim();
        if loader.is_empty() {
            anyhow::bail!("runtime.loader must not be empty");
        }

        if !is_bare_identifier(&self.runtime.module_dir) {
            anyhow::bail!(
                "Invalid runtime.module_dir: '{}'. Must be a plain directory name",
                self.runtime.module_dir
            );
        }

        if self.runtime.max_cascade_depth == 0 {
            anyhow::bail!("runtime.max_cascade_depth must be greater than 0");
        }

        let extensions = [
            ("resolution.script_extension", &self.resolution.script_extension),
            ("resolution.data_extension", &self.resolution.data_extension),
        ];
        for (key, extension) in extensions {
            if extension.is_empty() || extension.contains('.') {
                anyhow::bail!("Invalid {}: '{}'. Must be non-empty without dots", key, extension);
            }
        }
        if self.resolution.script_extension == self.resolution.data_extension {
            anyhow::bail!("resolution.script_extension and resolution.data_extension must differ");
        }

        for (key, name) in [
            ("resolution.package_descriptor", &self.resolution.package_descriptor),
            ("resolution.index_name", &self.resolution.index_name),
        ] {
            if name.is_empty() || name.contains(['/', '\\']) {
                anyhow::bail!("Invalid {}: '{}'. Must be a plain file name", key, name);
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid logging.level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
