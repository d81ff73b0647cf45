//! sockrt CLI Configuration
//!
//! Configuration is read from a TOML file whose tables mirror
//! [`RuntimeConfig`] plus a `[cli]` table. Missing keys fall back to
//! defaults, so a file only needs the values it overrides:
//!
//! ```toml
//! [runtime.data]
//! ttl_ms = 60000
//!
//! [cli]
//! verbose = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use sockrt_core::RuntimeConfig;
use tracing::debug;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the sockrt CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Runtime configuration handed to the builder
    pub runtime: RuntimeConfig,

    /// CLI-specific configuration
    pub cli: CliSettings,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Print every script the runtime evaluates
    pub print_scripts: bool,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            verbose: false,
            print_scripts: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Loading and Saving
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        debug!("Read {} bytes of configuration from {}", source.len(), path.display());
        Self::from_toml(&source)
    }

    /// Write configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.runtime.validate()?;
        Ok(())
    }
}
