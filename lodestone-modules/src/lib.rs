//! Lodestone module system
//!
//! This crate provides the module half of the Lodestone runtime, including:
//! - Module definitions (`define`) and the pending-definition registry
//! - Dependency resolution with parallel fan-out and cycle detection
//! - Canonical path normalization for relative specifiers
//! - On-demand fetching of missing modules through the asset channel
//! - The resolved-module cache (each factory runs at most once)

pub mod cache;
pub mod error;
pub mod path;
pub mod registry;
mod resolver;
pub mod runtime;

pub use cache::ModuleCache;
pub use error::{ModuleError, Result};
pub use path::{canonicalize, normalize};
pub use registry::{DefinitionRegistry, Factory, ModuleDefinition};
pub use runtime::ModuleRuntime;

pub use lodestone_assets as assets;

use lodestone_assets::AssetConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Module runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Prefix for remote module assets: a module at canonical path `P` is
    /// fetched from `base_url + P + script_suffix`
    pub base_url: String,

    /// Suffix appended to the canonical path when building the asset URL
    pub script_suffix: String,

    /// How long to wait after a module's asset loads before resolution is
    /// retried, giving the fetched code time to register its definitions
    /// (0 = just yield)
    pub define_grace_ms: u64,

    /// Asset loading configuration
    pub assets: AssetConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            script_suffix: ".js".to_string(),
            define_grace_ms: 10,
            assets: AssetConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ModuleError::Config {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        toml::from_str(&text).map_err(|e| ModuleError::Config {
            message: format!("failed to parse {}: {e}", path.display()),
        })
    }

    /// The URL a module at `canonical_path` is expected to be fetchable at.
    pub(crate) fn asset_url(&self, canonical_path: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url.trim_end_matches('/'),
            canonical_path,
            self.script_suffix
        )
    }
}
