//! Lodestone asset registry and loader
//!
//! This crate provides the asset half of the Lodestone runtime, including:
//! - Asset identity and the per-asset load state machine
//! - De-duplication of concurrent requests for the same asset
//! - The readiness hub (per-asset, all-assets and document-ready keys)
//! - The `AssetFetcher` boundary to the network/host environment

pub mod error;
pub mod fetch;
pub mod hub;
pub mod registry;

pub use error::{AssetError, FetchError, Result};
pub use fetch::{AssetFetcher, FetchResult, FileFetcher, HttpFetcher, ScriptSink, ScriptedFetcher};
pub use hub::{OnceCallback, ReadyHub, ReadyKey};
pub use registry::AssetRegistry;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Load state of a single asset. Transitions are forward-only: an asset never
/// regresses to an earlier state, and `Loaded`/`Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetState {
    /// Registered but never touched
    Unseen,
    /// A cache-priming fetch is in flight
    Preloading,
    /// Cache-priming finished; a real load is still needed
    Preloaded,
    /// A load fetch is in flight
    Loading,
    /// Fetch completed successfully
    Loaded,
    /// Fetch completed with an error
    Failed,
}

impl AssetState {
    /// Whether the asset has finished its load attempt, either way.
    pub fn is_settled(self) -> bool {
        matches!(self, AssetState::Loaded | AssetState::Failed)
    }
}

/// How a caller refers to an asset: a bare URL (the registry name is derived
/// from the last path segment) or an explicit label paired with a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Url(String),
    Labeled { label: String, url: String },
}

impl AssetSource {
    /// The registry name this source identifies.
    pub fn name(&self) -> String {
        match self {
            AssetSource::Url(url) => asset_name(url),
            AssetSource::Labeled { label, .. } => label.clone(),
        }
    }

    /// The URL the asset is fetched from.
    pub fn url(&self) -> &str {
        match self {
            AssetSource::Url(url) => url,
            AssetSource::Labeled { url, .. } => url,
        }
    }
}

impl From<&str> for AssetSource {
    fn from(url: &str) -> Self {
        AssetSource::Url(url.to_string())
    }
}

impl From<String> for AssetSource {
    fn from(url: String) -> Self {
        AssetSource::Url(url)
    }
}

impl From<(&str, &str)> for AssetSource {
    fn from((label, url): (&str, &str)) -> Self {
        AssetSource::Labeled {
            label: label.to_string(),
            url: url.to_string(),
        }
    }
}

impl From<(String, String)> for AssetSource {
    fn from((label, url): (String, String)) -> Self {
        AssetSource::Labeled { label, url }
    }
}

/// Derive an asset's registry name from its URL: the last path segment with
/// any query suffix stripped.
pub fn asset_name(url: &str) -> String {
    let tail = url.rsplit('/').next().unwrap_or(url);
    match tail.find('?') {
        Some(i) => tail[..i].to_string(),
        None => tail.to_string(),
    }
}

/// Snapshot of a registered asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// Registry name (derived from the URL or given as a label)
    pub name: String,

    /// Source location
    pub url: String,

    /// State at the time of the snapshot
    pub state: AssetState,
}

/// Asset loading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Timeout applied to each fetch at the boundary, in milliseconds
    /// (0 = unlimited)
    pub fetch_timeout_ms: u64,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self { fetch_timeout_ms: 0 }
    }
}

impl AssetConfig {
    pub(crate) fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }
}
