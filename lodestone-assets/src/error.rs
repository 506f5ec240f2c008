//! Asset loading error types

use thiserror::Error;

/// Type alias for asset registry results
pub type Result<T> = std::result::Result<T, AssetError>;

/// Errors produced at the fetch boundary.
///
/// These are `Clone` so a single fetch outcome can be reported to every
/// requester that was de-duplicated onto the same underlying fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No resource exists at the URL
    #[error("asset not found at {url}")]
    NotFound {
        /// URL that was fetched
        url: String,
    },

    /// The server answered with a non-success status
    #[error("http status {status} fetching {url}")]
    Status {
        /// URL that was fetched
        url: String,
        /// Response status code
        status: u16,
    },

    /// The transport failed before a response arrived
    #[error("transport error fetching {url}: {message}")]
    Transport {
        /// URL that was fetched
        url: String,
        /// Rendered transport error
        message: String,
    },

    /// A local read failed
    #[error("i/o error reading {path}: {message}")]
    Io {
        /// Path that was read
        path: String,
        /// Rendered I/O error
        message: String,
    },

    /// The fetch exceeded the configured boundary timeout
    #[error("timed out fetching {url} after {timeout_ms}ms")]
    Timeout {
        /// URL that was fetched
        url: String,
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },
}

/// Errors that can occur in the asset registry
#[derive(Error, Debug, Clone)]
pub enum AssetError {
    /// Two different URLs mapped to the same registry name
    #[error("asset name {name} is already registered for {existing}, refusing {requested}")]
    NameConflict {
        /// Colliding registry name
        name: String,
        /// URL already registered under the name
        existing: String,
        /// URL of the rejected registration
        requested: String,
    },

    /// The named asset was never registered
    #[error("unknown asset: {name}")]
    UnknownAsset {
        /// Name that was looked up
        name: String,
    },

    /// The asset's fetch completed with an error
    #[error("failed to load asset {name}")]
    Fetch {
        /// Name of the asset that failed
        name: String,
        /// The underlying fetch error
        #[source]
        source: FetchError,
    },
}
