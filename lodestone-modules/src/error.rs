//! Module system error types

use lodestone_assets::AssetError;
use thiserror::Error;

/// Type alias for module system results
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Errors that can occur in the module system.
///
/// All variants are `Clone`: an in-flight resolution is shared by every
/// requester of the same path, and each of them receives the outcome.
#[derive(Error, Debug, Clone)]
pub enum ModuleError {
    /// Malformed `define` call
    #[error("invalid module definition: {reason}")]
    Definition {
        /// What was wrong with the call
        reason: String,
    },

    /// Malformed `require` call
    #[error("invalid require argument: {reason}")]
    RequireArgument {
        /// What was wrong with the call
        reason: String,
    },

    /// No definition and no fetchable asset for the requested path
    #[error("missing module {path}")]
    MissingModule {
        /// Canonical path that could not be resolved
        path: String,
    },

    /// A path was re-entered while still resolving
    #[error("circular dependency detected: {cycle}")]
    CircularDependency {
        /// The dependency chain that closed on itself
        cycle: String,
    },

    /// A path could not be normalized
    #[error("invalid module path {path}: {reason}")]
    InvalidPath {
        /// The offending path
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// Fetching the module's asset failed
    #[error("asset loading failed: {0}")]
    Asset(#[from] AssetError),

    /// A spawned dependency resolution died before producing a result
    #[error("dependency resolution aborted: {message}")]
    Aborted {
        /// Rendered task failure
        message: String,
    },

    /// Configuration could not be loaded
    #[error("configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },
}
