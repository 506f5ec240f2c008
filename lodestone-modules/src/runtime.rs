//! The loader context: one value owning every registry the module system
//! mutates.

use crate::cache::ModuleCache;
use crate::error::{ModuleError, Result};
use crate::registry::{DefinitionRegistry, ModuleDefinition};
use crate::resolver::{self, SharedResolution};
use crate::{path, RuntimeConfig};
use lodestone_assets::{AssetFetcher, AssetRegistry};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) struct RuntimeInner<V> {
    pub(crate) config: RuntimeConfig,
    pub(crate) assets: AssetRegistry,
    pub(crate) definitions: DefinitionRegistry<V>,
    pub(crate) cache: ModuleCache<V>,
    pub(crate) pending: Mutex<FxHashMap<String, SharedResolution<V>>>,
}

/// A module-loading runtime: definition registry, resolved-module cache,
/// in-flight resolution table and the asset registry that backs remote
/// loading, behind one handle.
///
/// `V` is the module value type produced by factories. Handles are cheap to
/// clone and share the runtime, so a fetcher (standing in for fetched code)
/// can hold one and call [`define`](Self::define) when its asset executes.
pub struct ModuleRuntime<V> {
    inner: Arc<RuntimeInner<V>>,
}

impl<V> Clone for ModuleRuntime<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> ModuleRuntime<V>
where
    V: Send + Sync + 'static,
{
    /// Create a runtime that fetches remote module assets through `fetcher`.
    pub fn new(config: RuntimeConfig, fetcher: Arc<dyn AssetFetcher>) -> Self {
        let assets = AssetRegistry::new(config.assets.clone(), fetcher);
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                assets,
                definitions: DefinitionRegistry::new(),
                cache: ModuleCache::new(),
                pending: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// Create a runtime with the default configuration.
    pub fn with_fetcher(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self::new(RuntimeConfig::default(), fetcher)
    }

    /// The runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The asset registry backing remote module loading.
    pub fn assets(&self) -> &AssetRegistry {
        &self.inner.assets
    }

    /// Register a module definition under the canonical form of `path`.
    ///
    /// The path must be absolute (a bare path is rooted with a leading `/`;
    /// a `.`-prefixed path is rejected). Re-defining a path that is already
    /// defined, resolving or resolved is a silent no-op: the first
    /// definition wins.
    pub fn define<F>(&self, path: &str, dependencies: &[&str], factory: F) -> Result<()>
    where
        F: Fn(&[Arc<V>]) -> V + Send + Sync + 'static,
    {
        let canonical = definition_path(path)?;
        if self.inner.cache.contains(&canonical) {
            trace!(path = %canonical, "define ignored: already resolved");
            return Ok(());
        }
        if self.inner.pending.lock().contains_key(&canonical) {
            trace!(path = %canonical, "define ignored: resolution in flight");
            return Ok(());
        }

        let definition = ModuleDefinition::new(dependencies, factory);
        if self.inner.definitions.insert_first(&canonical, definition) {
            debug!(path = %canonical, "module defined");
        } else {
            trace!(path = %canonical, "define ignored: first definition wins");
        }
        Ok(())
    }

    /// Register a dependency-free module holding a plain value.
    pub fn define_value(&self, path: &str, value: V) -> Result<()>
    where
        V: Clone,
    {
        self.define(path, &[], move |_| value.clone())
    }

    /// Synchronously resolve `path`. The whole dependency graph must already
    /// be defined (or resolved); nothing is fetched.
    pub fn require(&self, path: &str) -> Result<Arc<V>> {
        let canonical = require_path(path)?;
        resolver::resolve_sync(&self.inner, &canonical, &mut Vec::new())
    }

    /// Resolve `path`, fetching missing modules through the asset channel.
    pub async fn require_async(&self, path: &str) -> Result<Arc<V>> {
        let canonical = require_path(path)?;
        resolver::resolve(Arc::clone(&self.inner), canonical, Vec::new()).await
    }

    /// Resolve every path in `paths`, all in parallel, and return the values
    /// in request order. Fails with the first error encountered; no partial
    /// results are handed out.
    pub async fn require_many(&self, paths: &[&str]) -> Result<Vec<Arc<V>>> {
        let mut canonical = Vec::with_capacity(paths.len());
        for path in paths {
            canonical.push(require_path(path)?);
        }

        let tasks: Vec<_> = canonical
            .into_iter()
            .map(|path| tokio::spawn(resolver::resolve(Arc::clone(&self.inner), path, Vec::new())))
            .collect();
        resolver::join_in_order(tasks).await
    }

    /// The resolved value for `path`, if its factory has run.
    pub fn resolved(&self, path: &str) -> Option<Arc<V>> {
        path::canonicalize(path)
            .ok()
            .and_then(|canonical| self.inner.cache.get(&canonical))
    }

    /// Whether `path` has been resolved.
    pub fn is_resolved(&self, path: &str) -> bool {
        self.resolved(path).is_some()
    }

    /// Whether `path` has a definition waiting to be resolved.
    pub fn is_defined(&self, path: &str) -> bool {
        path::canonicalize(path)
            .ok()
            .map(|canonical| self.inner.definitions.contains(&canonical))
            .unwrap_or(false)
    }

    /// Forward the host's document-ready signal to the asset registry.
    pub fn document_ready(&self) {
        self.inner.assets.document_ready();
    }
}

fn definition_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(ModuleError::Definition {
            reason: "module path must be a non-empty string".to_string(),
        });
    }
    if path.starts_with('.') {
        return Err(ModuleError::Definition {
            reason: format!("module path {path:?} is relative; define requires an absolute path"),
        });
    }
    path::canonicalize(path)
}

fn require_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(ModuleError::RequireArgument {
            reason: "module path must be a non-empty string".to_string(),
        });
    }
    if path.starts_with('.') {
        return Err(ModuleError::RequireArgument {
            reason: format!("relative path {path:?} cannot be required without a requesting module"),
        });
    }
    path::canonicalize(path)
}
