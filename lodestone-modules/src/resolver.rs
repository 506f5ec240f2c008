//! The resolution algorithm: canonical paths in, resolved module values out.
//!
//! A resolution walks the dependency graph depth-first. Dependencies of a
//! single module are fanned out (every child resolution starts before any of
//! them completes) and joined in declared order, with the first error
//! aborting the parent while the remaining children run to completion and
//! are discarded. Requests for a path that is already resolving join the
//! in-flight resolution instead of starting a second one, which keeps the
//! factory-runs-once guarantee under concurrency; a true cycle is caught
//! before joining, by the ancestry chain each resolution carries.

use crate::error::{ModuleError, Result};
use crate::path;
use crate::registry::ModuleDefinition;
use crate::runtime::RuntimeInner;
use futures::future::{self, BoxFuture, Shared};
use futures::FutureExt;
use lodestone_assets::{AssetSource, AssetState};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// An in-flight resolution, shared by every requester of the same path.
pub(crate) type SharedResolution<V> = Shared<BoxFuture<'static, Result<Arc<V>>>>;

enum Claim<V> {
    /// Someone is already resolving the path, or we just claimed it
    InFlight(SharedResolution<V>),
    /// No definition anywhere; try the asset channel
    Fetch,
}

/// Resolve `path`, fetching its asset if no definition is registered.
/// `chain` is the ancestry of canonical paths whose resolutions are waiting
/// on this one.
pub(crate) fn resolve<V>(
    inner: Arc<RuntimeInner<V>>,
    path: String,
    chain: Vec<String>,
) -> BoxFuture<'static, Result<Arc<V>>>
where
    V: Send + Sync + 'static,
{
    async move {
        if let Some(value) = inner.cache.get(&path) {
            return Ok(value);
        }
        if chain.contains(&path) {
            return Err(cycle_error(&chain, &path));
        }

        let claim = {
            let mut pending = inner.pending.lock();
            if let Some(in_flight) = pending.get(&path) {
                trace!(path = %path, "joining in-flight resolution");
                Claim::InFlight(in_flight.clone())
            } else if let Some(definition) = inner.definitions.take(&path) {
                let resolution = run_resolution(inner.clone(), path.clone(), chain.clone(), definition)
                    .boxed()
                    .shared();
                pending.insert(path.clone(), resolution.clone());
                Claim::InFlight(resolution)
            } else {
                Claim::Fetch
            }
        };

        match claim {
            Claim::InFlight(resolution) => resolution.await,
            Claim::Fetch => {
                let url = inner.config.asset_url(&path);
                let asset = inner.assets.identify(AssetSource::Url(url.clone()))?;
                if asset.state == AssetState::Loaded {
                    // the asset came and went without registering a
                    // definition; it is never fetched twice
                    return Err(ModuleError::MissingModule { path });
                }

                debug!(path = %path, url = %url, "fetching remote module");
                inner.assets.load(AssetSource::Url(url)).await?;
                define_grace(inner.config.define_grace_ms).await;
                resolve(inner.clone(), path, chain).await
            }
        }
    }
    .boxed()
}

/// Resolve a claimed definition: normalize and fan out its dependencies, run
/// the factory, cache the value. On failure the definition goes back into
/// the registry so a retry reports the same error instead of a bogus
/// missing-module.
async fn run_resolution<V>(
    inner: Arc<RuntimeInner<V>>,
    path: String,
    chain: Vec<String>,
    definition: ModuleDefinition<V>,
) -> Result<Arc<V>>
where
    V: Send + Sync + 'static,
{
    debug!(path = %path, dependencies = definition.dependencies().len(), "resolving module");
    let result = resolve_dependencies(&inner, &path, &chain, &definition).await;
    if result.is_err() {
        inner.definitions.restore(&path, definition);
    }
    inner.pending.lock().remove(&path);
    result
}

async fn resolve_dependencies<V>(
    inner: &Arc<RuntimeInner<V>>,
    path: &str,
    chain: &[String],
    definition: &ModuleDefinition<V>,
) -> Result<Arc<V>>
where
    V: Send + Sync + 'static,
{
    let mut child_chain = chain.to_vec();
    child_chain.push(path.to_string());

    let mut dep_paths = Vec::with_capacity(definition.dependencies().len());
    for spec in definition.dependencies() {
        dep_paths.push(path::normalize(spec, path)?);
    }

    let tasks: Vec<_> = dep_paths
        .into_iter()
        .map(|dep| tokio::spawn(resolve(Arc::clone(inner), dep, child_chain.clone())))
        .collect();
    let values = join_in_order(tasks).await?;

    let value = definition.instantiate(&values);
    let cached = inner.cache.insert(path, value);
    info!(path, "module resolved");
    Ok(cached)
}

/// Await spawned resolutions preserving their order, returning on the first
/// error. Siblings still in flight are not cancelled; their results are
/// discarded.
pub(crate) async fn join_in_order<V>(
    tasks: Vec<tokio::task::JoinHandle<Result<Arc<V>>>>,
) -> Result<Vec<Arc<V>>>
where
    V: Send + Sync + 'static,
{
    future::try_join_all(tasks.into_iter().map(|task| async move {
        match task.await {
            Ok(outcome) => outcome,
            Err(died) => Err(ModuleError::Aborted {
                message: died.to_string(),
            }),
        }
    }))
    .await
}

/// Synchronous resolution: every definition in the graph must already be
/// registered; nothing is fetched and in-flight asynchronous resolutions are
/// not consulted.
pub(crate) fn resolve_sync<V>(
    inner: &RuntimeInner<V>,
    path: &str,
    chain: &mut Vec<String>,
) -> Result<Arc<V>>
where
    V: Send + Sync + 'static,
{
    if let Some(value) = inner.cache.get(path) {
        return Ok(value);
    }
    if chain.iter().any(|ancestor| ancestor == path) {
        return Err(cycle_error(chain, path));
    }
    let definition = inner
        .definitions
        .take(path)
        .ok_or_else(|| ModuleError::MissingModule {
            path: path.to_string(),
        })?;

    chain.push(path.to_string());
    let result = instantiate_sync(inner, path, chain, &definition);
    chain.pop();

    if result.is_err() {
        inner.definitions.restore(path, definition);
    }
    result
}

fn instantiate_sync<V>(
    inner: &RuntimeInner<V>,
    path: &str,
    chain: &mut Vec<String>,
    definition: &ModuleDefinition<V>,
) -> Result<Arc<V>>
where
    V: Send + Sync + 'static,
{
    let mut values = Vec::with_capacity(definition.dependencies().len());
    for spec in definition.dependencies() {
        let dep = path::normalize(spec, path)?;
        values.push(resolve_sync(inner, &dep, chain)?);
    }
    let cached = inner.cache.insert(path, definition.instantiate(&values));
    info!(path, "module resolved");
    Ok(cached)
}

fn cycle_error(chain: &[String], path: &str) -> ModuleError {
    let mut parts: Vec<&str> = chain.iter().map(String::as_str).collect();
    parts.push(path);
    ModuleError::CircularDependency {
        cycle: parts.join(" -> "),
    }
}

/// Give the fetched code a moment to register its definitions before
/// resolution is retried.
async fn define_grace(grace_ms: u64) {
    if grace_ms == 0 {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(Duration::from_millis(grace_ms)).await;
    }
}
