//! Asset registry: identity, the load state machine and completion fan-out.

use crate::error::{AssetError, FetchError, Result};
use crate::fetch::AssetFetcher;
use crate::hub::{OnceCallback, ReadyHub, ReadyKey};
use crate::{AssetConfig, AssetInfo, AssetSource, AssetState};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

struct AssetEntry {
    url: String,
    state: AssetState,
    error: Option<FetchError>,
    signal: watch::Sender<AssetState>,
}

impl AssetEntry {
    fn new(url: String) -> Self {
        let (signal, _) = watch::channel(AssetState::Unseen);
        Self {
            url,
            state: AssetState::Unseen,
            error: None,
            signal,
        }
    }

    fn advance(&mut self, state: AssetState) {
        self.state = state;
        self.signal.send_replace(state);
    }
}

struct RegistryInner {
    config: AssetConfig,
    fetcher: Arc<dyn AssetFetcher>,
    assets: Mutex<FxHashMap<String, AssetEntry>>,
    hub: ReadyHub,
    document_ready: AtomicBool,
}

/// Tracks every addressable asset by name, drives each through its load
/// state machine, de-duplicates concurrent requests and fires readiness
/// callbacks. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct AssetRegistry {
    inner: Arc<RegistryInner>,
}

enum LoadStep {
    Done,
    Failed(FetchError),
    Wait(watch::Receiver<AssetState>),
    Fetch(String),
}

impl AssetRegistry {
    /// Create a registry that fetches through `fetcher`.
    pub fn new(config: AssetConfig, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                fetcher,
                assets: Mutex::new(FxHashMap::default()),
                hub: ReadyHub::new(),
                document_ready: AtomicBool::new(false),
            }),
        }
    }

    /// Resolve a source to its registered asset, registering it on first
    /// reference. Re-registration with an identical URL reuses the existing
    /// asset; the same name with a different URL is an error.
    pub fn identify(&self, source: impl Into<AssetSource>) -> Result<AssetInfo> {
        let source = source.into();
        let name = source.name();
        let url = source.url().to_string();

        let mut assets = self.inner.assets.lock();
        match assets.get(&name) {
            Some(entry) if entry.url == url => Ok(AssetInfo {
                name,
                url,
                state: entry.state,
            }),
            Some(entry) => {
                warn!(%name, existing = %entry.url, requested = %url, "asset name conflict");
                Err(AssetError::NameConflict {
                    name,
                    existing: entry.url.clone(),
                    requested: url,
                })
            }
            None => {
                trace!(%name, url = %url, "registered asset");
                assets.insert(name.clone(), AssetEntry::new(url.clone()));
                Ok(AssetInfo {
                    name,
                    url,
                    state: AssetState::Unseen,
                })
            }
        }
    }

    /// Current state of the named asset, if registered.
    pub fn state(&self, name: &str) -> Option<AssetState> {
        self.inner.assets.lock().get(name).map(|entry| entry.state)
    }

    /// Load an asset, registering it if needed. Completes once the asset has
    /// settled: `Ok` when `Loaded`, the fetch error when `Failed`. Concurrent
    /// calls for the same asset share a single underlying fetch, and every
    /// caller observes the same outcome.
    pub async fn load(&self, source: impl Into<AssetSource>) -> Result<()> {
        let info = self.identify(source)?;
        loop {
            let step = {
                let mut assets = self.inner.assets.lock();
                let entry =
                    assets
                        .get_mut(&info.name)
                        .ok_or_else(|| AssetError::UnknownAsset {
                            name: info.name.clone(),
                        })?;
                match entry.state {
                    AssetState::Loaded => LoadStep::Done,
                    AssetState::Failed => LoadStep::Failed(entry.error.clone().unwrap_or(
                        FetchError::Transport {
                            url: entry.url.clone(),
                            message: "load failed".to_string(),
                        },
                    )),
                    AssetState::Loading | AssetState::Preloading => {
                        LoadStep::Wait(entry.signal.subscribe())
                    }
                    AssetState::Unseen | AssetState::Preloaded => {
                        entry.advance(AssetState::Loading);
                        LoadStep::Fetch(entry.url.clone())
                    }
                }
            };

            match step {
                LoadStep::Done => return Ok(()),
                LoadStep::Failed(error) => {
                    return Err(AssetError::Fetch {
                        name: info.name,
                        source: error,
                    })
                }
                LoadStep::Wait(mut receiver) => {
                    // A load is in flight, or a preload must finish before we
                    // can claim one. Wait for the state to move, then take
                    // another look.
                    loop {
                        let state = *receiver.borrow_and_update();
                        if !matches!(state, AssetState::Loading | AssetState::Preloading) {
                            break;
                        }
                        if receiver.changed().await.is_err() {
                            break;
                        }
                    }
                }
                LoadStep::Fetch(url) => {
                    debug!(name = %info.name, url = %url, "fetching asset");
                    let outcome = self.bounded_fetch(&url, false).await;
                    return self.settle(&info.name, outcome);
                }
            }
        }
    }

    /// Prime the cache for an asset without injecting it: `Unseen` assets go
    /// through `Preloading` to `Preloaded`; anything further along is left
    /// alone. Pending `load` calls for the asset resume once priming ends.
    pub async fn preload(&self, source: impl Into<AssetSource>) -> Result<()> {
        let info = self.identify(source)?;
        let url = {
            let mut assets = self.inner.assets.lock();
            let entry = assets
                .get_mut(&info.name)
                .ok_or_else(|| AssetError::UnknownAsset {
                    name: info.name.clone(),
                })?;
            if entry.state != AssetState::Unseen {
                return Ok(());
            }
            entry.advance(AssetState::Preloading);
            entry.url.clone()
        };

        trace!(name = %info.name, "preloading asset");
        let outcome = self.bounded_fetch(&url, true).await;

        {
            let mut assets = self.inner.assets.lock();
            if let Some(entry) = assets.get_mut(&info.name) {
                entry.advance(AssetState::Preloaded);
            }
        }

        outcome.map_err(|error| AssetError::Fetch {
            name: info.name,
            source: error,
        })
    }

    /// Load a group of assets in parallel. Completes once every member has
    /// settled and reports the first failure, if any.
    pub async fn load_all(&self, sources: Vec<AssetSource>) -> Result<()> {
        let results =
            futures::future::join_all(sources.into_iter().map(|source| self.load(source))).await;
        results.into_iter().collect::<Result<Vec<_>>>().map(|_| ())
    }

    /// Load one of two asset groups depending on a host-evaluated condition.
    pub async fn load_conditional(
        &self,
        condition: bool,
        on_true: Vec<AssetSource>,
        on_false: Vec<AssetSource>,
    ) -> Result<()> {
        if condition {
            self.load_all(on_true).await
        } else {
            self.load_all(on_false).await
        }
    }

    /// True iff every asset in `subset` is `Loaded` (unknown names count as
    /// not loaded); with no subset, every known asset.
    pub fn all_satisfied(&self, subset: Option<&[&str]>) -> bool {
        let assets = self.inner.assets.lock();
        match subset {
            Some(names) => names
                .iter()
                .all(|name| matches!(assets.get(*name).map(|e| e.state), Some(AssetState::Loaded))),
            None => assets.values().all(|e| e.state == AssetState::Loaded),
        }
    }

    /// Run `callback` once `key` is satisfied: immediately if it already is,
    /// otherwise when the asset settles / everything loads / the document
    /// becomes ready. Callbacks for a key run in registration order.
    pub fn when(&self, key: ReadyKey, callback: OnceCallback) {
        self.inner.hub.register(key.clone(), callback);
        // re-check after registering so a completion racing this call cannot
        // strand the callback
        if self.satisfied(&key) {
            self.inner.hub.drain(&key);
        }
    }

    /// The host's document-ready signal; at most one call has any effect.
    pub fn document_ready(&self) {
        if self.inner.document_ready.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("document ready");
        self.inner.hub.drain(&ReadyKey::Document);
        self.fire_all_if_ready();
    }

    /// Whether the host has signalled document-ready.
    pub fn is_document_ready(&self) -> bool {
        self.inner.document_ready.load(Ordering::SeqCst)
    }

    fn satisfied(&self, key: &ReadyKey) -> bool {
        match key {
            ReadyKey::Asset(name) => self.state(name).is_some_and(AssetState::is_settled),
            ReadyKey::All => self.is_document_ready() && self.all_satisfied(None),
            ReadyKey::Document => self.is_document_ready(),
        }
    }

    fn fire_all_if_ready(&self) {
        if self.is_document_ready() && self.all_satisfied(None) {
            self.inner.hub.drain(&ReadyKey::All);
        }
    }

    async fn bounded_fetch(&self, url: &str, prime: bool) -> std::result::Result<(), FetchError> {
        let fetch = async {
            if prime {
                self.inner.fetcher.prefetch(url).await
            } else {
                self.inner.fetcher.fetch(url).await
            }
        };
        match self.inner.config.fetch_timeout() {
            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: self.inner.config.fetch_timeout_ms,
                }),
            },
            None => fetch.await,
        }
    }

    fn settle(&self, name: &str, outcome: std::result::Result<(), FetchError>) -> Result<()> {
        let error = outcome.err();
        {
            let mut assets = self.inner.assets.lock();
            if let Some(entry) = assets.get_mut(name) {
                entry.error = error.clone();
                entry.advance(if error.is_none() {
                    AssetState::Loaded
                } else {
                    AssetState::Failed
                });
            }
        }

        match &error {
            None => info!(name, "asset loaded"),
            Some(e) => warn!(name, error = %e, "asset load failed"),
        }

        // handlers for this asset fire on settle either way, then the
        // all-assets handlers if nothing is outstanding and the document
        // signal has fired
        self.inner.hub.drain(&ReadyKey::Asset(name.to_string()));
        self.fire_all_if_ready();

        match error {
            None => Ok(()),
            Some(e) => Err(AssetError::Fetch {
                name: name.to_string(),
                source: e,
            }),
        }
    }
}
