//! The fetch boundary: the only interface between the registry and the
//! network/host environment.
//!
//! A fetcher must retrieve the resource at a URL, inject it into the host
//! environment (for script assets that usually means handing the source to a
//! sink that evaluates it, which is how fetched code gets to call `define`),
//! and signal completion exactly once, success or failure.

use crate::error::FetchError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Type alias for fetch boundary results
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Receives fetched source text, keyed by the URL it came from.
pub type ScriptSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// The external fetch capability.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch the asset at `url` and inject it into the host environment.
    async fn fetch(&self, url: &str) -> FetchResult<()>;

    /// Cache-priming variant used by `preload`: warm whatever cache sits
    /// behind the transport without injecting the asset.
    async fn prefetch(&self, url: &str) -> FetchResult<()> {
        self.fetch(url).await
    }
}

/// Fetches assets over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
    sink: Option<ScriptSink>,
}

impl HttpFetcher {
    /// Create a fetcher with a fresh client and no sink.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            sink: None,
        }
    }

    /// Hand fetched bodies to `sink` after a successful fetch.
    pub fn with_sink(mut self, sink: ScriptSink) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn get(&self, url: &str) -> FetchResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<()> {
        debug!(url, "http fetch");
        let body = self.get(url).await?;
        if let Some(sink) = &self.sink {
            sink(url, &body);
        }
        Ok(())
    }

    async fn prefetch(&self, url: &str) -> FetchResult<()> {
        trace!(url, "http prefetch");
        self.get(url).await.map(|_| ())
    }
}

/// Fetches assets from a directory on the local filesystem; the URL is
/// interpreted as a path relative to the root.
pub struct FileFetcher {
    root: PathBuf,
    sink: Option<ScriptSink>,
}

impl FileFetcher {
    /// Create a fetcher rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sink: None,
        }
    }

    /// Hand fetched file contents to `sink` after a successful read.
    pub fn with_sink(mut self, sink: ScriptSink) -> Self {
        self.sink = Some(sink);
        self
    }

    fn local_path(&self, url: &str) -> PathBuf {
        self.root.join(url.trim_start_matches('/'))
    }
}

#[async_trait]
impl AssetFetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<()> {
        let path = self.local_path(url);
        debug!(url, path = %path.display(), "file fetch");
        let source = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::NotFound {
                    url: url.to_string(),
                }
            } else {
                FetchError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        if let Some(sink) = &self.sink {
            sink(url, &source);
        }
        Ok(())
    }

    async fn prefetch(&self, url: &str) -> FetchResult<()> {
        let path = self.local_path(url);
        tokio::fs::metadata(&path)
            .await
            .map(|_| ())
            .map_err(|_| FetchError::NotFound {
                url: url.to_string(),
            })
    }
}

#[derive(Clone)]
enum ScriptAction {
    Run(Arc<dyn Fn() + Send + Sync>),
    Delayed(u64, Arc<dyn Fn() + Send + Sync>),
    Fail(FetchError),
    Hang,
}

/// An in-memory fetcher scripted per URL.
///
/// The installed action plays the role of the fetched code executing in the
/// host environment; typically it calls `define` on a runtime handle. Every
/// fetch is recorded, so tests can assert that concurrent requests were
/// de-duplicated onto a single underlying fetch.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<FxHashMap<String, ScriptAction>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    /// Create a fetcher with nothing installed; every fetch fails with
    /// `NotFound` until a URL is scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeed for `url`, running `action` before completion is signalled.
    pub fn install(&self, url: &str, action: impl Fn() + Send + Sync + 'static) {
        self.scripts
            .lock()
            .insert(url.to_string(), ScriptAction::Run(Arc::new(action)));
    }

    /// Like [`install`](Self::install), but completion is delayed by
    /// `delay_ms` milliseconds.
    pub fn install_delayed(
        &self,
        url: &str,
        delay_ms: u64,
        action: impl Fn() + Send + Sync + 'static,
    ) {
        self.scripts.lock().insert(
            url.to_string(),
            ScriptAction::Delayed(delay_ms, Arc::new(action)),
        );
    }

    /// Fail for `url` with `error`.
    pub fn install_failure(&self, url: &str, error: FetchError) {
        self.scripts
            .lock()
            .insert(url.to_string(), ScriptAction::Fail(error));
    }

    /// Never complete for `url`.
    pub fn install_hanging(&self, url: &str) {
        self.scripts
            .lock()
            .insert(url.to_string(), ScriptAction::Hang);
    }

    /// Every URL fetched so far, in request order.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Number of fetches recorded for `url`.
    pub fn call_count(&self, url: &str) -> usize {
        self.log.lock().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl AssetFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<()> {
        self.log.lock().push(url.to_string());
        let action = self.scripts.lock().get(url).cloned();
        match action {
            Some(ScriptAction::Run(run)) => {
                run();
                Ok(())
            }
            Some(ScriptAction::Delayed(delay_ms, run)) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                run();
                Ok(())
            }
            Some(ScriptAction::Fail(error)) => Err(error),
            Some(ScriptAction::Hang) => std::future::pending().await,
            None => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
        }
    }
}
