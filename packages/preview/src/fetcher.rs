// ABOUTME: Fetches the generated file manifest with bounded retries and caches the tree
// ABOUTME: A 404 means "not generated yet" and is retried quietly

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livebuild_client::{ApiClient, ClientResult};
use livebuild_config::PreviewSettings;

use crate::file_tree::FileTree;
use crate::types::{PreviewError, PreviewResult};

/// Where manifests come from. `Ok(None)` means not ready yet.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch_manifest(&self) -> ClientResult<Option<Value>>;
}

#[async_trait]
impl ArtifactSource for ApiClient {
    async fn fetch_manifest(&self) -> ClientResult<Option<Value>> {
        self.get_files().await
    }
}

pub struct ArtifactFetcher {
    source: Arc<dyn ArtifactSource>,
    max_attempts: u32,
    retry_delay: Duration,
    cache: Mutex<Option<Arc<FileTree>>>,
    cancel: StdMutex<CancellationToken>,
}

impl ArtifactFetcher {
    pub fn new(source: Arc<dyn ArtifactSource>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            source,
            max_attempts: max_attempts.max(1),
            retry_delay,
            cache: Mutex::new(None),
            cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    pub fn from_settings(source: Arc<dyn ArtifactSource>, settings: &PreviewSettings) -> Self {
        Self::new(
            source,
            settings.fetch_max_attempts,
            settings.fetch_retry_delay,
        )
    }

    /// Return the file tree, from cache unless `force` is set.
    ///
    /// The cache is only locked to read or store a tree. A fetch in progress
    /// when `cancel_pending` runs ends with `Superseded` and stores nothing.
    pub async fn fetch_files(&self, force: bool) -> PreviewResult<Arc<FileTree>> {
        if !force {
            if let Some(tree) = self.cache.lock().await.as_ref() {
                debug!("Returning cached file tree");
                return Ok(tree.clone());
            }
        }

        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let tree = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("File fetch cancelled");
                return Err(PreviewError::Superseded);
            }
            result = self.fetch_with_retries() => result?,
        };

        let mut cache = self.cache.lock().await;
        if cancel.is_cancelled() {
            return Err(PreviewError::Superseded);
        }
        *cache = Some(tree.clone());
        Ok(tree)
    }

    async fn fetch_with_retries(&self) -> PreviewResult<Arc<FileTree>> {
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            match self.source.fetch_manifest().await {
                Ok(Some(manifest)) => match FileTree::from_manifest(&manifest) {
                    Some(tree) => {
                        info!(
                            "Fetched {} generated files on attempt {}",
                            tree.file_count(),
                            attempt
                        );
                        return Ok(Arc::new(tree));
                    }
                    None => {
                        warn!("File manifest is not an object, treating as not ready");
                        last_error = None;
                    }
                },
                Ok(None) => {
                    debug!(
                        "Files not ready (attempt {}/{})",
                        attempt, self.max_attempts
                    );
                    last_error = None;
                }
                Err(e) => {
                    warn!(
                        "Failed to fetch files (attempt {}/{}): {}",
                        attempt, self.max_attempts, e
                    );
                    last_error = Some(e.to_string());
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(match last_error {
            Some(message) => PreviewError::Network(message),
            None => PreviewError::NotReady {
                attempts: self.max_attempts,
            },
        })
    }

    /// Abort any fetch in progress. Later fetches run normally.
    pub fn cancel_pending(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    pub async fn clear_cache(&self) {
        *self.cache.lock().await = None;
    }

    pub async fn cached(&self) -> Option<Arc<FileTree>> {
        self.cache.lock().await.clone()
    }
}
