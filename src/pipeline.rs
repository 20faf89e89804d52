use crate::{
    config::Config,
    error::{FetchError, StoreError, TransformError},
    fetch::ContentFetcher,
    item::{ItemOutcome, ItemRef, OutcomeKind, StorageKey},
    spool::{ItemBuffer, Spool},
    status::{StatusMessage, StatusReporter},
    store::ObjectStore,
    transform::{ImageTransformer, TransformSpec},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub fetch: Duration,
    pub store: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(5),
            store: Duration::from_secs(10),
        }
    }
}

impl StageTimeouts {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            fetch: Duration::from_secs(cfg.fetch.timeout_seconds.max(1)),
            store: Duration::from_secs(cfg.store.timeout_seconds.max(1)),
        }
    }
}

/// Fetch, transform and store for one item at a time.
///
/// `process` never returns an error: each stage failure becomes an
/// [`ItemOutcome`], and exactly one `Outcome` status is emitted per call.
pub struct ItemPipeline {
    fetcher: Arc<dyn ContentFetcher>,
    transformer: Arc<dyn ImageTransformer>,
    store: Arc<dyn ObjectStore>,
    reporter: StatusReporter,
    spec: TransformSpec,
    spool: Spool,
    timeouts: StageTimeouts,
}

enum StageError {
    Fetch(FetchError),
    Transform(TransformError),
    Store(StoreError),
}

impl StageError {
    fn into_outcome(self, label: &str) -> ItemOutcome {
        match self {
            StageError::Fetch(e) => ItemOutcome::failed(label, OutcomeKind::FetchFailed, e),
            StageError::Transform(e) => {
                ItemOutcome::failed(label, OutcomeKind::TransformFailed, e)
            }
            StageError::Store(e) => ItemOutcome::failed(label, OutcomeKind::StoreFailed, e),
        }
    }
}

impl ItemPipeline {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        transformer: Arc<dyn ImageTransformer>,
        store: Arc<dyn ObjectStore>,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            fetcher,
            transformer,
            store,
            reporter,
            spec: TransformSpec::default(),
            spool: Spool::in_memory(),
            timeouts: StageTimeouts::default(),
        }
    }

    pub fn with_spec(mut self, spec: TransformSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_spool(mut self, spool: Spool) -> Self {
        self.spool = spool;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    pub async fn process(&self, label: &str, reference: &ItemRef) -> ItemOutcome {
        let outcome = match self.run_stages(label, reference).await {
            Ok(key) => {
                info!("stored {reference} as {key}");
                ItemOutcome::success(label)
            }
            Err(e) => {
                let outcome = e.into_outcome(label);
                warn!(
                    "item failed kind={:?} ref={reference}: {}",
                    outcome.kind,
                    outcome.error.as_deref().unwrap_or("")
                );
                outcome
            }
        };
        self.reporter
            .report(StatusMessage::Outcome {
                label: label.to_string(),
                kind: outcome.kind,
            })
            .await;
        outcome
    }

    async fn run_stages(&self, label: &str, reference: &ItemRef) -> Result<StorageKey, StageError> {
        let key = reference
            .storage_key(label)
            .ok_or_else(|| StageError::Fetch(FetchError::NoBasename(reference.to_string())))?;

        info!("fetching {reference}");
        let bytes = self.fetch(reference).await.map_err(StageError::Fetch)?;
        info!("fetched {reference} ({} bytes)", bytes.len());

        let mut buffer = self
            .spool
            .hold(&key, bytes)
            .await
            .map_err(|e| StageError::Fetch(e.into()))?;
        let result = self.transform_and_store(&key, &mut buffer).await;
        buffer.release().await;
        result.map(|()| key)
    }

    async fn transform_and_store(
        &self,
        key: &StorageKey,
        buffer: &mut ItemBuffer,
    ) -> Result<(), StageError> {
        info!("transforming {key}");
        let raw = buffer
            .load()
            .await
            .map_err(|e| StageError::Transform(e.into()))?;
        let transformed = self
            .transformer
            .transform(raw, &self.spec)
            .await
            .map_err(StageError::Transform)?;
        buffer
            .replace(transformed)
            .await
            .map_err(|e| StageError::Transform(e.into()))?;

        info!("uploading {key}");
        let bytes = buffer.load().await.map_err(|e| StageError::Store(e.into()))?;
        self.put(key, bytes).await.map_err(StageError::Store)
    }

    async fn fetch(&self, reference: &ItemRef) -> Result<Vec<u8>, FetchError> {
        match tokio::time::timeout(self.timeouts.fetch, self.fetcher.fetch(reference)).await {
            Ok(res) => res,
            Err(_) => Err(FetchError::Timeout(self.timeouts.fetch)),
        }
    }

    async fn put(&self, key: &StorageKey, bytes: Vec<u8>) -> Result<(), StoreError> {
        match tokio::time::timeout(self.timeouts.store, self.store.put(key, bytes)).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Timeout(self.timeouts.store)),
        }
    }
}
