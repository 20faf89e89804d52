//! Batch fan-out.
//!
//! One task per item, at most `max_concurrency` in flight (0 = unbounded).
//! Status order is `Total`, then one `Outcome` per started item in completion
//! order, then `Finished`. Cancellation stops new items from starting; items
//! already running finish normally.

use crate::{
    item::{ItemOutcome, ItemRef, OutcomeKind},
    manifest::ManifestSource,
    pipeline::ItemPipeline,
    status::{StatusMessage, StatusReporter},
};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub reference: String,
    pub key: Option<String>,
    /// `None` when the batch was cancelled before this item started.
    pub outcome: Option<ItemOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Same order as the input references.
    pub items: Vec<ItemRecord>,
}

impl BatchResult {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

pub struct IngestionCoordinator {
    pipeline: Arc<ItemPipeline>,
    reporter: StatusReporter,
    max_concurrency: usize,
    cancel: CancellationToken,
}

impl IngestionCoordinator {
    pub fn new(pipeline: ItemPipeline) -> Self {
        let reporter = pipeline.reporter().clone();
        Self {
            pipeline: Arc::new(pipeline),
            reporter,
            max_concurrency: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Reads the manifest for `label`, then runs the batch.
    ///
    /// A manifest that cannot be read fails the whole run before any status
    /// is emitted.
    pub async fn run_manifest(
        &self,
        source: &dyn ManifestSource,
        label: &str,
    ) -> Result<BatchResult> {
        let refs = source
            .read_refs(label)
            .await
            .with_context(|| format!("reading manifest for label {label}"))?;
        info!("manifest label={label} items={}", refs.len());
        self.run(label, refs).await
    }

    pub async fn run(&self, label: &str, refs: Vec<ItemRef>) -> Result<BatchResult> {
        if label.trim().is_empty() {
            return Err(anyhow!("batch label must not be empty"));
        }
        let started = Instant::now();
        let total = refs.len();

        self.reporter
            .report(StatusMessage::Total {
                label: label.to_string(),
                count: total,
            })
            .await;

        let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; total];
        let mut launched = 0usize;
        let mut tasks = JoinSet::new();
        // Semaphore::new panics above MAX_PERMITS.
        let permits = self.max_concurrency.min(Semaphore::MAX_PERMITS);
        let semaphore = (permits > 0).then(|| Arc::new(Semaphore::new(permits)));

        for (index, reference) in refs.iter().enumerate() {
            let permit = match &semaphore {
                Some(sem) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        acquired = sem.clone().acquire_owned() => match acquired {
                            Ok(p) => Some(p),
                            Err(_) => break,
                        },
                    }
                }
                None => None,
            };
            if self.cancel.is_cancelled() {
                break;
            }

            let pipeline = self.pipeline.clone();
            let label = label.to_string();
            let reference = reference.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (index, pipeline.process(&label, &reference).await)
            });
            launched += 1;
        }

        if launched < total {
            warn!(
                "batch {label} cancelled; {} of {total} items not started",
                total - launched
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, outcome)) => outcomes[i] = Some(outcome),
                Err(e) => warn!("pipeline task failed to complete: {e}"),
            }
        }

        // A panicked task never reported; account for it here.
        for (i, slot) in outcomes.iter_mut().enumerate().take(launched) {
            if slot.is_none() {
                let outcome = ItemOutcome::failed(
                    label,
                    OutcomeKind::FetchFailed,
                    "pipeline task panicked",
                );
                warn!("no outcome for {}; recording failure", refs[i]);
                self.reporter
                    .report(StatusMessage::Outcome {
                        label: label.to_string(),
                        kind: outcome.kind,
                    })
                    .await;
                *slot = Some(outcome);
            }
        }

        self.reporter
            .report(StatusMessage::Finished {
                label: label.to_string(),
            })
            .await;

        let result = tally(label, &refs, outcomes);
        info!(
            "batch {label} done total={} succeeded={} failed={} skipped={} took={:.2}s",
            result.total,
            result.succeeded,
            result.failed,
            result.skipped,
            started.elapsed().as_secs_f64()
        );
        Ok(result)
    }
}

fn tally(label: &str, refs: &[ItemRef], outcomes: Vec<Option<ItemOutcome>>) -> BatchResult {
    let mut result = BatchResult {
        total: refs.len(),
        ..Default::default()
    };
    for (reference, outcome) in refs.iter().zip(outcomes) {
        match &outcome {
            Some(o) if o.kind.is_success() => result.succeeded += 1,
            Some(_) => result.failed += 1,
            None => result.skipped += 1,
        }
        result.items.push(ItemRecord {
            reference: reference.to_string(),
            key: reference
                .storage_key(label)
                .map(|k| k.as_object_key()),
            outcome,
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_skipped() {
        let refs = vec![
            ItemRef::new("http://x/a.jpg"),
            ItemRef::new("http://x/b.jpg"),
            ItemRef::new("http://x/"),
        ];
        let outcomes = vec![
            Some(ItemOutcome::success("cats")),
            Some(ItemOutcome::failed("cats", OutcomeKind::StoreFailed, "boom")),
            None,
        ];
        let result = tally("cats", &refs, outcomes);
        assert_eq!((result.succeeded, result.failed, result.skipped), (1, 1, 1));
        assert_eq!(result.items[0].key.as_deref(), Some("cats/a.jpg"));
        assert_eq!(result.items[2].key, None);
        assert!(result.has_failures());
    }
}
