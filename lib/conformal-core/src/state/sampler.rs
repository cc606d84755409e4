use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EntitySample, StateSnapshot, StateSource, StateTrackingConfig, checksum_rows};
use crate::ConformalError;

/// Captures comparable snapshots from a [`StateSource`].
///
/// Kinds are sampled concurrently, bounded by the configured parallelism.
/// Each per-kind query gets a single retry; a kind that keeps failing is
/// logged and omitted from the snapshot while remaining in the tracked set.
#[derive(Clone, derive_more::Debug)]
pub struct StateSampler {
    #[debug(ignore)]
    source: Arc<dyn StateSource>,
    config: StateTrackingConfig,
}

impl StateSampler {
    pub fn new(source: Arc<dyn StateSource>, config: StateTrackingConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &StateTrackingConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn StateSource> {
        &self.source
    }

    /// Takes one snapshot of every tracked entity kind.
    pub async fn capture(
        &self,
        cancel: &CancellationToken,
    ) -> Result<StateSnapshot, ConformalError> {
        let started = Instant::now();
        let taken_at = Utc::now();

        let kinds = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConformalError::Cancelled),
            kinds = self.source.entity_kinds() => kinds?,
        };
        let tracked: Vec<String> = kinds
            .into_iter()
            .map(|descriptor| descriptor.name)
            .filter(|name| self.config.is_tracked(name))
            .collect();
        let tracked_kinds: BTreeSet<String> = tracked.iter().cloned().collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
        let mut tasks = JoinSet::new();
        for kind in tracked {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            let config = self.config.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_closed) => return Err(ConformalError::Cancelled),
                };
                sample_kind(source.as_ref(), &kind, &config, &cancel)
                    .await
                    .map(|sample| sample.map(|sample| (kind, sample)))
            });
        }

        let mut collected: Vec<(String, EntitySample)> = Vec::new();
        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(entry))) => collected.push(entry),
                Ok(Ok(None)) => {}
                Ok(Err(ConformalError::Cancelled)) => cancelled = true,
                Ok(Err(error)) => warn!(%error, "unexpected sampling error"),
                Err(join_error) => warn!(%join_error, "sampling task failed"),
            }
        }
        if cancelled {
            return Err(ConformalError::Cancelled);
        }

        // Completion order is nondeterministic; keep the snapshot stable.
        collected.sort_by(|(a, _), (b, _)| a.cmp(b));
        let samples: IndexMap<String, EntitySample> = collected.into_iter().collect();

        let capture_duration = started.elapsed();
        debug!(
            kinds = samples.len(),
            ?capture_duration,
            "state snapshot captured"
        );
        Ok(StateSnapshot::new(
            taken_at,
            capture_duration,
            samples,
            tracked_kinds,
        ))
    }
}

async fn sample_kind(
    source: &dyn StateSource,
    kind: &str,
    config: &StateTrackingConfig,
    cancel: &CancellationToken,
) -> Result<Option<EntitySample>, ConformalError> {
    let attempt = || async {
        let count = if config.track_entity_counts {
            source.count(kind).await?
        } else {
            0
        };
        let checksum = if config.track_entity_checksums {
            let rows = source.list_all(kind).await?;
            Some(checksum_rows(&rows))
        } else {
            None
        };
        Ok::<_, ConformalError>(EntitySample { count, checksum })
    };
    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_times(1);
    let retried = attempt.retry(&backoff);

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(ConformalError::Cancelled),
        outcome = tokio::time::timeout(config.sample_timeout, retried) => outcome,
    };
    match outcome {
        Ok(Ok(sample)) => Ok(Some(sample)),
        Ok(Err(error)) => {
            warn!(kind, %error, "state sample failed, omitting kind");
            Ok(None)
        }
        Err(_elapsed) => {
            warn!(kind, timeout = ?config.sample_timeout, "state sample timed out, omitting kind");
            Ok(None)
        }
    }
}
