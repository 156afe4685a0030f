//! Resilient fetch pipeline.
//!
//! Two strategies for two access patterns:
//! - whole-resource fetches get a bounded retry with a fixed delay;
//! - per-symbol enrichment runs strictly sequentially with a fixed pause
//!   between requests, and per-item failures are recorded instead of raised.

use market_core::{SyncError, SyncResult};
use std::future::Future;
use std::time::Duration;

use crate::config::SyncConfig;

/// Fixed attempt count with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1_000),
        }
    }
}

/// Outcome of a rate-limited batch: what came back, and which items did not
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentBatch<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<String>,
}

impl<T> EnrichmentBatch<T> {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FetchPipeline {
    retry: RetryPolicy,
    item_delay: Duration,
}

impl FetchPipeline {
    pub fn new(retry: RetryPolicy, item_delay: Duration) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                delay: retry.delay,
            },
            item_delay,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            RetryPolicy {
                max_attempts: config.retry_attempts,
                delay: config.retry_delay,
            },
            config.item_delay,
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run `fetch` until it succeeds or the attempt budget is spent.
    ///
    /// Non-transient errors (missing auth, bad config) are returned at once.
    /// The error of the last attempt is returned when every attempt fails.
    pub async fn fetch_with_retry<T, F, Fut>(&self, label: &str, mut fetch: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match fetch().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}/{}", label, attempt, self.retry.max_attempts);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!("{} failed permanently: {}", label, e);
                    return Err(e);
                }
                Err(e) if attempt >= self.retry.max_attempts => {
                    tracing::warn!(
                        "{} failed after {} attempts: {}",
                        label,
                        self.retry.max_attempts,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {}ms: {}",
                        label,
                        attempt,
                        self.retry.max_attempts,
                        self.retry.delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Fetch `items` one at a time, pausing before every request except the first.
    ///
    /// Item `i + 1` is never issued before item `i` has resolved. A failing item
    /// is logged and listed in `failed`; it never aborts the batch.
    pub async fn enrich_sequential<T, F, Fut>(&self, items: &[String], mut fetch: F) -> EnrichmentBatch<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut batch = EnrichmentBatch {
            succeeded: Vec::with_capacity(items.len()),
            failed: Vec::new(),
        };

        for (i, item) in items.iter().enumerate() {
            if i > 0 && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }

            match fetch(item.clone()).await {
                Ok(value) => batch.succeeded.push(value),
                Err(e) => {
                    tracing::warn!("Enrichment failed for {}: {}", item, e);
                    batch.failed.push(item.clone());
                }
            }
        }

        tracing::debug!(
            "Enrichment batch done: {}/{} succeeded",
            batch.succeeded.len(),
            batch.attempted()
        );
        batch
    }
}

impl Default for FetchPipeline {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Convenience for callers that only care whether an error means "log in again".
pub fn requires_auth(err: &SyncError) -> bool {
    matches!(err, SyncError::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_fetch_is_attempted_three_times() {
        let pipeline = FetchPipeline::default();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let log = attempts.clone();
        let result: SyncResult<()> = pipeline
            .fetch_with_retry("news page", || {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(Instant::now());
                    Err(SyncError::Http("connection reset".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Http(_))));
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 3);
        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1_000) && gap < Duration::from_millis(1_050));
        }
        assert!(start.elapsed() >= Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_on_second_attempt() {
        let pipeline = FetchPipeline::default();
        let calls = AtomicU32::new(0);

        let result = pipeline
            .fetch_with_retry("sentiment", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SyncError::InvalidResponse("missing data".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_is_not_retried() {
        let pipeline = FetchPipeline::default();
        let calls = AtomicU32::new(0);

        let result: SyncResult<()> = pipeline
            .fetch_with_retry("favorites", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Unauthenticated) }
            })
            .await;

        assert!(result.as_ref().err().map(requires_auth).unwrap_or(false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrichment_is_sequential_and_paced() {
        let pipeline = FetchPipeline::default();
        let issued = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let items: Vec<String> = vec!["GGAL".into(), "YPFD".into(), "PAMP".into()];

        let log = issued.clone();
        let batch = pipeline
            .enrich_sequential(&items, |symbol| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push((symbol.clone(), Instant::now()));
                    Ok(symbol)
                }
            })
            .await;

        assert_eq!(batch.succeeded, items);
        let issued = issued.lock().unwrap();
        let order: Vec<&str> = issued.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(order, vec!["GGAL", "YPFD", "PAMP"]);

        assert!(issued[0].1 - start < Duration::from_millis(1));
        for pair in issued.windows(2) {
            let gap = pair[1].1 - pair[0].1;
            assert!(gap >= Duration::from_millis(100) && gap < Duration::from_millis(150));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrichment_isolates_item_failures() {
        let pipeline = FetchPipeline::default();
        let items: Vec<String> = vec!["GGAL".into(), "BAD".into(), "YPFD".into()];

        let batch = pipeline
            .enrich_sequential(&items, |symbol| async move {
                if symbol == "BAD" {
                    Err(SyncError::Backend("HTTP 500".to_string()))
                } else {
                    Ok(symbol)
                }
            })
            .await;

        assert_eq!(batch.succeeded, vec!["GGAL".to_string(), "YPFD".to_string()]);
        assert_eq!(batch.failed, vec!["BAD".to_string()]);
        assert_eq!(batch.attempted(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let pipeline = FetchPipeline::default();
        let batch: EnrichmentBatch<String> = pipeline
            .enrich_sequential(&[], |symbol| async move { Ok(symbol) })
            .await;

        assert!(batch.is_empty());
        assert!(batch.failed.is_empty());
    }
}
