//! Batch runner: drives one target through pagination and mutation
//!
//! The loop is a sequence of awaited provider calls interleaved with explicit
//! cancellation checks and a fixed inter-batch delay. Cancellation and token
//! freshness are evaluated both before entering and immediately after
//! returning from each suspension point, because token validity can change
//! during the await. Targets never run in parallel: the provider rate-limits
//! per account, so parallel targets would only multiply refresh races.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::error::{EngineError, Result};
use crate::provider::{MailProvider, Mutation};

/// Cooperative per-job-run abort signal
///
/// Checked at every loop head and after every suspension point. Setting it
/// never rolls back applied mutations; it only stops further work.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tunables for the pagination/mutation loop
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum IDs per search page
    pub page_size: u32,
    /// Maximum IDs per mutate call (provider limit is 1000)
    pub batch_size: usize,
    /// Hard cap on page fetches per target; guarantees termination when the
    /// provider keeps returning a non-decreasing result set
    pub max_page_attempts: u32,
    /// Cooperative pause between mutate calls
    pub inter_batch_delay: Duration,
    /// Force a token refresh when less lifetime than this remains
    pub token_refresh_threshold: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            batch_size: 1000,
            max_page_attempts: 40,
            inter_batch_delay: Duration::from_millis(200),
            token_refresh_threshold: Duration::from_secs(300),
        }
    }
}

/// Receives processed-count deltas at every batch boundary
#[async_trait]
pub trait BatchObserver: Send + Sync {
    async fn on_batch(&self, delta: usize);
}

/// Observer that discards progress; used by callers that only need the total
pub struct NoopObserver;

#[async_trait]
impl BatchObserver for NoopObserver {
    async fn on_batch(&self, _delta: usize) {}
}

/// How processing of one target ended; cancellation is not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    Completed(usize),
    Cancelled(usize),
}

impl TargetOutcome {
    pub fn processed(&self) -> usize {
        match self {
            TargetOutcome::Completed(n) | TargetOutcome::Cancelled(n) => *n,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TargetOutcome::Cancelled(_))
    }
}

/// Paginates message-ID search and applies mutations in provider-sized
/// batches for one target at a time
pub struct BatchRunner {
    provider: Arc<dyn MailProvider>,
    tokens: Arc<dyn TokenProvider>,
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        tokens: Arc<dyn TokenProvider>,
        config: BatchConfig,
    ) -> Self {
        Self {
            provider,
            tokens,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Refresh the token ahead of expiry, or take the cached one
    ///
    /// Acquisition failure here is terminal for the whole job: it signals
    /// reconnect-required upstream instead of being retried, since a silent
    /// retry against an expired credential wastes quota.
    async fn ensure_fresh_token(&self) -> Result<()> {
        let remaining = self.tokens.remaining_lifetime().await;
        if remaining < self.config.token_refresh_threshold {
            debug!(
                remaining_secs = remaining.as_secs(),
                "token lifetime below threshold, forcing refresh"
            );
            self.tokens.force_refresh().await?;
        } else {
            self.tokens.acquire().await?;
        }
        Ok(())
    }

    /// Process one target to completion: search pages, mutate in chunks,
    /// report deltas to the observer
    pub async fn run_target(
        &self,
        query: &str,
        mutation: &Mutation,
        cancel: &CancelFlag,
        observer: &dyn BatchObserver,
    ) -> Result<TargetOutcome> {
        let mut processed = 0usize;
        let mut page_token: Option<String> = None;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(TargetOutcome::Cancelled(processed));
            }

            attempts += 1;
            if attempts > self.config.max_page_attempts {
                warn!(attempts, query, "page attempt cap reached, failing target");
                return Err(EngineError::AttemptsExhausted {
                    attempts: self.config.max_page_attempts,
                });
            }

            self.ensure_fresh_token().await?;
            if cancel.is_cancelled() {
                return Ok(TargetOutcome::Cancelled(processed));
            }

            let page = self
                .provider
                .search_ids(query, page_token.as_deref(), self.config.page_size)
                .await?;
            if cancel.is_cancelled() {
                return Ok(TargetOutcome::Cancelled(processed));
            }

            if page.ids.is_empty() {
                debug!(processed, query, "target exhausted");
                return Ok(TargetOutcome::Completed(processed));
            }

            for chunk in page.ids.chunks(self.config.batch_size) {
                let outcome = self.provider.batch_mutate(chunk, mutation).await?;

                let applied = chunk.len().saturating_sub(outcome.failed_ids.len());
                if applied > 0 {
                    processed += applied;
                    observer.on_batch(applied).await;
                }
                if !outcome.failed_ids.is_empty() {
                    // Partial completion stays visible in the processed
                    // count, but the target must not silently continue.
                    return Err(EngineError::Provider(format!(
                        "{} messages in the batch failed to apply",
                        outcome.failed_ids.len()
                    )));
                }

                if cancel.is_cancelled() {
                    return Ok(TargetOutcome::Cancelled(processed));
                }
                tokio::time::sleep(self.config.inter_batch_delay).await;
                if cancel.is_cancelled() {
                    return Ok(TargetOutcome::Cancelled(processed));
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                // Label changes keep the matched messages in the result set;
                // re-searching from the first page would mutate the same
                // messages again, so the missing continuation token is the
                // terminating condition. Deletion shrinks the set, so
                // restarting converges on an empty page.
                None if !mutation.shrinks_result_set() => {
                    debug!(processed, query, "target exhausted");
                    return Ok(TargetOutcome::Completed(processed));
                }
                None => page_token = None,
            }
        }
    }

    /// Count-only sweep for analysis jobs: same token, cancellation and
    /// attempt-cap rules, no mutation
    pub async fn count_target(
        &self,
        query: &str,
        cancel: &CancelFlag,
        observer: &dyn BatchObserver,
    ) -> Result<TargetOutcome> {
        let mut counted = 0usize;
        let mut page_token: Option<String> = None;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Ok(TargetOutcome::Cancelled(counted));
            }

            attempts += 1;
            if attempts > self.config.max_page_attempts {
                return Err(EngineError::AttemptsExhausted {
                    attempts: self.config.max_page_attempts,
                });
            }

            self.ensure_fresh_token().await?;
            if cancel.is_cancelled() {
                return Ok(TargetOutcome::Cancelled(counted));
            }

            let page = self
                .provider
                .search_ids(query, page_token.as_deref(), self.config.page_size)
                .await?;
            if cancel.is_cancelled() {
                return Ok(TargetOutcome::Cancelled(counted));
            }

            if page.ids.is_empty() {
                return Ok(TargetOutcome::Completed(counted));
            }

            counted += page.ids.len();
            observer.on_batch(page.ids.len()).await;

            // Counting does not shrink the result set, so a missing
            // continuation token is the terminating condition.
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(TargetOutcome::Completed(counted)),
            }

            tokio::time::sleep(self.config.inter_batch_delay).await;
        }
    }
}
