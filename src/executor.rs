//! Job executors: thin adapters from a job payload to batch-runner calls
//!
//! Each handler validates its payload, drives the batch runner once per
//! target strictly in order, and aggregates per-target results into the
//! job-level outcome. Targets are never processed in parallel: the provider
//! rate-limits per account, so parallelism buys nothing and multiplies
//! token-refresh races.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::action_log::ActionLog;
use crate::batch::{BatchObserver, BatchRunner, CancelFlag};
use crate::error::{EngineError, Result};
use crate::models::{JobPayload, JobType, LabelAction, Target};
use crate::provider::{MailProvider, Mutation};
use crate::query::{self, FilterRules};

/// Collaborator hook: called once a target fully and successfully completes,
/// so cached per-sender counts in UI lists can be zeroed without re-analysis
pub trait TargetCountSink: Send + Sync {
    fn mark_consumed(&self, address: &str);
}

/// Count sink that does nothing; used when no UI cache is wired up
pub struct NoopCountSink;

impl TargetCountSink for NoopCountSink {
    fn mark_consumed(&self, _address: &str) {}
}

/// Receives per-batch progress deltas; implemented by the queue's tracker
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, delta: usize, current_target: Option<&str>);
}

/// Everything a handler needs for one job run
pub struct JobContext {
    pub runner: BatchRunner,
    pub provider: Arc<dyn MailProvider>,
    pub cancel: CancelFlag,
    pub progress: Arc<dyn ProgressSink>,
    pub log: Arc<ActionLog>,
    pub counts: Arc<dyn TargetCountSink>,
}

/// Aggregated result of one job run
///
/// Hard failures are returned as `Err`; cancellation is a normal outcome.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub processed: usize,
    pub cancelled: bool,
    /// Per-sender tallies, produced by analysis jobs only
    pub analysis: Option<HashMap<String, usize>>,
}

/// One registered async job handler
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, payload: &JobPayload, ctx: &JobContext) -> Result<JobOutcome>;
}

/// Maps a job's type tag to its registered handler
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with all built-in handlers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(JobType::Delete, Arc::new(DeleteHandler));
        registry.register(JobType::ModifyLabel, Arc::new(ModifyLabelHandler));
        registry.register(
            JobType::DeleteWithExceptions,
            Arc::new(DeleteWithExceptionsHandler),
        );
        registry.register(JobType::CreateFilter, Arc::new(CreateFilterHandler));
        registry.register(JobType::Analysis, Arc::new(AnalysisHandler));
        registry
    }

    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type, handler);
    }

    pub fn get(&self, job_type: JobType) -> Result<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned().ok_or_else(|| {
            EngineError::Validation(format!("no handler registered for {:?}", job_type))
        })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Batch observer that feeds both the progress sink and the action log,
/// keeping a running total across targets
struct TargetProgress<'a> {
    ctx: &'a JobContext,
    target: &'a str,
    total: &'a AtomicUsize,
}

#[async_trait]
impl BatchObserver for TargetProgress<'_> {
    async fn on_batch(&self, delta: usize) {
        let total = self.total.fetch_add(delta, Ordering::SeqCst) + delta;
        self.ctx.progress.on_progress(delta, Some(self.target));
        self.ctx.log.progress(total).await;
    }
}

/// Shared target loop for the mutating job types
async fn process_targets<F>(
    ctx: &JobContext,
    targets: &[Target],
    mutation: &Mutation,
    query_for: F,
) -> Result<JobOutcome>
where
    F: Fn(&Target) -> String,
{
    let total = AtomicUsize::new(0);

    for target in targets {
        if ctx.cancel.is_cancelled() {
            return Ok(JobOutcome {
                processed: total.load(Ordering::SeqCst),
                cancelled: true,
                analysis: None,
            });
        }

        let query = query_for(target);
        debug!(target = %target.address, %query, "processing target");

        let observer = TargetProgress {
            ctx,
            target: &target.address,
            total: &total,
        };
        let outcome = ctx
            .runner
            .run_target(&query, mutation, &ctx.cancel, &observer)
            .await?;

        if outcome.is_cancelled() {
            info!(target = %target.address, "job cancelled mid-target");
            return Ok(JobOutcome {
                processed: total.load(Ordering::SeqCst),
                cancelled: true,
                analysis: None,
            });
        }

        ctx.counts.mark_consumed(&target.address);
    }

    Ok(JobOutcome {
        processed: total.load(Ordering::SeqCst),
        cancelled: false,
        analysis: None,
    })
}

fn sender_query(target: &Target) -> String {
    query::build_query(
        std::slice::from_ref(&target.address),
        &FilterRules::default(),
    )
}

/// Deletes every message from each target sender
pub struct DeleteHandler;

#[async_trait]
impl JobHandler for DeleteHandler {
    async fn run(&self, payload: &JobPayload, ctx: &JobContext) -> Result<JobOutcome> {
        payload.validate()?;
        let JobPayload::Delete { targets } = payload else {
            return Err(EngineError::Validation(
                "delete handler got a non-delete payload".to_string(),
            ));
        };
        process_targets(ctx, targets, &Mutation::Delete, sender_query).await
    }
}

/// Adds or removes labels on every message from each target sender
pub struct ModifyLabelHandler;

#[async_trait]
impl JobHandler for ModifyLabelHandler {
    async fn run(&self, payload: &JobPayload, ctx: &JobContext) -> Result<JobOutcome> {
        payload.validate()?;
        let JobPayload::ModifyLabel {
            targets,
            label_ids,
            action,
        } = payload
        else {
            return Err(EngineError::Validation(
                "modify-label handler got a mismatched payload".to_string(),
            ));
        };

        let mutation = match action {
            LabelAction::Add => Mutation::Labels {
                add: label_ids.clone(),
                remove: Vec::new(),
            },
            LabelAction::Remove => Mutation::Labels {
                add: Vec::new(),
                remove: label_ids.clone(),
            },
        };
        process_targets(ctx, targets, &mutation, sender_query).await
    }
}

/// Deletes from each target sender except messages matching the exception
/// rules
pub struct DeleteWithExceptionsHandler;

#[async_trait]
impl JobHandler for DeleteWithExceptionsHandler {
    async fn run(&self, payload: &JobPayload, ctx: &JobContext) -> Result<JobOutcome> {
        payload.validate()?;
        let JobPayload::DeleteWithExceptions {
            targets,
            exceptions,
        } = payload
        else {
            return Err(EngineError::Validation(
                "delete-with-exceptions handler got a mismatched payload".to_string(),
            ));
        };

        process_targets(ctx, targets, &Mutation::Delete, |target| {
            query::build_exception_query(std::slice::from_ref(&target.address), exceptions)
        })
        .await
    }
}

/// Single non-paginated provider call; flows through the same
/// queue/progress/log machinery as the batch jobs for consistency
pub struct CreateFilterHandler;

#[async_trait]
impl JobHandler for CreateFilterHandler {
    async fn run(&self, payload: &JobPayload, ctx: &JobContext) -> Result<JobOutcome> {
        payload.validate()?;
        let JobPayload::CreateFilter {
            senders,
            add_label_ids,
            remove_label_ids,
        } = payload
        else {
            return Err(EngineError::Validation(
                "create-filter handler got a mismatched payload".to_string(),
            ));
        };

        if ctx.cancel.is_cancelled() {
            return Ok(JobOutcome {
                cancelled: true,
                ..Default::default()
            });
        }

        let filter_id = ctx
            .provider
            .create_filter(senders, add_label_ids, remove_label_ids)
            .await?;
        info!(%filter_id, "provider filter created");

        ctx.progress.on_progress(1, None);
        ctx.log.progress(1).await;

        Ok(JobOutcome {
            processed: 1,
            cancelled: false,
            analysis: None,
        })
    }
}

/// Counts messages per target sender without mutating anything
pub struct AnalysisHandler;

#[async_trait]
impl JobHandler for AnalysisHandler {
    async fn run(&self, payload: &JobPayload, ctx: &JobContext) -> Result<JobOutcome> {
        payload.validate()?;
        let JobPayload::Analysis { targets } = payload else {
            return Err(EngineError::Validation(
                "analysis handler got a non-analysis payload".to_string(),
            ));
        };

        let total = AtomicUsize::new(0);
        let mut tallies = HashMap::new();

        for target in targets {
            if ctx.cancel.is_cancelled() {
                return Ok(JobOutcome {
                    processed: total.load(Ordering::SeqCst),
                    cancelled: true,
                    analysis: Some(tallies),
                });
            }

            let query = sender_query(target);
            let observer = TargetProgress {
                ctx,
                target: &target.address,
                total: &total,
            };
            let outcome = ctx
                .runner
                .count_target(&query, &ctx.cancel, &observer)
                .await?;

            if outcome.is_cancelled() {
                return Ok(JobOutcome {
                    processed: total.load(Ordering::SeqCst),
                    cancelled: true,
                    analysis: Some(tallies),
                });
            }

            tallies.insert(target.address.clone(), outcome.processed());
        }

        Ok(JobOutcome {
            processed: total.load(Ordering::SeqCst),
            cancelled: false,
            analysis: Some(tallies),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_log::ActionLogWriter;
    use crate::auth::{AccessToken, TokenProvider};
    use crate::batch::BatchConfig;
    use crate::models::Job;
    use crate::provider::{MutateOutcome, SearchPage};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Provider where every sender has a fixed number of messages, served in
    /// single pages. Deletion empties the mailbox; label changes leave it
    /// visible to later searches, matching real provider semantics
    struct FixedProvider {
        counts: Mutex<HashMap<String, usize>>,
        filter_calls: Mutex<Vec<Vec<String>>>,
    }

    impl FixedProvider {
        fn new(counts: &[(&str, usize)]) -> Self {
            Self {
                counts: Mutex::new(
                    counts
                        .iter()
                        .map(|(addr, n)| (addr.to_string(), *n))
                        .collect(),
                ),
                filter_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MailProvider for FixedProvider {
        async fn search_ids(
            &self,
            query: &str,
            _page_token: Option<&str>,
            _page_size: u32,
        ) -> Result<SearchPage> {
            let counts = self.counts.lock().unwrap();
            let count = counts
                .iter()
                .find(|(addr, _)| query.contains(addr.as_str()))
                .map(|(_, n)| *n)
                .unwrap_or(0);
            Ok(SearchPage {
                ids: (0..count).map(|i| format!("id{}", i)).collect(),
                next_page_token: None,
            })
        }

        async fn batch_mutate(
            &self,
            ids: &[String],
            mutation: &Mutation,
        ) -> Result<MutateOutcome> {
            // Only deletion consumes the sender's mailbox
            if matches!(mutation, Mutation::Delete) {
                let mut counts = self.counts.lock().unwrap();
                for (_, n) in counts.iter_mut() {
                    if *n == ids.len() {
                        *n = 0;
                        break;
                    }
                }
            }
            Ok(MutateOutcome::all_applied())
        }

        async fn create_filter(
            &self,
            senders: &[String],
            _add: &[String],
            _remove: &[String],
        ) -> Result<String> {
            self.filter_calls.lock().unwrap().push(senders.to_vec());
            Ok("filter-9".to_string())
        }
    }

    struct FreshTokens;

    #[async_trait]
    impl TokenProvider for FreshTokens {
        async fn acquire(&self) -> Result<AccessToken> {
            Ok(AccessToken {
                value: "tok".to_string(),
                expires_at: None,
            })
        }

        async fn force_refresh(&self) -> Result<AccessToken> {
            self.acquire().await
        }

        async fn remaining_lifetime(&self) -> Duration {
            Duration::from_secs(3600)
        }
    }

    struct CollectingSink(Mutex<Vec<(usize, Option<String>)>>);

    impl ProgressSink for CollectingSink {
        fn on_progress(&self, delta: usize, current_target: Option<&str>) {
            self.0
                .lock()
                .unwrap()
                .push((delta, current_target.map(|s| s.to_string())));
        }
    }

    struct ConsumedRecorder(Mutex<Vec<String>>);

    impl TargetCountSink for ConsumedRecorder {
        fn mark_consumed(&self, address: &str) {
            self.0.lock().unwrap().push(address.to_string());
        }
    }

    async fn context_for(provider: Arc<dyn MailProvider>, dir: &TempDir) -> JobContext {
        let tokens: Arc<dyn TokenProvider> = Arc::new(FreshTokens);
        let config = BatchConfig {
            inter_batch_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let job = Job::new(
            JobPayload::Delete {
                targets: vec![Target::new("a@x.com", 1)],
            },
            Duration::from_secs(1),
        );
        let log = ActionLogWriter::new(dir.path(), None).begin(&job).await;
        JobContext {
            runner: BatchRunner::new(provider.clone(), tokens, config),
            provider,
            cancel: CancelFlag::new(),
            progress: Arc::new(CollectingSink(Mutex::new(Vec::new()))),
            log,
            counts: Arc::new(NoopCountSink),
        }
    }

    #[tokio::test]
    async fn test_delete_handler_processes_targets_in_order() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FixedProvider::new(&[("a@x.com", 250), ("b@x.com", 10)]));
        let mut ctx = context_for(provider, &dir).await;
        let consumed = Arc::new(ConsumedRecorder(Mutex::new(Vec::new())));
        ctx.counts = consumed.clone();

        let payload = JobPayload::Delete {
            targets: vec![Target::new("a@x.com", 250), Target::new("b@x.com", 10)],
        };
        let outcome = DeleteHandler.run(&payload, &ctx).await.unwrap();

        assert_eq!(outcome.processed, 260);
        assert!(!outcome.cancelled);
        assert_eq!(
            *consumed.0.lock().unwrap(),
            vec!["a@x.com".to_string(), "b@x.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_handler_rejects_mismatched_payload() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FixedProvider::new(&[]));
        let ctx = context_for(provider, &dir).await;

        let payload = JobPayload::Analysis {
            targets: vec![Target::new("a@x.com", 1)],
        };
        let err = DeleteHandler.run(&payload, &ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_between_targets_keeps_partial_count() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FixedProvider::new(&[("a@x.com", 50), ("b@x.com", 50)]));
        let ctx = context_for(provider, &dir).await;

        // Consume hook fires after the first target; cancel there
        struct CancelOnFirst(CancelFlag);
        impl TargetCountSink for CancelOnFirst {
            fn mark_consumed(&self, _address: &str) {
                self.0.cancel();
            }
        }
        let ctx = JobContext {
            counts: Arc::new(CancelOnFirst(ctx.cancel.clone())),
            ..ctx
        };

        let payload = JobPayload::Delete {
            targets: vec![Target::new("a@x.com", 50), Target::new("b@x.com", 50)],
        };
        let outcome = DeleteHandler.run(&payload, &ctx).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.processed, 50);
    }

    #[tokio::test]
    async fn test_modify_label_handler_completes_despite_stable_searches() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FixedProvider::new(&[("a@x.com", 120)]));
        let ctx = context_for(provider.clone(), &dir).await;

        let payload = JobPayload::ModifyLabel {
            targets: vec![Target::new("a@x.com", 120)],
            label_ids: vec!["Label_1".to_string()],
            action: LabelAction::Add,
        };
        let outcome = ModifyLabelHandler.run(&payload, &ctx).await.unwrap();

        assert_eq!(outcome.processed, 120);
        assert!(!outcome.cancelled);
        // Labeling leaves the mailbox visible to searches
        assert_eq!(provider.counts.lock().unwrap()["a@x.com"], 120);
    }

    #[tokio::test]
    async fn test_analysis_handler_tallies_per_sender() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FixedProvider::new(&[("a@x.com", 120), ("b@x.com", 7)]));
        let ctx = context_for(provider, &dir).await;

        let payload = JobPayload::Analysis {
            targets: vec![Target::new("a@x.com", 0), Target::new("b@x.com", 0)],
        };
        let outcome = AnalysisHandler.run(&payload, &ctx).await.unwrap();

        assert_eq!(outcome.processed, 127);
        let tallies = outcome.analysis.unwrap();
        assert_eq!(tallies["a@x.com"], 120);
        assert_eq!(tallies["b@x.com"], 7);
    }

    #[tokio::test]
    async fn test_create_filter_handler_single_call() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(FixedProvider::new(&[]));
        let ctx = context_for(provider.clone(), &dir).await;

        let payload = JobPayload::CreateFilter {
            senders: vec!["a@x.com".to_string()],
            add_label_ids: vec!["Label_1".to_string()],
            remove_label_ids: vec![],
        };
        let outcome = CreateFilterHandler.run(&payload, &ctx).await.unwrap();

        assert_eq!(outcome.processed, 1);
        assert_eq!(provider.filter_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_registry_resolves_defaults() {
        let registry = HandlerRegistry::with_defaults();
        for job_type in [
            JobType::Analysis,
            JobType::Delete,
            JobType::ModifyLabel,
            JobType::DeleteWithExceptions,
            JobType::CreateFilter,
        ] {
            assert!(registry.get(job_type).is_ok());
        }
    }

    #[test]
    fn test_registry_missing_handler_is_validation_error() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.get(JobType::Delete),
            Err(EngineError::Validation(_))
        ));
    }
}
