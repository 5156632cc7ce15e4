//! Mailsweep Engine
//!
//! A bulk-operation execution engine for Gmail cleanup: user-initiated bulk
//! actions (delete everything from a sender, relabel, create filters,
//! analyze inbox composition) become queued jobs that run as safe,
//! cancellable, rate-limit-respecting sequences of API calls.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 with token caching and proactive refresh
//! - **Job Queue**: FIFO queue, one job running at a time, live progress
//!   subscriptions and cooperative cancellation
//! - **Batch Runner**: paginated search + chunked mutation with inter-batch
//!   pacing and a hard page-attempt cap
//! - **Executors**: one handler per job type behind a registry
//! - **Action Log**: a local JSON record per run, finalized exactly once
//! - **ETA**: fixed-throughput estimates refined by live progress
//!
//! # Example Usage
//!
//! ```no_run
//! use mailsweep_engine::{auth, config::Config, gmail::GmailProvider};
//! use mailsweep_engine::action_log::ActionLogWriter;
//! use mailsweep_engine::executor::{HandlerRegistry, NoopCountSink};
//! use mailsweep_engine::models::{JobPayload, Target};
//! use mailsweep_engine::queue::{JobQueue, QueueDeps};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let (hub, tokens) = auth::initialize_gmail(
//!         "credentials.json".as_ref(),
//!         ".mailsweep/token.json".as_ref(),
//!     )
//!     .await?;
//!
//!     let queue = JobQueue::new(QueueDeps {
//!         provider: Arc::new(GmailProvider::new(hub)),
//!         tokens: Arc::new(tokens),
//!         registry: HandlerRegistry::with_defaults(),
//!         log_writer: ActionLogWriter::new(config.action_log.dir.as_str(), None),
//!         counts: Arc::new(NoopCountSink),
//!         batch_config: config.batch.to_batch_config(),
//!     });
//!
//!     let id = queue.enqueue(JobPayload::Delete {
//!         targets: vec![Target::new("newsletter@example.com", 250)],
//!     })?;
//!     println!("job {} submitted", id);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and token lifetime tracking
//! - [`action_log`] - Per-run audit records, local file plus optional remote sink
//! - [`batch`] - Paginated, cancellable search-and-mutate loop
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result alias
//! - [`eta`] - Runtime estimation
//! - [`executor`] - Job handlers and the handler registry
//! - [`gmail`] - Production Gmail adapter
//! - [`models`] - Core data structures
//! - [`provider`] - Mail-provider trait the engine is written against
//! - [`query`] - Deterministic Gmail search-query construction
//! - [`queue`] - Job queue, progress fan-out, reauth notification

pub mod action_log;
pub mod auth;
pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod eta;
pub mod executor;
pub mod gmail;
pub mod models;
pub mod provider;
pub mod query;
pub mod queue;

// Re-export commonly used types for convenience
pub use error::{EngineError, Result};

// Core data models
pub use models::{
    EndType, Job, JobId, JobPayload, JobStatus, JobType, LabelAction, ProgressSnapshot, Target,
};

// Query construction
pub use query::{FilterCondition, FilterGroup, FilterRules};

// Batch runner types
pub use batch::{BatchConfig, BatchRunner, CancelFlag, TargetOutcome};

// Executor types
pub use executor::{HandlerRegistry, JobContext, JobHandler, JobOutcome};

// Queue types
pub use queue::{JobQueue, ProgressCallback, QueueDeps, ReauthListener};

// Provider contract and the production adapter
pub use gmail::GmailProvider;
pub use provider::{MailProvider, MutateOutcome, Mutation, SearchPage};

// Action log
pub use action_log::{ActionLog, ActionLogRecord, ActionLogWriter, AuditSink};

// Config types
pub use config::{ActionLogConfig, AuthConfig, BatchSection, Config};

// CLI types (for binary usage)
pub use cli::{Cli, Commands};
