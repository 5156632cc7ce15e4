//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::models::{JobStatus, LabelAction, ProgressSnapshot, Target};
use crate::query::{FilterCondition, FilterGroup, FilterRules};
use crate::queue::JobQueue;

#[derive(Parser, Debug)]
#[command(name = "mailsweep")]
#[command(version = "0.3.1")]
#[command(about = "Queued, cancellable bulk cleanup jobs for Gmail", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".mailsweep/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with the Gmail API
    Auth {
        /// Force re-authentication even if a cached token exists
        #[arg(long)]
        force: bool,
    },

    /// Delete all mail from one or more senders
    Delete {
        /// Sender address, optionally with an estimated count: a@x.com or a@x.com:250
        #[arg(short, long = "sender", required = true)]
        senders: Vec<String>,

        /// Keep unread messages
        #[arg(long)]
        keep_unread: bool,

        /// Keep messages with attachments
        #[arg(long)]
        keep_attachments: bool,

        /// Keep messages containing a phrase (repeatable)
        #[arg(long = "keep-containing")]
        keep_containing: Vec<String>,
    },

    /// Add or remove labels on all mail from one or more senders
    Label {
        /// Sender address, optionally with an estimated count
        #[arg(short, long = "sender", required = true)]
        senders: Vec<String>,

        /// Label IDs to add
        #[arg(long = "add")]
        add: Vec<String>,

        /// Label IDs to remove
        #[arg(long = "remove")]
        remove: Vec<String>,
    },

    /// Create a Gmail filter for future mail from the senders
    Filter {
        /// Sender address
        #[arg(short, long = "sender", required = true)]
        senders: Vec<String>,

        /// Label IDs the filter should add
        #[arg(long = "add-label")]
        add_labels: Vec<String>,

        /// Label IDs the filter should remove
        #[arg(long = "remove-label")]
        remove_labels: Vec<String>,
    },

    /// Count matching mail per sender without changing anything
    Analyze {
        /// Sender address
        #[arg(short, long = "sender", required = true)]
        senders: Vec<String>,
    },

    /// Show past job runs from the local action log
    History {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Write an example configuration file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse a `--sender` argument: `a@x.com` or `a@x.com:250`
pub fn parse_target(raw: &str) -> Result<Target> {
    let (address, count) = match raw.rsplit_once(':') {
        Some((address, count)) => {
            let count: usize = count.parse().map_err(|_| {
                EngineError::Validation(format!(
                    "invalid sender spec '{}': count after ':' must be a number",
                    raw
                ))
            })?;
            (address, count)
        }
        None => (raw, 0),
    };
    if address.is_empty() || !address.contains('@') {
        return Err(EngineError::Validation(format!(
            "invalid sender address '{}'",
            address
        )));
    }
    Ok(Target::new(address, count))
}

pub fn parse_targets(raw: &[String]) -> Result<Vec<Target>> {
    raw.iter().map(|s| parse_target(s)).collect()
}

/// Translate the delete command's keep flags into exception rules; each flag
/// is its own group, so any one of them is enough to keep a message
pub fn exception_rules(
    keep_unread: bool,
    keep_attachments: bool,
    keep_containing: &[String],
) -> FilterRules {
    let mut groups = Vec::new();
    if keep_unread {
        groups.push(FilterGroup {
            conditions: vec![FilterCondition::Read(false)],
        });
    }
    if keep_attachments {
        groups.push(FilterGroup {
            conditions: vec![FilterCondition::HasAttachment(true)],
        });
    }
    for phrase in keep_containing {
        groups.push(FilterGroup {
            conditions: vec![FilterCondition::Contains(phrase.clone())],
        });
    }
    FilterRules { groups }
}

/// Enqueue a job, render its progress, and wait for the terminal state.
/// Ctrl-C requests cancellation; the job stops at its next checkpoint.
pub async fn run_and_wait(
    queue: &JobQueue,
    payload: crate::models::JobPayload,
) -> Result<crate::models::Job> {
    let id = queue.enqueue(payload)?;
    info!(job_id = %id, "job submitted");

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner} [{bar:40}] {percent}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> "),
    );

    let bar_for_updates = bar.clone();
    let token = queue.subscribe(
        id,
        Arc::new(move |snapshot: &ProgressSnapshot| {
            bar_for_updates.set_position(snapshot.percent_complete as u64);
            let mut msg = format!("{}/{}", snapshot.processed, snapshot.total_estimated);
            if let Some(target) = &snapshot.current_target {
                msg.push_str(&format!(" ({})", target));
            }
            if let Some(eta) = snapshot.eta {
                msg.push_str(&format!(" eta {}s", eta.as_secs()));
            }
            bar_for_updates.set_message(msg);
        }),
    );

    let cancel_queue = queue.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested, stopping at the next checkpoint...");
            cancel_queue.cancel(id);
        }
    });

    let job = loop {
        if let Some(job) = queue.get_job(id) {
            if job.status.is_terminal() {
                break job;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    ctrl_c.abort();
    queue.unsubscribe(id, token);

    match job.status {
        JobStatus::Completed => bar.finish_with_message(format!("done, {} items", job.processed)),
        JobStatus::Cancelled => {
            bar.abandon_with_message(format!("cancelled after {} items", job.processed))
        }
        _ => bar.abandon_with_message(
            job.error
                .clone()
                .unwrap_or_else(|| "failed".to_string()),
        ),
    }

    Ok(job)
}

/// Map the label command's add/remove lists onto a single payload
pub fn label_payload(
    targets: Vec<Target>,
    add: Vec<String>,
    remove: Vec<String>,
) -> Result<crate::models::JobPayload> {
    match (add.is_empty(), remove.is_empty()) {
        (false, true) => Ok(crate::models::JobPayload::ModifyLabel {
            targets,
            label_ids: add,
            action: LabelAction::Add,
        }),
        (true, false) => Ok(crate::models::JobPayload::ModifyLabel {
            targets,
            label_ids: remove,
            action: LabelAction::Remove,
        }),
        (true, true) => Err(EngineError::Validation(
            "label command needs --add or --remove".to_string(),
        )),
        (false, false) => Err(EngineError::Validation(
            "label command takes --add or --remove, not both; run it twice".to_string(),
        )),
    }
}
