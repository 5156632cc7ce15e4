use anyhow::Result;
use clap::Parser;
use mailsweep_engine::action_log::ActionLogWriter;
use mailsweep_engine::cli::{self, Cli, Commands};
use mailsweep_engine::config::Config;
use mailsweep_engine::error::EngineError;
use mailsweep_engine::executor::{HandlerRegistry, NoopCountSink};
use mailsweep_engine::gmail::GmailProvider;
use mailsweep_engine::models::{JobPayload, JobStatus};
use mailsweep_engine::queue::{JobQueue, QueueDeps};
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: mailsweep --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // This is necessary because multiple dependencies use different crypto providers
    // On non-Windows platforms, use aws-lc-rs (better performance, FIPS support)
    // On Windows, use ring (better compatibility, no NASM/CMake required)
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    // Take the global options apart up front; the command match below moves
    // its owned argument lists out, so the paths have to live on their own
    let Cli {
        config: config_path,
        credentials,
        token_cache,
        verbose,
        command,
    } = Cli::parse();

    // Initialize tracing with level based on verbose flag
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mailsweep_engine=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mailsweep_engine=info,warn,error"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Ensure .mailsweep directory exists for token cache and logs
    tokio::fs::create_dir_all(".mailsweep").await?;

    match command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if let Some(parent) = token_cache.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            // Delete existing token if force flag is set
            if force && token_cache.exists() {
                tokio::fs::remove_file(&token_cache).await?;
                tracing::info!("Removed existing token cache");
            }

            let (hub, _tokens) =
                mailsweep_engine::auth::initialize_gmail(&credentials, &token_cache).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", token_cache);

            // Test the connection - must specify scope to avoid triggering additional OAuth flow
            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Delete {
            senders,
            keep_unread,
            keep_attachments,
            keep_containing,
        } => {
            let targets = cli::parse_targets(&senders)?;
            let exceptions = cli::exception_rules(keep_unread, keep_attachments, &keep_containing);

            let payload = if exceptions.is_empty() {
                JobPayload::Delete { targets }
            } else {
                JobPayload::DeleteWithExceptions {
                    targets,
                    exceptions,
                }
            };

            let queue = build_queue(&config_path, &credentials, &token_cache).await?;
            let job = cli::run_and_wait(&queue, payload).await?;
            print_summary(&job);

            Ok(())
        }

        Commands::Label {
            senders,
            add,
            remove,
        } => {
            let targets = cli::parse_targets(&senders)?;
            let payload = cli::label_payload(targets, add, remove)?;

            let queue = build_queue(&config_path, &credentials, &token_cache).await?;
            let job = cli::run_and_wait(&queue, payload).await?;
            print_summary(&job);

            Ok(())
        }

        Commands::Filter {
            senders,
            add_labels,
            remove_labels,
        } => {
            let targets = cli::parse_targets(&senders)?;
            let payload = JobPayload::CreateFilter {
                senders: targets.into_iter().map(|t| t.address).collect(),
                add_label_ids: add_labels,
                remove_label_ids: remove_labels,
            };

            let queue = build_queue(&config_path, &credentials, &token_cache).await?;
            let job = cli::run_and_wait(&queue, payload).await?;
            print_summary(&job);

            Ok(())
        }

        Commands::Analyze { senders } => {
            let targets = cli::parse_targets(&senders)?;
            let payload = JobPayload::Analysis { targets };

            let queue = build_queue(&config_path, &credentials, &token_cache).await?;
            let job = cli::run_and_wait(&queue, payload).await?;

            if let Some(tallies) = &job.analysis {
                println!("\nMessages per sender:");
                let mut rows: Vec<_> = tallies.iter().collect();
                rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
                for (address, count) in rows {
                    println!("  {:>8}  {}", count, address);
                }
            }
            print_summary(&job);

            Ok(())
        }

        Commands::History { limit } => {
            let config = Config::load(&config_path).await?;
            let writer = ActionLogWriter::new(config.action_log.dir.as_str(), None);
            let records = writer.load_all().await?;

            if records.is_empty() {
                println!("No past runs recorded.");
                return Ok(());
            }

            println!("\n========================================");
            println!("Past runs ({} most recent)", limit.min(records.len()));
            println!("========================================");
            for record in records.iter().take(limit) {
                let end = record
                    .end_type
                    .map(|e| format!("{:?}", e))
                    .unwrap_or_else(|| "in progress".to_string());
                println!(
                    "{}  {:?}  {}/{} items  {}",
                    record.started_at.format("%Y-%m-%d %H:%M:%S"),
                    record.job_type,
                    record.processed_items,
                    record.total_items,
                    end
                );
                if let Some(error) = &record.error {
                    println!("    error: {}", error);
                }
            }

            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(EngineError::Config(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::default().save(&output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - batch.page_size: IDs fetched per search page");
            println!("  - batch.inter_batch_delay_ms: pause between mutate calls");
            println!("  - action_log.dir: where per-job log files are written");

            Ok(())
        }
    }
}

async fn build_queue(
    config_path: &Path,
    credentials: &Path,
    token_cache: &Path,
) -> Result<JobQueue> {
    let config = Config::load(config_path).await?;

    let (hub, tokens) =
        mailsweep_engine::auth::initialize_gmail(credentials, token_cache).await?;
    let provider = Arc::new(GmailProvider::new(hub));

    let queue = JobQueue::new(QueueDeps {
        provider,
        tokens: Arc::new(tokens),
        registry: HandlerRegistry::with_defaults(),
        log_writer: ActionLogWriter::new(config.action_log.dir.as_str(), None),
        counts: Arc::new(NoopCountSink),
        batch_config: config.batch.to_batch_config(),
    });

    queue.on_reauth_required(Arc::new(|| {
        eprintln!("\nGmail authorization expired. Run: mailsweep auth --force");
    }));

    Ok(queue)
}

fn print_summary(job: &mailsweep_engine::models::Job) {
    println!("\n========================================");
    println!("Job Summary");
    println!("========================================");
    println!("Job ID: {}", job.id);
    println!("Type: {:?}", job.job_type);
    println!("Status: {:?}", job.status);
    println!("Items processed: {}", job.processed);
    if let Some(error) = &job.error {
        println!("Error: {}", error);
    }
    println!("========================================");

    if job.status == JobStatus::Failed {
        process::exit(1);
    }
}
