//! # bec-alerts entry point
//!
//! `processor` consumes the error-event queue, `watcher` evaluates triggers
//! and sends alerts, `migrate` applies the schema and exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use bec_alerts::{
    alerts::build_alert_backend,
    config::{AppConfig, ConfigLoader},
    db,
    processor::Processor,
    queue::SqsQueueBackend,
    repositories::IssueRepository,
    telemetry,
    triggers::TriggerRegistry,
    watcher::{TriggerEvaluator, Watcher},
};
use clap::{Parser, Subcommand};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "bec-alerts", version, about = "Error alerting pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consume error events from the queue into the issue store
    Processor {
        /// Seconds to wait after a failed poll
        #[arg(long)]
        sleep_delay: Option<u64>,
        #[arg(long)]
        queue_name: Option<String>,
    },
    /// Evaluate triggers and send alerts
    Watcher {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
        /// Print alerts to stdout instead of sending email
        #[arg(long)]
        dry_run: bool,
        /// Ask SES to verify the sending address on startup
        #[arg(long)]
        verify_email: bool,
        /// Seconds between passes
        #[arg(long)]
        sleep_delay: Option<u64>,
    },
    /// Apply database migrations and exit
    Migrate,
}

impl Command {
    fn apply(&self, config: &mut AppConfig) {
        match self {
            Command::Processor {
                sleep_delay,
                queue_name,
            } => {
                if let Some(delay) = sleep_delay {
                    config.processor.sleep_delay_seconds = *delay;
                }
                if let Some(name) = queue_name {
                    config.processor.queue_name = name.clone();
                }
            }
            Command::Watcher {
                once,
                dry_run,
                verify_email,
                sleep_delay,
            } => {
                config.watcher.once |= *once;
                config.watcher.dry_run |= *dry_run;
                config.watcher.verify_email |= *verify_email;
                if let Some(delay) = sleep_delay {
                    config.watcher.sleep_delay_seconds = *delay;
                }
            }
            Command::Migrate => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    cli.command.apply(&mut config);

    let validation = match &cli.command {
        Command::Processor { .. } => config.validate_for_processor(),
        Command::Watcher { .. } => config.validate_for_watcher(),
        Command::Migrate => config.validate(),
    };
    validation.context("validating configuration")?;

    telemetry::init_tracing(&config).context("initializing tracing")?;
    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        debug!(config = %redacted, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::migrate(&db).await.context("applying migrations")?;
    let db = Arc::new(db);

    let shutdown = CancellationToken::new();
    spawn_ctrl_c_handler(shutdown.clone());

    match cli.command {
        Command::Processor { .. } => {
            let queue = SqsQueueBackend::connect(&config.aws, &config.processor)
                .await
                .context("connecting to the event queue")?;
            let processor = Processor::new(
                Arc::new(queue),
                IssueRepository::new(db),
                Duration::from_secs(config.processor.sleep_delay_seconds),
            );
            processor.run(shutdown).await?;
        }
        Command::Watcher { .. } => {
            let registry =
                TriggerRegistry::with_builtin_triggers().context("registering triggers")?;
            info!(triggers = registry.len(), "Registered triggers");

            let backend = build_alert_backend(&config)
                .await
                .context("building alert backend")?;
            let evaluator = TriggerEvaluator::new(Arc::new(registry), backend);
            Watcher::new(db, evaluator, &config.watcher)
                .run(shutdown)
                .await?;
        }
        Command::Migrate => info!("Migrations applied"),
    }

    Ok(())
}

fn spawn_ctrl_c_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Could not listen for shutdown signal");
            return;
        }
        info!("Shutdown requested");
        shutdown.cancel();
    });
}
