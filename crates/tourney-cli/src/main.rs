use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tourney_storage::PgRecordStore;
use tourney_sync::{
    report, with_pipeline_from_env, IngestOutcome, ReconcileSummary, SyncConfig, SyncPipeline,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tourney-cli")]
#[command(about = "Portal to Website tournament reconciliation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// One reconciliation pass (the default).
    Reconcile,
    /// Re-check staging records and promote complete ones.
    Sweep,
    /// Delete stale, never-promoted administrative staging records.
    Purge,
    /// Create a staging record for one approved application.
    Ingest { application_id: String },
    /// Print the most recent run reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    Migrate,
    /// Run the sweep and reconciliation jobs until interrupted.
    Schedule,
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Reconcile) {
        Commands::Reconcile => {
            let outcome = tourney_sync::run_reconcile_once_from_env().await?;
            print_summary(&outcome.summary);
            match (&outcome.reports_dir, &outcome.report_error) {
                (Some(dir), _) => println!("reports: {}", dir.display()),
                (None, Some(err)) => eprintln!("reports not written: {err}"),
                (None, None) => {}
            }
        }
        Commands::Sweep => {
            let report = with_pipeline_from_env(|p| async move { p.sweep_once().await }).await?;
            println!(
                "sweep complete: checked={} promoted={} deferred={} still_staging={} failures={}",
                report.checked,
                report.promoted,
                report.deferred,
                report.still_staging,
                report.failures.len()
            );
        }
        Commands::Purge => {
            let report = with_pipeline_from_env(|p| async move { p.purge_once().await }).await?;
            println!(
                "purge complete: purged={} failures={}",
                report.purged.len(),
                report.failures.len()
            );
        }
        Commands::Ingest { application_id } => {
            let outcome =
                with_pipeline_from_env(|p| async move { p.ingest(&application_id).await }).await?;
            match outcome {
                IngestOutcome::Created { record_id, gate } => {
                    println!("created staging record {record_id}: {gate:?}")
                }
                IngestOutcome::AlreadyPresent { record_id } => {
                    println!("application already linked to record {record_id}")
                }
                IngestOutcome::NotApproved => println!("application is not approved; nothing created"),
            }
        }
        Commands::Report { runs } => {
            let config = SyncConfig::from_env();
            println!("{}", report::report_recent_markdown(runs, &config.reports_dir)?);
        }
        Commands::Migrate => {
            let Ok(url) = std::env::var("DATABASE_URL") else {
                bail!("DATABASE_URL is not set; the file store needs no migrations");
            };
            let store = PgRecordStore::connect(&url).await.context("connecting to postgres")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            let config = SyncConfig {
                scheduler_enabled: true,
                ..SyncConfig::from_env()
            };
            let pipeline = Arc::new(SyncPipeline::open(config).await?);
            let result = run_scheduler(pipeline.clone()).await;
            pipeline.close().await?;
            result?;
        }
        Commands::Serve => tourney_web::serve_from_env().await?,
    }

    Ok(())
}

async fn run_scheduler(pipeline: Arc<SyncPipeline>) -> Result<()> {
    let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
        return Ok(());
    };
    sched.start().await.context("starting scheduler")?;
    info!("scheduler running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}

fn print_summary(summary: &ReconcileSummary) {
    println!("reconcile complete: run_id={} {}", summary.run_id, summary.headline());
    for app in &summary.unmatched_source_records {
        println!("  unmatched application: {} ({})", app.title, app.application_id);
    }
    for orphan in &summary.local_orphans {
        println!("  local-only record: {} ({})", orphan.name, orphan.record_id);
    }
    for failure in &summary.failures {
        println!(
            "  failed {:?} on {}: {}",
            failure.operation, failure.record_id, failure.message
        );
    }
}
