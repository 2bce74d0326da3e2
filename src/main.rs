//! `closet` - command line entry points for the enrichment pipeline.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use closet_enrich::gate::GatePolicy;
use closet_enrich::ollama::OllamaClient;
use closet_enrich::pipeline::{collection_status, PassOptions, PipelineDriver};
use closet_enrich::playlist;
use closet_enrich::store::{diff_is_meaningful, RecordStore, SnapshotStore};
use closet_enrich::subtitles::YtDlpSubtitles;
use closet_enrich::PipelineConfig;

#[derive(Parser, Debug)]
#[command(name = "closet")]
#[command(about = "Enrich the Criterion Closet dataset with subtitles and extracted picks")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot file, overriding the configured one
    #[arg(short, long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one enrichment pass over the snapshot
    Run {
        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,

        /// Retry stages that ran out of attempts, without waiting for the cooldown
        #[arg(long)]
        retry_exhausted: bool,
    },
    /// Merge a yt-dlp flat-playlist dump into the snapshot
    Import { playlist: PathBuf },
    /// Show what a pass would still have to do
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Exit 0 if the change between two snapshots is meaningful, 1 if not
    Diff { before: PathBuf, after: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::Diff { before, after } = &cli.command {
        return match diff(before, after) {
            Ok(true) => ExitCode::from(0),
            Ok(false) => ExitCode::from(1),
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(2)
            }
        };
    }

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let work_dir = std::env::current_dir().context("Failed to read working directory")?;
    let mut config = PipelineConfig::load(cli.config.as_deref(), &work_dir)
        .context("Failed to load configuration")?;
    if let Some(snapshot) = cli.snapshot {
        config.snapshot_path = snapshot;
    }

    match cli.command {
        Command::Run {
            json,
            retry_exhausted,
        } => run(&config, json, retry_exhausted).await,
        Command::Import { playlist } => import(&config, &playlist),
        Command::Status { json } => status(&config, json),
        Command::Diff { .. } => Ok(()),
    }
}

async fn run(config: &PipelineConfig, json: bool, retry_exhausted: bool) -> Result<()> {
    let store = RecordStore::new(&config.snapshot_path);
    let subtitles = YtDlpSubtitles::new(&config.subtitles);
    let extractor = OllamaClient::new(&config.ollama);

    match extractor.health_check().await {
        Ok(status) if !status.model_available => warn!(
            "Model {} not found in Ollama (available: {}), extraction will fail",
            status.model,
            status.available_models.join(", ")
        ),
        Ok(_) => {}
        Err(e) => warn!("{}; records needing extraction will be retried next pass", e),
    }

    let options = PassOptions {
        retry_exhausted,
        ..PassOptions::from(config)
    };
    let driver = PipelineDriver::new(&subtitles, &extractor, options);
    let report = driver
        .run_pass(&store)
        .await
        .with_context(|| format!("Enrichment pass over {:?} failed", config.snapshot_path))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
        for record in &report.incomplete {
            println!("  {} [{}]: {}", record.id, record.stage, record.reason);
        }
    }
    Ok(())
}

fn import(config: &PipelineConfig, playlist_path: &Path) -> Result<()> {
    let store = RecordStore::new(&config.snapshot_path);
    let mut collection = store.load_or_empty()?;
    let entries = playlist::read_playlist(playlist_path)
        .with_context(|| format!("Failed to read playlist {:?}", playlist_path))?;

    let summary = playlist::import_entries(&mut collection, entries);
    if summary.added + summary.updated > 0 || collection.normalized() > 0 {
        store.save(&collection)?;
    } else {
        info!("Playlist brought nothing new, snapshot left untouched");
    }
    println!(
        "{} new, {} updated, {} unchanged ({} records total)",
        summary.added,
        summary.updated,
        summary.unchanged,
        collection.len()
    );
    Ok(())
}

fn status(config: &PipelineConfig, json: bool) -> Result<()> {
    let store = RecordStore::new(&config.snapshot_path);
    let collection = store.load()?;
    let policy = GatePolicy::new(config.max_attempts, config.exhausted_cooldown_hours);
    let status = collection_status(&collection, &policy);

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("{} records", status.records);
    for (stage, counts) in [("subtitles", &status.subtitles), ("structured", &status.structured)] {
        println!(
            "  {:<10} {} complete, {} need work, {} waiting for subtitles, {} gave up",
            stage,
            counts.complete,
            counts.needs_work,
            counts.waiting_for_subtitles,
            counts.attempts_exhausted
        );
    }
    Ok(())
}

fn diff(before: &Path, after: &Path) -> Result<bool> {
    let before = RecordStore::new(before)
        .load()
        .with_context(|| format!("Failed to load {:?}", before))?;
    let after = RecordStore::new(after)
        .load()
        .with_context(|| format!("Failed to load {:?}", after))?;
    let meaningful = diff_is_meaningful(&before, &after);
    println!("{}", if meaningful { "meaningful" } else { "cosmetic" });
    Ok(meaningful)
}
