//! Command-line entry point for the CNPJ ingestion pipeline.
//!
//! Wires together the publisher-discovery client (`cnpj-download`), the
//! archive producer (`cnpj-io`), and the per-backend schema builder and
//! loader (`cnpj-db`) behind the verbs `spec.md` §6 describes:
//! `get-availables`, `get-latest`, `get-urls`, `download`, `db init|load|
//! index`, `complete`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cnpj_core::{Config, Engine, Loader, Producer, SharedProgress};
use cnpj_db::SchemaBuilder;
use cnpj_download::{CnpjDataClient, DownloadManager};
use cnpj_io::ArchiveProducer;

#[derive(Parser)]
#[command(name = "cnpj", version, about = "CNPJ open-dataset ETL: discover, download, and load into SQLite or Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List every `MM/YYYY` month the publisher currently has available.
    GetAvailables,

    /// Print the most recent available month.
    GetLatest,

    /// Print every archive URL for a given month.
    GetUrls {
        /// Period to resolve, e.g. `07/2026`.
        month: String,
    },

    /// Download a month's archives, resuming any partial `.part` files.
    Download {
        /// Period to download; defaults to the latest available month.
        month: Option<String>,

        /// Delete any existing `.part`/final files first instead of resuming.
        #[arg(long)]
        clean: bool,

        /// Concurrent download workers.
        #[arg(long)]
        workers: Option<usize>,

        /// Base directory archives are written under (`<dir>/YYYY-MM/*.zip`).
        #[arg(long = "download-dir")]
        download_dir: Option<PathBuf>,
    },

    /// Schema and data-loading operations.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Emit a shell completion script for this CLI.
    Complete {
        /// Target shell, e.g. `bash`, `zsh`, `fish`.
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Create (or recreate) the database schema.
    Init(DbCommonArgs),

    /// Run the full producer/loader pipeline for a month, then repair,
    /// enable foreign keys, and build indexes.
    Load(DbCommonArgs),

    /// (Re)build every index in the catalog without touching data.
    Index(DbCommonArgs),
}

#[derive(Args, Clone)]
struct DbCommonArgs {
    /// `sqlite` or `postgres`.
    #[arg(long, default_value = "sqlite")]
    engine: String,

    /// SQLite database file path (SQLite engine only).
    #[arg(long = "db-path")]
    db_path: Option<PathBuf>,

    /// Postgres database name (Postgres engine only).
    #[arg(long = "db-name")]
    db_name: Option<String>,

    /// Month to load, e.g. `07/2026`; defaults to the latest available.
    #[arg(long)]
    month: Option<String>,

    /// Base directory archives were downloaded under.
    #[arg(long = "download-dir")]
    download_dir: Option<PathBuf>,

    /// Skip building indexes at the end of `load`.
    #[arg(long = "skip-index")]
    skip_index: bool,

    /// Skip comparing the local archive set against the remote one before loading.
    #[arg(long = "skip-validation")]
    skip_validation: bool,

    /// Drop each transformed batch promptly rather than holding it past its insert.
    #[arg(long = "low-memory")]
    low_memory: bool,

    /// Run one producer task per archive (Postgres engine only).
    #[arg(long, default_value_t = false)]
    parallel: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();

    let result = tokio::select! {
        res = dispatch(cli.command, run_cancel) => res,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch(command: Command, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = Config::from_env();

    match command {
        Command::GetAvailables => cmd_get_availables(&config).await,
        Command::GetLatest => cmd_get_latest(&config).await,
        Command::GetUrls { month } => cmd_get_urls(&config, &month).await,
        Command::Download { month, clean, workers, download_dir } => {
            cmd_download(&config, month, clean, workers, download_dir).await
        }
        Command::Db { action } => cmd_db(&config, action, cancel).await,
        Command::Complete { shell } => cmd_complete(shell),
    }
}

async fn cmd_get_availables(config: &Config) -> anyhow::Result<()> {
    let client = CnpjDataClient::new(&config.cnpj_data_url);
    for period in client.list_available_months_sorted().await? {
        println!("{period}");
    }
    Ok(())
}

async fn cmd_get_latest(config: &Config) -> anyhow::Result<()> {
    let client = CnpjDataClient::new(&config.cnpj_data_url);
    println!("{}", client.latest_month().await?);
    Ok(())
}

async fn cmd_get_urls(config: &Config, month: &str) -> anyhow::Result<()> {
    let client = CnpjDataClient::new(&config.cnpj_data_url);
    let metadata = client.month_metadata(month).await?;
    for meta in metadata.values() {
        println!("{}\t{}", meta.url, meta.size);
    }
    Ok(())
}

async fn cmd_download(
    config: &Config,
    month: Option<String>,
    clean: bool,
    workers: Option<usize>,
    download_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let client = CnpjDataClient::new(&config.cnpj_data_url);
    let month = match month {
        Some(m) => m,
        None => client.latest_month().await?,
    };
    let dir = download_dir.unwrap_or_else(|| config.download_dir.clone());
    let workers = workers.unwrap_or(config.download_max_concurrents);

    let manager = DownloadManager::new(config);
    let count = manager.download_all(&month, &dir, workers, clean).await?;
    println!("downloaded {count} archives for {month}");
    Ok(())
}

fn cmd_complete(shell: Shell) -> anyhow::Result<()> {
    let mut cmd = <Cli as clap::CommandFactory>::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}

async fn cmd_db(config: &Config, action: DbAction, cancel: CancellationToken) -> anyhow::Result<()> {
    match action {
        DbAction::Init(common) => cmd_db_init(config, common).await,
        DbAction::Load(common) => cmd_db_load(config, common, cancel).await,
        DbAction::Index(common) => cmd_db_index(config, common).await,
    }
}

fn resolved_config(config: &Config, common: &DbCommonArgs) -> anyhow::Result<(Engine, Config)> {
    let engine = Engine::from_str(&common.engine)?;
    let mut resolved = config.clone();
    resolved.low_memory = common.low_memory;
    if let Some(db_path) = &common.db_path {
        resolved.sqlite_db_path = db_path.clone();
    }
    if let Some(db_name) = &common.db_name {
        resolved.postgres.database = db_name.clone();
    }
    Ok((engine, resolved))
}

fn make_schema_builder(engine: Engine, config: &Config) -> Box<dyn SchemaBuilder> {
    match engine {
        Engine::Sqlite => Box::new(cnpj_db::sqlite::SqliteSchemaBuilder::new(config.sqlite_db_path.clone())),
        Engine::Postgres => Box::new(cnpj_db::postgres::PostgresSchemaBuilder::new(config.postgres.clone())),
    }
}

/// `MM/YYYY` -> `YYYY-MM`, the folder name archives are downloaded under.
fn month_to_folder(period: &str) -> anyhow::Result<String> {
    let (mm, yyyy) = period.split_once('/').ok_or_else(|| anyhow::anyhow!("{period} is not MM/YYYY"))?;
    Ok(format!("{yyyy}-{mm}"))
}

async fn cmd_db_init(config: &Config, common: DbCommonArgs) -> anyhow::Result<()> {
    let (engine, config) = resolved_config(config, &common)?;
    let builder = make_schema_builder(engine, &config);
    builder.initialize_schema().await?;
    println!("execution finished: engine={engine} schema initialized");
    Ok(())
}

async fn cmd_db_index(config: &Config, common: DbCommonArgs) -> anyhow::Result<()> {
    let (engine, config) = resolved_config(config, &common)?;
    let builder = make_schema_builder(engine, &config);
    builder.create_indexes().await?;
    println!("execution finished: engine={engine} indexes built");
    Ok(())
}

async fn cmd_db_load(config: &Config, common: DbCommonArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let (engine, config) = resolved_config(config, &common)?;
    let config = Arc::new(config);

    let client = CnpjDataClient::new(&config.cnpj_data_url);
    let month = match &common.month {
        Some(m) => m.clone(),
        None => client.latest_month().await?,
    };

    let base_download_dir = common.download_dir.clone().unwrap_or_else(|| config.download_dir.clone());
    let archives_dir = base_download_dir.join(month_to_folder(&month)?);

    if !common.skip_validation {
        let manager = DownloadManager::new(config.as_ref());
        let report = manager.validate(&month, &base_download_dir).await?;
        if !report.is_ok() {
            for name in &report.missing {
                tracing::error!(file = %name, "missing locally");
            }
            for name in &report.extra {
                tracing::warn!(file = %name, "present locally but not on the remote");
            }
            for (name, local, remote) in &report.size_mismatch {
                tracing::error!(file = %name, local, remote, "size mismatch");
            }
            anyhow::bail!(
                "local archive set for {month} does not match the remote set; rerun with --skip-validation to override"
            );
        }
    }

    let builder = make_schema_builder(engine, &config);
    builder.initialize_schema().await?;

    let total_estimate = cnpj_download::estimate_total_rows(&archives_dir).unwrap_or(0);
    let progress = SharedProgress::new(total_estimate, config.debug_log);

    let (tx, rx) = tokio::sync::mpsc::channel(config.queue_size);

    let consumer_count = match engine {
        Engine::Sqlite => 1,
        Engine::Postgres => config.worker_threads,
    };
    let parallel_producer = common.parallel && matches!(engine, Engine::Postgres);
    let mut producer = ArchiveProducer::new(archives_dir, config.clone(), parallel_producer, consumer_count);

    let producer_cancel = cancel.clone();
    let producer_handle = tokio::spawn(async move { producer.run(tx, producer_cancel).await });

    let stats = match engine {
        Engine::Sqlite => {
            let mut loader =
                cnpj_db::sqlite::SqliteLoader::new(config.sqlite_db_path.clone(), progress.clone(), config.queue_size);
            loader.run(rx, cancel.clone()).await?
        }
        Engine::Postgres => {
            let mut loader = cnpj_db::postgres::PostgresLoader::new(
                config.postgres.clone(),
                config.worker_threads,
                progress.clone(),
                config.queue_size,
            );
            loader.run(rx, cancel.clone()).await?
        }
    };

    producer_handle.await.map_err(|e| anyhow::anyhow!("producer task panicked: {e}"))??;
    progress.finish("load complete");
    tracing::info!(rows = stats.total(), "rows loaded");

    builder.patch_data().await?;
    builder.enable_foreign_keys().await?;
    if !common.skip_index {
        builder.create_indexes().await?;
    }

    println!("execution finished: engine={engine} month={month}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_to_folder_converts_mm_yyyy_to_yyyy_mm() {
        assert_eq!(month_to_folder("07/2026").unwrap(), "2026-07");
        assert!(month_to_folder("garbage").is_err());
    }
}
