//! tabstore CLI
//!
//! Fetches the configured datasets into versioned storage and reads them back.

use clap::{Parser, Subcommand, ValueEnum};
use derive_more::{Display, Error};
use exn::{Exn, OptionExt, ResultExt};
use futures::TryStreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use tabstore_config::{Config, default_config_path};
use tabstore_datastore::{RootStore, Source, Version};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncWriteExt, Stdout};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Display, Error)]
enum AppError {
    #[display("could not load configuration")]
    Config,
    #[display("unknown dataset `{_0}`")]
    UnknownDataset(#[error(not(source))] String),
    #[display("storage operation failed")]
    Store,
    #[display("could not write output")]
    Output,
}

type Result<T> = std::result::Result<T, Exn<AppError>>;

#[derive(Parser)]
#[command(name = "tabstore", version, about = "Versioned storage for fetched tabular datasets")]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "TABSTORE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every dataset and store new snapshots
    Update,
    /// Show freshness of the store and each dataset
    Status,
    /// Write a dataset's content to stdout
    Source {
        dataset: String,
        /// Fetch before reading, even if stored data exists
        #[arg(long)]
        update: bool,
        /// Which snapshot to read for non-incremental datasets
        #[arg(long, value_enum, default_value_t = VersionArg::Newest)]
        snapshot: VersionArg,
    },
    /// List a dataset's snapshots, oldest first
    Snapshots { dataset: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum VersionArg {
    Newest,
    Oldest,
}
impl From<VersionArg> for Version {
    fn from(value: VersionArg) -> Self {
        match value {
            VersionArg::Newest => Version::Newest,
            VersionArg::Oldest => Version::Oldest,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = path
        .or_else(default_config_path)
        .ok_or_raise(|| AppError::Config)?;
    Config::load(&path).or_raise(|| AppError::Config)
}

fn format_time(at: Option<OffsetDateTime>) -> String {
    at.and_then(|at| at.format(&Rfc3339).ok()).unwrap_or_else(|| "never".to_string())
}

async fn update(store: &RootStore) -> Result<ExitCode> {
    let report = store.update().await.or_raise(|| AppError::Store)?;
    for (name, outcome) in &report.outcomes {
        match outcome {
            Ok(fetch) => println!("{name}: {} stored, {} unchanged", fetch.stored(), fetch.unchanged()),
            Err(err) => println!("{name}: failed: {err}"),
        }
    }
    Ok(if report.complete { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn status(store: &RootStore) -> Result<ExitCode> {
    let last_update = store.last_update().await.or_raise(|| AppError::Store)?;
    let last_complete = store.last_complete_update().await.or_raise(|| AppError::Store)?;
    println!("last update: {}", format_time(last_update));
    println!("last complete update: {}", format_time(last_complete));
    for dataset in store.datasets() {
        let last_update = dataset.last_update().await.or_raise(|| AppError::Store)?;
        let count = dataset.snapshots().await.or_raise(|| AppError::Store)?.len();
        println!("{}: {count} snapshots, last update {}", dataset.name(), format_time(last_update));
    }
    Ok(ExitCode::SUCCESS)
}

async fn source(store: &RootStore, name: &str, update: bool, version: Version) -> Result<ExitCode> {
    let dataset = store
        .dataset(name)
        .ok_or_raise(|| AppError::UnknownDataset(name.to_string()))?;
    let mut stdout = tokio::io::stdout();
    match dataset.get_source(update, version).await.or_raise(|| AppError::Store)? {
        Source::Blob { content, .. } => write_out(&mut stdout, &content).await?,
        Source::Snapshots(snapshots) => {
            let mut contents = std::pin::pin!(snapshots.stream());
            while let Some(content) = contents.try_next().await.or_raise(|| AppError::Store)? {
                write_out(&mut stdout, &content).await?;
            }
        },
    }
    stdout.flush().await.or_raise(|| AppError::Output)?;
    Ok(ExitCode::SUCCESS)
}

async fn write_out(stdout: &mut Stdout, content: &[u8]) -> Result<()> {
    stdout.write_all(content).await.or_raise(|| AppError::Output)
}

async fn snapshots(store: &RootStore, name: &str) -> Result<ExitCode> {
    let dataset = store
        .dataset(name)
        .ok_or_raise(|| AppError::UnknownDataset(name.to_string()))?;
    for snapshot in dataset.snapshots().await.or_raise(|| AppError::Store)? {
        println!("{}", snapshot.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config)?;
    let store = RootStore::open(&config).or_raise(|| AppError::Config)?;
    match cli.command {
        Command::Update => update(&store).await,
        Command::Status => status(&store).await,
        Command::Source {
            dataset,
            update,
            snapshot,
        } => source(&store, &dataset, update, snapshot.into()).await,
        Command::Snapshots { dataset } => snapshots(&store, &dataset).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = ?err, "tabstore failed");
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}
