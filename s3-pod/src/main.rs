use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use s3_pod::commands::{parse_attribute, Pod};
use s3_pod::config::{AppConfig, Overrides};
use s3_pod::metrics::{self, PrometheusMetrics};

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Path to the TOML config file")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[arg(
        long,
        global = true,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    log_level: String,

    #[arg(long, global = true, help = "Print collected metrics to stderr when done")]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the bucket and root container
    Init,

    /// List the children of a container
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show the metadata of a resource
    Stat { path: String },

    /// Write a document to stdout
    Cat { path: String },

    /// Upload a local file as a document
    Put {
        /// Local file
        file: PathBuf,
        /// Target path, a trailing / keeps the file name
        path: String,
        #[arg(long, help = "Content type, guessed from the file extension if omitted")]
        content_type: Option<String>,
    },

    /// Create a container
    Mkdir {
        path: String,
        #[arg(short, long, help = "Create missing parent containers")]
        parents: bool,
    },

    /// Attach metadata to a resource
    Meta {
        path: String,
        #[arg(long = "attr", value_parser = parse_attribute, help = "predicate=value, <value> for an IRI")]
        attributes: Vec<(String, String)>,
        #[arg(long, help = "Drop previously attached metadata")]
        replace: bool,
    },

    /// Delete a resource and its metadata
    Rm { path: String },
}

fn setup_tracing(log_level: &str) {
    // Try to use RUST_LOG env var first, fall back to CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    // stdout carries document data
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    run(cli)
}

#[tokio::main]
async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);
    debug!(bucket = %config.storage.bucket, base_url = %config.storage.base_url, "opening pod");

    let pod = Pod::connect(config, PrometheusMetrics::shared()).await?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let res = match cli.command {
        Command::Init => pod.init(&mut out).await,
        Command::Ls { path } => pod.ls(&path, &mut out).await,
        Command::Stat { path } => pod.stat(&path, &mut out).await,
        Command::Cat { path } => pod.cat(&path, &mut out).await,
        Command::Put {
            file,
            path,
            content_type,
        } => pod.put(&file, &path, content_type.as_deref(), &mut out).await,
        Command::Mkdir { path, parents } => pod.mkdir(&path, parents, &mut out).await,
        Command::Meta {
            path,
            attributes,
            replace,
        } => pod.meta(&path, &attributes, replace, &mut out).await,
        Command::Rm { path } => pod.rm(&path, &mut out).await,
    };

    if cli.metrics {
        eprint!("{}", metrics::gather()?);
    }
    res
}
