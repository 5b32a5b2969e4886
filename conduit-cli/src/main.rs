//! Command-line entry point: lint a pipeline config or run it.
//!
//! Grounded on the teacher's `cmd/src/main.rs`: a `clap` derive enum for
//! subcommands, a `LogLevel` enum driving an `EnvFilter`-based
//! `tracing_subscriber` setup, and `Lint`/`Run` reading one or more config
//! files from disk. The teacher's `Test` subcommand (a fixture-based
//! snapshot test runner) has no counterpart in this specification and is
//! dropped; `Run` races multiple configs the same way via
//! `futures::stream::FuturesOrdered`.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use conduit::config::Config;
use futures::stream::FuturesOrdered;
use futures::StreamExt;
use inline_colorization::{color_green, color_red, color_reset};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conduit", version, about = "Run and lint conduit pipeline configs")]
struct Cli {
    #[command(subcommand)]
    command: ConduitCli,
}

#[derive(Subcommand)]
enum ConduitCli {
    /// Validates one or more pipeline config files without running them.
    Lint(ConfigArgs),
    /// Runs one or more pipeline config files until their inputs are exhausted.
    Run(ConfigArgs),
}

#[derive(Parser)]
struct ConfigArgs {
    /// Path to one or more YAML pipeline config files.
    #[arg(required = true)]
    configs: Vec<PathBuf>,
    /// Log verbosity.
    #[arg(long, value_enum, default_value_t = LogLevel::None)]
    log_level: LogLevel,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Trace,
    Error,
    Info,
    None,
}

impl From<LogLevel> for LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::None => LevelFilter::OFF,
        }
    }
}

fn setup_subscriber(level: LogLevel) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::OFF.into())
        .from_env_lossy()
        .add_directive(format!("conduit={}", LevelFilter::from(level)).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .json()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        ConduitCli::Lint(args) => lint(args).await,
        ConduitCli::Run(args) => run(args).await,
    }
}

async fn read_config(path: &PathBuf) -> Result<Config, conduit::Error> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(conduit::Error::Io)?;
    contents.parse()
}

async fn lint(args: ConfigArgs) {
    setup_subscriber(args.log_level);
    let _ = conduit::modules::register_builtins();

    let mut failures: Vec<String> = Vec::new();
    for path in &args.configs {
        match read_config(path).await {
            Ok(config) => match config.validate().await {
                Ok(_) => println!("{color_green}ok{color_reset}  {}", path.display()),
                Err(e) => failures.push(format!("{}: {e}", path.display())),
            },
            Err(e) => failures.push(format!("{}: {e}", path.display())),
        }
    }

    for failure in &failures {
        println!("{color_red}fail{color_reset} {failure}");
    }
    if !failures.is_empty() {
        process::exit(1);
    }
}

async fn run(args: ConfigArgs) {
    setup_subscriber(args.log_level);
    let _ = conduit::modules::register_builtins();

    let mut pipelines = FuturesOrdered::new();
    for path in args.configs {
        pipelines.push_back(async move {
            let run = async {
                let config = read_config(&path).await?;
                let parsed = config.validate().await?;
                let options = parsed.build().await?;
                let pipeline = conduit::Pipeline::new(options);
                let metrics = pipeline.metrics();
                pipeline.run().await.map(|()| metrics)
            };
            (path, run.await)
        });
    }

    while let Some((path, result)) = pipelines.next().await {
        match result {
            Ok(metrics) => {
                let snap = metrics.snapshot();
                tracing::info!(
                    path = %path.display(),
                    received = snap.received,
                    delivered = snap.delivered,
                    dropped = snap.dropped,
                    errors = snap.errors,
                    "pipeline finished"
                );
            }
            Err(e) => {
                eprintln!("{color_red}pipeline failed: {e}{color_reset}");
                process::exit(1);
            }
        }
    }
}
