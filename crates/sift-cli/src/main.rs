#![forbid(unsafe_code)]

mod cmd;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use output::OutputMode;
use sift_core::config::{discover_config, load_config};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit status when the pipeline answered with a failure message.
const EXIT_ANSWER_FAILED: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "sift: corrective retrieval-augmented answering",
    long_about = None
)]
struct Cli {
    /// Configuration file (default: ./sift.toml, then the user config dir).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Answer a question from a content scope",
        after_help = "EXAMPLES:\n    # Ask against the HR collection\n    sift ask \"How many vacation days do I get?\" --scope \"HR Policies\"\n\n    # Emit machine-readable output\n    sift ask \"...\" --scope hr --json"
    )]
    Ask(cmd::ask::AskArgs),

    #[command(about = "Inspect configuration")]
    Config(cmd::config::ConfigArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SIFT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "sift=debug,info"
        } else {
            "sift=info,warn"
        })
    });

    let format = env::var("SIFT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    let output = output::resolve_output_mode(cli.format, cli.json);

    let (config, source) = if let Some(path) = &cli.config {
        anyhow::ensure!(path.exists(), "Config file not found: {}", path.display());
        (load_config(path)?, Some(path.clone()))
    } else {
        let cwd = env::current_dir().context("Failed to resolve current directory")?;
        discover_config(&cwd)?
    };
    debug!(source = ?source, "configuration loaded");

    match &cli.command {
        Commands::Ask(args) => {
            let failed = cmd::ask::run_ask(args, config, output)?;
            Ok(if failed {
                ExitCode::from(EXIT_ANSWER_FAILED)
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Config(args) => {
            cmd::config::run_config(args, &config, source.as_ref(), output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
