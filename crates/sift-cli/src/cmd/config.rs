use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use sift_core::collection::collection_name;
use sift_core::config::SiftConfig;
use std::path::{Path, PathBuf};

use crate::output::{OutputMode, emit};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Print the collection name a scope resolves to
    Collection {
        /// Scope name as passed to `ask --scope`
        scope: String,
    },
}

#[derive(Serialize)]
struct ShownConfig<'a> {
    source: Option<&'a Path>,
    config: &'a SiftConfig,
}

#[derive(Serialize)]
struct ShownCollection<'a> {
    scope: &'a str,
    collection: String,
}

pub fn run_config(
    args: &ConfigArgs,
    config: &SiftConfig,
    source: Option<&PathBuf>,
    output: OutputMode,
) -> Result<()> {
    match &args.command {
        ConfigCommand::Show => run_show(config, source.map(PathBuf::as_path), output),
        ConfigCommand::Collection { scope } => {
            let shown = ShownCollection {
                scope,
                collection: collection_name(scope),
            };
            emit(
                output,
                &shown,
                |s, w| writeln!(w, "{}", s.collection),
                |s, w| {
                    w.field("scope", s.scope)?;
                    w.field("collection", &s.collection)
                },
            )
        }
    }
}

fn run_show(config: &SiftConfig, source: Option<&Path>, output: OutputMode) -> Result<()> {
    let shown = ShownConfig { source, config };
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    let origin = source.map_or_else(
        || "built-in defaults".to_string(),
        |p| p.display().to_string(),
    );

    emit(
        output,
        &shown,
        |_, w| write!(w, "{rendered}"),
        |_, w| {
            w.section(&format!("Configuration ({origin})"))?;
            w.line(rendered.trim_end())
        },
    )
}
