//! How command results reach stdout.
//!
//! The mode comes from `--format`, then `--json`, then `SIFT_FORMAT`, and
//! finally from whether stdout is a terminal. JSON output serializes the
//! command's result type directly so scripts see the same fields the
//! library returns.

use clap::ValueEnum;
use serde::Serialize;
use std::fmt::Display;
use std::io::{self, IsTerminal, Write};

/// Width of the dashed line under pretty section headings.
const RULE_WIDTH: usize = 72;
/// Column where pretty field values start.
const LABEL_WIDTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Sections and aligned fields for a terminal.
    Pretty,
    /// The answer and one line per source.
    Text,
    /// The full result as pretty-printed JSON.
    Json,
}

impl OutputMode {
    /// Parse a `SIFT_FORMAT` value.
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Pick a mode. Unrecognised `SIFT_FORMAT` values are ignored.
    fn choose(flag: Option<Self>, json: bool, env: Option<&str>, stdout_is_tty: bool) -> Self {
        flag.or(json.then_some(Self::Json))
            .or_else(|| env.and_then(Self::from_env_value))
            .unwrap_or(if stdout_is_tty { Self::Pretty } else { Self::Text })
    }
}

pub fn resolve_output_mode(flag: Option<OutputMode>, json: bool) -> OutputMode {
    let env = std::env::var("SIFT_FORMAT").ok();
    OutputMode::choose(flag, json, env.as_deref(), io::stdout().is_terminal())
}

/// Line-oriented writer for the pretty mode.
pub struct PrettyWriter<'w> {
    out: &'w mut dyn Write,
}

impl<'w> PrettyWriter<'w> {
    #[must_use]
    pub const fn new(out: &'w mut dyn Write) -> Self {
        Self { out }
    }

    /// A heading underlined by a dashed rule.
    pub fn section(&mut self, heading: &str) -> io::Result<()> {
        writeln!(self.out, "{heading}")?;
        self.rule()
    }

    pub fn rule(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", "-".repeat(RULE_WIDTH))
    }

    /// `label:` padded to a fixed column, then the value.
    pub fn field(&mut self, label: &str, value: impl Display) -> io::Result<()> {
        let label = format!("{label}:");
        writeln!(self.out, "{label:<LABEL_WIDTH$} {value}")
    }

    pub fn line(&mut self, text: impl Display) -> io::Result<()> {
        writeln!(self.out, "{text}")
    }

    pub fn blank(&mut self) -> io::Result<()> {
        writeln!(self.out)
    }
}

/// Write `value` to stdout in `mode`. JSON needs no renderer.
pub fn emit<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty: impl FnOnce(&T, &mut PrettyWriter<'_>) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text(value, &mut out)?,
        OutputMode::Pretty => pretty(value, &mut PrettyWriter::new(&mut out))?,
    }
    out.flush()?;
    Ok(())
}
