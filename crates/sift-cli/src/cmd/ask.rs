use anyhow::{Context, Result};
use clap::Args;
use sift_core::config::SiftConfig;
use sift_core::model::{ConversationTurn, PipelineResult};
use sift_core::ratelimit::{RateLimiter, SystemClock};
use sift_pipeline::http::{HttpEmbedder, HttpGenerator, HttpReranker, HttpRetriever};
use sift_pipeline::{Pipeline, Services};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::output::{OutputMode, PrettyWriter, emit};

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question to answer.
    pub question: String,

    /// Content scope (collection) to answer from.
    #[arg(short, long)]
    pub scope: String,

    /// Number of sources to keep.
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Weight of the lexical signal in fusion, 0.0 to 1.0.
    #[arg(long)]
    pub lexical_weight: Option<f64>,

    /// JSON file with prior turns: `[{"role": "user", "content": "..."}]`.
    #[arg(long)]
    pub history: Option<PathBuf>,
}

/// Wire the HTTP clients described by `config` into a pipeline.
pub fn build_pipeline(config: SiftConfig) -> Pipeline {
    let services_config = &config.services;
    let limiter = Arc::new(RateLimiter::new(
        Arc::new(SystemClock::new()),
        Duration::from_millis(services_config.min_generation_interval_ms),
        Duration::from_secs(services_config.rate_limit_cooldown_secs),
    ));
    let services = Services {
        embedder: Arc::new(HttpEmbedder::from_config(services_config)),
        retriever: Arc::new(HttpRetriever::from_config(services_config)),
        reranker: Arc::new(HttpReranker::from_config(services_config)),
        generator: Arc::new(
            HttpGenerator::from_config(services_config, limiter)
                .with_schema_support(config.verification.schema_mode),
        ),
    };
    Pipeline::new(config, services)
}

fn load_history(path: &Path) -> Result<Vec<ConversationTurn>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse history file {}", path.display()))
}

/// Answer one question. Returns whether the run ended in a user-visible failure.
pub fn run_ask(args: &AskArgs, config: SiftConfig, output: OutputMode) -> Result<bool> {
    let mut query = config.query(args.question.clone(), args.scope.clone());
    if let Some(top_k) = args.top_k {
        query = query.with_top_k(top_k);
    }
    if let Some(weight) = args.lexical_weight {
        query = query.with_lexical_weight(weight);
    }
    if let Some(path) = &args.history {
        query = query.with_history(load_history(path)?);
    }

    let pipeline = build_pipeline(config);
    let result = pipeline.answer_query(&query);
    info!(
        sources = result.sources.len(),
        failure = ?result.diagnostics.failure,
        "ask finished"
    );

    emit(output, &result, render_text, render_pretty)?;
    Ok(result.is_failure())
}

fn render_text(result: &PipelineResult, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}", result.answer)?;
    for (n, source) in result.sources.iter().enumerate() {
        writeln!(w, "[{}] {}", n + 1, source.source())?;
    }
    Ok(())
}

fn render_pretty(result: &PipelineResult, w: &mut PrettyWriter<'_>) -> io::Result<()> {
    w.section("Answer")?;
    w.line(&result.answer)?;
    w.blank()?;

    if !result.sources.is_empty() {
        w.section("Sources")?;
        for (n, source) in result.sources.iter().enumerate() {
            let relevance = source
                .relevance_score
                .map_or_else(|| "-".to_string(), |s| format!("{s:.1}"));
            w.line(format_args!(
                "[{}] {} (relevance {relevance})",
                n + 1,
                source.source()
            ))?;
        }
        w.blank()?;
    }

    let diag = &result.diagnostics;
    w.section("Diagnostics")?;
    if let Some(action) = diag.action {
        w.field("action", action)?;
    }
    if let Some(confidence) = diag.confidence {
        w.field("confidence", format_args!("{confidence:.2}"))?;
    }
    if let Some(correction) = &result.correction {
        w.field("verified", format!("{:?}", correction.status).to_lowercase())?;
        for issue in &correction.issues {
            w.field("issue", issue)?;
        }
    }
    if diag.lexical_degraded {
        w.field("lexical", "unavailable")?;
    }
    if let Some(failure) = diag.failure {
        w.field("failure", format_args!("{} {}", failure.code(), failure.message()))?;
    }
    w.rule()
}
