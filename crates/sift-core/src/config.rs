//! Layered configuration loaded from `sift.toml`.
//!
//! Every field has a serde default so a partial file (or no file at all)
//! yields a complete [`SiftConfig`]. Lookup order for [`discover_config`]:
//! `./sift.toml`, then `<config dir>/sift/config.toml`, then defaults.

use crate::error::ConfigError;
use crate::model::{Query, Thresholds};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the working directory.
pub const PROJECT_CONFIG_FILE: &str = "sift.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiftConfig {
    /// Deployment language: answer language and stop-word list.
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub drafting: DraftingConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub messages: Messages,
}

impl SiftConfig {
    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [
            ("embed_url", &self.services.embed_url),
            ("retrieval_url", &self.services.retrieval_url),
            ("rerank_url", &self.services.rerank_url),
            ("generate_url", &self.services.generate_url),
        ] {
            if url.trim().is_empty() {
                return Err(ConfigError::invalid("services", format!("{name} is empty")));
            }
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::invalid("retrieval", "top_k must be at least 1"));
        }
        if self.retrieval.pool_factor == 0 {
            return Err(ConfigError::invalid(
                "retrieval",
                "pool_factor must be at least 1",
            ));
        }

        let weight = self.fusion.lexical_weight;
        if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
            return Err(ConfigError::invalid(
                "fusion",
                format!("lexical_weight {weight} is outside [0, 1]"),
            ));
        }

        self.evaluation
            .thresholds
            .validate()
            .map_err(|e| ConfigError::invalid("evaluation", e.to_string()))?;
        if !(0.0..=1.0).contains(&self.evaluation.fail_open_confidence) {
            return Err(ConfigError::invalid(
                "evaluation",
                "fail_open_confidence must be in [0, 1]",
            ));
        }

        if self.drafting.context_char_budget == 0 {
            return Err(ConfigError::invalid(
                "drafting",
                "context_char_budget must be positive",
            ));
        }

        Ok(())
    }

    /// A query for `text` carrying this config's request defaults.
    #[must_use]
    pub fn query(&self, text: impl Into<String>, scope: impl Into<String>) -> Query {
        Query::new(text, scope)
            .with_top_k(self.retrieval.top_k)
            .with_lexical_weight(self.fusion.lexical_weight)
            .with_thresholds(self.evaluation.thresholds)
    }
}

/// Deployment language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    English,
    Spanish,
}

impl Language {
    /// Name used in prompt instructions.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Spanish => "Spanish",
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_embed_url")]
    pub embed_url: String,
    #[serde(default = "default_retrieval_url")]
    pub retrieval_url: String,
    #[serde(default = "default_rerank_url")]
    pub rerank_url: String,
    #[serde(default = "default_generate_url")]
    pub generate_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Minimum spacing between generation calls, in milliseconds.
    #[serde(default)]
    pub min_generation_interval_ms: u64,
    /// Cooldown applied after a 429 that carries no `Retry-After`.
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            embed_url: default_embed_url(),
            retrieval_url: default_retrieval_url(),
            rerank_url: default_rerank_url(),
            generate_url: default_generate_url(),
            embedding_model: default_embedding_model(),
            generation_model: default_generation_model(),
            timeouts: TimeoutConfig::default(),
            min_generation_interval_ms: 0,
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
        }
    }
}

/// Per-service call timeouts in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_secs: u64,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub retrieval_secs: u64,
    #[serde(default = "default_rerank_timeout_secs")]
    pub rerank_secs: u64,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_secs: u64,
}

impl TimeoutConfig {
    #[must_use]
    pub const fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    #[must_use]
    pub const fn retrieval(&self) -> Duration {
        Duration::from_secs(self.retrieval_secs)
    }

    #[must_use]
    pub const fn rerank(&self) -> Duration {
        Duration::from_secs(self.rerank_secs)
    }

    #[must_use]
    pub const fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_secs: default_embedding_timeout_secs(),
            retrieval_secs: default_retrieval_timeout_secs(),
            rerank_secs: default_rerank_timeout_secs(),
            generation_secs: default_generation_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Sources kept for drafting.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Retrieval and rerank pool is `top_k * pool_factor`.
    #[serde(default = "default_pool_factor")]
    pub pool_factor: usize,
}

impl RetrievalConfig {
    /// Candidates fetched and evaluated for a request wanting `top_k` sources.
    ///
    /// Never smaller than `top_k`.
    #[must_use]
    pub const fn pool_size(&self, top_k: usize) -> usize {
        let pool = top_k.saturating_mul(self.pool_factor);
        if pool < top_k { top_k } else { pool }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            pool_factor: default_pool_factor(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    /// When false, fusion passes the semantic ranking through.
    #[serde(default = "default_true")]
    pub lexical_enabled: bool,
    #[serde(default = "default_true")]
    pub stop_words: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            lexical_weight: default_lexical_weight(),
            lexical_enabled: true,
            stop_words: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    /// On cross-encoder failure, accept the unfiltered set instead of rejecting.
    #[serde(default = "default_true")]
    pub fail_open: bool,
    #[serde(default = "default_fail_open_confidence")]
    pub fail_open_confidence: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            fail_open: true,
            fail_open_confidence: default_fail_open_confidence(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DraftingConfig {
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_draft_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for DraftingConfig {
    fn default() -> Self {
        Self {
            context_char_budget: default_context_char_budget(),
            history_turns: default_history_turns(),
            temperature: default_draft_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Request schema-constrained output when the generator supports it.
    #[serde(default = "default_true")]
    pub schema_mode: bool,
    #[serde(default = "default_min_draft_chars")]
    pub min_draft_chars: usize,
    #[serde(default = "default_min_context_chars")]
    pub min_context_chars: usize,
    #[serde(default = "default_min_correction_chars")]
    pub min_correction_chars: usize,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            schema_mode: true,
            min_draft_chars: default_min_draft_chars(),
            min_context_chars: default_min_context_chars(),
            min_correction_chars: default_min_correction_chars(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

/// Fixed user-facing texts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Messages {
    /// Answer for a rejected (out-of-scope) question.
    #[serde(default = "default_out_of_scope")]
    pub out_of_scope: String,
    /// Answer when nothing survived for drafting.
    #[serde(default = "default_no_information")]
    pub no_information: String,
    /// Sentinel the model must emit when context is insufficient.
    #[serde(default = "default_not_found")]
    pub not_found: String,
    /// Safe fallback when a flagged draft has no usable correction.
    #[serde(default = "default_unverified")]
    pub unverified: String,
    #[serde(default = "default_retrieval_unavailable")]
    pub retrieval_unavailable: String,
    #[serde(default = "default_generation_unavailable")]
    pub generation_unavailable: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            out_of_scope: default_out_of_scope(),
            no_information: default_no_information(),
            not_found: default_not_found(),
            unverified: default_unverified(),
            retrieval_unavailable: default_retrieval_unavailable(),
            generation_unavailable: default_generation_unavailable(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load config from `path`; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or
/// validated.
pub fn load_config(path: &Path) -> Result<SiftConfig> {
    if !path.exists() {
        return Ok(SiftConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<SiftConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    Ok(config)
}

/// Find and load the first config file in the lookup order.
///
/// Returns the loaded config and the path it came from (`None` for defaults).
///
/// # Errors
///
/// Propagates [`load_config`] errors for the file that was found.
pub fn discover_config(start: &Path) -> Result<(SiftConfig, Option<PathBuf>)> {
    let mut candidates = vec![start.join(PROJECT_CONFIG_FILE)];
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join("sift/config.toml"));
    }

    for path in candidates {
        if path.exists() {
            let config = load_config(&path)?;
            tracing::debug!(path = %path.display(), "loaded sift config");
            return Ok((config, Some(path)));
        }
    }

    Ok((SiftConfig::default(), None))
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}

fn default_embed_url() -> String {
    "http://localhost:11434/api/embed".to_string()
}

fn default_retrieval_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_rerank_url() -> String {
    "http://localhost:8080/rerank".to_string()
}

fn default_generate_url() -> String {
    "http://localhost:11434/api/generate".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_generation_model() -> String {
    "llama3.1:8b".to_string()
}

const fn default_rate_limit_cooldown_secs() -> u64 {
    30
}

const fn default_embedding_timeout_secs() -> u64 {
    30
}

const fn default_retrieval_timeout_secs() -> u64 {
    30
}

const fn default_rerank_timeout_secs() -> u64 {
    45
}

const fn default_generation_timeout_secs() -> u64 {
    300
}

const fn default_top_k() -> usize {
    Query::DEFAULT_TOP_K
}

const fn default_pool_factor() -> usize {
    3
}

const fn default_lexical_weight() -> f64 {
    Query::DEFAULT_LEXICAL_WEIGHT
}

const fn default_fail_open_confidence() -> f64 {
    0.5
}

const fn default_context_char_budget() -> usize {
    12_000
}

const fn default_history_turns() -> usize {
    6
}

const fn default_draft_temperature() -> f32 {
    0.1
}

const fn default_max_tokens() -> u32 {
    1024
}

const fn default_min_draft_chars() -> usize {
    40
}

const fn default_min_context_chars() -> usize {
    200
}

const fn default_min_correction_chars() -> usize {
    20
}

fn default_out_of_scope() -> String {
    "I'm sorry, that question is outside the scope of the information available to me.".to_string()
}

fn default_no_information() -> String {
    "I could not find any information about that in the available documents.".to_string()
}

fn default_not_found() -> String {
    "The requested information was not found in the provided documents.".to_string()
}

fn default_unverified() -> String {
    "I found related information, but the answer could not be fully verified against the documents. Please consult the sources directly.".to_string()
}

fn default_retrieval_unavailable() -> String {
    "I'm sorry, the document search is unavailable right now. Please try again later.".to_string()
}

fn default_generation_unavailable() -> String {
    "I'm sorry, I could not generate an answer right now. Please try again later.".to_string()
}
