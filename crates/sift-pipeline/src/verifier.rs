//! Second generation pass: audit the draft against its context and correct it.
//!
//! The verifier asks the generator for a JSON verdict
//! `{"is_consistent", "issues", "corrected_answer"}`. Only an explicit
//! inconsistency with a usable correction replaces the draft. A verdict that
//! cannot be parsed, or one that flags a problem without a usable fix,
//! yields the fixed "could not be fully verified" message instead of an
//! answer known to be wrong.

use crate::drafter::strip_reasoning;
use serde::Deserialize;
use serde_json::{Value, json};
use sift_core::config::{Language, SiftConfig, VerificationConfig};
use sift_core::error::FailureKind;
use sift_core::model::{CorrectionInfo, Draft, VerificationStatus};
use sift_core::service::{GenerationRequest, Generator};
use tracing::{debug, info, warn};

/// JSON Schema for the verdict object, sent to generators that support it.
#[must_use]
pub fn verdict_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "is_consistent": { "type": "boolean" },
            "issues": { "type": "array", "items": { "type": "string" } },
            "corrected_answer": { "type": "string" }
        },
        "required": ["is_consistent", "issues", "corrected_answer"]
    })
}

/// Verdict as parsed from generator output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifierVerdict {
    pub is_consistent: bool,
    #[serde(default)]
    issues: Issues,
    #[serde(default)]
    pub corrected_answer: Option<String>,
}

impl VerifierVerdict {
    #[must_use]
    pub fn issues(&self) -> Vec<String> {
        match &self.issues {
            Issues::List(list) => list.clone(),
            Issues::One(one) if one.trim().is_empty() => Vec::new(),
            Issues::One(one) => vec![one.clone()],
        }
    }
}

/// Models sometimes return a single string where a list was asked for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum Issues {
    List(Vec<String>),
    One(String),
}

impl Default for Issues {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// What the pipeline returns after verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub status: VerificationStatus,
    /// Final answer text.
    pub answer: String,
    pub issues: Vec<String>,
    /// Recovered failure to report in diagnostics.
    pub failure: Option<FailureKind>,
}

impl VerificationOutcome {
    /// Audit record for the result, given the draft that was verified.
    #[must_use]
    pub fn correction_info(&self, original_answer: &str) -> CorrectionInfo {
        CorrectionInfo {
            original_answer: original_answer.to_string(),
            issues: self.issues.clone(),
            was_corrected: self.status == VerificationStatus::Corrected,
            status: self.status,
        }
    }

    /// The drafts this outcome leaves behind: `draft` carrying the verdict
    /// and, when a correction replaced it, the corrected draft.
    #[must_use]
    pub fn audit(&self, draft: Draft) -> Vec<Draft> {
        match self.status {
            VerificationStatus::Corrected => {
                let initial =
                    draft.audited(false, self.issues.clone(), Some(self.answer.clone()));
                vec![initial, Draft::new(self.answer.clone())]
            }
            VerificationStatus::Fallback => {
                vec![draft.audited(false, self.issues.clone(), None)]
            }
            VerificationStatus::Verified => {
                vec![draft.audited(true, self.issues.clone(), None)]
            }
            VerificationStatus::Skipped | VerificationStatus::Unverified => vec![draft],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verifier {
    config: VerificationConfig,
    language: Language,
    model: String,
    not_found: String,
    unverified: String,
}

impl Verifier {
    #[must_use]
    pub fn new(config: &SiftConfig) -> Self {
        Self {
            config: config.verification,
            language: config.language,
            model: config.services.generation_model.clone(),
            not_found: config.messages.not_found.clone(),
            unverified: config.messages.unverified.clone(),
        }
    }

    /// Whether a draft/context pair is worth a verification call.
    #[must_use]
    pub fn should_verify(&self, draft: &str, context: &str) -> bool {
        self.config.enabled
            && draft.trim() != self.not_found
            && draft.chars().count() >= self.config.min_draft_chars
            && context.chars().count() >= self.config.min_context_chars
    }

    #[must_use]
    pub fn build_prompt(&self, question: &str, context: &str, draft: &str) -> String {
        format!(
            "You are a strict fact-checker. Compare the draft answer with the context.\n\
             Check every figure, date, name and claim in the draft against the context.\n\
             Values stated explicitly in the context always win. Use general knowledge only \
             to catch a logical misreading of the context, never to override it.\n\n\
             Respond with only a JSON object:\n\
             {{\"is_consistent\": true or false, \"issues\": [\"...\"], \"corrected_answer\": \"...\"}}\n\
             If the draft is consistent, use an empty issues list and an empty corrected_answer. \
             Otherwise write the complete corrected answer in {}.\n\n\
             Context:\n{context}\n\n\
             Question: {}\n\n\
             Draft answer:\n{}\n\n\
             JSON:",
            self.language.display_name(),
            question.trim(),
            draft.trim(),
        )
    }

    /// Verify `draft` against `context`. Never fails.
    pub fn verify(
        &self,
        question: &str,
        context: &str,
        draft: &str,
        generator: &dyn Generator,
    ) -> VerificationOutcome {
        if !self.should_verify(draft, context) {
            debug!(
                draft_chars = draft.chars().count(),
                context_chars = context.chars().count(),
                "verification skipped"
            );
            return keep_draft(VerificationStatus::Skipped, draft, None);
        }

        let schema = (self.config.schema_mode && generator.supports_schema()).then(verdict_schema);
        let request = GenerationRequest {
            prompt: self.build_prompt(question, context, draft),
            model: self.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_schema: schema,
        };

        let raw = match generator.generate(&request) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "verification generation failed; returning unverified draft");
                return keep_draft(
                    VerificationStatus::Unverified,
                    draft,
                    Some(FailureKind::VerificationGenerationUnavailable),
                );
            }
        };

        let Some(verdict) = parse_verdict(&raw) else {
            warn!(output_chars = raw.chars().count(), "verifier output is not a verdict");
            return VerificationOutcome {
                status: VerificationStatus::Fallback,
                answer: self.unverified.clone(),
                issues: Vec::new(),
                failure: Some(FailureKind::MalformedVerifierOutput),
            };
        };

        let issues = verdict.issues();
        if verdict.is_consistent {
            info!("draft verified");
            return VerificationOutcome {
                status: VerificationStatus::Verified,
                answer: draft.to_string(),
                issues,
                failure: None,
            };
        }

        let correction = verdict
            .corrected_answer
            .as_deref()
            .map(strip_reasoning)
            .filter(|c| self.is_usable_correction(c));

        match correction {
            Some(answer) => {
                info!(issues = issues.len(), "draft corrected");
                VerificationOutcome {
                    status: VerificationStatus::Corrected,
                    answer,
                    issues,
                    failure: None,
                }
            }
            None => {
                warn!(
                    issues = issues.len(),
                    "inconsistent draft without a usable correction; using fallback"
                );
                VerificationOutcome {
                    status: VerificationStatus::Fallback,
                    answer: self.unverified.clone(),
                    issues,
                    failure: None,
                }
            }
        }
    }

    fn is_usable_correction(&self, correction: &str) -> bool {
        correction.chars().count() >= self.config.min_correction_chars
            && !is_placeholder(correction)
    }
}

fn keep_draft(
    status: VerificationStatus,
    draft: &str,
    failure: Option<FailureKind>,
) -> VerificationOutcome {
    VerificationOutcome {
        status,
        answer: draft.to_string(),
        issues: Vec::new(),
        failure,
    }
}

/// Parse generator output into a verdict.
///
/// Tries the whole (reasoning-stripped) output first, then the first
/// balanced `{…}` object inside it.
#[must_use]
pub fn parse_verdict(raw: &str) -> Option<VerifierVerdict> {
    let text = strip_reasoning(raw);
    serde_json::from_str(&text)
        .ok()
        .or_else(|| extract_json_object(&text).and_then(|obj| serde_json::from_str(obj).ok()))
}

/// First balanced top-level `{…}` in `text`, ignoring braces inside strings.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Template text a model echoes back instead of a real correction.
#[must_use]
pub fn is_placeholder(text: &str) -> bool {
    const PLACEHOLDERS: &[&str] = &[
        "n/a",
        "na",
        "none",
        "null",
        "same",
        "unchanged",
        "no change",
        "no changes",
        "corrected answer",
        "the corrected answer",
    ];

    let trimmed = text.trim();
    if trimmed.chars().all(|c| matches!(c, '.' | '…') || c.is_whitespace()) {
        return true;
    }
    if (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('<') && trimmed.ends_with('>'))
        || (trimmed.starts_with("{{") && trimmed.ends_with("}}"))
    {
        return true;
    }

    let normalized = trimmed
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '…')
        .trim()
        .to_lowercase();
    PLACEHOLDERS.contains(&normalized.as_str())
}
