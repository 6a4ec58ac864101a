//! Batch categorization of episodes through an LLM.
//!
//! One request covers a whole batch so the unique-category ceiling can be
//! stated once for the entire set; per-episode calls could not enforce it.
//! Calls go through a sliding-window rate limiter and a session quota
//! breaker, and every failure mode degrades to "episodes stay pending".

pub mod gemini;
pub mod throttle;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::database::{CategoryStatus, Episode};
use throttle::{QuotaBreaker, RateLimiter};

/// Descriptions are clipped before prompt inclusion so one long episode
/// cannot blow up the request size.
const MAX_DESCRIPTION_CHARS: usize = 500;
/// Hard cap on the length of a stored category name.
const MAX_CATEGORY_CHARS: usize = 50;

/// Text-generation seam for the categorization service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Error)]
pub enum ModelError {
    /// The service's usage allowance is depleted for the session.
    #[error("quota exhausted")]
    QuotaExhausted,

    #[error("{0}")]
    Request(String),
}

/// Assigns categories to batches of episodes.
///
/// Two variants exist: [`BatchCategorizer`] wrapping the real service, and
/// [`NoopCategorizer`] for runs without credentials. Orchestrators are
/// written against this trait, so "categorization disabled" is an injected
/// variant rather than a flag checked at every call site.
#[async_trait]
pub trait Categorizer: Send {
    /// Classify a batch, returning a status per episode id.
    ///
    /// Never fails: any service problem yields an empty (or partial)
    /// mapping, and episodes absent from it keep their pending state to be
    /// retried on a later run or backfill pass.
    async fn categorize_batch(
        &mut self,
        episodes: &[Episode],
        existing_categories: &[String],
    ) -> HashMap<String, CategoryStatus>;

    /// False when categorization is not configured for this run.
    fn is_enabled(&self) -> bool {
        true
    }

    /// True once the service reported quota exhaustion this run.
    fn quota_exhausted(&self) -> bool {
        false
    }
}

/// Injected when no API key is configured or `--no-llm` was passed.
pub struct NoopCategorizer;

#[async_trait]
impl Categorizer for NoopCategorizer {
    async fn categorize_batch(
        &mut self,
        _episodes: &[Episode],
        _existing_categories: &[String],
    ) -> HashMap<String, CategoryStatus> {
        HashMap::new()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// The real categorizer: one model call per batch, guarded by the rate
/// limiter and the quota breaker. Owns both pieces of throttling state so
/// independent instances (and tests) never share them.
pub struct BatchCategorizer {
    model: Box<dyn LanguageModel>,
    limiter: RateLimiter,
    breaker: QuotaBreaker,
    max_categories: usize,
}

impl BatchCategorizer {
    pub fn new(model: Box<dyn LanguageModel>, rpm_limit: usize, max_categories: usize) -> Self {
        Self {
            model,
            limiter: RateLimiter::new(rpm_limit),
            breaker: QuotaBreaker::default(),
            max_categories,
        }
    }
}

#[async_trait]
impl Categorizer for BatchCategorizer {
    async fn categorize_batch(
        &mut self,
        episodes: &[Episode],
        existing_categories: &[String],
    ) -> HashMap<String, CategoryStatus> {
        if episodes.is_empty() || self.breaker.is_tripped() {
            return HashMap::new();
        }

        let prompt = build_prompt(episodes, existing_categories, self.max_categories);

        self.limiter.acquire().await;
        let response = match self.model.generate(&prompt).await {
            Ok(text) => text,
            Err(ModelError::QuotaExhausted) => {
                self.breaker.trip();
                return HashMap::new();
            }
            Err(e) => {
                log::warn!("Categorization call failed: {}", e);
                return HashMap::new();
            }
        };

        let parsed = match extract_json_object(&response) {
            Some(value) => value,
            None => {
                log::warn!(
                    "Unparseable categorization response, batch left uncategorized. Raw: {}",
                    response
                );
                return HashMap::new();
            }
        };

        merge_assignments(episodes, &parsed, self.max_categories)
    }

    fn quota_exhausted(&self) -> bool {
        self.breaker.is_tripped()
    }
}

// ============================================================================
// Prompt construction
// ============================================================================

/// How many new category names the service may still introduce.
fn remaining_budget(max_categories: usize, existing: usize) -> usize {
    max_categories.saturating_sub(existing)
}

fn build_prompt(episodes: &[Episode], existing: &[String], max_categories: usize) -> String {
    let mut listing = String::new();
    for ep in episodes {
        listing.push_str(&format!(
            "- id: {}\n  podcast: {}\n  title: {}\n  description: {}\n",
            ep.id,
            ep.show_name,
            ep.title,
            truncate_chars(&ep.description, MAX_DESCRIPTION_CHARS),
        ));
    }

    let guidance = if existing.is_empty() {
        "There are no categories yet: start from scratch.".to_string()
    } else {
        let budget = remaining_budget(max_categories, existing.len());
        let budget_line = if budget == 0 {
            "The category budget is used up: do not invent any new category; \
             pick the closest existing one for every episode."
                .to_string()
        } else {
            format!(
                "You may introduce at most {} new categories beyond that list, \
                 and only when no existing one fits well.",
                budget
            )
        };
        format!(
            "These categories already exist: {}.\n\
             Reuse one of them whenever it describes the episode.\n{}",
            existing.join(", "),
            budget_line
        )
    };

    format!(
        "Analyze the podcast episodes below and assign each one the most \
         specific and appropriate topic category.\n\n\
         EPISODES:\n{listing}\n{guidance}\n\n\
         Rules:\n\
         1. Assign exactly one category per episode.\n\
         2. Use at most {max_categories} unique categories across the entire answer.\n\
         3. Categories must be specific and descriptive, 3-4 words maximum.\n\
         4. Avoid catch-alls like \"Other\" or \"General\".\n\n\
         Respond ONLY with a JSON object mapping each episode id to its \
         category name. No markdown, no explanations, no other text."
    )
}

/// Char-boundary-safe prefix of at most `max` characters.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ============================================================================
// Response parsing and merge
// ============================================================================

/// Extract a JSON object from an LLM response (handles markdown code blocks)
fn extract_json_object(response: &str) -> Option<serde_json::Value> {
    let trimmed = response.trim();

    // Try direct parse first
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(json);
    }

    // Try to extract from markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after_marker = &trimmed[start + 7..];
        if let Some(end) = after_marker.find("```") {
            let json_str = &after_marker[..end].trim();
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(json_str) {
                return Some(json);
            }
        }
    }

    // Try to find a JSON object embedded in surrounding text
    if let Some(start) = trimmed.find('{') {
        // Find matching closing brace
        let mut depth = 0;
        let mut end = start;
        for (i, c) in trimmed[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if end > start {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&trimmed[start..end]) {
                return Some(json);
            }
        }
    }

    None
}

/// Fold the parsed response into per-episode statuses. Only ids from the
/// input batch are honored; an entry with an unusable value becomes
/// `Failed`, a missing entry leaves the episode pending.
fn merge_assignments(
    episodes: &[Episode],
    parsed: &serde_json::Value,
    max_categories: usize,
) -> HashMap<String, CategoryStatus> {
    let obj = match parsed.as_object() {
        Some(obj) => obj,
        None => {
            log::warn!("Categorization response was valid JSON but not an object");
            return HashMap::new();
        }
    };

    let mut assignments = HashMap::new();
    for ep in episodes {
        let raw = match obj.get(&ep.id) {
            Some(value) => value,
            None => continue,
        };
        let status = match normalize_category(raw) {
            Some(name) => CategoryStatus::Categorized(name),
            None => {
                log::warn!("Unusable category value for episode {}: {}", ep.id, raw);
                CategoryStatus::Failed
            }
        };
        assignments.insert(ep.id.clone(), status);
    }

    // The ceiling is enforced in the prompt; here we only flag violations.
    let unique: HashSet<&str> = assignments
        .values()
        .filter_map(|s| match s {
            CategoryStatus::Categorized(name) => Some(name.as_str()),
            _ => None,
        })
        .collect();
    if unique.len() > max_categories {
        log::warn!(
            "Response used {} unique categories, above the ceiling of {}",
            unique.len(),
            max_categories
        );
    }

    assignments
}

/// Trim and validate one returned category name. `None` means the value is
/// unusable and the episode should be marked as failed.
fn normalize_category(value: &serde_json::Value) -> Option<String> {
    let raw = value.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    if matches!(
        raw.to_lowercase().as_str(),
        "error" | "unknown" | "none" | "n/a"
    ) {
        return None;
    }
    Some(truncate_chars(raw, MAX_CATEGORY_CHARS).trim_end().to_string())
}
