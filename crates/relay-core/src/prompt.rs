//! Prompt Assembly
//!
//! Builds `system prompt + context block + user input` under a token
//! budget. Only the context block is ever shortened, oldest lines first.
//!
//! Token counts use a character heuristic: 1 token ≈ 4 characters, rounded
//! up. It is provider-agnostic and stable, which is what budgeting and
//! client-side counters need.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::memory::MemoryManager;

const SECTION_SEPARATOR: &str = "\n\n";
const TRUNCATION_MARKER: &str = "[earlier conversation truncated]\n";

/// Estimate the token count for a string. Rounds up.
pub fn estimate_token_count(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// A fully assembled prompt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub system_prompt: String,
    pub context_block: String,
    pub user_input: String,
    pub max_tokens: usize,
}

impl PromptRequest {
    /// Non-empty sections joined by blank lines
    pub fn full_text(&self) -> String {
        join_sections(&[&self.system_prompt, &self.context_block, &self.user_input])
    }

    /// Context and input only, for providers that take the system prompt separately
    pub fn body_text(&self) -> String {
        join_sections(&[&self.context_block, &self.user_input])
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_token_count(&self.full_text())
    }
}

fn join_sections(sections: &[&str]) -> String {
    sections
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}

pub struct PromptManager {
    memory: Arc<MemoryManager>,
}

impl PromptManager {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }

    /// Assemble a prompt for `session_id` that fits in `max_tokens`
    pub async fn build_prompt(
        &self,
        session_id: &str,
        user_input: &str,
        system_prompt: &str,
        max_tokens: usize,
    ) -> Result<PromptRequest> {
        let context = self.memory.history_block(session_id).await.unwrap_or_default();
        fit_prompt(system_prompt, &context, user_input, max_tokens)
    }
}

/// Fit the three sections into `max_tokens`, shortening only the context
pub fn fit_prompt(
    system_prompt: &str,
    context: &str,
    user_input: &str,
    max_tokens: usize,
) -> Result<PromptRequest> {
    let fixed = join_sections(&[system_prompt, user_input]);
    let fixed_tokens = estimate_token_count(&fixed);
    if fixed_tokens > max_tokens {
        return Err(AgentError::ContextWindowExceeded {
            token_count: fixed_tokens,
            max_tokens,
        });
    }

    // Sections are estimated separately; the sum never undercounts the joined text.
    let separator_tokens = estimate_token_count(SECTION_SEPARATOR);
    let reserved = estimate_token_count(system_prompt)
        + estimate_token_count(user_input)
        + 2 * separator_tokens;
    let context_budget = max_tokens.saturating_sub(reserved);

    let context_block = truncate_front(context, context_budget);
    if context_block.len() < context.len() {
        tracing::debug!(
            original_tokens = estimate_token_count(context),
            budget = context_budget,
            "Truncated context block"
        );
    }

    Ok(PromptRequest {
        system_prompt: system_prompt.to_string(),
        context_block,
        user_input: user_input.to_string(),
        max_tokens,
    })
}

/// Keep the newest part of `text` within `budget` tokens, cut at a line start
fn truncate_front(text: &str, budget: usize) -> String {
    if estimate_token_count(text) <= budget {
        return text.to_string();
    }

    let marker_tokens = estimate_token_count(TRUNCATION_MARKER);
    if budget <= marker_tokens {
        return String::new();
    }

    let keep_chars = (budget - marker_tokens) * 4;
    let total_chars = text.chars().count();
    let start = text
        .char_indices()
        .nth(total_chars.saturating_sub(keep_chars))
        .map_or(text.len(), |(i, _)| i);
    let tail = &text[start..];

    // Drop the partial first line unless that would leave nothing
    let tail = match tail.find('\n') {
        Some(i) if i + 1 < tail.len() => &tail[i + 1..],
        _ => tail,
    };

    if tail.trim().is_empty() {
        return String::new();
    }
    format!("{TRUNCATION_MARKER}{tail}")
}
