//! Dynamic content allocation
//!
//! Distributes the per-turn dynamic budget across conversation history,
//! message examples, and retrieved context. Priority, highest first: current
//! input (never truncated), minimum history turns, examples, context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::budget::ContextBudget;
use super::token_counter::TokenCounter;

/// Result of allocating content for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub allocated_input: String,
    pub allocated_history: String,
    pub allocated_examples: String,
    pub allocated_context: String,
    pub input_tokens: usize,
    pub history_tokens: usize,
    pub examples_tokens: usize,
    pub context_tokens: usize,
    pub total_allocated: usize,
}

/// Allocates dynamic content within a [`ContextBudget`].
pub struct ContentAllocator {
    counter: Arc<dyn TokenCounter>,
    min_history_turns: usize,
    max_history_turns: usize,
}

struct Bucket {
    content: String,
    tokens: usize,
}

impl ContentAllocator {
    pub fn new(
        counter: Arc<dyn TokenCounter>,
        min_history_turns: usize,
        max_history_turns: usize,
    ) -> Self {
        Self {
            counter,
            min_history_turns,
            max_history_turns,
        }
    }

    /// Allocate content for one turn.
    ///
    /// `history_turns` are rendered turn strings, oldest first. When the
    /// current input alone exceeds the dynamic budget the allocation degrades
    /// to the unmodified input with every other bucket empty.
    pub fn allocate(
        &self,
        budget: &ContextBudget,
        message_examples: &str,
        vector_context: &str,
        history_turns: &[String],
        current_input: &str,
    ) -> Allocation {
        let input_tokens = self.counter.count_tokens(current_input);
        let dynamic_budget = budget.budget_for_dynamic_content();

        if input_tokens > dynamic_budget {
            warn!(
                "Current input ({} tokens) exceeds dynamic budget ({}); degrading to input-only",
                input_tokens, dynamic_budget
            );
            return Allocation {
                allocated_input: current_input.to_string(),
                allocated_history: String::new(),
                allocated_examples: String::new(),
                allocated_context: String::new(),
                input_tokens,
                history_tokens: 0,
                examples_tokens: 0,
                context_tokens: 0,
                total_allocated: input_tokens,
            };
        }

        let mut remaining = dynamic_budget - input_tokens;

        // History first: 30% of the remainder, but the minimum turn count is
        // kept even when it costs more than the slice.
        let history_slice = (remaining as f64 * 0.3) as usize;
        let history = self.allocate_history(history_turns, history_slice);
        remaining = remaining.saturating_sub(history.tokens);

        let examples_slice = (remaining as f64 * 0.25) as usize;
        let examples = self.allocate_bucket(message_examples, examples_slice);
        remaining = remaining.saturating_sub(examples.tokens);

        let context = self.allocate_bucket(vector_context, remaining);

        let total_allocated = input_tokens + history.tokens + examples.tokens + context.tokens;
        debug!(
            "Context allocation: input={} hist={} ex={} ctx={} (total={}/{})",
            input_tokens,
            history.tokens,
            examples.tokens,
            context.tokens,
            total_allocated,
            budget.available_for_context
        );

        Allocation {
            allocated_input: current_input.to_string(),
            allocated_history: history.content,
            allocated_examples: examples.content,
            allocated_context: context.content,
            input_tokens,
            history_tokens: history.tokens,
            examples_tokens: examples.tokens,
            context_tokens: context.tokens,
            total_allocated,
        }
    }

    /// Fit arbitrary content into a token allotment, truncating at the
    /// nearest preceding newline boundary.
    fn allocate_bucket(&self, content: &str, max_tokens: usize) -> Bucket {
        if max_tokens == 0 || content.is_empty() {
            return Bucket {
                content: String::new(),
                tokens: 0,
            };
        }

        let content_tokens = self.counter.count_tokens(content);
        if content_tokens <= max_tokens {
            return Bucket {
                content: content.to_string(),
                tokens: content_tokens,
            };
        }

        // Character ratio scaled by a 0.9 safety margin, then backed off to
        // the last newline so paragraphs are never cut mid-line.
        let char_ratio = content.len() as f64 / content_tokens.max(1) as f64;
        let target_chars = (max_tokens as f64 * char_ratio * 0.9) as usize;

        let mut end = target_chars.min(content.len());
        while end > 0 && !content.is_char_boundary(end) {
            end -= 1;
        }
        let head = &content[..end];
        let truncated = match head.rfind('\n') {
            Some(idx) => &head[..idx],
            None => head,
        };

        Bucket {
            tokens: self.counter.count_tokens(truncated),
            content: truncated.to_string(),
        }
    }

    /// Select history turns newest-first within the allotment, respecting
    /// the configured minimum and maximum turn counts.
    fn allocate_history(&self, turns: &[String], max_tokens: usize) -> Bucket {
        if turns.is_empty() {
            return Bucket {
                content: String::new(),
                tokens: 0,
            };
        }

        let mut included: Vec<&String> = Vec::new();
        let mut remaining = max_tokens as i64;

        for turn in turns.iter().rev() {
            let turn_tokens = self.counter.count_tokens(turn) as i64;
            if included.len() < self.min_history_turns {
                included.insert(0, turn);
                remaining -= turn_tokens;
            } else if turn_tokens <= remaining && included.len() < self.max_history_turns {
                included.insert(0, turn);
                remaining -= turn_tokens;
            } else {
                break;
            }
        }

        let content: String = included.iter().map(|s| s.as_str()).collect();
        Bucket {
            tokens: self.counter.count_tokens(&content),
            content,
        }
    }
}
