//! Per-turn context budget calculation
//!
//! Converts the model's context window and the rendered system prompt into
//! the token budget available for dynamic content this turn.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::token_counter::TokenCounter;

/// Token budget for one turn's prompt components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBudget {
    pub total_context: usize,
    pub reserved_for_response: usize,
    pub system_prompt_tokens: usize,
    /// Tokens left after the system prompt and response reservation,
    /// clamped to zero.
    pub available_for_context: usize,
}

impl ContextBudget {
    /// Conservative cap on the current user input's share of the budget.
    pub fn max_user_input_tokens(&self) -> usize {
        (self.available_for_context / 10).min(500)
    }

    /// Budget remaining for history, examples, and retrieved context.
    pub fn budget_for_dynamic_content(&self) -> usize {
        self.available_for_context
            .saturating_sub(self.max_user_input_tokens())
    }
}

/// Computes [`ContextBudget`] values from a context window and system prompt.
pub struct BudgetCalculator {
    context_window: usize,
    reserved_for_response: usize,
    counter: Arc<dyn TokenCounter>,
}

impl BudgetCalculator {
    pub fn new(
        context_window: usize,
        reserved_for_response: usize,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            context_window,
            reserved_for_response,
            counter,
        }
    }

    /// Calculate the available budget given the rendered system prompt.
    ///
    /// When the system prompt plus response reservation exceeds the context
    /// window, the available budget clamps to zero and the turn proceeds in
    /// degraded, input-only mode.
    pub fn calculate(&self, system_prompt: &str) -> ContextBudget {
        let system_tokens = self.counter.count_tokens(system_prompt);
        let used = self.reserved_for_response + system_tokens;

        if used > self.context_window {
            warn!(
                "System prompt ({} tokens) + response buffer ({}) exceeds context window ({})",
                system_tokens, self.reserved_for_response, self.context_window
            );
        }

        ContextBudget {
            total_context: self.context_window,
            reserved_for_response: self.reserved_for_response,
            system_prompt_tokens: system_tokens,
            available_for_context: self.context_window.saturating_sub(used),
        }
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }
}
