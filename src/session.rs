//! Chat session orchestration
//!
//! One `ChatSession` owns exactly one conversation: per turn it budgets the
//! context window, retrieves and allocates supporting content, assembles the
//! prompt, governs the model stream, and gates the reply into history.
//! Submitting a new turn while a prior one is streaming is a caller error;
//! the caller gates input until the turn completes.

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::context::{default_counter, BudgetCalculator, ContentAllocator};
use crate::error::Result;
use crate::history::{ConversationHistory, ConversationTurn};
use crate::model::LanguageModel;
use crate::prompt::{ModelFamily, PersonaCard, PersonaContext, PromptAssembler, TurnContent};
use crate::quality::QualityGate;
use crate::retrieval::{KeyEntry, RetrievalOrchestrator, VectorIndex};
use crate::stream::StreamGovernor;

/// How a submitted turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply committed to history (possibly a quality fallback).
    Completed(String),
    /// The turn was cancelled mid-stream; history is unchanged.
    Cancelled,
}

/// Per-turn plumbing handed to `submit_turn`.
///
/// All fields are optional conveniences for interactive callers; the
/// defaults run a turn to completion with no live output.
pub struct TurnHandles {
    /// Receives forwarded fragments as they stream.
    pub fragments: Option<mpsc::UnboundedSender<String>>,
    /// Fires once when the first content is produced (or the stream ends
    /// another way), releasing any waiting indicator.
    pub first_content: Option<oneshot::Sender<()>>,
    /// Cooperative cancellation, checked between fragments.
    pub cancel: CancellationToken,
}

impl Default for TurnHandles {
    fn default() -> Self {
        Self {
            fragments: None,
            first_content: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// A single persona-constrained conversation against one model.
pub struct ChatSession {
    config: SessionConfig,
    assembler: PromptAssembler,
    history: ConversationHistory,
    budget: BudgetCalculator,
    allocator: ContentAllocator,
    orchestrator: RetrievalOrchestrator,
    governor: StreamGovernor,
    gate: QualityGate,
    model: Arc<dyn LanguageModel>,
}

impl ChatSession {
    /// Construct a session. Fails fast on an unknown model family, missing
    /// persona fields, or invalid deny patterns; nothing else is fatal.
    pub fn new(
        config: SessionConfig,
        card: PersonaCard,
        model_family: &str,
        model: Arc<dyn LanguageModel>,
        index: Arc<dyn VectorIndex>,
        keys: Vec<KeyEntry>,
    ) -> Result<Self> {
        let family = ModelFamily::from_str(model_family)?;
        let persona = PersonaContext::from_card(card, &config.user_name)?;

        let counter = default_counter();
        let budget = BudgetCalculator::new(
            config.context_window,
            config.reserved_for_response,
            counter.clone(),
        );
        let allocator = ContentAllocator::new(
            counter,
            config.min_history_turns,
            config.max_history_turns,
        );
        let orchestrator = RetrievalOrchestrator::new(
            index,
            config.retrieval.clone(),
            keys,
            persona.name.clone(),
        )?;
        let governor = StreamGovernor::new(config.stream.clone(), &config.user_name);
        let gate = QualityGate::new(config.quality.clone(), &config.user_name);
        let history = ConversationHistory::new(config.history_capacity);
        let assembler = PromptAssembler::new(persona, family, config.user_name.clone());

        Ok(Self {
            config,
            assembler,
            history,
            budget,
            allocator,
            orchestrator,
            governor,
            gate,
            model,
        })
    }

    /// The stored transcript.
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// The persona's greeting, for callers that display it before the first
    /// turn. Never stored in history by this core.
    pub fn first_message(&self) -> &str {
        &self.assembler.persona().first_message
    }

    /// Process one user message end to end.
    pub async fn submit_turn(
        &mut self,
        message: &str,
        handles: TurnHandles,
    ) -> Result<TurnOutcome> {
        let prompt = self.build_prompt(message).await;
        debug!("Assembled prompt: {} chars", prompt.len());

        let fragments = self.model.submit(&prompt).await;
        let raw = self
            .governor
            .govern(fragments, handles.fragments, handles.first_content, handles.cancel)
            .await;

        let Some(raw) = raw else {
            return Ok(TurnOutcome::Cancelled);
        };

        let cleaned = self.gate.cleanup(&raw);
        let reply = if self.gate.accept(&cleaned, self.history.last_assistant()) {
            cleaned
        } else {
            warn!("Response did not pass the quality gate; storing fallback");
            self.gate.fallback_response().to_string()
        };
        self.history.push(message, reply.clone());
        Ok(TurnOutcome::Completed(reply))
    }

    /// Budget the turn, retrieve and allocate content, and assemble the
    /// prompt. Never fails: every degradation path lands on a usable prompt.
    async fn build_prompt(&self, message: &str) -> String {
        let is_first_turn = self.history.is_empty();
        let persona_examples = if is_first_turn {
            self.assembler.persona().example_dialogue.clone()
        } else {
            String::new()
        };

        let budget = self.budget.calculate(&self.assembler.system_prompt(&persona_examples));
        let turns: Vec<ConversationTurn> = self.history.turns().cloned().collect();
        let rendered_turns = self
            .history
            .rendered_turns(&self.config.user_name, &self.assembler.persona().name);

        let mut vector_context;
        let mut examples = persona_examples;
        let mut history_text = rendered_turns.concat();

        let dynamic_budget = budget.budget_for_dynamic_content();
        if self.config.use_dynamic_context
            && !is_first_turn
            && dynamic_budget >= self.config.dynamic_budget_floor
        {
            let k = self.orchestrator.dynamic_k(dynamic_budget);
            let retrieved = self.orchestrator.retrieve(message, Some(k)).await;
            let allocation = self.allocator.allocate(
                &budget,
                &retrieved.examples,
                &retrieved.context,
                &rendered_turns,
                message,
            );
            vector_context = allocation.allocated_context;
            examples = allocation.allocated_examples;
            history_text = allocation.allocated_history;
        } else {
            if self.config.use_dynamic_context && !is_first_turn {
                warn!(
                    "Dynamic budget ({} tokens) below floor ({}); using static retrieval",
                    dynamic_budget, self.config.dynamic_budget_floor
                );
            }
            let retrieved = self.orchestrator.retrieve(message, None).await;
            vector_context = retrieved.context;
            if !retrieved.examples.is_empty() {
                examples = if examples.is_empty() {
                    retrieved.examples
                } else {
                    format!("{}\n\n{}", examples, retrieved.examples)
                };
            }
            // Nothing retrieved and past the first turn: reuse the card's
            // example dialogue rather than going example-free.
            if examples.is_empty() {
                examples = self.assembler.persona().example_dialogue.clone();
            }
        }

        // Degraded mode: nothing beyond the input fits this turn.
        if budget.available_for_context == 0 {
            vector_context.clear();
            examples.clear();
            history_text.clear();
        }

        self.assembler.assemble(&TurnContent {
            history_text: &history_text,
            history_turns: &turns,
            vector_context: &vector_context,
            message_examples: &examples,
            current_input: message,
            is_first_turn,
        })
    }
}
