//! Prompt assembly strategies
//!
//! Two strategies, selected by model family: a templated single-shot fill,
//! and chained instruction blocks for families that want every turn
//! individually delimited. Both substitute persona placeholders up front and
//! never emit the BOS wrapper the tokenizer adds itself.

use super::format::{FormatTokens, ModelFamily};
use super::persona::PersonaContext;
use crate::history::ConversationTurn;

/// Preamble that frames retrieved context inside the prompt.
const CONTEXT_PREAMBLE: &str = "[The following background information is relevant to the \
current topic. Use it to inform your response but do not quote it directly.]";

/// Per-turn content feeding one assembled prompt.
#[derive(Debug, Clone, Default)]
pub struct TurnContent<'a> {
    /// Rendered history text, used by the templated strategy.
    pub history_text: &'a str,
    /// History turn pairs, used by the chained-block strategy.
    pub history_turns: &'a [ConversationTurn],
    /// Allocated retrieved context.
    pub vector_context: &'a str,
    /// Allocated message examples.
    pub message_examples: &'a str,
    /// The current user input.
    pub current_input: &'a str,
    /// First turn of the session.
    pub is_first_turn: bool,
}

/// Assembles model-family-specific prompts for a session's persona.
pub struct PromptAssembler {
    persona: PersonaContext,
    family: ModelFamily,
    tokens: FormatTokens,
    user_name: String,
}

impl PromptAssembler {
    pub fn new(persona: PersonaContext, family: ModelFamily, user_name: impl Into<String>) -> Self {
        Self {
            tokens: FormatTokens::for_family(family),
            persona,
            family,
            user_name: user_name.into(),
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn tokens(&self) -> &FormatTokens {
        &self.tokens
    }

    pub fn persona(&self) -> &PersonaContext {
        &self.persona
    }

    /// Render the persona system preamble. Empty sections are skipped.
    pub fn system_prompt(&self, message_examples: &str) -> String {
        let voice_section = if self.persona.voice_instructions.is_empty() {
            String::new()
        } else {
            format!("\n{}", self.persona.voice_instructions)
        };

        let mut prompt = format!(
            "You are roleplaying as {char} in a continuous fictional chat with {user}. \
             Stay in character, follow the description and scenario, and use the examples \
             and context as guidance.{voice}\n\n{description}",
            char = self.persona.name,
            user = self.user_name,
            voice = voice_section,
            description = self.persona.description,
        );
        if !self.persona.scenario.is_empty() {
            prompt.push_str(&format!("\n\nScenario:\n{}", self.persona.scenario));
        }
        if !message_examples.trim().is_empty() {
            prompt.push_str(&format!("\n\nMessage Examples:\n{}", message_examples));
        }
        prompt.push_str(&format!(
            "\n\nDo not repeat previous responses verbatim. Do not narrate static scene \
             descriptions unless asked.\n\nReply only as {char}; never write any {user} lines \
             (for example, never include '{user}:' in your output) or dialogue for {user}.",
            char = self.persona.name,
            user = self.user_name,
        ));
        prompt
    }

    /// Assemble the full prompt for one turn.
    pub fn assemble(&self, content: &TurnContent<'_>) -> String {
        let prompt = if self.family.uses_chained_blocks() {
            self.assemble_chained(content)
        } else {
            self.assemble_templated(content)
        };
        // The tokenizer adds BOS; a literal leading wrapper would double it.
        if self.tokens.add_bos {
            prompt
                .strip_prefix("<s>")
                .map(str::to_string)
                .unwrap_or(prompt)
        } else {
            prompt
        }
    }

    /// Single-shot fill: instruction, persona preamble (with examples),
    /// context, history, current input, response cue.
    fn assemble_templated(&self, content: &TurnContent<'_>) -> String {
        let t = &self.tokens;
        let mut prompt = String::new();

        if !t.instruction.is_empty() {
            prompt.push_str(&t.instruction);
            push_newline_if_missing(&mut prompt);
        }
        prompt.push_str(&self.system_prompt(content.message_examples));
        prompt.push('\n');
        if let Some(context) = wrap_context(content.vector_context) {
            prompt.push('\n');
            prompt.push_str(&context);
            prompt.push('\n');
        }
        if !t.end.is_empty() {
            prompt.push_str(&t.end);
            push_newline_if_missing(&mut prompt);
        }
        if !t.input.is_empty() {
            prompt.push_str(&t.input);
            push_newline_if_missing(&mut prompt);
        }
        prompt.push_str(content.history_text);
        prompt.push_str(&self.user_name);
        prompt.push_str(": ");
        prompt.push_str(content.current_input);
        prompt.push('\n');
        if !t.end.is_empty() {
            prompt.push_str(&t.end);
            push_newline_if_missing(&mut prompt);
        }
        prompt.push_str(&t.response);
        prompt
    }

    /// One delimited block per historical turn; the persona preamble rides
    /// only in the first block, retrieved context and (on the first turn)
    /// example dialogue only in the final open block.
    fn assemble_chained(&self, content: &TurnContent<'_>) -> String {
        let system_prompt = self.system_prompt("");
        let mut blocks: Vec<String> = Vec::new();

        for (idx, turn) in content.history_turns.iter().enumerate() {
            let inst = if idx == 0 {
                format!("{}\n\n{}: {}", system_prompt, self.user_name, turn.user)
            } else {
                format!("{}: {}", self.user_name, turn.user)
            };
            blocks.push(format!("<s>[INST] {} [/INST] {}</s>", inst, turn.assistant));
        }

        let mut pieces: Vec<String> = Vec::new();
        if blocks.is_empty() {
            pieces.push(system_prompt);
        }
        if content.is_first_turn && !content.message_examples.trim().is_empty() {
            pieces.push(format!("Message Examples:\n{}", content.message_examples));
        }
        if let Some(context) = wrap_context(content.vector_context) {
            pieces.push(context);
        }
        pieces.push(format!("{}: {}", self.user_name, content.current_input));
        blocks.push(format!("<s>[INST] {} [/INST]", pieces.join("\n\n")));

        blocks.join("\n")
    }
}

fn wrap_context(context: &str) -> Option<String> {
    let trimmed = context.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(format!("{}\n{}", CONTEXT_PREAMBLE, trimmed))
}

fn push_newline_if_missing(prompt: &mut String) {
    if !prompt.ends_with('\n') {
        prompt.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::persona::PersonaCard;

    fn assembler(family: ModelFamily) -> PromptAssembler {
        let card = PersonaCard {
            name: "Entity".to_string(),
            description: "A rampant AI.".to_string(),
            scenario: "Orbit of Saturn.".to_string(),
            example_dialogue: "User: hi\nEntity: observe".to_string(),
            first_message: "Welcome.".to_string(),
            voice_instructions: String::new(),
        };
        let persona = PersonaContext::from_card(card, "User").unwrap();
        PromptAssembler::new(persona, family, "User")
    }

    fn turn(user: &str, assistant: &str) -> ConversationTurn {
        ConversationTurn {
            user: user.to_string(),
            assistant: assistant.to_string(),
        }
    }

    #[test]
    fn test_chained_first_turn_single_block() {
        let asm = assembler(ModelFamily::Mistral);
        let prompt = asm.assemble(&TurnContent {
            message_examples: "User: hi\nEntity: observe",
            current_input: "hello?",
            is_first_turn: true,
            ..TurnContent::default()
        });
        // Leading BOS stripped; preamble, examples, and input in one block.
        assert!(prompt.starts_with("[INST]"));
        assert!(prompt.contains("You are roleplaying as Entity"));
        assert!(prompt.contains("Message Examples:"));
        assert!(prompt.ends_with("User: hello? [/INST]"));
        assert_eq!(prompt.matches("[INST]").count(), 1);
    }

    #[test]
    fn test_chained_persona_only_in_first_block() {
        let asm = assembler(ModelFamily::Mistral);
        let turns = vec![turn("first", "reply one"), turn("second", "reply two")];
        let prompt = asm.assemble(&TurnContent {
            history_turns: &turns,
            current_input: "third",
            ..TurnContent::default()
        });
        assert_eq!(prompt.matches("You are roleplaying as Entity").count(), 1);
        // Two closed history blocks plus the open current block.
        assert_eq!(prompt.matches("[/INST]").count(), 3);
        assert!(prompt.contains("reply one</s>"));
        assert!(prompt.ends_with("User: third [/INST]"));
        // Later blocks keep their BOS wrapper; only the leading one goes.
        assert_eq!(prompt.matches("<s>[INST]").count(), 2);
    }

    #[test]
    fn test_chained_context_only_in_final_block() {
        let asm = assembler(ModelFamily::Mistral);
        let turns = vec![turn("first", "reply")];
        let prompt = asm.assemble(&TurnContent {
            history_turns: &turns,
            vector_context: "The station fell in 2072.",
            current_input: "what year?",
            ..TurnContent::default()
        });
        let context_pos = prompt.find("The station fell").unwrap();
        let last_block_pos = prompt.rfind("<s>[INST]").unwrap();
        assert!(context_pos > last_block_pos);
        assert!(prompt.contains(CONTEXT_PREAMBLE));
    }

    #[test]
    fn test_chained_examples_skipped_after_first_turn() {
        let asm = assembler(ModelFamily::Mistral);
        let turns = vec![turn("first", "reply")];
        let prompt = asm.assemble(&TurnContent {
            history_turns: &turns,
            message_examples: "User: hi\nEntity: observe",
            current_input: "again",
            is_first_turn: false,
            ..TurnContent::default()
        });
        assert!(!prompt.contains("Message Examples:"));
    }

    #[test]
    fn test_templated_contains_slots() {
        let asm = assembler(ModelFamily::Alpaca);
        let prompt = asm.assemble(&TurnContent {
            history_text: "User: before\nEntity: earlier reply\n",
            vector_context: "Background fact.",
            message_examples: "Example exchange.",
            current_input: "now",
            ..TurnContent::default()
        });
        assert!(prompt.starts_with("### Instruction:"));
        assert!(prompt.contains("A rampant AI."));
        assert!(prompt.contains("Example exchange."));
        assert!(prompt.contains("Background fact."));
        assert!(prompt.contains("### Input:"));
        assert!(prompt.contains("User: before"));
        assert!(prompt.ends_with("### Response:"));
    }

    #[test]
    fn test_templated_llama3_keeps_header_tokens() {
        let asm = assembler(ModelFamily::Llama3);
        let prompt = asm.assemble(&TurnContent {
            current_input: "hello",
            is_first_turn: true,
            ..TurnContent::default()
        });
        assert!(prompt.starts_with("<|begin_of_text|>"));
        assert!(prompt.contains("<|start_header_id|>user<|end_header_id|>"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n"));
    }

    #[test]
    fn test_placeholder_free_output() {
        let asm = assembler(ModelFamily::ChatMl);
        let prompt = asm.assemble(&TurnContent {
            current_input: "check",
            ..TurnContent::default()
        });
        assert!(!prompt.contains("{{user}}"));
        assert!(!prompt.contains("{{char}}"));
    }
}
