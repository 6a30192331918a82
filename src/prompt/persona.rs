//! Persona context from a character card
//!
//! Card loading is caller-owned; this module validates the required fields
//! and substitutes the `{{user}}`/`{{char}}` placeholders once at
//! construction.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Raw character card fields as loaded by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub example_dialogue: String,
    #[serde(default)]
    pub first_message: String,
    #[serde(default)]
    pub voice_instructions: String,
}

/// Validated persona fields with placeholders resolved.
#[derive(Debug, Clone)]
pub struct PersonaContext {
    pub name: String,
    pub description: String,
    pub scenario: String,
    pub example_dialogue: String,
    pub first_message: String,
    pub voice_instructions: String,
}

impl PersonaContext {
    /// Validate a card and resolve its placeholders.
    ///
    /// A missing name or description is fatal: the prompt preamble would be
    /// meaningless without them.
    pub fn from_card(card: PersonaCard, user_name: &str) -> Result<Self> {
        if card.name.trim().is_empty() {
            return Err(SessionError::MissingPersonaField("name"));
        }
        if card.description.trim().is_empty() {
            return Err(SessionError::MissingPersonaField("description"));
        }

        let name = card.name.clone();
        Ok(Self {
            description: substitute_placeholders(&card.description, user_name, &name),
            scenario: substitute_placeholders(&card.scenario, user_name, &name),
            example_dialogue: substitute_placeholders(&card.example_dialogue, user_name, &name),
            first_message: substitute_placeholders(&card.first_message, user_name, &name),
            voice_instructions: card.voice_instructions,
            name,
        })
    }
}

/// Replace the common card template variables, both casings.
pub fn substitute_placeholders(text: &str, user_name: &str, char_name: &str) -> String {
    text.replace("{{user}}", user_name)
        .replace("{{User}}", user_name)
        .replace("{{char}}", char_name)
        .replace("{{Char}}", char_name)
}
