//! Model family format tokens
//!
//! A closed enum of supported model families with their prompt delimiters.
//! Unknown families are rejected at construction so the session never runs
//! with undefined prompt formatting.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
    Alpaca,
    Mistral,
    Llama,
    Llama2,
    Llama3,
    #[serde(rename = "chatml")]
    ChatMl,
    Qwen,
    Qwen2,
    Vicuna,
    Solar,
}

impl FromStr for ModelFamily {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alpaca" => Ok(Self::Alpaca),
            "mistral" => Ok(Self::Mistral),
            "llama" => Ok(Self::Llama),
            "llama2" => Ok(Self::Llama2),
            "llama3" => Ok(Self::Llama3),
            "chatml" => Ok(Self::ChatMl),
            "qwen" => Ok(Self::Qwen),
            "qwen2" => Ok(Self::Qwen2),
            "vicuna" => Ok(Self::Vicuna),
            "solar" => Ok(Self::Solar),
            other => Err(SessionError::UnknownModelFamily(other.to_string())),
        }
    }
}

impl ModelFamily {
    /// Families whose prompts are built as one delimited block per turn
    /// rather than a single templated fill.
    pub fn uses_chained_blocks(&self) -> bool {
        matches!(self, Self::Mistral)
    }
}

/// Prompt delimiters for one model family, with the leading BOS wrapper
/// stripped out of the instruction token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTokens {
    pub instruction: String,
    pub input: String,
    pub response: String,
    pub end: String,
    /// True when the raw instruction token carried a leading `<s>`; the
    /// tokenizer adds BOS itself, so the literal text must not.
    pub add_bos: bool,
}

impl FormatTokens {
    /// Look up the format tokens for a family.
    pub fn for_family(family: ModelFamily) -> Self {
        let (instruction, input, response, end) = match family {
            ModelFamily::Alpaca => ("### Instruction:", "### Input:", "### Response:", ""),
            ModelFamily::Mistral => ("<s>[INST]", "", "[/INST]", ""),
            ModelFamily::Llama | ModelFamily::Llama2 => ("<s>[INST]", "", "[/INST]", "</s>"),
            ModelFamily::ChatMl => ("<|system|>", "<|user|>", "<|assistant|>", "</s>"),
            ModelFamily::Qwen | ModelFamily::Qwen2 => (
                "<|im_start|>system\n",
                "<|im_start|>user\n",
                "<|im_start|>assistant\n",
                "<|im_end|>\n",
            ),
            ModelFamily::Llama3 => (
                "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n",
                "<|start_header_id|>user<|end_header_id|>\n",
                "<|start_header_id|>assistant<|end_header_id|>\n",
                "<|eot_id|>",
            ),
            ModelFamily::Vicuna => ("", "USER:", "ASSISTANT:", ""),
            ModelFamily::Solar => ("", "<s> ### User:", "### Assistant:", ""),
        };

        let (instruction, add_bos) = match instruction.strip_prefix("<s>") {
            Some(stripped) => (stripped, true),
            None => (instruction, false),
        };

        Self {
            instruction: instruction.to_string(),
            input: input.to_string(),
            response: response.to_string(),
            end: end.to_string(),
            add_bos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_families() {
        assert_eq!("mistral".parse::<ModelFamily>().unwrap(), ModelFamily::Mistral);
        assert_eq!("LLAMA3".parse::<ModelFamily>().unwrap(), ModelFamily::Llama3);
        assert_eq!("chatml".parse::<ModelFamily>().unwrap(), ModelFamily::ChatMl);
    }

    #[test]
    fn test_unknown_family_is_fatal() {
        let err = "gpt-j".parse::<ModelFamily>().unwrap_err();
        assert!(matches!(err, SessionError::UnknownModelFamily(name) if name == "gpt-j"));
    }

    #[test]
    fn test_bos_stripped_from_instruction() {
        let tokens = FormatTokens::for_family(ModelFamily::Mistral);
        assert_eq!(tokens.instruction, "[INST]");
        assert!(tokens.add_bos);

        let tokens = FormatTokens::for_family(ModelFamily::ChatMl);
        assert_eq!(tokens.instruction, "<|system|>");
        assert!(!tokens.add_bos);
    }

    #[test]
    fn test_only_mistral_chains_blocks() {
        assert!(ModelFamily::Mistral.uses_chained_blocks());
        assert!(!ModelFamily::Llama3.uses_chained_blocks());
        assert!(!ModelFamily::Alpaca.uses_chained_blocks());
    }
}
