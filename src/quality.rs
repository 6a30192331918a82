//! Response quality gate
//!
//! Cleans the raw governed text (marker truncation, stray format tokens,
//! whitespace normalization) and decides whether the result is fit to store.
//! Rejection is policy, not an error: the turn still advances history with a
//! fallback sentence in the assistant slot.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::config::QualityConfig;

/// Model-format control tokens that must never reach stored output.
const STRAY_TOKENS: &[&str] = &["[/INST]", "<|im_end|>", "</s>", "<|eot_id|>", "<s>", "<|end|>"];

static MULTI_NEWLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Cleans and gates completed replies before they enter history.
pub struct QualityGate {
    config: QualityConfig,
    /// Newline-anchored markers used for truncation.
    anchored_markers: Vec<String>,
    /// Bare markers used for acceptance; a broader net than truncation since
    /// cleanup may have removed the leading newline.
    bare_markers: Vec<String>,
}

impl QualityGate {
    pub fn new(config: QualityConfig, user_name: &str) -> Self {
        let variants = [
            format!("{}:", user_name),
            format!("{}:", user_name.to_uppercase()),
            format!("{}:", user_name.to_lowercase()),
            "{{user}}".to_string(),
        ];
        Self {
            anchored_markers: variants.iter().map(|v| format!("\n{}", v)).collect(),
            bare_markers: variants.to_vec(),
            config,
        }
    }

    /// Truncate at the first generated user-turn line, strip stray format
    /// tokens, collapse 3+ newlines to a blank line, and trim.
    pub fn cleanup(&self, raw: &str) -> String {
        let mut response = raw.to_string();

        for marker in &self.anchored_markers {
            if let Some(idx) = response.find(marker.as_str()) {
                response.truncate(idx);
            }
        }

        for token in STRAY_TOKENS {
            response = response.replace(token, "");
        }

        let response = MULTI_NEWLINE.replace_all(&response, "\n\n");
        response.trim().to_string()
    }

    /// Accept or reject a cleaned reply.
    ///
    /// Rejects replies that are too short, that still carry a user-turn
    /// marker anywhere, or that exactly duplicate the previous assistant
    /// turn.
    pub fn accept(&self, cleaned: &str, last_assistant: Option<&str>) -> bool {
        let trimmed = cleaned.trim();
        if trimmed.len() < self.config.min_response_chars {
            warn!("Response too short ({} chars); rejecting", trimmed.len());
            return false;
        }

        for marker in &self.bare_markers {
            if cleaned.contains(marker.as_str()) {
                warn!("Response contains user-turn marker '{}'; rejecting", marker);
                return false;
            }
        }

        if let Some(last) = last_assistant {
            if trimmed == last.trim() {
                warn!("Response duplicates the previous assistant turn; rejecting");
                return false;
            }
        }

        true
    }

    /// The configured replacement for a rejected reply.
    pub fn fallback_response(&self) -> &str {
        &self.config.fallback_response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> QualityGate {
        QualityGate::new(QualityConfig::default(), "User")
    }

    #[test]
    fn test_cleanup_truncates_at_user_marker() {
        assert_eq!(gate().cleanup("Hello.\nUser: more"), "Hello.");
        assert_eq!(gate().cleanup("Hello.\nUSER: shouting"), "Hello.");
    }

    #[test]
    fn test_cleanup_strips_stray_tokens() {
        let cleaned = gate().cleanup("Hi[/INST] there</s>");
        assert!(!cleaned.contains("[/INST]"));
        assert!(!cleaned.contains("</s>"));
        assert_eq!(cleaned, "Hi there");
    }

    #[test]
    fn test_cleanup_collapses_newlines() {
        assert_eq!(gate().cleanup("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_cleanup_trims() {
        assert_eq!(gate().cleanup("  answer  \n"), "answer");
    }

    #[test]
    fn test_accept_rejects_short() {
        assert!(!gate().accept("short", None));
    }

    #[test]
    fn test_accept_rejects_bare_marker() {
        let text = "A long enough reply that would otherwise pass. User: no";
        assert!(!gate().accept(text, None));
    }

    #[test]
    fn test_accept_rejects_duplicate_of_last_turn() {
        let reply = "An identical and sufficiently long assistant reply.";
        assert!(!gate().accept(reply, Some("  An identical and sufficiently long assistant reply. ")));
        assert!(gate().accept(reply, Some("A different prior reply, also long enough here.")));
    }

    #[test]
    fn test_accept_passes_normal_reply() {
        assert!(gate().accept(
            "A perfectly ordinary in-character reply of reasonable length.",
            None
        ));
    }
}
