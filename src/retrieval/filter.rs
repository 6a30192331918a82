//! Metadata filter candidates
//!
//! Candidates are ordered most-selective-first so the orchestrator can loosen
//! constraints progressively: all matches must hold, then any match, then no
//! filter at all.

use super::keyfile::KeyMatch;

/// One metadata equality condition: field `id` equals `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCondition {
    pub id: String,
    pub text: String,
}

impl From<&KeyMatch> for MatchCondition {
    fn from(m: &KeyMatch) -> Self {
        Self {
            id: m.id.clone(),
            text: m.text.clone(),
        }
    }
}

/// A metadata filter applied to an index search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    /// Every condition must hold.
    AllOf(Vec<MatchCondition>),
    /// At least one condition must hold.
    AnyOf(Vec<MatchCondition>),
}

/// One attempt in the loosening sequence; `None` means unfiltered.
pub type FilterCandidate = Option<MetadataFilter>;

/// Build the ordered candidate list from query matches.
///
/// Zero matches: unfiltered only. One match: that exact filter only. Several:
/// the conjunction, then the disjunction, then unfiltered as the terminal
/// fallback.
pub fn build_filter_candidates(matches: &[KeyMatch]) -> Vec<FilterCandidate> {
    let conditions: Vec<MatchCondition> = matches.iter().map(MatchCondition::from).collect();
    match conditions.len() {
        0 => vec![None],
        1 => vec![Some(MetadataFilter::AllOf(conditions))],
        _ => vec![
            Some(MetadataFilter::AllOf(conditions.clone())),
            Some(MetadataFilter::AnyOf(conditions)),
            None,
        ],
    }
}
