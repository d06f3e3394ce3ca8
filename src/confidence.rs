//! Match-quality tiers and name similarity.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strsim::jaro_winkler;

/// Jaro-Winkler similarity required for a fuzzy name match
const FUZZY_THRESHOLD: f64 = 0.90;
/// Jaccard similarity required for a word-similarity match
const WORD_SIMILARITY_THRESHOLD: f64 = 0.5;

/// How well a candidate record matched the query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchQuality {
    ExactIssn,
    ExactName,
    ExactAlias,
    SubstringMatch,
    WordSimilarity,
    FuzzyMatch,
    NoMatch,
}

pub fn calculate_base_confidence(quality: MatchQuality) -> f64 {
    match quality {
        MatchQuality::ExactIssn => 1.00,
        MatchQuality::ExactName => 0.95,
        MatchQuality::ExactAlias => 0.90,
        MatchQuality::SubstringMatch => 0.70,
        MatchQuality::WordSimilarity => 0.60,
        MatchQuality::FuzzyMatch => 0.50,
        MatchQuality::NoMatch => 0.00,
    }
}

/// Jaccard similarity over lower-cased whitespace tokens
pub fn calculate_name_similarity(name1: &str, name2: &str) -> f64 {
    let a = name1.trim().to_lowercase();
    let b = name2.trim().to_lowercase();

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 0.0;
    }

    intersection as f64 / union as f64
}

/// Pick the tier for comparing a query name against a candidate's name.
///
/// `is_alias` marks the query side as an alias rather than the canonical
/// name, which caps an exact match at `ExactAlias`.
pub fn classify_name_match(query: &str, candidate: &str, is_alias: bool) -> MatchQuality {
    let q = query.trim().to_lowercase();
    let c = candidate.trim().to_lowercase();

    if q.is_empty() || c.is_empty() {
        return MatchQuality::NoMatch;
    }
    if q == c {
        return if is_alias {
            MatchQuality::ExactAlias
        } else {
            MatchQuality::ExactName
        };
    }

    // Whole-token containment only: "Nature" must not match "Naturestudies"
    let (shorter, longer) = if q.len() < c.len() { (&q, &c) } else { (&c, &q) };
    let shorter_tokens: HashSet<&str> = shorter.split_whitespace().collect();
    let longer_tokens: HashSet<&str> = longer.split_whitespace().collect();
    if longer.contains(shorter.as_str()) && shorter_tokens.is_subset(&longer_tokens) {
        return MatchQuality::SubstringMatch;
    }

    if calculate_name_similarity(&q, &c) >= WORD_SIMILARITY_THRESHOLD {
        return MatchQuality::WordSimilarity;
    }

    if jaro_winkler(&q, &c) >= FUZZY_THRESHOLD {
        return MatchQuality::FuzzyMatch;
    }

    MatchQuality::NoMatch
}
