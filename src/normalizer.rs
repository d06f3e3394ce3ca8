//! Turns raw venue text into a canonical [`QueryInput`].

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Result, ThemisError};
use crate::types::{QueryInput, VenueType, EISSN_KEY, ISSN_KEY};
use crate::TARGET_ASSESSMENT;

/// Inputs longer than this are still accepted; the limit only triggers a log line.
const LONG_INPUT_CHARS: usize = 1000;

/// Organization acronyms upper-cased wherever they appear as standalone tokens
pub const KNOWN_ACRONYMS: &[&str] = &[
    "IEEE", "ACM", "SIAM", "AAAI", "IFIP", "IEICE", "SPIE", "USENIX", "ASME", "ASCE", "AIAA",
    "IET", "APS", "AMS", "IOP", "RSC", "ACS", "AIP", "SAE", "INFORMS", "ISCA", "AAAS", "BMC",
    "PLOS", "MDPI", "SCITEPRESS", "EAI", "IARIA", "WSEAS", "ICML", "NIPS", "CVPR", "ICCV",
];

const CONFERENCE_KEYWORDS: &[&str] = &[
    "conference",
    "symposium",
    "workshop",
    "proceedings",
    "congress",
    "colloquium",
];

const JOURNAL_KEYWORDS: &[&str] = &[
    "journal",
    "review",
    "transactions",
    "letters",
    "annals",
    "bulletin",
    "magazine",
    "quarterly",
    "archives",
];

lazy_static! {
    static ref HTML_ENTITY: Regex =
        Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref ISSN_PATTERN: Regex = Regex::new(
        r"(?i)(?:\b(online\s+issn|issn\s*\(online\)|print\s+issn|issn\s*\(print\)|e-?issn|p-?issn|issn)\s*[:#]?\s*)?\b(\d{4})-?(\d{3}[\dX])\b"
    )
    .unwrap();
    static ref INNERMOST_BRACKETS: Regex = Regex::new(r"[\(\[\{]([^\(\)\[\]\{\}]*)[\)\]\}]").unwrap();
    static ref STRAY_BRACKETS: Regex = Regex::new(r"[\(\)\[\]\{\}]").unwrap();
    static ref ORDINAL_YEAR_PREFIX: Regex =
        Regex::new(r"(?i)^(?:(?:\d{4}|\d+(?:st|nd|rd|th))\s+)+").unwrap();
    static ref PROCEEDINGS_PREFIX: Regex = Regex::new(r"(?i)^proceedings\s+of\s+(?:the\s+)?").unwrap();
}

/// Verify the weighted mod-11 check digit of an 8-character ISSN (hyphen optional).
pub fn is_valid_issn(issn: &str) -> bool {
    let chars: Vec<char> = issn
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if chars.len() != 8 || !chars[..7].iter().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let sum: u32 = chars[..7]
        .iter()
        .enumerate()
        .map(|(i, c)| c.to_digit(10).unwrap_or(0) * (8 - i as u32))
        .sum();
    let check = (11 - sum % 11) % 11;

    match chars[7] {
        'X' => check == 10,
        c => c.to_digit(10) == Some(check),
    }
}

/// Normalize an ISSN to `NNNN-NNNC`, or `None` if it fails the checksum.
pub fn normalize_issn(raw: &str) -> Option<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if !is_valid_issn(&compact) {
        return None;
    }
    Some(format!("{}-{}", &compact[..4], &compact[4..]))
}

pub struct InputNormalizer {
    known_acronyms: HashSet<String>,
}

impl Default for InputNormalizer {
    fn default() -> Self {
        Self {
            known_acronyms: KNOWN_ACRONYMS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl InputNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an acronym to the set that is always upper-cased
    pub fn with_acronym(mut self, acronym: &str) -> Self {
        self.known_acronyms.insert(acronym.trim().to_uppercase());
        self
    }

    /// Produce the canonical query for `text`.
    ///
    /// Fails only when the trimmed input is empty.
    pub fn normalize(&self, text: &str) -> Result<QueryInput> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ThemisError::validation("Input must not be empty"));
        }
        if trimmed.chars().count() > LONG_INPUT_CHARS {
            debug!(
                target: TARGET_ASSESSMENT,
                "Accepting unusually long input ({} chars)",
                trimmed.chars().count()
            );
        }

        let unescaped = unescape_html(trimmed);
        let composed: String = unescaped.nfc().collect();
        let collapsed = collapse_whitespace(&composed);

        let (without_ids, identifiers) = extract_identifiers(&collapsed);
        let (without_brackets, bracket_acronyms) = remove_brackets(&without_ids);
        let (hoisted, acronyms) = hoist_acronyms(&without_brackets, bracket_acronyms);
        let cased = self.uppercase_known_acronyms(&hoisted);
        let mut normalized_name = trim_punctuation(&collapse_whitespace(&cased));

        // Input made only of identifiers: fall back to the cleaned text so the
        // name is never empty
        if normalized_name.is_empty() {
            normalized_name = identifiers
                .values()
                .next()
                .cloned()
                .unwrap_or_else(|| collapsed.clone());
        }

        let aliases = generate_aliases(&normalized_name, &acronyms);
        let venue_type = detect_venue_type(&normalized_name);

        debug!(
            target: TARGET_ASSESSMENT,
            "Normalized '{}' to '{}' ({} aliases, identifiers={:?})",
            trimmed,
            normalized_name,
            aliases.len(),
            identifiers
        );

        Ok(QueryInput {
            raw_input: text.to_string(),
            normalized_name,
            identifiers,
            aliases,
            acronyms,
            venue_type,
        })
    }

    fn uppercase_known_acronyms(&self, text: &str) -> String {
        text.split_whitespace()
            .map(|token| {
                let core = token.trim_matches(|c: char| !c.is_alphanumeric());
                let upper = core.to_uppercase();
                if !core.is_empty() && core != upper && self.known_acronyms.contains(&upper) {
                    token.replacen(core, &upper, 1)
                } else {
                    token.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Convenience wrapper using the default acronym set
pub fn normalize(text: &str) -> Result<QueryInput> {
    InputNormalizer::default().normalize(text)
}

fn unescape_html(text: &str) -> String {
    HTML_ENTITY
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "ndash" => Some('–'),
                    "mdash" => Some('—'),
                    "rsquo" => Some('\u{2019}'),
                    "lsquo" => Some('\u{2018}'),
                    "rdquo" => Some('\u{201D}'),
                    "ldquo" => Some('\u{201C}'),
                    "eacute" => Some('é'),
                    "egrave" => Some('è'),
                    "aacute" => Some('á'),
                    "oacute" => Some('ó'),
                    "uuml" => Some('ü'),
                    "ouml" => Some('ö'),
                    "auml" => Some('ä'),
                    "ccedil" => Some('ç'),
                    _ => None,
                }
            };
            decoded
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Pull checksum-valid ISSNs out of `text`, returning the remaining text and the
/// identifier map.
fn extract_identifiers(text: &str) -> (String, BTreeMap<String, String>) {
    let mut identifiers = BTreeMap::new();
    let mut remaining = String::with_capacity(text.len());
    let mut last_end = 0;

    for caps in ISSN_PATTERN.captures_iter(text) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        let candidate = format!("{}{}", &caps[2], &caps[3]);
        let issn = match normalize_issn(&candidate) {
            Some(issn) => issn,
            None => continue,
        };

        let label = caps
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let electronic = label.starts_with('e') || label.contains("online");

        let slot = if electronic {
            EISSN_KEY
        } else if !identifiers.contains_key(ISSN_KEY) {
            ISSN_KEY
        } else {
            EISSN_KEY
        };
        if !identifiers.contains_key(slot) && !identifiers.values().any(|v| v == &issn) {
            identifiers.insert(slot.to_string(), issn);
        }

        remaining.push_str(&text[last_end..whole.start()]);
        remaining.push(' ');
        last_end = whole.end();
    }
    remaining.push_str(&text[last_end..]);

    (remaining, identifiers)
}

/// Whether bracketed content looks like a venue acronym (`CLOUD`, `NeurIPS`).
fn is_acronym_candidate(content: &str) -> bool {
    let len = content.chars().count();
    (2..=12).contains(&len)
        && !content.contains(char::is_whitespace)
        && content.chars().next().map_or(false, |c| c.is_uppercase())
        && content.chars().filter(|c| c.is_uppercase()).count() >= 2
        && content.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '&')
}

/// Strip bracketed content from the innermost level outwards, keeping
/// acronym-shaped content aside for hoisting.
fn remove_brackets(text: &str) -> (String, Vec<String>) {
    let mut current = text.to_string();
    let mut acronyms = Vec::new();

    loop {
        let mut found = false;
        let next = INNERMOST_BRACKETS
            .replace_all(&current, |caps: &Captures| {
                found = true;
                let content = caps[1].trim();
                if is_acronym_candidate(content) {
                    acronyms.push(content.to_string());
                }
                " "
            })
            .into_owned();
        current = next;
        if !found {
            break;
        }
    }

    let cleaned = STRAY_BRACKETS.replace_all(&current, " ").into_owned();
    (collapse_whitespace(&cleaned), acronyms)
}

/// Replace a word equal (case-insensitively) to each acronym with the acronym
/// itself. Acronyms without a matching word are returned for use as aliases.
fn hoist_acronyms(text: &str, candidates: Vec<String>) -> (String, Vec<String>) {
    let mut tokens: Vec<String> = text.split_whitespace().map(String::from).collect();
    let mut leftover = Vec::new();

    for acronym in candidates {
        let lower = acronym.to_lowercase();
        let position = tokens.iter().position(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
                == lower
        });
        match position {
            Some(idx) => {
                let core = tokens[idx]
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_string();
                tokens[idx] = tokens[idx].replacen(&core, &acronym, 1);
            }
            None => {
                if !leftover.contains(&acronym) {
                    leftover.push(acronym);
                }
            }
        }
    }

    (tokens.join(" "), leftover)
}

fn trim_punctuation(text: &str) -> String {
    text.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '.' | '-' | '/' | '–' | '|'))
        .to_string()
}

fn strip_ordinal_prefix(name: &str) -> String {
    ORDINAL_YEAR_PREFIX.replace(name, "").trim().to_string()
}

fn strip_proceedings_prefix(name: &str) -> String {
    PROCEEDINGS_PREFIX.replace(name, "").trim().to_string()
}

/// Alternate forms tried after the canonical name, in priority order.
fn generate_aliases(name: &str, acronyms: &[String]) -> Vec<String> {
    let without_ordinal = strip_ordinal_prefix(name);
    let without_proceedings = strip_proceedings_prefix(name);
    let candidates = [
        without_ordinal.clone(),
        without_proceedings.clone(),
        strip_proceedings_prefix(&without_ordinal),
        strip_ordinal_prefix(&without_proceedings),
    ];

    let mut aliases: Vec<String> = Vec::new();
    let canonical = name.to_lowercase();
    for candidate in candidates.iter().chain(acronyms.iter()) {
        let candidate = trim_punctuation(candidate);
        if candidate.is_empty() || candidate.to_lowercase() == canonical {
            continue;
        }
        if aliases
            .iter()
            .any(|a| a.to_lowercase() == candidate.to_lowercase())
        {
            continue;
        }
        aliases.push(candidate);
    }
    aliases
}

fn detect_venue_type(name: &str) -> VenueType {
    let lower = name.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| CONFERENCE_KEYWORDS.contains(w)) {
        VenueType::Conference
    } else if words.iter().any(|w| JOURNAL_KEYWORDS.contains(w)) {
        VenueType::Journal
    } else {
        VenueType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issn_checksum() {
        assert!(is_valid_issn("0028-0836"));
        assert!(is_valid_issn("00280836"));
        assert!(is_valid_issn("1234-5679"));
        assert!(is_valid_issn("2049-3630"));
        assert!(!is_valid_issn("0028-0837"));
        assert!(!is_valid_issn("0028-083"));
        assert!(!is_valid_issn("ABCD-0836"));
        assert_eq!(normalize_issn("00280836"), Some("0028-0836".to_string()));
        assert_eq!(normalize_issn(" 0028-0837 "), None);
    }

    #[test]
    fn test_check_digit_x() {
        // 0000-006X: 6*2 = 12, 12 % 11 = 1, 11 - 1 = 10 -> X
        assert!(is_valid_issn("0000-006X"));
        assert!(is_valid_issn("0000-006x"));
        assert_eq!(normalize_issn("0000006x"), Some("0000-006X".to_string()));
    }

    #[test]
    fn test_nature_with_issn() {
        let query = normalize("Nature (ISSN: 0028-0836)").unwrap();
        assert_eq!(query.normalized_name, "Nature");
        assert_eq!(query.issn(), Some("0028-0836"));
        assert_eq!(query.eissn(), None);
        assert_eq!(query.identifiers.len(), 1);
    }

    #[test]
    fn test_issn_and_eissn_labels() {
        let query = normalize("Journal of Testing eISSN 1234-5679 ISSN 0028-0836").unwrap();
        assert_eq!(query.issn(), Some("0028-0836"));
        assert_eq!(query.eissn(), Some("1234-5679"));
        assert_eq!(query.normalized_name, "Journal of Testing");
    }

    #[test]
    fn test_invalid_checksum_is_not_an_identifier() {
        let query = normalize("Journal of Testing 0028-0837").unwrap();
        assert!(query.identifiers.is_empty());
        assert_eq!(query.normalized_name, "Journal of Testing 0028-0837");
    }

    #[test]
    fn test_acronym_hoisting() {
        let query = normalize("International Conference on Cloud Computing (CLOUD)").unwrap();
        assert_eq!(
            query.normalized_name,
            "International Conference on CLOUD Computing"
        );
        assert!(query.acronyms.is_empty());
        assert_eq!(query.venue_type, VenueType::Conference);
    }

    #[test]
    fn test_unmatched_acronym_becomes_alias() {
        let query = normalize("Neural Information Processing Systems (NeurIPS)").unwrap();
        assert_eq!(query.normalized_name, "Neural Information Processing Systems");
        assert_eq!(query.acronyms, vec!["NeurIPS".to_string()]);
        assert!(query.aliases.contains(&"NeurIPS".to_string()));
    }

    #[test]
    fn test_nested_brackets_removed() {
        let query = normalize("Journal of Things {with [nested (stuff)] content}").unwrap();
        assert_eq!(query.normalized_name, "Journal of Things");

        let query = normalize("Annals of Widgets (Online) [2nd series]").unwrap();
        assert_eq!(query.normalized_name, "Annals of Widgets");
    }

    #[test]
    fn test_html_entities_and_whitespace() {
        let query = normalize("  Journal   of Law &amp; Economics&#33; ").unwrap();
        assert_eq!(query.normalized_name, "Journal of Law & Economics!");

        let query = normalize("Revue d&#x27;Histoire").unwrap();
        assert_eq!(query.normalized_name, "Revue d'Histoire");
    }

    #[test]
    fn test_known_acronyms_uppercased() {
        let query = normalize("ieee transactions on pattern analysis").unwrap();
        assert_eq!(query.normalized_name, "IEEE transactions on pattern analysis");

        let query = normalize("Communications of the Acm").unwrap();
        assert_eq!(query.normalized_name, "Communications of the ACM");

        let normalizer = InputNormalizer::new().with_acronym("iccs");
        let query = normalizer.normalize("proceedings of iccs").unwrap();
        assert_eq!(query.normalized_name, "proceedings of ICCS");
    }

    #[test]
    fn test_aliases_from_prefixes() {
        let query = normalize("2018 Proceedings of the Conference on Widgets").unwrap();
        assert_eq!(
            query.aliases,
            vec![
                "Proceedings of the Conference on Widgets".to_string(),
                "Conference on Widgets".to_string(),
            ]
        );

        let query = normalize("Proceedings of the 11th Symposium on Gadgets").unwrap();
        assert_eq!(
            query.aliases,
            vec![
                "11th Symposium on Gadgets".to_string(),
                "Symposium on Gadgets".to_string(),
            ]
        );
    }

    #[test]
    fn test_no_aliases_for_plain_name() {
        let query = normalize("Nature").unwrap();
        assert!(query.aliases.is_empty());
        assert_eq!(query.venue_type, VenueType::Unknown);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(normalize("").unwrap_err().is_validation());
        assert!(normalize("   \t ").unwrap_err().is_validation());
    }

    #[test]
    fn test_long_input_accepted() {
        let long = format!("Journal of {}", "Very ".repeat(400));
        let query = normalize(&long).unwrap();
        assert!(query.normalized_name.len() > 1000);
        assert_eq!(query.venue_type, VenueType::Journal);
    }

    #[test]
    fn test_identifier_only_input_keeps_a_name() {
        let query = normalize("0028-0836").unwrap();
        assert_eq!(query.issn(), Some("0028-0836"));
        assert_eq!(query.normalized_name, "0028-0836");
    }

    #[test]
    fn test_raw_input_preserved() {
        let query = normalize("  Nature  ").unwrap();
        assert_eq!(query.raw_input, "  Nature  ");
    }
}
