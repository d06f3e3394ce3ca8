//! Pairwise cross-validation of backend opinions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strsim::jaro_winkler;

use crate::backends::crossref::CrossrefBackend;
use crate::backends::openalex::OpenAlexBackend;
use crate::types::{AssessmentType, BackendResult};

pub const AGREEMENT_BONUS: f64 = 0.10;
pub const PUBLISHER_BONUS: f64 = 0.05;
pub const DISAGREEMENT_PENALTY: f64 = -0.15;
pub const SINGLE_SOURCE_PENALTY: f64 = -0.05;

const PUBLISHER_SIMILARITY_THRESHOLD: f64 = 0.90;
const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "ltd", "llc", "gmbh", "co", "corp", "corporation", "limited", "sa", "bv", "ag", "plc",
    "publishing", "publishers", "publisher", "press", "group",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub agreement: bool,
    /// Category both backends agreed on; `None` unless `agreement` holds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreed_assessment: Option<AssessmentType>,
    pub confidence_adjustment: f64,
    pub consistency_checks: Vec<String>,
    pub reasoning: Vec<String>,
}

/// Compares what two backends said about the same venue.
pub trait CrossValidator: Send + Sync {
    fn validate(
        &self,
        name_a: &str,
        result_a: &BackendResult,
        name_b: &str,
        result_b: &BackendResult,
    ) -> ValidationOutcome;
}

/// Lowercase, strip punctuation and trailing corporate designators.
pub fn normalize_publisher(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    while words.len() > 1 && words.last().is_some_and(|w| CORPORATE_SUFFIXES.contains(w)) {
        words.pop();
    }
    words.join(" ")
}

pub fn publishers_consistent(a: &str, b: &str) -> bool {
    let a = normalize_publisher(a);
    let b = normalize_publisher(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.contains(&b) || b.contains(&a) || jaro_winkler(&a, &b) >= PUBLISHER_SIMILARITY_THRESHOLD
}

/// Checks that two metadata backends agree on the category and that their
/// publisher and volume figures line up.
#[derive(Debug, Default, Clone, Copy)]
pub struct PublisherMetadataValidator;

impl CrossValidator for PublisherMetadataValidator {
    fn validate(
        &self,
        name_a: &str,
        result_a: &BackendResult,
        name_b: &str,
        result_b: &BackendResult,
    ) -> ValidationOutcome {
        match (result_a.is_found(), result_b.is_found()) {
            (false, false) => ValidationOutcome {
                agreement: false,
                agreed_assessment: None,
                confidence_adjustment: 0.0,
                consistency_checks: Vec::new(),
                reasoning: vec![format!("Journal not found in either {} or {}", name_a, name_b)],
            },
            (true, false) | (false, true) => {
                let found_in = if result_a.is_found() { name_a } else { name_b };
                ValidationOutcome {
                    agreement: false,
                    agreed_assessment: None,
                    confidence_adjustment: SINGLE_SOURCE_PENALTY,
                    consistency_checks: Vec::new(),
                    reasoning: vec![format!("Only found in {}", found_in)],
                }
            }
            (true, true) if result_a.assessment != result_b.assessment => ValidationOutcome {
                agreement: false,
                agreed_assessment: None,
                confidence_adjustment: DISAGREEMENT_PENALTY,
                consistency_checks: Vec::new(),
                reasoning: vec![format!(
                    "Backend disagreement: {} says {}, {} says {}",
                    name_a,
                    describe(result_a),
                    name_b,
                    describe(result_b)
                )],
            },
            (true, true) => agreeing(name_a, result_a, name_b, result_b),
        }
    }
}

fn describe(result: &BackendResult) -> &'static str {
    result.assessment.map(|a| a.as_str()).unwrap_or("no opinion")
}

fn agreeing(
    name_a: &str,
    result_a: &BackendResult,
    name_b: &str,
    result_b: &BackendResult,
) -> ValidationOutcome {
    let Some(agreed) = result_a.assessment else {
        return ValidationOutcome {
            agreement: false,
            agreed_assessment: None,
            confidence_adjustment: 0.0,
            consistency_checks: Vec::new(),
            reasoning: vec![format!(
                "{} and {} both found the venue but neither gave an opinion",
                name_a, name_b
            )],
        };
    };

    let mut adjustment = AGREEMENT_BONUS;
    let mut checks = vec![format!("assessment: both {}", describe(result_a))];
    let mut reasoning = vec![format!("{} and {} agree ({})", name_a, name_b, describe(result_a))];

    let publisher_a = result_a.data["publisher"].as_str();
    let publisher_b = result_b.data["publisher"].as_str();
    if let (Some(a), Some(b)) = (publisher_a, publisher_b) {
        if publishers_consistent(a, b) {
            adjustment += PUBLISHER_BONUS;
            checks.push(format!("publisher: consistent ({} / {})", a, b));
        } else {
            reasoning.push(format!("Publisher names differ: '{}' vs '{}'", a, b));
        }
    }

    let count_a = result_a.data["publication_count"].as_i64();
    let count_b = result_b.data["publication_count"].as_i64();
    if let (Some(a), Some(b)) = (count_a, count_b) {
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        if (low as f64) < high as f64 / 2.0 {
            reasoning.push(format!("Publication count mismatch: {} vs {}", a, b));
        } else {
            checks.push(format!("publication_count: consistent ({} / {})", a, b));
        }
    }

    ValidationOutcome {
        agreement: true,
        agreed_assessment: Some(agreed),
        confidence_adjustment: adjustment,
        consistency_checks: checks,
        reasoning,
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Validators keyed by unordered backend pair
#[derive(Clone, Default)]
pub struct CrossValidationRegistry {
    validators: BTreeMap<(String, String), Arc<dyn CrossValidator>>,
}

impl CrossValidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            OpenAlexBackend::NAME,
            CrossrefBackend::NAME,
            Arc::new(PublisherMetadataValidator),
        );
        registry
    }

    pub fn register(&mut self, backend_a: &str, backend_b: &str, validator: Arc<dyn CrossValidator>) {
        self.validators.insert(pair_key(backend_a, backend_b), validator);
    }

    pub fn pairs(&self) -> Vec<(String, String)> {
        self.validators.keys().cloned().collect()
    }

    /// Run the validator registered for `{a, b}` in either order.
    pub fn validate_pair(
        &self,
        name_a: &str,
        result_a: &BackendResult,
        name_b: &str,
        result_b: &BackendResult,
    ) -> Option<ValidationOutcome> {
        self.validators
            .get(&pair_key(name_a, name_b))
            .map(|validator| validator.validate(name_a, result_a, name_b, result_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssessmentType, EvidenceType};
    use serde_json::json;

    fn found(name: &str, assessment: AssessmentType, publisher: &str, count: i64) -> BackendResult {
        BackendResult::found(
            name,
            EvidenceType::Heuristic,
            0.7,
            Some(assessment),
            json!({"publisher": publisher, "publication_count": count}),
        )
    }

    #[test]
    fn test_agreement_with_consistent_publisher() {
        let a = found("openalex_analyzer", AssessmentType::Legitimate, "Springer Nature", 5000);
        let b = found("crossref_analyzer", AssessmentType::Legitimate, "Springer Nature Ltd.", 4200);
        let outcome = PublisherMetadataValidator.validate("openalex_analyzer", &a, "crossref_analyzer", &b);
        assert!(outcome.agreement);
        assert_eq!(outcome.agreed_assessment, Some(AssessmentType::Legitimate));
        assert!((outcome.confidence_adjustment - 0.15).abs() < 1e-9);
        assert!(outcome.consistency_checks.iter().any(|c| c.starts_with("publisher")));
        assert!(outcome.consistency_checks.iter().any(|c| c.starts_with("publication_count")));
    }

    #[test]
    fn test_disagreement_is_penalised() {
        let a = found("openalex_analyzer", AssessmentType::Legitimate, "Elsevier", 100);
        let b = found("crossref_analyzer", AssessmentType::Questionable, "Elsevier", 100);
        let outcome = PublisherMetadataValidator.validate("openalex_analyzer", &a, "crossref_analyzer", &b);
        assert!(!outcome.agreement);
        assert_eq!(outcome.confidence_adjustment, DISAGREEMENT_PENALTY);
        assert!(outcome.reasoning[0].starts_with("Backend disagreement"));
    }

    #[test]
    fn test_single_and_missing_sources() {
        let a = found("openalex_analyzer", AssessmentType::Legitimate, "Elsevier", 100);
        let missing = BackendResult::not_found("crossref_analyzer", EvidenceType::Heuristic);
        let outcome =
            PublisherMetadataValidator.validate("openalex_analyzer", &a, "crossref_analyzer", &missing);
        assert_eq!(outcome.confidence_adjustment, SINGLE_SOURCE_PENALTY);
        assert_eq!(outcome.reasoning, vec!["Only found in openalex_analyzer".to_string()]);

        let none = PublisherMetadataValidator.validate(
            "openalex_analyzer",
            &BackendResult::not_found("openalex_analyzer", EvidenceType::Heuristic),
            "crossref_analyzer",
            &missing,
        );
        assert_eq!(none.confidence_adjustment, 0.0);
        assert!(none.reasoning[0].contains("not found in either"));
    }

    #[test]
    fn test_agreeing_without_opinion_earns_nothing() {
        let opinionless = |name: &str| {
            BackendResult::found(name, EvidenceType::Heuristic, 0.4, None, json!({"publisher": "Elsevier"}))
        };
        let outcome = PublisherMetadataValidator.validate(
            "openalex_analyzer",
            &opinionless("openalex_analyzer"),
            "crossref_analyzer",
            &opinionless("crossref_analyzer"),
        );
        assert!(!outcome.agreement);
        assert_eq!(outcome.agreed_assessment, None);
        assert_eq!(outcome.confidence_adjustment, 0.0);
        assert!(outcome.reasoning[0].contains("neither gave an opinion"));
    }

    #[test]
    fn test_publication_count_mismatch_flagged() {
        let a = found("a", AssessmentType::Legitimate, "Wiley", 1000);
        let b = found("b", AssessmentType::Legitimate, "Elsevier", 300);
        let outcome = PublisherMetadataValidator.validate("a", &a, "b", &b);
        assert!(outcome.agreement);
        assert_eq!(outcome.confidence_adjustment, AGREEMENT_BONUS);
        assert!(outcome.reasoning.iter().any(|r| r.contains("Publication count mismatch")));
    }

    #[test]
    fn test_normalize_publisher() {
        assert_eq!(normalize_publisher("Springer-Verlag GmbH"), "springer verlag");
        assert_eq!(normalize_publisher("Press"), "press");
        assert!(publishers_consistent("Elsevier BV", "Elsevier"));
        assert!(!publishers_consistent("Elsevier", "Wiley"));
    }

    #[test]
    fn test_registry_lookup_is_order_independent() {
        let registry = CrossValidationRegistry::with_defaults();
        let a = found("openalex_analyzer", AssessmentType::Legitimate, "Elsevier", 100);
        let b = found("crossref_analyzer", AssessmentType::Legitimate, "Elsevier", 100);
        assert!(registry
            .validate_pair("crossref_analyzer", &b, "openalex_analyzer", &a)
            .is_some());
        assert!(registry.validate_pair("doaj", &a, "bealls", &b).is_none());
        assert_eq!(registry.pairs().len(), 1);
    }
}
