use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier map keys
pub const ISSN_KEY: &str = "issn";
pub const EISSN_KEY: &str = "eissn";

/// Venue type inferred from the query text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueType {
    Journal,
    Conference,
    Unknown,
}

impl fmt::Display for VenueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueType::Journal => write!(f, "journal"),
            VenueType::Conference => write!(f, "conference"),
            VenueType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Final (or per-backend) verdict category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentType {
    Legitimate,
    Predatory,
    Questionable,
    Hijacked,
    Unknown,
}

impl AssessmentType {
    /// Sign used for the overall score: positive favours legitimacy.
    pub fn polarity(&self) -> f64 {
        match self {
            AssessmentType::Legitimate => 1.0,
            AssessmentType::Predatory | AssessmentType::Hijacked => -1.0,
            AssessmentType::Questionable => -0.5,
            AssessmentType::Unknown => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentType::Legitimate => "legitimate",
            AssessmentType::Predatory => "predatory",
            AssessmentType::Questionable => "questionable",
            AssessmentType::Hijacked => "hijacked",
            AssessmentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AssessmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for AssessmentType {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "legitimate" => AssessmentType::Legitimate,
            "predatory" => AssessmentType::Predatory,
            "questionable" => AssessmentType::Questionable,
            "hijacked" => AssessmentType::Hijacked,
            _ => AssessmentType::Unknown,
        }
    }
}

/// Outcome of a single backend query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Found,
    NotFound,
    Error,
    RateLimited,
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendStatus::Found => write!(f, "found"),
            BackendStatus::NotFound => write!(f, "not_found"),
            BackendStatus::Error => write!(f, "error"),
            BackendStatus::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// What kind of signal a backend provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    PredatoryList,
    LegitimateList,
    QualityIndicator,
    Heuristic,
}

impl EvidenceType {
    /// List membership is categorical evidence and decides the verdict directly.
    pub fn is_list(&self) -> bool {
        matches!(self, EvidenceType::PredatoryList | EvidenceType::LegitimateList)
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceType::PredatoryList => write!(f, "predatory_list"),
            EvidenceType::LegitimateList => write!(f, "legitimate_list"),
            EvidenceType::QualityIndicator => write!(f, "quality_indicator"),
            EvidenceType::Heuristic => write!(f, "heuristic"),
        }
    }
}

/// Canonical query produced by the normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    pub raw_input: String,
    pub normalized_name: String,
    pub identifiers: BTreeMap<String, String>,
    pub aliases: Vec<String>,
    #[serde(default)]
    pub acronyms: Vec<String>,
    pub venue_type: VenueType,
}

impl QueryInput {
    pub fn issn(&self) -> Option<&str> {
        self.identifiers.get(ISSN_KEY).map(String::as_str)
    }

    pub fn eissn(&self) -> Option<&str> {
        self.identifiers.get(EISSN_KEY).map(String::as_str)
    }

    /// 32 lowercase hex characters identifying this query in the caches.
    ///
    /// Built from the lower-cased name plus the sorted identifier pairs, so two
    /// raw inputs that normalize the same way share cache rows.
    pub fn query_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized_name.to_lowercase().as_bytes());
        for (key, value) in &self.identifiers {
            hasher.update(b"|");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        digest[..32].to_string()
    }
}

/// Evidence returned by one backend for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResult {
    pub backend_name: String,
    pub status: BackendStatus,
    pub confidence: f64,
    pub assessment: Option<AssessmentType>,
    pub evidence_type: EvidenceType,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub sources: Vec<String>,
    pub response_time: f64,
    #[serde(default)]
    pub cached: bool,
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_after: Option<u64>,
    #[serde(default)]
    pub fallback_chain: Option<String>,
}

impl BackendResult {
    fn base(backend_name: &str, status: BackendStatus, evidence_type: EvidenceType) -> Self {
        BackendResult {
            backend_name: backend_name.to_string(),
            status,
            confidence: 0.0,
            assessment: None,
            evidence_type,
            data: Value::Null,
            sources: Vec::new(),
            response_time: 0.0,
            cached: false,
            error_message: None,
            retry_after: None,
            fallback_chain: None,
        }
    }

    pub fn found(
        backend_name: &str,
        evidence_type: EvidenceType,
        confidence: f64,
        assessment: Option<AssessmentType>,
        data: Value,
    ) -> Self {
        let mut result = Self::base(backend_name, BackendStatus::Found, evidence_type);
        result.confidence = confidence.clamp(0.0, 1.0);
        result.assessment = assessment;
        result.data = data;
        result
    }

    pub fn not_found(backend_name: &str, evidence_type: EvidenceType) -> Self {
        Self::base(backend_name, BackendStatus::NotFound, evidence_type)
    }

    pub fn error(backend_name: &str, evidence_type: EvidenceType, message: impl Into<String>) -> Self {
        let mut result = Self::base(backend_name, BackendStatus::Error, evidence_type);
        result.error_message = Some(message.into());
        result
    }

    pub fn rate_limited(
        backend_name: &str,
        evidence_type: EvidenceType,
        retry_after: Option<u64>,
    ) -> Self {
        let mut result = Self::base(backend_name, BackendStatus::RateLimited, evidence_type);
        result.retry_after = retry_after;
        result.error_message = Some(match retry_after {
            Some(secs) => format!("Rate limited, retry after {}s", secs),
            None => "Rate limited".to_string(),
        });
        result
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_response_time(mut self, seconds: f64) -> Self {
        self.response_time = seconds;
        self
    }

    pub fn with_fallback_chain(mut self, summary: String) -> Self {
        self.fallback_chain = Some(summary);
        self
    }

    pub fn is_found(&self) -> bool {
        self.status == BackendStatus::Found
    }

    /// Only definitive answers are worth persisting; transient failures are retried next time.
    pub fn is_cacheable(&self) -> bool {
        matches!(self.status, BackendStatus::Found | BackendStatus::NotFound)
    }
}

/// The verdict returned to callers and stored in the assessment cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub input_query: String,
    pub query_hash: String,
    pub assessment: AssessmentType,
    pub confidence: f64,
    pub overall_score: f64,
    pub backend_results: Vec<BackendResult>,
    pub reasoning: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub processing_time: f64,
    #[serde(default)]
    pub cached: bool,
}

impl AssessmentResult {
    pub fn result_for(&self, backend_name: &str) -> Option<&BackendResult> {
        self.backend_results
            .iter()
            .find(|result| result.backend_name == backend_name)
    }
}

/// One venue row produced by a data-source collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalRecord {
    pub journal_name: String,
    pub normalized_name: String,
    pub issn: Option<String>,
    pub eissn: Option<String>,
    pub publisher: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl JournalRecord {
    pub fn new(journal_name: &str, normalized_name: &str) -> Self {
        JournalRecord {
            journal_name: journal_name.to_string(),
            normalized_name: normalized_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_issn(mut self, issn: &str) -> Self {
        self.issn = Some(issn.to_string());
        self
    }

    pub fn with_eissn(mut self, eissn: &str) -> Self {
        self.eissn = Some(eissn.to_string());
        self
    }

    pub fn with_publisher(mut self, publisher: &str) -> Self {
        self.publisher = Some(publisher.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(name: &str, issn: Option<&str>) -> QueryInput {
        let mut identifiers = BTreeMap::new();
        if let Some(issn) = issn {
            identifiers.insert(ISSN_KEY.to_string(), issn.to_string());
        }
        QueryInput {
            raw_input: name.to_string(),
            normalized_name: name.to_string(),
            identifiers,
            aliases: Vec::new(),
            acronyms: Vec::new(),
            venue_type: VenueType::Unknown,
        }
    }

    #[test]
    fn test_query_hash_shape() {
        let hash = query("Nature", Some("0028-0836")).query_hash();
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_query_hash_ignores_case_but_not_identifiers() {
        assert_eq!(
            query("Nature", None).query_hash(),
            query("NATURE", None).query_hash()
        );
        assert_ne!(
            query("Nature", None).query_hash(),
            query("Nature", Some("0028-0836")).query_hash()
        );
    }

    #[test]
    fn test_assessment_type_round_trip_strings() {
        assert_eq!(AssessmentType::from("Predatory"), AssessmentType::Predatory);
        assert_eq!(AssessmentType::from("hijacked"), AssessmentType::Hijacked);
        assert_eq!(AssessmentType::from("nonsense"), AssessmentType::Unknown);
        assert_eq!(
            serde_json::to_string(&BackendStatus::RateLimited).unwrap(),
            "\"rate_limited\""
        );
    }

    #[test]
    fn test_only_definitive_results_are_cacheable() {
        let found = BackendResult::found("x", EvidenceType::Heuristic, 0.7, None, Value::Null);
        let missing = BackendResult::not_found("x", EvidenceType::Heuristic);
        let failed = BackendResult::error("x", EvidenceType::Heuristic, "boom");
        let limited = BackendResult::rate_limited("x", EvidenceType::Heuristic, Some(3));
        assert!(found.is_cacheable());
        assert!(missing.is_cacheable());
        assert!(!failed.is_cacheable());
        assert!(!limited.is_cacheable());
        assert_eq!(limited.retry_after, Some(3));
    }
}
