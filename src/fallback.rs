//! Ordered identifier lookup strategies and the per-query attempt log.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::QueryInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    Issn,
    Eissn,
    NormalizedName,
    Aliases,
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackStrategy::Issn => write!(f, "issn"),
            FallbackStrategy::Eissn => write!(f, "eissn"),
            FallbackStrategy::NormalizedName => write!(f, "normalized_name"),
            FallbackStrategy::Aliases => write!(f, "aliases"),
        }
    }
}

/// Fixed priority order used by every backend
pub const DEFAULT_STRATEGIES: &[FallbackStrategy] = &[
    FallbackStrategy::Issn,
    FallbackStrategy::Eissn,
    FallbackStrategy::NormalizedName,
    FallbackStrategy::Aliases,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackAttempt {
    pub strategy: FallbackStrategy,
    pub success: bool,
    pub query_value: String,
    pub match_confidence: Option<f64>,
}

/// A concrete lookup to try: which strategy and with which value
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackCandidate {
    pub strategy: FallbackStrategy,
    pub value: String,
}

/// Attempt log for one query resolution. Not cached, not shared.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    strategies: Vec<FallbackStrategy>,
    attempts: Vec<FallbackAttempt>,
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new(DEFAULT_STRATEGIES.to_vec())
    }
}

impl FallbackChain {
    pub fn new(strategies: Vec<FallbackStrategy>) -> Self {
        FallbackChain {
            strategies,
            attempts: Vec::new(),
        }
    }

    /// Identifier-only chain for backends that cannot search by name
    pub fn identifiers_only() -> Self {
        Self::new(vec![FallbackStrategy::Issn, FallbackStrategy::Eissn])
    }

    pub fn strategies(&self) -> &[FallbackStrategy] {
        &self.strategies
    }

    /// Expand the configured strategies into concrete values for `query`,
    /// skipping identifiers the query does not carry.
    pub fn plan(&self, query: &QueryInput) -> Vec<FallbackCandidate> {
        let mut candidates = Vec::new();

        for strategy in &self.strategies {
            match strategy {
                FallbackStrategy::Issn => {
                    if let Some(issn) = query.issn() {
                        candidates.push(FallbackCandidate {
                            strategy: *strategy,
                            value: issn.to_string(),
                        });
                    }
                }
                FallbackStrategy::Eissn => {
                    if let Some(eissn) = query.eissn() {
                        candidates.push(FallbackCandidate {
                            strategy: *strategy,
                            value: eissn.to_string(),
                        });
                    }
                }
                FallbackStrategy::NormalizedName => {
                    if !query.normalized_name.is_empty() {
                        candidates.push(FallbackCandidate {
                            strategy: *strategy,
                            value: query.normalized_name.clone(),
                        });
                    }
                }
                FallbackStrategy::Aliases => {
                    for alias in &query.aliases {
                        candidates.push(FallbackCandidate {
                            strategy: *strategy,
                            value: alias.clone(),
                        });
                    }
                }
            }
        }

        candidates
    }

    pub fn log_attempt(
        &mut self,
        strategy: FallbackStrategy,
        success: bool,
        query_value: &str,
        match_confidence: Option<f64>,
    ) {
        self.attempts.push(FallbackAttempt {
            strategy,
            success,
            query_value: query_value.to_string(),
            match_confidence,
        });
    }

    pub fn attempts(&self) -> &[FallbackAttempt] {
        &self.attempts
    }

    /// First successful strategy, even if later attempts also succeeded.
    pub fn get_successful_strategy(&self) -> Option<FallbackStrategy> {
        self.attempts
            .iter()
            .find(|attempt| attempt.success)
            .map(|attempt| attempt.strategy)
    }

    /// Compact trace such as `issn(fail) → normalized_name(success, conf=0.85)`.
    pub fn get_attempt_summary(&self) -> String {
        if self.attempts.is_empty() {
            return "no attempts".to_string();
        }

        self.attempts
            .iter()
            .map(|attempt| match (attempt.success, attempt.match_confidence) {
                (true, Some(conf)) => format!("{}(success, conf={:.2})", attempt.strategy, conf),
                (true, None) => format!("{}(success)", attempt.strategy),
                (false, _) => format!("{}(fail)", attempt.strategy),
            })
            .collect::<Vec<_>>()
            .join(" → ")
    }
}
