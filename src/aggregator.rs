//! Reconciles every backend's evidence into one verdict with a reasoning trail.

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::backends::retraction::RiskLevel;
use crate::config::BackendSettings;
use crate::types::{
    AssessmentResult, AssessmentType, BackendResult, BackendStatus, EvidenceType, QueryInput,
};
use crate::validation::CrossValidationRegistry;
use crate::TARGET_ASSESSMENT;

pub const DEFAULT_WEIGHT: f64 = 1.0;
pub const LIST_CONFLICT_PENALTY: f64 = 0.20;

/// Accumulated support for one category
#[derive(Debug, Clone, Copy)]
struct Tally {
    assessment: AssessmentType,
    /// Σ weight × confidence
    score: f64,
    weight: f64,
}

impl Tally {
    fn mean_confidence(&self) -> f64 {
        if self.weight > 0.0 {
            self.score / self.weight
        } else {
            0.0
        }
    }
}

/// Ranking used to break exact score ties: the more alarming category wins.
fn severity(assessment: AssessmentType) -> u8 {
    match assessment {
        AssessmentType::Hijacked => 4,
        AssessmentType::Predatory => 3,
        AssessmentType::Questionable => 2,
        AssessmentType::Legitimate => 1,
        AssessmentType::Unknown => 0,
    }
}

#[derive(Clone)]
pub struct Aggregator {
    weights: HashMap<String, f64>,
    cross_validation: CrossValidationRegistry,
}

impl Aggregator {
    pub fn new(weights: HashMap<String, f64>, cross_validation: CrossValidationRegistry) -> Self {
        Aggregator {
            weights,
            cross_validation,
        }
    }

    pub fn from_settings(settings: &[BackendSettings], cross_validation: CrossValidationRegistry) -> Self {
        let weights = settings
            .iter()
            .map(|s| (s.name.clone(), s.weight))
            .collect();
        Self::new(weights, cross_validation)
    }

    pub fn weight_of(&self, backend_name: &str) -> f64 {
        self.weights
            .get(backend_name)
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }

    fn tally<'a>(&self, results: impl Iterator<Item = &'a BackendResult>) -> Vec<Tally> {
        let mut tallies: Vec<Tally> = Vec::new();
        for result in results {
            let Some(assessment) = result.assessment else {
                continue;
            };
            let weight = self.weight_of(&result.backend_name);
            match tallies.iter_mut().find(|t| t.assessment == assessment) {
                Some(tally) => {
                    tally.score += weight * result.confidence;
                    tally.weight += weight;
                }
                None => tallies.push(Tally {
                    assessment,
                    score: weight * result.confidence,
                    weight,
                }),
            }
        }
        tallies
    }

    fn winner(tallies: &[Tally]) -> Option<Tally> {
        tallies.iter().copied().max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(severity(a.assessment).cmp(&severity(b.assessment)))
        })
    }

    /// Combine `results` into a verdict. Never fails; `processing_time` is
    /// left for the caller to fill in.
    pub fn aggregate(&self, query: &QueryInput, results: Vec<BackendResult>) -> AssessmentResult {
        let mut reasoning = Vec::new();
        let found: Vec<&BackendResult> = results.iter().filter(|r| r.is_found()).collect();

        let (assessment, mut confidence) = if found.is_empty() {
            reasoning.push("No backend found this venue".to_string());
            (AssessmentType::Unknown, 0.0)
        } else {
            self.categorize(&found, &mut reasoning)
        };

        let retraction_shift = self.retraction_adjustment(&found, assessment, &mut reasoning);
        let cross_validation = self.cross_validate(&results, assessment, &mut reasoning);
        if assessment != AssessmentType::Unknown {
            confidence += retraction_shift;
            confidence += cross_validation
                .iter()
                .filter_map(|v| v["applied_adjustment"].as_f64())
                .sum::<f64>();
        }

        let unavailable: Vec<String> = results
            .iter()
            .filter(|r| matches!(r.status, BackendStatus::Error | BackendStatus::RateLimited))
            .map(|r| match &r.error_message {
                Some(message) => format!("{} ({})", r.backend_name, message),
                None => r.backend_name.clone(),
            })
            .collect();
        if !unavailable.is_empty() {
            reasoning.push(format!("Unavailable backends: {}", unavailable.join(", ")));
        }

        confidence = if assessment == AssessmentType::Unknown {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        let overall_score = self.overall_score(&found);
        info!(
            target: TARGET_ASSESSMENT,
            "{} -> {} (confidence {:.2}, score {:+.2}, {}/{} backends found it)",
            query.normalized_name,
            assessment,
            confidence,
            overall_score,
            found.len(),
            results.len()
        );

        AssessmentResult {
            input_query: query.raw_input.clone(),
            query_hash: query.query_hash(),
            assessment,
            confidence,
            overall_score,
            backend_results: results,
            reasoning,
            metadata: if cross_validation.is_empty() {
                None
            } else {
                Some(json!({ "cross_validation": cross_validation }))
            },
            processing_time: 0.0,
            cached: false,
        }
    }

    /// Category from list evidence when there is any, otherwise from heuristics.
    fn categorize(&self, found: &[&BackendResult], reasoning: &mut Vec<String>) -> (AssessmentType, f64) {
        let has_opinion = |r: &&&BackendResult| {
            r.assessment.is_some_and(|a| a != AssessmentType::Unknown)
        };
        let lists: Vec<&BackendResult> = found
            .iter()
            .filter(|r| r.evidence_type.is_list())
            .filter(has_opinion)
            .copied()
            .collect();

        if !lists.is_empty() {
            for result in &lists {
                reasoning.push(format!(
                    "Listed by {} as {} ({}, confidence {:.2})",
                    result.backend_name,
                    describe(result),
                    result.evidence_type,
                    result.confidence
                ));
            }
            let tallies = self.tally(lists.iter().copied());
            let Some(winner) = Self::winner(&tallies) else {
                return (AssessmentType::Unknown, 0.0);
            };
            let mut confidence = winner.mean_confidence();
            if tallies.len() > 1 {
                let categories: Vec<&str> = tallies.iter().map(|t| t.assessment.as_str()).collect();
                reasoning.push(format!(
                    "Conflicting list evidence ({}); confidence reduced by {:.2}",
                    categories.join(" vs "),
                    LIST_CONFLICT_PENALTY
                ));
                confidence -= LIST_CONFLICT_PENALTY;
            }
            debug!(target: TARGET_ASSESSMENT, "List evidence decided {}", winner.assessment);
            return (winner.assessment, confidence);
        }

        let heuristics: Vec<&BackendResult> = found
            .iter()
            .filter(|r| r.evidence_type == EvidenceType::Heuristic)
            .copied()
            .collect();
        let voting: Vec<&BackendResult> = heuristics.iter().filter(has_opinion).copied().collect();

        if !voting.is_empty() {
            for result in &voting {
                reasoning.push(format!(
                    "{} suggests {} (confidence {:.2})",
                    result.backend_name,
                    describe(result),
                    result.confidence
                ));
            }
            let tallies = self.tally(voting.iter().copied());
            let Some(winner) = Self::winner(&tallies) else {
                return (AssessmentType::Unknown, 0.0);
            };
            let total_weight: f64 = heuristics
                .iter()
                .map(|r| self.weight_of(&r.backend_name))
                .sum();
            let share = if total_weight > 0.0 {
                winner.weight / total_weight
            } else {
                0.0
            };
            if share < 1.0 {
                reasoning.push(format!(
                    "Heuristic evidence is split; {:.0}% of the weight supports {}",
                    share * 100.0,
                    winner.assessment
                ));
            }
            return (winner.assessment, winner.mean_confidence() * share);
        }

        if found.iter().all(|r| r.evidence_type == EvidenceType::QualityIndicator) {
            reasoning.push(
                "Only quality indicators matched; they cannot decide legitimacy on their own".to_string(),
            );
        } else {
            reasoning.push("Matching backends offered no categorical opinion".to_string());
        }
        (AssessmentType::Unknown, 0.0)
    }

    /// Confidence shift from retraction risk. Notes are recorded even when the
    /// verdict is UNKNOWN and the shift gets discarded.
    fn retraction_adjustment(
        &self,
        found: &[&BackendResult],
        assessment: AssessmentType,
        reasoning: &mut Vec<String>,
    ) -> f64 {
        let mut adjustment = 0.0;

        for result in found
            .iter()
            .filter(|r| r.evidence_type == EvidenceType::QualityIndicator)
        {
            let Some(risk) = result.data["risk_level"]
                .as_str()
                .and_then(|r| serde_json::from_value::<RiskLevel>(Value::from(r)).ok())
            else {
                continue;
            };
            let total = result.data["total_retractions"].as_i64().unwrap_or(0);

            let shift = match (risk, assessment) {
                (RiskLevel::Critical, AssessmentType::Legitimate) => -0.15,
                (RiskLevel::High, AssessmentType::Legitimate) => -0.10,
                (RiskLevel::Moderate, AssessmentType::Legitimate) => -0.05,
                (RiskLevel::Critical, AssessmentType::Predatory) => 0.10,
                (RiskLevel::High, AssessmentType::Predatory) => 0.05,
                _ => 0.0,
            };

            match risk {
                RiskLevel::Critical | RiskLevel::High => reasoning.push(format!(
                    "{} retraction risk: {} retractions recorded by {}",
                    if risk == RiskLevel::Critical { "Critical" } else { "High" },
                    total,
                    result.backend_name
                )),
                RiskLevel::Moderate => reasoning.push(format!(
                    "Moderate retraction risk: {} retractions recorded",
                    total
                )),
                RiskLevel::Low => reasoning.push(format!(
                    "{} retraction(s) on record, within normal range",
                    total
                )),
                RiskLevel::None => {}
            }
            adjustment += shift;
        }

        adjustment
    }

    /// Run every registered validator whose pair of backends both reported.
    ///
    /// A bonus only counts when the pair agreed on the verdict's category;
    /// agreement on another category counts against the verdict instead.
    fn cross_validate(
        &self,
        results: &[BackendResult],
        verdict: AssessmentType,
        reasoning: &mut Vec<String>,
    ) -> Vec<Value> {
        let by_name: HashMap<&str, &BackendResult> = results
            .iter()
            .map(|r| (r.backend_name.as_str(), r))
            .collect();

        let mut details = Vec::new();
        for (name_a, name_b) in self.cross_validation.pairs() {
            let (Some(result_a), Some(result_b)) =
                (by_name.get(name_a.as_str()), by_name.get(name_b.as_str()))
            else {
                continue;
            };
            let Some(outcome) = self
                .cross_validation
                .validate_pair(&name_a, result_a, &name_b, result_b)
            else {
                continue;
            };
            reasoning.extend(outcome.reasoning.iter().cloned());
            let applied = match outcome.agreed_assessment {
                Some(agreed) if agreed != verdict && outcome.confidence_adjustment > 0.0 => {
                    reasoning.push(format!(
                        "{} and {} agree on {}, which contradicts the {} verdict",
                        name_a, name_b, agreed, verdict
                    ));
                    -outcome.confidence_adjustment
                }
                _ => outcome.confidence_adjustment,
            };
            details.push(json!({
                "backends": [name_a, name_b],
                "agreement": outcome.agreement,
                "agreed_assessment": outcome.agreed_assessment,
                "confidence_adjustment": outcome.confidence_adjustment,
                "applied_adjustment": applied,
                "consistency_checks": outcome.consistency_checks,
                "reasoning": outcome.reasoning,
            }));
        }
        details
    }

    /// Signed weighted score in [-1, 1]; positive favours legitimacy.
    fn overall_score(&self, found: &[&BackendResult]) -> f64 {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for result in found {
            let Some(assessment) = result.assessment else {
                continue;
            };
            let weight = self.weight_of(&result.backend_name);
            numerator += weight * result.confidence * assessment.polarity();
            denominator += weight;
        }
        if denominator > 0.0 {
            (numerator / denominator).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

fn describe(result: &BackendResult) -> &'static str {
    result.assessment.map(|a| a.as_str()).unwrap_or("unknown")
}
