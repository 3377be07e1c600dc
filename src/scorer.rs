//! Composite hallucination / integrity risk scoring.
//!
//! Mirrors the shape of the teacher's `car::calculate_s_grade`: a handful of
//! independently-optional component scores combined by fixed weights into a
//! single number, except here the weights renormalize over only the
//! components that are actually present instead of assuming every component
//! is always available.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Loosely-typed optional inputs to the scorer. Every field absent from the
/// request is `None`, never a sentinel like `-1.0`.
#[derive(Debug, Clone, Default)]
pub struct Signals<'a> {
    pub answer: Option<&'a str>,
    pub retrieved_context: Option<&'a str>,
    pub secondary_answer: Option<&'a str>,
    pub verifier_score: Option<f64>,
    pub tool_result_summary: Option<&'a str>,
    pub tool_claims_success: Option<bool>,
    pub normalized_prompt_hash: Option<&'a str>,
    pub baseline_prompt_hash: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskVector {
    pub grounding_risk: Option<f64>,
    pub self_consistency_risk: Option<f64>,
    pub verifier_risk: Option<f64>,
    pub numeric_instability_risk: Option<f64>,
    pub tool_mismatch_risk: Option<f64>,
    pub drift_risk: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Weighted-average composite. `score` is `None` when no risk component was
/// present at all (spec §8 invariant 2): the policy engine must then treat
/// the request as if under LOW criticality regardless of the tool's actual
/// criticality, never as score `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Composite {
    pub score: Option<f64>,
    pub level: RiskLevel,
}

pub struct Weights {
    pub grounding: f64,
    pub self_consistency: f64,
    pub verifier: f64,
    pub numeric: f64,
    pub tool_mismatch: f64,
    pub drift: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Weights {
            grounding: 0.30,
            self_consistency: 0.25,
            verifier: 0.25,
            numeric: 0.10,
            tool_mismatch: 0.10,
            drift: 0.10,
        }
    }
}

pub struct Thresholds {
    pub low: f64,
    pub medium: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            low: 0.20,
            medium: 0.35,
        }
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .map(|tok| tok.to_lowercase())
        .collect()
}

/// Jaccard similarity over case-folded, punctuation-stripped, whitespace-split
/// tokens. Two empty sets are defined as fully overlapping (similarity 1.0);
/// one empty and one non-empty set has zero overlap.
fn jaccard(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(\.\d+)?").expect("static number regex is valid"));

fn extract_numbers(text: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect()
}

/// Coefficient of variation (sample stddev / mean-abs) of numbers extracted
/// from one or two answer strings, clipped to `[0, 1]`. Fewer than two
/// numbers total means there is nothing to be unstable about, so the risk is
/// `0.0` rather than undefined.
fn numeric_instability(primary: &str, secondary: Option<&str>) -> f64 {
    let mut numbers = extract_numbers(primary);
    if let Some(secondary) = secondary {
        numbers.extend(extract_numbers(secondary));
    }
    if numbers.len() < 2 {
        return 0.0;
    }
    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let variance =
        numbers.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / (numbers.len() - 1) as f64;
    let stddev = variance.sqrt();
    let cv = stddev / mean.abs();
    cv.clamp(0.0, 1.0)
}

fn level_for(score: f64, thresholds: &Thresholds) -> RiskLevel {
    if score < thresholds.low {
        RiskLevel::Low
    } else if score < thresholds.medium {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Computes the component `RiskVector` and the renormalized `Composite` for
/// one proposal. Absent signals drop out of both the numerator and the
/// denominator of the weighted average (re-derivation, not imputation).
pub fn score(signals: &Signals, weights: &Weights, thresholds: &Thresholds) -> (RiskVector, Composite) {
    let grounding_risk = match (signals.answer, signals.retrieved_context) {
        (Some(answer), Some(context)) => Some(1.0 - jaccard(answer, context)),
        _ => None,
    };

    let self_consistency_risk = match (signals.answer, signals.secondary_answer) {
        (Some(primary), Some(secondary)) => Some(1.0 - jaccard(primary, secondary)),
        _ => None,
    };

    let verifier_risk = signals.verifier_score.map(|v| (1.0 - v).clamp(0.0, 1.0));

    let numeric_instability_risk = signals
        .answer
        .map(|primary| numeric_instability(primary, signals.secondary_answer));

    let tool_mismatch_risk = match (signals.tool_result_summary, signals.tool_claims_success) {
        (Some(summary), Some(claims_success)) => {
            let summary_failed = summary.to_lowercase().contains("fail")
                || summary.to_lowercase().contains("declin")
                || summary.to_lowercase().contains("error");
            Some(if summary_failed && claims_success { 1.0 } else { 0.0 })
        }
        _ => None,
    };

    let drift_risk = match (signals.normalized_prompt_hash, signals.baseline_prompt_hash) {
        (Some(current), Some(baseline)) => Some(if current != baseline { 1.0 } else { 0.0 }),
        _ => None,
    };

    let vector = RiskVector {
        grounding_risk,
        self_consistency_risk,
        verifier_risk,
        numeric_instability_risk,
        tool_mismatch_risk,
        drift_risk,
    };

    let components: [(Option<f64>, f64); 6] = [
        (vector.grounding_risk, weights.grounding),
        (vector.self_consistency_risk, weights.self_consistency),
        (vector.verifier_risk, weights.verifier),
        (vector.numeric_instability_risk, weights.numeric),
        (vector.tool_mismatch_risk, weights.tool_mismatch),
        (vector.drift_risk, weights.drift),
    ];

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (risk, weight) in components {
        if let Some(risk) = risk {
            numerator += risk * weight;
            denominator += weight;
        }
    }

    let composite_score = if denominator > 0.0 {
        Some(numerator / denominator)
    } else {
        None
    };

    let level = level_for(composite_score.unwrap_or(0.0), thresholds);

    (
        vector,
        Composite {
            score: composite_score,
            level,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_absent_signals_yield_undefined_composite() {
        let (vector, composite) = score(&Signals::default(), &Weights::default(), &Thresholds::default());
        assert_eq!(vector, RiskVector::default());
        assert_eq!(composite.score, None);
    }

    #[test]
    fn identical_answer_and_context_has_zero_grounding_risk() {
        let signals = Signals {
            answer: Some("Transfer 100 to acct_123"),
            retrieved_context: Some("Transfer 100 to acct_123"),
            ..Default::default()
        };
        let (vector, _) = score(&signals, &Weights::default(), &Thresholds::default());
        assert_eq!(vector.grounding_risk, Some(0.0));
    }

    #[test]
    fn mismatched_tool_result_and_claimed_success_is_full_risk() {
        let signals = Signals {
            answer: Some("Transferred $9999 successfully"),
            tool_result_summary: Some("payment API failed"),
            tool_claims_success: Some(true),
            ..Default::default()
        };
        let (vector, _) = score(&signals, &Weights::default(), &Thresholds::default());
        assert_eq!(vector.tool_mismatch_risk, Some(1.0));
    }

    #[test]
    fn numeric_instability_needs_at_least_two_numbers() {
        assert_eq!(numeric_instability("only 1 number here", None), 0.0);
        let high = numeric_instability("1", Some("1000000"));
        assert!(high > 0.5);
    }

    #[test]
    fn levels_are_monotonic_in_score() {
        let thresholds = Thresholds::default();
        let low = level_for(0.0, &thresholds);
        let medium = level_for(0.25, &thresholds);
        let high = level_for(0.9, &thresholds);
        assert_eq!(low, RiskLevel::Low);
        assert_eq!(medium, RiskLevel::Medium);
        assert_eq!(high, RiskLevel::High);
    }

    proptest::proptest! {
        #[test]
        fn level_is_monotonic_over_random_scores(s1 in 0.0f64..1.0, s2 in 0.0f64..1.0) {
            let thresholds = Thresholds::default();
            let rank = |level: RiskLevel| match level {
                RiskLevel::Low => 0,
                RiskLevel::Medium => 1,
                RiskLevel::High => 2,
            };
            if s1 <= s2 {
                proptest::prop_assert!(rank(level_for(s1, &thresholds)) <= rank(level_for(s2, &thresholds)));
            }
        }
    }
}
