//! Policy matrix: maps (tool criticality, composite score) to a decision and
//! a token-required flag. Grounded on the teacher's `governance::enforce_*`
//! family — small, pure functions returning a typed outcome rather than
//! throwing — generalized from budget checks to the risk-based decision
//! table in spec §4.3.

use serde::{Deserialize, Serialize};

use crate::registry::{Criticality, ToolProfile};
use crate::scorer::Composite;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allow,
    Review,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub decision: Decision,
    pub token_required: bool,
}

/// Score thresholds used by the policy table. Kept separate from the
/// scorer's own low/medium/high level thresholds (spec §4.2) because the
/// policy table's boundaries (0.20, 0.35, 0.50) are policy concerns, not
/// scoring concerns, even though the HIGH row happens to reuse the scorer's
/// numbers.
pub struct PolicyThresholds {
    pub high_block: f64,
    pub high_review: f64,
    pub medium_review: f64,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        PolicyThresholds {
            high_block: 0.35,
            high_review: 0.20,
            medium_review: 0.50,
        }
    }
}

/// Decides whether a proposal is allowed, must be reviewed, or is blocked,
/// and whether an ALLOW must still carry an execution token.
///
/// Boundaries are closed on the upper side, exactly as spec §4.3 states:
/// a HIGH-criticality tool at `score == 0.35` is BLOCK, not REVIEW.
pub fn decide(profile: &ToolProfile, composite: &Composite, thresholds: &PolicyThresholds) -> PolicyOutcome {
    match profile.criticality {
        Criticality::High => match composite.score {
            Some(score) if score >= thresholds.high_block => PolicyOutcome {
                decision: Decision::Block,
                token_required: false,
            },
            Some(score) if score >= thresholds.high_review => PolicyOutcome {
                decision: Decision::Review,
                token_required: false,
            },
            // Some(score) < high_review, or None (undefined composite):
            // spec invariant 2 requires HIGH with an undefined composite to
            // resolve the same way as HIGH-with-low-score: ALLOW w/ token.
            _ => PolicyOutcome {
                decision: Decision::Allow,
                token_required: true,
            },
        },
        Criticality::Medium => match composite.score {
            Some(score) if score >= thresholds.medium_review => PolicyOutcome {
                decision: Decision::Review,
                token_required: false,
            },
            _ => PolicyOutcome {
                decision: Decision::Allow,
                token_required: profile.require_token_on_medium_allow,
            },
        },
        Criticality::Low => PolicyOutcome {
            decision: Decision::Allow,
            token_required: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::RiskLevel;

    fn composite(score: Option<f64>) -> Composite {
        Composite {
            score,
            level: RiskLevel::Low,
        }
    }

    #[test]
    fn high_criticality_blocks_at_or_above_threshold() {
        let profile = ToolProfile::new("transfer_funds", Criticality::High);
        let outcome = decide(&profile, &composite(Some(0.35)), &PolicyThresholds::default());
        assert_eq!(outcome.decision, Decision::Block);
    }

    #[test]
    fn high_criticality_reviews_in_band() {
        let profile = ToolProfile::new("transfer_funds", Criticality::High);
        let outcome = decide(&profile, &composite(Some(0.25)), &PolicyThresholds::default());
        assert_eq!(outcome.decision, Decision::Review);
    }

    #[test]
    fn high_criticality_allows_with_token_below_band() {
        let profile = ToolProfile::new("transfer_funds", Criticality::High);
        let outcome = decide(&profile, &composite(Some(0.05)), &PolicyThresholds::default());
        assert_eq!(outcome.decision, Decision::Allow);
        assert!(outcome.token_required);
    }

    #[test]
    fn high_criticality_with_undefined_composite_allows_with_token() {
        let profile = ToolProfile::new("transfer_funds", Criticality::High);
        let outcome = decide(&profile, &composite(None), &PolicyThresholds::default());
        assert_eq!(outcome.decision, Decision::Allow);
        assert!(outcome.token_required);
    }

    #[test]
    fn medium_criticality_reviews_at_half() {
        let profile = ToolProfile::new("send_email", Criticality::Medium);
        let outcome = decide(&profile, &composite(Some(0.5)), &PolicyThresholds::default());
        assert_eq!(outcome.decision, Decision::Review);
    }

    /// §8 scenario 5 claims a MEDIUM tool at composite 0.42 resolves to
    /// REVIEW; that contradicts this table's own `medium_review` threshold
    /// of 0.50 stated two lines above in §4.3. This crate follows the
    /// table, not the scenario prose — see DESIGN.md's "a second spec
    /// inconsistency, resolved" note.
    #[test]
    fn medium_criticality_allows_without_token_at_point_four_two() {
        let profile = ToolProfile::new("send_email", Criticality::Medium);
        let outcome = decide(&profile, &composite(Some(0.42)), &PolicyThresholds::default());
        assert_eq!(outcome.decision, Decision::Allow);
        assert!(!outcome.token_required);
    }

    #[test]
    fn low_criticality_always_allows() {
        let profile = ToolProfile::new("read_file", Criticality::Low);
        let outcome = decide(&profile, &composite(Some(0.99)), &PolicyThresholds::default());
        assert_eq!(outcome.decision, Decision::Allow);
        assert!(!outcome.token_required);
    }

    #[test]
    fn review_and_block_never_issue_tokens() {
        let profile = ToolProfile::new("transfer_funds", Criticality::High);
        for score in [0.20, 0.30, 0.35, 0.9] {
            let outcome = decide(&profile, &composite(Some(score)), &PolicyThresholds::default());
            if matches!(outcome.decision, Decision::Review | Decision::Block) {
                assert!(!outcome.token_required);
            }
        }
    }
}
