//! Proposer: orchestrates scoring, policy, token issue, and proposal
//! persistence for a single tool-invocation request (spec §4.6).
//!
//! Grounded on the teacher's `orchestrator::create_run`: resolve
//! configuration, validate/derive a few values, write one row (here, a
//! `Proposal`) inside the store, return an identifier plus a typed outcome —
//! just scoring and policy replace `create_run`'s budget/epsilon validation.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::canon;
use crate::config::Config;
use crate::error::Result;
use crate::policy::{self, Decision};
use crate::registry::Registry;
use crate::scorer::{self, RiskVector, Signals};
use crate::store::{Proposal, ProposalStore};
use crate::token::Codec;

#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub tool: String,
    pub args: Value,
}

/// Mirrors the `ProposalResponse` union in spec §6: either an `allow` (with
/// an optional commit token) or a deterministic `blocked`/`review` fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalResponse {
    Allow {
        proposal_id: String,
        commit_token: Option<String>,
    },
    Fallback {
        proposal_id: String,
        status: FallbackStatus,
        reason: &'static str,
        draft: Draft,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStatus {
    Blocked,
    Review,
}

/// Optional signals a caller supplies about one proposed tool invocation.
/// Every field beyond `tool_name`/`args`/`prompt`/`model_answer` is
/// independently omittable, matching the scorer's null-tolerant inputs.
#[derive(Debug, Clone, Default)]
pub struct ProposeRequest<'a> {
    pub tool_name: &'a str,
    pub args: Value,
    pub prompt: &'a str,
    pub model_answer: &'a str,
    pub secondary_answer: Option<&'a str>,
    pub tool_result_summary: Option<&'a str>,
    pub retrieved_context: Option<&'a str>,
    pub verifier_score: Option<f64>,
    /// Accepted for forward compatibility with per-template baselines; the
    /// current baseline key is `tool_name` alone (spec §9 Open Question,
    /// resolved in DESIGN.md), so this is not yet consulted.
    pub prompt_template_id: Option<&'a str>,
}

pub struct Proposer {
    registry: Registry,
    store: Arc<dyn ProposalStore>,
    codec: Codec,
    config: Config,
}

impl Proposer {
    pub fn new(registry: Registry, store: Arc<dyn ProposalStore>, config: Config) -> Result<Self> {
        let codec = Codec::new(config.signing_secret.clone())?;
        Ok(Proposer {
            registry,
            store,
            codec,
            config,
        })
    }

    pub fn propose(&self, request: ProposeRequest<'_>) -> Result<ProposalResponse> {
        let profile = self.registry.resolve(request.tool_name);

        let args_hash = canon::canonical_args_hash(&request.args)?;
        let prompt_hash = canon::prompt_hash(request.prompt);
        let normalized_prompt_hash = canon::normalized_prompt_hash(request.prompt);

        let baseline = self.store.get_baseline(request.tool_name)?;

        let signals = Signals {
            answer: Some(request.model_answer),
            retrieved_context: request.retrieved_context,
            secondary_answer: request.secondary_answer,
            verifier_score: request.verifier_score,
            tool_result_summary: request.tool_result_summary,
            tool_claims_success: request
                .tool_result_summary
                .map(|_| answer_claims_success(request.model_answer)),
            normalized_prompt_hash: Some(&normalized_prompt_hash),
            baseline_prompt_hash: baseline.as_deref(),
        };

        let (vector, composite) = scorer::score(
            &signals,
            &self.config.risk_weights,
            &self.config.risk_thresholds,
        );
        let outcome = policy::decide(&profile, &composite, &self.config.policy_thresholds);

        let proposal_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        match outcome.decision {
            Decision::Block | Decision::Review => {
                let proposal = Proposal {
                    proposal_id: proposal_id.clone(),
                    tool_name: request.tool_name.to_string(),
                    args_json: canon::canonical_json_string(&request.args)?,
                    prompt_hash,
                    composite_score: composite.score,
                    decision: outcome.decision,
                    token_required: false,
                    created_at,
                };
                self.store.put_proposal(&proposal)?;

                let reason = primary_risk_reason(&vector);
                log::warn!(
                    "proposal {proposal_id} for tool {:?} decided {:?} (score={:?}, reason={reason})",
                    request.tool_name,
                    outcome.decision,
                    composite.score,
                );

                let status = match outcome.decision {
                    Decision::Block => FallbackStatus::Blocked,
                    Decision::Review => FallbackStatus::Review,
                    Decision::Allow => unreachable!(),
                };
                Ok(ProposalResponse::Fallback {
                    proposal_id,
                    status,
                    reason,
                    draft: Draft {
                        tool: request.tool_name.to_string(),
                        args: request.args,
                    },
                })
            }
            Decision::Allow => {
                let proposal = Proposal {
                    proposal_id: proposal_id.clone(),
                    tool_name: request.tool_name.to_string(),
                    args_json: canon::canonical_json_string(&request.args)?,
                    prompt_hash,
                    composite_score: composite.score,
                    decision: Decision::Allow,
                    token_required: outcome.token_required,
                    created_at,
                };
                self.store.put_proposal(&proposal)?;

                log::debug!(
                    "proposal {proposal_id} for tool {:?} allowed (score={:?}, token_required={})",
                    request.tool_name,
                    composite.score,
                    outcome.token_required,
                );

                let commit_token = if outcome.token_required {
                    let issued = self.codec.issue(
                        &proposal_id,
                        request.tool_name,
                        &args_hash,
                        composite.score,
                        ChronoDuration::from_std(self.config.token_ttl)
                            .map_err(|err| crate::error::Error::Config(err.to_string()))?,
                        created_at,
                    )?;
                    Some(issued.blob)
                } else {
                    None
                };

                Ok(ProposalResponse::Allow {
                    proposal_id,
                    commit_token,
                })
            }
        }
    }
}

/// Heuristic signal of whether `answer` asserts the tool call succeeded,
/// used only to derive `tool_claims_success` for the scorer's
/// `tool_mismatch_risk` component (spec §4.2). Mirrors the scorer's own
/// failure-keyword check so both sides of the comparison use the same
/// vocabulary.
fn answer_claims_success(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    let claims_failure =
        lower.contains("fail") || lower.contains("declin") || lower.contains("error");
    !claims_failure
}

/// Selects a single, deterministic reason string from the risk vector for
/// the fallback payload (spec §9: "purely a function of the inputs and
/// policy outcome"). `tool_mismatch_risk` and `drift_risk` are binary
/// integrity signals and take priority over the continuous-valued
/// components when triggered, since either one alone is a direct sign of
/// misreporting rather than merely elevated uncertainty.
fn primary_risk_reason(vector: &RiskVector) -> &'static str {
    if matches!(vector.tool_mismatch_risk, Some(risk) if risk >= 0.5) {
        return "low_integrity";
    }
    if matches!(vector.drift_risk, Some(risk) if risk >= 0.5) {
        return "prompt_drift";
    }

    let candidates: [(Option<f64>, &'static str); 4] = [
        (vector.grounding_risk, "ungrounded_answer"),
        (vector.self_consistency_risk, "inconsistent_answers"),
        (vector.verifier_risk, "low_verifier_confidence"),
        (vector.numeric_instability_risk, "numeric_instability"),
    ];

    candidates
        .into_iter()
        .filter_map(|(risk, reason)| risk.map(|r| (r, reason)))
        .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, reason)| reason)
        .unwrap_or("undefined_risk")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Criticality, ToolProfile};
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    fn proposer(registry: Registry) -> Proposer {
        let store = Arc::new(MemoryStore::new());
        let config = Config::with_secret("k".repeat(32)).unwrap();
        Proposer::new(registry, store, config).unwrap()
    }

    #[test]
    fn high_criticality_low_risk_issues_token() {
        let registry = Registry::new();
        registry.register(ToolProfile::new("transfer_funds", Criticality::High));
        let proposer = proposer(registry);

        let response = proposer
            .propose(ProposeRequest {
                tool_name: "transfer_funds",
                args: json!({"amount": 100, "to": "acct_123"}),
                prompt: "Transfer 100 to acct_123",
                model_answer: "Transfer 100 to acct_123",
                retrieved_context: Some("Transfer 100 to acct_123"),
                verifier_score: Some(0.95),
                ..Default::default()
            })
            .unwrap();

        match response {
            ProposalResponse::Allow { commit_token, .. } => assert!(commit_token.is_some()),
            other => panic!("expected allow with token, got {other:?}"),
        }
    }

    #[test]
    fn high_criticality_tool_mismatch_is_blocked_with_deterministic_draft() {
        let registry = Registry::new();
        registry.register(ToolProfile::new("transfer_funds", Criticality::High));
        let proposer = proposer(registry);

        let args = json!({"amount": 100, "to": "acct_123"});
        let request = || ProposeRequest {
            tool_name: "transfer_funds",
            args: args.clone(),
            prompt: "Transfer 100 to acct_123",
            model_answer: "Transferred $9999 successfully",
            tool_result_summary: Some("payment API failed"),
            retrieved_context: Some("declined"),
            ..Default::default()
        };

        let first = proposer.propose(request()).unwrap();
        let second = proposer.propose(request()).unwrap();

        for response in [first, second] {
            match response {
                ProposalResponse::Fallback {
                    status,
                    reason,
                    draft,
                    ..
                } => {
                    assert_eq!(status, FallbackStatus::Blocked);
                    assert_eq!(reason, "low_integrity");
                    assert_eq!(draft.tool, "transfer_funds");
                    assert_eq!(draft.args, args);
                }
                other => panic!("expected fallback, got {other:?}"),
            }
        }
    }

    #[test]
    fn medium_criticality_in_review_band_has_no_token() {
        let registry = Registry::new();
        registry.register(ToolProfile::new("send_email", Criticality::Medium));
        let proposer = proposer(registry);

        let response = proposer
            .propose(ProposeRequest {
                tool_name: "send_email",
                args: json!({"to": "a@example.com"}),
                prompt: "Send a status update",
                model_answer: "one two three four five",
                secondary_answer: Some("six seven eight nine ten"),
                verifier_score: Some(0.16),
                ..Default::default()
            })
            .unwrap();

        match response {
            ProposalResponse::Fallback { status, .. } => assert_eq!(status, FallbackStatus::Review),
            other => panic!("expected review fallback, got {other:?}"),
        }
    }

    #[test]
    fn low_criticality_always_allows_without_token() {
        let registry = Registry::new();
        registry.register(ToolProfile::new("read_file", Criticality::Low));
        let proposer = proposer(registry);

        let response = proposer
            .propose(ProposeRequest {
                tool_name: "read_file",
                args: json!({"path": "/tmp/x"}),
                prompt: "Read the file",
                model_answer: "contents",
                ..Default::default()
            })
            .unwrap();

        match response {
            ProposalResponse::Allow { commit_token, .. } => assert!(commit_token.is_none()),
            other => panic!("expected allow without token, got {other:?}"),
        }
    }
}
