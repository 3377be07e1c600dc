//! Verifier: the commit-time half of the protocol (spec §4.7). Checks a
//! proposal's existence and decision, the token's signature/expiry/binding,
//! and consumes the nonce atomically before reporting success — producing
//! exactly one `CommitRecord` regardless of outcome.
//!
//! Grounded on the teacher's `intelexta-verify` CLI: a typed report struct
//! accumulated across a fixed sequence of checks, each one a distinct,
//! named failure mode rather than a single boolean.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::canon;
use crate::error::Result;
use crate::policy::Decision;
use crate::store::{CommitDecision, CommitRecord, ConsumeOutcome, ProposalStore};
use crate::token::{Codec, VerifyError};

/// One row of spec §7's enumerated outcome table, restricted to the kinds a
/// `commit` call can itself produce (`storage_unavailable` instead surfaces
/// as an `Err` from the underlying store call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitReason {
    Ok,
    UnknownProposal,
    BlockedByPolicy,
    MissingToken,
    BadSignature,
    Expired,
    ArgsHashMismatch,
    ToolMismatch,
    NonceReplay,
}

impl CommitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitReason::Ok => "ok",
            CommitReason::UnknownProposal => "unknown_proposal",
            CommitReason::BlockedByPolicy => "blocked_by_policy",
            CommitReason::MissingToken => "missing_token",
            CommitReason::BadSignature => "bad_signature",
            CommitReason::Expired => "expired",
            CommitReason::ArgsHashMismatch => "args_hash_mismatch",
            CommitReason::ToolMismatch => "tool_mismatch",
            CommitReason::NonceReplay => "nonce_replay",
        }
    }
}

impl From<VerifyError> for CommitReason {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Malformed(_) => CommitReason::BadSignature,
            VerifyError::BadSignature => CommitReason::BadSignature,
            VerifyError::Expired => CommitReason::Expired,
            VerifyError::ToolMismatch => CommitReason::ToolMismatch,
            VerifyError::ArgsHashMismatch => CommitReason::ArgsHashMismatch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: bool,
    pub reason: CommitReason,
}

pub struct Verifier {
    store: Arc<dyn ProposalStore>,
    codec: Codec,
}

impl Verifier {
    pub fn new(store: Arc<dyn ProposalStore>, codec: Codec) -> Self {
        Verifier { store, codec }
    }

    /// Executes spec §4.7's commit algorithm. `now` is threaded in explicitly
    /// (rather than read from the wall clock here) so token expiry and
    /// replay tests are reproducible.
    pub fn commit(
        &self,
        proposal_id: &str,
        token_blob: Option<&str>,
        args: &Value,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome> {
        let outcome = self.commit_inner(proposal_id, token_blob, args, now)?;
        self.record(proposal_id, outcome)?;
        Ok(outcome)
    }

    fn commit_inner(
        &self,
        proposal_id: &str,
        token_blob: Option<&str>,
        args: &Value,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcomeDetail> {
        let Some(proposal) = self.store.get_proposal(proposal_id)? else {
            return Ok(CommitOutcomeDetail::rejected(CommitReason::UnknownProposal, None));
        };

        if proposal.decision != Decision::Allow {
            return Ok(CommitOutcomeDetail::rejected(
                CommitReason::BlockedByPolicy,
                None,
            ));
        }

        let Some(token_blob) = token_blob else {
            if proposal.token_required {
                return Ok(CommitOutcomeDetail::rejected(CommitReason::MissingToken, None));
            }
            // Spec §4.6 step 7: ALLOW without a required token commits
            // directly by proposal_id, no codec/nonce involvement.
            return Ok(CommitOutcomeDetail::committed(None));
        };

        let args_hash = canon::canonical_args_hash(args)?;

        let payload = match self
            .codec
            .verify(token_blob, &proposal.tool_name, &args_hash, now)
        {
            Ok(payload) => payload,
            Err(err) => {
                return Ok(CommitOutcomeDetail::rejected(err.into(), None));
            }
        };

        match self
            .store
            .consume_nonce(&payload.nonce, &payload.token_id, payload.expires_at)?
        {
            ConsumeOutcome::AlreadyExists => Ok(CommitOutcomeDetail::rejected(
                CommitReason::NonceReplay,
                Some(payload.token_id),
            )),
            ConsumeOutcome::Inserted => {
                Ok(CommitOutcomeDetail::committed(Some(payload.token_id)))
            }
        }
    }

    fn record(&self, proposal_id: &str, detail: CommitOutcomeDetail) -> Result<CommitOutcome> {
        if detail.committed {
            log::debug!("commit for proposal {proposal_id} succeeded");
        } else if detail.reason == CommitReason::NonceReplay {
            log::warn!("commit for proposal {proposal_id} rejected: nonce replay detected");
        } else {
            log::debug!(
                "commit for proposal {proposal_id} rejected: {}",
                detail.reason.as_str()
            );
        }

        let commit_record = CommitRecord {
            commit_id: Uuid::new_v4().to_string(),
            proposal_id: proposal_id.to_string(),
            token_id: detail.token_id,
            decision: if detail.committed {
                CommitDecision::Committed
            } else {
                CommitDecision::Rejected
            },
            verification_reason: detail.reason.as_str().to_string(),
            created_at: Utc::now(),
        };
        self.store.put_commit(&commit_record)?;

        Ok(CommitOutcome {
            committed: detail.committed,
            reason: detail.reason,
        })
    }
}

struct CommitOutcomeDetail {
    committed: bool,
    reason: CommitReason,
    token_id: Option<String>,
}

impl CommitOutcomeDetail {
    fn committed(token_id: Option<String>) -> Self {
        CommitOutcomeDetail {
            committed: true,
            reason: CommitReason::Ok,
            token_id,
        }
    }

    fn rejected(reason: CommitReason, token_id: Option<String>) -> Self {
        CommitOutcomeDetail {
            committed: false,
            reason,
            token_id,
        }
    }
}
