//! Proposal store: the pluggable persistence contract for proposals,
//! commits, consumed nonces, and prompt baselines.
//!
//! Structured the way the teacher splits `store/` into one file per concern
//! (`policies.rs`, `project_usage_ledgers.rs`) behind a shared `mod.rs`, just
//! with a `trait` at the top so the in-memory and SQLite backends are
//! interchangeable rather than both being ad hoc free functions over a
//! concrete `Connection`.

pub mod memory;
pub mod migrations;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::policy::Decision;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub tool_name: String,
    pub args_json: String,
    pub prompt_hash: String,
    pub composite_score: Option<f64>,
    pub decision: Decision,
    /// Whether the policy outcome at propose-time required a token for this
    /// proposal to be committed. Not one of spec §3's literal `Proposal`
    /// fields, but needed to implement §4.7 step 3 (`missing_token`) without
    /// the Verifier re-running the policy engine against stale signals; see
    /// DESIGN.md.
    pub token_required: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitDecision {
    Committed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub commit_id: String,
    pub proposal_id: String,
    pub token_id: Option<String>,
    pub decision: CommitDecision,
    pub verification_reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Inserted,
    AlreadyExists,
}

/// Pluggable proposal/commit/nonce/baseline persistence. Every method may
/// suspend on I/O (spec §5); none of them may observe or leave partial state
/// — a row exists after a call returns `Ok`, or it never existed.
pub trait ProposalStore: Send + Sync {
    fn put_proposal(&self, proposal: &Proposal) -> Result<()>;
    fn get_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>>;
    fn put_commit(&self, commit: &CommitRecord) -> Result<()>;

    /// Atomically inserts `(nonce, token_id, expires_at)`. On conflict,
    /// returns `AlreadyExists` without modifying the existing row. This is
    /// the sole replay boundary (spec §9): implementations MUST rely on a
    /// uniqueness constraint or a single-writer lock, never a scan.
    fn consume_nonce(
        &self,
        nonce: &str,
        token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ConsumeOutcome>;

    /// Idempotent housekeeping: removes nonce rows whose `expires_at` has
    /// passed as of `now`.
    fn purge_expired_nonces(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Administrative read used by the scorer's drift signal.
    fn get_baseline(&self, tool_name: &str) -> Result<Option<String>>;

    /// Administrative write. Not called by the scorer's read path (spec §9
    /// Open Question: baselines are administratively updated, read-only to
    /// the scorer).
    fn put_baseline(&self, tool_name: &str, normalized_prompt_hash: &str) -> Result<()>;
}
