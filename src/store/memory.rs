//! In-memory `ProposalStore`, used by tests and by single-process deployments
//! that don't need durability across restarts (spec §5: a single `Mutex`
//! serializes all writers, same posture as the teacher's r2d2 pool capped at
//! one connection in its own test harness).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::Result;

use super::{CommitRecord, ConsumeOutcome, Proposal, ProposalStore};

#[derive(Default)]
struct Inner {
    proposals: HashMap<String, Proposal>,
    commits: Vec<CommitRecord>,
    nonces: HashMap<String, (String, DateTime<Utc>)>,
    baselines: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Test/diagnostic helper: every `CommitRecord` written for `proposal_id`,
    /// in insertion order. Exposed beyond `#[cfg(test)]` because embedders
    /// wiring up a new backend find it useful for parity checks against
    /// `SqliteStore`.
    pub fn commits_for(&self, proposal_id: &str) -> Vec<CommitRecord> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        inner
            .commits
            .iter()
            .filter(|commit| commit.proposal_id == proposal_id)
            .cloned()
            .collect()
    }
}

impl ProposalStore for MemoryStore {
    fn put_proposal(&self, proposal: &Proposal) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner
            .proposals
            .insert(proposal.proposal_id.clone(), proposal.clone());
        Ok(())
    }

    fn get_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.proposals.get(proposal_id).cloned())
    }

    fn put_commit(&self, commit: &CommitRecord) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.commits.push(commit.clone());
        Ok(())
    }

    fn consume_nonce(
        &self,
        nonce: &str,
        token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        if inner.nonces.contains_key(nonce) {
            return Ok(ConsumeOutcome::AlreadyExists);
        }
        inner
            .nonces
            .insert(nonce.to_string(), (token_id.to_string(), expires_at));
        Ok(ConsumeOutcome::Inserted)
    }

    fn purge_expired_nonces(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let before = inner.nonces.len();
        inner.nonces.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(before - inner.nonces.len())
    }

    fn get_baseline(&self, tool_name: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.baselines.get(tool_name).cloned())
    }

    fn put_baseline(&self, tool_name: &str, normalized_prompt_hash: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner
            .baselines
            .insert(tool_name.to_string(), normalized_prompt_hash.to_string());
        Ok(())
    }
}
