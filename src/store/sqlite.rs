//! SQLite-backed `ProposalStore`, for deployments that need durability
//! across process restarts. Grounded on the teacher's `store/mod.rs`
//! (`r2d2` pool + `rusqlite_migration` runner) and `store/policies.rs`
//! (`ON CONFLICT ... DO UPDATE` upserts, `query_row(...).optional()`).
//!
//! `consume_nonce` relies entirely on the `nonces.nonce` primary key: a
//! second insert of the same nonce hits `SQLITE_CONSTRAINT` and is mapped to
//! `ConsumeOutcome::AlreadyExists`, never a prior `SELECT` (spec §9).

use chrono::{DateTime, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::error::{Error, Result};
use crate::policy::Decision;

use super::{migrations, CommitDecision, CommitRecord, ConsumeOutcome, Proposal, ProposalStore};

pub type Pool = r2d2::Pool<SqliteConnectionManager>;

pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Opens (creating if necessary) a SQLite database at `path` and runs
    /// migrations to the latest schema version.
    pub fn open(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = r2d2::Pool::new(manager)?;
        Self::from_pool(pool)
    }

    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder().max_size(1).build(manager)?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: Pool) -> Result<Self> {
        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            migrations::runner().to_latest(&mut conn)?;
            log::info!(
                "sqlite store migrated to schema version {}",
                migrations::latest_version()
            );
        }
        Ok(SqliteStore { pool })
    }
}

fn decision_str(decision: Decision) -> &'static str {
    match decision {
        Decision::Allow => "allow",
        Decision::Review => "review",
        Decision::Block => "block",
    }
}

fn decision_from_str(raw: &str) -> Result<Decision> {
    match raw {
        "allow" => Ok(Decision::Allow),
        "review" => Ok(Decision::Review),
        "block" => Ok(Decision::Block),
        other => Err(Error::Storage(format!("unrecognized decision {other:?}"))),
    }
}

fn commit_decision_str(decision: CommitDecision) -> &'static str {
    match decision {
        CommitDecision::Committed => "committed",
        CommitDecision::Rejected => "rejected",
    }
}

fn commit_decision_from_str(raw: &str) -> Result<CommitDecision> {
    match raw {
        "committed" => Ok(CommitDecision::Committed),
        "rejected" => Ok(CommitDecision::Rejected),
        other => Err(Error::Storage(format!(
            "unrecognized commit decision {other:?}"
        ))),
    }
}

impl ProposalStore for SqliteStore {
    fn put_proposal(&self, proposal: &Proposal) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO proposals (proposal_id, tool_name, args_json, prompt_hash, composite_score, decision, token_required, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                proposal.proposal_id,
                proposal.tool_name,
                proposal.args_json,
                proposal.prompt_hash,
                proposal.composite_score,
                decision_str(proposal.decision),
                proposal.token_required,
                proposal.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT proposal_id, tool_name, args_json, prompt_hash, composite_score, decision, token_required, created_at
                 FROM proposals WHERE proposal_id = ?1",
                params![proposal_id],
                |row| {
                    let decision_raw: String = row.get(5)?;
                    let token_required: bool = row.get(6)?;
                    let created_at_raw: String = row.get(7)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        decision_raw,
                        token_required,
                        created_at_raw,
                    ))
                },
            )
            .optional()?;

        let Some((proposal_id, tool_name, args_json, prompt_hash, composite_score, decision_raw, token_required, created_at_raw)) = row else {
            return Ok(None);
        };

        Ok(Some(Proposal {
            proposal_id,
            tool_name,
            args_json,
            prompt_hash,
            composite_score,
            decision: decision_from_str(&decision_raw)?,
            token_required,
            created_at: created_at_raw
                .parse::<DateTime<Utc>>()
                .map_err(|err| Error::Storage(err.to_string()))?,
        }))
    }

    fn put_commit(&self, commit: &CommitRecord) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO commits (commit_id, proposal_id, token_id, decision, verification_reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                commit.commit_id,
                commit.proposal_id,
                commit.token_id,
                commit_decision_str(commit.decision),
                commit.verification_reason,
                commit.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn consume_nonce(
        &self,
        nonce: &str,
        token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ConsumeOutcome> {
        let conn = self.pool.get()?;
        let result = conn.execute(
            "INSERT INTO nonces (nonce, token_id, expires_at) VALUES (?1, ?2, ?3)",
            params![nonce, token_id, expires_at.to_rfc3339()],
        );
        match result {
            Ok(_) => Ok(ConsumeOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(ConsumeOutcome::AlreadyExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn purge_expired_nonces(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.pool.get()?;
        let purged = conn.execute(
            "DELETE FROM nonces WHERE expires_at <= ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(purged)
    }

    fn get_baseline(&self, tool_name: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let hash = conn
            .query_row(
                "SELECT prompt_hash FROM tool_prompt_baselines WHERE tool_name = ?1",
                params![tool_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    fn put_baseline(&self, tool_name: &str, normalized_prompt_hash: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO tool_prompt_baselines (tool_name, prompt_hash) VALUES (?1, ?2)
             ON CONFLICT(tool_name) DO UPDATE SET prompt_hash = excluded.prompt_hash",
            params![tool_name, normalized_prompt_hash],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(id: &str) -> Proposal {
        Proposal {
            proposal_id: id.to_string(),
            tool_name: "transfer_funds".to_string(),
            args_json: "{}".to_string(),
            prompt_hash: "h".to_string(),
            composite_score: Some(0.1),
            decision: Decision::Allow,
            token_required: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_proposal(&proposal("p1")).unwrap();
        let fetched = store.get_proposal("p1").unwrap().unwrap();
        assert_eq!(fetched.proposal_id, "p1");
        assert_eq!(fetched.decision, Decision::Allow);
    }

    #[test]
    fn missing_proposal_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_proposal("nope").unwrap().is_none());
    }

    #[test]
    fn second_consume_of_same_nonce_is_already_exists() {
        let store = SqliteStore::open_in_memory().unwrap();
        let expires = Utc::now() + chrono::Duration::seconds(60);
        let first = store.consume_nonce("n1", "t1", expires).unwrap();
        let second = store.consume_nonce("n1", "t2", expires).unwrap();
        assert_eq!(first, ConsumeOutcome::Inserted);
        assert_eq!(second, ConsumeOutcome::AlreadyExists);
    }

    #[test]
    fn baseline_upsert_replaces_prior_value() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put_baseline("transfer_funds", "hash-1").unwrap();
        store.put_baseline("transfer_funds", "hash-2").unwrap();
        assert_eq!(
            store.get_baseline("transfer_funds").unwrap(),
            Some("hash-2".to_string())
        );
    }

    #[test]
    fn purge_removes_only_expired_nonces() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .consume_nonce("old", "t1", now - chrono::Duration::seconds(1))
            .unwrap();
        store
            .consume_nonce("fresh", "t2", now + chrono::Duration::seconds(60))
            .unwrap();
        let purged = store.purge_expired_nonces(now).unwrap();
        assert_eq!(purged, 1);
    }
}
