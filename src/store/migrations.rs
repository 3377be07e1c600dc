//! Migration runner for the SQLite backend.
//!
//! Same shape as the teacher's `store::migrations`: a flat list of
//! `include_str!`'d `.sql` scripts fed to `rusqlite_migration::Migrations`.
//! This crate's schema (`proposals`, `commits`, `nonces`,
//! `tool_prompt_baselines`) is one migration rather than the teacher's
//! fourteen, since there's no prior schema history to replay.

use rusqlite_migration::{Migrations, M};

const MIGRATION_SCRIPTS: &[&str] = &[include_str!("migrations/V1__initial_schema.sql")];

pub fn runner() -> Migrations<'static> {
    let steps = MIGRATION_SCRIPTS
        .iter()
        .map(|sql| M::up(*sql))
        .collect::<Vec<_>>();
    Migrations::new(steps)
}

pub fn latest_version() -> i64 {
    MIGRATION_SCRIPTS.len() as i64
}
