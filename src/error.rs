// Crate-wide error type. One enum, one place, matching the teacher's
// `store::StoreError` pattern of `#[from]` conversions over a single
// `thiserror` derive rather than ad hoc `anyhow::Error` boxing.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage unavailable: {0}")]
    Storage(String),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Migration(#[from] rusqlite_migration::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("canonicalization failed: {0}")]
    Canon(String),

    #[error("invalid token: {0}")]
    Token(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
