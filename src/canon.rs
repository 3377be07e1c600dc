//! Deterministic canonicalization and hashing for tool arguments and prompts.
//!
//! `canonical_args_hash` and `prompt_hash`/`normalized_prompt_hash` are the
//! foundation every other component signs, stores, or compares against: the
//! token codec binds a token to `args_hash`, the scorer's drift signal
//! compares a `normalized_prompt_hash` to a stored baseline, and the store
//! persists `prompt_hash` on every proposal.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Serializes `value` with JCS (RFC 8785-shaped) canonicalization: keys
/// sorted lexicographically recursively, no insignificant whitespace. Same
/// pipeline the teacher's `intelexta-verify` CLI uses to recompute checkpoint
/// hashes (`serde_jcs::to_vec`), just not married to ed25519 signing.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_jcs::to_vec(value).map_err(|err| Error::Canon(err.to_string()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 hex of the canonical JSON form of `args`. Invariant to key
/// ordering and nesting order of the input map by construction (JCS sorts
/// recursively before we ever hash).
pub fn canonical_args_hash<T: Serialize + ?Sized>(args: &T) -> Result<String> {
    let canonical = canonical_json_bytes(args)?;
    Ok(sha256_hex(&canonical))
}

/// Canonical JSON of `value` as a `String`, for callers that persist it
/// (e.g. `Proposal::args_json`) rather than hash it. JCS output is always
/// valid UTF-8 JSON, so this only fails if serialization itself fails.
pub fn canonical_json_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = canonical_json_bytes(value)?;
    String::from_utf8(bytes).map_err(|err| Error::Canon(err.to_string()))
}

/// SHA-256 hex of the exact prompt bytes, no normalization.
pub fn prompt_hash(prompt: &str) -> String {
    sha256_hex(prompt.as_bytes())
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
    )
    .expect("static UUID regex is valid")
});

static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\d{4}-\d{2}-\d{2}[Tt ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?",
    )
    .expect("static timestamp regex is valid")
});

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-?\d+(\.\d+)?").expect("static number regex is valid")
});

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("static whitespace regex is valid"));

/// Normalizes `prompt` so that semantically-identical prompts issued at
/// different times, with different request ids or literal numbers, hash
/// identically: UUIDs -> `<uuid>`, ISO-8601 timestamps -> `<timestamp>`,
/// numeric literals -> `<number>`, whitespace runs collapsed, lowercased.
/// Order matters: UUIDs and timestamps must be substituted before the
/// generic number pattern, or their digit runs would be partially consumed
/// by `NUMBER_RE` first.
pub fn normalize_prompt(prompt: &str) -> String {
    let step1 = UUID_RE.replace_all(prompt, "<uuid>");
    let step2 = TIMESTAMP_RE.replace_all(&step1, "<timestamp>");
    let step3 = NUMBER_RE.replace_all(&step2, "<number>");
    let step4 = WHITESPACE_RE.replace_all(step3.trim(), " ");
    step4.to_lowercase()
}

/// SHA-256 hex of the normalized prompt. Used for `drift_risk`: compared
/// against the tool's stored `PromptBaseline`.
pub fn normalized_prompt_hash(prompt: &str) -> String {
    sha256_hex(normalize_prompt(prompt).as_bytes())
}
