//! HMAC-signed execution tokens: issue, wire encoding, and verification.
//!
//! The teacher signs CAR receipts and checkpoints with `ed25519-dalek`
//! (`provenance::sign_bytes` / `car.rs`'s `signatures` field). Spec §4.4
//! calls for a symmetric, single-process capability token instead of an
//! asymmetric receipt signature, so this module keeps the teacher's
//! structuring — canonicalize payload, sign, attach signature, encode as a
//! single string — but signs with `hmac`+`sha2` and compares in constant
//! time with `subtle` on verify.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::canon::canonical_json_bytes;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub token_id: String,
    pub proposal_id: String,
    pub tool_name: String,
    pub tool_args_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub nonce: String,
    pub composite_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub payload: TokenPayload,
    pub blob: String,
}

/// Distinct failure reasons for a commit attempt, one per spec §7 row that
/// the codec itself can detect (replay and storage failures are the
/// Verifier's and Store's responsibility, not the codec's).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    Malformed(String),
    BadSignature,
    Expired,
    ToolMismatch,
    ArgsHashMismatch,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::Malformed(reason) => write!(f, "malformed token: {reason}"),
            VerifyError::BadSignature => write!(f, "bad_signature"),
            VerifyError::Expired => write!(f, "expired"),
            VerifyError::ToolMismatch => write!(f, "tool_mismatch"),
            VerifyError::ArgsHashMismatch => write!(f, "args_hash_mismatch"),
        }
    }
}

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn b64url_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn b64url_decode(s: &str) -> std::result::Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|err| err.to_string())
}

/// Issues and verifies HMAC-signed execution tokens against a single process
/// signing secret. The secret is read-only after construction (spec §5) and
/// is never itself persisted with a proposal or token.
pub struct Codec {
    secret: Vec<u8>,
}

impl Codec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "signing_secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        Ok(Codec { secret })
    }

    fn mac_over(&self, payload_bytes: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| Error::Token(err.to_string()))?;
        mac.update(payload_bytes);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Builds and signs a new execution token bound to `(proposal_id,
    /// tool_name, tool_args_hash, composite_score)`, expiring after `ttl`.
    pub fn issue(
        &self,
        proposal_id: &str,
        tool_name: &str,
        tool_args_hash: &str,
        composite_score: Option<f64>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        let payload = TokenPayload {
            token_id: random_id(),
            proposal_id: proposal_id.to_string(),
            tool_name: tool_name.to_string(),
            tool_args_hash: tool_args_hash.to_string(),
            issued_at: now,
            expires_at: now + ttl,
            nonce: random_id(),
            composite_score,
        };

        let payload_bytes = canonical_json_bytes(&payload)?;
        let signature = self.mac_over(&payload_bytes)?;

        let blob = format!(
            "{}.{}",
            b64url_encode(&payload_bytes),
            b64url_encode(&signature)
        );

        Ok(IssuedToken { payload, blob })
    }

    /// Parses `blob`, recomputes the HMAC in constant time, and checks
    /// expiry and tool/args binding. Does NOT consume the nonce — that is
    /// the Verifier's atomic responsibility (spec §4.4, §4.7 step 6).
    pub fn verify(
        &self,
        blob: &str,
        expected_tool: &str,
        expected_args_hash: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<TokenPayload, VerifyError> {
        let (payload_b64, signature_b64) = blob
            .split_once('.')
            .ok_or_else(|| VerifyError::Malformed("missing '.' separator".to_string()))?;

        let payload_bytes =
            b64url_decode(payload_b64).map_err(VerifyError::Malformed)?;
        let signature_bytes =
            b64url_decode(signature_b64).map_err(VerifyError::Malformed)?;

        let expected_signature = self
            .mac_over(&payload_bytes)
            .map_err(|err| VerifyError::Malformed(err.to_string()))?;

        let signatures_match: bool = expected_signature
            .ct_eq(&signature_bytes)
            .unwrap_u8()
            == 1;
        if !signatures_match {
            return Err(VerifyError::BadSignature);
        }

        let payload: TokenPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|err| VerifyError::Malformed(err.to_string()))?;

        if now >= payload.expires_at {
            return Err(VerifyError::Expired);
        }
        if payload.tool_name != expected_tool {
            return Err(VerifyError::ToolMismatch);
        }
        if payload.tool_args_hash != expected_args_hash {
            return Err(VerifyError::ArgsHashMismatch);
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> Codec {
        Codec::new("k".repeat(32)).unwrap()
    }

    #[test]
    fn issued_token_verifies_with_matching_tool_and_args() {
        let codec = codec();
        let now = Utc::now();
        let issued = codec
            .issue("prop-1", "transfer_funds", "hash-abc", Some(0.1), Duration::seconds(60), now)
            .unwrap();
        let verified = codec
            .verify(&issued.blob, "transfer_funds", "hash-abc", now)
            .unwrap();
        assert_eq!(verified.token_id, issued.payload.token_id);
        assert_eq!(verified.nonce, issued.payload.nonce);
    }

    #[test]
    fn single_bit_mutation_yields_bad_signature() {
        let codec = codec();
        let now = Utc::now();
        let issued = codec
            .issue("prop-1", "transfer_funds", "hash-abc", None, Duration::seconds(60), now)
            .unwrap();

        let mut bytes = issued.blob.into_bytes();
        let flip_at = bytes.len() - 1;
        bytes[flip_at] ^= 0x01;
        let mutated = String::from_utf8(bytes).unwrap();

        let result = codec.verify(&mutated, "transfer_funds", "hash-abc", now);
        assert!(matches!(
            result,
            Err(VerifyError::BadSignature) | Err(VerifyError::Malformed(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = codec();
        let now = Utc::now();
        let issued = codec
            .issue("prop-1", "t", "h", None, Duration::milliseconds(1), now)
            .unwrap();
        let later = now + Duration::milliseconds(10);
        let result = codec.verify(&issued.blob, "t", "h", later);
        assert_eq!(result, Err(VerifyError::Expired));
    }

    #[test]
    fn args_tampering_is_rejected() {
        let codec = codec();
        let now = Utc::now();
        let issued = codec
            .issue("prop-1", "t", "hash-original", None, Duration::seconds(60), now)
            .unwrap();
        let result = codec.verify(&issued.blob, "t", "hash-tampered", now);
        assert_eq!(result, Err(VerifyError::ArgsHashMismatch));
    }

    #[test]
    fn tool_mismatch_is_rejected() {
        let codec = codec();
        let now = Utc::now();
        let issued = codec
            .issue("prop-1", "transfer_funds", "hash-abc", None, Duration::seconds(60), now)
            .unwrap();
        let result = codec.verify(&issued.blob, "delete_account", "hash-abc", now);
        assert_eq!(result, Err(VerifyError::ToolMismatch));
    }

    #[test]
    fn secret_below_minimum_length_is_rejected() {
        let result = Codec::new("short");
        assert!(result.is_err());
    }
}
