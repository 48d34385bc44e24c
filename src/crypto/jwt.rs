/// Compact JWTs signed with ML-DSA.
///
/// `base64url(header).base64url(claims).base64url(signature)`, header
/// `{alg, typ, kid}`. Verification re-checks the signature over the first two
/// segments and the `exp` claim, and returns `None` for either failure without
/// saying which one.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::crypto::sign::{self, SignatureLevel, SigningKeyPair};
use crate::encoding::{b64url_decode, b64url_encode};
use crate::error::{Result, VaultError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

/// Registered claims plus caller-defined ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject.
    pub sub: String,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Expiration time (Unix seconds).
    pub exp: i64,
    /// Token id.
    pub jti: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn new(sub: impl Into<String>, ttl: Duration) -> Self {
        Self::issued_at(sub, ttl, Utc::now())
    }

    pub fn issued_at(sub: impl Into<String>, ttl: Duration, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            sub: sub.into(),
            iat,
            exp: iat + ttl.num_seconds(),
            jti: Uuid::new_v4().to_string(),
            extra: Map::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Sign `claims` with `key`. The key must not be expired.
pub fn sign_jwt(claims: &Claims, key: &SigningKeyPair) -> Result<String> {
    sign_jwt_at(claims, key, Utc::now())
}

pub fn sign_jwt_at(claims: &Claims, key: &SigningKeyPair, now: DateTime<Utc>) -> Result<String> {
    let header = Header {
        alg: key.level.algorithm_name().to_string(),
        typ: "JWT".to_string(),
        kid: key.key_id.clone(),
    };

    let signing_input = format!(
        "{}.{}",
        b64url_encode(&serde_json::to_vec(&header)?),
        b64url_encode(&serde_json::to_vec(claims)?)
    );
    let signature = sign::sign_at(signing_input.as_bytes(), key, now)?;

    Ok(format!("{signing_input}.{}", b64url_encode(&signature.signature)))
}

/// Verify signature and expiry. `None` on any failure.
pub fn verify_jwt(token: &str, public_key: &[u8]) -> Option<Claims> {
    verify_jwt_at(token, public_key, Utc::now())
}

pub fn verify_jwt_at(token: &str, public_key: &[u8], now: DateTime<Utc>) -> Option<Claims> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let header: Header = serde_json::from_slice(&b64url_decode(header_b64).ok()?).ok()?;
    let level = SignatureLevel::from_public_key_len(public_key.len())?;
    if header.alg != level.algorithm_name() {
        return None;
    }

    let signature = b64url_decode(sig_b64).ok()?;
    let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
    let signature_ok = sign::verify(signing_input.as_bytes(), &signature, public_key);

    let claims: Option<Claims> = b64url_decode(claims_b64)
        .ok()
        .and_then(|raw| serde_json::from_slice(&raw).ok());

    match claims {
        Some(claims) if signature_ok && !claims.is_expired_at(now) => Some(claims),
        _ => None,
    }
}

/// Read the `kid` header without verifying anything. Used only to pick the
/// verification key.
pub fn peek_key_id(token: &str) -> Result<String> {
    let header_b64 = token
        .split('.')
        .next()
        .ok_or_else(|| VaultError::Serialization("empty token".into()))?;
    let header: Header = serde_json::from_slice(&b64url_decode(header_b64)?)?;
    Ok(header.kid)
}
