/// Post-quantum signatures over ML-DSA (CRYSTALS-Dilithium) at three levels.
///
/// Signing with an expired key is a hard error. Verification is a pure
/// predicate: any mismatch (message, key, corrupted signature) is `false`,
/// and signatures made before expiry keep verifying afterwards.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use serde::{Deserialize, Serialize};

use crate::crypto::hash;
use crate::crypto::kem::new_key_id;
use crate::crypto::sensitive::SensitiveVec;
use crate::encoding::serde_b64;
use crate::error::{Result, VaultError};
use crate::keys::metadata::KeyMetadata;

macro_rules! with_dilithium {
    ($level:expr, $d:ident => $body:expr) => {
        match $level {
            SignatureLevel::Level2 => {
                use pqcrypto_dilithium::dilithium2 as $d;
                $body
            }
            SignatureLevel::Level3 => {
                use pqcrypto_dilithium::dilithium3 as $d;
                $body
            }
            SignatureLevel::Level5 => {
                use pqcrypto_dilithium::dilithium5 as $d;
                $body
            }
        }
    };
}

/// Signature security level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignatureLevel {
    #[serde(rename = "LEVEL_2")]
    Level2,
    #[serde(rename = "LEVEL_3")]
    Level3,
    #[serde(rename = "LEVEL_5")]
    Level5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParams {
    pub public_key_size: usize,
    pub secret_key_size: usize,
    pub signature_size: usize,
}

impl SignatureLevel {
    pub const ALL: [SignatureLevel; 3] = [Self::Level2, Self::Level3, Self::Level5];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level2 => "LEVEL_2",
            Self::Level3 => "LEVEL_3",
            Self::Level5 => "LEVEL_5",
        }
    }

    /// Name carried in the JWT `alg` header.
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            Self::Level2 => "ML-DSA-44",
            Self::Level3 => "ML-DSA-65",
            Self::Level5 => "ML-DSA-87",
        }
    }

    pub fn params(&self) -> SignatureParams {
        with_dilithium!(self, d => SignatureParams {
            public_key_size: d::public_key_bytes(),
            secret_key_size: d::secret_key_bytes(),
            signature_size: d::signature_bytes(),
        })
    }

    pub fn from_public_key_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.params().public_key_size == len)
    }

    pub fn from_secret_key_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.params().secret_key_size == len)
    }
}

impl fmt::Display for SignatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureLevel {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LEVEL_2" | "2" | "ML-DSA-44" => Ok(Self::Level2),
            "LEVEL_3" | "3" | "ML-DSA-65" => Ok(Self::Level3),
            "LEVEL_5" | "5" | "ML-DSA-87" => Ok(Self::Level5),
            other => Err(VaultError::Configuration(format!(
                "unsupported signature security level: {other}"
            ))),
        }
    }
}

/// Signing key pair with its recorded expiry.
#[derive(Clone)]
pub struct SigningKeyPair {
    pub public_key: Vec<u8>,
    secret_key: SensitiveVec,
    pub level: SignatureLevel,
    pub key_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SigningKeyPair {
    pub fn secret_key_bytes(&self) -> &[u8] {
        self.secret_key.as_bytes()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub(crate) fn from_parts(
        public_key: Vec<u8>,
        secret_key: SensitiveVec,
        level: SignatureLevel,
        key_id: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        validate_sizes(level, public_key.len(), secret_key.len())?;
        Ok(Self {
            public_key,
            secret_key,
            level,
            key_id,
            created_at,
            expires_at,
        })
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("key_id", &self.key_id)
            .field("level", &self.level)
            .field("public_key", &hash::fingerprint(&self.public_key))
            .field("expires_at", &self.expires_at)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// A detached signature with its signer and signing time (Unix millis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureResult {
    #[serde(with = "serde_b64")]
    pub signature: Vec<u8>,
    pub key_id: String,
    pub timestamp: i64,
}

fn validate_sizes(level: SignatureLevel, pk_len: usize, sk_len: usize) -> Result<()> {
    let params = level.params();
    if pk_len != params.public_key_size || sk_len != params.secret_key_size {
        return Err(VaultError::Configuration(format!(
            "{} key sizes ({pk_len}, {sk_len}) do not match parameters ({}, {})",
            level.algorithm_name(),
            params.public_key_size,
            params.secret_key_size
        )));
    }
    Ok(())
}

/// Generate a signing key pair that expires `expiry_days` from now.
pub fn generate_key_pair(level: SignatureLevel, expiry_days: u32) -> Result<SigningKeyPair> {
    generate_key_pair_at(level, expiry_days, Utc::now())
}

pub(crate) fn generate_key_pair_at(
    level: SignatureLevel,
    expiry_days: u32,
    now: DateTime<Utc>,
) -> Result<SigningKeyPair> {
    if expiry_days == 0 {
        return Err(VaultError::Configuration(
            "signing key expiry must be at least one day".into(),
        ));
    }

    let (public_key, secret_key) = with_dilithium!(level, d => {
        let (pk, sk) = d::keypair();
        (pk.as_bytes().to_vec(), SensitiveVec::from_slice(sk.as_bytes()))
    });
    validate_sizes(level, public_key.len(), secret_key.len())?;

    Ok(SigningKeyPair {
        public_key,
        secret_key,
        level,
        key_id: new_key_id("sig"),
        created_at: now,
        expires_at: now + Duration::days(i64::from(expiry_days)),
    })
}

/// Sign `message`. Fails with `Expired` once the key's expiry has passed.
pub fn sign(message: &[u8], key: &SigningKeyPair) -> Result<SignatureResult> {
    sign_at(message, key, Utc::now())
}

pub fn sign_at(message: &[u8], key: &SigningKeyPair, now: DateTime<Utc>) -> Result<SignatureResult> {
    if key.is_expired_at(now) {
        return Err(VaultError::Expired(format!(
            "signing key {} expired at {}",
            key.key_id, key.expires_at
        )));
    }

    let signature = with_dilithium!(key.level, d => {
        let sk = d::SecretKey::from_bytes(key.secret_key_bytes()).map_err(|e| {
            VaultError::Configuration(format!("Invalid {} secret key: {e:?}", key.level.algorithm_name()))
        })?;
        d::detached_sign(message, &sk).as_bytes().to_vec()
    });

    Ok(SignatureResult {
        signature,
        key_id: key.key_id.clone(),
        timestamp: now.timestamp_millis(),
    })
}

/// Verify a detached signature. Returns `false` for every kind of mismatch.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
    let Some(level) = SignatureLevel::from_public_key_len(public_key.len()) else {
        return false;
    };
    with_dilithium!(level, d => {
        let (Ok(pk), Ok(sig)) = (
            d::PublicKey::from_bytes(public_key),
            d::DetachedSignature::from_bytes(signature),
        ) else {
            return false;
        };
        d::verify_detached_signature(&sig, message, &pk).is_ok()
    })
}

/// `now > expires_at` for the given metadata.
pub fn is_key_expired(metadata: &KeyMetadata) -> bool {
    metadata.is_expired_at(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_all_levels() {
        for level in SignatureLevel::ALL {
            let kp = generate_key_pair(level, 30).unwrap();
            assert_eq!(kp.public_key.len(), level.params().public_key_size);

            let sig = sign(b"audit event 17", &kp).unwrap();
            assert_eq!(sig.key_id, kp.key_id);
            assert!(verify(b"audit event 17", &sig.signature, &kp.public_key));
        }
    }

    #[test]
    fn test_verify_false_on_mismatch() {
        let kp = generate_key_pair(SignatureLevel::Level3, 30).unwrap();
        let other = generate_key_pair(SignatureLevel::Level3, 30).unwrap();
        let sig = sign(b"original", &kp).unwrap();

        assert!(!verify(b"tampered", &sig.signature, &kp.public_key));
        assert!(!verify(b"original", &sig.signature, &other.public_key));

        let mut corrupted = sig.signature.clone();
        corrupted[10] ^= 0x01;
        assert!(!verify(b"original", &corrupted, &kp.public_key));
        assert!(!verify(b"original", &sig.signature[..20], &kp.public_key));
        assert!(!verify(b"original", &sig.signature, &[0u8; 5]));
    }

    #[test]
    fn test_sign_with_expired_key_fails() {
        let mut kp = generate_key_pair(SignatureLevel::Level2, 1).unwrap();
        kp.expires_at = Utc::now() - Duration::hours(1);

        assert!(matches!(sign(b"late", &kp), Err(VaultError::Expired(_))));
    }

    #[test]
    fn test_old_signature_verifies_after_expiry() {
        let mut kp = generate_key_pair(SignatureLevel::Level2, 1).unwrap();
        let sig = sign(b"historical", &kp).unwrap();
        kp.expires_at = Utc::now() - Duration::days(10);

        assert!(verify(b"historical", &sig.signature, &kp.public_key));
    }

    #[test]
    fn test_zero_expiry_rejected() {
        assert!(matches!(
            generate_key_pair(SignatureLevel::Level3, 0),
            Err(VaultError::Configuration(_))
        ));
    }

    #[test]
    fn test_expiry_window() {
        let now = Utc::now();
        let kp = generate_key_pair_at(SignatureLevel::Level3, 90, now).unwrap();
        assert_eq!(kp.expires_at - kp.created_at, Duration::days(90));
        assert!(!kp.is_expired_at(now + Duration::days(90)));
        assert!(kp.is_expired_at(now + Duration::days(90) + Duration::seconds(1)));
    }

    #[test]
    fn test_signature_result_serializes_base64() {
        let kp = generate_key_pair(SignatureLevel::Level2, 1).unwrap();
        let sig = sign(b"x", &kp).unwrap();
        let json = serde_json::to_value(&sig).unwrap();
        assert!(json["signature"].is_string());
        assert_eq!(json["keyId"], kp.key_id);

        let back: SignatureResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("ML-DSA-65".parse::<SignatureLevel>().unwrap(), SignatureLevel::Level3);
        assert!("LEVEL_1".parse::<SignatureLevel>().is_err());
        for level in SignatureLevel::ALL {
            let p = level.params();
            assert_eq!(SignatureLevel::from_public_key_len(p.public_key_size), Some(level));
            assert_eq!(SignatureLevel::from_secret_key_len(p.secret_key_size), Some(level));
        }
    }
}
