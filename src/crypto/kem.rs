/// Key encapsulation over ML-KEM (CRYSTALS-Kyber) at three security levels.
///
/// - `LEVEL_1` → Kyber-512, `LEVEL_3` → Kyber-768, `LEVEL_5` → Kyber-1024
/// - Encapsulation is randomized; two calls against one public key never
///   produce the same ciphertext.
/// - Decapsulation is total. A wrong secret key yields a different, well-formed
///   32-byte secret (implicit rejection); the AEAD layer is what rejects it.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::hash;
use crate::crypto::sensitive::{SensitiveBytes32, SensitiveVec};
use crate::error::{Result, VaultError};

pub use crate::crypto::kdf::derive_key;

/// Context for the pseudorandom secret returned on malformed input.
const IMPLICIT_REJECT_CONTEXT: &str = "pq-vault 2024 kem implicit-reject v1";

macro_rules! with_kyber {
    ($level:expr, $k:ident => $body:expr) => {
        match $level {
            SecurityLevel::Level1 => {
                use pqcrypto_kyber::kyber512 as $k;
                $body
            }
            SecurityLevel::Level3 => {
                use pqcrypto_kyber::kyber768 as $k;
                $body
            }
            SecurityLevel::Level5 => {
                use pqcrypto_kyber::kyber1024 as $k;
                $body
            }
        }
    };
}

/// KEM security level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityLevel {
    #[serde(rename = "LEVEL_1")]
    Level1,
    #[serde(rename = "LEVEL_3")]
    Level3,
    #[serde(rename = "LEVEL_5")]
    Level5,
}

/// Byte sizes reported by the KEM capability for one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KemParams {
    pub public_key_size: usize,
    pub secret_key_size: usize,
    pub ciphertext_size: usize,
    pub shared_secret_size: usize,
}

impl SecurityLevel {
    pub const ALL: [SecurityLevel; 3] = [Self::Level1, Self::Level3, Self::Level5];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level1 => "LEVEL_1",
            Self::Level3 => "LEVEL_3",
            Self::Level5 => "LEVEL_5",
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            Self::Level1 => "ML-KEM-512",
            Self::Level3 => "ML-KEM-768",
            Self::Level5 => "ML-KEM-1024",
        }
    }

    /// Stable one-byte identifier used in the binary envelope format.
    pub fn wire_id(&self) -> u8 {
        match self {
            Self::Level1 => 1,
            Self::Level3 => 3,
            Self::Level5 => 5,
        }
    }

    pub fn from_wire_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Self::Level1),
            3 => Ok(Self::Level3),
            5 => Ok(Self::Level5),
            other => Err(VaultError::Configuration(format!(
                "unsupported KEM security level id: {other}"
            ))),
        }
    }

    pub fn params(&self) -> KemParams {
        with_kyber!(self, k => KemParams {
            public_key_size: k::public_key_bytes(),
            secret_key_size: k::secret_key_bytes(),
            ciphertext_size: k::ciphertext_bytes(),
            shared_secret_size: k::shared_secret_bytes(),
        })
    }

    pub fn from_public_key_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.params().public_key_size == len)
    }

    pub fn from_secret_key_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.params().secret_key_size == len)
    }

    pub fn from_ciphertext_len(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.params().ciphertext_size == len)
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LEVEL_1" | "1" | "ML-KEM-512" => Ok(Self::Level1),
            "LEVEL_3" | "3" | "ML-KEM-768" => Ok(Self::Level3),
            "LEVEL_5" | "5" | "ML-KEM-1024" => Ok(Self::Level5),
            other => Err(VaultError::Configuration(format!(
                "unsupported KEM security level: {other}"
            ))),
        }
    }
}

/// ML-KEM key pair. Clones are deep copies of the secret buffer.
#[derive(Clone)]
pub struct KeyPair {
    pub public_key: Vec<u8>,
    secret_key: SensitiveVec,
    pub algorithm: SecurityLevel,
    pub key_id: String,
    pub created_at: DateTime<Utc>,
}

impl KeyPair {
    pub fn secret_key_bytes(&self) -> &[u8] {
        self.secret_key.as_bytes()
    }

    /// Rebuild a key pair from stored parts, re-checking sizes.
    pub(crate) fn from_parts(
        public_key: Vec<u8>,
        secret_key: SensitiveVec,
        algorithm: SecurityLevel,
        key_id: String,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        validate_sizes(algorithm, public_key.len(), secret_key.len())?;
        Ok(Self {
            public_key,
            secret_key,
            algorithm,
            key_id,
            created_at,
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("public_key", &hash::fingerprint(&self.public_key))
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Result of encapsulation. Consumed immediately, never persisted.
pub struct EncapsulationResult {
    pub ciphertext: Vec<u8>,
    pub shared_secret: SensitiveBytes32,
    pub level: SecurityLevel,
}

fn validate_sizes(level: SecurityLevel, pk_len: usize, sk_len: usize) -> Result<()> {
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

pub(crate) fn new_key_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Generate a fresh key pair with a random key id.
pub fn generate_key_pair(level: SecurityLevel) -> Result<KeyPair> {
    let (public_key, secret_key) = with_kyber!(level, k => {
        let (pk, sk) = k::keypair();
        (pk.as_bytes().to_vec(), SensitiveVec::from_slice(sk.as_bytes()))
    });
    validate_sizes(level, public_key.len(), secret_key.len())?;

    Ok(KeyPair {
        public_key,
        secret_key,
        algorithm: level,
        key_id: new_key_id("kem"),
        created_at: Utc::now(),
    })
}

/// Encapsulate a fresh shared secret against `public_key`.
///
/// The level is recovered from the key length; an unrecognised length is a
/// configuration error.
pub fn encapsulate(public_key: &[u8]) -> Result<EncapsulationResult> {
    let level = SecurityLevel::from_public_key_len(public_key.len()).ok_or_else(|| {
        VaultError::Configuration(format!(
            "public key length {} matches no ML-KEM level",
            public_key.len()
        ))
    })?;

    with_kyber!(level, k => {
        let pk = k::PublicKey::from_bytes(public_key).map_err(|e| {
            VaultError::Configuration(format!("Invalid {} public key: {e:?}", level.algorithm_name()))
        })?;
        let (ss, ct) = k::encapsulate(&pk);
        let shared_secret = SensitiveBytes32::from_slice(ss.as_bytes()).ok_or_else(|| {
            VaultError::Configuration("KEM shared secret is not 32 bytes".into())
        })?;
        Ok(EncapsulationResult {
            ciphertext: ct.as_bytes().to_vec(),
            shared_secret,
            level,
        })
    })
}

/// Recover the shared secret. Never fails.
pub fn decapsulate(ciphertext: &[u8], secret_key: &[u8]) -> SensitiveBytes32 {
    try_decapsulate(ciphertext, secret_key).unwrap_or_else(|| {
        let mut ikm = Vec::with_capacity(secret_key.len() + ciphertext.len());
        ikm.extend_from_slice(secret_key);
        ikm.extend_from_slice(ciphertext);
        let fallback = hash::derive_key(IMPLICIT_REJECT_CONTEXT, &ikm);
        zeroize::Zeroize::zeroize(&mut ikm);
        SensitiveBytes32::new(fallback)
    })
}

fn try_decapsulate(ciphertext: &[u8], secret_key: &[u8]) -> Option<SensitiveBytes32> {
    let level = SecurityLevel::from_secret_key_len(secret_key.len())?;
    if SecurityLevel::from_ciphertext_len(ciphertext.len()) != Some(level) {
        return None;
    }
    with_kyber!(level, k => {
        let sk = k::SecretKey::from_bytes(secret_key).ok()?;
        let ct = k::Ciphertext::from_bytes(ciphertext).ok()?;
        SensitiveBytes32::from_slice(k::decapsulate(&ct, &sk).as_bytes())
    })
}
