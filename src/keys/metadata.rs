/// Key lifecycle records.
///
/// `KeyMetadata` never carries secret bytes; it is what the inventory export,
/// observers and audit tooling see.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::hybrid::{HybridKeyPair, HybridPublicKey, HybridSecretKey};
use crate::crypto::sign::SigningKeyPair;
use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    MasterKey,
    DataKey,
    JwtSigning,
    AuditSigning,
}

impl KeyType {
    pub const ALL: [KeyType; 4] = [
        Self::MasterKey,
        Self::DataKey,
        Self::JwtSigning,
        Self::AuditSigning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MasterKey => "MASTER_KEY",
            Self::DataKey => "DATA_KEY",
            Self::JwtSigning => "JWT_SIGNING",
            Self::AuditSigning => "AUDIT_SIGNING",
        }
    }

    /// Types whose material is a hybrid KEM pair.
    pub fn is_encryption(&self) -> bool {
        matches!(self, Self::MasterKey | Self::DataKey)
    }

    pub fn is_signing(&self) -> bool {
        !self.is_encryption()
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| VaultError::Configuration(format!("unknown key type: {s}")))
    }
}

/// `ACTIVE -> DEPRECATED -> EXPIRED`; `ACTIVE -> EXPIRED` directly on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    Active,
    Deprecated,
    Expired,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "ACTIVE",
            Self::Deprecated => "DEPRECATED",
            Self::Expired => "EXPIRED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub key_id: String,
    pub key_type: KeyType,
    pub owner: String,
    pub status: KeyStatus,
    /// Algorithm name, e.g. `ML-KEM-768+X25519` or `ML-DSA-65`.
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub usage_count: u64,
    pub tags: BTreeMap<String, String>,
    pub public_key_fingerprint: String,
    /// Whether this key is the current primary for its type at snapshot time.
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
    /// Replacement key id once rotated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_to: Option<String>,
}

impl KeyMetadata {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationResult {
    pub old_key_id: String,
    pub new_key_id: String,
    /// True for encryption keys: data under the old key should be re-encrypted.
    pub reencryption_required: bool,
}

/// Per-key generation options. `None` expiry falls back to the config default.
#[derive(Debug, Clone, Default)]
pub struct KeyOptions {
    pub expiry_days: Option<u32>,
    pub tags: BTreeMap<String, String>,
    pub make_primary: bool,
}

impl KeyOptions {
    pub fn expiry_days(mut self, days: u32) -> Self {
        self.expiry_days = Some(days);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn primary(mut self) -> Self {
        self.make_primary = true;
        self
    }
}

#[derive(Clone)]
pub enum KeyMaterial {
    Encryption(HybridKeyPair),
    Signing(SigningKeyPair),
}

impl KeyMaterial {
    pub fn public_key_bytes(&self) -> &[u8] {
        match self {
            Self::Encryption(kp) => &kp.kyber_keys.public_key,
            Self::Signing(kp) => &kp.public_key,
        }
    }

    pub fn algorithm_name(&self) -> String {
        match self {
            Self::Encryption(kp) if kp.x25519.is_some() => {
                format!("{}+X25519", kp.algorithm().algorithm_name())
            }
            Self::Encryption(kp) => kp.algorithm().algorithm_name().to_string(),
            Self::Signing(kp) => kp.level.algorithm_name().to_string(),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encryption(kp) => f.debug_tuple("Encryption").field(kp).finish(),
            Self::Signing(kp) => f.debug_tuple("Signing").field(kp).finish(),
        }
    }
}

/// A point-in-time copy of a registered key: metadata plus material.
#[derive(Debug, Clone)]
pub struct KeyHandle {
    pub metadata: KeyMetadata,
    pub material: KeyMaterial,
}

impl KeyHandle {
    pub fn key_id(&self) -> &str {
        &self.metadata.key_id
    }

    pub fn encryption_keys(&self) -> Option<&HybridKeyPair> {
        match &self.material {
            KeyMaterial::Encryption(kp) => Some(kp),
            KeyMaterial::Signing(_) => None,
        }
    }

    pub fn signing_keys(&self) -> Option<&SigningKeyPair> {
        match &self.material {
            KeyMaterial::Signing(kp) => Some(kp),
            KeyMaterial::Encryption(_) => None,
        }
    }

    pub fn public_key(&self) -> Result<HybridPublicKey> {
        self.encryption_keys()
            .map(HybridKeyPair::public_key)
            .ok_or_else(|| self.wrong_kind("encryption"))
    }

    pub fn secret_key(&self) -> Result<HybridSecretKey> {
        self.encryption_keys()
            .map(HybridKeyPair::secret_key)
            .ok_or_else(|| self.wrong_kind("encryption"))
    }

    pub fn signing_key_pair(&self) -> Result<&SigningKeyPair> {
        self.signing_keys().ok_or_else(|| self.wrong_kind("signing"))
    }

    fn wrong_kind(&self, wanted: &str) -> VaultError {
        VaultError::Configuration(format!(
            "key {} ({}) is not a {wanted} key",
            self.metadata.key_id, self.metadata.key_type
        ))
    }
}

/// Registry mutations, delivered to a `KeyObserver` after the registry lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Generated(KeyMetadata),
    Rotated {
        key_type: KeyType,
        old_key_id: String,
        new_key_id: String,
    },
    Expired {
        key_id: String,
    },
    PrimaryChanged {
        key_type: KeyType,
        key_id: String,
    },
}

pub trait KeyObserver: Send + Sync {
    fn on_event(&self, event: &KeyEvent);
}
