/// Vault configuration.
///
/// Defaults are production values. Overrides come from a JSON document or
/// from `PQ_VAULT_*` environment variables:
///
/// | Variable                              | Field                         |
/// |---------------------------------------|-------------------------------|
/// | `PQ_VAULT_KEM_LEVEL`                  | `default_kem_level`           |
/// | `PQ_VAULT_SIGNATURE_LEVEL`            | `default_signature_level`     |
/// | `PQ_VAULT_ENCRYPTION_KEY_EXPIRY_DAYS` | `encryption_key_expiry_days`  |
/// | `PQ_VAULT_SIGNING_KEY_EXPIRY_DAYS`    | `signing_key_expiry_days`     |
/// | `PQ_VAULT_JWT_TTL_SECS`               | `jwt_ttl_secs`                |
/// | `PQ_VAULT_HYBRID_X25519`              | `hybrid_x25519`               |
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::crypto::kdf::KdfParams;
use crate::crypto::kem::SecurityLevel;
use crate::crypto::sign::SignatureLevel;
use crate::error::{Result, VaultError};

const DEFAULT_ENCRYPTION_KEY_EXPIRY_DAYS: u32 = 365;
const DEFAULT_SIGNING_KEY_EXPIRY_DAYS: u32 = 90;
const DEFAULT_JWT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub default_kem_level: SecurityLevel,
    pub default_signature_level: SignatureLevel,
    pub encryption_key_expiry_days: u32,
    pub signing_key_expiry_days: u32,
    pub jwt_ttl_secs: u64,
    /// Pair every ML-KEM key with an X25519 key.
    pub hybrid_x25519: bool,
    /// Argon2id cost for sealing the key store.
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            default_kem_level: SecurityLevel::Level3,
            default_signature_level: SignatureLevel::Level3,
            encryption_key_expiry_days: DEFAULT_ENCRYPTION_KEY_EXPIRY_DAYS,
            signing_key_expiry_days: DEFAULT_SIGNING_KEY_EXPIRY_DAYS,
            jwt_ttl_secs: DEFAULT_JWT_TTL_SECS,
            hybrid_x25519: true,
            kdf: KdfParams::default(),
        }
    }
}

impl VaultConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| VaultError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `PQ_VAULT_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("PQ_VAULT_KEM_LEVEL") {
            config.default_kem_level = v.parse()?;
        }
        if let Some(v) = lookup("PQ_VAULT_SIGNATURE_LEVEL") {
            config.default_signature_level = v.parse()?;
        }
        if let Some(v) = lookup("PQ_VAULT_ENCRYPTION_KEY_EXPIRY_DAYS") {
            config.encryption_key_expiry_days = parse_var("PQ_VAULT_ENCRYPTION_KEY_EXPIRY_DAYS", &v)?;
        }
        if let Some(v) = lookup("PQ_VAULT_SIGNING_KEY_EXPIRY_DAYS") {
            config.signing_key_expiry_days = parse_var("PQ_VAULT_SIGNING_KEY_EXPIRY_DAYS", &v)?;
        }
        if let Some(v) = lookup("PQ_VAULT_JWT_TTL_SECS") {
            config.jwt_ttl_secs = parse_var("PQ_VAULT_JWT_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("PQ_VAULT_HYBRID_X25519") {
            config.hybrid_x25519 = parse_var("PQ_VAULT_HYBRID_X25519", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.encryption_key_expiry_days == 0 {
            return Err(VaultError::Configuration(
                "encryption_key_expiry_days must be greater than zero".into(),
            ));
        }
        if self.signing_key_expiry_days == 0 {
            return Err(VaultError::Configuration(
                "signing_key_expiry_days must be greater than zero".into(),
            ));
        }
        if self.jwt_ttl_secs == 0 {
            return Err(VaultError::Configuration(
                "jwt_ttl_secs must be greater than zero".into(),
            ));
        }
        self.kdf.validate()
    }

    pub fn jwt_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.jwt_ttl_secs).unwrap_or(i64::MAX / 1000))
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VaultError::Configuration(format!("{name}: cannot parse `{value}`")))
}
