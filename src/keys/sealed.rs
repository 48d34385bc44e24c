/// Passphrase-sealed key store.
///
/// The whole registry (metadata, secret material and primary designations)
/// is serialized to JSON, encrypted with XChaCha20-Poly1305 under an
/// Argon2id-derived key and written as a small JSON document. This is the
/// restart-durability path; `export_key_inventory` stays secret-free.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::{Zeroize, Zeroizing};

use super::manager::KeyManager;
use super::metadata::{KeyMaterial, KeyMetadata, KeyType};
use super::registry::{KeyEntry, KeyRegistry};
use crate::config::VaultConfig;
use crate::crypto::aead::{self, NONCE_LEN};
use crate::crypto::hybrid::{HybridKeyPair, X25519KeyPair};
use crate::crypto::kdf::{self, KdfParams, SALT_LEN};
use crate::crypto::kem::{KeyPair, SecurityLevel};
use crate::crypto::sensitive::SensitiveVec;
use crate::crypto::sign::{SignatureLevel, SigningKeyPair};
use crate::encoding::{b64_decode, b64_encode};
use crate::error::{Result, VaultError};

const SEALED_STORE_AAD: &[u8] = b"pq-vault-sealed-keystore-v1";

/// Sealed key store, serialized to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedKeyStore {
    /// Version of the key store format.
    pub version: u32,
    /// Argon2id salt for passphrase derivation (32 bytes, hex-encoded).
    pub kdf_salt: String,
    pub kdf_params: KdfParams,
    /// XChaCha20-Poly1305 nonce (hex-encoded).
    pub nonce: String,
    /// Encrypted key inventory (base64).
    pub ciphertext: String,
    pub key_count: usize,
    pub sealed_at: DateTime<Utc>,
}

impl SealedKeyStore {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Serialize, Deserialize)]
struct SealedPayload {
    keys: Vec<SealedKey>,
    primaries: Vec<(KeyType, String)>,
}

#[derive(Serialize, Deserialize)]
struct SealedKey {
    metadata: KeyMetadata,
    material: SealedMaterial,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SealedMaterial {
    Encryption {
        level: SecurityLevel,
        kem_pk: String,
        kem_sk: String,
        created_at: DateTime<Utc>,
        #[serde(default)]
        x25519_sk: Option<String>,
    },
    Signing {
        level: SignatureLevel,
        public_key: String,
        secret_key: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

impl Drop for SealedMaterial {
    fn drop(&mut self) {
        match self {
            Self::Encryption { kem_sk, x25519_sk, .. } => {
                kem_sk.zeroize();
                x25519_sk.zeroize();
            }
            Self::Signing { secret_key, .. } => secret_key.zeroize(),
        }
    }
}

impl SealedMaterial {
    fn from_material(material: &KeyMaterial) -> Self {
        match material {
            KeyMaterial::Encryption(kp) => Self::Encryption {
                level: kp.algorithm(),
                kem_pk: b64_encode(&kp.kyber_keys.public_key),
                kem_sk: b64_encode(kp.kyber_keys.secret_key_bytes()),
                created_at: kp.kyber_keys.created_at,
                x25519_sk: kp
                    .x25519
                    .as_ref()
                    .map(|x| b64_encode(x.secret_key().as_bytes())),
            },
            KeyMaterial::Signing(kp) => Self::Signing {
                level: kp.level,
                public_key: b64_encode(&kp.public_key),
                secret_key: b64_encode(kp.secret_key_bytes()),
                created_at: kp.created_at,
                expires_at: kp.expires_at,
            },
        }
    }

    fn to_material(&self, key_id: &str) -> Result<KeyMaterial> {
        match self {
            Self::Encryption {
                level,
                kem_pk,
                kem_sk,
                created_at,
                x25519_sk,
            } => {
                let kyber_keys = KeyPair::from_parts(
                    b64_decode(kem_pk)?,
                    SensitiveVec::new(b64_decode(kem_sk)?),
                    *level,
                    key_id.to_string(),
                    *created_at,
                )?;
                let x25519 = match x25519_sk {
                    Some(encoded) => {
                        let raw = Zeroizing::new(b64_decode(encoded)?);
                        let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
                            VaultError::Serialization(format!("bad X25519 secret for {key_id}"))
                        })?;
                        Some(X25519KeyPair::from_secret_bytes(bytes))
                    }
                    None => None,
                };
                Ok(KeyMaterial::Encryption(HybridKeyPair {
                    kyber_keys,
                    x25519,
                    key_id: key_id.to_string(),
                }))
            }
            Self::Signing {
                level,
                public_key,
                secret_key,
                created_at,
                expires_at,
            } => Ok(KeyMaterial::Signing(SigningKeyPair::from_parts(
                b64_decode(public_key)?,
                SensitiveVec::new(b64_decode(secret_key)?),
                *level,
                key_id.to_string(),
                *created_at,
                *expires_at,
            )?)),
        }
    }
}

fn decode_hex<const N: usize>(value: &str, what: &str) -> Result<[u8; N]> {
    hex::decode(value)
        .ok()
        .and_then(|bytes| <[u8; N]>::try_from(bytes.as_slice()).ok())
        .ok_or_else(|| VaultError::Serialization(format!("invalid {what} in sealed store")))
}

impl KeyManager {
    /// Seal every registered key under `passphrase`.
    pub fn export_sealed(&self, passphrase: &str) -> Result<SealedKeyStore> {
        if passphrase.is_empty() {
            return Err(VaultError::Configuration("passphrase must not be empty".into()));
        }

        let (entries, primaries) = self.registry().export_entries();
        let payload = SealedPayload {
            keys: entries
                .iter()
                .map(|entry| SealedKey {
                    metadata: entry.metadata.clone(),
                    material: SealedMaterial::from_material(&entry.material),
                })
                .collect(),
            primaries,
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);
        drop(payload);

        let params = self.config().kdf;
        let salt = kdf::generate_salt();
        let key = kdf::derive_passphrase_key(passphrase.as_bytes(), &salt, &params)?;
        let (nonce, ciphertext) = aead::encrypt(&key, &plaintext, SEALED_STORE_AAD)?;

        info!(keys = entries.len(), "Key store sealed");
        Ok(SealedKeyStore {
            version: SealedKeyStore::CURRENT_VERSION,
            kdf_salt: hex::encode(salt),
            kdf_params: params,
            nonce: hex::encode(nonce),
            ciphertext: b64_encode(&ciphertext),
            key_count: entries.len(),
            sealed_at: self.now(),
        })
    }

    /// Rebuild a manager from a sealed store. A wrong passphrase (or any
    /// tampering with the sealed blob) is `InvalidPassphrase`.
    pub fn import_sealed(store: &SealedKeyStore, passphrase: &str, config: VaultConfig) -> Result<Self> {
        if store.version != SealedKeyStore::CURRENT_VERSION {
            return Err(VaultError::Serialization(format!(
                "unsupported key store version {}",
                store.version
            )));
        }
        store.kdf_params.validate()?;

        let salt: [u8; SALT_LEN] = decode_hex(&store.kdf_salt, "salt")?;
        let nonce: [u8; NONCE_LEN] = decode_hex(&store.nonce, "nonce")?;
        let ciphertext = b64_decode(&store.ciphertext)?;

        let key = kdf::derive_passphrase_key(passphrase.as_bytes(), &salt, &store.kdf_params)?;
        let plaintext = Zeroizing::new(
            aead::decrypt(&key, &nonce, &ciphertext, SEALED_STORE_AAD).map_err(|_| {
                warn!("Sealed key store failed to open");
                VaultError::InvalidPassphrase
            })?,
        );

        let payload: SealedPayload = serde_json::from_slice(&plaintext)?;
        let entries = payload
            .keys
            .iter()
            .map(|sealed| {
                Ok(KeyEntry {
                    metadata: sealed.metadata.clone(),
                    material: sealed.material.to_material(&sealed.metadata.key_id)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let count = entries.len();
        let registry = KeyRegistry::from_entries(entries, payload.primaries.clone())?;

        info!(keys = count, "Key store unsealed");
        Ok(KeyManager::new(Arc::new(registry), config))
    }
}
