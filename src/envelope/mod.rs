/// Hybrid envelope encryption.
///
/// Encrypt:
/// 1. Hybrid-encapsulate against the recipient public key → (kem_ct, secret)
/// 2. aead_key = HKDF-SHA256(secret, info = domain || key_id)
/// 3. Fresh random 24-byte nonce
/// 4. XChaCha20-Poly1305 with AAD = canonical {key_id, timestamp, algorithm}
///
/// Decrypt recomputes the AAD from the envelope's own fields, so an edit to
/// any of them fails authentication exactly like an edit to the ciphertext.
/// There is no second, independent metadata check.
pub mod wire;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::aead::{self, NONCE_LEN};
use crate::crypto::hybrid::{self, HybridPublicKey, HybridSecretKey};
use crate::crypto::kdf;
use crate::crypto::kem::SecurityLevel;
use crate::crypto::sensitive::SensitiveBytes32;
use crate::encoding::{b64_decode, b64_encode, serde_b64, serde_b64_opt};
use crate::error::{Result, VaultError};

/// Domain prefix of the associated data.
const AAD_DOMAIN: &[u8] = b"pq-vault-envelope-aad-v1";

/// HKDF info prefix for the per-envelope AEAD key.
const KEY_INFO_DOMAIN: &[u8] = b"pq-vault-envelope-key-v1|";

/// Self-describing encrypted unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    #[serde(with = "serde_b64")]
    pub kyber_ciphertext: Vec<u8>,
    /// Sender's ephemeral X25519 key when the recipient key is hybrid.
    #[serde(default, with = "serde_b64_opt", skip_serializing_if = "Option::is_none")]
    pub x25519_ephemeral: Option<[u8; 32]>,
    #[serde(with = "serde_b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "serde_b64")]
    pub nonce: [u8; NONCE_LEN],
    pub key_id: String,
    /// Creation time, Unix milliseconds.
    pub timestamp: i64,
    pub algorithm: SecurityLevel,
}

impl EncryptedEnvelope {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Base64 of the binary form. This is what a PHI field holds.
    pub fn to_base64(&self) -> Result<String> {
        Ok(b64_encode(&self.to_bytes()?))
    }

    pub fn from_base64(data: &str) -> Result<Self> {
        Self::from_bytes(&b64_decode(data)?)
    }
}

/// Canonical, length-prefixed encoding of the authenticated metadata.
pub fn associated_data(key_id: &str, timestamp: i64, algorithm: SecurityLevel) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_DOMAIN.len() + 4 + key_id.len() + 8 + 1);
    aad.extend_from_slice(AAD_DOMAIN);
    aad.extend_from_slice(&(key_id.len() as u32).to_be_bytes());
    aad.extend_from_slice(key_id.as_bytes());
    aad.extend_from_slice(&timestamp.to_be_bytes());
    aad.push(algorithm.wire_id());
    aad
}

fn envelope_key(secret: &SensitiveBytes32, key_id: &str) -> Result<SensitiveBytes32> {
    let mut info = Vec::with_capacity(KEY_INFO_DOMAIN.len() + key_id.len());
    info.extend_from_slice(KEY_INFO_DOMAIN);
    info.extend_from_slice(key_id.as_bytes());
    kdf::derive_key32(secret.as_bytes(), None, &info)
}

/// Encrypt `plaintext` for `public_key`, stamping the envelope with `key_id`.
pub fn encrypt(
    plaintext: &[u8],
    public_key: &HybridPublicKey,
    key_id: &str,
) -> Result<EncryptedEnvelope> {
    encrypt_at(plaintext, public_key, key_id, Utc::now().timestamp_millis())
}

pub fn encrypt_at(
    plaintext: &[u8],
    public_key: &HybridPublicKey,
    key_id: &str,
    timestamp: i64,
) -> Result<EncryptedEnvelope> {
    if key_id.is_empty() || key_id.len() > u16::MAX as usize {
        return Err(VaultError::Configuration(
            "key id must be between 1 and 65535 bytes".into(),
        ));
    }

    let encap = hybrid::encapsulate(public_key)?;
    let aead_key = envelope_key(&encap.combined_secret, key_id)?;
    let aad = associated_data(key_id, timestamp, encap.level);
    let (nonce, ciphertext) = aead::encrypt(&aead_key, plaintext, &aad)?;

    debug!(
        key_id,
        algorithm = %encap.level,
        bytes = plaintext.len(),
        "Envelope encrypted"
    );

    Ok(EncryptedEnvelope {
        kyber_ciphertext: encap.kyber_ciphertext,
        x25519_ephemeral: encap.x25519_ephemeral,
        ciphertext,
        nonce,
        key_id: key_id.to_string(),
        timestamp,
        algorithm: encap.level,
    })
}

/// Decrypt an envelope. Any authentication failure is `Integrity`.
pub fn decrypt(envelope: &EncryptedEnvelope, secret_key: &HybridSecretKey) -> Result<Vec<u8>> {
    let secret = hybrid::decapsulate(
        &envelope.kyber_ciphertext,
        envelope.x25519_ephemeral.as_ref(),
        secret_key,
    );
    let aead_key = envelope_key(&secret, &envelope.key_id)?;
    let aad = associated_data(&envelope.key_id, envelope.timestamp, envelope.algorithm);

    aead::decrypt(&aead_key, &envelope.nonce, &envelope.ciphertext, &aad).map_err(|e| {
        warn!(key_id = %envelope.key_id, "Envelope failed authentication");
        e
    })
}

/// Decrypt with the old key and encrypt afresh under the new one.
pub fn reencrypt(
    envelope: &EncryptedEnvelope,
    old_secret_key: &HybridSecretKey,
    new_public_key: &HybridPublicKey,
    new_key_id: &str,
) -> Result<EncryptedEnvelope> {
    if new_key_id == envelope.key_id {
        return Err(VaultError::Configuration(format!(
            "re-encryption target {new_key_id} is the envelope's current key"
        )));
    }

    let plaintext = Zeroizing::new(decrypt(envelope, old_secret_key)?);
    let fresh = encrypt(&plaintext, new_public_key, new_key_id)?;

    debug!(
        old_key_id = %envelope.key_id,
        new_key_id,
        "Envelope re-encrypted"
    );
    Ok(fresh)
}
