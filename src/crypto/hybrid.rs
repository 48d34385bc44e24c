/// Hybrid key exchange: ML-KEM plus an optional X25519 half.
///
/// Both shared secrets are combined via a BLAKE3 keyed hash with domain
/// separation, so the combined secret is always 32 bytes. If either algorithm
/// is broken the other still protects the data. Decapsulation shares the KEM's
/// implicit-rejection property: mismatched keys give a different secret and
/// never an error.
use std::fmt;

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::crypto::hash;
use crate::crypto::kem::{self, KeyPair, SecurityLevel};
use crate::crypto::sensitive::{SensitiveBytes32, SensitiveVec};
use crate::error::Result;

/// Domain separator for combining secrets.
const COMBINE_DOMAIN_SEPARATOR: &[u8; 32] = b"pq-vault-hybrid-kex-v1-combine!!";

const MODE_KEM_ONLY: u8 = 0x00;
const MODE_KEM_X25519: u8 = 0x01;

/// X25519 key pair stored alongside the KEM pair under one logical key id.
#[derive(Clone)]
pub struct X25519KeyPair {
    pub public_key: X25519PublicKey,
    secret_key: StaticSecret,
}

impl X25519KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self {
            public_key: public,
            secret_key: secret,
        }
    }

    pub(crate) fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        Self {
            public_key: X25519PublicKey::from(&secret),
            secret_key: secret,
        }
    }

    pub fn secret_key(&self) -> &StaticSecret {
        &self.secret_key
    }
}

/// KEM key pair with its optional classical partner.
#[derive(Clone)]
pub struct HybridKeyPair {
    pub kyber_keys: KeyPair,
    pub x25519: Option<X25519KeyPair>,
    pub key_id: String,
}

impl HybridKeyPair {
    pub fn algorithm(&self) -> SecurityLevel {
        self.kyber_keys.algorithm
    }

    pub fn public_key(&self) -> HybridPublicKey {
        HybridPublicKey {
            kem_pk: self.kyber_keys.public_key.clone(),
            x25519_pk: self.x25519.as_ref().map(|x| x.public_key.to_bytes()),
        }
    }

    /// Copy of the secret half. The copy owns its own buffers.
    pub fn secret_key(&self) -> HybridSecretKey {
        HybridSecretKey {
            kem_sk: SensitiveVec::from_slice(self.kyber_keys.secret_key_bytes()),
            x25519_sk: self.x25519.as_ref().map(|x| x.secret_key.clone()),
        }
    }
}

impl fmt::Debug for HybridKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridKeyPair")
            .field("key_id", &self.key_id)
            .field("kyber_keys", &self.kyber_keys)
            .field("x25519", &self.x25519.is_some())
            .finish()
    }
}

/// Public half of a hybrid key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridPublicKey {
    pub kem_pk: Vec<u8>,
    pub x25519_pk: Option<[u8; 32]>,
}

impl From<&KeyPair> for HybridPublicKey {
    fn from(kp: &KeyPair) -> Self {
        Self {
            kem_pk: kp.public_key.clone(),
            x25519_pk: None,
        }
    }
}

/// Secret half of a hybrid key.
#[derive(Clone)]
pub struct HybridSecretKey {
    kem_sk: SensitiveVec,
    x25519_sk: Option<StaticSecret>,
}

impl HybridSecretKey {
    pub fn kem_only(kem_sk: &[u8]) -> Self {
        Self {
            kem_sk: SensitiveVec::from_slice(kem_sk),
            x25519_sk: None,
        }
    }

    pub fn kem_secret_bytes(&self) -> &[u8] {
        self.kem_sk.as_bytes()
    }
}

impl From<&KeyPair> for HybridSecretKey {
    fn from(kp: &KeyPair) -> Self {
        Self::kem_only(kp.secret_key_bytes())
    }
}

impl fmt::Debug for HybridSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HybridSecretKey([REDACTED])")
    }
}

/// Output of hybrid encapsulation.
pub struct HybridEncapsulation {
    pub kyber_ciphertext: Vec<u8>,
    /// Sender's ephemeral X25519 public key, when the recipient has one.
    pub x25519_ephemeral: Option<[u8; 32]>,
    pub combined_secret: SensitiveBytes32,
    pub level: SecurityLevel,
}

fn combine_shared_secrets(ss_kem: &[u8], ss_x25519: Option<&[u8]>) -> SensitiveBytes32 {
    let mut combined = Vec::with_capacity(1 + ss_kem.len() + 32);
    match ss_x25519 {
        Some(ss) => {
            combined.push(MODE_KEM_X25519);
            combined.extend_from_slice(ss_kem);
            combined.extend_from_slice(ss);
        }
        None => {
            combined.push(MODE_KEM_ONLY);
            combined.extend_from_slice(ss_kem);
        }
    }

    let result = hash::keyed_hash(COMBINE_DOMAIN_SEPARATOR, &combined);
    combined.zeroize();

    SensitiveBytes32::new(result)
}

/// Generate a KEM pair and, if requested, an X25519 pair under the same key id.
pub fn generate_key_pair(level: SecurityLevel, with_x25519: bool) -> Result<HybridKeyPair> {
    let kyber_keys = kem::generate_key_pair(level)?;
    let key_id = kyber_keys.key_id.clone();
    Ok(HybridKeyPair {
        kyber_keys,
        x25519: with_x25519.then(X25519KeyPair::generate),
        key_id,
    })
}

/// Encapsulate against a hybrid public key.
pub fn encapsulate(public_key: &HybridPublicKey) -> Result<HybridEncapsulation> {
    let encap = kem::encapsulate(&public_key.kem_pk)?;

    let (x25519_ephemeral, combined_secret) = match public_key.x25519_pk {
        Some(recipient) => {
            let eph_secret = EphemeralSecret::random_from_rng(OsRng);
            let eph_public = X25519PublicKey::from(&eph_secret);
            let ss_x25519 = eph_secret.diffie_hellman(&X25519PublicKey::from(recipient));
            let combined = combine_shared_secrets(
                encap.shared_secret.as_bytes(),
                Some(ss_x25519.as_bytes()),
            );
            (Some(eph_public.to_bytes()), combined)
        }
        None => (None, combine_shared_secrets(encap.shared_secret.as_bytes(), None)),
    };

    Ok(HybridEncapsulation {
        kyber_ciphertext: encap.ciphertext,
        x25519_ephemeral,
        combined_secret,
        level: encap.level,
    })
}

/// Reproduce the combined secret. Never fails.
pub fn decapsulate(
    kyber_ciphertext: &[u8],
    x25519_ephemeral: Option<&[u8; 32]>,
    secret_key: &HybridSecretKey,
) -> SensitiveBytes32 {
    let ss_kem = kem::decapsulate(kyber_ciphertext, secret_key.kem_sk.as_bytes());

    match (x25519_ephemeral, &secret_key.x25519_sk) {
        (Some(eph), Some(sk)) => {
            let ss_x25519 = sk.diffie_hellman(&X25519PublicKey::from(*eph));
            combine_shared_secrets(ss_kem.as_bytes(), Some(ss_x25519.as_bytes()))
        }
        // Sender used a classical half the recipient cannot reproduce. Mix
        // the ephemeral key in so the result is well-formed but wrong.
        (Some(eph), None) => combine_shared_secrets(ss_kem.as_bytes(), Some(eph)),
        (None, _) => combine_shared_secrets(ss_kem.as_bytes(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hybrid_roundtrip() {
        let kp = generate_key_pair(SecurityLevel::Level3, true).unwrap();
        let encap = encapsulate(&kp.public_key()).unwrap();
        assert!(encap.x25519_ephemeral.is_some());

        let recovered = decapsulate(
            &encap.kyber_ciphertext,
            encap.x25519_ephemeral.as_ref(),
            &kp.secret_key(),
        );
        assert_eq!(recovered.as_bytes(), encap.combined_secret.as_bytes());
    }

    #[test]
    fn test_kem_only_roundtrip() {
        let kp = generate_key_pair(SecurityLevel::Level1, false).unwrap();
        let encap = encapsulate(&kp.public_key()).unwrap();
        assert!(encap.x25519_ephemeral.is_none());

        let recovered = decapsulate(&encap.kyber_ciphertext, None, &kp.secret_key());
        assert_eq!(recovered.as_bytes(), encap.combined_secret.as_bytes());
    }

    #[test]
    fn test_key_id_shared_with_kem_half() {
        let kp = generate_key_pair(SecurityLevel::Level5, true).unwrap();
        assert_eq!(kp.key_id, kp.kyber_keys.key_id);
        assert_eq!(kp.algorithm(), SecurityLevel::Level5);
    }

    #[test]
    fn test_wrong_kem_key_differs_without_error() {
        let kp1 = generate_key_pair(SecurityLevel::Level3, true).unwrap();
        let kp2 = generate_key_pair(SecurityLevel::Level3, true).unwrap();
        let encap = encapsulate(&kp1.public_key()).unwrap();

        let mut mixed = kp1.secret_key();
        mixed.kem_sk = SensitiveVec::from_slice(kp2.kyber_keys.secret_key_bytes());
        let wrong = decapsulate(&encap.kyber_ciphertext, encap.x25519_ephemeral.as_ref(), &mixed);
        assert_ne!(wrong.as_bytes(), encap.combined_secret.as_bytes());
    }

    #[test]
    fn test_wrong_x25519_key_differs_without_error() {
        let kp = generate_key_pair(SecurityLevel::Level3, true).unwrap();
        let encap = encapsulate(&kp.public_key()).unwrap();

        let mut mixed = kp.secret_key();
        mixed.x25519_sk = Some(X25519KeyPair::generate().secret_key().clone());
        let wrong = decapsulate(&encap.kyber_ciphertext, encap.x25519_ephemeral.as_ref(), &mixed);
        assert_ne!(wrong.as_bytes(), encap.combined_secret.as_bytes());

        let stripped = HybridSecretKey::kem_only(kp.kyber_keys.secret_key_bytes());
        let wrong = decapsulate(&encap.kyber_ciphertext, encap.x25519_ephemeral.as_ref(), &stripped);
        assert_ne!(wrong.as_bytes(), encap.combined_secret.as_bytes());
    }

    #[test]
    fn test_each_encapsulation_fresh() {
        let kp = generate_key_pair(SecurityLevel::Level3, true).unwrap();
        let e1 = encapsulate(&kp.public_key()).unwrap();
        let e2 = encapsulate(&kp.public_key()).unwrap();
        assert_ne!(e1.kyber_ciphertext, e2.kyber_ciphertext);
        assert_ne!(e1.x25519_ephemeral, e2.x25519_ephemeral);
        assert_ne!(e1.combined_secret.as_bytes(), e2.combined_secret.as_bytes());
    }

    #[test]
    fn test_modes_are_domain_separated() {
        let ss = [7u8; 32];
        let kem_only = combine_shared_secrets(&ss, None);
        let hybrid = combine_shared_secrets(&ss, Some(&[0u8; 32]));
        assert_ne!(kem_only.as_bytes(), hybrid.as_bytes());
    }
}
