/// Key derivation.
///
/// - HKDF-SHA256 turns KEM shared secrets into context-bound symmetric keys.
///   Same (secret, salt, info, length) always gives the same output.
/// - Argon2id turns a passphrase into the sealed key-store wrapping key.
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::crypto::sensitive::{SensitiveBytes32, SensitiveVec};
use crate::error::{Result, VaultError};

pub const SALT_LEN: usize = 32;

/// HKDF-SHA256 can expand to at most 255 hash blocks.
pub const MAX_DERIVED_LEN: usize = 255 * 32;

/// Derive `length` bytes from a shared secret with HKDF-SHA256.
pub fn derive_key(
    shared_secret: &[u8],
    salt: Option<&[u8]>,
    info: Option<&[u8]>,
    length: usize,
) -> Result<SensitiveVec> {
    if length == 0 || length > MAX_DERIVED_LEN {
        return Err(VaultError::Configuration(format!(
            "derived key length must be in 1..={MAX_DERIVED_LEN}, got {length}"
        )));
    }

    let hk = Hkdf::<Sha256>::new(salt, shared_secret);
    let mut okm = vec![0u8; length];
    hk.expand(info.unwrap_or_default(), &mut okm)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    Ok(SensitiveVec::new(okm))
}

/// 32-byte variant of [`derive_key`] for AEAD keys.
pub fn derive_key32(
    shared_secret: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<SensitiveBytes32> {
    let hk = Hkdf::<Sha256>::new(salt, shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
    Ok(SensitiveBytes32::new(okm))
}

/// Argon2id cost parameters. Stored next to every sealed blob so it can be
/// opened even after the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 262_144, // 256 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and fixtures. Not for real passphrases.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> Result<Params> {
        Params::new(self.memory_kib, self.time_cost, self.parallelism, Some(32))
            .map_err(|e| VaultError::Configuration(format!("invalid Argon2 parameters: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.to_argon2().map(|_| ())
    }
}

/// Generate a random 32-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 32-byte wrapping key from a passphrase using Argon2id.
pub fn derive_passphrase_key(
    passphrase: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<SensitiveBytes32> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(passphrase, salt, &mut output)
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;

    Ok(SensitiveBytes32::new(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_deterministic() {
        let k1 = derive_key(b"shared", Some(b"salt"), Some(b"info"), 32).unwrap();
        let k2 = derive_key(b"shared", Some(b"salt"), Some(b"info"), 32).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_hkdf_info_separates_outputs() {
        let k1 = derive_key(b"shared", None, Some(b"envelope"), 32).unwrap();
        let k2 = derive_key(b"shared", None, Some(b"token"), 32).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_hkdf_lengths() {
        assert_eq!(derive_key(b"s", None, None, 64).unwrap().len(), 64);
        assert!(matches!(
            derive_key(b"s", None, None, 0),
            Err(VaultError::Configuration(_))
        ));
        assert!(derive_key(b"s", None, None, MAX_DERIVED_LEN + 1).is_err());
    }

    #[test]
    fn test_derive_key32_matches_generic() {
        let a = derive_key32(b"shared", Some(b"salt"), b"info").unwrap();
        let b = derive_key(b"shared", Some(b"salt"), Some(b"info"), 32).unwrap();
        assert_eq!(&a.as_bytes()[..], b.as_bytes());
    }

    #[test]
    fn test_passphrase_key_deterministic() {
        let salt = [0x42u8; 32];
        let params = KdfParams::insecure_fast();
        let k1 = derive_passphrase_key(b"my passphrase", &salt, &params).unwrap();
        let k2 = derive_passphrase_key(b"my passphrase", &salt, &params).unwrap();
        let k3 = derive_passphrase_key(b"other passphrase", &salt, &params).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), k3.as_bytes());
    }

    #[test]
    fn test_invalid_argon2_params_rejected() {
        let params = KdfParams {
            memory_kib: 1,
            time_cost: 1,
            parallelism: 4,
        };
        assert!(matches!(params.validate(), Err(VaultError::Configuration(_))));
        assert!(KdfParams::default().validate().is_ok());
    }

    #[test]
    fn test_generate_salt_unique() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
