/// XChaCha20-Poly1305 AEAD for envelope payloads and the sealed key store.
///
/// Every envelope gets its own derived key and a fresh random 24-byte nonce,
/// which is large enough for random generation without collision risk.
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::crypto::sensitive::SensitiveBytes32;
use crate::error::{Result, VaultError};

pub const NONCE_LEN: usize = 24;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

/// Generate a random 256-bit symmetric key.
pub fn generate_key() -> SensitiveBytes32 {
    let mut key = [0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    SensitiveBytes32::new(key)
}

/// Generate a random 24-byte nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt under a fresh random nonce. Returns (nonce, ciphertext_with_tag).
pub fn encrypt(
    key: &SensitiveBytes32,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), payload)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt and authenticate. Any tag failure is an integrity error; the
/// cause (wrong key, edited ciphertext, edited AAD) is not distinguished.
pub fn decrypt(
    key: &SensitiveBytes32,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Configuration(e.to_string()))?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(XNonce::from_slice(nonce), payload)
        .map_err(|_| VaultError::metadata_integrity())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_key();
        let plaintext = b"patient record 4411";
        let aad = b"kid:data-key-1";

        let (nonce, ciphertext) = encrypt(&key, plaintext, aad).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);
        let decrypted = decrypt(&key, &nonce, &ciphertext, aad).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let (nonce, ciphertext) = encrypt(&generate_key(), b"secret", b"").unwrap();
        let result = decrypt(&generate_key(), &nonce, &ciphertext, b"");

        assert!(matches!(result, Err(VaultError::Integrity(_))));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = generate_key();
        let (nonce, ciphertext) = encrypt(&key, b"secret", b"correct aad").unwrap();

        assert!(decrypt(&key, &nonce, &ciphertext, b"wrong aad").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = generate_key();
        let (nonce, mut ciphertext) = encrypt(&key, b"secret", b"").unwrap();
        ciphertext[0] ^= 0x01;

        assert!(matches!(
            decrypt(&key, &nonce, &ciphertext, b""),
            Err(VaultError::Integrity(_))
        ));
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = generate_key();
        let (n1, c1) = encrypt(&key, b"same", b"").unwrap();
        let (n2, c2) = encrypt(&key, b"same", b"").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }
}
