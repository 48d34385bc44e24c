/// BLAKE3 helpers.
///
/// Used for combining hybrid shared secrets, for the KEM fallback secret on
/// malformed input, and for public-key fingerprints in the key inventory.

/// Hash arbitrary data with BLAKE3.
pub fn hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// Keyed hash for domain-separated operations.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    blake3::keyed_hash(key, data).into()
}

/// BLAKE3 key derivation mode. `context` must be a hardcoded, unique string.
pub fn derive_key(context: &str, ikm: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, ikm)
}

/// Short hex fingerprint of a public key, safe to log and export.
pub fn fingerprint(public_key: &[u8]) -> String {
    hex::encode(&hash(public_key)[..16])
}
