/// Cryptographic capabilities used by the envelope and key-management layers.
///
/// Every function here is stateless with respect to shared data and may run
/// in parallel on caller-owned buffers.
pub mod aead;
pub mod hash;
pub mod hybrid;
pub mod jwt;
pub mod kdf;
pub mod kem;
pub mod sensitive;
pub mod sign;
