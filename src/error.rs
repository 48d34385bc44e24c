use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    /// Unsupported security level, malformed input, or an operation the key
    /// or record is not in a state to accept. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Authenticated decryption failed. Ciphertext and metadata tamper are
    /// deliberately indistinguishable.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Integrity check failed for field `{field}`")]
    FieldIntegrity { field: String },

    #[error("Key expired: {0}")]
    Expired(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Only a missing key is worth retrying (with a different key id).
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::NotFound(_))
    }

    pub(crate) fn metadata_integrity() -> Self {
        VaultError::Integrity("metadata integrity check failed".into())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
