pub mod audit;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod migration;
pub mod phi;
pub mod store;
pub mod time;

pub use config::VaultConfig;
pub use envelope::EncryptedEnvelope;
pub use error::{Result, VaultError};
pub use keys::{KeyManager, KeyType};
