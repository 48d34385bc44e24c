/// Envelope persistence contract.
///
/// Durable storage belongs to the embedding system. The vault only needs
/// get/put/list/delete by record id, and everything it hands over is already
/// encrypted: stores never see plaintext.
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::envelope::EncryptedEnvelope;
use crate::error::Result;

#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Human-readable name of this store.
    fn name(&self) -> &str;

    /// Insert or replace the envelope stored under `record_id`.
    async fn put(&self, record_id: &str, envelope: &EncryptedEnvelope) -> Result<()>;

    async fn get(&self, record_id: &str) -> Result<Option<EncryptedEnvelope>>;

    /// All record ids, in ascending order.
    async fn list(&self) -> Result<Vec<String>>;

    /// Returns Ok even if the record doesn't exist.
    async fn delete(&self, record_id: &str) -> Result<()>;
}

/// Store backed by a map of binary-encoded envelopes.
#[derive(Default)]
pub struct InMemoryEnvelopeStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl EnvelopeStore for InMemoryEnvelopeStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn put(&self, record_id: &str, envelope: &EncryptedEnvelope) -> Result<()> {
        let bytes = envelope.to_bytes()?;
        self.records.write().await.insert(record_id.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, record_id: &str) -> Result<Option<EncryptedEnvelope>> {
        let records = self.records.read().await;
        records
            .get(record_id)
            .map(|bytes| EncryptedEnvelope::from_bytes(bytes))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn delete(&self, record_id: &str) -> Result<()> {
        self.records.write().await.remove(record_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hybrid;
    use crate::crypto::kem::SecurityLevel;
    use crate::envelope;

    #[tokio::test]
    async fn test_put_get_list_delete() {
        let keys = hybrid::generate_key_pair(SecurityLevel::Level1, true).unwrap();
        let env = envelope::encrypt(b"lab result", &keys.public_key(), &keys.key_id).unwrap();

        let store = InMemoryEnvelopeStore::new();
        assert!(store.is_empty().await);

        store.put("patient-2", &env).await.unwrap();
        store.put("patient-1", &env).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["patient-1", "patient-2"]);

        let loaded = store.get("patient-1").await.unwrap().unwrap();
        assert_eq!(loaded, env);
        assert_eq!(envelope::decrypt(&loaded, &keys.secret_key()).unwrap(), b"lab result");

        store.delete("patient-1").await.unwrap();
        store.delete("patient-1").await.unwrap();
        assert!(store.get("patient-1").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }
}
