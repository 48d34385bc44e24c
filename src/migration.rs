/// Batch re-encryption after a key rotation.
///
/// Walks an `EnvelopeStore`, moves every envelope still under the rotated key
/// onto the current primary of the same type and writes it back. Per-record
/// failures are logged and reported, never fatal for the batch.
///
/// Must run after `KeyManager::rotate_key` has returned, not concurrently with it.
use tracing::{info, warn};

use crate::error::{Result, VaultError};
use crate::keys::KeyManager;
use crate::store::EnvelopeStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records re-encrypted and written back.
    pub migrated: usize,
    /// Records under some other key.
    pub skipped: usize,
    /// `(record_id, error)` for records that could not be migrated.
    pub failed: Vec<(String, String)>,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub async fn reencrypt_all(
    store: &dyn EnvelopeStore,
    manager: &KeyManager,
    old_key_id: &str,
) -> Result<MigrationReport> {
    let old = manager
        .get_key(old_key_id)
        .ok_or_else(|| VaultError::NotFound(old_key_id.to_string()))?;
    if !old.metadata.key_type.is_encryption() {
        return Err(VaultError::Configuration(format!(
            "key {old_key_id} is not an encryption key"
        )));
    }

    let target = manager.get_primary_key(old.metadata.key_type).ok_or_else(|| {
        VaultError::NotFound(format!("no active primary key for {}", old.metadata.key_type))
    })?;
    if target.key_id() == old_key_id {
        return Err(VaultError::Configuration(format!(
            "key {old_key_id} is still primary; rotate it before migrating"
        )));
    }

    info!(
        store = store.name(),
        old_key_id,
        new_key_id = %target.key_id(),
        "Starting re-encryption"
    );

    let mut report = MigrationReport::default();
    for record_id in store.list().await? {
        let envelope = match store.get(&record_id).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => continue,
            Err(e) => {
                warn!(record_id = %record_id, error = %e, "Failed to load envelope, skipping");
                report.failed.push((record_id, e.to_string()));
                continue;
            }
        };

        if envelope.key_id != old_key_id {
            report.skipped += 1;
            continue;
        }

        let result = match manager.reencrypt_to(&envelope, &target) {
            Ok(fresh) => store.put(&record_id, &fresh).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => report.migrated += 1,
            Err(e) => {
                warn!(record_id = %record_id, error = %e, "Failed to re-encrypt envelope, skipping");
                report.failed.push((record_id, e.to_string()));
            }
        }
    }

    info!(
        migrated = report.migrated,
        skipped = report.skipped,
        failed = report.failed.len(),
        "Re-encryption complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kem::SecurityLevel;
    use crate::keys::{KeyOptions, KeyType};
    use crate::store::InMemoryEnvelopeStore;

    fn manager_with_key() -> (KeyManager, String) {
        let km = KeyManager::in_memory();
        let key = km
            .generate_encryption_key(KeyType::DataKey, "records", SecurityLevel::Level1, KeyOptions::default())
            .unwrap();
        (km, key.key_id().to_string())
    }

    #[tokio::test]
    async fn test_reencrypt_all_after_rotation() {
        let (km, old_id) = manager_with_key();
        let store = InMemoryEnvelopeStore::new();
        for i in 0..3 {
            let env = km.encrypt_with_primary(KeyType::DataKey, format!("note {i}").as_bytes()).unwrap();
            store.put(&format!("rec-{i}"), &env).await.unwrap();
        }

        let rotation = km.rotate_key(&old_id).unwrap();
        // Written after rotation, already under the new key.
        let fresh = km.encrypt_with_primary(KeyType::DataKey, b"new note").unwrap();
        store.put("rec-new", &fresh).await.unwrap();

        let report = reencrypt_all(&store, &km, &old_id).await.unwrap();
        assert_eq!(report.migrated, 3);
        assert_eq!(report.skipped, 1);
        assert!(report.is_complete());

        for i in 0..3 {
            let env = store.get(&format!("rec-{i}")).await.unwrap().unwrap();
            assert_eq!(env.key_id, rotation.new_key_id);
            assert_eq!(km.decrypt(&env).unwrap(), format!("note {i}").as_bytes());
        }

        // A second pass has nothing left to do.
        let again = reencrypt_all(&store, &km, &old_id).await.unwrap();
        assert_eq!(again.migrated, 0);
        assert_eq!(again.skipped, 4);
    }

    #[tokio::test]
    async fn test_corrupt_record_reported_not_fatal() {
        let (km, old_id) = manager_with_key();
        let store = InMemoryEnvelopeStore::new();

        let good = km.encrypt_with_primary(KeyType::DataKey, b"ok").unwrap();
        let mut bad = km.encrypt_with_primary(KeyType::DataKey, b"bad").unwrap();
        bad.ciphertext[0] ^= 0x01;
        store.put("a", &good).await.unwrap();
        store.put("b", &bad).await.unwrap();

        km.rotate_key(&old_id).unwrap();
        let report = reencrypt_all(&store, &km, &old_id).await.unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");

        // The failed record is left untouched under the old key.
        assert_eq!(store.get("b").await.unwrap().unwrap().key_id, old_id);
    }

    #[tokio::test]
    async fn test_requires_rotation_first() {
        let (km, old_id) = manager_with_key();
        let store = InMemoryEnvelopeStore::new();

        let still_primary = reencrypt_all(&store, &km, &old_id).await;
        assert!(matches!(still_primary, Err(VaultError::Configuration(_))));

        let missing = reencrypt_all(&store, &km, "kem-nope").await;
        assert!(matches!(missing, Err(VaultError::NotFound(_))));
    }
}
