/// Shared key registry.
///
/// One mutex guards both the key map and the per-type primary map, so a
/// rotation's deprecate-and-promote is a single critical section. Readers
/// never see a type with two primaries or a transient gap between them.
///
/// Every method that may flip a key to EXPIRED returns the resulting
/// `KeyEvent`s instead of notifying anyone, so observers run outside the lock.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::metadata::{KeyEvent, KeyHandle, KeyMaterial, KeyMetadata, KeyStatus, KeyType};
use crate::error::{Result, VaultError};

#[derive(Clone)]
pub(crate) struct KeyEntry {
    pub metadata: KeyMetadata,
    pub material: KeyMaterial,
}

#[derive(Default)]
struct RegistryState {
    keys: HashMap<String, KeyEntry>,
    primaries: HashMap<KeyType, String>,
}

impl RegistryState {
    /// Lazy expiry: mark the key EXPIRED if `now` is past its window.
    fn observe_expiry(&mut self, key_id: &str, now: DateTime<Utc>, events: &mut Vec<KeyEvent>) {
        if let Some(entry) = self.keys.get_mut(key_id) {
            if entry.metadata.status != KeyStatus::Expired && entry.metadata.is_expired_at(now) {
                entry.metadata.status = KeyStatus::Expired;
                events.push(KeyEvent::Expired {
                    key_id: key_id.to_string(),
                });
            }
        }
    }

    fn is_primary(&self, metadata: &KeyMetadata) -> bool {
        self.primaries.get(&metadata.key_type) == Some(&metadata.key_id)
    }

    fn handle(&self, entry: &KeyEntry) -> KeyHandle {
        let mut metadata = entry.metadata.clone();
        metadata.primary = self.is_primary(&metadata);
        KeyHandle {
            metadata,
            material: entry.material.clone(),
        }
    }

    /// True when the type has a primary that is still ACTIVE at `now`.
    fn has_usable_primary(&mut self, key_type: KeyType, now: DateTime<Utc>, events: &mut Vec<KeyEvent>) -> bool {
        let Some(id) = self.primaries.get(&key_type).cloned() else {
            return false;
        };
        self.observe_expiry(&id, now, events);
        self.keys
            .get(&id)
            .is_some_and(|entry| entry.metadata.is_active())
    }
}

/// In-memory authoritative key store, injected into `KeyManager`.
#[derive(Default)]
pub struct KeyRegistry {
    state: Mutex<RegistryState>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a freshly generated key. It becomes primary when asked to, or
    /// when its type has no usable primary. Returns the stored handle.
    pub(crate) fn insert(
        &self,
        entry: KeyEntry,
        make_primary: bool,
        now: DateTime<Utc>,
    ) -> Result<(KeyHandle, Vec<KeyEvent>)> {
        let mut events = Vec::new();
        let mut state = self.state.lock();

        let key_id = entry.metadata.key_id.clone();
        let key_type = entry.metadata.key_type;
        if state.keys.contains_key(&key_id) {
            return Err(VaultError::Configuration(format!("duplicate key id {key_id}")));
        }

        let promote = make_primary || !state.has_usable_primary(key_type, now, &mut events);
        events.push(KeyEvent::Generated(entry.metadata.clone()));
        state.keys.insert(key_id.clone(), entry);
        if promote {
            state.primaries.insert(key_type, key_id.clone());
            events.push(KeyEvent::PrimaryChanged {
                key_type,
                key_id: key_id.clone(),
            });
        }

        let handle = state
            .keys
            .get(&key_id)
            .map(|entry| state.handle(entry))
            .ok_or_else(|| VaultError::NotFound(key_id.clone()))?;
        Ok((handle, events))
    }

    pub(crate) fn get(&self, key_id: &str, now: DateTime<Utc>) -> (Option<KeyHandle>, Vec<KeyEvent>) {
        let mut events = Vec::new();
        let mut state = self.state.lock();
        state.observe_expiry(key_id, now, &mut events);
        let handle = state.keys.get(key_id).map(|entry| state.handle(entry));
        (handle, events)
    }

    /// The ACTIVE primary for `key_type`. An expired primary yields `None`.
    pub(crate) fn primary(
        &self,
        key_type: KeyType,
        now: DateTime<Utc>,
    ) -> (Option<KeyHandle>, Vec<KeyEvent>) {
        let mut events = Vec::new();
        let mut state = self.state.lock();
        if !state.has_usable_primary(key_type, now, &mut events) {
            return (None, events);
        }
        let handle = state
            .primaries
            .get(&key_type)
            .and_then(|id| state.keys.get(id))
            .map(|entry| state.handle(entry));
        (handle, events)
    }

    /// Id of the designated primary regardless of its status.
    pub(crate) fn primary_id(&self, key_type: KeyType) -> Option<String> {
        self.state.lock().primaries.get(&key_type).cloned()
    }

    pub(crate) fn record_usage(&self, key_id: &str) -> Option<u64> {
        let mut state = self.state.lock();
        let entry = state.keys.get_mut(key_id)?;
        entry.metadata.usage_count = entry.metadata.usage_count.saturating_add(1);
        Some(entry.metadata.usage_count)
    }

    /// Swap `old_key_id` for `replacement` in one critical section: the old
    /// key is deprecated (unless already EXPIRED) and the replacement becomes
    /// primary for the type.
    pub(crate) fn rotate(
        &self,
        old_key_id: &str,
        replacement: KeyEntry,
        now: DateTime<Utc>,
    ) -> Result<(KeyHandle, Vec<KeyEvent>)> {
        let mut events = Vec::new();
        let mut state = self.state.lock();

        state.observe_expiry(old_key_id, now, &mut events);
        let old = state
            .keys
            .get(old_key_id)
            .ok_or_else(|| VaultError::NotFound(old_key_id.to_string()))?;
        if let Some(successor) = &old.metadata.rotated_to {
            return Err(VaultError::Configuration(format!(
                "key {old_key_id} was already rotated to {successor}"
            )));
        }
        if old.metadata.status == KeyStatus::Deprecated {
            return Err(VaultError::Configuration(format!(
                "key {old_key_id} is already deprecated"
            )));
        }
        let key_type = old.metadata.key_type;
        if replacement.metadata.key_type != key_type {
            return Err(VaultError::Configuration(format!(
                "replacement for {old_key_id} must be a {key_type} key"
            )));
        }

        let new_key_id = replacement.metadata.key_id.clone();
        events.push(KeyEvent::Generated(replacement.metadata.clone()));
        state.keys.insert(new_key_id.clone(), replacement);

        if let Some(old) = state.keys.get_mut(old_key_id) {
            if old.metadata.status == KeyStatus::Active {
                old.metadata.status = KeyStatus::Deprecated;
                old.metadata.deprecated_at = Some(now);
            }
            old.metadata.rotated_to = Some(new_key_id.clone());
        }
        state.primaries.insert(key_type, new_key_id.clone());

        events.push(KeyEvent::Rotated {
            key_type,
            old_key_id: old_key_id.to_string(),
            new_key_id: new_key_id.clone(),
        });
        events.push(KeyEvent::PrimaryChanged {
            key_type,
            key_id: new_key_id.clone(),
        });

        let handle = state
            .keys
            .get(&new_key_id)
            .map(|entry| state.handle(entry))
            .ok_or_else(|| VaultError::NotFound(new_key_id.clone()))?;
        Ok((handle, events))
    }

    pub(crate) fn set_primary(&self, key_id: &str, now: DateTime<Utc>) -> Result<Vec<KeyEvent>> {
        let mut events = Vec::new();
        let mut state = self.state.lock();

        state.observe_expiry(key_id, now, &mut events);
        let entry = state
            .keys
            .get(key_id)
            .ok_or_else(|| VaultError::NotFound(key_id.to_string()))?;
        if !entry.metadata.is_active() {
            return Err(VaultError::Configuration(format!(
                "key {key_id} is {} and cannot be primary",
                entry.metadata.status
            )));
        }

        let key_type = entry.metadata.key_type;
        if state.primaries.get(&key_type).map(String::as_str) != Some(key_id) {
            state.primaries.insert(key_type, key_id.to_string());
            events.push(KeyEvent::PrimaryChanged {
                key_type,
                key_id: key_id.to_string(),
            });
        }
        Ok(events)
    }

    /// Metadata of every key, oldest first, with lazy expiry applied.
    pub(crate) fn snapshot(&self, now: DateTime<Utc>) -> (Vec<KeyMetadata>, Vec<KeyEvent>) {
        let mut events = Vec::new();
        let mut state = self.state.lock();

        let ids: Vec<String> = state.keys.keys().cloned().collect();
        for id in &ids {
            state.observe_expiry(id, now, &mut events);
        }

        let mut inventory: Vec<KeyMetadata> = state
            .keys
            .values()
            .map(|entry| {
                let mut metadata = entry.metadata.clone();
                metadata.primary = state.is_primary(&metadata);
                metadata
            })
            .collect();
        inventory.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key_id.cmp(&b.key_id))
        });
        (inventory, events)
    }

    /// Full copy of entries and primaries, for sealing.
    pub(crate) fn export_entries(&self) -> (Vec<KeyEntry>, Vec<(KeyType, String)>) {
        let state = self.state.lock();
        let mut entries: Vec<KeyEntry> = state.keys.values().cloned().collect();
        entries.sort_by(|a, b| a.metadata.key_id.cmp(&b.metadata.key_id));
        let mut primaries: Vec<(KeyType, String)> = state
            .primaries
            .iter()
            .map(|(t, id)| (*t, id.clone()))
            .collect();
        primaries.sort();
        (entries, primaries)
    }

    /// Build a registry from previously exported entries.
    pub(crate) fn from_entries(entries: Vec<KeyEntry>, primaries: Vec<(KeyType, String)>) -> Result<Self> {
        let mut state = RegistryState::default();
        for entry in entries {
            let key_id = entry.metadata.key_id.clone();
            if state.keys.insert(key_id.clone(), entry).is_some() {
                return Err(VaultError::Serialization(format!("duplicate key id {key_id}")));
            }
        }
        for (key_type, key_id) in primaries {
            let matches = state
                .keys
                .get(&key_id)
                .is_some_and(|entry| entry.metadata.key_type == key_type);
            if !matches {
                return Err(VaultError::Serialization(format!(
                    "primary {key_id} for {key_type} is not a registered key of that type"
                )));
            }
            state.primaries.insert(key_type, key_id);
        }
        Ok(Self {
            state: Mutex::new(state),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;

    use chrono::Duration;

    use super::*;
    use crate::crypto::sign::{self, SignatureLevel};

    fn entry(key_type: KeyType, now: DateTime<Utc>, days: i64) -> KeyEntry {
        let kp = sign::generate_key_pair_at(SignatureLevel::Level2, 1, now).unwrap();
        KeyEntry {
            metadata: KeyMetadata {
                key_id: kp.key_id.clone(),
                key_type,
                owner: "tests".into(),
                status: KeyStatus::Active,
                algorithm: "ML-DSA-44".into(),
                created_at: now,
                expires_at: now + Duration::days(days),
                usage_count: 0,
                tags: BTreeMap::new(),
                public_key_fingerprint: String::new(),
                primary: false,
                deprecated_at: None,
                rotated_to: None,
            },
            material: KeyMaterial::Signing(kp),
        }
    }

    #[test]
    fn test_first_key_becomes_primary() {
        let now = Utc::now();
        let registry = KeyRegistry::new();
        let (first, events) = registry.insert(entry(KeyType::JwtSigning, now, 30), false, now).unwrap();
        assert!(first.metadata.primary);
        assert_eq!(events.len(), 2);

        let (second, _) = registry.insert(entry(KeyType::JwtSigning, now, 30), false, now).unwrap();
        assert!(!second.metadata.primary);

        let (primary, _) = registry.primary(KeyType::JwtSigning, now);
        assert_eq!(primary.unwrap().key_id(), first.key_id());
    }

    #[test]
    fn test_rotation_swaps_primary() {
        let now = Utc::now();
        let registry = KeyRegistry::new();
        let (old, _) = registry.insert(entry(KeyType::AuditSigning, now, 30), false, now).unwrap();
        let (new, events) = registry
            .rotate(old.key_id(), entry(KeyType::AuditSigning, now, 30), now)
            .unwrap();

        assert!(new.metadata.primary);
        assert!(events.iter().any(|e| matches!(e, KeyEvent::Rotated { .. })));

        let (old_now, _) = registry.get(old.key_id(), now);
        let old_now = old_now.unwrap();
        assert_eq!(old_now.metadata.status, KeyStatus::Deprecated);
        assert_eq!(old_now.metadata.rotated_to.as_deref(), Some(new.key_id()));
        assert!(!old_now.metadata.primary);

        let again = registry.rotate(old.key_id(), entry(KeyType::AuditSigning, now, 30), now);
        assert!(matches!(again, Err(VaultError::Configuration(_))));
    }

    #[test]
    fn test_rotated_key_cannot_rotate_again_after_expiry() {
        let now = Utc::now();
        let registry = KeyRegistry::new();
        let (old, _) = registry.insert(entry(KeyType::JwtSigning, now, 1), false, now).unwrap();
        let (successor, _) = registry
            .rotate(old.key_id(), entry(KeyType::JwtSigning, now, 30), now)
            .unwrap();

        let later = now + Duration::days(2);
        let (old_later, _) = registry.get(old.key_id(), later);
        assert_eq!(old_later.unwrap().metadata.status, KeyStatus::Expired);

        let again = registry.rotate(old.key_id(), entry(KeyType::JwtSigning, later, 30), later);
        assert!(matches!(again, Err(VaultError::Configuration(_))));
        assert_eq!(registry.len(), 2);

        let (primary, _) = registry.primary(KeyType::JwtSigning, later);
        assert_eq!(primary.unwrap().key_id(), successor.key_id());
        let (old_later, _) = registry.get(old.key_id(), later);
        assert_eq!(old_later.unwrap().metadata.rotated_to.as_deref(), Some(successor.key_id()));
    }

    #[test]
    fn test_rotation_rejects_type_change() {
        let now = Utc::now();
        let registry = KeyRegistry::new();
        let (old, _) = registry.insert(entry(KeyType::AuditSigning, now, 30), false, now).unwrap();
        let result = registry.rotate(old.key_id(), entry(KeyType::JwtSigning, now, 30), now);
        assert!(matches!(result, Err(VaultError::Configuration(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_expired_primary_hidden_and_replaced() {
        let now = Utc::now();
        let registry = KeyRegistry::new();
        let (old, _) = registry.insert(entry(KeyType::JwtSigning, now, 1), false, now).unwrap();

        let later = now + Duration::days(2);
        let (primary, events) = registry.primary(KeyType::JwtSigning, later);
        assert!(primary.is_none());
        assert_eq!(
            events,
            vec![KeyEvent::Expired {
                key_id: old.key_id().to_string()
            }]
        );

        let (fresh, _) = registry.insert(entry(KeyType::JwtSigning, later, 30), false, later).unwrap();
        assert!(fresh.metadata.primary);
        assert!(registry.set_primary(old.key_id(), later).is_err());
    }

    #[test]
    fn test_concurrent_usage_counts() {
        let now = Utc::now();
        let registry = Arc::new(KeyRegistry::new());
        let (handle, _) = registry.insert(entry(KeyType::JwtSigning, now, 30), false, now).unwrap();
        let key_id = handle.key_id().to_string();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key_id = key_id.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        registry.record_usage(&key_id).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let (handle, _) = registry.get(&key_id, now);
        assert_eq!(handle.unwrap().metadata.usage_count, 400);
        assert_eq!(registry.record_usage("missing"), None);
    }

    #[test]
    fn test_export_and_rebuild() {
        let now = Utc::now();
        let registry = KeyRegistry::new();
        let (a, _) = registry.insert(entry(KeyType::JwtSigning, now, 30), false, now).unwrap();
        registry.insert(entry(KeyType::AuditSigning, now, 30), false, now).unwrap();

        let (entries, primaries) = registry.export_entries();
        let rebuilt = KeyRegistry::from_entries(entries, primaries).unwrap();
        assert_eq!(rebuilt.len(), 2);
        let (primary, _) = rebuilt.primary(KeyType::JwtSigning, now);
        assert_eq!(primary.unwrap().key_id(), a.key_id());

        let bad = KeyRegistry::from_entries(Vec::new(), vec![(KeyType::DataKey, "nope".into())]);
        assert!(bad.is_err());
    }
}
