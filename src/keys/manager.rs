/// Key lifecycle orchestration.
///
/// `KeyManager` issues keys with expiry policy, tracks usage, designates one
/// primary key per `KeyType` and rotates keys. It is also the entry point for
/// "encrypt/sign with whatever key is current" style calls.
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::metadata::{
    KeyEvent, KeyHandle, KeyMaterial, KeyMetadata, KeyObserver, KeyOptions, KeyStatus, KeyType,
    RotationResult,
};
use super::registry::{KeyEntry, KeyRegistry};
use crate::audit::{AuditEvent, SignedAuditEvent};
use crate::config::VaultConfig;
use crate::crypto::hash;
use crate::crypto::hybrid::{self, HybridKeyPair};
use crate::crypto::jwt::{self, Claims};
use crate::crypto::kem::SecurityLevel;
use crate::crypto::sign::{self, SignatureLevel, SignatureResult, SigningKeyPair};
use crate::envelope::{self, EncryptedEnvelope};
use crate::error::{Result, VaultError};
use crate::time::{Clock, SystemClock};

pub struct KeyManager {
    registry: Arc<KeyRegistry>,
    config: VaultConfig,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn KeyObserver>>,
}

impl KeyManager {
    pub fn new(registry: Arc<KeyRegistry>, config: VaultConfig) -> Self {
        Self {
            registry,
            config,
            clock: Arc::new(SystemClock),
            observer: None,
        }
    }

    /// A manager over a fresh, empty registry with default configuration.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(KeyRegistry::new()), VaultConfig::default())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn KeyObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn notify(&self, events: Vec<KeyEvent>) {
        for event in &events {
            if let KeyEvent::Expired { key_id } = event {
                warn!(key_id = %key_id, "Key expired");
            }
        }
        if let Some(observer) = &self.observer {
            for event in &events {
                observer.on_event(event);
            }
        }
    }

    pub fn generate_encryption_key(
        &self,
        key_type: KeyType,
        owner: &str,
        level: SecurityLevel,
        options: KeyOptions,
    ) -> Result<KeyHandle> {
        if !key_type.is_encryption() {
            return Err(VaultError::Configuration(format!(
                "{key_type} is not an encryption key type"
            )));
        }
        let days = expiry_days(options.expiry_days, self.config.encryption_key_expiry_days)?;
        let now = self.now();

        let mut keys = hybrid::generate_key_pair(level, self.config.hybrid_x25519)?;
        keys.kyber_keys.created_at = now;
        let entry = self.new_entry(key_type, owner, KeyMaterial::Encryption(keys), now, days, options.tags);

        let (handle, events) = self.registry.insert(entry, options.make_primary, now)?;
        info!(
            key_id = %handle.metadata.key_id,
            key_type = ?key_type,
            owner,
            algorithm = %handle.metadata.algorithm,
            primary = handle.metadata.primary,
            "Encryption key generated"
        );
        self.notify(events);
        Ok(handle)
    }

    pub fn generate_signing_key(
        &self,
        key_type: KeyType,
        owner: &str,
        level: SignatureLevel,
        options: KeyOptions,
    ) -> Result<KeyHandle> {
        if !key_type.is_signing() {
            return Err(VaultError::Configuration(format!(
                "{key_type} is not a signing key type"
            )));
        }
        let days = expiry_days(options.expiry_days, self.config.signing_key_expiry_days)?;
        let now = self.now();

        let keys = sign::generate_key_pair_at(level, days, now)?;
        let entry = self.new_entry(key_type, owner, KeyMaterial::Signing(keys), now, days, options.tags);

        let (handle, events) = self.registry.insert(entry, options.make_primary, now)?;
        info!(
            key_id = %handle.metadata.key_id,
            key_type = ?key_type,
            owner,
            algorithm = %handle.metadata.algorithm,
            primary = handle.metadata.primary,
            "Signing key generated"
        );
        self.notify(events);
        Ok(handle)
    }

    fn new_entry(
        &self,
        key_type: KeyType,
        owner: &str,
        material: KeyMaterial,
        now: DateTime<Utc>,
        days: u32,
        tags: std::collections::BTreeMap<String, String>,
    ) -> KeyEntry {
        let key_id = match &material {
            KeyMaterial::Encryption(kp) => kp.key_id.clone(),
            KeyMaterial::Signing(kp) => kp.key_id.clone(),
        };
        KeyEntry {
            metadata: KeyMetadata {
                key_id,
                key_type,
                owner: owner.to_string(),
                status: KeyStatus::Active,
                algorithm: material.algorithm_name(),
                created_at: now,
                expires_at: now + Duration::days(i64::from(days)),
                usage_count: 0,
                tags,
                public_key_fingerprint: hash::fingerprint(material.public_key_bytes()),
                primary: false,
                deprecated_at: None,
                rotated_to: None,
            },
            material,
        }
    }

    /// `None` for unknown ids. Expiry is evaluated on access.
    pub fn get_key(&self, key_id: &str) -> Option<KeyHandle> {
        let (handle, events) = self.registry.get(key_id, self.now());
        self.notify(events);
        handle
    }

    /// The ACTIVE primary for `key_type`, or `None` if there is none.
    pub fn get_primary_key(&self, key_type: KeyType) -> Option<KeyHandle> {
        let (handle, events) = self.registry.primary(key_type, self.now());
        self.notify(events);
        handle
    }

    /// Like `get_primary_key`, but distinguishes "expired" from "never set".
    fn require_primary(&self, key_type: KeyType) -> Result<KeyHandle> {
        if let Some(handle) = self.get_primary_key(key_type) {
            return Ok(handle);
        }
        match self.registry.primary_id(key_type) {
            Some(key_id) => Err(VaultError::Expired(format!(
                "primary {key_type} key {key_id} has expired"
            ))),
            None => Err(VaultError::NotFound(format!("no active primary key for {key_type}"))),
        }
    }

    fn require_key(&self, key_id: &str) -> Result<KeyHandle> {
        self.get_key(key_id)
            .ok_or_else(|| VaultError::NotFound(key_id.to_string()))
    }

    /// Increment the usage counter, returning the new count.
    pub fn record_key_usage(&self, key_id: &str) -> Result<u64> {
        self.registry
            .record_usage(key_id)
            .ok_or_else(|| VaultError::NotFound(key_id.to_string()))
    }

    /// Read-only metadata snapshot, oldest key first. Contains no secrets.
    pub fn export_key_inventory(&self) -> Vec<KeyMetadata> {
        let (inventory, events) = self.registry.snapshot(self.now());
        self.notify(events);
        inventory
    }

    /// Replace `key_id` with a new key of the same type, owner, level and
    /// tags. The replacement becomes primary; the old key stays readable.
    pub fn rotate_key(&self, key_id: &str) -> Result<RotationResult> {
        let old = self.require_key(key_id)?;
        if let Some(successor) = &old.metadata.rotated_to {
            return Err(VaultError::Configuration(format!(
                "key {key_id} was already rotated to {successor}"
            )));
        }
        if old.metadata.status == KeyStatus::Deprecated {
            return Err(VaultError::Configuration(format!(
                "key {key_id} is already deprecated"
            )));
        }

        let now = self.now();
        let key_type = old.metadata.key_type;
        let (material, days) = match &old.material {
            KeyMaterial::Encryption(kp) => {
                let mut keys = hybrid::generate_key_pair(kp.algorithm(), kp.x25519.is_some())?;
                keys.kyber_keys.created_at = now;
                (KeyMaterial::Encryption(keys), self.config.encryption_key_expiry_days)
            }
            KeyMaterial::Signing(kp) => {
                let days = self.config.signing_key_expiry_days;
                (KeyMaterial::Signing(sign::generate_key_pair_at(kp.level, days, now)?), days)
            }
        };
        let entry = self.new_entry(
            key_type,
            &old.metadata.owner,
            material,
            now,
            days,
            old.metadata.tags.clone(),
        );

        let (new, events) = self.registry.rotate(key_id, entry, now)?;
        let result = RotationResult {
            old_key_id: key_id.to_string(),
            new_key_id: new.metadata.key_id.clone(),
            reencryption_required: key_type.is_encryption(),
        };
        info!(
            old_key_id = %result.old_key_id,
            new_key_id = %result.new_key_id,
            key_type = ?key_type,
            reencryption_required = result.reencryption_required,
            "Key rotated"
        );
        self.notify(events);
        Ok(result)
    }

    /// Promote an ACTIVE key to primary for its type.
    pub fn set_primary(&self, key_id: &str) -> Result<()> {
        let events = self.registry.set_primary(key_id, self.now())?;
        if !events.is_empty() {
            info!(key_id, "Primary key changed");
        }
        self.notify(events);
        Ok(())
    }

    /// Encrypt under the current primary of an encryption `key_type`.
    pub fn encrypt_with_primary(&self, key_type: KeyType, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
        if !key_type.is_encryption() {
            return Err(VaultError::Configuration(format!(
                "{key_type} is not an encryption key type"
            )));
        }
        let handle = self.require_primary(key_type)?;
        let public_key = handle.public_key()?;
        let envelope = envelope::encrypt_at(
            plaintext,
            &public_key,
            handle.key_id(),
            self.now().timestamp_millis(),
        )?;
        self.record_key_usage(handle.key_id())?;
        Ok(envelope)
    }

    /// Decrypt with the key named by `envelope.key_id`, whatever its status.
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        let handle = self.require_key(&envelope.key_id)?;
        let secret_key = handle.secret_key()?;
        let plaintext = envelope::decrypt(envelope, &secret_key)?;
        self.record_key_usage(handle.key_id())?;
        debug!(key_id = %envelope.key_id, status = %handle.metadata.status, "Envelope decrypted");
        Ok(plaintext)
    }

    /// Move an envelope onto `target` (an encryption key handle).
    pub fn reencrypt_to(&self, envelope: &EncryptedEnvelope, target: &KeyHandle) -> Result<EncryptedEnvelope> {
        let source = self.require_key(&envelope.key_id)?;
        let old_secret = source.secret_key()?;
        let new_public = target.public_key()?;
        let fresh = envelope::reencrypt(envelope, &old_secret, &new_public, target.key_id())?;
        self.record_key_usage(source.key_id())?;
        self.record_key_usage(target.key_id())?;
        Ok(fresh)
    }

    /// Sign with the current primary of a signing `key_type`.
    pub fn sign_with_primary(&self, key_type: KeyType, message: &[u8]) -> Result<SignatureResult> {
        if !key_type.is_signing() {
            return Err(VaultError::Configuration(format!(
                "{key_type} is not a signing key type"
            )));
        }
        let handle = self.require_primary(key_type)?;
        let signature = sign::sign_at(message, handle.signing_key_pair()?, self.now())?;
        self.record_key_usage(handle.key_id())?;
        Ok(signature)
    }

    /// Verify a signature produced by a registered key, looked up by `signature.key_id`.
    pub fn verify(&self, message: &[u8], signature: &SignatureResult) -> bool {
        let Some(handle) = self.get_key(&signature.key_id) else {
            return false;
        };
        let Some(keys) = handle.signing_keys() else {
            return false;
        };
        sign::verify(message, &signature.signature, &keys.public_key)
    }

    /// Issue a token for `subject` with the configured TTL, signed by the JWT primary.
    pub fn issue_jwt(&self, subject: &str) -> Result<String> {
        let claims = Claims::issued_at(subject, self.config.jwt_ttl(), self.now());
        self.issue_jwt_with_claims(&claims)
    }

    pub fn issue_jwt_with_claims(&self, claims: &Claims) -> Result<String> {
        let handle = self.require_primary(KeyType::JwtSigning)?;
        let token = jwt::sign_jwt_at(claims, handle.signing_key_pair()?, self.now())?;
        self.record_key_usage(handle.key_id())?;
        Ok(token)
    }

    /// Verify a token against the key named in its `kid` header.
    pub fn verify_jwt(&self, token: &str) -> Option<Claims> {
        let kid = jwt::peek_key_id(token).ok()?;
        let handle = self.get_key(&kid)?;
        if handle.metadata.key_type != KeyType::JwtSigning {
            return None;
        }
        let keys = handle.signing_keys()?;
        let claims = jwt::verify_jwt_at(token, &keys.public_key, self.now())?;
        self.record_key_usage(&kid).ok()?;
        Some(claims)
    }

    /// Sign an audit event with the AUDIT_SIGNING primary.
    pub fn sign_audit_event(&self, event: AuditEvent) -> Result<SignedAuditEvent> {
        let handle = self.require_primary(KeyType::AuditSigning)?;
        let signed = SignedAuditEvent::sign_at(event, handle.signing_key_pair()?, self.now())?;
        self.record_key_usage(handle.key_id())?;
        Ok(signed)
    }

    /// Verify an audit event against its recorded signer.
    pub fn verify_audit_event(&self, signed: &SignedAuditEvent) -> bool {
        self.get_key(&signed.signature.key_id)
            .and_then(|handle| handle.signing_keys().map(|k| k.public_key.clone()))
            .is_some_and(|public_key| signed.verify(&public_key))
    }

    /// Handle of the encryption key pair that owns `key_id`, for callers that
    /// manage their own envelopes.
    pub fn encryption_keys(&self, key_id: &str) -> Result<HybridKeyPair> {
        self.require_key(key_id)?
            .encryption_keys()
            .cloned()
            .ok_or_else(|| VaultError::Configuration(format!("key {key_id} is not an encryption key")))
    }

    pub fn signing_keys(&self, key_id: &str) -> Result<SigningKeyPair> {
        self.require_key(key_id)?
            .signing_keys()
            .cloned()
            .ok_or_else(|| VaultError::Configuration(format!("key {key_id} is not a signing key")))
    }
}

fn expiry_days(requested: Option<u32>, default: u32) -> Result<u32> {
    match requested.unwrap_or(default) {
        0 => Err(VaultError::Configuration(
            "expiry_days must be greater than zero".into(),
        )),
        days => Ok(days),
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::time::ManualClock;

    fn manager_at(clock: Arc<ManualClock>) -> KeyManager {
        let config = VaultConfig {
            default_kem_level: SecurityLevel::Level1,
            default_signature_level: SignatureLevel::Level2,
            ..VaultConfig::default()
        };
        KeyManager::new(Arc::new(KeyRegistry::new()), config).with_clock(clock)
    }

    fn manager() -> KeyManager {
        manager_at(Arc::new(ManualClock::default()))
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<KeyEvent>>);

    impl KeyObserver for Recorder {
        fn on_event(&self, event: &KeyEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    fn test_generate_encryption_key_defaults() {
        let km = manager();
        let handle = km
            .generate_encryption_key(KeyType::DataKey, "records", SecurityLevel::Level1, KeyOptions::default())
            .unwrap();

        let meta = &handle.metadata;
        assert_eq!(meta.status, KeyStatus::Active);
        assert_eq!(meta.usage_count, 0);
        assert!(meta.primary);
        assert_eq!(meta.algorithm, "ML-KEM-512+X25519");
        assert_eq!(meta.expires_at - meta.created_at, Duration::days(365));
        assert!(handle.encryption_keys().is_some());
    }

    #[test]
    fn test_key_type_kind_enforced() {
        let km = manager();
        let enc = km.generate_encryption_key(
            KeyType::JwtSigning,
            "auth",
            SecurityLevel::Level1,
            KeyOptions::default(),
        );
        assert!(matches!(enc, Err(VaultError::Configuration(_))));

        let sig = km.generate_signing_key(KeyType::DataKey, "auth", SignatureLevel::Level2, KeyOptions::default());
        assert!(matches!(sig, Err(VaultError::Configuration(_))));

        let zero = km.generate_signing_key(
            KeyType::JwtSigning,
            "auth",
            SignatureLevel::Level2,
            KeyOptions::default().expiry_days(0),
        );
        assert!(matches!(zero, Err(VaultError::Configuration(_))));
    }

    #[test]
    fn test_second_key_not_primary_unless_requested() {
        let km = manager();
        let first = km
            .generate_signing_key(KeyType::JwtSigning, "auth", SignatureLevel::Level2, KeyOptions::default())
            .unwrap();
        let second = km
            .generate_signing_key(KeyType::JwtSigning, "auth", SignatureLevel::Level2, KeyOptions::default())
            .unwrap();
        assert!(!second.metadata.primary);
        assert_eq!(km.get_primary_key(KeyType::JwtSigning).unwrap().key_id(), first.key_id());

        let third = km
            .generate_signing_key(
                KeyType::JwtSigning,
                "auth",
                SignatureLevel::Level2,
                KeyOptions::default().primary(),
            )
            .unwrap();
        assert_eq!(km.get_primary_key(KeyType::JwtSigning).unwrap().key_id(), third.key_id());

        km.set_primary(second.key_id()).unwrap();
        assert_eq!(km.get_primary_key(KeyType::JwtSigning).unwrap().key_id(), second.key_id());
    }

    #[test]
    fn test_get_key_unknown_is_none() {
        let km = manager();
        assert!(km.get_key("kem-missing").is_none());
        assert!(km.get_primary_key(KeyType::MasterKey).is_none());
        assert!(matches!(km.record_key_usage("kem-missing"), Err(VaultError::NotFound(_))));
        assert!(matches!(km.rotate_key("kem-missing"), Err(VaultError::NotFound(_))));
    }

    #[test]
    fn test_rotate_encryption_key() {
        let km = manager();
        let old = km
            .generate_encryption_key(
                KeyType::DataKey,
                "records",
                SecurityLevel::Level1,
                KeyOptions::default().tag("env", "test"),
            )
            .unwrap();
        let envelope = km.encrypt_with_primary(KeyType::DataKey, b"chart note").unwrap();

        let rotation = km.rotate_key(old.key_id()).unwrap();
        assert!(rotation.reencryption_required);
        assert_ne!(rotation.new_key_id, rotation.old_key_id);

        let primary = km.get_primary_key(KeyType::DataKey).unwrap();
        assert_eq!(primary.key_id(), rotation.new_key_id);
        assert_eq!(primary.metadata.tags["env"], "test");
        assert_eq!(primary.metadata.owner, "records");

        let old_now = km.get_key(old.key_id()).unwrap();
        assert_eq!(old_now.metadata.status, KeyStatus::Deprecated);

        // Deprecated keys still decrypt their data.
        assert_eq!(km.decrypt(&envelope).unwrap(), b"chart note");

        let moved = km.reencrypt_to(&envelope, &primary).unwrap();
        assert_eq!(moved.key_id, rotation.new_key_id);
        assert_eq!(km.decrypt(&moved).unwrap(), b"chart note");

        assert!(matches!(km.rotate_key(old.key_id()), Err(VaultError::Configuration(_))));
    }

    #[test]
    fn test_rotate_signing_key_no_reencryption() {
        let km = manager();
        let old = km
            .generate_signing_key(KeyType::AuditSigning, "audit", SignatureLevel::Level2, KeyOptions::default())
            .unwrap();
        let rotation = km.rotate_key(old.key_id()).unwrap();
        assert!(!rotation.reencryption_required);
    }

    #[test]
    fn test_lazy_expiry_and_expired_rotation() {
        let clock = Arc::new(ManualClock::default());
        let recorder = Arc::new(Recorder::default());
        let km = manager_at(clock.clone()).with_observer(recorder.clone());

        let key = km
            .generate_signing_key(
                KeyType::JwtSigning,
                "auth",
                SignatureLevel::Level2,
                KeyOptions::default().expiry_days(1),
            )
            .unwrap();
        clock.advance(Duration::days(2));

        // Expired primary is never handed out for new work.
        assert!(km.get_primary_key(KeyType::JwtSigning).is_none());
        assert!(matches!(km.issue_jwt("alice"), Err(VaultError::Expired(_))));
        assert_eq!(km.get_key(key.key_id()).unwrap().metadata.status, KeyStatus::Expired);

        let rotation = km.rotate_key(key.key_id()).unwrap();
        assert_eq!(km.get_key(key.key_id()).unwrap().metadata.status, KeyStatus::Expired);
        assert_eq!(
            km.get_primary_key(KeyType::JwtSigning).unwrap().key_id(),
            rotation.new_key_id
        );

        let events = recorder.0.lock().clone();
        assert!(matches!(events[0], KeyEvent::Generated(_)));
        assert!(events.contains(&KeyEvent::Expired {
            key_id: key.key_id().to_string()
        }));
        assert!(events.iter().any(|e| matches!(e, KeyEvent::Rotated { .. })));
        // Expiry is reported once.
        assert_eq!(
            events.iter().filter(|e| matches!(e, KeyEvent::Expired { .. })).count(),
            1
        );
    }

    #[test]
    fn test_rotated_key_keeps_its_successor_after_expiry() {
        let clock = Arc::new(ManualClock::default());
        let km = manager_at(clock.clone());

        let first = km
            .generate_signing_key(
                KeyType::JwtSigning,
                "auth",
                SignatureLevel::Level2,
                KeyOptions::default().expiry_days(1),
            )
            .unwrap();
        let rotation = km.rotate_key(first.key_id()).unwrap();

        clock.advance(Duration::days(2));
        assert_eq!(km.get_key(first.key_id()).unwrap().metadata.status, KeyStatus::Expired);

        let again = km.rotate_key(first.key_id());
        assert!(matches!(again, Err(VaultError::Configuration(_))));

        let successor = km.get_key(&rotation.new_key_id).unwrap();
        assert_eq!(successor.metadata.status, KeyStatus::Active);
        assert!(successor.metadata.primary);
        assert_eq!(
            km.get_key(first.key_id()).unwrap().metadata.rotated_to.as_deref(),
            Some(rotation.new_key_id.as_str())
        );
        assert_eq!(km.export_key_inventory().len(), 2);
    }

    #[test]
    fn test_jwt_through_manager() {
        let km = manager();
        km.generate_signing_key(KeyType::JwtSigning, "auth", SignatureLevel::Level2, KeyOptions::default())
            .unwrap();
        let token = km.issue_jwt("patient-42").unwrap();
        let claims = km.verify_jwt(&token).unwrap();
        assert_eq!(claims.sub, "patient-42");

        let primary = km.get_primary_key(KeyType::JwtSigning).unwrap();
        assert_eq!(primary.metadata.usage_count, 2);

        // Tokens from the previous key still verify after rotation.
        km.rotate_key(primary.key_id()).unwrap();
        assert!(km.verify_jwt(&token).is_some());
        assert!(km.verify_jwt("not.a.token").is_none());
    }

    #[test]
    fn test_sign_with_primary_and_verify() {
        let km = manager();
        km.generate_signing_key(KeyType::AuditSigning, "audit", SignatureLevel::Level2, KeyOptions::default())
            .unwrap();
        let sig = km.sign_with_primary(KeyType::AuditSigning, b"login ok").unwrap();
        assert!(km.verify(b"login ok", &sig));
        assert!(!km.verify(b"login failed", &sig));

        assert!(matches!(
            km.sign_with_primary(KeyType::DataKey, b"x"),
            Err(VaultError::Configuration(_))
        ));
    }

    #[test]
    fn test_audit_events_signed_by_primary() {
        use crate::audit::AuditOutcome;

        let km = manager();
        assert!(matches!(
            km.sign_audit_event(AuditEvent::new("key.rotate", AuditOutcome::Success)),
            Err(VaultError::NotFound(_))
        ));

        let signer = km
            .generate_signing_key(KeyType::AuditSigning, "audit", SignatureLevel::Level2, KeyOptions::default())
            .unwrap();
        let event = AuditEvent::new("key.rotate", AuditOutcome::Success)
            .with_actor("ops")
            .with_resource("kem-1234");
        let signed = km.sign_audit_event(event).unwrap();
        assert_eq!(signed.signature.key_id, signer.key_id());
        assert!(km.verify_audit_event(&signed));

        let mut edited = signed.clone();
        edited.event.actor = Some("intruder".into());
        assert!(!km.verify_audit_event(&edited));
    }

    #[test]
    fn test_inventory_has_no_secrets() {
        let km = manager();
        let enc = km
            .generate_encryption_key(KeyType::MasterKey, "ops", SecurityLevel::Level1, KeyOptions::default())
            .unwrap();
        km.generate_signing_key(KeyType::JwtSigning, "auth", SignatureLevel::Level2, KeyOptions::default())
            .unwrap();

        let inventory = km.export_key_inventory();
        assert_eq!(inventory.len(), 2);
        assert!(inventory.iter().all(|m| m.primary));

        let json = serde_json::to_string(&inventory).unwrap();
        let secret_hex = hex::encode(enc.encryption_keys().unwrap().kyber_keys.secret_key_bytes());
        assert!(!json.contains(&secret_hex[..64]));
        assert!(!json.to_lowercase().contains("secret"));
    }
}
