/// Signed audit events.
///
/// An `AuditEvent` records one security-relevant action (key rotation, PHI
/// access, token issue). `SignedAuditEvent` attaches an ML-DSA signature over
/// the event's canonical JSON so the record can be checked later without
/// trusting the log store.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::sign::{self, SignatureResult, SigningKeyPair};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// UUID v7, so ids sort by creation time.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub actor: Option<String>,
    pub resource: Option<String>,
    pub outcome: AuditOutcome,
    /// Ordered, so the canonical encoding is stable.
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            action: action.into(),
            actor: None,
            resource: None,
            outcome,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Bytes covered by the signature.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAuditEvent {
    pub event: AuditEvent,
    pub signature: SignatureResult,
}

impl SignedAuditEvent {
    pub fn sign(event: AuditEvent, key: &SigningKeyPair) -> Result<Self> {
        Self::sign_at(event, key, Utc::now())
    }

    pub(crate) fn sign_at(event: AuditEvent, key: &SigningKeyPair, now: DateTime<Utc>) -> Result<Self> {
        let signature = sign::sign_at(&event.canonical_bytes()?, key, now)?;
        Ok(Self { event, signature })
    }

    pub fn verify(&self, public_key: &[u8]) -> bool {
        match self.event.canonical_bytes() {
            Ok(bytes) => sign::verify(&bytes, &self.signature.signature, public_key),
            Err(_) => false,
        }
    }
}
