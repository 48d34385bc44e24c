/// Field-level encryption of structured records.
///
/// A `PhiSchema` names the sensitive fields of a record. Encryption replaces
/// each named value with a base64 envelope and sets a `<field>_encrypted`
/// sibling flag; every other field passes through untouched. Both directions
/// are all-or-nothing: on any error the caller gets no partially processed
/// record.
///
/// Named fields missing from the record are an error, so a misspelled schema
/// entry cannot silently leave data in cleartext.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::hybrid::{HybridPublicKey, HybridSecretKey};
use crate::envelope::{self, EncryptedEnvelope};
use crate::error::{Result, VaultError};

pub const ENCRYPTED_SUFFIX: &str = "_encrypted";

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Directly identifies a person: name, SSN, MRN.
    Identifier,
    Contact,
    Clinical,
    Financial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiField {
    pub name: String,
    pub sensitivity: Sensitivity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiSchema {
    fields: Vec<PhiField>,
}

impl PhiSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, sensitivity: Sensitivity) -> Self {
        self.fields.push(PhiField {
            name: name.into(),
            sensitivity,
        });
        self
    }

    /// Schema from bare field names, all tagged `Identifier`.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .fold(Self::new(), |schema, name| schema.field(name, Sensitivity::Identifier))
    }

    pub fn fields(&self) -> &[PhiField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn with_sensitivity(&self, sensitivity: Sensitivity) -> impl Iterator<Item = &PhiField> {
        self.fields.iter().filter(move |f| f.sensitivity == sensitivity)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(VaultError::Configuration("PHI schema has no fields".into()));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(VaultError::Configuration("PHI field name is empty".into()));
            }
            if field.name.ends_with(ENCRYPTED_SUFFIX) {
                return Err(VaultError::Configuration(format!(
                    "PHI field `{}` collides with the `{ENCRYPTED_SUFFIX}` marker namespace",
                    field.name
                )));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(VaultError::Configuration(format!(
                    "PHI field `{}` listed twice",
                    field.name
                )));
            }
        }
        Ok(())
    }
}

pub fn marker_name(field: &str) -> String {
    format!("{field}{ENCRYPTED_SUFFIX}")
}

fn is_marked(record: &Record, field: &str) -> bool {
    matches!(record.get(&marker_name(field)), Some(Value::Bool(true)))
}

/// Encrypts and decrypts the fields named by one schema.
#[derive(Debug, Clone)]
pub struct PhiFieldEncryptor {
    schema: PhiSchema,
}

impl PhiFieldEncryptor {
    pub fn new(schema: PhiSchema) -> Result<Self> {
        schema.validate()?;
        Ok(Self { schema })
    }

    pub fn schema(&self) -> &PhiSchema {
        &self.schema
    }

    pub fn encrypt(&self, record: &Record, public_key: &HybridPublicKey, key_id: &str) -> Result<Record> {
        let mut out = record.clone();
        for field in &self.schema.fields {
            let name = field.name.as_str();
            let value = record.get(name).ok_or_else(|| {
                VaultError::Configuration(format!("PHI field `{name}` not present in record"))
            })?;
            if is_marked(record, name) {
                return Err(VaultError::Configuration(format!(
                    "PHI field `{name}` is already encrypted"
                )));
            }

            let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
            let sealed = envelope::encrypt(&plaintext, public_key, key_id)?;
            out.insert(name.to_string(), Value::String(sealed.to_base64()?));
            out.insert(marker_name(name), Value::Bool(true));
        }

        debug!(fields = self.schema.len(), key_id, "PHI fields encrypted");
        Ok(out)
    }

    pub fn decrypt(&self, record: &Record, secret_key: &HybridSecretKey) -> Result<Record> {
        let mut out = record.clone();
        for field in &self.schema.fields {
            let name = field.name.as_str();
            if !is_marked(record, name) {
                return Err(VaultError::Configuration(format!(
                    "PHI field `{name}` is not marked encrypted"
                )));
            }
            let field_error = || VaultError::FieldIntegrity {
                field: name.to_string(),
            };

            let encoded = record.get(name).and_then(Value::as_str).ok_or_else(field_error)?;
            let sealed = EncryptedEnvelope::from_base64(encoded).map_err(|_| field_error())?;
            let plaintext = Zeroizing::new(envelope::decrypt(&sealed, secret_key).map_err(|_| {
                warn!(field = name, key_id = %sealed.key_id, "PHI field failed authentication");
                field_error()
            })?);
            let value: Value = serde_json::from_slice(&plaintext).map_err(|_| field_error())?;

            out.insert(name.to_string(), value);
            out.remove(&marker_name(name));
        }

        debug!(fields = self.schema.len(), "PHI fields decrypted");
        Ok(out)
    }
}

pub fn encrypt_phi(
    record: &Record,
    schema: &PhiSchema,
    public_key: &HybridPublicKey,
    key_id: &str,
) -> Result<Record> {
    PhiFieldEncryptor::new(schema.clone())?.encrypt(record, public_key, key_id)
}

pub fn decrypt_phi(record: &Record, schema: &PhiSchema, secret_key: &HybridSecretKey) -> Result<Record> {
    PhiFieldEncryptor::new(schema.clone())?.decrypt(record, secret_key)
}

/// A typed record that knows which of its fields are PHI.
pub trait PhiRecord: Serialize + DeserializeOwned {
    fn phi_schema() -> PhiSchema;
}

/// Serialize `record` and encrypt its PHI fields.
pub fn encrypt_record<T: PhiRecord>(record: &T, public_key: &HybridPublicKey, key_id: &str) -> Result<Record> {
    let Value::Object(map) = serde_json::to_value(record)? else {
        return Err(VaultError::Configuration(
            "PHI records must serialize to a JSON object".into(),
        ));
    };
    encrypt_phi(&map, &T::phi_schema(), public_key, key_id)
}

pub fn decrypt_record<T: PhiRecord>(record: &Record, secret_key: &HybridSecretKey) -> Result<T> {
    let plain = decrypt_phi(record, &T::phi_schema(), secret_key)?;
    Ok(serde_json::from_value(Value::Object(plain))?)
}
