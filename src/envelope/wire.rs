/// Binary envelope format.
///
/// Format (big-endian integers):
/// [version(1B) | alg(1B) | flags(1B) | timestamp(8B) | kid_len(2B) | kid |
///  kem_ct_len(4B) | kem_ct | eph_x25519_pk(32B, if flags & 1) | nonce(24B) | ciphertext]
use super::EncryptedEnvelope;
use crate::crypto::aead::NONCE_LEN;
use crate::crypto::kem::SecurityLevel;
use crate::error::{Result, VaultError};

pub const ENVELOPE_VERSION: u8 = 0x01;
pub const FLAG_X25519: u8 = 0x01;
pub const EPH_PK_LEN: usize = 32;
/// Smallest possible envelope: fixed fields with an empty key id and KEM ciphertext.
pub const MIN_LEN: usize = 1 + 1 + 1 + 8 + 2 + 4 + NONCE_LEN;

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| VaultError::Serialization(format!("Envelope truncated in {what}")))?;
        let data = self.data;
        let slice = &data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn rest(self) -> &'a [u8] {
        let data = self.data;
        &data[self.offset..]
    }
}

impl EncryptedEnvelope {
    /// Serialize the envelope to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let kid_len = u16::try_from(self.key_id.len())
            .map_err(|_| VaultError::Serialization("Key id too long".into()))?;
        let kem_len = u32::try_from(self.kyber_ciphertext.len())
            .map_err(|_| VaultError::Serialization("KEM ciphertext too long".into()))?;

        let mut out = Vec::with_capacity(
            MIN_LEN + self.key_id.len() + self.kyber_ciphertext.len() + EPH_PK_LEN + self.ciphertext.len(),
        );
        out.push(ENVELOPE_VERSION);
        out.push(self.algorithm.wire_id());
        out.push(if self.x25519_ephemeral.is_some() { FLAG_X25519 } else { 0 });
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&kid_len.to_be_bytes());
        out.extend_from_slice(self.key_id.as_bytes());
        out.extend_from_slice(&kem_len.to_be_bytes());
        out.extend_from_slice(&self.kyber_ciphertext);
        if let Some(eph) = &self.x25519_ephemeral {
            out.extend_from_slice(eph);
        }
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        Ok(out)
    }

    /// Parse an envelope from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_LEN {
            return Err(VaultError::Serialization(format!(
                "Envelope too short: {} bytes (minimum {MIN_LEN})",
                data.len()
            )));
        }

        let mut r = Reader { data, offset: 0 };

        let [version] = r.array::<1>("version")?;
        if version != ENVELOPE_VERSION {
            return Err(VaultError::Serialization(format!(
                "Unsupported envelope version: {version}"
            )));
        }

        let [alg] = r.array::<1>("algorithm")?;
        let algorithm = SecurityLevel::from_wire_id(alg)?;

        let [flags] = r.array::<1>("flags")?;
        if flags & !FLAG_X25519 != 0 {
            return Err(VaultError::Serialization(format!("Unknown envelope flags: {flags:#04x}")));
        }

        let timestamp = i64::from_be_bytes(r.array::<8>("timestamp")?);

        let kid_len = u16::from_be_bytes(r.array::<2>("key id length")?) as usize;
        let key_id = String::from_utf8(r.take(kid_len, "key id")?.to_vec())
            .map_err(|_| VaultError::Serialization("Key id is not UTF-8".into()))?;

        let kem_len = u32::from_be_bytes(r.array::<4>("KEM ciphertext length")?) as usize;
        let kyber_ciphertext = r.take(kem_len, "KEM ciphertext")?.to_vec();

        let x25519_ephemeral = if flags & FLAG_X25519 != 0 {
            Some(r.array::<EPH_PK_LEN>("ephemeral key")?)
        } else {
            None
        };

        let nonce = r.array::<NONCE_LEN>("nonce")?;
        let ciphertext = r.rest().to_vec();

        Ok(Self {
            kyber_ciphertext,
            x25519_ephemeral,
            ciphertext,
            nonce,
            key_id,
            timestamp,
            algorithm,
        })
    }
}
