//! Self-describing ciphertext envelope.
//!
//! Byte layout:
//!
//! ```text
//! [u32 BE salt length][salt][u32 BE iv length][iv][ciphertext || 16-byte tag]
//! ```
//!
//! Device-key envelopes carry a zero-length salt. The binary form is
//! base64-encoded (standard alphabet, padded) for transport and storage.

use base64::{engine::general_purpose::STANDARD, Engine};

use lockbox_common::CryptoError;

use crate::keys::Salt;

/// Size of a length prefix.
const LENGTH_PREFIX: usize = 4;

/// Smallest IV accepted on decode.
pub const MIN_IV_SIZE: usize = 12;

/// Largest IV accepted on decode.
pub const MAX_IV_SIZE: usize = 16;

/// GCM authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    salt: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Assemble an envelope from its parts.
    ///
    /// # Errors
    /// - IV length outside 12..=16
    /// - Ciphertext shorter than the tag
    pub fn new(
        salt: Option<&Salt>,
        iv: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Result<Self, CryptoError> {
        let envelope = Self {
            salt: salt.map(|s| s.as_bytes().to_vec()).unwrap_or_default(),
            iv,
            ciphertext,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    fn validate(&self) -> Result<(), CryptoError> {
        if !(MIN_IV_SIZE..=MAX_IV_SIZE).contains(&self.iv.len()) {
            return Err(CryptoError::MalformedEnvelope(format!(
                "IV length {} outside {}..={}",
                self.iv.len(),
                MIN_IV_SIZE,
                MAX_IV_SIZE
            )));
        }
        if self.ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::MalformedEnvelope(
                "Ciphertext shorter than authentication tag".to_string(),
            ));
        }
        Ok(())
    }

    /// Salt stored in the envelope, `None` for device-key envelopes.
    pub fn salt(&self) -> Option<Salt> {
        if self.salt.is_empty() {
            None
        } else {
            Some(Salt::from_bytes(self.salt.clone()))
        }
    }

    /// IV bytes.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Ciphertext followed by the tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serialize to the binary layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            2 * LENGTH_PREFIX + self.salt.len() + self.iv.len() + self.ciphertext.len(),
        );
        out.extend_from_slice(&(self.salt.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&(self.iv.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the binary layout.
    ///
    /// # Errors
    /// - `MalformedEnvelope` if a length field overruns the buffer, the IV
    ///   length is outside 12..=16, or the ciphertext is shorter than the tag
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut reader = Reader { bytes, pos: 0 };

        let salt_len = reader.read_len("salt")?;
        let salt = reader.take(salt_len, "salt")?.to_vec();

        let iv_len = reader.read_len("IV")?;
        if !(MIN_IV_SIZE..=MAX_IV_SIZE).contains(&iv_len) {
            return Err(CryptoError::MalformedEnvelope(format!(
                "IV length {} outside {}..={}",
                iv_len, MIN_IV_SIZE, MAX_IV_SIZE
            )));
        }
        let iv = reader.take(iv_len, "IV")?.to_vec();

        let envelope = Self {
            salt,
            iv,
            ciphertext: reader.rest().to_vec(),
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Serialize and base64-encode.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Base64-decode and parse.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedEnvelope(format!("Invalid base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read_len(&mut self, field: &str) -> Result<usize, CryptoError> {
        let raw = self.take(LENGTH_PREFIX, field)?;
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(raw);
        Ok(u32::from_be_bytes(prefix) as usize)
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], CryptoError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                CryptoError::MalformedEnvelope(format!("Truncated {} field", field))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}
