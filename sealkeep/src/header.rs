//! Envelope header format.
//!
//! The header prefixes every envelope and carries what decryption needs:
//! - Format version
//! - Key provider identifier
//! - Scope the data key is bound to
//! - Provider-specific key reference (empty for derived keys)

use crate::error::Error;

/// Format version of the envelope header.
pub const ENVELOPE_VERSION: u8 = 1;

/// Maximum length of provider ids and scopes.
pub const MAX_ID_LEN: usize = u8::MAX as usize;

/// Maximum length of a key reference.
pub const MAX_KEY_REF_LEN: usize = u16::MAX as usize;

/// Returns `true` if `data` starts with the envelope version byte.
///
/// Anything else is legacy ciphertext. Legacy payloads start with an
/// alphanumeric salt, so they never collide with the version byte.
#[must_use]
pub fn is_envelope(data: &[u8]) -> bool {
    data.first() == Some(&ENVELOPE_VERSION)
}

/// Envelope header.
///
/// Format:
/// ```text
/// [version:1][provider_id_len:1][provider_id:N][scope_len:1][scope:S][key_ref_len:2][key_ref:K]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    provider_id: String,
    scope: String,
    key_ref: Vec<u8>,
}

impl EnvelopeHeader {
    /// Creates a new envelope header.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, scope: impl Into<String>, key_ref: Vec<u8>) -> Self {
        Self { provider_id: provider_id.into(), scope: scope.into(), key_ref }
    }

    /// Returns the key provider identifier.
    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Returns the scope.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the provider-specific key reference.
    #[must_use]
    pub fn key_ref(&self) -> &[u8] {
        &self.key_ref
    }

    /// Serializes the header to bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeader` if the provider id is empty or any
    /// field exceeds its length prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        if self.provider_id.is_empty() {
            return Err(Error::InvalidHeader("empty provider id".to_string()));
        }
        if self.provider_id.len() > MAX_ID_LEN {
            return Err(Error::InvalidHeader(format!(
                "provider id too long: {} bytes (max: {MAX_ID_LEN})",
                self.provider_id.len()
            )));
        }
        if self.scope.len() > MAX_ID_LEN {
            return Err(Error::InvalidHeader(format!(
                "scope too long: {} bytes (max: {MAX_ID_LEN})",
                self.scope.len()
            )));
        }
        if self.key_ref.len() > MAX_KEY_REF_LEN {
            return Err(Error::InvalidHeader(format!(
                "key reference too long: {} bytes (max: {MAX_KEY_REF_LEN})",
                self.key_ref.len()
            )));
        }

        let mut bytes =
            Vec::with_capacity(5 + self.provider_id.len() + self.scope.len() + self.key_ref.len());

        bytes.push(ENVELOPE_VERSION);

        // Lengths validated above
        #[allow(clippy::cast_possible_truncation)]
        bytes.push(self.provider_id.len() as u8);
        bytes.extend_from_slice(self.provider_id.as_bytes());

        #[allow(clippy::cast_possible_truncation)]
        bytes.push(self.scope.len() as u8);
        bytes.extend_from_slice(self.scope.as_bytes());

        #[allow(clippy::cast_possible_truncation)]
        let key_ref_len = self.key_ref.len() as u16;
        bytes.extend_from_slice(&key_ref_len.to_be_bytes());
        bytes.extend_from_slice(&self.key_ref);

        Ok(bytes)
    }

    /// Deserializes a header from the front of `data`.
    ///
    /// Returns the header and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeader` if the version is not
    /// [`ENVELOPE_VERSION`] or the header is truncated or malformed.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), Error> {
        let mut reader = Reader { data, pos: 0 };

        let version = reader.u8("version")?;
        if version != ENVELOPE_VERSION {
            return Err(Error::InvalidHeader(format!(
                "unsupported version: {version} (supported: {ENVELOPE_VERSION})"
            )));
        }

        let provider_len = usize::from(reader.u8("provider id length")?);
        if provider_len == 0 {
            return Err(Error::InvalidHeader("empty provider id".to_string()));
        }
        let provider_id = reader.utf8(provider_len, "provider id")?;

        let scope_len = usize::from(reader.u8("scope length")?);
        let scope = reader.utf8(scope_len, "scope")?;

        let key_ref_len = usize::from(reader.u16("key reference length")?);
        let key_ref = reader.take(key_ref_len, "key reference")?.to_vec();

        Ok((Self { provider_id, scope, key_ref }, reader.pos))
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::InvalidHeader(format!("{what} truncated")))?;
        let data = self.data;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8, Error> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, Error> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn utf8(&mut self, len: usize, what: &str) -> Result<String, Error> {
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::InvalidHeader(format!("invalid {what} UTF-8: {e}")))
    }
}
