//! Envelope encryption engine.
//!
//! Encrypts with a per-scope data key obtained through the [`DataKeyCache`]
//! and prefixes the result with an [`EnvelopeHeader`] naming the provider,
//! scope and key reference. Decryption reads the header back, so it never
//! depends on which provider is currently active. Input without an envelope
//! header is legacy ciphertext and goes to the [`LegacyCipher`].

use crate::cache::DataKeyCache;
use crate::cipher;
use crate::error::Error;
use crate::header::{is_envelope, EnvelopeHeader, MAX_ID_LEN};
use crate::legacy::LegacyCipher;
use std::sync::Arc;
use tracing::{debug, warn};

/// Envelope encryption engine.
///
/// Envelope layout:
/// ```text
/// [header][nonce:12][ciphertext][tag:16]
/// ```
/// The serialized header is the AEAD associated data, so it cannot be
/// altered without failing authentication.
#[derive(Clone)]
pub struct EnvelopeEngine {
    cache: Arc<DataKeyCache>,
    active_provider: String,
    legacy: Arc<LegacyCipher>,
}

impl EnvelopeEngine {
    /// Creates an engine writing new envelopes with `active_provider`.
    ///
    /// # Arguments
    ///
    /// * `cache` - Data key cache (and through it, the provider registry)
    /// * `active_provider` - Provider id used for new envelopes
    /// * `legacy` - Cipher for payloads written before envelope encryption
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownProvider` if `active_provider` is not registered.
    pub fn new(
        cache: Arc<DataKeyCache>,
        active_provider: impl Into<String>,
        legacy: LegacyCipher,
    ) -> Result<Self, Error> {
        let active_provider = active_provider.into();
        cache.registry().get(&active_provider)?;
        Ok(Self { cache, active_provider, legacy: Arc::new(legacy) })
    }

    /// Provider id used for new envelopes.
    #[must_use]
    pub fn active_provider(&self) -> &str {
        &self.active_provider
    }

    /// The data key cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<DataKeyCache> {
        &self.cache
    }

    /// The legacy cipher.
    #[must_use]
    pub fn legacy(&self) -> &LegacyCipher {
        &self.legacy
    }

    /// Encrypts `plaintext` for `scope` with the active provider.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The scope is empty or longer than 255 bytes
    /// - The data key cannot be obtained from the provider
    /// - Encryption fails
    pub async fn encrypt(&self, plaintext: &[u8], scope: &str) -> Result<Vec<u8>, Error> {
        validate_scope(scope)?;

        let key = self.cache.get_or_create(&self.active_provider, scope).await?;

        let header =
            EnvelopeHeader::new(self.active_provider.as_str(), scope, key.key_ref().to_vec());
        let header_bytes = header.to_bytes()?;

        let ciphertext = cipher::encrypt(key.expose_key(), plaintext, &header_bytes)?;

        let mut envelope = Vec::with_capacity(header_bytes.len() + ciphertext.len());
        envelope.extend_from_slice(&header_bytes);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    /// Decrypts an envelope, or a legacy payload if `payload` has no header.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `Error::InvalidHeader` if the payload starts like an envelope but the
    ///   header is malformed
    /// - `Error::DecryptionFailed` if the key cannot be resolved or the
    ///   ciphertext does not authenticate; see [`Error::kind`] for the cause
    /// - `Error::Legacy` if a legacy payload is too short
    pub async fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if !is_envelope(payload) {
            debug!(len = payload.len(), "no envelope header, decrypting legacy payload");
            return self.legacy.decrypt(payload);
        }

        let (header, header_len) = EnvelopeHeader::from_bytes(payload)?;
        let (header_bytes, ciphertext) = payload.split_at(header_len);

        self.open(&header, header_bytes, ciphertext).await.map_err(|source| {
            warn!(
                provider_id = header.provider_id(),
                scope = header.scope(),
                kind = ?source.kind(),
                "envelope decryption failed"
            );
            Error::DecryptionFailed {
                provider_id: header.provider_id().to_string(),
                scope: header.scope().to_string(),
                source: Box::new(source),
            }
        })
    }

    async fn open(
        &self,
        header: &EnvelopeHeader,
        header_bytes: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let key = self
            .cache
            .get_or_resolve(header.provider_id(), header.scope(), header.key_ref())
            .await?;
        cipher::decrypt(key.expose_key(), ciphertext, header_bytes)
    }
}

fn validate_scope(scope: &str) -> Result<(), Error> {
    if scope.is_empty() {
        return Err(Error::InvalidScope("scope must not be empty".to_string()));
    }
    if scope.len() > MAX_ID_LEN {
        return Err(Error::InvalidScope(format!(
            "scope too long: {} bytes (max: {MAX_ID_LEN})",
            scope.len()
        )));
    }
    Ok(())
}
