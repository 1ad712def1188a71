//! Error types for `sealkeep` operations.

use std::time::Duration;

/// Main error type for `sealkeep` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Raw key has the wrong length for the cipher
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required key length
        expected: usize,
        /// Length of the supplied key
        actual: usize,
    },

    /// Authentication tag verification failed (data may be corrupted or tampered)
    #[error("authentication failed: ciphertext may be corrupted or tampered")]
    AuthenticationFailed,

    /// Ciphertext is structurally invalid (e.g. shorter than nonce and tag)
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// No provider is registered under this identifier
    #[error("unknown key provider: {0}")]
    UnknownProvider(String),

    /// A key provider call failed
    #[error("key provider `{provider_id}` failed for scope `{scope}`: {source}")]
    KeyProvider {
        /// Provider that was called
        provider_id: String,
        /// Scope the key was requested for
        scope: String,
        /// Underlying provider failure
        #[source]
        source: ProviderError,
    },

    /// Envelope header parsing failed
    #[error("invalid envelope header: {0}")]
    InvalidHeader(String),

    /// Decrypting an envelope failed after its header was parsed
    #[error("decryption with provider `{provider_id}` failed for scope `{scope}`: {source}")]
    DecryptionFailed {
        /// Provider named in the envelope header
        provider_id: String,
        /// Scope named in the envelope header
        scope: String,
        /// Root cause
        #[source]
        source: Box<Error>,
    },

    /// Legacy (pre-envelope) ciphertext could not be processed
    #[error("legacy encryption error: {0}")]
    Legacy(String),

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Scope is empty or too long to be stored in an envelope header
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// Decrypted value is not valid UTF-8 where text was expected
    #[error("decrypted value for `{0}` is not valid UTF-8")]
    InvalidUtf8(String),

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by key providers and key services.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transient failure reaching the key service; safe to retry
    #[error("network error: {0}")]
    Network(String),

    /// The key service did not answer in time
    #[error("key service timed out after {0:?}")]
    Timeout(Duration),

    /// The key service rejected the credentials
    #[error("authorization rejected: {0}")]
    Authorization(String),

    /// The key reference does not belong to this provider
    #[error("invalid key reference: {0}")]
    InvalidKeyReference(String),

    /// Any other provider failure
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`Error`], stable across wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong key length or unusable key material
    InvalidKey,
    /// Authentication tag mismatch
    Integrity,
    /// Provider id is not configured
    UnknownProvider,
    /// Transient provider failure
    Network,
    /// Provider rejected credentials
    Authorization,
    /// Other provider failure
    Provider,
    /// Envelope header or ciphertext structure is invalid
    MalformedEnvelope,
    /// Encryption failed
    Encryption,
    /// Legacy scheme failure
    Legacy,
    /// Caller supplied invalid input
    InvalidInput,
    /// Invalid configuration or unreadable configuration file
    Configuration,
    /// Cancelled by the caller
    Cancelled,
}

impl Error {
    /// Returns the root classification of this error, looking through
    /// [`Error::DecryptionFailed`] wrappers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKeyLength { .. } | Self::KeyDerivation => ErrorKind::InvalidKey,
            Self::AuthenticationFailed => ErrorKind::Integrity,
            Self::InvalidCiphertext(_) | Self::InvalidHeader(_) => ErrorKind::MalformedEnvelope,
            Self::EncryptionFailed(_) => ErrorKind::Encryption,
            Self::UnknownProvider(_) => ErrorKind::UnknownProvider,
            Self::KeyProvider { source, .. } => source.kind(),
            Self::DecryptionFailed { source, .. } => source.kind(),
            Self::Legacy(_) => ErrorKind::Legacy,
            Self::InvalidScope(_) | Self::InvalidUtf8(_) => ErrorKind::InvalidInput,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) | Self::Io(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the caller may retry the operation (with its own backoff).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Network
    }

    /// Provider id attached to this error, if any.
    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        match self {
            Self::KeyProvider { provider_id, .. } | Self::DecryptionFailed { provider_id, .. } => {
                Some(provider_id)
            }
            Self::UnknownProvider(id) => Some(id),
            _ => None,
        }
    }
}

impl ProviderError {
    /// Maps the provider failure onto the crate-wide classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Timeout(_) => ErrorKind::Network,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::InvalidKeyReference(_) | Self::Other(_) => ErrorKind::Provider,
        }
    }
}
