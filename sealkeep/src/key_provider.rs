//! Key provider abstraction.
//!
//! A provider hands out data encryption keys for a scope and, for keys it
//! wraps rather than derives, turns a stored key reference back into the raw
//! key. The set of providers is closed: [`KeyProvider::Local`] derives keys
//! from a configured secret, [`KeyProvider::External`] delegates to a
//! [`KeyService`] such as a cloud KMS.

use crate::cipher::KEY_SIZE;
use crate::error::ProviderError;
use crate::kdf::derive_scope_key;
use secrecy::{ExposeSecret, SecretString, SecretVec};
use std::fmt;
use std::sync::Arc;

/// A data encryption key together with the reference stored in envelopes.
///
/// Cloning is cheap; the key material is shared and zeroed when the last
/// clone is dropped.
#[derive(Clone)]
pub struct DataKey {
    key_ref: Vec<u8>,
    key: Arc<SecretVec<u8>>,
}

impl DataKey {
    /// Creates a data key from its reference and raw material.
    #[must_use]
    pub fn new(key_ref: Vec<u8>, key: SecretVec<u8>) -> Self {
        Self { key_ref, key: Arc::new(key) }
    }

    /// Provider-specific reference to this key (empty for derived keys).
    #[must_use]
    pub fn key_ref(&self) -> &[u8] {
        &self.key_ref
    }

    /// Raw key material.
    #[must_use]
    pub fn expose_key(&self) -> &[u8] {
        self.key.expose_secret()
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey")
            .field("key_ref_len", &self.key_ref.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Backend of an external key provider (e.g. a cloud KMS).
///
/// Implementations must be thread-safe (`Send + Sync`) and should report
/// transient failures as `ProviderError::Network` and rejected credentials
/// as `ProviderError::Authorization`.
#[async_trait::async_trait]
pub trait KeyService: Send + Sync {
    /// Generates a fresh data key for `scope`.
    ///
    /// The returned key reference is the wrapped form of the key and must be
    /// accepted by [`KeyService::decrypt_data_key`].
    async fn generate_data_key(&self, scope: &str) -> Result<DataKey, ProviderError>;

    /// Unwraps a key reference previously returned for `scope`.
    async fn decrypt_data_key(
        &self,
        scope: &str,
        key_ref: &[u8],
    ) -> Result<SecretVec<u8>, ProviderError>;
}

/// Which kind of provider a registry entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Keys derived from a local secret
    Local,
    /// Keys generated and wrapped by an external service
    External,
}

/// Derives per-scope keys from a configured secret. Never touches the network.
pub struct LocalProvider {
    secret: SecretVec<u8>,
}

impl LocalProvider {
    /// Creates a local provider from raw secret bytes.
    #[must_use]
    pub fn new(secret: SecretVec<u8>) -> Self {
        Self { secret }
    }

    /// Creates a local provider from a textual secret, as found in configuration.
    #[must_use]
    pub fn from_secret_string(secret: &SecretString) -> Self {
        Self::new(SecretVec::new(secret.expose_secret().as_bytes().to_vec()))
    }

    fn derive(&self, scope: &str) -> Result<SecretVec<u8>, ProviderError> {
        let key = derive_scope_key(&self.secret, scope)
            .map_err(|e| ProviderError::Other(e.to_string()))?;
        debug_assert_eq!(key.expose_secret().len(), KEY_SIZE);
        Ok(key)
    }
}

/// Generates and unwraps keys through a [`KeyService`].
#[derive(Clone)]
pub struct ExternalProvider {
    service: Arc<dyn KeyService>,
}

impl ExternalProvider {
    /// Wraps a key service.
    #[must_use]
    pub fn new(service: Arc<dyn KeyService>) -> Self {
        Self { service }
    }
}

/// A registered key provider.
pub enum KeyProvider {
    /// Local secret-derived keys
    Local(LocalProvider),
    /// External key service
    External(ExternalProvider),
}

impl KeyProvider {
    /// Returns the provider kind.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Local(_) => ProviderKind::Local,
            Self::External(_) => ProviderKind::External,
        }
    }

    /// Derives or fetches the data key to encrypt new data for `scope`.
    ///
    /// # Errors
    ///
    /// Returns the provider's failure; external providers may fail with
    /// `ProviderError::Network` or `ProviderError::Authorization`.
    pub async fn data_key(&self, scope: &str) -> Result<DataKey, ProviderError> {
        match self {
            Self::Local(local) => Ok(DataKey::new(Vec::new(), local.derive(scope)?)),
            Self::External(external) => {
                let key = external.service.generate_data_key(scope).await?;
                if key.key_ref().is_empty() {
                    return Err(ProviderError::Other(
                        "key service returned an empty key reference".to_string(),
                    ));
                }
                Ok(key)
            }
        }
    }

    /// Recovers the raw key referenced by an envelope header.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::InvalidKeyReference` if the reference cannot
    /// belong to this provider, or the external service's failure.
    pub async fn resolve_key(
        &self,
        scope: &str,
        key_ref: &[u8],
    ) -> Result<SecretVec<u8>, ProviderError> {
        match self {
            Self::Local(local) => {
                if !key_ref.is_empty() {
                    return Err(ProviderError::InvalidKeyReference(
                        "local provider keys carry no reference".to_string(),
                    ));
                }
                local.derive(scope)
            }
            Self::External(external) => {
                if key_ref.is_empty() {
                    return Err(ProviderError::InvalidKeyReference(
                        "missing wrapped key".to_string(),
                    ));
                }
                external.service.decrypt_data_key(scope, key_ref).await
            }
        }
    }
}

impl fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyProvider").field(&self.kind()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedService;

    #[async_trait::async_trait]
    impl KeyService for FixedService {
        async fn generate_data_key(&self, _scope: &str) -> Result<DataKey, ProviderError> {
            Ok(DataKey::new(vec![1, 2, 3], SecretVec::new(vec![9u8; KEY_SIZE])))
        }

        async fn decrypt_data_key(
            &self,
            _scope: &str,
            key_ref: &[u8],
        ) -> Result<SecretVec<u8>, ProviderError> {
            if key_ref == [1, 2, 3] {
                Ok(SecretVec::new(vec![9u8; KEY_SIZE]))
            } else {
                Err(ProviderError::InvalidKeyReference("unknown".to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_local_provider_derives_per_scope() {
        let provider = KeyProvider::Local(LocalProvider::new(SecretVec::new(vec![5u8; 16])));

        let k1 = provider.data_key("org:1").await.unwrap();
        let k2 = provider.data_key("org:2").await.unwrap();

        assert!(k1.key_ref().is_empty());
        assert_eq!(k1.expose_key().len(), KEY_SIZE);
        assert_ne!(k1.expose_key(), k2.expose_key());

        let resolved = provider.resolve_key("org:1", &[]).await.unwrap();
        assert_eq!(resolved.expose_secret().as_slice(), k1.expose_key());
    }

    #[tokio::test]
    async fn test_local_provider_rejects_key_reference() {
        let provider = KeyProvider::Local(LocalProvider::new(SecretVec::new(vec![5u8; 16])));
        let result = provider.resolve_key("org:1", &[1]).await;
        assert!(matches!(result, Err(ProviderError::InvalidKeyReference(_))));
    }

    #[tokio::test]
    async fn test_external_provider_delegates() {
        let provider = KeyProvider::External(ExternalProvider::new(Arc::new(FixedService)));
        assert_eq!(provider.kind(), ProviderKind::External);

        let key = provider.data_key("org:1").await.unwrap();
        assert_eq!(key.key_ref(), &[1, 2, 3]);

        let resolved = provider.resolve_key("org:1", key.key_ref()).await.unwrap();
        assert_eq!(resolved.expose_secret().as_slice(), key.expose_key());

        let missing = provider.resolve_key("org:1", &[]).await;
        assert!(matches!(missing, Err(ProviderError::InvalidKeyReference(_))));
    }

    #[test]
    fn test_data_key_debug_is_redacted() {
        let key = DataKey::new(Vec::new(), SecretVec::new(vec![0xAB; KEY_SIZE]));
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("171"));
    }
}
