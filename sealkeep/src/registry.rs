//! Provider registry: resolves provider ids to key providers.

use crate::config::{ProviderConfig, SecretsConfig, DEFAULT_PROVIDER_ID};
use crate::error::Error;
use crate::key_provider::{ExternalProvider, KeyProvider, KeyService, LocalProvider};
use secrecy::SecretVec;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Maps provider ids to registered [`KeyProvider`]s.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<KeyProvider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a local provider deriving keys from `secret`.
    #[must_use]
    pub fn with_local(mut self, id: impl Into<String>, secret: SecretVec<u8>) -> Self {
        self.register(id, KeyProvider::Local(LocalProvider::new(secret)));
        self
    }

    /// Registers an external provider backed by `service`.
    #[must_use]
    pub fn with_external(mut self, id: impl Into<String>, service: Arc<dyn KeyService>) -> Self {
        self.register(id, KeyProvider::External(ExternalProvider::new(service)));
        self
    }

    /// Registers `provider` under `id`, replacing any previous entry.
    pub fn register(&mut self, id: impl Into<String>, provider: KeyProvider) {
        let id = id.into();
        info!(provider_id = %id, kind = ?provider.kind(), "registered key provider");
        self.providers.insert(id, Arc::new(provider));
    }

    /// Builds a registry from configuration.
    ///
    /// The default provider (`secretKey.v1`) is always registered as a local
    /// provider over `secret_key` unless the configuration overrides it.
    /// External providers take their backend from `key_services`, keyed by
    /// provider id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if an external provider has no key service, a
    /// key service has no matching provider, or the active provider is not
    /// registered.
    pub fn from_config(
        config: &SecretsConfig,
        mut key_services: HashMap<String, Arc<dyn KeyService>>,
    ) -> Result<Self, Error> {
        let mut registry = Self::new();

        if !config.providers.contains_key(DEFAULT_PROVIDER_ID) {
            registry.register(
                DEFAULT_PROVIDER_ID,
                KeyProvider::Local(LocalProvider::from_secret_string(&config.secret_key)),
            );
        }

        for (id, provider) in &config.providers {
            match provider {
                ProviderConfig::Local { secret } => {
                    let secret = secret.as_ref().unwrap_or(&config.secret_key);
                    registry.register(
                        id.as_str(),
                        KeyProvider::Local(LocalProvider::from_secret_string(secret)),
                    );
                }
                ProviderConfig::External { .. } => {
                    let service = key_services.remove(id).ok_or_else(|| {
                        Error::Config(format!(
                            "no key service supplied for external provider `{id}`"
                        ))
                    })?;
                    registry.register(
                        id.as_str(),
                        KeyProvider::External(ExternalProvider::new(service)),
                    );
                }
            }
        }

        if let Some(id) = key_services.keys().next() {
            return Err(Error::Config(format!(
                "key service supplied for `{id}`, which is not an external provider"
            )));
        }

        if !registry.contains(&config.encryption_provider) {
            return Err(Error::Config(format!(
                "active encryption provider `{}` is not configured",
                config.encryption_provider
            )));
        }

        Ok(registry)
    }

    /// Looks up a provider.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownProvider` if nothing is registered under `id`.
    pub fn get(&self, id: &str) -> Result<Arc<KeyProvider>, Error> {
        self.providers.get(id).cloned().ok_or_else(|| Error::UnknownProvider(id.to_string()))
    }

    /// Returns `true` if a provider is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// Registered provider ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::ProviderKind;

    fn config(toml: &str) -> SecretsConfig {
        SecretsConfig::from_toml_str(toml).expect("valid config")
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new().with_local("local", SecretVec::new(vec![1; 32]));

        assert!(registry.get("local").is_ok());
        let err = registry.get("awskms.v1").unwrap_err();
        assert!(matches!(err, Error::UnknownProvider(ref id) if id == "awskms.v1"));
    }

    #[test]
    fn test_from_config_registers_default_provider() {
        let registry =
            ProviderRegistry::from_config(&config("secret_key = \"s3cret\""), HashMap::new())
                .unwrap();

        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec![DEFAULT_PROVIDER_ID]);
        assert_eq!(registry.get(DEFAULT_PROVIDER_ID).unwrap().kind(), ProviderKind::Local);
    }

    #[test]
    fn test_from_config_requires_key_service_for_external() {
        let cfg = config(
            r#"
            secret_key = "s3cret"

            [providers."awskms.v1"]
            kind = "external"
            key_id = "alias/test"
            "#,
        );

        let err = ProviderRegistry::from_config(&cfg, HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_config_rejects_missing_active_provider() {
        let cfg = config(
            r#"
            secret_key = "s3cret"
            encryption_provider = "local"
            "#,
        );

        let err = ProviderRegistry::from_config(&cfg, HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_config_local_override() {
        let cfg = config(
            r#"
            secret_key = "s3cret"
            encryption_provider = "local"

            [providers.local]
            kind = "local"
            secret = "other"
            "#,
        );

        let registry = ProviderRegistry::from_config(&cfg, HashMap::new()).unwrap();
        assert!(registry.contains("local"));
        assert!(registry.contains(DEFAULT_PROVIDER_ID));
    }
}
