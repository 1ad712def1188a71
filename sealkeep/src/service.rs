//! Secrets service.
//!
//! The entry point for the rest of an application: it picks between the
//! envelope engine and the legacy scheme for new writes, and hands every
//! read to the engine, which recognises both formats.

use crate::cache::DataKeyCache;
use crate::config::SecretsConfig;
use crate::envelope::EnvelopeEngine;
use crate::error::Error;
use crate::features::{FeatureToggles, StaticFeatureToggles, ENVELOPE_ENCRYPTION};
use crate::key_provider::KeyService;
use crate::legacy::LegacyCipher;
use crate::maintenance::spawn_cache_sweeper;
use crate::registry::ProviderRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Encrypts and decrypts stored secrets.
///
/// Cheap to clone; clones share the data key cache.
///
/// # Example
///
/// ```rust
/// # fn main() -> Result<(), sealkeep::Error> {
/// # let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
/// # runtime.block_on(async {
/// use sealkeep::prelude::*;
///
/// let config = SecretsConfig::from_toml_str(r#"
///     secret_key = "SdlklWklckeLS"
///     features = ["envelopeEncryption"]
/// "#)?;
/// let service = SecretsService::from_config(&config, Default::default())?;
///
/// let envelope = service.encrypt(b"db password", "org:1").await?;
/// assert_eq!(service.decrypt(&envelope).await?, b"db password");
/// # Ok::<(), sealkeep::Error>(())
/// # })
/// # }
/// ```
#[derive(Clone)]
pub struct SecretsService {
    engine: EnvelopeEngine,
    toggles: Arc<dyn FeatureToggles>,
    sweep_interval: Option<Duration>,
}

impl SecretsService {
    /// Creates a service over an engine and a feature toggle source.
    #[must_use]
    pub fn new(engine: EnvelopeEngine, toggles: Arc<dyn FeatureToggles>) -> Self {
        Self { engine, toggles, sweep_interval: None }
    }

    /// Sets the interval [`SecretsService::spawn_maintenance`] sweeps at.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval.filter(|i| !i.is_zero());
        self
    }

    /// Builds the full stack from configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `key_services` - Backends for the configured external providers,
    ///   keyed by provider id
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the providers in `config` and
    /// `key_services` do not line up.
    pub fn from_config(
        config: &SecretsConfig,
        key_services: HashMap<String, Arc<dyn KeyService>>,
    ) -> Result<Self, Error> {
        let registry = ProviderRegistry::from_config(config, key_services)?;
        let cache = DataKeyCache::new(Arc::new(registry), config.cache.ttl)
            .with_provider_timeout(config.cache.provider_timeout);
        let legacy = LegacyCipher::new(config.secret_key.clone());
        let engine =
            EnvelopeEngine::new(Arc::new(cache), config.encryption_provider.as_str(), legacy)?;

        Ok(Self::new(engine, Arc::new(StaticFeatureToggles::from_config(config)))
            .with_sweep_interval(config.cache.sweep_interval))
    }

    /// Starts the background cache sweeper if a sweep interval is set.
    ///
    /// The task runs until `shutdown` is cancelled. Returns `None` when no
    /// interval is configured.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use = "dropping the handle detaches the sweeper"]
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let interval = self.sweep_interval?;
        info!(interval = ?interval, "starting cache sweeper");
        Some(spawn_cache_sweeper(Arc::clone(self.engine.cache()), interval, shutdown))
    }

    /// Encrypts `plaintext` for `scope`.
    ///
    /// Writes an envelope when the `envelopeEncryption` toggle is on and a
    /// legacy payload otherwise. The toggle is read once per call.
    ///
    /// # Errors
    ///
    /// Returns error if the scope is invalid, the data key cannot be
    /// obtained, or encryption fails.
    pub async fn encrypt(&self, plaintext: &[u8], scope: &str) -> Result<Vec<u8>, Error> {
        if self.envelope_encryption_enabled() {
            self.engine.encrypt(plaintext, scope).await
        } else {
            self.engine.legacy().encrypt(plaintext)
        }
    }

    /// Decrypts an envelope or legacy payload.
    ///
    /// # Errors
    ///
    /// See [`EnvelopeEngine::decrypt`].
    pub async fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.engine.decrypt(payload).await
    }

    /// [`SecretsService::encrypt`] that gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if cancelled first; otherwise as `encrypt`.
    pub async fn encrypt_cancellable(
        &self,
        plaintext: &[u8],
        scope: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, Error> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.encrypt(plaintext, scope) => result,
        }
    }

    /// [`SecretsService::decrypt`] that gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if cancelled first; otherwise as `decrypt`.
    pub async fn decrypt_cancellable(
        &self,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, Error> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.decrypt(payload) => result,
        }
    }

    /// Encrypts every value of a string map.
    ///
    /// # Errors
    ///
    /// Returns the first encryption error.
    pub async fn encrypt_json_data(
        &self,
        data: &HashMap<String, String>,
        scope: &str,
    ) -> Result<HashMap<String, Vec<u8>>, Error> {
        let mut encrypted = HashMap::with_capacity(data.len());
        for (key, value) in data {
            encrypted.insert(key.clone(), self.encrypt(value.as_bytes(), scope).await?);
        }
        Ok(encrypted)
    }

    /// Decrypts every value of a map produced by
    /// [`SecretsService::encrypt_json_data`].
    ///
    /// # Errors
    ///
    /// Returns the first decryption error, or `Error::InvalidUtf8` naming
    /// the entry whose plaintext is not text.
    pub async fn decrypt_json_data(
        &self,
        data: &HashMap<String, Vec<u8>>,
    ) -> Result<HashMap<String, String>, Error> {
        let mut decrypted = HashMap::with_capacity(data.len());
        for (key, value) in data {
            let plaintext = self.decrypt(value).await?;
            let text = String::from_utf8(plaintext).map_err(|_| Error::InvalidUtf8(key.clone()))?;
            decrypted.insert(key.clone(), text);
        }
        Ok(decrypted)
    }

    /// Decrypts one entry of an encrypted map, returning `fallback` if the
    /// entry is missing or cannot be decrypted.
    pub async fn get_decrypted_value(
        &self,
        data: &HashMap<String, Vec<u8>>,
        key: &str,
        fallback: &str,
    ) -> String {
        let Some(value) = data.get(key) else {
            return fallback.to_string();
        };

        match self.decrypt(value).await.and_then(|plaintext| {
            String::from_utf8(plaintext).map_err(|_| Error::InvalidUtf8(key.to_string()))
        }) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    key,
                    kind = ?e.kind(),
                    error = %e,
                    "failed to decrypt secret, using fallback"
                );
                fallback.to_string()
            }
        }
    }

    /// Decrypts `payload` and encrypts it again through the current write
    /// path. Used to move legacy or old-provider data forward.
    ///
    /// # Errors
    ///
    /// Returns the decryption or encryption error.
    pub async fn reencrypt(&self, payload: &[u8], scope: &str) -> Result<Vec<u8>, Error> {
        let plaintext = zeroize::Zeroizing::new(self.decrypt(payload).await?);
        self.encrypt(&plaintext, scope).await
    }

    /// Drops cached data keys of `provider_id` for `scope`.
    pub fn invalidate_data_key(&self, provider_id: &str, scope: &str) {
        self.engine.cache().invalidate(provider_id, scope);
    }

    /// Drops every cached data key of the active provider so the next write
    /// per scope fetches a fresh key.
    pub fn rotate_data_keys(&self) {
        let provider_id = self.engine.active_provider();
        let removed = self.engine.cache().invalidate_provider(provider_id);
        info!(provider_id, removed, "rotated data keys");
    }

    /// Provider used for new envelopes.
    #[must_use]
    pub fn current_provider_id(&self) -> &str {
        self.engine.active_provider()
    }

    /// Whether new writes currently use envelope encryption.
    #[must_use]
    pub fn envelope_encryption_enabled(&self) -> bool {
        self.toggles.is_enabled(ENVELOPE_ENCRYPTION)
    }

    /// The underlying engine.
    #[must_use]
    pub const fn engine(&self) -> &EnvelopeEngine {
        &self.engine
    }
}
