//! Configuration model.
//!
//! ```toml
//! secret_key = "SdlklWklckeLS"
//! encryption_provider = "secretKey.v1"
//! features = ["envelopeEncryption"]
//!
//! [cache]
//! ttl = "15m"
//! provider_timeout = "10s"
//!
//! [providers."awskms.v1"]
//! kind = "external"
//! key_id = "alias/sealkeep"
//! region = "us-east-1"
//! ```

use crate::error::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Provider id of the local provider built from `secret_key`.
pub const DEFAULT_PROVIDER_ID: &str = "secretKey.v1";

/// Default lifetime of cached data keys.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretsConfig {
    /// Legacy encryption secret; also the default local provider secret
    pub secret_key: SecretString,

    /// Provider used for new envelopes
    #[serde(default = "default_provider")]
    pub encryption_provider: String,

    /// Enabled feature toggles
    #[serde(default)]
    pub features: Vec<String>,

    /// Data key cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Additional key providers, keyed by provider id
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Data key cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// How long a data key may be served from the cache
    #[serde(default = "default_ttl", deserialize_with = "duration::required")]
    pub ttl: Duration,

    /// Upper bound on a single provider round-trip
    #[serde(default, deserialize_with = "duration::optional")]
    pub provider_timeout: Option<Duration>,

    /// Interval of the background sweeper, if one should run
    #[serde(default, deserialize_with = "duration::optional")]
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_CACHE_TTL, provider_timeout: None, sweep_interval: None }
    }
}

/// Key provider definition.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Keys derived from a local secret
    Local {
        /// Secret to derive from; defaults to `secret_key`
        #[serde(default)]
        secret: Option<SecretString>,
    },
    /// Keys generated by an external key service
    External {
        /// Key identifier at the service (ARN, alias, ...)
        key_id: String,
        /// Service region, if the backend needs one
        #[serde(default)]
        region: Option<String>,
    },
}

fn default_provider() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

const fn default_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

impl SecretsConfig {
    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the text is not valid configuration.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, `Error::Config` if it
    /// is not valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violation.
    pub fn validate(&self) -> Result<(), Error> {
        if self.secret_key.expose_secret().is_empty() {
            return Err(Error::Config("secret_key must not be empty".to_string()));
        }
        if self.encryption_provider.is_empty() || self.encryption_provider.len() > 255 {
            return Err(Error::Config(
                "encryption_provider must be between 1 and 255 bytes".to_string(),
            ));
        }
        if self.cache.ttl.is_zero() {
            return Err(Error::Config("cache.ttl must be greater than zero".to_string()));
        }
        if self.cache.provider_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config(
                "cache.provider_timeout must be greater than zero".to_string(),
            ));
        }
        if self.cache.sweep_interval.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config("cache.sweep_interval must be greater than zero".to_string()));
        }
        for (id, provider) in &self.providers {
            if id.is_empty() || id.len() > 255 {
                return Err(Error::Config(format!(
                    "provider id `{id}` must be between 1 and 255 bytes"
                )));
            }
            if let ProviderConfig::Local { secret: Some(secret) } = provider {
                if secret.expose_secret().is_empty() {
                    return Err(Error::Config(format!("provider `{id}` has an empty secret")));
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if the named feature toggle is listed.
    #[must_use]
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.iter().any(|f| f == name)
    }
}

mod duration {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }

    pub fn optional<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
