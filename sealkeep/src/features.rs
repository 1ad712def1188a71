//! Feature toggles consulted by the secrets service.

use crate::config::SecretsConfig;
use std::collections::HashSet;

/// Toggle that switches new writes from the legacy scheme to envelopes.
pub const ENVELOPE_ENCRYPTION: &str = "envelopeEncryption";

/// Source of feature toggle state.
///
/// Implementations may be backed by a remote flag service; the secrets
/// service asks once per encryption and never caches the answer.
pub trait FeatureToggles: Send + Sync {
    /// Returns `true` if the named feature is enabled.
    fn is_enabled(&self, name: &str) -> bool;
}

/// Fixed set of enabled features.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureToggles {
    enabled: HashSet<String>,
}

impl StaticFeatureToggles {
    /// Enables every feature in `names`.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { enabled: names.into_iter().map(Into::into).collect() }
    }

    /// Uses the `features` list of a configuration.
    #[must_use]
    pub fn from_config(config: &SecretsConfig) -> Self {
        Self::new(config.features.iter().cloned())
    }
}

impl FeatureToggles for StaticFeatureToggles {
    fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }
}
