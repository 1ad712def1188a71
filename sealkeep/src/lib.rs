//! # `sealkeep`
//!
//! Envelope encryption for stored secrets, with pluggable key providers,
//! data key caching and a feature-toggled migration path from a legacy
//! single-key scheme.
//!
//! ## Features
//!
//! - AEAD encryption (ChaCha20-Poly1305) with the envelope header as AAD
//! - Self-describing envelopes: provider, scope and key reference travel
//!   with the ciphertext
//! - Local (HKDF-derived) and external (KMS-wrapped) data keys
//! - TTL-bounded data key cache with single-flight provider calls
//! - Transparent decryption of legacy ciphertext
//!
//! ## Example
//!
//! ```rust,ignore
//! use sealkeep::prelude::*;
//!
//! let config = SecretsConfig::from_file("sealkeep.toml")?;
//! let service = SecretsService::from_config(&config, Default::default())?;
//!
//! let envelope = service.encrypt(b"datasource password", "org:1").await?;
//! let plaintext = service.decrypt(&envelope).await?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod cipher;
pub mod config;
pub mod envelope;
pub mod error;
pub mod features;
pub mod header;
pub mod kdf;
pub mod key_provider;
pub mod legacy;
pub mod maintenance;
pub mod registry;
pub mod service;

pub use error::{Error, ErrorKind, ProviderError};

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::cache::DataKeyCache;
    pub use crate::config::{SecretsConfig, DEFAULT_PROVIDER_ID};
    pub use crate::envelope::EnvelopeEngine;
    pub use crate::error::{Error, ErrorKind, ProviderError};
    pub use crate::features::{FeatureToggles, StaticFeatureToggles, ENVELOPE_ENCRYPTION};
    pub use crate::key_provider::{DataKey, KeyProvider, KeyService};
    pub use crate::legacy::LegacyCipher;
    pub use crate::maintenance::spawn_cache_sweeper;
    pub use crate::registry::ProviderRegistry;
    pub use crate::service::SecretsService;
}
