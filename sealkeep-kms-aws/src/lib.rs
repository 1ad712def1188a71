//! AWS KMS key service for sealkeep.
//!
//! Data keys are generated by KMS `GenerateDataKey` under a configured KMS
//! key; the KMS ciphertext blob becomes the envelope's key reference and is
//! unwrapped with `Decrypt` on read. The scope is passed as encryption
//! context, so a wrapped key only unwraps for the scope it was made for.
//!
//! # Example
//!
//! ```rust,no_run
//! use sealkeep::prelude::*;
//! use sealkeep_kms_aws::AwsKmsKeyService;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn example(config: SecretsConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let kms = AwsKmsKeyService::new("alias/sealkeep", Some("us-east-1")).await;
//!
//! let mut key_services: HashMap<String, Arc<dyn KeyService>> = HashMap::new();
//! key_services.insert("awskms.v1".to_string(), Arc::new(kms));
//!
//! let service = SecretsService::from_config(&config, key_services)?;
//! # Ok(())
//! # }
//! ```
//!
//! # AWS Configuration
//!
//! The service uses the AWS SDK's default credential chain:
//! - Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)
//! - AWS credentials file (~/.aws/credentials)
//! - IAM instance profile (for EC2)
//! - ECS task role
//! - Web identity token (for EKS)

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use aws_config::{BehaviorVersion, Region};
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::DataKeySpec;
use aws_sdk_kms::Client as KmsClient;
use sealkeep::error::ProviderError;
use sealkeep::key_provider::{DataKey, KeyService};
use secrecy::SecretVec;
use std::error::Error as StdError;
use std::fmt::Debug;
use tracing::debug;

/// Encryption context key carrying the scope.
pub const SCOPE_CONTEXT_KEY: &str = "scope";

/// [`KeyService`] backed by AWS KMS.
#[derive(Debug, Clone)]
pub struct AwsKmsKeyService {
    client: KmsClient,
    key_id: String,
}

impl AwsKmsKeyService {
    /// Creates a service using the default AWS configuration chain.
    ///
    /// # Arguments
    ///
    /// * `key_id` - KMS key ID, ARN, or alias (e.g., "alias/sealkeep")
    /// * `region` - Overrides the region from the environment
    pub async fn new(key_id: impl Into<String>, region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;
        Self::with_client(KmsClient::new(&config), key_id)
    }

    /// Creates a service over an existing client.
    #[must_use]
    pub fn with_client(client: KmsClient, key_id: impl Into<String>) -> Self {
        Self { client, key_id: key_id.into() }
    }

    /// KMS key used to generate data keys.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[async_trait::async_trait]
impl KeyService for AwsKmsKeyService {
    async fn generate_data_key(&self, scope: &str) -> Result<DataKey, ProviderError> {
        debug!(key_id = %self.key_id, scope, "kms generate data key");

        let response = self
            .client
            .generate_data_key()
            .key_id(&self.key_id)
            .key_spec(DataKeySpec::Aes256)
            .encryption_context(SCOPE_CONTEXT_KEY, scope)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let plaintext = response
            .plaintext()
            .ok_or_else(|| ProviderError::Other("no plaintext key returned".to_string()))?;
        let wrapped = response
            .ciphertext_blob()
            .ok_or_else(|| ProviderError::Other("no ciphertext blob returned".to_string()))?;

        Ok(DataKey::new(wrapped.as_ref().to_vec(), SecretVec::new(plaintext.as_ref().to_vec())))
    }

    async fn decrypt_data_key(
        &self,
        scope: &str,
        key_ref: &[u8],
    ) -> Result<SecretVec<u8>, ProviderError> {
        debug!(key_id = %self.key_id, scope, "kms decrypt data key");

        let response = self
            .client
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(key_ref.to_vec()))
            .encryption_context(SCOPE_CONTEXT_KEY, scope)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let plaintext = response
            .plaintext()
            .ok_or_else(|| ProviderError::Other("no plaintext key returned".to_string()))?;

        Ok(SecretVec::new(plaintext.as_ref().to_vec()))
    }
}

fn classify<E, R>(err: &SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + StdError + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(err).to_string();
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ProviderError::Network(message)
        }
        _ => classify_code(err.code(), message),
    }
}

/// Maps a KMS error code onto a [`ProviderError`].
#[must_use]
pub fn classify_code(code: Option<&str>, message: String) -> ProviderError {
    match code {
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "InvalidSignatureException"
            | "IncompleteSignature"
            | "ExpiredTokenException"
            | "InvalidClientTokenId",
        ) => ProviderError::Authorization(message),
        Some(
            "ThrottlingException"
            | "KMSInternalException"
            | "DependencyTimeoutException"
            | "KeyUnavailableException"
            | "ServiceUnavailableException"
            | "RequestTimeoutException",
        ) => ProviderError::Network(message),
        Some("InvalidCiphertextException" | "IncorrectKeyException") => {
            ProviderError::InvalidKeyReference(message)
        }
        _ => ProviderError::Other(message),
    }
}
