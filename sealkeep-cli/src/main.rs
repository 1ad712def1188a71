//! `sealkeep` CLI tool for encrypting and migrating stored secrets.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use rand::RngCore;
use sealkeep::config::ProviderConfig;
use sealkeep::prelude::*;
use sealkeep_kms_aws::AwsKmsKeyService;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sealkeep")]
#[command(about = "Envelope encryption for stored secrets", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "sealkeep.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a value and print it base64-encoded
    Encrypt {
        /// Scope the data key belongs to (e.g. "org:1")
        #[arg(short, long)]
        scope: String,
        /// Value to encrypt; read from stdin if omitted
        value: Option<String>,
    },
    /// Decrypt a base64-encoded envelope or legacy payload
    Decrypt {
        /// Base64 payload; read from stdin if omitted
        payload: Option<String>,
    },
    /// Decrypt a payload and encrypt it again with the current settings
    Reencrypt {
        /// Scope for the new envelope
        #[arg(short, long)]
        scope: String,
        /// Base64 payload; read from stdin if omitted
        payload: Option<String>,
    },
    /// Generate a random secret key
    Keygen {
        /// Key length in bytes
        #[arg(short, long, default_value_t = 32)]
        bytes: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { bytes } => {
            if bytes == 0 {
                bail!("key length must be greater than zero");
            }
            let mut key = vec![0u8; bytes];
            OsRng.fill_bytes(&mut key);
            println!("{}", STANDARD.encode(&key));
        }
        Commands::Encrypt { scope, value } => {
            let service = build_service(&cli.config).await?;
            let plaintext = match value {
                Some(value) => value.into_bytes(),
                None => read_stdin().await?,
            };
            let envelope = service.encrypt(&plaintext, &scope).await.context("encryption failed")?;
            println!("{}", STANDARD.encode(envelope));
        }
        Commands::Decrypt { payload } => {
            let service = build_service(&cli.config).await?;
            let payload = decode_payload(payload).await?;
            let plaintext = service.decrypt(&payload).await.context("decryption failed")?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&plaintext).await?;
            stdout.flush().await?;
        }
        Commands::Reencrypt { scope, payload } => {
            let service = build_service(&cli.config).await?;
            let payload = decode_payload(payload).await?;
            let envelope =
                service.reencrypt(&payload, &scope).await.context("re-encryption failed")?;
            println!("{}", STANDARD.encode(envelope));
        }
    }

    Ok(())
}

async fn build_service(path: &Path) -> Result<SecretsService> {
    let config = SecretsConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    let mut key_services: HashMap<String, Arc<dyn KeyService>> = HashMap::new();
    for (id, provider) in &config.providers {
        if let ProviderConfig::External { key_id, region } = provider {
            let kms = AwsKmsKeyService::new(key_id.as_str(), region.as_deref()).await;
            key_services.insert(id.clone(), Arc::new(kms));
        }
    }

    let service = SecretsService::from_config(&config, key_services)
        .context("failed to set up secrets service")?;
    debug!(
        provider_id = service.current_provider_id(),
        envelope = service.envelope_encryption_enabled(),
        "secrets service ready"
    );
    Ok(service)
}

async fn read_stdin() -> Result<Vec<u8>> {
    let mut input = Vec::new();
    tokio::io::stdin().read_to_end(&mut input).await.context("failed to read stdin")?;
    Ok(input)
}

async fn decode_payload(payload: Option<String>) -> Result<Vec<u8>> {
    let text = match payload {
        Some(text) => text,
        None => String::from_utf8(read_stdin().await?).context("stdin is not valid UTF-8")?,
    };
    STANDARD.decode(text.trim()).context("payload is not valid base64")
}
