//! Basic usage example for `sealkeep`.

use sealkeep::header::EnvelopeHeader;
use sealkeep::prelude::*;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("sealkeep Basic Usage Example");
    println!("============================\n");

    let config = SecretsConfig::from_toml_str(
        r#"
        secret_key = "SdlklWklckeLS"
        features = ["envelopeEncryption"]

        [cache]
        ttl = "10m"
        sweep_interval = "1m"
        "#,
    )?;

    let service = SecretsService::from_config(&config, Default::default())?;
    println!("✓ SecretsService created (provider: {})\n", service.current_provider_id());

    let shutdown = CancellationToken::new();
    let sweeper = service.spawn_maintenance(shutdown.clone());

    // Encrypt a datasource password for organization 1
    let plaintext = b"datasource password";
    let envelope = service.encrypt(plaintext, "org:1").await?;
    println!("✓ Encrypted ({} bytes)", envelope.len());

    let (header, header_len) = EnvelopeHeader::from_bytes(&envelope)?;
    println!("  - Provider: {}", header.provider_id());
    println!("  - Scope: {}", header.scope());
    println!("  - Header: {header_len} bytes\n");

    let decrypted = service.decrypt(&envelope).await?;
    assert_eq!(plaintext, &decrypted[..]);
    println!("✓ Decrypted: {}\n", String::from_utf8_lossy(&decrypted));

    // Values written before envelope encryption still decrypt
    let legacy = service.engine().legacy().encrypt(b"pre-migration value")?;
    let decrypted = service.decrypt(&legacy).await?;
    println!("✓ Legacy payload decrypts: {}", String::from_utf8_lossy(&decrypted));

    let migrated = service.reencrypt(&legacy, "org:1").await?;
    println!("✓ Re-encrypted legacy payload as envelope ({} bytes)\n", migrated.len());

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        sweeper.await?;
    }

    println!("============================");
    println!("All operations successful!");

    Ok(())
}
