//! Authenticated symmetric encryption with ChaCha20-Poly1305.
//!
//! Output layout: `[nonce:12][ciphertext][tag:16]`.

use crate::error::Error;
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};

/// Raw key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

fn cipher_for(key: &[u8]) -> Result<ChaCha20Poly1305, Error> {
    if key.len() != KEY_SIZE {
        return Err(Error::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() });
    }
    ChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| Error::InvalidKeyLength { expected: KEY_SIZE, actual: key.len() })
}

/// Encrypts `plaintext` under `key`, authenticating `aad` alongside it.
///
/// # Errors
///
/// Returns `Error::InvalidKeyLength` if `key` is not [`KEY_SIZE`] bytes.
pub fn encrypt(key: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from(nonce_bytes);

    let sealed = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| Error::EncryptionFailed(format!("ChaCha20-Poly1305 encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypts data produced by [`encrypt`] with the same key and `aad`.
///
/// # Errors
///
/// Returns:
/// - `Error::InvalidKeyLength` if `key` is not [`KEY_SIZE`] bytes
/// - `Error::InvalidCiphertext` if the input cannot hold a nonce and tag
/// - `Error::AuthenticationFailed` if the tag does not verify
pub fn decrypt(key: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = cipher_for(key)?;

    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::InvalidCiphertext(format!(
            "ciphertext too short: {} bytes (min: {})",
            ciphertext.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher.decrypt(nonce, Payload { msg: sealed, aad }).map_err(|_| Error::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    const KEY: [u8; KEY_SIZE] = [42u8; KEY_SIZE];

    #[test]
    fn test_empty_plaintext() {
        let ciphertext = encrypt(&KEY, b"", b"aad").unwrap();
        assert_eq!(ciphertext.len(), NONCE_SIZE + TAG_SIZE);

        let plaintext = decrypt(&KEY, &ciphertext, b"aad").unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_nonce_is_random() {
        let c1 = encrypt(&KEY, b"same", b"").unwrap();
        let c2 = encrypt(&KEY, b"same", b"").unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_wrong_key_length() {
        let result = encrypt(&[0u8; 16], b"data", b"");
        assert!(matches!(result, Err(Error::InvalidKeyLength { expected: 32, actual: 16 })));

        let result = decrypt(&[0u8; 64], &[0u8; 40], b"");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidKey);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let ciphertext = encrypt(&KEY, b"secret", b"").unwrap();
        let result = decrypt(&[7u8; KEY_SIZE], &ciphertext, b"");
        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_wrong_aad_fails_authentication() {
        let ciphertext = encrypt(&KEY, b"secret", b"org:1").unwrap();
        let result = decrypt(&KEY, &ciphertext, b"org:2");
        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_truncated_ciphertext() {
        let result = decrypt(&KEY, &[0u8; NONCE_SIZE + TAG_SIZE - 1], b"");
        assert!(matches!(result, Err(Error::InvalidCiphertext(_))));
    }

    proptest! {
        #[test]
        fn prop_round_trip(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
            let ciphertext = encrypt(&KEY, &plaintext, b"header").unwrap();
            prop_assert_eq!(decrypt(&KEY, &ciphertext, b"header").unwrap(), plaintext);
        }

        #[test]
        fn prop_any_flipped_byte_is_rejected(
            plaintext in proptest::collection::vec(any::<u8>(), 0..64),
            index in any::<prop::sample::Index>(),
        ) {
            let mut ciphertext = encrypt(&KEY, &plaintext, b"").unwrap();
            let i = index.index(ciphertext.len());
            ciphertext[i] ^= 0x01;
            prop_assert!(matches!(
                decrypt(&KEY, &ciphertext, b""),
                Err(Error::AuthenticationFailed)
            ));
        }
    }
}
