//! Legacy single-key encryption.
//!
//! Data written before envelope encryption uses one static secret:
//!
//! ```text
//! [salt:8 ASCII alphanumeric][iv:16][AES-256-CFB ciphertext]
//! key = PBKDF2-HMAC-SHA256(secret_key, salt, 10000 iterations, 32 bytes)
//! ```
//!
//! The layout is kept byte for byte so existing values stay readable. The
//! scheme is unauthenticated; it is only used for new writes while the
//! envelope encryption feature is disabled.

use crate::error::Error;
use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Length of the random salt prefix.
pub const SALT_LEN: usize = 8;

/// AES block size, which is also the IV length.
pub const IV_LEN: usize = 16;

const PBKDF2_ITERATIONS: u32 = 10_000;
const KEY_LEN: usize = 32;

/// Encrypts and decrypts with the legacy static secret.
pub struct LegacyCipher {
    secret: SecretString,
}

impl LegacyCipher {
    /// Creates a legacy cipher over `secret`.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn derive_key(&self, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2_hmac::<Sha256>(
            self.secret.expose_secret().as_bytes(),
            salt,
            PBKDF2_ITERATIONS,
            &mut key[..],
        );
        key
    }

    /// Encrypts `plaintext` in the legacy layout.
    ///
    /// # Errors
    ///
    /// Returns `Error::Legacy` if the cipher cannot be initialised.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let salt: Vec<u8> = OsRng.sample_iter(Alphanumeric).take(SALT_LEN).collect();
        let key = self.derive_key(&salt);

        let mut out = Vec::with_capacity(SALT_LEN + IV_LEN + plaintext.len());
        out.extend_from_slice(&salt);

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        out.extend_from_slice(&iv);

        let body_start = out.len();
        out.extend_from_slice(plaintext);

        cfb_mode::Encryptor::<Aes256>::new_from_slices(&key[..], &iv)
            .map_err(|e| Error::Legacy(format!("cipher init failed: {e}")))?
            .encrypt(&mut out[body_start..]);

        Ok(out)
    }

    /// Decrypts a legacy payload.
    ///
    /// No integrity check exists in this scheme; a wrong secret yields
    /// garbage rather than an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Legacy` if the payload is too short to hold salt and IV.
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if payload.len() < SALT_LEN {
            return Err(Error::Legacy("unable to compute salt".to_string()));
        }
        if payload.len() < SALT_LEN + IV_LEN {
            return Err(Error::Legacy("payload too short".to_string()));
        }

        let (salt, rest) = payload.split_at(SALT_LEN);
        let (iv, body) = rest.split_at(IV_LEN);
        let key = self.derive_key(salt);

        let mut plaintext = body.to_vec();
        cfb_mode::Decryptor::<Aes256>::new_from_slices(&key[..], iv)
            .map_err(|e| Error::Legacy(format!("cipher init failed: {e}")))?
            .decrypt(&mut plaintext);

        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::is_envelope;

    fn cipher() -> LegacyCipher {
        LegacyCipher::new(SecretString::new("SdlklWklckeLS".to_string()))
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        let payload = cipher.encrypt(b"datasource password").unwrap();
        assert_eq!(cipher.decrypt(&payload).unwrap(), b"datasource password");
    }

    #[test]
    fn test_layout() {
        let payload = cipher().encrypt(b"hello").unwrap();

        assert_eq!(payload.len(), SALT_LEN + IV_LEN + 5);
        assert!(payload[..SALT_LEN].iter().all(u8::is_ascii_alphanumeric));
        assert!(!is_envelope(&payload));
    }

    #[test]
    fn test_matches_manual_pbkdf2_cfb() {
        let payload = cipher().encrypt(b"hello").unwrap();

        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(b"SdlklWklckeLS", &payload[..8], 10_000, &mut key);
        let mut body = payload[24..].to_vec();
        cfb_mode::Decryptor::<Aes256>::new_from_slices(&key, &payload[8..24])
            .unwrap()
            .decrypt(&mut body);

        assert_eq!(body, b"hello");
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = cipher();
        let payload = cipher.encrypt(b"").unwrap();
        assert_eq!(payload.len(), SALT_LEN + IV_LEN);
        assert!(cipher.decrypt(&payload).unwrap().is_empty());
    }

    #[test]
    fn test_short_payloads() {
        let cipher = cipher();
        assert!(matches!(cipher.decrypt(b"abc"), Err(Error::Legacy(_))));
        assert!(matches!(cipher.decrypt(&[b'a'; 20]), Err(Error::Legacy(_))));
    }

    #[test]
    fn test_wrong_secret_does_not_recover_plaintext() {
        let payload = cipher().encrypt(b"hello world").unwrap();
        let other = LegacyCipher::new(SecretString::new("another".to_string()));
        assert_ne!(other.decrypt(&payload).unwrap(), b"hello world");
    }
}
