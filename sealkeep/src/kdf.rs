//! Key derivation using HKDF (HMAC-based Key Derivation Function).
//!
//! The local key provider derives one data encryption key per scope from a
//! configured secret using HKDF with SHA-256.

use crate::cipher::KEY_SIZE;
use crate::error::Error;
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;

/// Domain separation label mixed into every local derivation.
const LOCAL_INFO_PREFIX: &str = "sealkeep/local/v1|";

/// Derives a data encryption key for `scope` from `secret`.
///
/// The derivation uses `sealkeep/local/v1|{scope}` as the HKDF `info`
/// parameter, so every scope gets an independent key.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if the derivation fails.
///
/// # Example
///
/// ```
/// use sealkeep::kdf::derive_scope_key;
/// use secrecy::{ExposeSecret, SecretVec};
///
/// let secret = SecretVec::new(b"SdlklWklckeLS".to_vec());
/// let key = derive_scope_key(&secret, "org:1").expect("derivation failed");
/// assert_eq!(key.expose_secret().len(), 32);
/// ```
pub fn derive_scope_key(secret: &SecretVec<u8>, scope: &str) -> Result<SecretVec<u8>, Error> {
    let hkdf = Hkdf::<Sha256>::new(None, secret.expose_secret());

    let mut info = Vec::with_capacity(LOCAL_INFO_PREFIX.len() + scope.len());
    info.extend_from_slice(LOCAL_INFO_PREFIX.as_bytes());
    info.extend_from_slice(scope.as_bytes());

    let mut key = vec![0u8; KEY_SIZE];
    hkdf.expand(&info, &mut key).map_err(|_| Error::KeyDerivation)?;

    Ok(SecretVec::new(key))
}
