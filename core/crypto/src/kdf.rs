//! Key derivation using PBKDF2-HMAC-SHA256.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use lockbox_common::{CryptoError, Passphrase};

use crate::keys::{KeyMaterial, Salt, KEY_LENGTH};

/// PBKDF2 iteration count for backup passphrases.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derive an AES-256 key from a passphrase and salt.
///
/// # Postconditions
/// - Identical (passphrase, salt) pairs yield byte-identical keys
///
/// # Errors
/// - Empty passphrase
/// - Empty salt
///
/// # Security
/// - The passphrase is only borrowed; the caller scrubs it
pub fn derive_key(passphrase: &Passphrase, salt: &Salt) -> Result<KeyMaterial, CryptoError> {
    derive_key_with_iterations(passphrase, salt, PBKDF2_ITERATIONS)
}

pub(crate) fn derive_key_with_iterations(
    passphrase: &Passphrase,
    salt: &Salt,
    iterations: u32,
) -> Result<KeyMaterial, CryptoError> {
    if passphrase.is_empty() {
        return Err(CryptoError::KeyUnavailable(
            "Passphrase cannot be empty".to_string(),
        ));
    }
    if salt.is_empty() {
        return Err(CryptoError::KeyUnavailable("Salt cannot be empty".to_string()));
    }

    let mut key_bytes = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt.as_bytes(), iterations, &mut key_bytes);

    let key = KeyMaterial::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let passphrase = Passphrase::from("test-password-123");
        let salt = Salt::from_bytes(vec![42u8; 16]);

        let key1 = derive_key(&passphrase, &salt).unwrap();
        let key2 = derive_key(&passphrase, &salt).unwrap();

        assert_eq!(key1, key2);
    }

    #[test]
    fn test_derive_key_different_salt() {
        let passphrase = Passphrase::from("test-password-123");

        let key1 = derive_key(&passphrase, &Salt::from_bytes(vec![1u8; 16])).unwrap();
        let key2 = derive_key(&passphrase, &Salt::from_bytes(vec![2u8; 16])).unwrap();

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_derive_key_different_passphrase() {
        let salt = Salt::from_bytes(vec![42u8; 16]);

        let key1 = derive_key(&Passphrase::from("password1"), &salt).unwrap();
        let key2 = derive_key(&Passphrase::from("password2"), &salt).unwrap();

        assert_ne!(key1, key2);
    }

    #[test]
    fn test_known_vector() {
        // RFC 7914 section 11: PBKDF2-HMAC-SHA256("passwd", "salt", 1), first 32 bytes.
        let key = derive_key_with_iterations(
            &Passphrase::from("passwd"),
            &Salt::from_bytes(b"salt".to_vec()),
            1,
        )
        .unwrap();

        assert_eq!(
            key.as_bytes(),
            &[
                0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f, 0xec, 0x16, 0x91, 0xc2, 0x25,
                0x44, 0xb6, 0x05, 0xf9, 0x41, 0x85, 0x21, 0x6d, 0xde, 0x04, 0x65, 0xe6, 0x8b,
                0x9d, 0x57, 0xc2, 0x0d, 0xac, 0xbc,
            ]
        );
    }

    #[test]
    fn test_derive_key_empty_passphrase_fails() {
        let salt = Salt::generate();

        assert!(matches!(
            derive_key(&Passphrase::from(""), &salt),
            Err(CryptoError::KeyUnavailable(_))
        ));
    }

    #[test]
    fn test_derive_key_empty_salt_fails() {
        assert!(derive_key(&Passphrase::from("pw"), &Salt::from_bytes(Vec::new())).is_err());
    }
}
