//! Authenticated encryption using AES-256-GCM.
//!
//! Every call to [`encrypt`] draws a fresh random 96-bit IV. [`decrypt`]
//! also accepts envelopes written with 13 to 16 byte IVs.

use aes_gcm::{
    aead::{
        generic_array::{
            typenum::{U12, U13, U14, U15, U16},
            GenericArray,
        },
        Aead, KeyInit,
    },
    aes::Aes256,
    AesGcm,
};
use rand::RngCore;

use lockbox_common::CryptoError;

use crate::envelope::Envelope;
use crate::keys::{KeyMaterial, Salt};

/// IV size used for new envelopes (12 bytes).
pub const IV_SIZE: usize = 12;

/// Encrypt plaintext into an envelope.
///
/// # Postconditions
/// - The IV is randomly generated and never reused
/// - `salt` is recorded verbatim (absent for device-key mode)
///
/// # Errors
/// - `CipherFailure` if the primitive fails (plaintext beyond the GCM
///   length limit)
///
/// # Security
/// - Neither plaintext nor key is logged
pub fn encrypt(
    key: &KeyMaterial,
    plaintext: &[u8],
    salt: Option<&Salt>,
) -> Result<Envelope, CryptoError> {
    let mut iv = vec![0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let cipher = AesGcm::<Aes256, U12>::new(GenericArray::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::CipherFailure("AES-GCM encryption failed".to_string()))?;

    Envelope::new(salt, iv, ciphertext)
}

/// Decrypt an envelope.
///
/// # Errors
/// - `AuthenticationFailed` if the tag does not verify
/// - `MalformedEnvelope` if the IV length is unsupported
pub fn decrypt(key: &KeyMaterial, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
    macro_rules! open {
        ($nonce:ty) => {
            AesGcm::<Aes256, $nonce>::new(GenericArray::from_slice(key.as_bytes()))
                .decrypt(GenericArray::from_slice(envelope.iv()), envelope.ciphertext())
        };
    }

    let result = match envelope.iv().len() {
        12 => open!(U12),
        13 => open!(U13),
        14 => open!(U14),
        15 => open!(U15),
        16 => open!(U16),
        other => {
            return Err(CryptoError::MalformedEnvelope(format!(
                "Unsupported IV length {}",
                other
            )))
        }
    };

    result.map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::TAG_SIZE;
    use crate::keys::KEY_LENGTH;
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = KeyMaterial::from_bytes([42u8; KEY_LENGTH]);
        let plaintext = b"Hello, World!";

        let envelope = encrypt(&key, plaintext, None).unwrap();
        let decrypted = decrypt(&key, &envelope).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let key = KeyMaterial::from_bytes([42u8; KEY_LENGTH]);
        let plaintext = b"Test message";

        let envelope = encrypt(&key, plaintext, None).unwrap();

        assert_eq!(envelope.iv().len(), IV_SIZE);
        assert_eq!(envelope.ciphertext().len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_different_iv_each_time() {
        let key = KeyMaterial::from_bytes([42u8; KEY_LENGTH]);
        let plaintext = b"Same plaintext";

        let e1 = encrypt(&key, plaintext, None).unwrap();
        let e2 = encrypt(&key, plaintext, None).unwrap();

        assert_ne!(e1.iv(), e2.iv());
        assert_ne!(e1.to_bytes(), e2.to_bytes());
        assert_eq!(decrypt(&key, &e1).unwrap(), decrypt(&key, &e2).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = KeyMaterial::from_bytes([1u8; KEY_LENGTH]);
        let key2 = KeyMaterial::from_bytes([2u8; KEY_LENGTH]);

        let envelope = encrypt(&key1, b"Secret data", None).unwrap();

        assert_eq!(
            decrypt(&key2, &envelope),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = KeyMaterial::from_bytes([42u8; KEY_LENGTH]);
        let envelope = encrypt(&key, b"Important data", None).unwrap();

        let mut bytes = envelope.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(
            decrypt(&key, &tampered),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_sixteen_byte_iv_accepted() {
        let key = KeyMaterial::from_bytes([3u8; KEY_LENGTH]);
        let iv = [8u8; 16];
        let ciphertext = AesGcm::<Aes256, U16>::new(GenericArray::from_slice(key.as_bytes()))
            .encrypt(GenericArray::from_slice(&iv), b"legacy".as_ref())
            .unwrap();

        let envelope = Envelope::new(None, iv.to_vec(), ciphertext).unwrap();
        assert_eq!(decrypt(&key, &envelope).unwrap(), b"legacy");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = KeyMaterial::from_bytes([42u8; KEY_LENGTH]);

        let envelope = encrypt(&key, b"", None).unwrap();
        assert!(decrypt(&key, &envelope).unwrap().is_empty());
    }

    #[test]
    fn test_salt_is_carried() {
        let key = KeyMaterial::generate();
        let salt = Salt::generate();

        let envelope = encrypt(&key, b"data", Some(&salt)).unwrap();
        let parsed = Envelope::from_bytes(&envelope.to_bytes()).unwrap();

        assert_eq!(parsed.salt(), Some(salt));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048), key in any::<[u8; 32]>()) {
            let key = KeyMaterial::from_bytes(key);
            let envelope = encrypt(&key, &plaintext, None).unwrap();
            let parsed = Envelope::from_base64(&envelope.to_base64()).unwrap();
            prop_assert_eq!(decrypt(&key, &parsed).unwrap(), plaintext);
        }
    }
}
