//! Password-sealed blobs.
//!
//! Blob layout: `salt (16) || nonce (12) || ciphertext || tag (16)`.
//! A fresh salt and nonce are drawn for every call, so sealing the same
//! payload twice never yields the same blob.

use crate::aead;
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{Salt, SALT_LENGTH};
use ledgervault_common::{Error, Result};

/// Message carried by every decryption failure.
///
/// Wrong password, truncated blob, KDF failure and tampered ciphertext are
/// reported identically so the error cannot be used as an oracle.
pub const OPEN_FAILURE: &str = "could not open vault";

/// Password-based encryption of arbitrary byte payloads.
#[derive(Debug, Clone, Default)]
pub struct PasswordCipher {
    params: KdfParams,
}

impl PasswordCipher {
    /// Create a cipher using the given KDF cost parameters.
    ///
    /// The same parameters must be used to decrypt.
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    /// Get the KDF parameters.
    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Seal `data` under `password`.
    ///
    /// # Errors
    /// - Invalid KDF parameters
    pub fn encrypt(&self, data: &[u8], password: &[u8]) -> Result<Vec<u8>> {
        let salt = Salt::generate();
        let key = derive_key(password, &salt, &self.params)?;
        let sealed = aead::encrypt(key.as_bytes(), data)?;

        let mut blob = Vec::with_capacity(SALT_LENGTH + sealed.len());
        blob.extend_from_slice(salt.as_bytes());
        blob.extend_from_slice(&sealed);

        Ok(blob)
    }

    /// Open a blob produced by [`PasswordCipher::encrypt`].
    ///
    /// # Errors
    /// - `Error::Crypto(OPEN_FAILURE)` for every failure cause
    pub fn decrypt(&self, blob: &[u8], password: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < SALT_LENGTH + aead::NONCE_SIZE {
            return Err(open_failure());
        }

        let (salt_bytes, sealed) = blob.split_at(SALT_LENGTH);
        let salt = Salt::from_slice(salt_bytes).ok_or_else(open_failure)?;
        let key = derive_key(password, &salt, &self.params).map_err(|_| open_failure())?;

        aead::decrypt(key.as_bytes(), sealed).map_err(|_| open_failure())
    }
}

fn open_failure() -> Error {
    Error::Crypto(OPEN_FAILURE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cipher() -> PasswordCipher {
        PasswordCipher::new(KdfParams::insecure_testing())
    }

    #[test]
    fn test_hello_vault_roundtrip() {
        let cipher = cipher();
        let blob = cipher.encrypt(b"hello-vault", b"pw1").unwrap();

        assert_eq!(cipher.decrypt(&blob, b"pw1").unwrap(), b"hello-vault");
        assert!(cipher.decrypt(&blob, b"pw2").is_err());
    }

    #[test]
    fn test_blob_layout() {
        let blob = cipher().encrypt(b"abc", b"pw").unwrap();
        assert_eq!(
            blob.len(),
            SALT_LENGTH + aead::NONCE_SIZE + 3 + aead::TAG_SIZE
        );
    }

    #[test]
    fn test_nondeterministic_output() {
        let cipher = cipher();
        let blob1 = cipher.encrypt(b"same", b"pw").unwrap();
        let blob2 = cipher.encrypt(b"same", b"pw").unwrap();

        assert_ne!(blob1, blob2);
        assert_ne!(&blob1[..SALT_LENGTH], &blob2[..SALT_LENGTH]);
    }

    #[test]
    fn test_truncated_blob_fails_with_same_error() {
        let err = cipher().decrypt(&[0u8; 10], b"pw").unwrap_err();
        assert_eq!(err.to_string(), Error::Crypto(OPEN_FAILURE.into()).to_string());
    }

    #[test]
    fn test_empty_password_on_decrypt_is_indistinguishable() {
        let cipher = cipher();
        let blob = cipher.encrypt(b"data", b"pw").unwrap();
        let err = cipher.decrypt(&blob, b"").unwrap_err();
        assert!(matches!(err, Error::Crypto(ref m) if m == OPEN_FAILURE));
    }

    #[test]
    fn test_empty_password_roundtrip() {
        let cipher = cipher();
        let blob = cipher.encrypt(b"data", b"").unwrap();

        assert_eq!(cipher.decrypt(&blob, b"").unwrap(), b"data");
        assert!(cipher.decrypt(&blob, b"pw").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512), pw in proptest::collection::vec(any::<u8>(), 0..24)) {
            let cipher = cipher();
            let blob = cipher.encrypt(&data, &pw).unwrap();
            prop_assert_eq!(cipher.decrypt(&blob, &pw).unwrap(), data);
        }

        #[test]
        fn prop_single_byte_tamper_detected(data in proptest::collection::vec(any::<u8>(), 1..128), idx in any::<prop::sample::Index>(), flip in 1u8..=255) {
            let cipher = cipher();
            let mut blob = cipher.encrypt(&data, b"pw").unwrap();
            let i = idx.index(blob.len());
            blob[i] ^= flip;

            let err = cipher.decrypt(&blob, b"pw").unwrap_err();
            prop_assert!(matches!(err, Error::Crypto(ref m) if m == OPEN_FAILURE));
        }

        #[test]
        fn prop_wrong_password_same_error_kind(data in proptest::collection::vec(any::<u8>(), 0..128), p1 in "[a-z]{1,8}", p2 in "[A-Z]{1,8}") {
            let cipher = cipher();
            let blob = cipher.encrypt(&data, p1.as_bytes()).unwrap();

            let err = cipher.decrypt(&blob, p2.as_bytes()).unwrap_err();
            prop_assert!(matches!(err, Error::Crypto(ref m) if m == OPEN_FAILURE));
        }
    }
}
