//! Identity-keyed encryption and signing.
//!
//! An identity secret is a self-custodied ed25519 signing seed. It signs
//! ledger anchors and audit envelopes, and through HKDF-SHA256 it yields a
//! wrapping key that lets a user recover the vault password without the
//! password ever being stored in cleartext.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::{self, NONCE_SIZE};
use crate::keys::{SymmetricKey, KEY_LENGTH};
use ledgervault_common::{Error, Result, SensitiveBytes};

/// Domain-separation label for the identity wrapping key.
const IDENTITY_WRAP_INFO: &[u8] = b"ledgervault/identity-wrap/v1";

/// Length of an identity seed in bytes.
pub const IDENTITY_SEED_LENGTH: usize = 32;

/// Self-custodied identity secret (ed25519 seed).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct IdentitySecret {
    seed: [u8; IDENTITY_SEED_LENGTH],
}

impl IdentitySecret {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut seed = [0u8; IDENTITY_SEED_LENGTH];
        rand::thread_rng().fill_bytes(&mut seed);
        Self { seed }
    }

    /// Create from a raw seed.
    pub fn from_bytes(seed: [u8; IDENTITY_SEED_LENGTH]) -> Self {
        Self { seed }
    }

    /// Parse the URL-safe base64 export format.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = SensitiveBytes::new(
            URL_SAFE_NO_PAD
                .decode(encoded.trim())
                .map_err(|_| Error::Validation("Malformed identity secret".to_string()))?,
        );
        let seed: [u8; IDENTITY_SEED_LENGTH] = decoded
            .as_bytes()
            .try_into()
            .map_err(|_| Error::Validation("Identity secret must be 32 bytes".to_string()))?;
        Ok(Self { seed })
    }

    /// Export as URL-safe base64.
    ///
    /// # Security
    /// The returned string is the secret itself.
    pub fn to_base64(&self) -> SensitiveBytes {
        SensitiveBytes::new(URL_SAFE_NO_PAD.encode(self.seed).into_bytes())
    }

    /// Public half of the identity.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(SigningKey::from_bytes(&self.seed).verifying_key().to_bytes())
    }

    /// Sign a message, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        SigningKey::from_bytes(&self.seed)
            .sign(message)
            .to_bytes()
            .to_vec()
    }

    /// Derive the symmetric wrapping key for this identity.
    fn wrapping_key(&self) -> Result<SymmetricKey> {
        let hkdf = Hkdf::<Sha256>::new(None, &self.seed);
        let mut okm = [0u8; KEY_LENGTH];
        hkdf.expand(IDENTITY_WRAP_INFO, &mut okm)
            .map_err(|e| Error::Crypto(format!("HKDF expand failed: {}", e)))?;
        let key = SymmetricKey::from_bytes(okm);
        okm.zeroize();
        Ok(key)
    }
}

impl fmt::Debug for IdentitySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentitySecret({})", self.public_key())
    }
}

/// ed25519 public key of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Parse from URL-safe base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| Error::Validation("Malformed public key".to_string()))?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Validation("Public key must be 32 bytes".to_string()))?;
        Ok(Self(key))
    }

    /// Encode as URL-safe base64.
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Verify a signature produced by [`IdentitySecret::sign`].
    ///
    /// # Errors
    /// - `Error::Crypto` if the key is invalid or the signature does not verify
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|_| Error::Crypto("Invalid public key".to_string()))?;
        let signature = Signature::from_slice(signature)
            .map_err(|_| Error::Crypto("Malformed signature".to_string()))?;
        key.verify(message, &signature)
            .map_err(|_| Error::Crypto("Signature verification failed".to_string()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// Encrypt `data` under a key derived from the identity secret.
///
/// Returns `(nonce, ciphertext)`.
pub fn encrypt_with_identity_secret(
    data: &[u8],
    identity: &IdentitySecret,
) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
    let key = identity.wrapping_key()?;
    let nonce = aead::generate_nonce();
    let ciphertext = aead::encrypt_with_nonce(key.as_bytes(), &nonce, data)?;
    Ok((nonce, ciphertext))
}

/// Inverse of [`encrypt_with_identity_secret`].
pub fn decrypt_with_identity_secret(
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    identity: &IdentitySecret,
) -> Result<Vec<u8>> {
    let key = identity.wrapping_key()?;
    aead::decrypt_with_nonce(key.as_bytes(), nonce, ciphertext)
}

/// A secret sealed to an identity, safe to store next to the vault metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedSecret {
    /// AEAD nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext plus tag.
    pub ciphertext: Vec<u8>,
}

/// Seal the vault password to an identity so it can be recovered later.
pub fn wrap_vault_password(password: &[u8], identity: &IdentitySecret) -> Result<WrappedSecret> {
    let (nonce, ciphertext) = encrypt_with_identity_secret(password, identity)?;
    Ok(WrappedSecret { nonce, ciphertext })
}

/// Recover a password sealed with [`wrap_vault_password`].
pub fn recover_vault_password(
    wrapped: &WrappedSecret,
    identity: &IdentitySecret,
) -> Result<SensitiveBytes> {
    decrypt_with_identity_secret(&wrapped.nonce, &wrapped.ciphertext, identity)
        .map(SensitiveBytes::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let identity = IdentitySecret::generate();
        let (nonce, ct) = encrypt_with_identity_secret(b"vault-password", &identity).unwrap();

        let plain = decrypt_with_identity_secret(&nonce, &ct, &identity).unwrap();
        assert_eq!(plain, b"vault-password");
    }

    #[test]
    fn test_identity_wrong_secret_fails() {
        let alice = IdentitySecret::generate();
        let mallory = IdentitySecret::generate();
        let (nonce, ct) = encrypt_with_identity_secret(b"secret", &alice).unwrap();

        assert!(matches!(
            decrypt_with_identity_secret(&nonce, &ct, &mallory),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_wrapping_key_is_deterministic() {
        let identity = IdentitySecret::from_bytes([9u8; 32]);
        let k1 = identity.wrapping_key().unwrap();
        let k2 = identity.wrapping_key().unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), &[9u8; 32]);
    }

    #[test]
    fn test_password_wrap_and_recover() {
        let identity = IdentitySecret::generate();
        let wrapped = wrap_vault_password(b"correct horse", &identity).unwrap();

        let json = serde_json::to_string(&wrapped).unwrap();
        let restored: WrappedSecret = serde_json::from_str(&json).unwrap();

        let recovered = recover_vault_password(&restored, &identity).unwrap();
        assert_eq!(recovered.as_bytes(), b"correct horse");
    }

    #[test]
    fn test_sign_and_verify() {
        let identity = IdentitySecret::generate();
        let signature = identity.sign(b"b2-content");

        let public = identity.public_key();
        assert!(public.verify(b"b2-content", &signature).is_ok());
        assert!(public.verify(b"b2-other", &signature).is_err());
        assert!(IdentitySecret::generate()
            .public_key()
            .verify(b"b2-content", &signature)
            .is_err());
    }

    #[test]
    fn test_base64_export_roundtrip() {
        let identity = IdentitySecret::generate();
        let exported = identity.to_base64();
        let text = std::str::from_utf8(exported.as_bytes()).unwrap();

        let imported = IdentitySecret::from_base64(text).unwrap();
        assert_eq!(imported.public_key(), identity.public_key());
        assert!(IdentitySecret::from_base64("tooshort").is_err());
    }

    #[test]
    fn test_debug_shows_only_public_key() {
        let identity = IdentitySecret::from_bytes([1u8; 32]);
        let rendered = format!("{:?}", identity);
        assert!(rendered.contains(&identity.public_key().to_base64()));
    }
}
