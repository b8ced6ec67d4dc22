//! Cryptographic primitives for LedgerVault.
//!
//! This module provides:
//! - Password key derivation using Argon2id
//! - Authenticated encryption using ChaCha20-Poly1305
//! - The password-sealed vault blob format (`salt || nonce || ciphertext`)
//! - Identity-keyed encryption via HKDF-SHA256 and ed25519 identity signing
//! - Secure key management with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption failures are reported through one indistinguishable error

pub mod aead;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod password;

pub use aead::{decrypt, encrypt, NONCE_SIZE, TAG_SIZE};
pub use identity::{
    decrypt_with_identity_secret, encrypt_with_identity_secret, recover_vault_password,
    wrap_vault_password, IdentitySecret, PublicKey, WrappedSecret,
};
pub use kdf::{derive_key, KdfParams};
pub use keys::{generate_symmetric_key, Salt, SymmetricKey, KEY_LENGTH, SALT_LENGTH};
pub use password::{PasswordCipher, OPEN_FAILURE};
