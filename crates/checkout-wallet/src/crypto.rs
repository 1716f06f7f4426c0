//! AES-256-GCM encryption and passphrase key derivation.
//!
//! This module provides the core cryptographic primitives for the wallet:
//!
//! - **Encryption/decryption**: AES-256-GCM authenticated encryption with
//!   randomly generated 96-bit nonces.  Ciphertext, nonce, and the 128-bit
//!   authentication tag are kept separate so the vault can store them in
//!   their own columns.
//! - **Key derivation**: Argon2id over (passphrase, salt), then HKDF-SHA256
//!   with a fixed domain-separation string, producing a 256-bit AES key.
//! - **Random generation**: cryptographically secure random bytes via `ring`.
//!
//! # Security Notes
//!
//! - Nonces are generated randomly for each encryption operation.  With a
//!   96-bit nonce and random generation, the probability of a collision is
//!   negligible for up to ~2^32 encryptions under the same key.
//! - The Argon2id → HKDF-SHA256 two-step derivation is part of the on-disk
//!   format; both steps must stay bit-exact or existing vaults become
//!   unreadable.
//! - Decryption failures are reported through a single
//!   [`WalletError::AuthenticationFailed`] value that does not say whether
//!   the key was wrong or the data was tampered with.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{Result, WalletError};

/// Length of the AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Length of the GCM authentication tag in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Length of the key-derivation salt in bytes.
pub const SALT_LEN: usize = 32;

/// Argon2id memory cost in KiB (64 MiB).
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;

/// Argon2id iteration count.
const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id lane count.
const ARGON2_PARALLELISM: u32 = 1;

/// HKDF domain-separation string.  Part of the on-disk format.
const HKDF_INFO: &[u8] = b"checkout-wallet-v1";

/// AES-256-GCM algorithm from `ring`.
static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A single-use nonce sequence that yields exactly one nonce and then errors.
///
/// `ring` requires a [`NonceSequence`] for sealing operations.  Since we
/// generate a fresh random nonce per encryption call, this wrapper ensures
/// each sealing key is used exactly once.
struct SingleNonce(Option<[u8; NONCE_LEN]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Encrypted payload
// ---------------------------------------------------------------------------

/// The three parts of an encrypted record, stored in separate vault columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Ciphertext without the authentication tag.
    pub ciphertext: Vec<u8>,
    /// Random 96-bit nonce used for this record.
    pub nonce: [u8; NONCE_LEN],
    /// 128-bit GCM authentication tag.
    pub tag: [u8; TAG_LEN],
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` with AES-256-GCM using the given 256-bit `key`.
///
/// A fresh random nonce is generated per call.  The authentication tag is
/// split off the ciphertext so the three parts can be stored separately.
///
/// # Errors
///
/// Returns [`WalletError::EncryptionFailed`] if the key length is wrong or
/// `ring` reports a failure.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<EncryptedPayload> {
    if key.len() != KEY_LEN {
        return Err(WalletError::EncryptionFailed {
            reason: format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        });
    }

    let rng = SystemRandom::new();

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| WalletError::EncryptionFailed {
            reason: "failed to generate random nonce".into(),
        })?;

    let unbound_key =
        UnboundKey::new(AEAD_ALG, key).map_err(|_| WalletError::EncryptionFailed {
            reason: "failed to create AES-256-GCM key".into(),
        })?;

    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    // `ring` encrypts in-place and appends the authentication tag.
    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    // Split the appended tag back off.
    let tag_start = in_out.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&in_out[tag_start..]);
    in_out.truncate(tag_start);

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = in_out.len(),
        "encrypted record"
    );

    Ok(EncryptedPayload {
        ciphertext: in_out,
        nonce: nonce_bytes,
        tag,
    })
}

/// Decrypt an [`EncryptedPayload`] using the given 256-bit `key`.
///
/// # Errors
///
/// Returns [`WalletError::AuthenticationFailed`] if the key is wrong, the
/// ciphertext or tag has been tampered with, or the nonce does not match.
/// The error carries no detail about which of those occurred.
pub fn decrypt(payload: &EncryptedPayload, key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(WalletError::AuthenticationFailed);
    }

    let unbound_key =
        UnboundKey::new(AEAD_ALG, key).map_err(|_| WalletError::AuthenticationFailed)?;

    let mut opening_key = OpeningKey::new(unbound_key, SingleNonce::new(payload.nonce));

    // Reassemble ciphertext || tag for ring's in-place open.
    let mut in_out = Vec::with_capacity(payload.ciphertext.len() + TAG_LEN);
    in_out.extend_from_slice(&payload.ciphertext);
    in_out.extend_from_slice(&payload.tag);

    let plaintext = opening_key
        .open_in_place(Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::AuthenticationFailed)?;

    let result = plaintext.to_vec();

    tracing::trace!(
        ciphertext_len = payload.ciphertext.len(),
        plaintext_len = result.len(),
        "decrypted record"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Generate a fresh random key-derivation salt.
///
/// # Errors
///
/// Returns [`WalletError::KeyDerivationFailed`] if the system CSPRNG fails.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|_| WalletError::KeyDerivationFailed {
            reason: "failed to generate random salt".into(),
        })?;
    Ok(salt)
}

/// Derive the 256-bit vault key from a `passphrase` and a stored `salt`.
///
/// Two steps, both part of the on-disk format:
///
/// 1. Argon2id(passphrase, salt) with memory 64 MiB, 3 iterations, 1 lane,
///    32-byte output.
/// 2. HKDF-SHA256(ikm = argon2 output, salt = the same vault salt,
///    info = `"checkout-wallet-v1"`) expanded to 32 bytes.
///
/// # Errors
///
/// Returns [`WalletError::KeyDerivationFailed`] on invalid Argon2 parameters
/// or HKDF expansion failure.
pub fn derive_key(passphrase: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_ITERATIONS,
        ARGON2_PARALLELISM,
        Some(KEY_LEN),
    )
    .map_err(|e| WalletError::KeyDerivationFailed {
        reason: format!("bad Argon2 parameters: {e}"),
    })?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut stretched = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase, salt, &mut stretched)
        .map_err(|e| WalletError::KeyDerivationFailed {
            reason: format!("Argon2id failed: {e}"),
        })?;

    let hk = Hkdf::<Sha256>::new(Some(salt), &stretched);
    let mut key = [0u8; KEY_LEN];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|e| WalletError::KeyDerivationFailed {
            reason: format!("HKDF expansion failed: {e}"),
        })?;

    stretched.zeroize();

    tracing::debug!("derived vault key from passphrase");
    Ok(key)
}

// ---------------------------------------------------------------------------
// Random bytes
// ---------------------------------------------------------------------------

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`WalletError::Internal`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf)
        .map_err(|_| WalletError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
