//! Wallet error types.
//!
//! All wallet subsystems surface errors through [`WalletError`], which is the
//! single error type returned by every public API in this crate.  Policy
//! denials and approval requirements are *not* errors — they are first-class
//! [`Decision`](crate::policy::model::Decision) outcomes with audit events
//! attached.

/// Unified error type for the checkout wallet.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    // -- Vault state --------------------------------------------------------
    /// A key-gated operation was attempted before `initialize` or `unlock`.
    #[error("vault is locked: call initialize() or unlock() first")]
    VaultLocked,

    /// `unlock` was called on a vault that was never initialized.
    #[error("vault is not initialized: no salt present")]
    NotInitialized,

    /// `initialize` was called on a vault that already holds a salt.
    #[error("vault is already initialized")]
    AlreadyInitialized,

    // -- Crypto -------------------------------------------------------------
    /// Encryption failed (invalid key length, RNG failure, AEAD internal
    /// error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Authenticated decryption failed.  The message deliberately does not
    /// distinguish a wrong passphrase from tampered ciphertext.
    #[error("authentication failed: wrong passphrase or corrupted data")]
    AuthenticationFailed,

    /// Passphrase-to-key derivation failed.
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    // -- Policy -------------------------------------------------------------
    /// A policy document or request argument failed structural validation.
    #[error("validation error at {path}: {reason}")]
    Validation { path: String, reason: String },

    /// A condition expression failed to compile or evaluate.  The policy
    /// engine converts this into a denial; it never reaches tool callers.
    #[error("{reason}")]
    Expression { reason: String },

    /// The referenced policy does not exist.
    #[error("no policy found: {name}")]
    PolicyNotFound { name: String },

    // -- Store --------------------------------------------------------------
    /// The requested credential does not exist.
    #[error("credential not found: {name}")]
    CredentialNotFound { name: String },

    /// A credential with this name already exists.
    #[error("credential already exists: {name}")]
    CredentialAlreadyExists { name: String },

    /// Database schema migration failed.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    // -- Underlying errors --------------------------------------------------
    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem (policy file reads, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal wallet error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the wallet crate.
pub type Result<T> = std::result::Result<T, WalletError>;
