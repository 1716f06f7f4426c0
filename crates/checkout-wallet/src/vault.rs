//! SQLite-backed encrypted credential store.
//!
//! The [`Vault`] wraps a `rusqlite::Connection` and, once unlocked, a
//! passphrase-derived key.  Credential values are encrypted with AES-256-GCM
//! before being written and decrypted on read; ciphertext, nonce, and
//! authentication tag live in separate columns.
//!
//! # Schema
//!
//! - `wallet_meta` — key/value rows holding the derivation salt (base64) and
//!   the schema version.  Written once at [`Vault::initialize`].
//! - `credentials` — one row per named credential with the encrypted payload
//!   and non-secret attributes.
//!
//! # Locking model
//!
//! A freshly opened vault is locked.  `initialize` (first run) or `unlock`
//! derive the key; every key-gated operation before that fails with
//! [`WalletError::VaultLocked`].  `unlock` does not verify the passphrase —
//! there is no oracle that a passphrase is wrong until the first
//! authenticated `get`.  [`Vault::close`] zeroes the key.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptedPayload};
use crate::error::{Result, WalletError};

/// Current on-disk schema version.
const SCHEMA_VERSION: &str = "1";

/// `wallet_meta` key under which the derivation salt is stored.
const META_SALT: &str = "salt";

/// `wallet_meta` key under which the schema version is stored.
const META_SCHEMA_VERSION: &str = "schema_version";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The kind of credential stored in the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Static API key or bearer token.
    ApiKey,
    /// Payment processor token (card token, charge authorization).
    PaymentToken,
    /// OAuth2 access/refresh token.
    OauthToken,
    /// Generic opaque secret.
    Secret,
    /// TLS or signing certificate material.
    Certificate,
}

impl CredentialKind {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::PaymentToken => "payment_token",
            Self::OauthToken => "oauth_token",
            Self::Secret => "secret",
            Self::Certificate => "certificate",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "api_key" => Some(Self::ApiKey),
            "payment_token" => Some(Self::PaymentToken),
            "oauth_token" => Some(Self::OauthToken),
            "secret" => Some(Self::Secret),
            "certificate" => Some(Self::Certificate),
            _ => None,
        }
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential with its decrypted value.
///
/// Only [`Vault::get`] produces this type; every other read path returns
/// [`CredentialSummary`] so plaintext never leaves the vault accidentally.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Opaque record identifier (UUID).
    pub id: String,
    /// Unique human-readable name (e.g. "stripe-key").
    pub name: String,
    /// The kind of credential.
    pub kind: CredentialKind,
    /// The decrypted secret value.
    pub value: String,
    /// Free-form non-secret attributes.
    pub metadata: HashMap<String, String>,
    /// When this credential was first stored.
    pub created_at: DateTime<Utc>,
    /// When this credential was last replaced.
    pub updated_at: DateTime<Utc>,
}

/// Summary of a stored credential, without the secret value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub id: String,
    pub name: String,
    pub kind: CredentialKind,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Encrypted credential vault backed by SQLite.
///
/// # Example
///
/// ```rust,no_run
/// # use checkout_wallet::vault::{CredentialKind, Vault};
/// # fn example() -> checkout_wallet::error::Result<()> {
/// let mut vault = Vault::open("data/vault.db")?;
/// vault.initialize("a strong passphrase")?;
///
/// vault.add(
///     "stripe-key",
///     CredentialKind::ApiKey,
///     "sk_live_...",
///     &Default::default(),
/// )?;
///
/// let cred = vault.get("stripe-key")?.expect("just added");
/// println!("value = {}", cred.value);
/// # Ok(())
/// # }
/// ```
pub struct Vault {
    conn: Connection,
    key: Option<Zeroizing<[u8; crypto::KEY_LEN]>>,
}

impl Vault {
    /// Open (or create) a vault database at `path`.  The vault starts locked.
    ///
    /// Runs schema migrations automatically.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Database`] if the database cannot be opened,
    /// or [`WalletError::MigrationFailed`] if schema setup fails.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening vault database");

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;

        let vault = Self { conn, key: None };
        vault.run_migrations()?;

        tracing::info!("vault database ready");
        Ok(vault)
    }

    /// Open an in-memory vault (useful for testing).  Starts locked.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;

        let vault = Self { conn, key: None };
        vault.run_migrations()?;
        Ok(vault)
    }

    /// Configure SQLite pragmas for performance and safety.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_size = -8000;",
        )?;
        Ok(())
    }

    /// Run database schema migrations.
    fn run_migrations(&self) -> Result<()> {
        tracing::debug!("running vault schema migrations");

        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS wallet_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credentials (
                id             TEXT PRIMARY KEY,
                name           TEXT NOT NULL UNIQUE,
                type           TEXT NOT NULL CHECK(type IN
                    ('api_key','payment_token','oauth_token','secret','certificate')),
                encrypted_data BLOB NOT NULL,
                iv             BLOB NOT NULL,
                auth_tag       BLOB NOT NULL,
                metadata       TEXT NOT NULL DEFAULT '{}',
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            );",
            )
            .map_err(|e| WalletError::MigrationFailed {
                reason: e.to_string(),
            })?;

        tracing::debug!("vault schema migrations complete");
        Ok(())
    }

    // -- Lifecycle ----------------------------------------------------------

    /// First-run setup: generate a salt, derive the key, persist the salt
    /// and schema version atomically.  Leaves the vault unlocked.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::AlreadyInitialized`] if a salt row exists.
    pub fn initialize(&mut self, passphrase: &str) -> Result<()> {
        if self.stored_salt()?.is_some() {
            return Err(WalletError::AlreadyInitialized);
        }

        let salt = crypto::generate_salt()?;
        let key = crypto::derive_key(passphrase.as_bytes(), &salt)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO wallet_meta (key, value) VALUES (?1, ?2)",
            params![META_SALT, BASE64.encode(salt)],
        )?;
        tx.execute(
            "INSERT INTO wallet_meta (key, value) VALUES (?1, ?2)",
            params![META_SCHEMA_VERSION, SCHEMA_VERSION],
        )?;
        tx.commit()?;

        self.key = Some(Zeroizing::new(key));

        tracing::info!("vault initialized");
        Ok(())
    }

    /// Derive the key from `passphrase` and the stored salt.
    ///
    /// The passphrase is *not* verified here; a wrong passphrase surfaces as
    /// [`WalletError::AuthenticationFailed`] on the first [`Vault::get`].
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotInitialized`] when no salt is present.
    pub fn unlock(&mut self, passphrase: &str) -> Result<()> {
        let salt_b64 = self.stored_salt()?.ok_or(WalletError::NotInitialized)?;
        let salt = BASE64
            .decode(&salt_b64)
            .map_err(|e| WalletError::Internal(format!("stored salt is not base64: {e}")))?;

        let key = crypto::derive_key(passphrase.as_bytes(), &salt)?;
        self.key = Some(Zeroizing::new(key));

        tracing::info!("vault unlocked");
        Ok(())
    }

    /// Whether a derived key is currently held.
    pub fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    /// Zero the derived key and close the database connection.
    pub fn close(mut self) -> Result<()> {
        self.key = None; // Zeroizing overwrites the buffer on drop.
        self.conn.close().map_err(|(_, e)| e.into())
    }

    // -- Credential CRUD ----------------------------------------------------

    /// Store a new credential.  Returns the generated record id.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::VaultLocked`] before `initialize`/`unlock`, or
    /// [`WalletError::CredentialAlreadyExists`] when the name is taken.
    pub fn add(
        &self,
        name: &str,
        kind: CredentialKind,
        value: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String> {
        let key = self.key()?;

        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM credentials WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(WalletError::CredentialAlreadyExists {
                name: name.to_string(),
            });
        }

        let payload = crypto::encrypt(value.as_bytes(), key)?;
        let id = Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(metadata)?;
        let now = now_iso();

        self.conn.execute(
            "INSERT INTO credentials
                 (id, name, type, encrypted_data, iv, auth_tag, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                name,
                kind.as_str(),
                payload.ciphertext,
                payload.nonce.as_slice(),
                payload.tag.as_slice(),
                metadata_json,
                now,
                now,
            ],
        )?;

        tracing::info!(name = name, kind = %kind, "stored credential");
        Ok(id)
    }

    /// Retrieve and decrypt a credential by name.
    ///
    /// Returns `Ok(None)` when no credential with that name exists.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::VaultLocked`] before `initialize`/`unlock`, or
    /// [`WalletError::AuthenticationFailed`] when the held key cannot
    /// authenticate the stored ciphertext (wrong passphrase or tampering).
    pub fn get(&self, name: &str) -> Result<Option<Credential>> {
        let key = self.key()?;

        let row = self
            .conn
            .query_row(
                "SELECT id, name, type, encrypted_data, iv, auth_tag, metadata,
                        created_at, updated_at
                 FROM credentials WHERE name = ?1",
                params![name],
                |row| {
                    Ok(CredentialRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get::<_, String>(2)?,
                        encrypted_data: row.get::<_, Vec<u8>>(3)?,
                        iv: row.get::<_, Vec<u8>>(4)?,
                        auth_tag: row.get::<_, Vec<u8>>(5)?,
                        metadata: row.get::<_, String>(6)?,
                        created_at: row.get::<_, String>(7)?,
                        updated_at: row.get::<_, String>(8)?,
                    })
                },
            )
            .optional()?;

        match row {
            Some(row) => Ok(Some(self.decrypt_credential_row(row, key)?)),
            None => Ok(None),
        }
    }

    /// Replace an existing credential's value (re-encrypts with a fresh
    /// nonce) and, when given, its metadata.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::CredentialNotFound`] when the name is unknown.
    pub fn update(
        &self,
        name: &str,
        value: &str,
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<()> {
        let key = self.key()?;

        let payload = crypto::encrypt(value.as_bytes(), key)?;
        let now = now_iso();

        let rows = match metadata {
            Some(metadata) => {
                let metadata_json = serde_json::to_string(metadata)?;
                self.conn.execute(
                    "UPDATE credentials
                     SET encrypted_data = ?1, iv = ?2, auth_tag = ?3, metadata = ?4,
                         updated_at = ?5
                     WHERE name = ?6",
                    params![
                        payload.ciphertext,
                        payload.nonce.as_slice(),
                        payload.tag.as_slice(),
                        metadata_json,
                        now,
                        name
                    ],
                )?
            }
            None => self.conn.execute(
                "UPDATE credentials
                 SET encrypted_data = ?1, iv = ?2, auth_tag = ?3, updated_at = ?4
                 WHERE name = ?5",
                params![
                    payload.ciphertext,
                    payload.nonce.as_slice(),
                    payload.tag.as_slice(),
                    now,
                    name
                ],
            )?,
        };

        if rows == 0 {
            return Err(WalletError::CredentialNotFound {
                name: name.to_string(),
            });
        }

        tracing::info!(name = name, "replaced credential");
        Ok(())
    }

    /// Delete a credential by name.  Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::VaultLocked`] before `initialize`/`unlock`.
    pub fn remove(&self, name: &str) -> Result<bool> {
        self.key()?;

        let rows = self
            .conn
            .execute("DELETE FROM credentials WHERE name = ?1", params![name])?;

        if rows > 0 {
            tracing::info!(name = name, "deleted credential");
        }
        Ok(rows > 0)
    }

    /// List all stored credentials without touching their encrypted values.
    ///
    /// Works while locked: only non-secret columns are read.
    pub fn list(&self) -> Result<Vec<CredentialSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, type, metadata, created_at, updated_at
             FROM credentials ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(SummaryRow {
                id: row.get(0)?,
                name: row.get(1)?,
                kind: row.get::<_, String>(2)?,
                metadata: row.get::<_, String>(3)?,
                created_at: row.get::<_, String>(4)?,
                updated_at: row.get::<_, String>(5)?,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let row = row?;
            summaries.push(CredentialSummary {
                id: row.id,
                name: row.name,
                kind: CredentialKind::parse(&row.kind).unwrap_or(CredentialKind::Secret),
                metadata: parse_metadata(&row.metadata)?,
                created_at: parse_iso(&row.created_at),
                updated_at: parse_iso(&row.updated_at),
            });
        }

        tracing::debug!(count = summaries.len(), "listed credentials");
        Ok(summaries)
    }

    // -- Internal helpers ---------------------------------------------------

    /// The derived key, or [`WalletError::VaultLocked`].
    fn key(&self) -> Result<&[u8; crypto::KEY_LEN]> {
        self.key.as_deref().ok_or(WalletError::VaultLocked)
    }

    /// Read the stored base64 salt, if any.
    fn stored_salt(&self) -> Result<Option<String>> {
        let salt = self
            .conn
            .query_row(
                "SELECT value FROM wallet_meta WHERE key = ?1",
                params![META_SALT],
                |row| row.get(0),
            )
            .optional()?;
        Ok(salt)
    }

    /// Decrypt a raw credential row into a [`Credential`].
    fn decrypt_credential_row(
        &self,
        row: CredentialRow,
        key: &[u8; crypto::KEY_LEN],
    ) -> Result<Credential> {
        if row.iv.len() != crypto::NONCE_LEN || row.auth_tag.len() != crypto::TAG_LEN {
            return Err(WalletError::AuthenticationFailed);
        }

        let mut nonce = [0u8; crypto::NONCE_LEN];
        nonce.copy_from_slice(&row.iv);
        let mut tag = [0u8; crypto::TAG_LEN];
        tag.copy_from_slice(&row.auth_tag);

        let payload = EncryptedPayload {
            ciphertext: row.encrypted_data,
            nonce,
            tag,
        };
        let plaintext = crypto::decrypt(&payload, key)?;
        let value = String::from_utf8(plaintext)
            .map_err(|e| WalletError::Internal(format!("credential value is not UTF-8: {e}")))?;

        Ok(Credential {
            id: row.id,
            name: row.name,
            kind: CredentialKind::parse(&row.kind).unwrap_or(CredentialKind::Secret),
            value,
            metadata: parse_metadata(&row.metadata)?,
            created_at: parse_iso(&row.created_at),
            updated_at: parse_iso(&row.updated_at),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal row types (avoid leaking rusqlite details)
// ---------------------------------------------------------------------------

struct CredentialRow {
    id: String,
    name: String,
    kind: String,
    encrypted_data: Vec<u8>,
    iv: Vec<u8>,
    auth_tag: Vec<u8>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

struct SummaryRow {
    id: String,
    name: String,
    kind: String,
    metadata: String,
    created_at: String,
    updated_at: String,
}

/// Current time as ISO-8601 UTC with millisecond precision and `Z` suffix.
pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_iso(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_metadata(json: &str) -> Result<HashMap<String, String>> {
    serde_json::from_str(json)
        .map_err(|e| WalletError::Internal(format!("bad metadata JSON: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
