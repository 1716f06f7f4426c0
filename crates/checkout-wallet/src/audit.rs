//! Append-only audit log.
//!
//! Every request, grant, denial, and use is recorded here, and the log is the
//! *source of truth* for budget arithmetic: monthly spending is reconstructed
//! from `credential_used` rows rather than maintained as a counter, so there
//! is exactly one place that can disagree with reality.
//!
//! Rows are never updated or deleted; the auto-increment id supplies a total
//! order over events.  WAL journaling lets an in-flight reader see a
//! consistent snapshot while the append path is active.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};
use crate::vault::now_iso;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The closed set of audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    CredentialRequested,
    CredentialGranted,
    CredentialDenied,
    CredentialUsed,
    ApprovalRequired,
    TokenExpired,
    VaultUnlocked,
    VaultLocked,
    CredentialAdded,
    CredentialRemoved,
}

impl AuditEvent {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialRequested => "credential_requested",
            Self::CredentialGranted => "credential_granted",
            Self::CredentialDenied => "credential_denied",
            Self::CredentialUsed => "credential_used",
            Self::ApprovalRequired => "approval_required",
            Self::TokenExpired => "token_expired",
            Self::VaultUnlocked => "vault_unlocked",
            Self::VaultLocked => "vault_locked",
            Self::CredentialAdded => "credential_added",
            Self::CredentialRemoved => "credential_removed",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "credential_requested" => Some(Self::CredentialRequested),
            "credential_granted" => Some(Self::CredentialGranted),
            "credential_denied" => Some(Self::CredentialDenied),
            "credential_used" => Some(Self::CredentialUsed),
            "approval_required" => Some(Self::ApprovalRequired),
            "token_expired" => Some(Self::TokenExpired),
            "vault_unlocked" => Some(Self::VaultUnlocked),
            "vault_locked" => Some(Self::VaultLocked),
            "credential_added" => Some(Self::CredentialAdded),
            "credential_removed" => Some(Self::CredentialRemoved),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event to append.  All fields except `event` are optional; the
/// timestamp defaults to now when left unset.
///
/// Build one with struct-update syntax:
///
/// ```rust
/// # use checkout_wallet::audit::{AuditEvent, AuditRecord};
/// let record = AuditRecord {
///     agent_id: Some("deploy-agent".into()),
///     credential_name: Some("stripe-key".into()),
///     ..AuditRecord::new(AuditEvent::CredentialRequested)
/// };
/// ```
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event: AuditEvent,
    /// ISO-8601 UTC with `Z` suffix; defaults to now.
    pub timestamp: Option<String>,
    pub policy: Option<String>,
    pub agent_id: Option<String>,
    pub skill_id: Option<String>,
    pub purpose: Option<String>,
    pub token_id: Option<String>,
    pub credential_name: Option<String>,
    /// Serialized JSON text.
    pub scope: Option<String>,
    /// Serialized JSON text.
    pub context: Option<String>,
    pub outcome: Option<String>,
    pub approval: Option<String>,
    /// Free text; may carry a JSON object containing `amount`.
    pub details: Option<String>,
}

impl AuditRecord {
    /// A record of the given event with every other field unset.
    pub fn new(event: AuditEvent) -> Self {
        Self {
            event,
            timestamp: None,
            policy: None,
            agent_id: None,
            skill_id: None,
            purpose: None,
            token_id: None,
            credential_name: None,
            scope: None,
            context: None,
            outcome: None,
            approval: None,
            details: None,
        }
    }
}

/// A stored audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub event: AuditEvent,
    pub policy: Option<String>,
    pub agent_id: Option<String>,
    pub skill_id: Option<String>,
    pub purpose: Option<String>,
    pub token_id: Option<String>,
    pub credential_name: Option<String>,
    pub scope: Option<String>,
    pub context: Option<String>,
    pub outcome: Option<String>,
    pub approval: Option<String>,
    pub details: Option<String>,
}

/// Optional filters for [`AuditLog::query`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event: Option<AuditEvent>,
    pub policy: Option<String>,
    pub agent_id: Option<String>,
    /// Inclusive ISO timestamp lower bound (lexicographic `>=`).
    pub since: Option<String>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Durable append-only event store backed by SQLite.
pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    /// Open (or create) the audit database at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening audit database");

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;

        let log = Self { conn };
        log.run_migrations()?;
        Ok(log)
    }

    /// Open an in-memory audit log (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;

        let log = Self { conn };
        log.run_migrations()?;
        Ok(log)
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_size = -8000;",
        )?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS audit_log (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp       TEXT NOT NULL,
                event           TEXT NOT NULL,
                policy          TEXT,
                agent_id        TEXT,
                skill_id        TEXT,
                purpose         TEXT,
                token_id        TEXT,
                credential_name TEXT,
                scope           TEXT,
                context         TEXT,
                outcome         TEXT,
                approval        TEXT,
                details         TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_event ON audit_log(event);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_agent ON audit_log(agent_id);
            CREATE INDEX IF NOT EXISTS idx_audit_policy ON audit_log(policy);",
            )
            .map_err(|e| WalletError::MigrationFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Append an event.  Returns the assigned strictly-increasing id.
    pub fn log(&self, record: AuditRecord) -> Result<i64> {
        let timestamp = record.timestamp.unwrap_or_else(now_iso);

        self.conn.execute(
            "INSERT INTO audit_log
                 (timestamp, event, policy, agent_id, skill_id, purpose, token_id,
                  credential_name, scope, context, outcome, approval, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                timestamp,
                record.event.as_str(),
                record.policy,
                record.agent_id,
                record.skill_id,
                record.purpose,
                record.token_id,
                record.credential_name,
                record.scope,
                record.context,
                record.outcome,
                record.approval,
                record.details,
            ],
        )?;

        let id = self.conn.last_insert_rowid();
        tracing::trace!(id = id, event = %record.event, "audit entry recorded");
        Ok(id)
    }

    /// Query entries matching the filter, newest-first by id.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut sql = String::from(
            "SELECT id, timestamp, event, policy, agent_id, skill_id, purpose, token_id,
                    credential_name, scope, context, outcome, approval, details
             FROM audit_log WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(event) = filter.event {
            sql.push_str(" AND event = ?");
            args.push(Box::new(event.as_str().to_string()));
        }
        if let Some(policy) = &filter.policy {
            sql.push_str(" AND policy = ?");
            args.push(Box::new(policy.clone()));
        }
        if let Some(agent_id) = &filter.agent_id {
            sql.push_str(" AND agent_id = ?");
            args.push(Box::new(agent_id.clone()));
        }
        if let Some(since) = &filter.since {
            sql.push_str(" AND timestamp >= ?");
            args.push(Box::new(since.clone()));
        }

        sql.push_str(" ORDER BY id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(limit as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                map_audit_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Sum of `amount` fields across `credential_used` entries for
    /// `credential_name` whose timestamp carries the `YYYY-MM` prefix.
    ///
    /// `month` defaults to the current UTC month.  A textual prefix match is
    /// sufficient because every timestamp is written in the same canonical
    /// ISO-8601 `Z` form.  Rows whose `details` is not a JSON object with a
    /// numeric `amount` are skipped.
    pub fn monthly_spending(&self, credential_name: &str, month: Option<&str>) -> Result<f64> {
        let month = match month {
            Some(m) => m.to_string(),
            None => Utc::now().format("%Y-%m").to_string(),
        };
        let prefix = format!("{month}%");

        let mut stmt = self.conn.prepare(
            "SELECT details FROM audit_log
             WHERE event = 'credential_used' AND credential_name = ?1 AND timestamp LIKE ?2",
        )?;

        let rows = stmt.query_map(params![credential_name, prefix], |row| {
            row.get::<_, Option<String>>(0)
        })?;

        let mut total = 0.0;
        for details in rows {
            let Some(text) = details? else { continue };
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                continue;
            };
            if let Some(amount) = value.get("amount").and_then(|a| a.as_f64()) {
                total += amount;
            }
        }

        tracing::debug!(
            credential = credential_name,
            month = %month,
            total = total,
            "computed monthly spending"
        );
        Ok(total)
    }

    /// Close the underlying connection.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }
}

fn map_audit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let event_str: String = row.get(2)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        // Unknown event strings cannot appear: the closed set is enforced at
        // the write path.
        event: AuditEvent::parse(&event_str).unwrap_or(AuditEvent::CredentialRequested),
        policy: row.get(3)?,
        agent_id: row.get(4)?,
        skill_id: row.get(5)?,
        purpose: row.get(6)?,
        token_id: row.get(7)?,
        credential_name: row.get(8)?,
        scope: row.get(9)?,
        context: row.get(10)?,
        outcome: row.get(11)?,
        approval: row.get(12)?,
        details: row.get(13)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
