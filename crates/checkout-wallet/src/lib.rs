//! Local credential wallet for AI agents.
//!
//! Humans declare what each agent may do in a YAML policy file; agents never
//! hold raw secrets, only short-lived scoped tokens issued after policy
//! evaluation.  Every request, grant, denial, and use is appended to an
//! audit log, which is also the source of truth for monthly budget
//! arithmetic.
//!
//! # Modules
//!
//! - [`crypto`] — AES-256-GCM encryption/decryption, Argon2id + HKDF key
//!   derivation.
//! - [`vault`] — SQLite-backed encrypted credential store.
//! - [`policy`] — policy model, YAML loader, and the pure evaluation engine
//!   (including CEL conditions).
//! - [`audit`] — append-only event log and monthly-spending aggregation.
//! - [`token`] — in-memory scoped-token store with TTL semantics.
//! - [`pipeline`] — the [`Wallet`] façade sequencing the components into the
//!   request→grant→use→report protocol.
//! - [`error`] — unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use checkout_wallet::audit::AuditLog;
//! use checkout_wallet::pipeline::{RequestOutcome, Wallet};
//! use checkout_wallet::policy::{CredentialRequest, PolicySet};
//! use checkout_wallet::vault::{CredentialKind, Vault};
//!
//! # fn example() -> checkout_wallet::error::Result<()> {
//! let mut vault = Vault::open("data/vault.db")?;
//! vault.initialize("a strong passphrase")?;
//!
//! let policies = PolicySet::load_from_file("policies.yaml")?;
//! let audit = AuditLog::open("data/audit.db")?;
//!
//! let mut wallet = Wallet::new(vault, policies, audit);
//! wallet.add_credential(
//!     "stripe-key",
//!     CredentialKind::ApiKey,
//!     "sk_live_...",
//!     &Default::default(),
//! )?;
//!
//! let outcome = wallet.request_credential(&CredentialRequest {
//!     credential: "stripe-key".into(),
//!     agent_id: "deploy-agent".into(),
//!     skill_id: None,
//!     purpose: "charge customer".into(),
//!     amount: Some(25.0),
//!     currency: Some("USD".into()),
//!     action: Some("charge".into()),
//!     context: Default::default(),
//! })?;
//!
//! if let RequestOutcome::Granted { token_id, .. } = outcome {
//!     // ... use the credential, then:
//!     wallet.report_usage(&token_id, Some(25.0), Some("USD"), Some("success"), None)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod crypto;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod token;
pub mod vault;

// Re-export the most commonly used types at the crate root for convenience.
pub use audit::{AuditEntry, AuditEvent, AuditFilter, AuditLog, AuditRecord};
pub use error::{Result, WalletError};
pub use pipeline::{BudgetReport, PolicyListing, RequestOutcome, UsageOutcome, Wallet};
pub use policy::{
    CredentialRequest, Decision, EvalContext, Policy, PolicyDocument, PolicyEvalResult, PolicySet,
};
pub use token::{ScopedToken, TokenStore};
pub use vault::{Credential, CredentialKind, CredentialSummary, Vault};
