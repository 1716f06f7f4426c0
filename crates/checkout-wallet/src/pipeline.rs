//! The request pipeline: the tool façade agents talk to.
//!
//! A [`Wallet`] owns the vault, the policy set, the audit log, and the token
//! store, and sequences them through the request→grant→use→report protocol:
//!
//! ```text
//! request_credential ── log requested ─▶ evaluate ──┬─ deny ──▶ log denied
//!                                                   ├─ approval ▶ log approval_required
//!                                                   └─ allow ─▶ vault.get ─▶ issue token
//!                                                                          ─▶ log granted
//! report_usage ──▶ mark token used ─▶ log credential_used
//! ```
//!
//! Within one request, audit events are appended strictly in the order
//! `requested → (denied | approval_required | granted)`; `credential_granted`
//! is logged only after the token exists, so a reader that sees `granted`
//! can trust the token record existed at that moment.
//!
//! Denials and approval requirements are outcomes, not errors; only
//! infrastructure failures (database, serialization) surface as `Err`.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::audit::{AuditEvent, AuditLog, AuditRecord};
use crate::error::{Result, WalletError};
use crate::policy::engine::{self, EvalContext};
use crate::policy::loader::PolicySet;
use crate::policy::model::{Budget, CredentialRequest, Decision, Scope};
use crate::token::{IssueParams, TokenStore};
use crate::vault::{CredentialKind, Vault};

// ---------------------------------------------------------------------------
// Tool responses
// ---------------------------------------------------------------------------

/// Outcome of `request_credential`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// A token was issued; `credential_value` is the plaintext secret.
    Granted {
        token_id: String,
        credential_value: String,
        /// ISO-8601 expiry of the token.
        expires_at: String,
        scope: Scope,
    },
    /// A human must decide before this request can proceed.
    RequireApproval { reason: String, policy: String },
    Denied { reason: String },
    /// Infrastructure problem behind an allow (e.g. credential missing from
    /// the vault); no token was issued.
    Error { reason: String },
}

/// One row of `list_available_policies`: the agent-safe projection of a
/// policy.  Never exposes `condition`, `deny`, or `scope`.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyListing {
    pub name: String,
    pub description: Option<String>,
    pub credential: String,
    pub actions: Option<Vec<String>>,
    pub budget: Option<Budget>,
    pub ttl: u64,
}

/// Outcome of `check_budget`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BudgetReport {
    /// The governing policy has no monthly cap.
    Unlimited {
        policy: String,
        credential: String,
        budget: String,
    },
    Limited {
        policy: String,
        credential: String,
        max_per_month: f64,
        spent_this_month: f64,
        remaining: f64,
        currency: String,
        max_per_transaction: Option<f64>,
    },
}

/// Outcome of `report_usage`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UsageOutcome {
    Recorded { token_id: String },
    Error { reason: String },
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// Orchestrator for the four tool operations.  Owns every component; there
/// is no shared mutable state beyond the derived key inside the vault.
pub struct Wallet {
    vault: Vault,
    policies: PolicySet,
    audit: AuditLog,
    tokens: TokenStore,
}

impl Wallet {
    /// Assemble a wallet from its components.  The vault may be locked; call
    /// [`Wallet::initialize`] or [`Wallet::unlock`] before serving requests.
    pub fn new(vault: Vault, policies: PolicySet, audit: AuditLog) -> Self {
        Self {
            vault,
            policies,
            audit,
            tokens: TokenStore::new(),
        }
    }

    /// The audit log (e.g. for host-side queries).
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The policy set currently in force.
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Whether the vault currently holds a derived key.
    pub fn is_unlocked(&self) -> bool {
        self.vault.is_unlocked()
    }

    // -- Lifecycle ----------------------------------------------------------

    /// First-run vault setup.  Logs `vault_unlocked` on success.
    pub fn initialize(&mut self, passphrase: &str) -> Result<()> {
        self.vault.initialize(passphrase)?;
        self.audit.log(AuditRecord::new(AuditEvent::VaultUnlocked))?;
        Ok(())
    }

    /// Unlock the vault.  Logs `vault_unlocked` on success.
    pub fn unlock(&mut self, passphrase: &str) -> Result<()> {
        self.vault.unlock(passphrase)?;
        self.audit.log(AuditRecord::new(AuditEvent::VaultUnlocked))?;
        Ok(())
    }

    /// Log `vault_locked`, zero the vault key, and close both stores.
    pub fn close(self) -> Result<()> {
        self.audit.log(AuditRecord::new(AuditEvent::VaultLocked))?;
        self.vault.close()?;
        self.audit.close()?;
        Ok(())
    }

    /// Store a credential and log `credential_added`.
    pub fn add_credential(
        &self,
        name: &str,
        kind: CredentialKind,
        value: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String> {
        let id = self.vault.add(name, kind, value, metadata)?;
        self.audit.log(AuditRecord {
            credential_name: Some(name.to_string()),
            details: Some(format!("kind={kind}")),
            ..AuditRecord::new(AuditEvent::CredentialAdded)
        })?;
        Ok(id)
    }

    /// Remove a credential; logs `credential_removed` when a row matched.
    pub fn remove_credential(&self, name: &str) -> Result<bool> {
        let removed = self.vault.remove(name)?;
        if removed {
            self.audit.log(AuditRecord {
                credential_name: Some(name.to_string()),
                ..AuditRecord::new(AuditEvent::CredentialRemoved)
            })?;
        }
        Ok(removed)
    }

    /// Drop expired tokens.  The hosting environment calls this on a coarse
    /// timer (~60 s).
    pub fn purge_expired_tokens(&mut self) -> usize {
        self.tokens.purge_expired()
    }

    // -- Tool operations ----------------------------------------------------

    /// Handle a credential request end to end.
    ///
    /// Evaluation runs over the *full* policy list — the engine selects by
    /// credential — so an out-of-scope agent receives the governing policy's
    /// "not granted" reason rather than "no policy found".
    pub fn request_credential(&mut self, request: &CredentialRequest) -> Result<RequestOutcome> {
        let context_json = if request.context.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&request.context)?)
        };

        self.audit.log(AuditRecord {
            agent_id: Some(request.agent_id.clone()),
            skill_id: request.skill_id.clone(),
            purpose: Some(request.purpose.clone()),
            credential_name: Some(request.credential.clone()),
            context: context_json,
            ..AuditRecord::new(AuditEvent::CredentialRequested)
        })?;

        let monthly_spending = self.audit.monthly_spending(&request.credential, None)?;
        let ctx = EvalContext { monthly_spending };
        let result = engine::evaluate_first(self.policies.list(), request, &ctx);

        match result.decision {
            Decision::Deny => {
                tracing::info!(
                    agent = %request.agent_id,
                    credential = %request.credential,
                    reason = %result.reason,
                    "credential request denied"
                );
                self.audit.log(AuditRecord {
                    policy: result.policy_name.clone(),
                    agent_id: Some(request.agent_id.clone()),
                    skill_id: request.skill_id.clone(),
                    credential_name: Some(request.credential.clone()),
                    outcome: Some("denied".into()),
                    details: Some(result.reason.clone()),
                    ..AuditRecord::new(AuditEvent::CredentialDenied)
                })?;
                Ok(RequestOutcome::Denied {
                    reason: result.reason,
                })
            }

            Decision::RequireApproval => {
                let policy = result.policy_name.clone().unwrap_or_default();
                self.audit.log(AuditRecord {
                    policy: result.policy_name.clone(),
                    agent_id: Some(request.agent_id.clone()),
                    skill_id: request.skill_id.clone(),
                    credential_name: Some(request.credential.clone()),
                    approval: Some("required".into()),
                    details: Some(result.reason.clone()),
                    ..AuditRecord::new(AuditEvent::ApprovalRequired)
                })?;
                Ok(RequestOutcome::RequireApproval {
                    reason: result.reason,
                    policy,
                })
            }

            Decision::Allow => self.grant(request, result.policy_name, result.scope),
        }
    }

    /// Allow path: read the secret, issue the token, log the grant.
    fn grant(
        &mut self,
        request: &CredentialRequest,
        policy_name: Option<String>,
        scope: Option<Scope>,
    ) -> Result<RequestOutcome> {
        let policy_name = policy_name.unwrap_or_default();

        let credential = match self.vault.get(&request.credential) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return Ok(RequestOutcome::Error {
                    reason: format!("credential '{}' not found in vault", request.credential),
                });
            }
            Err(WalletError::VaultLocked) => {
                return Ok(RequestOutcome::Error {
                    reason: "vault is locked".into(),
                });
            }
            Err(e) => return Err(e),
        };

        let ttl_seconds = self.policies.get(&policy_name).map(|p| p.ttl);
        let scope = scope.unwrap_or_default();

        let token = self.tokens.issue(IssueParams {
            credential_name: credential.name,
            credential_value: credential.value,
            policy_name: policy_name.clone(),
            agent_id: request.agent_id.clone(),
            skill_id: request.skill_id.clone(),
            scope: scope.clone(),
            ttl_seconds,
        });

        let scope_json = if scope.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&scope)?)
        };

        // The token exists before `credential_granted` is appended.
        self.audit.log(AuditRecord {
            policy: Some(policy_name),
            agent_id: Some(request.agent_id.clone()),
            skill_id: request.skill_id.clone(),
            token_id: Some(token.token_id.clone()),
            credential_name: Some(request.credential.clone()),
            scope: scope_json,
            outcome: Some("granted".into()),
            ..AuditRecord::new(AuditEvent::CredentialGranted)
        })?;

        tracing::info!(
            agent = %request.agent_id,
            credential = %request.credential,
            token_id = %token.token_id,
            "credential granted"
        );

        Ok(RequestOutcome::Granted {
            token_id: token.token_id,
            credential_value: token.credential_value,
            expires_at: iso_from_ms(token.expires_at),
            scope,
        })
    }

    /// The policies visible to an agent, projected to their agent-safe
    /// fields.
    pub fn list_available_policies(
        &self,
        agent_id: &str,
        skill_id: Option<&str>,
    ) -> Vec<PolicyListing> {
        self.policies
            .list_for_agent(agent_id, skill_id)
            .into_iter()
            .map(|p| PolicyListing {
                name: p.name.clone(),
                description: p.description.clone(),
                credential: p.credential.clone(),
                actions: p.actions.clone(),
                budget: p.budget.clone(),
                ttl: p.ttl,
            })
            .collect()
    }

    /// Remaining monthly budget for a credential under one policy.
    ///
    /// Uses the named policy when given, otherwise the first policy whose
    /// `credential` matches.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::PolicyNotFound`] when neither resolves.
    pub fn check_budget(
        &self,
        credential_name: &str,
        policy_name: Option<&str>,
    ) -> Result<BudgetReport> {
        let policy = match policy_name {
            Some(name) => self
                .policies
                .get(name)
                .ok_or_else(|| WalletError::PolicyNotFound {
                    name: name.to_string(),
                })?,
            None => self
                .policies
                .list()
                .iter()
                .find(|p| p.credential == credential_name)
                .ok_or_else(|| WalletError::PolicyNotFound {
                    name: format!("for credential '{credential_name}'"),
                })?,
        };

        let budget = policy.budget.as_ref();
        let Some(max_per_month) = budget.and_then(|b| b.max_per_month) else {
            return Ok(BudgetReport::Unlimited {
                policy: policy.name.clone(),
                credential: policy.credential.clone(),
                budget: "unlimited".into(),
            });
        };

        let spent = self.audit.monthly_spending(&policy.credential, None)?;
        let remaining = (max_per_month - spent).max(0.0);

        Ok(BudgetReport::Limited {
            policy: policy.name.clone(),
            credential: policy.credential.clone(),
            max_per_month,
            spent_this_month: spent,
            remaining,
            currency: budget
                .and_then(|b| b.currency.clone())
                .unwrap_or_else(|| "USD".into()),
            max_per_transaction: budget.and_then(|b| b.max_per_transaction),
        })
    }

    /// Record that a granted credential was actually used.
    ///
    /// A missing or expired token logs `token_expired` and returns an error
    /// status rather than an `Err`.
    pub fn report_usage(
        &mut self,
        token_id: &str,
        amount: Option<f64>,
        currency: Option<&str>,
        outcome: Option<&str>,
        details: Option<&str>,
    ) -> Result<UsageOutcome> {
        let token = match self.tokens.get(token_id) {
            Some(token) => token.clone(),
            None => {
                self.audit.log(AuditRecord {
                    token_id: Some(token_id.to_string()),
                    ..AuditRecord::new(AuditEvent::TokenExpired)
                })?;
                return Ok(UsageOutcome::Error {
                    reason: format!("token '{token_id}' not found or expired"),
                });
            }
        };

        self.tokens.mark_used(token_id);

        let details_payload = match (amount, details) {
            (Some(amount), _) => Some(
                serde_json::json!({
                    "amount": amount,
                    "currency": currency.unwrap_or("USD"),
                    "details": details,
                })
                .to_string(),
            ),
            (None, Some(details)) => Some(details.to_string()),
            (None, None) => None,
        };

        let scope_json = if token.scope.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&token.scope)?)
        };

        self.audit.log(AuditRecord {
            policy: Some(token.policy_name.clone()),
            agent_id: Some(token.agent_id.clone()),
            skill_id: token.skill_id.clone(),
            token_id: Some(token.token_id.clone()),
            credential_name: Some(token.credential_name.clone()),
            scope: scope_json,
            outcome: outcome.map(str::to_string),
            details: details_payload,
            ..AuditRecord::new(AuditEvent::CredentialUsed)
        })?;

        tracing::info!(
            token_id = token_id,
            credential = %token.credential_name,
            "usage recorded"
        );

        Ok(UsageOutcome::Recorded {
            token_id: token_id.to_string(),
        })
    }
}

/// Wall-clock milliseconds to ISO-8601 UTC with `Z` suffix.
fn iso_from_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;

    const POLICY_DOC: &str = "
version: '1'
policies:
  - name: stripe-charges
    credential: stripe-key
    grant_to:
      agent_id: test-agent
    actions: [charge]
    budget:
      max_per_transaction: 100
      max_per_month: 500
      currency: USD
    approval_threshold: 75
    scope:
      purpose_category: payments
    ttl: 60
";

    fn test_wallet() -> Wallet {
        let mut vault = Vault::open_in_memory().unwrap();
        vault.initialize("test-passphrase").unwrap();
        vault
            .add(
                "stripe-key",
                CredentialKind::ApiKey,
                "sk-test-value",
                &HashMap::new(),
            )
            .unwrap();

        let policies = PolicySet::load_from_text(POLICY_DOC).unwrap();
        let audit = AuditLog::open_in_memory().unwrap();
        Wallet::new(vault, policies, audit)
    }

    fn charge_request(amount: f64) -> CredentialRequest {
        CredentialRequest {
            credential: "stripe-key".into(),
            agent_id: "test-agent".into(),
            skill_id: None,
            purpose: "charge customer".into(),
            amount: Some(amount),
            currency: Some("USD".into()),
            action: Some("charge".into()),
            context: serde_json::Map::new(),
        }
    }

    #[test]
    fn grant_issues_token_and_logs_in_order() {
        let mut wallet = test_wallet();

        let outcome = wallet.request_credential(&charge_request(25.0)).unwrap();
        let RequestOutcome::Granted {
            token_id,
            credential_value,
            scope,
            ..
        } = outcome
        else {
            panic!("expected grant, got {outcome:?}");
        };

        assert_eq!(credential_value, "sk-test-value");
        assert_eq!(
            scope.get("purpose_category").and_then(|v| v.as_str()),
            Some("payments")
        );

        // requested then granted, in id order.
        let entries = wallet.audit().query(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].event, AuditEvent::CredentialGranted);
        assert_eq!(entries[0].token_id.as_deref(), Some(token_id.as_str()));
        assert_eq!(entries[1].event, AuditEvent::CredentialRequested);
        assert!(entries[1].id < entries[0].id);
    }

    #[test]
    fn denial_logs_and_reports_reason() {
        let mut wallet = test_wallet();

        let mut request = charge_request(25.0);
        request.agent_id = "unauthorized-agent".into();

        let outcome = wallet.request_credential(&request).unwrap();
        let RequestOutcome::Denied { reason } = outcome else {
            panic!("expected denial, got {outcome:?}");
        };
        assert!(reason.contains("not granted"));

        let denials = wallet
            .audit()
            .query(&AuditFilter {
                event: Some(AuditEvent::CredentialDenied),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(denials.len(), 1);
        assert_eq!(denials[0].outcome.as_deref(), Some("denied"));
    }

    #[test]
    fn approval_required_logs_and_issues_no_token() {
        let mut wallet = test_wallet();

        let outcome = wallet.request_credential(&charge_request(80.0)).unwrap();
        let RequestOutcome::RequireApproval { reason, policy } = outcome else {
            panic!("expected approval requirement, got {outcome:?}");
        };
        assert!(reason.contains("approval threshold"));
        assert_eq!(policy, "stripe-charges");

        let approvals = wallet
            .audit()
            .query(&AuditFilter {
                event: Some(AuditEvent::ApprovalRequired),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].approval.as_deref(), Some("required"));

        // No grant happened.
        assert!(wallet
            .audit()
            .query(&AuditFilter {
                event: Some(AuditEvent::CredentialGranted),
                ..AuditFilter::default()
            })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn missing_credential_behind_allow_is_error_without_token() {
        let mut wallet = test_wallet();
        wallet.vault.remove("stripe-key").unwrap();

        let outcome = wallet.request_credential(&charge_request(25.0)).unwrap();
        let RequestOutcome::Error { reason } = outcome else {
            panic!("expected error, got {outcome:?}");
        };
        assert!(reason.contains("not found"));
        assert!(wallet.tokens.is_empty());
    }

    #[test]
    fn locked_vault_behind_allow_is_error() {
        let mut wallet = test_wallet();

        let vault = Vault::open_in_memory().unwrap();
        // Swap in a locked vault with the same (empty) policy surface.
        wallet.vault = vault;

        let outcome = wallet.request_credential(&charge_request(25.0)).unwrap();
        assert!(matches!(outcome, RequestOutcome::Error { .. }));
    }

    #[test]
    fn listing_projects_agent_safe_fields() {
        let wallet = test_wallet();

        let listings = wallet.list_available_policies("test-agent", None);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "stripe-charges");
        assert_eq!(listings[0].ttl, 60);

        // The serialized projection must not leak sensitive policy fields.
        let json = serde_json::to_string(&listings).unwrap();
        assert!(!json.contains("condition"));
        assert!(!json.contains("deny"));
        assert!(!json.contains("scope"));

        assert!(wallet.list_available_policies("stranger", None).is_empty());
    }

    #[test]
    fn check_budget_reports_spend_and_remaining() {
        let mut wallet = test_wallet();

        let granted = wallet.request_credential(&charge_request(40.0)).unwrap();
        let RequestOutcome::Granted { token_id, .. } = granted else {
            panic!("expected grant");
        };
        wallet
            .report_usage(&token_id, Some(40.0), Some("USD"), Some("success"), None)
            .unwrap();

        let report = wallet.check_budget("stripe-key", None).unwrap();
        let BudgetReport::Limited {
            policy,
            max_per_month,
            spent_this_month,
            remaining,
            currency,
            max_per_transaction,
            ..
        } = report
        else {
            panic!("expected limited budget");
        };

        assert_eq!(policy, "stripe-charges");
        assert_eq!(max_per_month, 500.0);
        assert_eq!(spent_this_month, 40.0);
        assert_eq!(remaining, 460.0);
        assert_eq!(currency, "USD");
        assert_eq!(max_per_transaction, Some(100.0));
    }

    #[test]
    fn check_budget_unlimited_without_monthly_cap() {
        let doc = "
version: '1'
policies:
  - name: open-ended
    credential: github-token
    grant_to:
      agent_id: '*'
";
        let mut vault = Vault::open_in_memory().unwrap();
        vault.initialize("pass").unwrap();
        let wallet = Wallet::new(
            vault,
            PolicySet::load_from_text(doc).unwrap(),
            AuditLog::open_in_memory().unwrap(),
        );

        let report = wallet.check_budget("github-token", None).unwrap();
        let BudgetReport::Unlimited { budget, .. } = report else {
            panic!("expected unlimited");
        };
        assert_eq!(budget, "unlimited");
    }

    #[test]
    fn check_budget_unknown_policy_errors() {
        let wallet = test_wallet();

        let result = wallet.check_budget("stripe-key", Some("no-such-policy"));
        assert!(matches!(result, Err(WalletError::PolicyNotFound { .. })));

        let result = wallet.check_budget("no-such-credential", None);
        assert!(matches!(result, Err(WalletError::PolicyNotFound { .. })));
    }

    #[test]
    fn report_usage_marks_token_and_logs_amount_payload() {
        let mut wallet = test_wallet();

        let granted = wallet.request_credential(&charge_request(30.0)).unwrap();
        let RequestOutcome::Granted { token_id, .. } = granted else {
            panic!("expected grant");
        };

        let outcome = wallet
            .report_usage(&token_id, Some(30.0), None, Some("success"), Some("ok"))
            .unwrap();
        assert!(matches!(outcome, UsageOutcome::Recorded { .. }));

        let used = wallet
            .audit()
            .query(&AuditFilter {
                event: Some(AuditEvent::CredentialUsed),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].outcome.as_deref(), Some("success"));

        let details: serde_json::Value =
            serde_json::from_str(used[0].details.as_deref().unwrap()).unwrap();
        assert_eq!(details["amount"], 30.0);
        assert_eq!(details["currency"], "USD"); // defaulted
        assert_eq!(details["details"], "ok");

        // The recorded usage now counts against the monthly budget.
        assert_eq!(
            wallet.audit().monthly_spending("stripe-key", None).unwrap(),
            30.0
        );
    }

    #[test]
    fn report_usage_without_amount_logs_plain_details() {
        let mut wallet = test_wallet();

        let granted = wallet.request_credential(&charge_request(10.0)).unwrap();
        let RequestOutcome::Granted { token_id, .. } = granted else {
            panic!("expected grant");
        };

        wallet
            .report_usage(&token_id, None, None, None, Some("read-only call"))
            .unwrap();

        let used = wallet
            .audit()
            .query(&AuditFilter {
                event: Some(AuditEvent::CredentialUsed),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(used[0].details.as_deref(), Some("read-only call"));

        // Plain details contribute nothing to monthly spending.
        assert_eq!(
            wallet.audit().monthly_spending("stripe-key", None).unwrap(),
            0.0
        );
    }

    #[test]
    fn report_usage_on_unknown_token_is_error_and_logs_expiry() {
        let mut wallet = test_wallet();

        let outcome = wallet
            .report_usage("not-a-token", Some(5.0), None, None, None)
            .unwrap();
        assert!(matches!(outcome, UsageOutcome::Error { .. }));

        let expired = wallet
            .audit()
            .query(&AuditFilter {
                event: Some(AuditEvent::TokenExpired),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].token_id.as_deref(), Some("not-a-token"));
    }

    #[test]
    fn lifecycle_events_are_audited() {
        let mut vault = Vault::open_in_memory().unwrap();
        vault.initialize("pass").unwrap();
        let mut wallet = Wallet::new(
            vault,
            PolicySet::load_from_text(POLICY_DOC).unwrap(),
            AuditLog::open_in_memory().unwrap(),
        );

        wallet
            .add_credential("stripe-key", CredentialKind::ApiKey, "v", &HashMap::new())
            .unwrap();
        assert!(wallet.remove_credential("stripe-key").unwrap());
        assert!(!wallet.remove_credential("stripe-key").unwrap());

        let entries = wallet.audit().query(&AuditFilter::default()).unwrap();
        let events: Vec<AuditEvent> = entries.iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            [AuditEvent::CredentialRemoved, AuditEvent::CredentialAdded]
        );

        wallet.purge_expired_tokens();
        wallet.close().unwrap();
    }
}
