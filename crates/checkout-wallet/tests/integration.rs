//! Integration tests for the checkout-wallet crate.
//!
//! These exercise the full request→grant→use→report protocol through the
//! [`Wallet`] façade: vault unlock, policy evaluation, budget arithmetic
//! reconstructed from the audit log, token issuance, and usage reporting.

use std::collections::HashMap;

use chrono::Utc;

use checkout_wallet::audit::{AuditEvent, AuditFilter, AuditLog, AuditRecord};
use checkout_wallet::pipeline::{RequestOutcome, UsageOutcome, Wallet};
use checkout_wallet::policy::{CredentialRequest, PolicySet};
use checkout_wallet::token::{IssueParams, TokenStore};
use checkout_wallet::vault::{CredentialKind, Vault};

const PASSPHRASE: &str = "integration-test-pass";
const STRIPE_VALUE: &str = "test-credential-value-abc123";

const CHARGE_POLICY: &str = "
version: '1'
policies:
  - name: stripe-charges
    description: Charges on the test Stripe account
    credential: stripe-key
    grant_to:
      agent_id: test-agent
    actions: [charge]
    budget:
      max_per_transaction: 100
      max_per_month: 500
      currency: USD
    approval_threshold: 75
    ttl: 60
";

/// Wallet with an initialized in-memory vault holding `stripe-key`.
fn test_wallet(policy_doc: &str) -> Wallet {
    let mut vault = Vault::open_in_memory().unwrap();
    vault.initialize(PASSPHRASE).unwrap();
    vault
        .add(
            "stripe-key",
            CredentialKind::ApiKey,
            STRIPE_VALUE,
            &HashMap::new(),
        )
        .unwrap();

    let policies = PolicySet::load_from_text(policy_doc).unwrap();
    let audit = AuditLog::open_in_memory().unwrap();
    Wallet::new(vault, policies, audit)
}

fn charge_request(agent_id: &str, amount: f64) -> CredentialRequest {
    CredentialRequest {
        credential: "stripe-key".into(),
        agent_id: agent_id.into(),
        skill_id: None,
        purpose: "charge customer".into(),
        amount: Some(amount),
        currency: Some("USD".into()),
        action: Some("charge".into()),
        context: serde_json::Map::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Request pipeline scenarios
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn happy_path_grants_token_with_value_and_expiry() {
    let mut wallet = test_wallet(CHARGE_POLICY);

    let outcome = wallet
        .request_credential(&charge_request("test-agent", 25.0))
        .unwrap();

    let RequestOutcome::Granted {
        token_id,
        credential_value,
        expires_at,
        ..
    } = outcome
    else {
        panic!("expected grant, got {outcome:?}");
    };

    assert!(!token_id.is_empty());
    assert_eq!(credential_value, STRIPE_VALUE);

    // Expiry roughly now + 60s (the policy ttl).
    let expires = chrono::DateTime::parse_from_rfc3339(&expires_at).unwrap();
    let delta = expires.timestamp_millis() - Utc::now().timestamp_millis();
    assert!((55_000..=65_000).contains(&delta), "delta was {delta}ms");

    // requested then granted appear in the log, in id order.
    let entries = wallet.audit().query(&AuditFilter::default()).unwrap();
    let events: Vec<AuditEvent> = entries.iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        [AuditEvent::CredentialGranted, AuditEvent::CredentialRequested]
    );
}

#[test]
fn unauthorized_agent_is_denied() {
    let mut wallet = test_wallet(CHARGE_POLICY);

    let outcome = wallet
        .request_credential(&charge_request("unauthorized-agent", 25.0))
        .unwrap();

    let RequestOutcome::Denied { reason } = outcome else {
        panic!("expected denial, got {outcome:?}");
    };
    assert!(reason.contains("not granted"), "reason: {reason}");
}

#[test]
fn amount_over_threshold_requires_approval() {
    let mut wallet = test_wallet(CHARGE_POLICY);

    let outcome = wallet
        .request_credential(&charge_request("test-agent", 80.0))
        .unwrap();

    let RequestOutcome::RequireApproval { reason, policy } = outcome else {
        panic!("expected approval requirement, got {outcome:?}");
    };
    assert!(reason.contains("approval threshold"), "reason: {reason}");
    assert_eq!(policy, "stripe-charges");
}

#[test]
fn amount_over_transaction_cap_is_denied() {
    let mut wallet = test_wallet(CHARGE_POLICY);

    let outcome = wallet
        .request_credential(&charge_request("test-agent", 150.0))
        .unwrap();

    let RequestOutcome::Denied { reason } = outcome else {
        panic!("expected denial, got {outcome:?}");
    };
    assert!(reason.contains("max per transaction"), "reason: {reason}");
}

#[test]
fn monthly_budget_reconstructed_from_audit_log() {
    let mut wallet = test_wallet(CHARGE_POLICY);

    // Seed $960 of prior usage this month, straight into the audit log.
    let month = Utc::now().format("%Y-%m").to_string();
    for (day, amount) in [(3, 400.0), (9, 310.0), (17, 250.0)] {
        wallet
            .audit()
            .log(AuditRecord {
                timestamp: Some(format!("{month}-{day:02}T10:00:00.000Z")),
                credential_name: Some("stripe-key".into()),
                details: Some(format!(r#"{{"amount": {amount}, "currency": "USD"}}"#)),
                ..AuditRecord::new(AuditEvent::CredentialUsed)
            })
            .unwrap();
    }

    let outcome = wallet
        .request_credential(&charge_request("test-agent", 50.0))
        .unwrap();

    let RequestOutcome::Denied { reason } = outcome else {
        panic!("expected denial, got {outcome:?}");
    };
    assert!(reason.contains("monthly budget"), "reason: {reason}");
}

#[test]
fn condition_gates_on_purpose() {
    let doc = "
version: '1'
policies:
  - name: deploy-only
    credential: stripe-key
    grant_to:
      agent_id: '*'
    condition: 'purpose.contains(\"deploy\")'
";
    let mut wallet = test_wallet(doc);

    let mut request = charge_request("test-agent", 1.0);
    request.amount = None;
    request.action = None;

    request.purpose = "deploy to production".into();
    let outcome = wallet.request_credential(&request).unwrap();
    assert!(matches!(outcome, RequestOutcome::Granted { .. }));

    request.purpose = "random task".into();
    let outcome = wallet.request_credential(&request).unwrap();
    let RequestOutcome::Denied { reason } = outcome else {
        panic!("expected denial, got {outcome:?}");
    };
    assert!(reason.contains("CEL condition"), "reason: {reason}");
}

#[test]
fn expired_token_is_gone_and_unreportable() {
    // ttl 0 at the store level: unavailable from the very first get.
    let mut store = TokenStore::new();
    let token = store.issue(IssueParams {
        credential_name: "stripe-key".into(),
        credential_value: STRIPE_VALUE.into(),
        policy_name: "stripe-charges".into(),
        agent_id: "test-agent".into(),
        skill_id: None,
        scope: serde_json::Map::new(),
        ttl_seconds: Some(0),
    });
    assert!(store.get(&token.token_id).is_none());

    // Reporting usage for a token the wallet no longer resolves is an error
    // status, and the expiry is audited.
    let mut wallet = test_wallet(CHARGE_POLICY);
    let outcome = wallet
        .report_usage(&token.token_id, Some(10.0), None, None, None)
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
}

// ═══════════════════════════════════════════════════════════════════════
//  Full protocol round-trip
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn request_use_report_feeds_back_into_budget() {
    let mut wallet = test_wallet(CHARGE_POLICY);

    // First charge: $60 granted and reported.
    let outcome = wallet
        .request_credential(&charge_request("test-agent", 60.0))
        .unwrap();
    let RequestOutcome::Granted { token_id, .. } = outcome else {
        panic!("expected grant");
    };
    let reported = wallet
        .report_usage(&token_id, Some(60.0), Some("USD"), Some("success"), None)
        .unwrap();
    assert!(matches!(reported, UsageOutcome::Recorded { .. }));

    // Budget now reflects the recorded usage.
    let report = wallet.check_budget("stripe-key", None).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["spent_this_month"], 60.0);
    assert_eq!(json["remaining"], 440.0);
    assert_eq!(json["max_per_month"], 500.0);
    assert_eq!(json["currency"], "USD");

    // A second request that would fit the transaction cap but not what is
    // left of the month after three more $60 charges.
    for _ in 0..3 {
        let outcome = wallet
            .request_credential(&charge_request("test-agent", 60.0))
            .unwrap();
        let RequestOutcome::Granted { token_id, .. } = outcome else {
            panic!("expected grant");
        };
        wallet
            .report_usage(&token_id, Some(60.0), Some("USD"), Some("success"), None)
            .unwrap();
    }

    // $240 spent; $75 still fits under both the cap and the threshold.
    let outcome = wallet
        .request_credential(&charge_request("test-agent", 75.0))
        .unwrap();
    assert!(matches!(outcome, RequestOutcome::Granted { .. }));
}

#[test]
fn vault_persists_across_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.db");
    let audit_path = dir.path().join("audit.db");

    {
        let mut vault = Vault::open(&vault_path).unwrap();
        vault.initialize(PASSPHRASE).unwrap();
        vault
            .add(
                "stripe-key",
                CredentialKind::ApiKey,
                STRIPE_VALUE,
                &HashMap::new(),
            )
            .unwrap();

        let wallet = Wallet::new(
            vault,
            PolicySet::load_from_text(CHARGE_POLICY).unwrap(),
            AuditLog::open(&audit_path).unwrap(),
        );
        wallet.close().unwrap();
    }

    // Reopen, unlock with the same passphrase, request again.
    let mut vault = Vault::open(&vault_path).unwrap();
    vault.unlock(PASSPHRASE).unwrap();

    let mut wallet = Wallet::new(
        vault,
        PolicySet::load_from_text(CHARGE_POLICY).unwrap(),
        AuditLog::open(&audit_path).unwrap(),
    );

    let outcome = wallet
        .request_credential(&charge_request("test-agent", 10.0))
        .unwrap();
    let RequestOutcome::Granted {
        credential_value, ..
    } = outcome
    else {
        panic!("expected grant");
    };
    assert_eq!(credential_value, STRIPE_VALUE);

    // The earlier session's vault_locked marker survived on disk.
    let locked = wallet
        .audit()
        .query(&AuditFilter {
            event: Some(AuditEvent::VaultLocked),
            ..AuditFilter::default()
        })
        .unwrap();
    assert_eq!(locked.len(), 1);
}

#[test]
fn document_order_is_priority_order_end_to_end() {
    let doc = "
version: '1'
policies:
  - name: trusted-only
    credential: stripe-key
    grant_to:
      agent_id: trusted-agent
  - name: fallback-for-all
    credential: stripe-key
    grant_to:
      agent_id: '*'
    ttl: 30
";
    let mut wallet = test_wallet(doc);

    // Rejected by the first policy but allowed by the later wildcard one.
    let mut request = charge_request("other-agent", 5.0);
    request.action = None;

    let outcome = wallet.request_credential(&request).unwrap();
    let RequestOutcome::Granted { .. } = outcome else {
        panic!("expected grant via the later policy, got {outcome:?}");
    };

    let granted = wallet
        .audit()
        .query(&AuditFilter {
            event: Some(AuditEvent::CredentialGranted),
            ..AuditFilter::default()
        })
        .unwrap();
    assert_eq!(granted[0].policy.as_deref(), Some("fallback-for-all"));
}
