//! Policy evaluation.
//!
//! The engine is a pure function of (policy, request, context): the only
//! external fact it needs — how much has already been spent this month — is
//! injected through [`EvalContext`] rather than read from the audit log.
//! That keeps evaluation trivially testable and the failure semantics clear.
//!
//! # Check order
//!
//! [`evaluate`] runs these checks in exactly this order; the first failure
//! decides the outcome:
//!
//! 1. Explicit deny list.
//! 2. Grant scope — agent.
//! 3. Grant scope — skill (skipped when the request carries no skill).
//! 4. Action allow-list.
//! 5. Per-transaction budget (`amount > limit` denies; equality is allowed).
//! 6. Monthly budget (`spent + amount > limit` denies).
//! 7. Approval threshold (`amount > threshold` requires approval).
//! 8. CEL condition (non-true or evaluator error denies).
//!
//! [`evaluate_first`] turns document order into a priority order across the
//! policies that reference the requested credential: the first `allow` or
//! `require_approval` wins; if every candidate denies, the last denial is
//! returned.

use crate::policy::condition;
use crate::policy::model::{CredentialRequest, Decision, Policy, PolicyEvalResult};

/// External facts injected into evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext {
    /// Sum of `credential_used` amounts for this credential in the current
    /// UTC calendar month.
    pub monthly_spending: f64,
}

/// Evaluate a single request against a single policy.
pub fn evaluate(
    policy: &Policy,
    request: &CredentialRequest,
    ctx: &EvalContext,
) -> PolicyEvalResult {
    // 1. Explicit deny.
    if policy.deny.iter().any(|d| d == &request.agent_id) {
        return PolicyEvalResult::deny(
            format!(
                "agent '{}' is explicitly denied by policy '{}'",
                request.agent_id, policy.name
            ),
            Some(policy.name.clone()),
        );
    }

    // 2. Grant scope — agent.
    if let Some(selector) = &policy.grant_to.agent_id {
        if !selector.matches(&request.agent_id) {
            return PolicyEvalResult::deny(
                format!(
                    "agent '{}' is not granted access to '{}' by policy '{}'",
                    request.agent_id, policy.credential, policy.name
                ),
                Some(policy.name.clone()),
            );
        }
    }

    // 3. Grant scope — skill.  A request without a skill skips this check.
    if let (Some(skill), Some(selector)) = (request.skill_id.as_deref(), &policy.grant_to.skill_id)
    {
        if !selector.matches(skill) {
            return PolicyEvalResult::deny(
                format!(
                    "skill '{skill}' is not granted access by policy '{}'",
                    policy.name
                ),
                Some(policy.name.clone()),
            );
        }
    }

    // 4. Action allow-list.
    if let (Some(actions), Some(action)) = (&policy.actions, request.action.as_deref()) {
        if !actions.iter().any(|a| a == action) {
            return PolicyEvalResult::deny(
                format!(
                    "action '{action}' is not allowed by policy '{}'",
                    policy.name
                ),
                Some(policy.name.clone()),
            );
        }
    }

    // 5 & 6. Budget arithmetic.  Equality sits on the allowed side.
    if let (Some(budget), Some(amount)) = (&policy.budget, request.amount) {
        if let Some(limit) = budget.max_per_transaction {
            if amount > limit {
                return PolicyEvalResult::deny(
                    format!(
                        "amount {amount} exceeds max per transaction {limit} (policy '{}')",
                        policy.name
                    ),
                    Some(policy.name.clone()),
                );
            }
        }
        if let Some(limit) = budget.max_per_month {
            if ctx.monthly_spending + amount > limit {
                return PolicyEvalResult::deny(
                    format!(
                        "amount {amount} would exceed monthly budget {limit} \
                         ({} already spent this month, policy '{}')",
                        ctx.monthly_spending, policy.name
                    ),
                    Some(policy.name.clone()),
                );
            }
        }
    }

    // 7. Approval threshold — a require_approval outcome, not a denial.
    if let (Some(threshold), Some(amount)) = (policy.approval_threshold, request.amount) {
        if amount > threshold {
            return PolicyEvalResult::require_approval(
                format!(
                    "amount {amount} exceeds approval threshold {threshold}; \
                     human approval required (policy '{}')",
                    policy.name
                ),
                policy,
            );
        }
    }

    // 8. Condition expression.  Evaluator errors become denials here and are
    // never propagated further.
    if let Some(expr) = &policy.condition {
        match condition::evaluate_condition(expr, request) {
            Ok(true) => {}
            Ok(false) => {
                return PolicyEvalResult::deny(
                    format!(
                        "CEL condition not satisfied for policy '{}': {expr}",
                        policy.name
                    ),
                    Some(policy.name.clone()),
                );
            }
            Err(e) => {
                return PolicyEvalResult::deny(
                    format!("CEL condition error in policy '{}': {e}", policy.name),
                    Some(policy.name.clone()),
                );
            }
        }
    }

    tracing::debug!(policy = %policy.name, agent = %request.agent_id, "request allowed");
    PolicyEvalResult::allow(policy)
}

/// Evaluate a request against every policy that references its credential,
/// in document order.
///
/// Returns the first `allow` or `require_approval`; when every candidate
/// denies, the *last* denial.  When no policy references the credential at
/// all, a denial explaining that.
pub fn evaluate_first(
    policies: &[Policy],
    request: &CredentialRequest,
    ctx: &EvalContext,
) -> PolicyEvalResult {
    let mut last_denial: Option<PolicyEvalResult> = None;

    for policy in policies.iter().filter(|p| p.credential == request.credential) {
        let result = evaluate(policy, request, ctx);
        match result.decision {
            Decision::Allow | Decision::RequireApproval => return result,
            Decision::Deny => last_denial = Some(result),
        }
    }

    last_denial.unwrap_or_else(|| {
        PolicyEvalResult::deny(
            format!("No policy found for credential '{}'", request.credential),
            None,
        )
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
