//! Policy document data model.
//!
//! These types mirror the declarative YAML policy format.  Unknown fields are
//! rejected at deserialization time (`deny_unknown_fields`) so typos in a
//! policy file fail loudly instead of silently granting nothing.

use serde::{Deserialize, Serialize};

/// Free-form mapping attached to tokens issued under a policy.
pub type Scope = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// A grant selector: a single identifier, a list of identifiers, or the
/// wildcard `"*"` (which may also appear inside a list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    One(String),
    Many(Vec<String>),
}

impl Selector {
    /// Whether this selector matches the given identifier.
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Self::One(s) => s == "*" || s == id,
            Self::Many(list) => list.iter().any(|s| s == "*" || s == id),
        }
    }
}

/// The `grant_to` block: which agents and skills a policy applies to.
/// An absent selector means "no constraint on that axis".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantTo {
    #[serde(default)]
    pub agent_id: Option<Selector>,
    #[serde(default)]
    pub skill_id: Option<Selector>,
}

/// Spending limits for a policy.  `currency` is free-form and informational.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Budget {
    #[serde(default)]
    pub max_per_transaction: Option<f64>,
    #[serde(default)]
    pub max_per_month: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Default token lifetime in seconds.
pub(crate) fn default_ttl() -> u64 {
    300
}

/// A single declarative authorization rule for one credential.
///
/// Multiple policies may reference the same credential; their document order
/// is a priority order (see
/// [`evaluate_first`](crate::policy::engine::evaluate_first)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// Unique name within the document.
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Name of the credential this policy governs.
    pub credential: String,

    /// Scope selector for agents and skills.
    pub grant_to: GrantTo,

    /// Agent identifiers whose requests this policy always rejects.
    #[serde(default)]
    pub deny: Vec<String>,

    /// Allow-list of action strings; when present, the request's action must
    /// be a member.
    #[serde(default)]
    pub actions: Option<Vec<String>>,

    #[serde(default)]
    pub budget: Option<Budget>,

    /// Amount above which a decision becomes `require_approval`.
    #[serde(default)]
    pub approval_threshold: Option<f64>,

    /// Optional CEL condition evaluated against the request.
    #[serde(default)]
    pub condition: Option<String>,

    /// Free-form scope attached to tokens issued under this policy.
    #[serde(default)]
    pub scope: Scope,

    /// Token lifetime in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u64,
}

/// A parsed policy document: a version tag plus an ordered policy list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    pub version: String,
    pub policies: Vec<Policy>,
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A single credential request from an agent, as handed to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRequest {
    /// Name of the requested credential.
    pub credential: String,

    /// Identity of the requesting agent.
    pub agent_id: String,

    /// Skill on whose behalf the request is made, if any.
    #[serde(default)]
    pub skill_id: Option<String>,

    /// Free-text purpose; mandatory, recorded in the audit log.
    pub purpose: String,

    #[serde(default)]
    pub amount: Option<f64>,

    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default)]
    pub action: Option<String>,

    /// Auxiliary request context, exposed to condition expressions.
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// The outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The request is allowed; a token may be issued.
    Allow,
    /// The request is rejected.
    Deny,
    /// The request needs a human-in-the-loop decision before it can proceed.
    RequireApproval,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::RequireApproval => "require_approval",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of evaluating a request against one or more policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvalResult {
    pub decision: Decision,
    /// Human-readable explanation, naming the deciding policy where one
    /// exists.
    pub reason: String,
    #[serde(default)]
    pub policy_name: Option<String>,
    /// The policy's scope, attached on `allow` and `require_approval`.
    #[serde(default)]
    pub scope: Option<Scope>,
}

impl PolicyEvalResult {
    pub fn allow(policy: &Policy) -> Self {
        Self {
            decision: Decision::Allow,
            reason: format!("granted by policy '{}'", policy.name),
            policy_name: Some(policy.name.clone()),
            scope: Some(policy.scope.clone()),
        }
    }

    pub fn deny(reason: impl Into<String>, policy_name: Option<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: reason.into(),
            policy_name,
            scope: None,
        }
    }

    pub fn require_approval(reason: impl Into<String>, policy: &Policy) -> Self {
        Self {
            decision: Decision::RequireApproval,
            reason: reason.into(),
            policy_name: Some(policy.name.clone()),
            scope: Some(policy.scope.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
