//! Policy document loading and validation.
//!
//! A [`PolicySet`] is an immutable, validated view of one policy document.
//! Document order is preserved — it is the priority order the engine uses —
//! and policies are additionally indexed by name for direct lookup.
//!
//! Validation is structural only: field presence, positivity of numeric
//! limits, name uniqueness, and a known document version.  Whether a policy
//! *matches* a request is the engine's job, not the loader's.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, WalletError};
use crate::policy::model::{Policy, PolicyDocument};

/// The document version this loader understands.
const SUPPORTED_VERSION: &str = "1";

/// A validated, ordered set of policies indexed by name.
pub struct PolicySet {
    version: String,
    policies: Vec<Policy>,
    index: HashMap<String, usize>,
}

impl PolicySet {
    /// Parse and validate a YAML policy document.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Validation`] naming the offending path for
    /// syntax errors, unknown fields, or structural violations.
    pub fn load_from_text(text: &str) -> Result<Self> {
        let doc: PolicyDocument = serde_yaml::from_str(text).map_err(yaml_error)?;
        Self::from_document(doc)
    }

    /// Validate an already-parsed YAML value.
    pub fn load_from_value(value: serde_yaml::Value) -> Result<Self> {
        let doc: PolicyDocument = serde_yaml::from_value(value).map_err(yaml_error)?;
        Self::from_document(doc)
    }

    /// Read and parse a policy file from disk.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "loading policy document");
        let text = std::fs::read_to_string(path)?;
        Self::load_from_text(&text)
    }

    /// Validate a deserialized document and build the name index.
    pub fn from_document(doc: PolicyDocument) -> Result<Self> {
        if doc.version != SUPPORTED_VERSION {
            return Err(WalletError::Validation {
                path: "version".into(),
                reason: format!(
                    "unsupported policy document version '{}' (expected '{SUPPORTED_VERSION}')",
                    doc.version
                ),
            });
        }

        let mut index = HashMap::with_capacity(doc.policies.len());
        for (i, policy) in doc.policies.iter().enumerate() {
            validate_policy(policy, i)?;

            if index.insert(policy.name.clone(), i).is_some() {
                return Err(WalletError::Validation {
                    path: format!("policies[{i}].name"),
                    reason: format!("duplicate policy name '{}'", policy.name),
                });
            }
        }

        tracing::debug!(count = doc.policies.len(), "policy document validated");
        Ok(Self {
            version: doc.version,
            policies: doc.policies,
            index,
        })
    }

    /// The document version tag.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.index.get(name).map(|&i| &self.policies[i])
    }

    /// All policies in document order.
    pub fn list(&self) -> &[Policy] {
        &self.policies
    }

    /// Conservative pre-filter: the policies that could plausibly apply to
    /// this agent (and skill, when given), in document order.
    ///
    /// This is *not* an authorization decision — the engine re-checks scope —
    /// it only avoids evaluating clearly-irrelevant policies and backs the
    /// agent-facing policy listing.
    pub fn list_for_agent(&self, agent_id: &str, skill_id: Option<&str>) -> Vec<&Policy> {
        self.policies
            .iter()
            .filter(|p| {
                if p.deny.iter().any(|d| d == agent_id) {
                    return false;
                }
                if let Some(sel) = &p.grant_to.agent_id {
                    if !sel.matches(agent_id) {
                        return false;
                    }
                }
                if let (Some(skill), Some(sel)) = (skill_id, &p.grant_to.skill_id) {
                    if !sel.matches(skill) {
                        return false;
                    }
                }
                true
            })
            .collect()
    }
}

/// Map a serde_yaml error to a validation error with its source location.
fn yaml_error(e: serde_yaml::Error) -> WalletError {
    let path = e
        .location()
        .map(|loc| format!("line {}, column {}", loc.line(), loc.column()))
        .unwrap_or_else(|| "document".into());
    WalletError::Validation {
        path,
        reason: e.to_string(),
    }
}

/// Structural checks on a single policy.
fn validate_policy(policy: &Policy, i: usize) -> Result<()> {
    if policy.name.trim().is_empty() {
        return Err(WalletError::Validation {
            path: format!("policies[{i}].name"),
            reason: "policy name must be non-empty".into(),
        });
    }
    if policy.credential.trim().is_empty() {
        return Err(WalletError::Validation {
            path: format!("policies[{i}].credential"),
            reason: "policy credential must be non-empty".into(),
        });
    }

    if let Some(budget) = &policy.budget {
        // `!(v > 0.0)` also rejects NaN.
        if let Some(v) = budget.max_per_transaction {
            if !(v > 0.0) {
                return Err(WalletError::Validation {
                    path: format!("policies[{i}].budget.max_per_transaction"),
                    reason: format!("must be strictly positive, got {v}"),
                });
            }
        }
        if let Some(v) = budget.max_per_month {
            if !(v > 0.0) {
                return Err(WalletError::Validation {
                    path: format!("policies[{i}].budget.max_per_month"),
                    reason: format!("must be strictly positive, got {v}"),
                });
            }
        }
    }

    if let Some(v) = policy.approval_threshold {
        if !(v > 0.0) {
            return Err(WalletError::Validation {
                path: format!("policies[{i}].approval_threshold"),
                reason: format!("must be strictly positive, got {v}"),
            });
        }
    }

    if policy.ttl == 0 {
        return Err(WalletError::Validation {
            path: format!("policies[{i}].ttl"),
            reason: "ttl must be a positive integer".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
