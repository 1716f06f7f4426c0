//! In-memory scoped-token store with TTL semantics.
//!
//! A [`ScopedToken`] is the only handle an agent ever receives: it carries
//! the credential's plaintext value, the policy and agent identity it was
//! issued under, and an expiry.  Token ids are fresh UUIDs so they cannot be
//! guessed or enumerated.
//!
//! Expiry is lazy: [`TokenStore::get`] removes a token it finds expired, and
//! the hosting environment calls [`TokenStore::purge_expired`] on a coarse
//! timer.  The store is owned by a single caller; there is no interior
//! locking.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::model::Scope;

/// Default token lifetime in seconds, matching the policy default.
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// A short-lived handle carrying a credential's value to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedToken {
    /// Fresh UUID; the only identifier the agent sees.
    pub token_id: String,
    pub credential_name: String,
    /// Decrypted credential value.
    pub credential_value: String,
    /// The policy under which this token was issued.
    pub policy_name: String,
    pub agent_id: String,
    pub skill_id: Option<String>,
    /// Free-form scope copied from the issuing policy.
    pub scope: Scope,
    /// Wall-clock milliseconds.
    pub issued_at: i64,
    /// Wall-clock milliseconds; the token stops resolving at this instant.
    pub expires_at: i64,
    /// Set by `mark_used`; never cleared.
    pub used: bool,
}

/// Parameters for [`TokenStore::issue`].
#[derive(Debug, Clone)]
pub struct IssueParams {
    pub credential_name: String,
    pub credential_value: String,
    pub policy_name: String,
    pub agent_id: String,
    pub skill_id: Option<String>,
    pub scope: Scope,
    /// Lifetime in seconds; defaults to [`DEFAULT_TTL_SECONDS`].
    pub ttl_seconds: Option<u64>,
}

/// In-memory mapping from token id to [`ScopedToken`].
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: HashMap<String, ScopedToken>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token.  `used` starts false.
    pub fn issue(&mut self, params: IssueParams) -> ScopedToken {
        let now = now_ms();
        let ttl = params.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);

        let token = ScopedToken {
            token_id: Uuid::new_v4().to_string(),
            credential_name: params.credential_name,
            credential_value: params.credential_value,
            policy_name: params.policy_name,
            agent_id: params.agent_id,
            skill_id: params.skill_id,
            scope: params.scope,
            issued_at: now,
            expires_at: now + (ttl as i64) * 1000,
            used: false,
        };

        tracing::debug!(
            token_id = %token.token_id,
            credential = %token.credential_name,
            ttl_seconds = ttl,
            "issued scoped token"
        );

        self.tokens.insert(token.token_id.clone(), token.clone());
        token
    }

    /// Resolve a token, lazily removing it once `now >= expires_at`.
    ///
    /// A ttl of 0 therefore yields a token that is already unavailable on
    /// the first `get`.
    pub fn get(&mut self, token_id: &str) -> Option<&ScopedToken> {
        let expired = match self.tokens.get(token_id) {
            Some(token) => now_ms() >= token.expires_at,
            None => return None,
        };

        if expired {
            self.tokens.remove(token_id);
            tracing::debug!(token_id = token_id, "token expired, removed lazily");
            return None;
        }

        self.tokens.get(token_id)
    }

    /// Mark a token as used.  Idempotent; returns whether the token still
    /// exists.  Does not change expiry.
    pub fn mark_used(&mut self, token_id: &str) -> bool {
        match self.tokens.get_mut(token_id) {
            Some(token) => {
                token.used = true;
                true
            }
            None => false,
        }
    }

    /// Remove every expired token.  Idempotent.  Returns how many were
    /// removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = now_ms();
        let before = self.tokens.len();
        self.tokens.retain(|_, token| now < token.expires_at);
        let purged = before - self.tokens.len();

        if purged > 0 {
            tracing::debug!(purged = purged, "purged expired tokens");
        }
        purged
    }

    /// Number of tokens currently held (including not-yet-purged expired
    /// ones).
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Wall-clock now in milliseconds.
fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn params(ttl: Option<u64>) -> IssueParams {
        IssueParams {
            credential_name: "stripe-key".into(),
            credential_value: "sk-value".into(),
            policy_name: "stripe-charges".into(),
            agent_id: "test-agent".into(),
            skill_id: None,
            scope: Scope::new(),
            ttl_seconds: ttl,
        }
    }

    #[test]
    fn issue_and_get() {
        let mut store = TokenStore::new();
        let token = store.issue(params(Some(60)));

        assert!(!token.used);
        assert_eq!(token.expires_at - token.issued_at, 60_000);

        let fetched = store.get(&token.token_id).unwrap();
        assert_eq!(fetched.credential_value, "sk-value");
        assert_eq!(fetched.policy_name, "stripe-charges");
    }

    #[test]
    fn ttl_defaults_to_300_seconds() {
        let mut store = TokenStore::new();
        let token = store.issue(params(None));
        assert_eq!(token.expires_at - token.issued_at, 300_000);
    }

    #[test]
    fn token_ids_are_unique() {
        let mut store = TokenStore::new();
        let a = store.issue(params(Some(60)));
        let b = store.issue(params(Some(60)));
        assert_ne!(a.token_id, b.token_id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn zero_ttl_expires_on_first_get() {
        let mut store = TokenStore::new();
        let token = store.issue(params(Some(0)));

        assert!(store.get(&token.token_id).is_none());
        // Removed lazily on that get.
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_token_is_none() {
        let mut store = TokenStore::new();
        assert!(store.get("no-such-token").is_none());
    }

    #[test]
    fn mark_used_is_idempotent() {
        let mut store = TokenStore::new();
        let token = store.issue(params(Some(60)));

        assert!(store.mark_used(&token.token_id));
        assert!(store.mark_used(&token.token_id));

        let fetched = store.get(&token.token_id).unwrap();
        assert!(fetched.used);
    }

    #[test]
    fn mark_used_on_missing_token_is_false() {
        let mut store = TokenStore::new();
        assert!(!store.mark_used("no-such-token"));
    }

    #[test]
    fn mark_used_does_not_change_expiry() {
        let mut store = TokenStore::new();
        let token = store.issue(params(Some(60)));
        let expires_at = token.expires_at;

        store.mark_used(&token.token_id);

        let fetched = store.get(&token.token_id).unwrap();
        assert_eq!(fetched.expires_at, expires_at);
    }

    #[test]
    fn purge_expired_is_idempotent() {
        let mut store = TokenStore::new();
        store.issue(params(Some(0)));
        store.issue(params(Some(0)));
        let live = store.issue(params(Some(300)));

        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.len(), 1);
        assert!(store.get(&live.token_id).is_some());
    }
}
