//! Journey State (§3): the thing that is persisted between HTTP turns and
//! advanced one step at a time by the executor.

use std::collections::HashMap;

use r2e_oidc::domain::Claims;
use serde::{Deserialize, Serialize};

/// A running instance of a [`crate::policy::JourneyPolicy`] (GLOSSARY:
/// "Journey"). `version` backs the compare-and-swap §5 requires so that two
/// concurrent advances on the same `journey_id` cannot both win — the loser
/// gets [`crate::error::JourneyError::StaleState`] and must retry or fail,
/// never silently clobber the winner's write.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JourneyState {
    pub journey_id: String,
    pub policy_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub correlation_id: String,
    pub current_step_index: usize,
    pub user_id: Option<String>,
    pub authenticated_at: Option<i64>,
    pub auth_method: Option<String>,
    pub data: Claims,
    pub user_input: HashMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub ttl_secs: i64,
    pub version: u64,
}

impl JourneyState {
    pub fn new(
        journey_id: String,
        policy_id: String,
        tenant_id: String,
        client_id: String,
        correlation_id: String,
        now: i64,
        ttl_secs: i64,
    ) -> Self {
        Self {
            journey_id,
            policy_id,
            tenant_id,
            client_id,
            correlation_id,
            current_step_index: 0,
            user_id: None,
            authenticated_at: None,
            auth_method: None,
            data: Claims::new(),
            user_input: HashMap::new(),
            created_at: now,
            updated_at: now,
            ttl_secs,
            version: 0,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.updated_at + self.ttl_secs
    }

    /// §4.4's authentication-state contract: a journey has produced an
    /// authenticated principal iff both `user_id` and `authenticated_at` are
    /// set.
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some() && self.authenticated_at.is_some()
    }

    pub fn set_authenticated(&mut self, user_id: String, method: impl Into<String>, now: i64) {
        self.user_id = Some(user_id);
        self.authenticated_at = Some(now);
        self.auth_method = Some(method.into());
    }
}

/// Delivered to the authorize endpoint via `correlation_id` once a journey
/// reaches `Completed` (§4.4 step 5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticationResult {
    pub user_id: String,
    pub session_id: String,
    pub scopes: Vec<String>,
    pub claims: Claims,
    pub auth_method: Option<String>,
    pub authenticated_at: i64,
}

/// Terminal outcome of a journey (mirrors the authorize state machine's
/// `Completed`/`Error` but scoped to this engine).
#[derive(Clone, Debug)]
pub enum JourneyOutcome {
    Completed(AuthenticationResult),
    Failed { code: String, description: String },
}
