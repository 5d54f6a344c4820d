//! The executor loop (§4.4): advances a [`JourneyState`] one step at a time,
//! persisting it on every suspension and resuming from exactly where it left
//! off on the next HTTP turn. This is *not* a coroutine that survives across
//! a process restart — each turn is a fresh call into [`JourneyEngine::begin`]
//! or [`JourneyEngine::resume`] that reloads the state, runs the loop until
//! the next suspension or terminal outcome, and returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::{IntoResponse, Json, Redirect, Response};
use dashmap::DashMap;
use r2e_cache::TtlCache;
use r2e_oidc::domain::ProtocolContext;
use r2e_oidc::{resume, AuthenticationOutcome, JourneyCoordinator, OidcError};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::conditions;
use crate::context::StepExecutionContext;
use crate::policy::JourneyPolicy;
use crate::registry::StepRegistry;
use crate::result::StepHandlerResult;
use crate::services::TenantServices;
use crate::state::JourneyState;

/// `(tenant_id, policy_id) -> JourneyPolicy`. A policy is immutable once
/// registered; edits replace the whole entry.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: DashMap<(String, String), Arc<JourneyPolicy>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, policy: JourneyPolicy) {
        let key = (policy.tenant_id.clone(), policy.policy_id.clone());
        self.policies.insert(key, Arc::new(policy));
    }

    pub fn get(&self, tenant_id: &str, policy_id: &str) -> Option<Arc<JourneyPolicy>> {
        self.policies
            .get(&(tenant_id.to_string(), policy_id.to_string()))
            .map(|e| e.value().clone())
    }
}

/// Holds every in-flight [`JourneyState`], keyed by `journey_id`.
///
/// `claim` is the concurrency primitive §5 requires: it atomically removes
/// the state so the calling turn is its sole owner for the duration of the
/// advance. A second concurrent turn against the same `journey_id` observes
/// `None` and must report [`crate::error::JourneyError::StaleState`] rather
/// than race the first turn's mutation — there is no partial state for it to
/// observe or corrupt, because there is no state left to find until the
/// winner puts its result back (or terminates the journey, in which case
/// there is rightfully nothing to resume).
#[derive(Clone)]
pub struct JourneyStore {
    cache: TtlCache<String, JourneyState>,
}

impl JourneyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(ttl),
        }
    }

    pub fn put(&self, state: JourneyState) {
        self.cache.insert(state.journey_id.clone(), state);
    }

    pub fn claim(&self, journey_id: &str) -> Option<JourneyState> {
        self.cache.take(&journey_id.to_string())
    }
}

enum Suspension {
    ShowUi { view: String, model: Value },
    Redirect(String),
}

/// Ties the step registry, policy registry, and journey store together and
/// implements [`JourneyCoordinator`] so `r2e-oidc`'s authorize endpoint can
/// suspend into it without depending on this crate's types.
pub struct JourneyEngine {
    registry: StepRegistry,
    policies: PolicyRegistry,
    store: JourneyStore,
    services: Arc<TenantServices>,
    ttl_secs: i64,
}

impl JourneyEngine {
    pub fn new(services: Arc<TenantServices>, policies: PolicyRegistry, ttl_secs: i64) -> Self {
        Self {
            registry: StepRegistry::with_builtins(),
            policies,
            store: JourneyStore::new(Duration::from_secs(ttl_secs.max(1) as u64)),
            services,
            ttl_secs,
        }
    }

    /// Swap in a non-default step registry, e.g. one that also registers
    /// tenant-specific step types.
    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    fn now(&self) -> i64 {
        self.services.oidc.clock.now()
    }

    /// Resume a suspended journey with the next turn's input. Used by the
    /// HTTP resume endpoint ([`crate::router`]) for both posted-form
    /// continuations and external-IdP callback redirects.
    pub async fn resume(&self, tenant_id: &str, journey_id: &str, user_input: HashMap<String, String>) -> Response {
        // A form that embeds its own journey_id must agree with the path's —
        // guards against a stale page resubmitting over a different journey.
        if let Some(posted) = user_input.get("journey_id") {
            if posted != journey_id {
                return invalid_request_response("journey_id on the resuming form does not match the active journey");
            }
        }

        let Some(mut state) = self.store.claim(journey_id) else {
            return invalid_request_response("unknown, expired, or already-active journey_id");
        };
        if state.tenant_id != tenant_id {
            return invalid_request_response("unknown, expired, or already-active journey_id");
        }
        if state.is_expired(self.now()) {
            return self.fail(state, "expired", "the journey has expired".to_string()).await;
        }

        let Some(policy) = self.policies.get(&state.tenant_id, &state.policy_id) else {
            return OidcError::server_error("journey policy is no longer registered").into_response();
        };

        state.user_input = user_input;
        state.version += 1;
        self.run(state, policy).await
    }

    async fn run(&self, mut state: JourneyState, policy: Arc<JourneyPolicy>) -> Response {
        loop {
            let Some(step) = policy.step_at(state.current_step_index).cloned() else {
                return self.complete(state).await;
            };

            if !step.conditions.is_empty() {
                let now = self.now();
                let ctx = StepExecutionContext {
                    state: &mut state,
                    step: &step,
                    services: &self.services,
                    now,
                };
                let should_run = conditions::evaluate_clauses(&ctx, &step.conditions, step.condition_combinator).await;
                if !should_run {
                    state.current_step_index += 1;
                    state.user_input.clear();
                    continue;
                }
            }

            let Some(handler) = self.registry.get(step.step_type) else {
                return self
                    .fail(state, "server_error", format!("no step handler registered for '{:?}'", step.step_type))
                    .await;
            };

            let now = self.now();
            let outcome = {
                let mut ctx = StepExecutionContext {
                    state: &mut state,
                    step: &step,
                    services: &self.services,
                    now,
                };
                handler.execute(&mut ctx).await
            };

            match outcome {
                StepHandlerResult::Success(output) => {
                    state.data.extend(output);
                    state.current_step_index += 1;
                    state.user_input.clear();
                }
                StepHandlerResult::Skip => {
                    state.current_step_index += 1;
                    state.user_input.clear();
                }
                StepHandlerResult::Branch { target_step_id, output } => {
                    state.data.extend(output);
                    match policy.step_index(&target_step_id) {
                        Some(idx) => state.current_step_index = idx,
                        None => {
                            return self
                                .fail(state, "server_error", format!("branch target '{target_step_id}' does not exist"))
                                .await
                        }
                    }
                    state.user_input.clear();
                }
                StepHandlerResult::ShowUi { view, model } => {
                    return self.suspend(state, Suspension::ShowUi { view, model }).await;
                }
                StepHandlerResult::Redirect(url) => {
                    return self.suspend(state, Suspension::Redirect(url)).await;
                }
                StepHandlerResult::Fail { code, description } => {
                    if step.optional {
                        tracing::debug!(step_id = %step.id, %code, "optional step failed, continuing");
                        state.current_step_index += 1;
                        state.user_input.clear();
                    } else {
                        return self.fail(state, &code, description).await;
                    }
                }
            }
        }
    }

    async fn suspend(&self, mut state: JourneyState, suspension: Suspension) -> Response {
        state.updated_at = self.now();
        state.version += 1;
        let journey_id = state.journey_id.clone();
        self.store.put(state);

        match suspension {
            Suspension::ShowUi { view, model } => {
                let mut body = model;
                if let Value::Object(map) = &mut body {
                    map.insert("journey_id".to_string(), json!(journey_id));
                    map.insert("view".to_string(), json!(view));
                }
                Json(body).into_response()
            }
            Suspension::Redirect(url) => Redirect::to(&url).into_response(),
        }
    }

    /// Terminate the journey as a failure, converting it into the OAuth/OIDC
    /// error the suspended authorize request resumes with (§7: never echo
    /// user input into `description`, which holds since every `description`
    /// here is developer-authored by a step handler, not copied from
    /// `user_input`).
    async fn fail(&self, state: JourneyState, code: &str, description: String) -> Response {
        tracing::warn!(journey_id = %state.journey_id, code = %code, %description, "journey terminated in error");
        let Some(ctx) = self.services.oidc.protocol_states.take(&state.correlation_id) else {
            return OidcError::server_error("journey failed and its originating request could not be resumed").into_response();
        };
        resume::authorize_error_response(Some(&ctx.request), OidcError::access_denied(format!("{code}: {description}")))
    }

    async fn complete(&self, state: JourneyState) -> Response {
        if !state.is_authenticated() {
            return self
                .fail(state, "server_error", "journey completed without establishing an authenticated principal".to_string())
                .await;
        }
        let Some(ctx) = self.services.oidc.protocol_states.take(&state.correlation_id) else {
            return OidcError::server_error("journey completed but its originating request could not be resumed").into_response();
        };

        let consent_given = state.data.get("consent_given").and_then(Value::as_bool).unwrap_or(false);
        let outcome = AuthenticationOutcome {
            subject_id: state.user_id.clone().expect("is_authenticated checked above"),
            session_id: Some(Uuid::new_v4().to_string()),
            auth_method: state.auth_method.clone(),
            extra_claims: state.data.clone(),
        };

        resume::resume_after_authentication(&self.services.oidc, &ctx, outcome, consent_given).await
    }
}

#[async_trait]
impl JourneyCoordinator for JourneyEngine {
    async fn begin(&self, ctx: &ProtocolContext) -> Result<Response, OidcError> {
        let policy_id = ctx
            .policy_id
            .clone()
            .ok_or_else(|| OidcError::server_error("protocol context carries no journey policy_id"))?;
        let policy = self
            .policies
            .get(&ctx.tenant_id, &policy_id)
            .ok_or_else(|| OidcError::server_error(format!("policy '{policy_id}' is not registered for this tenant")))?;

        let now = self.now();
        let journey_id = Uuid::new_v4().to_string();
        let state = JourneyState::new(
            journey_id,
            policy_id,
            ctx.tenant_id.clone(),
            ctx.request.client_id.clone(),
            ctx.correlation_id.clone(),
            now,
            self.ttl_secs,
        );

        Ok(self.run(state, policy).await)
    }
}

fn invalid_request_response(description: &str) -> Response {
    OidcError::invalid_request(description, false).into_response()
}
