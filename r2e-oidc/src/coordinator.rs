//! Bridge to an externally-wired interactive authentication engine (§4.4).
//!
//! The authorize endpoint suspends here instead of performing local-login
//! directly whenever a client has a journey policy configured for the
//! "login" purpose. The concrete engine (`r2e-journey`'s executor) is
//! adapted by whatever binary wires the two crates together and injected
//! into [`crate::state::AppState`] at construction — matching §9's "pass
//! global [state] explicitly through the construction phase" and the
//! grant/step registries' pattern of taking capabilities as constructor
//! inputs rather than reaching for a global.

use async_trait::async_trait;
use axum::response::Response;

use crate::domain::ProtocolContext;
use crate::error::OidcError;

/// Capability an authorize endpoint suspends into when a client configures a
/// journey policy, instead of the inline local-login fallback (§4.1 step 5).
#[async_trait]
pub trait JourneyCoordinator: Send + Sync {
    /// Start the journey configured for `ctx.policy_id` (falling back to the
    /// client's "login" purpose policy if unset). Returns the HTTP response
    /// for this turn — a `ShowUi` render or a `Redirect` per §4.4's executor
    /// loop. The engine calls back into
    /// [`crate::resume::resume_after_authentication`] once a step calls
    /// `set_authenticated` and the journey reaches a terminal state that
    /// resolves this context's `correlation_id`.
    async fn begin(&self, ctx: &ProtocolContext) -> Result<Response, OidcError>;
}
