//! Multi-tenant OpenID Connect / OAuth 2.0 authorization server.
//!
//! Every endpoint is resolved under a tenant path segment
//! (`/t/{tenant_id}/...`); see [`router`] for the full route table and
//! [`state::AppState`] for what a deployment wires up before serving it.

pub mod authorize;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod grants;
pub mod keys;
pub mod pkce;
pub mod resume;
pub mod state;
pub mod store;
pub mod token;

mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

pub use config::ServerConfig;
pub use coordinator::JourneyCoordinator;
pub use error::{ErrorCode, OidcError};
pub use resume::{resume_after_authentication, AuthenticationOutcome};
pub use state::{AppState, ClientDirectory, InMemoryUserDirectory, TenantRegistry, UserDirectory};

/// Build the full OIDC router, scoped under `/t/{tenant_id}`. A deployment
/// nests this under whatever prefix it wants, or serves it at the root.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/t/{tenant_id}/.well-known/openid-configuration", get(handlers::discovery_handler))
        .route("/t/{tenant_id}/.well-known/jwks.json", get(handlers::jwks_handler))
        .route(
            "/t/{tenant_id}/connect/authorize",
            get(handlers::authorize_handler).post(handlers::authorize_form_handler),
        )
        .route("/t/{tenant_id}/connect/par", post(handlers::par_handler))
        .route("/t/{tenant_id}/connect/token", post(handlers::token_handler))
        .route("/t/{tenant_id}/connect/introspect", post(handlers::introspect_handler))
        .route("/t/{tenant_id}/connect/revocation", post(handlers::revocation_handler))
        .route(
            "/t/{tenant_id}/connect/deviceauthorization",
            post(handlers::device_authorization_handler),
        )
        .route("/t/{tenant_id}/connect/device", post(handlers::device_verification_handler))
        .route("/t/{tenant_id}/connect/endsession", get(handlers::end_session_handler))
        .route("/t/{tenant_id}/connect/userinfo", get(handlers::userinfo_handler))
        .with_state(state)
}

pub mod prelude {
    //! Re-exports of the most commonly used OIDC types.
    pub use crate::config::ServerConfig;
    pub use crate::coordinator::JourneyCoordinator;
    pub use crate::domain::{Client, Tenant, TenantResolution, User};
    pub use crate::error::OidcError;
    pub use crate::resume::{resume_after_authentication, AuthenticationOutcome};
    pub use crate::router;
    pub use crate::state::{AppState, InMemoryUserDirectory, UserDirectory};
}
