pub mod config;
pub mod dpop;
pub mod error;
pub mod extractor;
pub mod guards;
pub mod identity;
pub mod jwks;
pub mod jwt;
pub mod keycloak;
pub mod openid;

// Re-export primary public types for convenience.
pub use config::SecurityConfig;
pub use dpop::{DpopError, DpopProof, DpopValidator};
pub use error::SecurityError;
pub use extractor::{extract_jwt_claims, extract_jwt_identity};
pub use guards::{require_any_role, RoleBasedIdentity};
pub use identity::{
    AuthenticatedUser, ClaimsIdentity, DefaultIdentityBuilder, DefaultRoleExtractor,
    IdentityBuilder, IdentityBuilderWith,
};
pub use jwks::JwksCache;
pub use jwt::{JwtClaimsValidator, JwtValidator};

// Re-export the base RoleExtractor trait at crate root for convenience.
pub use openid::RoleExtractor;

pub mod prelude {
    //! Re-exports of the most commonly used security types.
    pub use crate::{AuthenticatedUser, JwtValidator, RoleBasedIdentity, SecurityConfig};
}
