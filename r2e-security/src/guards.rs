use crate::error::SecurityError;

/// Extension of an identity type for role-based access control.
///
/// Implement this trait on identity types that carry role information.
/// `AuthenticatedUser` implements this trait automatically.
pub trait RoleBasedIdentity {
    /// Roles associated with this identity.
    fn roles(&self) -> &[String];
}

/// Check that an identity carries at least one of the required roles.
///
/// Grant handlers and journey steps call this directly (e.g. to enforce a
/// client's `allowed_roles` set) instead of going through a macro-driven
/// route guard.
pub fn require_any_role(
    identity: &impl RoleBasedIdentity,
    required_roles: &[&str],
) -> Result<(), SecurityError> {
    let roles = identity.roles();
    let has_role = required_roles
        .iter()
        .any(|req| roles.iter().any(|r| r.as_str() == *req));
    if has_role {
        Ok(())
    } else {
        Err(SecurityError::Forbidden("insufficient roles".into()))
    }
}
