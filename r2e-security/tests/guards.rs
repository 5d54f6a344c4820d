use r2e_security::error::SecurityError;
use r2e_security::guards::{require_any_role, RoleBasedIdentity};

struct TestIdentity {
    roles: Vec<String>,
}

impl TestIdentity {
    fn new(roles: &[&str]) -> Self {
        Self {
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl RoleBasedIdentity for TestIdentity {
    fn roles(&self) -> &[String] {
        &self.roles
    }
}

#[test]
fn passes_with_matching_role() {
    let id = TestIdentity::new(&["admin", "user"]);
    assert!(require_any_role(&id, &["admin"]).is_ok());
}

#[test]
fn rejects_without_matching_role() {
    let id = TestIdentity::new(&["user"]);
    let result = require_any_role(&id, &["admin"]);
    assert!(matches!(result, Err(SecurityError::Forbidden(_))));
}

#[test]
fn rejects_when_identity_has_no_roles() {
    let id = TestIdentity::new(&[]);
    let result = require_any_role(&id, &["admin"]);
    assert!(result.is_err());
}

#[test]
fn passes_with_any_of_several_required_roles() {
    let id = TestIdentity::new(&["editor"]);
    assert!(require_any_role(&id, &["admin", "editor"]).is_ok());
}
