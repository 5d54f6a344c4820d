//! The capability set a step handler is invoked with (§4.4:
//! "StepExecutionContext").

use r2e_oidc::domain::Claims;
use serde_json::Value;

use crate::policy::PolicyStep;
use crate::services::TenantServices;
use crate::state::JourneyState;

/// Borrowed for the duration of a single step invocation. A step handler
/// reads its own config, reads/writes `state.data`, optionally claims the
/// identity being established via `set_authenticated`, and reaches tenant
/// services for anything requiring I/O.
pub struct StepExecutionContext<'a> {
    pub state: &'a mut JourneyState,
    pub step: &'a PolicyStep,
    pub services: &'a TenantServices,
    pub now: i64,
}

impl<'a> StepExecutionContext<'a> {
    pub fn data(&self) -> &Claims {
        &self.state.data
    }

    pub fn data_mut(&mut self) -> &mut Claims {
        &mut self.state.data
    }

    pub fn input(&self) -> &std::collections::HashMap<String, String> {
        &self.state.user_input
    }

    pub fn config(&self) -> &Value {
        &self.step.config
    }

    pub fn tenant_id(&self) -> &str {
        &self.state.tenant_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.state.user_id.as_deref()
    }

    pub fn set_user_id(&mut self, user_id: impl Into<String>) {
        self.state.user_id = Some(user_id.into());
    }

    /// Required whenever a step establishes identity — without it, no
    /// session cookie (and no `amr` claim) is produced on completion (§4.4's
    /// authentication-state contract).
    pub fn set_authenticated(&mut self, user_id: impl Into<String>, method: impl Into<String>) {
        let now = self.now;
        self.state.set_authenticated(user_id.into(), method, now);
    }
}
