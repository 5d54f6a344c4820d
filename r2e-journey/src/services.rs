//! Tenant-scoped capability interfaces a step handler reaches through
//! [`crate::context::StepExecutionContext`] (§4.4's "access to tenant-scoped
//! services"). Every one of these is "external collaborators, interfaces
//! only" per the system's Non-goals — FIDO2, SMS/email gateways, CAPTCHA
//! providers, and managed/WASM plugin runtimes are capability boundaries
//! this crate defines and calls through, not implementations it ships.

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use serde_json::Value;

use crate::error::JourneyError;

/// Creates and mutates users on the journey's behalf (`create_user`,
/// `update_user`, `link_account`, `password_reset` steps). Distinct from
/// `r2e_oidc::UserDirectory`, which is read/verify-only — provisioning is a
/// journey-side concern, not a token-issuance-side one.
#[async_trait]
pub trait UserProvisioningService: Send + Sync {
    async fn create_user(&self, tenant_id: &str, username: &str, attributes: &Claims) -> Result<String, JourneyError>;
    async fn update_user(&self, tenant_id: &str, subject_id: &str, attributes: &Claims) -> Result<(), JourneyError>;
    async fn link_account(
        &self,
        tenant_id: &str,
        subject_id: &str,
        idp: &str,
        external_subject: &str,
    ) -> Result<(), JourneyError>;
    async fn set_password(&self, tenant_id: &str, subject_id: &str, new_password: &str) -> Result<(), JourneyError>;
    async fn find_by_username(&self, tenant_id: &str, username: &str) -> Option<String>;
}

/// The claims an external IdP callback resolved, plus whether this identity
/// has been seen before (drives `external_idp`'s auto-provisioning).
#[derive(Clone, Debug)]
pub struct ExternalIdentity {
    pub external_subject: String,
    pub claims: Claims,
}

/// `external_idp` step: begins an OAuth/OIDC challenge against a configured
/// provider and maps the callback's claims.
#[async_trait]
pub trait ExternalIdpService: Send + Sync {
    async fn begin_authorization(
        &self,
        tenant_id: &str,
        idp: &str,
        state_token: &str,
        redirect_uri: &str,
    ) -> Result<String, JourneyError>;

    async fn resolve_callback(
        &self,
        tenant_id: &str,
        idp: &str,
        callback_params: &std::collections::HashMap<String, String>,
    ) -> Result<ExternalIdentity, JourneyError>;
}

/// `fido2_login` / `fido2_register` steps. A real deployment bridges this to
/// whatever WebAuthn library it chooses; this crate only defines the
/// contract (per the Non-goals' "SAML/SCIM/LDAP/FIDO2 add-ons").
#[async_trait]
pub trait Fido2Service: Send + Sync {
    async fn begin_registration(&self, tenant_id: &str, subject_id: &str) -> Result<Value, JourneyError>;
    async fn finish_registration(&self, tenant_id: &str, subject_id: &str, response: &Value) -> Result<(), JourneyError>;
    async fn begin_authentication(&self, tenant_id: &str, subject_id: &str) -> Result<Value, JourneyError>;
    async fn finish_authentication(&self, tenant_id: &str, subject_id: &str, response: &Value) -> Result<bool, JourneyError>;
}

/// SMS/email delivery for `mfa`, `passwordless_*`, and `password_reset`
/// steps (Non-goals: "SMS/email gateways").
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, tenant_id: &str, to: &str, template: &str, context: &Value) -> Result<(), JourneyError>;
    async fn send_sms(&self, tenant_id: &str, to: &str, template: &str, context: &Value) -> Result<(), JourneyError>;
}

/// `captcha` step: calls out to a provider and enforces a score threshold.
#[async_trait]
pub trait CaptchaProvider: Send + Sync {
    /// Returns a score in `[0.0, 1.0]`; the step compares against its
    /// configured threshold.
    async fn verify(&self, tenant_id: &str, token: &str, remote_ip: Option<&str>) -> Result<f64, JourneyError>;
}

/// Outcome a `custom_plugin` hands back (§4.4's table: "plugin returns
/// {Continue | Complete | RequireInput | Branch | Fail}").
#[derive(Clone, Debug)]
pub enum PluginOutcome {
    Continue(Claims),
    Complete(Claims),
    RequireInput { view: String, model: Value },
    Branch { target_step_id: String, output: Claims },
    Fail { code: String, description: String },
}

/// `custom_plugin` step: invokes a managed or WASM plugin by reference.
#[async_trait]
pub trait PluginExecutor: Send + Sync {
    async fn run(
        &self,
        tenant_id: &str,
        plugin_ref: &str,
        data: &Claims,
        input: &std::collections::HashMap<String, String>,
        config: &Value,
    ) -> Result<PluginOutcome, JourneyError>;
}

/// Every tenant-scoped capability a step handler can reach through
/// [`crate::context::StepExecutionContext`], bundled so the executor only
/// threads one value through (§9: "pass [state] explicitly through the
/// construction phase").
pub struct TenantServices {
    pub oidc: std::sync::Arc<r2e_oidc::AppState>,
    pub users: std::sync::Arc<dyn UserProvisioningService>,
    pub external_idp: std::sync::Arc<dyn ExternalIdpService>,
    pub fido2: std::sync::Arc<dyn Fido2Service>,
    pub notifier: std::sync::Arc<dyn Notifier>,
    pub plugins: std::sync::Arc<dyn PluginExecutor>,
    pub captcha: std::sync::Arc<dyn CaptchaProvider>,
    pub events: r2e_events::EventBus,
    pub http: reqwest::Client,
}
