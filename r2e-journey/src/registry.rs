//! Step handler registry (§9: "replace runtime reflection with an explicit
//! registration API that maps a string key to a capability value"),
//! mirroring `r2e_oidc::grants::GrantRegistry` — an immutable-once-built map
//! from step type to handler, with extension types as first-class
//! constructor inputs.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::context::StepExecutionContext;
use crate::policy::StepType;
use crate::result::StepHandlerResult;
use crate::steps;

/// The executor for a single step type (GLOSSARY: "Step handler").
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult;
}

pub struct StepRegistry {
    handlers: HashMap<StepType, Box<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, step_type: StepType, handler: Box<dyn StepHandler>) -> Self {
        self.handlers.insert(step_type, handler);
        self
    }

    /// Registers every built-in step type in §3's Journey Policy table.
    pub fn with_builtins() -> Self {
        use StepType::*;
        Self::new()
            .register(LocalLogin, Box::new(steps::local_login::LocalLoginStep))
            .register(CompositeLogin, Box::new(steps::local_login::CompositeLoginStep))
            .register(ExternalIdp, Box::new(steps::external_idp::ExternalIdpStep))
            .register(Mfa, Box::new(steps::mfa::MfaStep))
            .register(Consent, Box::new(steps::consent::ConsentStep))
            .register(ClaimsCollection, Box::new(steps::claims_collection::ClaimsCollectionStep))
            .register(DynamicForm, Box::new(steps::claims_collection::ClaimsCollectionStep))
            .register(TermsAcceptance, Box::new(steps::terms_acceptance::TermsAcceptanceStep))
            .register(PasswordReset, Box::new(steps::password_reset::PasswordResetStep))
            .register(CreateUser, Box::new(steps::user_mgmt::CreateUserStep))
            .register(UpdateUser, Box::new(steps::user_mgmt::UpdateUserStep))
            .register(LinkAccount, Box::new(steps::user_mgmt::LinkAccountStep))
            .register(Condition, Box::new(steps::condition::ConditionStep))
            .register(Branch, Box::new(steps::condition::BranchStep))
            .register(Transform, Box::new(steps::transform::TransformStep))
            .register(ApiCall, Box::new(steps::api_call::ApiCallStep))
            .register(Webhook, Box::new(steps::webhook::WebhookStep))
            .register(CustomPlugin, Box::new(steps::custom_plugin::CustomPluginStep))
            .register(Fido2Login, Box::new(steps::fido2::Fido2LoginStep))
            .register(Fido2Register, Box::new(steps::fido2::Fido2RegisterStep))
            .register(PasswordlessEmail, Box::new(steps::passwordless::PasswordlessEmailStep))
            .register(PasswordlessSms, Box::new(steps::passwordless::PasswordlessSmsStep))
            .register(Captcha, Box::new(steps::captcha::CaptchaStep))
    }

    pub fn get(&self, step_type: StepType) -> Option<&dyn StepHandler> {
        self.handlers.get(&step_type).map(|b| b.as_ref())
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
