//! Default implementations of the tenant-scoped capability traits
//! `r2e-journey` defines as integration boundaries. `InMemoryProvisioning`
//! is a genuine working default backed by the same user directory the
//! authorize endpoint reads from; the rest are "not configured" stubs a
//! real deployment replaces with its own FIDO2/SMS/CAPTCHA/plugin
//! integrations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use r2e_journey::error::JourneyError;
use r2e_journey::services::{CaptchaProvider, ExternalIdentity, ExternalIdpService, Fido2Service, Notifier, PluginExecutor, PluginOutcome, UserProvisioningService};
use r2e_oidc::domain::{Claims, User};
use r2e_oidc::state::{hash_password, InMemoryUserDirectory};
use r2e_oidc::UserDirectory;
use serde_json::Value;

/// Provisions users into the same in-memory directory `AppState::users`
/// reads from, so `create_user`/`update_user` steps actually take effect.
pub struct InMemoryProvisioning {
    directory: Arc<InMemoryUserDirectory>,
}

impl InMemoryProvisioning {
    pub fn new(directory: Arc<InMemoryUserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl UserProvisioningService for InMemoryProvisioning {
    async fn create_user(&self, tenant_id: &str, username: &str, attributes: &Claims) -> Result<String, JourneyError> {
        if self.directory.find_by_username(tenant_id, username).await.is_some() {
            return Err(JourneyError::OutboundCall(format!("username '{username}' is already registered")));
        }

        let subject_id = uuid::Uuid::new_v4().to_string();
        let password_hash = attributes.get("password").and_then(Value::as_str).map(hash_password);
        let user = User {
            tenant_id: tenant_id.to_string(),
            subject_id: subject_id.clone(),
            username: username.to_string(),
            email: attributes.get("email").and_then(Value::as_str).map(str::to_string),
            phone: attributes.get("phone").and_then(Value::as_str).map(str::to_string),
            password_hash,
            email_verified: false,
            active: true,
            roles: Default::default(),
            custom_properties: attributes.clone(),
        };
        self.directory.insert(user);
        Ok(subject_id)
    }

    async fn update_user(&self, tenant_id: &str, subject_id: &str, attributes: &Claims) -> Result<(), JourneyError> {
        let Some(mut user) = self.directory.find_by_subject(tenant_id, subject_id).await else {
            return Err(JourneyError::OutboundCall(format!("unknown user '{subject_id}'")));
        };
        if let Some(email) = attributes.get("email").and_then(Value::as_str) {
            user.email = Some(email.to_string());
        }
        if let Some(phone) = attributes.get("phone").and_then(Value::as_str) {
            user.phone = Some(phone.to_string());
        }
        user.custom_properties.extend(attributes.clone());
        self.directory.insert(user);
        Ok(())
    }

    async fn link_account(&self, tenant_id: &str, subject_id: &str, idp: &str, external_subject: &str) -> Result<(), JourneyError> {
        let Some(mut user) = self.directory.find_by_subject(tenant_id, subject_id).await else {
            return Err(JourneyError::OutboundCall(format!("unknown user '{subject_id}'")));
        };
        user.custom_properties
            .insert(format!("linked_idp:{idp}"), Value::String(external_subject.to_string()));
        self.directory.insert(user);
        Ok(())
    }

    async fn set_password(&self, tenant_id: &str, subject_id: &str, new_password: &str) -> Result<(), JourneyError> {
        let Some(mut user) = self.directory.find_by_subject(tenant_id, subject_id).await else {
            return Err(JourneyError::OutboundCall(format!("unknown user '{subject_id}'")));
        };
        user.password_hash = Some(hash_password(new_password));
        self.directory.insert(user);
        Ok(())
    }

    async fn find_by_username(&self, tenant_id: &str, username: &str) -> Option<String> {
        self.directory.find_by_username(tenant_id, username).await.map(|u| u.subject_id)
    }
}

/// Logs instead of delivering. Good enough to watch MFA/passwordless codes
/// during local development; a real deployment supplies its own SMS/email
/// gateway integration (Non-goals: "SMS/email gateways").
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_email(&self, tenant_id: &str, to: &str, template: &str, context: &Value) -> Result<(), JourneyError> {
        tracing::info!(tenant_id, to, template, %context, "email notification (no gateway configured)");
        Ok(())
    }

    async fn send_sms(&self, tenant_id: &str, to: &str, template: &str, context: &Value) -> Result<(), JourneyError> {
        tracing::info!(tenant_id, to, template, %context, "sms notification (no gateway configured)");
        Ok(())
    }
}

macro_rules! unconfigured {
    ($name:ident: $what:expr) => {
        pub struct $name;

        impl $name {
            fn error() -> JourneyError {
                JourneyError::OutboundCall(format!("{} is not configured for this deployment", $what))
            }
        }
    };
}

unconfigured!(UnconfiguredExternalIdp: "external identity provider federation");

#[async_trait]
impl ExternalIdpService for UnconfiguredExternalIdp {
    async fn begin_authorization(&self, _tenant_id: &str, _idp: &str, _state_token: &str, _redirect_uri: &str) -> Result<String, JourneyError> {
        Err(Self::error())
    }

    async fn resolve_callback(&self, _tenant_id: &str, _idp: &str, _callback_params: &HashMap<String, String>) -> Result<ExternalIdentity, JourneyError> {
        Err(Self::error())
    }
}

unconfigured!(UnconfiguredFido2: "FIDO2/WebAuthn");

#[async_trait]
impl Fido2Service for UnconfiguredFido2 {
    async fn begin_registration(&self, _tenant_id: &str, _subject_id: &str) -> Result<Value, JourneyError> {
        Err(Self::error())
    }

    async fn finish_registration(&self, _tenant_id: &str, _subject_id: &str, _response: &Value) -> Result<(), JourneyError> {
        Err(Self::error())
    }

    async fn begin_authentication(&self, _tenant_id: &str, _subject_id: &str) -> Result<Value, JourneyError> {
        Err(Self::error())
    }

    async fn finish_authentication(&self, _tenant_id: &str, _subject_id: &str, _response: &Value) -> Result<bool, JourneyError> {
        Err(Self::error())
    }
}

unconfigured!(UnconfiguredCaptcha: "CAPTCHA verification");

#[async_trait]
impl CaptchaProvider for UnconfiguredCaptcha {
    async fn verify(&self, _tenant_id: &str, _token: &str, _remote_ip: Option<&str>) -> Result<f64, JourneyError> {
        Err(Self::error())
    }
}

unconfigured!(UnconfiguredPlugins: "custom plugin execution");

#[async_trait]
impl PluginExecutor for UnconfiguredPlugins {
    async fn run(&self, _tenant_id: &str, _plugin_ref: &str, _data: &Claims, _input: &HashMap<String, String>, _config: &Value) -> Result<PluginOutcome, JourneyError> {
        Err(Self::error())
    }
}
