//! `create_user` / `update_user` / `link_account`: provisioning steps that
//! never suspend — they act on claims already gathered by earlier steps.

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use serde::Deserialize;
use serde_json::json;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

#[derive(Deserialize)]
struct CreateUserConfig {
    #[serde(default = "default_username_claim")]
    username_claim: String,
    #[serde(default)]
    attribute_claims: Vec<String>,
    #[serde(default = "default_true")]
    auto_authenticate: bool,
}

fn default_username_claim() -> String {
    "username".to_string()
}

fn default_true() -> bool {
    true
}

fn gather_attributes(ctx: &StepExecutionContext<'_>, claim_names: &[String]) -> Claims {
    let mut attributes = Claims::new();
    for name in claim_names {
        if let Some(value) = ctx.data().get(name) {
            attributes.insert(name.clone(), value.clone());
        }
    }
    attributes
}

pub struct CreateUserStep;

#[async_trait]
impl StepHandler for CreateUserStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: CreateUserConfig = match serde_json::from_value(ctx.config().clone()) {
            Ok(c) => c,
            Err(_) => CreateUserConfig {
                username_claim: default_username_claim(),
                attribute_claims: Vec::new(),
                auto_authenticate: true,
            },
        };

        let Some(username) = ctx.data().get(&config.username_claim).and_then(|v| v.as_str()).map(str::to_string) else {
            return StepHandlerResult::fail("missing_username", "no username claim available to create an account with");
        };

        let attributes = gather_attributes(ctx, &config.attribute_claims);
        let subject_id = match ctx.services.users.create_user(ctx.tenant_id(), &username, &attributes).await {
            Ok(id) => id,
            Err(err) => return StepHandlerResult::fail("create_user_failed", err.to_string()),
        };

        if config.auto_authenticate {
            ctx.set_authenticated(subject_id, "created");
        } else {
            ctx.set_user_id(subject_id);
        }

        StepHandlerResult::success()
    }
}

#[derive(Deserialize, Default)]
struct UpdateUserConfig {
    #[serde(default)]
    attribute_claims: Vec<String>,
}

pub struct UpdateUserStep;

#[async_trait]
impl StepHandler for UpdateUserStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: UpdateUserConfig = serde_json::from_value(ctx.config().clone()).unwrap_or_default();
        let Some(subject_id) = ctx.user_id().map(str::to_string) else {
            return StepHandlerResult::fail("not_authenticated", "update_user requires an established identity");
        };

        let attributes = gather_attributes(ctx, &config.attribute_claims);
        if let Err(err) = ctx.services.users.update_user(ctx.tenant_id(), &subject_id, &attributes).await {
            return StepHandlerResult::fail("update_user_failed", err.to_string());
        }

        StepHandlerResult::success()
    }
}

pub struct LinkAccountStep;

#[async_trait]
impl StepHandler for LinkAccountStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let Some(subject_id) = ctx.user_id().map(str::to_string) else {
            return StepHandlerResult::fail("not_authenticated", "link_account requires an established identity");
        };
        let Some(idp) = ctx.data().get("_external_idp").and_then(|v| v.as_str()).map(str::to_string) else {
            return StepHandlerResult::fail("missing_external_identity", "no external identity is pending to link");
        };
        let Some(external_subject) = ctx.data().get("_external_subject").and_then(|v| v.as_str()).map(str::to_string) else {
            return StepHandlerResult::fail("missing_external_identity", "no external identity is pending to link");
        };

        if let Err(err) = ctx.services.users.link_account(ctx.tenant_id(), &subject_id, &idp, &external_subject).await {
            return StepHandlerResult::fail("link_account_failed", err.to_string());
        }

        let mut output = Claims::new();
        output.insert("linked_idp".to_string(), json!(idp));
        StepHandlerResult::Success(output)
    }
}
