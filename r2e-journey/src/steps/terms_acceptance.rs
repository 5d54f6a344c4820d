//! `terms_acceptance`: conditionally suspends — only when the authenticated
//! user has not already accepted the configured version.

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use serde::Deserialize;
use serde_json::json;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

const ACCEPTED_VERSION_PROPERTY: &str = "terms_accepted_version";

#[derive(Deserialize)]
struct TermsConfig {
    version: String,
}

pub struct TermsAcceptanceStep;

#[async_trait]
impl StepHandler for TermsAcceptanceStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let Ok(config) = serde_json::from_value::<TermsConfig>(ctx.config().clone()) else {
            return StepHandlerResult::fail("invalid_config", "terms_acceptance step is missing a version");
        };

        if let Some(subject_id) = ctx.user_id().map(str::to_string) {
            if let Some(user) = ctx.services.oidc.users.find_by_subject(ctx.tenant_id(), &subject_id).await {
                if user.custom_properties.get(ACCEPTED_VERSION_PROPERTY).and_then(|v| v.as_str()) == Some(config.version.as_str()) {
                    return StepHandlerResult::Skip;
                }
            }
        }

        match ctx.input().get("accept").map(String::as_str) {
            Some("true") => {
                if let Some(subject_id) = ctx.user_id().map(str::to_string) {
                    let mut attributes = Claims::new();
                    attributes.insert(ACCEPTED_VERSION_PROPERTY.to_string(), json!(config.version));
                    if let Err(err) = ctx.services.users.update_user(ctx.tenant_id(), &subject_id, &attributes).await {
                        return StepHandlerResult::fail("terms_persist_failed", err.to_string());
                    }
                }
                let mut output = Claims::new();
                output.insert(ACCEPTED_VERSION_PROPERTY.to_string(), json!(config.version));
                StepHandlerResult::Success(output)
            }
            Some("false") => StepHandlerResult::fail("terms_declined", "the user declined the terms of service"),
            _ => StepHandlerResult::ShowUi {
                view: "terms_acceptance".to_string(),
                model: json!({ "step_id": ctx.step.id, "version": config.version }),
            },
        }
    }
}
