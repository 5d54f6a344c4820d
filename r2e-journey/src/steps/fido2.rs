//! `fido2_login` / `fido2_register`: thin wrappers over a tenant-supplied
//! [`crate::services::Fido2Service`] — this crate only owns the
//! challenge/response suspend-resume cycle, not the WebAuthn ceremony
//! itself (Non-goals: "FIDO2 add-ons").

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use serde_json::{json, Value};

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

fn parse_response(ctx: &StepExecutionContext<'_>) -> Option<Result<Value, StepHandlerResult>> {
    ctx.input().get("fido2_response").map(|raw| {
        serde_json::from_str(raw).map_err(|_| StepHandlerResult::fail("invalid_fido2_response", "malformed assertion"))
    })
}

pub struct Fido2LoginStep;

#[async_trait]
impl StepHandler for Fido2LoginStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let Some(subject_id) = ctx.user_id().map(str::to_string) else {
            return StepHandlerResult::fail("not_authenticated", "fido2_login requires a candidate identity to verify");
        };

        match parse_response(ctx) {
            None => match ctx.services.fido2.begin_authentication(ctx.tenant_id(), &subject_id).await {
                Ok(challenge) => StepHandlerResult::ShowUi {
                    view: "fido2_login".to_string(),
                    model: json!({ "step_id": ctx.step.id, "challenge": challenge }),
                },
                Err(err) => StepHandlerResult::fail("fido2_error", err.to_string()),
            },
            Some(Err(err)) => err,
            Some(Ok(response)) => match ctx.services.fido2.finish_authentication(ctx.tenant_id(), &subject_id, &response).await {
                Ok(true) => {
                    ctx.set_authenticated(subject_id, "fido2");
                    StepHandlerResult::success()
                }
                Ok(false) => StepHandlerResult::fail("fido2_verification_failed", "assertion did not verify"),
                Err(err) => StepHandlerResult::fail("fido2_error", err.to_string()),
            },
        }
    }
}

pub struct Fido2RegisterStep;

#[async_trait]
impl StepHandler for Fido2RegisterStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let Some(subject_id) = ctx.user_id().map(str::to_string) else {
            return StepHandlerResult::fail("not_authenticated", "fido2_register requires an established identity");
        };

        match parse_response(ctx) {
            None => match ctx.services.fido2.begin_registration(ctx.tenant_id(), &subject_id).await {
                Ok(challenge) => StepHandlerResult::ShowUi {
                    view: "fido2_register".to_string(),
                    model: json!({ "step_id": ctx.step.id, "challenge": challenge }),
                },
                Err(err) => StepHandlerResult::fail("fido2_error", err.to_string()),
            },
            Some(Err(err)) => err,
            Some(Ok(response)) => match ctx.services.fido2.finish_registration(ctx.tenant_id(), &subject_id, &response).await {
                Ok(()) => StepHandlerResult::Success(Claims::new()),
                Err(err) => StepHandlerResult::fail("fido2_error", err.to_string()),
            },
        }
    }
}
