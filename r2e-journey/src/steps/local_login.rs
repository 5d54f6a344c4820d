//! `local_login` / `composite_login`: the username+password surface, plus a
//! composite variant that tries each configured credential type in turn.

use async_trait::async_trait;
use r2e_webhooks::DomainEvent;
use serde::Deserialize;
use serde_json::json;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

async fn raise_auth_event(ctx: &StepExecutionContext<'_>, event_type: &str, identifier: &str) {
    ctx.services
        .events
        .emit(DomainEvent {
            tenant_id: ctx.tenant_id().to_string(),
            event_type: event_type.to_string(),
            data: json!({ "identifier": identifier, "client_id": ctx.state.client_id }),
            metadata: json!({ "correlation_id": ctx.state.correlation_id }),
        })
        .await;
}

async fn verify_password_login(ctx: &mut StepExecutionContext<'_>) -> Option<StepHandlerResult> {
    let username = ctx.input().get("username").cloned()?;
    let password = ctx.input().get("password").cloned()?;

    if !ctx
        .services
        .oidc
        .users
        .verify_password(ctx.tenant_id(), &username, &password)
        .await
    {
        raise_auth_event(ctx, "user.sign_in_failed", &username).await;
        return Some(StepHandlerResult::ShowUi {
            view: "local_login".to_string(),
            model: json!({ "step_id": ctx.step.id, "error": "invalid_credentials" }),
        });
    }

    let Some(user) = ctx.services.oidc.users.find_by_username(ctx.tenant_id(), &username).await else {
        raise_auth_event(ctx, "user.sign_in_failed", &username).await;
        return Some(StepHandlerResult::fail("invalid_credentials", "unknown user"));
    };
    if !user.active {
        raise_auth_event(ctx, "user.locked_out", &username).await;
        return Some(StepHandlerResult::fail("account_disabled", "user account is not active"));
    }

    raise_auth_event(ctx, "user.signed_in", &username).await;
    ctx.set_authenticated(user.subject_id, "pwd");
    Some(StepHandlerResult::success())
}

pub struct LocalLoginStep;

#[async_trait]
impl StepHandler for LocalLoginStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        match verify_password_login(ctx).await {
            Some(result) => result,
            None => StepHandlerResult::ShowUi {
                view: "local_login".to_string(),
                model: json!({ "step_id": ctx.step.id }),
            },
        }
    }
}

#[derive(Deserialize, Default)]
struct CompositeLoginConfig {
    #[serde(default)]
    credential_types: Vec<String>,
}

/// Offers several credential types on one screen (§3's `composite_login`
/// step). Each turn, the posted input names which credential type it is
/// answering for via `credential_type`; an empty turn renders the chooser.
pub struct CompositeLoginStep;

#[async_trait]
impl StepHandler for CompositeLoginStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: CompositeLoginConfig = serde_json::from_value(ctx.config().clone()).unwrap_or_default();
        let credential_types = if config.credential_types.is_empty() {
            vec!["password".to_string()]
        } else {
            config.credential_types.clone()
        };

        let Some(chosen) = ctx.input().get("credential_type").cloned() else {
            return StepHandlerResult::ShowUi {
                view: "composite_login".to_string(),
                model: json!({ "step_id": ctx.step.id, "credential_types": credential_types }),
            };
        };

        if !credential_types.iter().any(|c| c == &chosen) {
            return StepHandlerResult::fail("invalid_credential_type", "requested credential type is not offered here");
        }

        match chosen.as_str() {
            "password" => match verify_password_login(ctx).await {
                Some(result) => result,
                None => StepHandlerResult::ShowUi {
                    view: "composite_login".to_string(),
                    model: json!({ "step_id": ctx.step.id, "credential_types": credential_types, "credential_type": "password" }),
                },
            },
            "fido2" => {
                let Some(response) = ctx.input().get("fido2_response").cloned() else {
                    let challenge = ctx
                        .services
                        .fido2
                        .begin_authentication(ctx.tenant_id(), ctx.user_id().unwrap_or(""))
                        .await;
                    return match challenge {
                        Ok(challenge) => StepHandlerResult::ShowUi {
                            view: "composite_login".to_string(),
                            model: json!({ "step_id": ctx.step.id, "credential_type": "fido2", "challenge": challenge }),
                        },
                        Err(err) => StepHandlerResult::fail("fido2_error", err.to_string()),
                    };
                };
                let response: serde_json::Value = match serde_json::from_str(&response) {
                    Ok(v) => v,
                    Err(_) => return StepHandlerResult::fail("invalid_fido2_response", "malformed assertion"),
                };
                match ctx
                    .services
                    .fido2
                    .finish_authentication(ctx.tenant_id(), ctx.user_id().unwrap_or(""), &response)
                    .await
                {
                    Ok(true) => {
                        let subject = ctx.user_id().map(str::to_string);
                        if let Some(subject) = subject {
                            raise_auth_event(ctx, "user.signed_in", &subject).await;
                            ctx.set_authenticated(subject, "fido2");
                        }
                        StepHandlerResult::success()
                    }
                    Ok(false) => {
                        let subject = ctx.user_id().unwrap_or("").to_string();
                        raise_auth_event(ctx, "user.sign_in_failed", &subject).await;
                        StepHandlerResult::fail("fido2_verification_failed", "assertion did not verify")
                    }
                    Err(err) => StepHandlerResult::fail("fido2_error", err.to_string()),
                }
            }
            other => StepHandlerResult::fail("unsupported_credential_type", format!("no handler for '{other}'")),
        }
    }
}
