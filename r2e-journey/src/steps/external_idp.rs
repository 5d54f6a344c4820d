//! `external_idp`: redirects to a tenant-configured external OAuth/OIDC
//! provider and, on callback, maps the returned claims onto a local subject
//! — optionally auto-provisioning one (§4.4's table: "Initiates OAuth
//! challenge, on callback maps claims, optionally auto-provisions user").
//! The provider integration itself is a capability boundary
//! ([`crate::services::ExternalIdpService`]); this step only owns the
//! suspend/resume cycle around it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

#[derive(Deserialize)]
struct ExternalIdpConfig {
    idp: String,
    #[serde(default)]
    auto_provision: bool,
}

pub struct ExternalIdpStep;

#[async_trait]
impl StepHandler for ExternalIdpStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: ExternalIdpConfig = match serde_json::from_value(ctx.config().clone()) {
            Ok(c) => c,
            Err(err) => return StepHandlerResult::fail("invalid_config", err.to_string()),
        };

        if ctx.input().is_empty() {
            let redirect_uri = format!(
                "{}/{}/journey/{}/callback",
                ctx.services.oidc.config.issuer_base,
                ctx.tenant_id(),
                ctx.state.journey_id
            );
            return match ctx
                .services
                .external_idp
                .begin_authorization(ctx.tenant_id(), &config.idp, &ctx.state.journey_id, &redirect_uri)
                .await
            {
                Ok(url) => StepHandlerResult::Redirect(url),
                Err(err) => StepHandlerResult::fail("external_idp_error", err.to_string()),
            };
        }

        let identity = match ctx
            .services
            .external_idp
            .resolve_callback(ctx.tenant_id(), &config.idp, ctx.input())
            .await
        {
            Ok(identity) => identity,
            Err(err) => return StepHandlerResult::fail("external_idp_error", err.to_string()),
        };

        let subject_id = match ctx
            .services
            .users
            .find_by_username(ctx.tenant_id(), &identity.external_subject)
            .await
        {
            Some(subject_id) => subject_id,
            None if config.auto_provision => {
                let created = ctx
                    .services
                    .users
                    .create_user(ctx.tenant_id(), &identity.external_subject, &identity.claims)
                    .await;
                match created {
                    Ok(subject_id) => {
                        if let Err(err) = ctx
                            .services
                            .users
                            .link_account(ctx.tenant_id(), &subject_id, &config.idp, &identity.external_subject)
                            .await
                        {
                            return StepHandlerResult::fail("account_link_failed", err.to_string());
                        }
                        subject_id
                    }
                    Err(err) => return StepHandlerResult::fail("provisioning_failed", err.to_string()),
                }
            }
            None => {
                return StepHandlerResult::fail(
                    "account_not_linked",
                    "no local account is linked to this external identity",
                )
            }
        };

        ctx.set_authenticated(subject_id, format!("idp:{}", config.idp));
        let mut output = identity.claims;
        output.insert("idp".to_string(), json!(config.idp));
        StepHandlerResult::Success(output)
    }
}
