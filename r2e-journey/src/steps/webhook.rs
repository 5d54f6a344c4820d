//! `webhook`: a synchronous outbound notification, distinct from the
//! r2e-webhooks crate's durable, retrying event sinks — this fires once,
//! inline, as part of advancing the journey.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use r2e_oidc::domain::Claims;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

#[derive(Deserialize)]
struct WebhookConfig {
    url: String,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    continue_on_error: bool,
}

pub struct WebhookStep;

#[async_trait]
impl StepHandler for WebhookStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: WebhookConfig = match serde_json::from_value(ctx.config().clone()) {
            Ok(c) => c,
            Err(err) => return StepHandlerResult::fail("invalid_config", err.to_string()),
        };

        let payload = json!({
            "journey_id": ctx.state.journey_id,
            "step_id": ctx.step.id,
            "tenant_id": ctx.tenant_id(),
            "data": ctx.data(),
        });
        let body = payload.to_string();

        let mut request = ctx.services.http.post(&config.url).body(body.clone());
        if let Some(secret) = &config.secret {
            if let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
                mac.update(body.as_bytes());
                let signature = hex::encode(mac.finalize().into_bytes());
                request = request.header("X-Webhook-Signature", signature);
            }
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => StepHandlerResult::Success(Claims::new()),
            Ok(response) if config.continue_on_error => {
                tracing::warn!(status = %response.status(), url = %config.url, "webhook step received a non-2xx response, continuing");
                StepHandlerResult::Skip
            }
            Ok(response) => StepHandlerResult::fail("webhook_failed", format!("webhook returned status {}", response.status())),
            Err(err) if config.continue_on_error => {
                tracing::warn!(error = %err, url = %config.url, "webhook step failed, continuing");
                StepHandlerResult::Skip
            }
            Err(err) => StepHandlerResult::fail("webhook_failed", err.to_string()),
        }
    }
}
