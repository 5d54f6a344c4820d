//! `captcha`: renders a provider widget, then verifies the returned token
//! against a configured score threshold (§4.4's table: "Calls CAPTCHA
//! provider, enforces score threshold"). The provider itself is a
//! capability boundary ([`crate::services::CaptchaProvider`]).

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use serde::Deserialize;
use serde_json::json;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

#[derive(Deserialize)]
struct CaptchaConfig {
    #[serde(default = "default_threshold")]
    min_score: f64,
    #[serde(default)]
    site_key: Option<String>,
}

fn default_threshold() -> f64 {
    0.5
}

pub struct CaptchaStep;

#[async_trait]
impl StepHandler for CaptchaStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: CaptchaConfig = serde_json::from_value(ctx.config().clone()).unwrap_or(CaptchaConfig {
            min_score: default_threshold(),
            site_key: None,
        });

        let Some(token) = ctx.input().get("captcha_token").cloned() else {
            return StepHandlerResult::ShowUi {
                view: "captcha".to_string(),
                model: json!({ "step_id": ctx.step.id, "site_key": config.site_key }),
            };
        };

        match ctx.services.captcha.verify(ctx.tenant_id(), &token, None).await {
            Ok(score) if score >= config.min_score => {
                let mut output = Claims::new();
                output.insert("captcha_score".to_string(), json!(score));
                StepHandlerResult::Success(output)
            }
            Ok(score) => {
                tracing::debug!(score, threshold = config.min_score, "captcha score below threshold");
                StepHandlerResult::fail("captcha_failed", "captcha verification score was too low")
            }
            Err(err) => StepHandlerResult::fail("captcha_error", err.to_string()),
        }
    }
}
