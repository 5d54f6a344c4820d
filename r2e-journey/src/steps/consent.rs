//! `consent`: the scope-grant screen. The authorize flow's own inline
//! consent page (§4.1 step 5) and this step share the same "allow"/"deny"
//! form contract so a tenant can move consent into a policy without
//! changing its UI.

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use serde::Deserialize;
use serde_json::json;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

#[derive(Deserialize, Default)]
struct ConsentConfig {
    #[serde(default)]
    scopes: Vec<String>,
}

pub struct ConsentStep;

#[async_trait]
impl StepHandler for ConsentStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: ConsentConfig = serde_json::from_value(ctx.config().clone()).unwrap_or_default();
        let requested_scopes = ctx
            .data()
            .get("requested_scopes")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>())
            .unwrap_or(config.scopes);

        match ctx.input().get("consent").map(String::as_str) {
            Some("allow") => {
                let mut output = Claims::new();
                output.insert("consent_given".to_string(), json!(true));
                StepHandlerResult::Success(output)
            }
            Some("deny") => StepHandlerResult::fail("access_denied", "the user denied the requested scopes"),
            _ => StepHandlerResult::ShowUi {
                view: "consent".to_string(),
                model: json!({ "step_id": ctx.step.id, "scopes": requested_scopes }),
            },
        }
    }
}
