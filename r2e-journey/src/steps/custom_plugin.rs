//! `custom_plugin`: delegates entirely to a tenant-registered
//! [`crate::services::PluginExecutor`] (WASM or managed code, per the
//! Non-goals' "custom plugin runtimes" capability boundary).

use async_trait::async_trait;
use serde_json::json;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;
use crate::services::PluginOutcome;

#[derive(serde::Deserialize)]
struct CustomPluginConfig {
    plugin_ref: String,
}

pub struct CustomPluginStep;

#[async_trait]
impl StepHandler for CustomPluginStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let Ok(config) = serde_json::from_value::<CustomPluginConfig>(ctx.config().clone()) else {
            return StepHandlerResult::fail("invalid_config", "custom_plugin step is missing plugin_ref");
        };

        let outcome = ctx
            .services
            .plugins
            .run(ctx.tenant_id(), &config.plugin_ref, ctx.data(), ctx.input(), ctx.config())
            .await;

        match outcome {
            Ok(PluginOutcome::Continue(output)) => StepHandlerResult::Success(output),
            Ok(PluginOutcome::Complete(mut output)) => {
                output.insert("_plugin_outcome".to_string(), json!("complete"));
                StepHandlerResult::Success(output)
            }
            Ok(PluginOutcome::RequireInput { view, model }) => StepHandlerResult::ShowUi { view, model },
            Ok(PluginOutcome::Branch { target_step_id, output }) => StepHandlerResult::Branch { target_step_id, output },
            Ok(PluginOutcome::Fail { code, description }) => StepHandlerResult::Fail { code, description },
            Err(err) => StepHandlerResult::fail("plugin_error", err.to_string()),
        }
    }
}
