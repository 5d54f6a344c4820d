//! `condition` / `branch`: pure data steps, never suspend.

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use serde::Deserialize;

use crate::conditions;
use crate::context::StepExecutionContext;
use crate::policy::{ConditionClause, ConditionCombinator};
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

#[derive(Deserialize, Default)]
struct ConditionConfig {
    #[serde(default)]
    rules: Vec<ConditionClause>,
    #[serde(default)]
    combinator: ConditionCombinator,
}

/// Evaluates `config.rules`, then follows `branches["true"]`/`branches["false"]`
/// if present, otherwise falls through to the next sequential step.
pub struct ConditionStep;

#[async_trait]
impl StepHandler for ConditionStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: ConditionConfig = serde_json::from_value(ctx.config().clone()).unwrap_or_default();
        let result = conditions::evaluate_clauses(ctx, &config.rules, config.combinator).await;
        let label = if result { "true" } else { "false" };

        let mut output = Claims::new();
        output.insert("condition_result".to_string(), serde_json::json!(result));

        match ctx.step.branches.get(label) {
            Some(target) => StepHandlerResult::Branch {
                target_step_id: target.clone(),
                output,
            },
            None => StepHandlerResult::Success(output),
        }
    }
}

#[derive(Deserialize)]
struct BranchCase {
    #[serde(default)]
    rules: Vec<ConditionClause>,
    #[serde(default)]
    combinator: ConditionCombinator,
    target_step_id: String,
}

#[derive(Deserialize, Default)]
struct BranchConfig {
    #[serde(default)]
    cases: Vec<BranchCase>,
    #[serde(default)]
    default_target_step_id: Option<String>,
}

/// A priority-ordered multi-way switch: the first matching case wins.
pub struct BranchStep;

#[async_trait]
impl StepHandler for BranchStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: BranchConfig = serde_json::from_value(ctx.config().clone()).unwrap_or_default();

        for case in &config.cases {
            if conditions::evaluate_clauses(ctx, &case.rules, case.combinator).await {
                return StepHandlerResult::Branch {
                    target_step_id: case.target_step_id.clone(),
                    output: Claims::new(),
                };
            }
        }

        match config.default_target_step_id {
            Some(target) => StepHandlerResult::Branch {
                target_step_id: target,
                output: Claims::new(),
            },
            None => StepHandlerResult::fail("branch_no_match", "no branch case matched and no default was configured"),
        }
    }
}
