//! `transform`: reshapes claims already collected earlier in the journey.
//! Never suspends.

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum TransformOp {
    #[default]
    Copy,
    Upper,
    Lower,
    Hash,
    Split,
    Join,
    Regex,
    Template,
}

#[derive(Deserialize)]
struct Mapping {
    from: String,
    to: String,
    #[serde(default)]
    op: TransformOp,
    #[serde(default)]
    arg: Option<Value>,
}

#[derive(Deserialize, Default)]
struct TransformConfig {
    #[serde(default)]
    mappings: Vec<Mapping>,
}

fn source_value(ctx: &StepExecutionContext<'_>, name: &str) -> Option<Value> {
    ctx.data()
        .get(name)
        .cloned()
        .or_else(|| ctx.input().get(name).cloned().map(Value::String))
}

fn apply(op: TransformOp, value: Value, arg: Option<&Value>) -> Option<Value> {
    match op {
        TransformOp::Copy => Some(value),
        TransformOp::Upper => value.as_str().map(|s| Value::String(s.to_uppercase())),
        TransformOp::Lower => value.as_str().map(|s| Value::String(s.to_lowercase())),
        TransformOp::Hash => value.as_str().map(|s| {
            let digest = Sha256::digest(s.as_bytes());
            Value::String(hex::encode(digest))
        }),
        TransformOp::Split => {
            let sep = arg.and_then(Value::as_str).unwrap_or(",");
            value
                .as_str()
                .map(|s| Value::Array(s.split(sep).map(|part| Value::String(part.to_string())).collect()))
        }
        TransformOp::Join => {
            let sep = arg.and_then(Value::as_str).unwrap_or(",");
            value.as_array().map(|items| {
                let joined = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join(sep);
                Value::String(joined)
            })
        }
        TransformOp::Regex => {
            let spec = arg?.as_object()?;
            let pattern = spec.get("pattern")?.as_str()?;
            let replacement = spec.get("replacement").and_then(Value::as_str).unwrap_or("");
            let source = value.as_str()?;
            let re = Regex::new(pattern).ok()?;
            Some(Value::String(re.replace_all(source, replacement).into_owned()))
        }
        TransformOp::Template => {
            let template = arg?.as_str()?;
            let rendered = value
                .as_str()
                .map(|s| template.replace("{value}", s))
                .unwrap_or_else(|| template.replace("{value}", &value.to_string()));
            Some(Value::String(rendered))
        }
    }
}

pub struct TransformStep;

#[async_trait]
impl StepHandler for TransformStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: TransformConfig = serde_json::from_value(ctx.config().clone()).unwrap_or_default();
        let mut output = Claims::new();

        for mapping in &config.mappings {
            let Some(value) = source_value(ctx, &mapping.from) else {
                continue;
            };
            if let Some(transformed) = apply(mapping.op, value, mapping.arg.as_ref()) {
                output.insert(mapping.to.clone(), transformed);
            }
        }

        StepHandlerResult::Success(output)
    }
}
