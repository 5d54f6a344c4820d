//! `api_call`: an outbound HTTP request with URL/body templating, retries,
//! and JSONPath-driven claim extraction. Never suspends.

use async_trait::async_trait;
use jsonpath_rust::JsonPathQuery;
use r2e_oidc::domain::Claims;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

#[derive(Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Deserialize)]
struct ApiCallConfig {
    #[serde(default = "default_method")]
    method: Method,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    retry_delay_ms: u64,
    #[serde(default)]
    output_mapping: HashMap<String, String>,
    #[serde(default)]
    expected_status: Vec<u16>,
}

fn default_method() -> Method {
    Method::Get
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn render_template(template: &str, data: &Claims) -> String {
    let mut rendered = template.to_string();
    for (key, value) in data.iter() {
        let token = format!("{{{key}}}");
        if rendered.contains(&token) {
            let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            rendered = rendered.replace(&token, &text);
        }
    }
    rendered
}

fn render_value(value: &Value, data: &Claims) -> Value {
    match value {
        Value::String(s) => Value::String(render_template(s, data)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, data)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), render_value(v, data))).collect()),
        other => other.clone(),
    }
}

pub struct ApiCallStep;

#[async_trait]
impl StepHandler for ApiCallStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: ApiCallConfig = match serde_json::from_value(ctx.config().clone()) {
            Ok(c) => c,
            Err(err) => return StepHandlerResult::fail("invalid_config", err.to_string()),
        };

        let url = render_template(&config.url, ctx.data());
        let body = config.body.as_ref().map(|b| render_value(b, ctx.data()));

        let mut last_error = None;
        let attempts = config.retries + 1;
        for attempt in 0..attempts {
            let mut builder = match config.method {
                Method::Get => ctx.services.http.get(&url),
                Method::Post => ctx.services.http.post(&url),
                Method::Put => ctx.services.http.put(&url),
                Method::Patch => ctx.services.http.patch(&url),
                Method::Delete => ctx.services.http.delete(&url),
            };
            builder = builder.timeout(Duration::from_millis(config.timeout_ms));
            for (name, value) in &config.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = &body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let expected_ok = if config.expected_status.is_empty() {
                        (200..300).contains(&status)
                    } else {
                        config.expected_status.contains(&status)
                    };

                    if !expected_ok {
                        if let Some(target) = ctx.step.branches.get(&status.to_string()) {
                            return StepHandlerResult::Branch {
                                target_step_id: target.clone(),
                                output: Claims::new(),
                            };
                        }
                        if ctx.step.optional {
                            return StepHandlerResult::Skip;
                        }
                        return StepHandlerResult::fail("api_call_failed", format!("unexpected status {status}"));
                    }

                    let output = match extract_output(response, &config.output_mapping).await {
                        Ok(output) => output,
                        Err(err) if ctx.step.optional => {
                            tracing::debug!(error = %err, "api_call output mapping failed on an optional step, skipping");
                            return StepHandlerResult::Skip;
                        }
                        Err(err) => return StepHandlerResult::fail("api_call_output_mapping_failed", err),
                    };

                    if let Some(target) = ctx.step.branches.get(&status.to_string()) {
                        return StepHandlerResult::Branch {
                            target_step_id: target.clone(),
                            output,
                        };
                    }
                    return StepHandlerResult::Success(output);
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                    if attempt + 1 < attempts {
                        tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                    }
                }
            }
        }

        let message = last_error.unwrap_or_else(|| "request failed".to_string());
        if ctx.step.optional {
            return StepHandlerResult::Skip;
        }
        StepHandlerResult::fail("api_call_failed", message)
    }
}

async fn extract_output(response: reqwest::Response, mapping: &HashMap<String, String>) -> Result<Claims, String> {
    let mut output = Claims::new();
    if mapping.is_empty() {
        return Ok(output);
    }

    let body: Value = response.json().await.map_err(|err| err.to_string())?;
    for (claim_name, path) in mapping {
        if let Ok(matches) = body.clone().path(path) {
            if let Some(first) = matches.as_array().and_then(|a| a.first()) {
                output.insert(claim_name.clone(), first.clone());
            }
        }
    }
    Ok(output)
}
