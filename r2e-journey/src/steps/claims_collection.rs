//! `claims_collection` / `dynamic_form`: a tenant-defined set of fields to
//! collect, with per-field validation. Both step types share this handler —
//! `dynamic_form` is simply the richer superset of `claims_collection`'s
//! field schema.

use std::collections::HashMap;

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::conditions;
use crate::context::StepExecutionContext;
use crate::policy::ConditionClause;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

#[derive(Deserialize, Clone)]
struct FieldSpec {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default, rename = "type")]
    field_type: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    pattern_error: Option<String>,
    #[serde(default)]
    min_length: Option<usize>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    show_when: Option<ConditionClause>,
    /// Claim name to store the submitted value under, when it differs from
    /// `name` (spec §4.4: "stores each field as either its own name or its
    /// `claimType` into state.data").
    #[serde(default)]
    claim_type: Option<String>,
}

impl FieldSpec {
    fn output_key(&self) -> &str {
        self.claim_type.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Deserialize, Default)]
struct FormConfig {
    #[serde(default)]
    fields: Vec<FieldSpec>,
    /// Field names that must not collide with an existing user's username
    /// (§4.4: "a pre-completion validator may run afterwards, e.g. 'email
    /// already registered'"). Checked only after per-field validation
    /// passes, so its error surfaces as a form-level error rather than a
    /// per-field one.
    #[serde(default)]
    unique_fields: Vec<String>,
}

async fn is_visible(ctx: &StepExecutionContext<'_>, field: &FieldSpec) -> bool {
    match &field.show_when {
        Some(clause) => conditions::evaluate_clauses(ctx, std::slice::from_ref(clause), crate::policy::ConditionCombinator::And).await,
        None => true,
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern"))
}

fn tel_pattern() -> &'static Regex {
    static TEL: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    TEL.get_or_init(|| Regex::new(r"^\+?[0-9 ()\-]{6,20}$").expect("static phone pattern"))
}

fn validate_field(field: &FieldSpec, raw: Option<&String>) -> Result<Option<Value>, String> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        if field.required {
            return Err("required".to_string());
        }
        return Ok(None);
    };

    if let Some(min_length) = field.min_length {
        if raw.chars().count() < min_length {
            return Err(format!("must be at least {min_length} characters"));
        }
    }
    if let Some(max_length) = field.max_length {
        if raw.chars().count() > max_length {
            return Err(format!("must be at most {max_length} characters"));
        }
    }
    if let Some(pattern) = &field.pattern {
        let re = Regex::new(pattern).map_err(|_| "invalid field pattern".to_string())?;
        if !re.is_match(raw) {
            return Err(field.pattern_error.clone().unwrap_or_else(|| "does not match the required format".to_string()));
        }
    }

    match field.field_type.as_deref() {
        Some("email") if !email_pattern().is_match(raw) => return Err("not a valid email address".to_string()),
        Some("tel") if !tel_pattern().is_match(raw) => return Err("not a valid phone number".to_string()),
        Some("url") if url::Url::parse(raw).is_err() => return Err("not a valid URL".to_string()),
        Some("number") => {
            let parsed: f64 = raw.parse().map_err(|_| "not a number".to_string())?;
            if let Some(min) = field.min {
                if parsed < min {
                    return Err(format!("must be at least {min}"));
                }
            }
            if let Some(max) = field.max {
                if parsed > max {
                    return Err(format!("must be at most {max}"));
                }
            }
            return Ok(Some(json!(parsed)));
        }
        Some("checkbox") => return Ok(Some(json!(raw == "true" || raw == "on"))),
        _ => {}
    }

    Ok(Some(Value::String(raw.clone())))
}

pub struct ClaimsCollectionStep;

#[async_trait]
impl StepHandler for ClaimsCollectionStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: FormConfig = serde_json::from_value(ctx.config().clone()).unwrap_or_default();

        if !ctx.input().contains_key("_submit") {
            let visible = visible_fields(ctx, &config.fields).await;
            return StepHandlerResult::ShowUi {
                view: "claims_collection".to_string(),
                model: json!({ "step_id": ctx.step.id, "fields": visible.iter().map(field_model).collect::<Vec<_>>() }),
            };
        }

        let visible = visible_fields(ctx, &config.fields).await;
        let mut errors = HashMap::new();
        let mut output = Claims::new();

        for field in &visible {
            let raw = ctx.input().get(&field.name);
            match validate_field(field, raw) {
                Ok(Some(value)) => {
                    output.insert(field.output_key().to_string(), value);
                }
                Ok(None) => {}
                Err(message) => {
                    errors.insert(field.name.clone(), message);
                }
            }
        }

        if !errors.is_empty() {
            return StepHandlerResult::ShowUi {
                view: "claims_collection".to_string(),
                model: json!({
                    "step_id": ctx.step.id,
                    "fields": visible.iter().map(field_model).collect::<Vec<_>>(),
                    "errors": errors,
                }),
            };
        }

        for field_name in &config.unique_fields {
            let Some(value) = output.get(field_name).and_then(Value::as_str) else {
                continue;
            };
            if ctx.services.oidc.users.find_by_username(ctx.tenant_id(), value).await.is_some() {
                return StepHandlerResult::ShowUi {
                    view: "claims_collection".to_string(),
                    model: json!({
                        "step_id": ctx.step.id,
                        "fields": visible.iter().map(field_model).collect::<Vec<_>>(),
                        "form_error": format!("{field_name} is already registered"),
                    }),
                };
            }
        }

        StepHandlerResult::Success(output)
    }
}

async fn visible_fields(ctx: &StepExecutionContext<'_>, fields: &[FieldSpec]) -> Vec<FieldSpec> {
    let mut visible = Vec::with_capacity(fields.len());
    for field in fields {
        if is_visible(ctx, field).await {
            visible.push(field.clone());
        }
    }
    visible
}

fn field_model(field: &FieldSpec) -> Value {
    json!({
        "name": field.name,
        "label": field.label,
        "type": field.field_type,
        "required": field.required,
        "claimType": field.claim_type,
    })
}
