//! Shared clause evaluation for the `condition` step type and for a
//! [`crate::policy::PolicyStep`]'s own optional guard (§4.4: "condition —
//! Evaluates list of conditions... combines by and/or").

use regex::Regex;
use serde_json::Value;

use crate::context::StepExecutionContext;
use crate::policy::{ConditionClause, ConditionCombinator, ConditionOperator, ConditionSource};

pub async fn evaluate_clauses(
    ctx: &StepExecutionContext<'_>,
    clauses: &[ConditionClause],
    combinator: ConditionCombinator,
) -> bool {
    if clauses.is_empty() {
        return true;
    }
    let mut results = Vec::with_capacity(clauses.len());
    for clause in clauses {
        results.push(evaluate_clause(ctx, clause).await);
    }
    match combinator {
        ConditionCombinator::And => results.into_iter().all(|b| b),
        ConditionCombinator::Or => results.into_iter().any(|b| b),
    }
}

async fn evaluate_clause(ctx: &StepExecutionContext<'_>, clause: &ConditionClause) -> bool {
    let actual = resolve_source(ctx, clause.source, &clause.field).await;
    apply_operator(clause.operator, actual.as_ref(), clause.value.as_ref())
}

async fn resolve_source(ctx: &StepExecutionContext<'_>, source: ConditionSource, field: &str) -> Option<Value> {
    match source {
        ConditionSource::Claim | ConditionSource::Data => ctx.data().get(field).cloned(),
        ConditionSource::Input => ctx.input().get(field).cloned().map(Value::String),
        ConditionSource::Config => ctx.config().get(field).cloned(),
        ConditionSource::User => {
            let subject_id = ctx.user_id()?;
            let user = ctx.services.oidc.users.find_by_subject(ctx.tenant_id(), subject_id).await?;
            user_field_value(&user, field)
        }
    }
}

fn user_field_value(user: &r2e_oidc::domain::User, field: &str) -> Option<Value> {
    match field {
        "username" => Some(Value::String(user.username.clone())),
        "email" => user.email.clone().map(Value::String),
        "phone" => user.phone.clone().map(Value::String),
        "active" => Some(Value::Bool(user.active)),
        "email_verified" => Some(Value::Bool(user.email_verified)),
        "roles" => Some(Value::Array(user.roles_vec().into_iter().map(Value::String).collect())),
        other => user.custom_properties.get(other).cloned(),
    }
}

fn apply_operator(op: ConditionOperator, actual: Option<&Value>, expected: Option<&Value>) -> bool {
    use ConditionOperator::*;
    match op {
        Exists => actual.is_some(),
        Eq => actual == expected,
        Ne => actual != expected,
        Contains => match (actual, expected) {
            (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
            (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
            _ => false,
        },
        StartsWith => match (as_str(actual), as_str(expected)) {
            (Some(s), Some(prefix)) => s.starts_with(prefix),
            _ => false,
        },
        EndsWith => match (as_str(actual), as_str(expected)) {
            (Some(s), Some(suffix)) => s.ends_with(suffix),
            _ => false,
        },
        Regex => match (as_str(actual), as_str(expected)) {
            (Some(s), Some(pattern)) => Regex::new(pattern).map(|re| re.is_match(s)).unwrap_or(false),
            _ => false,
        },
        Gt => as_f64(actual).zip(as_f64(expected)).map(|(a, b)| a > b).unwrap_or(false),
        Gte => as_f64(actual).zip(as_f64(expected)).map(|(a, b)| a >= b).unwrap_or(false),
        Lt => as_f64(actual).zip(as_f64(expected)).map(|(a, b)| a < b).unwrap_or(false),
        Lte => as_f64(actual).zip(as_f64(expected)).map(|(a, b)| a <= b).unwrap_or(false),
        In => match expected {
            Some(Value::Array(items)) => actual.map(|a| items.contains(a)).unwrap_or(false),
            _ => false,
        },
    }
}

fn as_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str)
}

fn as_f64(v: Option<&Value>) -> Option<f64> {
    v.and_then(Value::as_f64)
}
