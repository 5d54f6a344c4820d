//! `passwordless_email` / `passwordless_sms`: a one-time code is the
//! *primary* credential rather than a second factor (contrast
//! [`crate::steps::mfa`], which only runs once an identity is already
//! candidate-established). The submitting turn both identifies the account
//! and authenticates it.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

const CODE_HASH_KEY: &str = "_passwordless_code_hash";
const EXPIRES_AT_KEY: &str = "_passwordless_expires_at";
const SUBJECT_KEY: &str = "_passwordless_subject_id";

#[derive(Deserialize)]
struct PasswordlessConfig {
    #[serde(default = "default_code_length")]
    code_length: u32,
    #[serde(default = "default_ttl")]
    ttl_secs: i64,
}

impl Default for PasswordlessConfig {
    fn default() -> Self {
        Self {
            code_length: default_code_length(),
            ttl_secs: default_ttl(),
        }
    }
}

fn default_code_length() -> u32 {
    6
}

fn default_ttl() -> i64 {
    300
}

fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn generate_code(length: u32) -> String {
    let max = 10u64.pow(length);
    let value = rand::thread_rng().gen_range(0..max);
    format!("{value:0width$}", width = length as usize)
}

enum Channel {
    Email,
    Sms,
}

async fn run(ctx: &mut StepExecutionContext<'_>, channel: Channel, view: &str) -> StepHandlerResult {
    let config: PasswordlessConfig = serde_json::from_value(ctx.config().clone()).unwrap_or_default();

    if let Some(otp) = ctx.input().get("otp").cloned() {
        let Some(expected_hash) = ctx.data().get(CODE_HASH_KEY).and_then(|v| v.as_str()).map(str::to_string) else {
            return StepHandlerResult::ShowUi {
                view: view.to_string(),
                model: json!({ "step_id": ctx.step.id, "error": "no_pending_code" }),
            };
        };
        let expires_at = ctx.data().get(EXPIRES_AT_KEY).and_then(|v| v.as_i64()).unwrap_or(0);
        if ctx.now > expires_at {
            return StepHandlerResult::fail("code_expired", "the one-time code has expired");
        }

        if hash_code(&otp).as_bytes().ct_eq(expected_hash.as_bytes()).into() {
            let Some(subject_id) = ctx.data().get(SUBJECT_KEY).and_then(|v| v.as_str()).map(str::to_string) else {
                return StepHandlerResult::fail("no_pending_code", "no account is pending verification");
            };
            ctx.set_authenticated(subject_id, "passwordless");
            return StepHandlerResult::success();
        }

        return StepHandlerResult::ShowUi {
            view: view.to_string(),
            model: json!({ "step_id": ctx.step.id, "error": "invalid_code" }),
        };
    }

    if ctx.data().contains_key(CODE_HASH_KEY) {
        return StepHandlerResult::ShowUi {
            view: view.to_string(),
            model: json!({ "step_id": ctx.step.id }),
        };
    }

    let Some(identifier) = ctx.input().get("identifier").cloned() else {
        return StepHandlerResult::ShowUi {
            view: view.to_string(),
            model: json!({ "step_id": ctx.step.id }),
        };
    };

    let Some(user) = ctx.services.oidc.users.find_by_username(ctx.tenant_id(), &identifier).await else {
        // Never disclose whether the identifier exists (§7).
        return StepHandlerResult::ShowUi {
            view: view.to_string(),
            model: json!({ "step_id": ctx.step.id, "sent": true }),
        };
    };
    if !user.active {
        return StepHandlerResult::fail("account_disabled", "user account is not active");
    }

    let destination = match channel {
        Channel::Email => user.email.clone(),
        Channel::Sms => user.phone.clone(),
    };
    let Some(destination) = destination else {
        return StepHandlerResult::fail("no_destination", "user has no destination configured for this channel");
    };

    let code = generate_code(config.code_length);
    let send_result = match channel {
        Channel::Email => {
            ctx.services
                .notifier
                .send_email(ctx.tenant_id(), &destination, "passwordless_code", &json!({ "code": code }))
                .await
        }
        Channel::Sms => {
            ctx.services
                .notifier
                .send_sms(ctx.tenant_id(), &destination, "passwordless_code", &json!({ "code": code }))
                .await
        }
    };
    if let Err(err) = send_result {
        return StepHandlerResult::fail("delivery_failed", err.to_string());
    }

    ctx.data_mut().insert(CODE_HASH_KEY.to_string(), json!(hash_code(&code)));
    ctx.data_mut().insert(EXPIRES_AT_KEY.to_string(), json!(ctx.now + config.ttl_secs));
    ctx.data_mut().insert(SUBJECT_KEY.to_string(), json!(user.subject_id));

    StepHandlerResult::ShowUi {
        view: view.to_string(),
        model: json!({ "step_id": ctx.step.id, "sent": true }),
    }
}

pub struct PasswordlessEmailStep;

#[async_trait]
impl StepHandler for PasswordlessEmailStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        run(ctx, Channel::Email, "passwordless_email").await
    }
}

pub struct PasswordlessSmsStep;

#[async_trait]
impl StepHandler for PasswordlessSmsStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        run(ctx, Channel::Sms, "passwordless_sms").await
    }
}
