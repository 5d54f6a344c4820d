//! `password_reset`: request -> emailed code -> verify -> new password, all
//! within a single step so the journey doesn't need four policy entries for
//! one logical flow. State travels in `_reset_*` keys on `state.data`.

use async_trait::async_trait;
use r2e_oidc::domain::Claims;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::context::StepExecutionContext;
use crate::registry::StepHandler;
use crate::result::StepHandlerResult;

const USERNAME_KEY: &str = "_reset_username";
const CODE_HASH_KEY: &str = "_reset_code_hash";
const EXPIRES_AT_KEY: &str = "_reset_expires_at";
const VERIFIED_KEY: &str = "_reset_verified";

#[derive(Deserialize)]
struct PasswordResetConfig {
    #[serde(default = "default_code_length")]
    code_length: u32,
    #[serde(default = "default_ttl")]
    ttl_secs: i64,
}

fn default_code_length() -> u32 {
    6
}

fn default_ttl() -> i64 {
    600
}

fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn generate_code(length: u32) -> String {
    let max = 10u64.pow(length);
    let value = rand::thread_rng().gen_range(0..max);
    format!("{value:0width$}", width = length as usize)
}

pub struct PasswordResetStep;

#[async_trait]
impl StepHandler for PasswordResetStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: PasswordResetConfig = serde_json::from_value(ctx.config().clone()).unwrap_or(PasswordResetConfig {
            code_length: default_code_length(),
            ttl_secs: default_ttl(),
        });

        if ctx.data().get(VERIFIED_KEY).and_then(|v| v.as_bool()).unwrap_or(false) {
            if let Some(new_password) = ctx.input().get("new_password").cloned() {
                let username = ctx.data().get(USERNAME_KEY).and_then(|v| v.as_str()).map(str::to_string);
                let Some(username) = username else {
                    return StepHandlerResult::fail("password_reset_state_lost", "reset session lost its target username");
                };
                let Some(subject_id) = ctx.services.users.find_by_username(ctx.tenant_id(), &username).await else {
                    return StepHandlerResult::fail("password_reset_failed", "target account no longer exists");
                };
                if let Err(err) = ctx.services.users.set_password(ctx.tenant_id(), &subject_id, &new_password).await {
                    return StepHandlerResult::fail("password_reset_failed", err.to_string());
                }
                let mut output = Claims::new();
                output.insert("password_reset_completed".to_string(), json!(true));
                return StepHandlerResult::Success(output);
            }
            return StepHandlerResult::ShowUi {
                view: "password_reset_new_password".to_string(),
                model: json!({ "step_id": ctx.step.id }),
            };
        }

        if ctx.data().contains_key(CODE_HASH_KEY) {
            if let Some(submitted) = ctx.input().get("code").cloned() {
                let expected_hash = ctx.data().get(CODE_HASH_KEY).and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let expires_at = ctx.data().get(EXPIRES_AT_KEY).and_then(|v| v.as_i64()).unwrap_or(0);
                if ctx.now > expires_at {
                    return StepHandlerResult::fail("password_reset_expired", "the reset code has expired");
                }
                if hash_code(&submitted).as_bytes().ct_eq(expected_hash.as_bytes()).into() {
                    ctx.data_mut().insert(VERIFIED_KEY.to_string(), json!(true));
                    return StepHandlerResult::ShowUi {
                        view: "password_reset_new_password".to_string(),
                        model: json!({ "step_id": ctx.step.id }),
                    };
                }
                return StepHandlerResult::ShowUi {
                    view: "password_reset_verify".to_string(),
                    model: json!({ "step_id": ctx.step.id, "error": "invalid_code" }),
                };
            }
            return StepHandlerResult::ShowUi {
                view: "password_reset_verify".to_string(),
                model: json!({ "step_id": ctx.step.id }),
            };
        }

        let Some(username) = ctx.input().get("username").cloned() else {
            return StepHandlerResult::ShowUi {
                view: "password_reset_request".to_string(),
                model: json!({ "step_id": ctx.step.id }),
            };
        };

        let code = generate_code(config.code_length);
        if let Some(user) = ctx.services.oidc.users.find_by_username(ctx.tenant_id(), &username).await {
            if let Some(email) = &user.email {
                let _ = ctx
                    .services
                    .notifier
                    .send_email(ctx.tenant_id(), email, "password_reset_code", &json!({ "code": code }))
                    .await;
            }
        }

        ctx.data_mut().insert(USERNAME_KEY.to_string(), json!(username));
        ctx.data_mut().insert(CODE_HASH_KEY.to_string(), json!(hash_code(&code)));
        ctx.data_mut().insert(EXPIRES_AT_KEY.to_string(), json!(ctx.now + config.ttl_secs));

        StepHandlerResult::ShowUi {
            view: "password_reset_verify".to_string(),
            model: json!({ "step_id": ctx.step.id }),
        }
    }
}
