//! `mfa`: a one-time code delivered over the configured channel. The
//! pending code lives in `state.data` under `_mfa_*` keys so it survives the
//! round trip through the journey store between the challenge turn and the
//! verification turn.

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

const CODE_HASH_KEY: &str = "_mfa_code_hash";
const EXPIRES_AT_KEY: &str = "_mfa_expires_at";

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum Channel {
    Email,
    Sms,
}

impl Default for Channel {
    fn default() -> Self {
        Channel::Email
    }
}

#[derive(Deserialize)]
struct MfaConfig {
    #[serde(default)]
    channel: Channel,
    #[serde(default = "default_code_length")]
    code_length: u32,
    #[serde(default = "default_ttl")]
    ttl_secs: i64,
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

pub struct MfaStep;

#[async_trait]
impl StepHandler for MfaStep {
    async fn execute(&self, ctx: &mut StepExecutionContext<'_>) -> StepHandlerResult {
        let config: MfaConfig = match serde_json::from_value(ctx.config().clone()) {
            Ok(c) => c,
            Err(_) => MfaConfig {
                channel: Channel::Email,
                code_length: default_code_length(),
                ttl_secs: default_ttl(),
            },
        };

        if let Some(submitted) = ctx.input().get("otp").cloned() {
            let Some(expected_hash) = ctx.data().get(CODE_HASH_KEY).and_then(|v| v.as_str()).map(str::to_string) else {
                return StepHandlerResult::ShowUi {
                    view: "mfa".to_string(),
                    model: json!({ "step_id": ctx.step.id, "error": "no_pending_code" }),
                };
            };
            let expires_at = ctx.data().get(EXPIRES_AT_KEY).and_then(|v| v.as_i64()).unwrap_or(0);
            if ctx.now > expires_at {
                return StepHandlerResult::fail("mfa_expired", "the verification code has expired");
            }

            let submitted_hash = hash_code(&submitted);
            if submitted_hash.as_bytes().ct_eq(expected_hash.as_bytes()).into() {
                let mut output = Claims::new();
                output.insert("mfa_verified".to_string(), json!(true));
                return StepHandlerResult::Success(output);
            }

            return StepHandlerResult::ShowUi {
                view: "mfa".to_string(),
                model: json!({ "step_id": ctx.step.id, "error": "invalid_code" }),
            };
        }

        if ctx.data().contains_key(CODE_HASH_KEY) {
            return StepHandlerResult::ShowUi {
                view: "mfa".to_string(),
                model: json!({ "step_id": ctx.step.id }),
            };
        }

        let code = generate_code(config.code_length);
        let destination = match config.channel {
            Channel::Email => user_email(ctx).await,
            Channel::Sms => user_phone(ctx).await,
        };

        if let Some(destination) = destination {
            let send_result = match config.channel {
                Channel::Email => {
                    ctx.services
                        .notifier
                        .send_email(ctx.tenant_id(), &destination, "mfa_code", &json!({ "code": code }))
                        .await
                }
                Channel::Sms => {
                    ctx.services
                        .notifier
                        .send_sms(ctx.tenant_id(), &destination, "mfa_code", &json!({ "code": code }))
                        .await
                }
            };
            if let Err(err) = send_result {
                return StepHandlerResult::fail("mfa_delivery_failed", err.to_string());
            }
        }

        ctx.data_mut().insert(CODE_HASH_KEY.to_string(), json!(hash_code(&code)));
        ctx.data_mut().insert(EXPIRES_AT_KEY.to_string(), json!(ctx.now + config.ttl_secs));

        StepHandlerResult::ShowUi {
            view: "mfa".to_string(),
            model: json!({ "step_id": ctx.step.id }),
        }
    }
}

async fn user_email(ctx: &StepExecutionContext<'_>) -> Option<String> {
    let subject_id = ctx.user_id()?;
    ctx.services.oidc.users.find_by_subject(ctx.tenant_id(), subject_id).await?.email
}

async fn user_phone(ctx: &StepExecutionContext<'_>) -> Option<String> {
    let subject_id = ctx.user_id()?;
    ctx.services.oidc.users.find_by_subject(ctx.tenant_id(), subject_id).await?.phone
}
