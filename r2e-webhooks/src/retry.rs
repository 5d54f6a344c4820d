//! Retry processor (§4.5, §5): picks deliveries whose `next_retry_at ≤ now`,
//! POSTs the payload, and advances status. Built as an
//! `r2e_scheduler::ScheduledTask` so it runs alongside the rest of the
//! server's background work.

use std::sync::Arc;
use std::time::Duration;

use r2e_oidc::domain::{Clock, WebhookDelivery, WebhookDeliveryStatus};
use r2e_scheduler::{ScheduleConfig, ScheduledTaskDef};

use crate::registry::EndpointRegistry;
use crate::signing::sign;
use crate::store::DeliveryStore;

/// {1 min, 5 min, 30 min, 2 h, 8 h} — indexed by `attempts` after increment.
const BACKOFF_SECS: [i64; 5] = [60, 300, 1_800, 7_200, 28_800];

const MAX_ATTEMPTS: u32 = 5;

fn backoff_secs(attempts: u32) -> i64 {
    let idx = attempts.saturating_sub(1).min(BACKOFF_SECS.len() as u32 - 1) as usize;
    BACKOFF_SECS[idx]
}

pub struct RetryState {
    pub deliveries: Arc<DeliveryStore>,
    pub endpoints: Arc<EndpointRegistry>,
    pub clock: Arc<dyn Clock>,
    pub http: reqwest::Client,
}

/// How often the sweep looks for due deliveries. Independent of the backoff
/// schedule itself — just the polling cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Build the scheduled task. Hand the result to `Scheduler::register`.
pub fn retry_task(state: Arc<RetryState>) -> ScheduledTaskDef<Arc<RetryState>> {
    ScheduledTaskDef {
        name: "webhook-retry-sweep".to_string(),
        schedule: ScheduleConfig::Interval(SWEEP_INTERVAL),
        state,
        task: Box::new(|state| Box::pin(sweep(state))),
    }
}

async fn sweep(state: Arc<RetryState>) {
    let now = state.clock.now();
    let due = state.deliveries.claim_due(now);
    if due.is_empty() {
        return;
    }
    tracing::debug!(count = due.len(), "sweeping due webhook deliveries");

    for delivery in due {
        let updated = attempt(&state, delivery, now).await;
        state.deliveries.put(updated);
    }
}

async fn attempt(state: &RetryState, mut delivery: WebhookDelivery, now: i64) -> WebhookDelivery {
    let Some(endpoint) = state.endpoints.get(&delivery.tenant_id, &delivery.endpoint_id) else {
        tracing::warn!(delivery_id = %delivery.id, endpoint_id = %delivery.endpoint_id, "webhook endpoint no longer configured, exhausting delivery");
        delivery.status = WebhookDeliveryStatus::Exhausted;
        delivery.last_error = Some("endpoint no longer configured".to_string());
        return delivery;
    };

    let body = delivery.payload.to_string();
    let signature = sign(&endpoint.secret, now, &body);

    let result = state
        .http
        .post(&endpoint.url)
        .header("X-Webhook-Timestamp", now.to_string())
        .header("X-Webhook-Signature", signature)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            delivery.status = WebhookDeliveryStatus::Succeeded;
            delivery.response_status = Some(response.status().as_u16());
            delivery.last_error = None;
        }
        Ok(response) => {
            let status = response.status().as_u16();
            delivery.response_status = Some(status);
            fail(&mut delivery, now, format!("receiver responded with status {status}"));
        }
        Err(err) => {
            fail(&mut delivery, now, err.to_string());
        }
    }
    delivery
}

fn fail(delivery: &mut WebhookDelivery, now: i64, error: String) {
    delivery.attempts += 1;
    delivery.last_error = Some(error);
    if delivery.attempts >= MAX_ATTEMPTS {
        delivery.status = WebhookDeliveryStatus::Exhausted;
    } else {
        delivery.status = WebhookDeliveryStatus::Pending;
        delivery.next_retry_at = now + backoff_secs(delivery.attempts);
    }
}
