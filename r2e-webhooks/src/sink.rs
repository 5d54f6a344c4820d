//! Sinks: in-process (logger, audit) or remote (webhook). The event router
//! in [`crate::dispatch`] fans a raised event out to every registered sink.

use std::sync::Arc;

use async_trait::async_trait;
use r2e_oidc::domain::{WebhookDelivery, WebhookDeliveryStatus};
use serde_json::Value;
use uuid::Uuid;

use crate::registry::EndpointRegistry;
use crate::store::DeliveryStore;

/// The event shape publishers `Raise`.
#[derive(Clone, Debug)]
pub struct DomainEvent {
    pub tenant_id: String,
    pub event_type: String,
    pub data: Value,
    pub metadata: Value,
}

#[async_trait]
pub trait Sink: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Writes a durable audit record. A real deployment backs this with a
/// database table; tests and small deployments can use
/// [`InMemoryAuditWriter`].
#[async_trait]
pub trait AuditWriter: Send + Sync {
    async fn write(&self, tenant_id: &str, event_type: &str, data: &Value);
}

pub struct LoggerSink;

#[async_trait]
impl Sink for LoggerSink {
    async fn handle(&self, event: &DomainEvent) {
        tracing::info!(tenant_id = %event.tenant_id, event_type = %event.event_type, "event raised");
    }
}

pub struct AuditSink {
    writer: Arc<dyn AuditWriter>,
}

impl AuditSink {
    pub fn new(writer: Arc<dyn AuditWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Sink for AuditSink {
    async fn handle(&self, event: &DomainEvent) {
        self.writer.write(&event.tenant_id, &event.event_type, &event.data).await;
    }
}

/// Default in-memory audit writer — logs at `info` level rather than
/// persisting. Good enough for a standalone deployment with no database;
/// swap in a real `AuditWriter` for durable audit trails.
#[derive(Default)]
pub struct InMemoryAuditWriter;

#[async_trait]
impl AuditWriter for InMemoryAuditWriter {
    async fn write(&self, tenant_id: &str, event_type: &str, data: &Value) {
        tracing::info!(tenant_id, event_type, %data, "audit record");
    }
}

/// Doesn't deliver anything itself — for every endpoint subscribed to the
/// event type, it creates a `Pending` [`WebhookDelivery`] for the retry
/// processor to pick up. Delivery is intentionally decoupled from `Raise`
/// so a slow or unreachable receiver never blocks the publisher.
pub struct WebhookSink {
    endpoints: Arc<EndpointRegistry>,
    deliveries: Arc<DeliveryStore>,
    clock: Arc<dyn r2e_oidc::domain::Clock>,
}

impl WebhookSink {
    pub fn new(endpoints: Arc<EndpointRegistry>, deliveries: Arc<DeliveryStore>, clock: Arc<dyn r2e_oidc::domain::Clock>) -> Self {
        Self { endpoints, deliveries, clock }
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn handle(&self, event: &DomainEvent) {
        let now = self.clock.now();
        for endpoint in self.endpoints.subscribed(&event.tenant_id, &event.event_type) {
            let payload = serde_json::json!({
                "id": Uuid::new_v4().to_string(),
                "event_type": event.event_type,
                "timestamp": now,
                "tenant_id": event.tenant_id,
                "data": event.data,
                "metadata": event.metadata,
            });
            self.deliveries.put(WebhookDelivery {
                id: Uuid::new_v4().to_string(),
                tenant_id: event.tenant_id.clone(),
                endpoint_id: endpoint.id,
                event_type: event.event_type.clone(),
                payload,
                status: WebhookDeliveryStatus::Pending,
                attempts: 0,
                next_retry_at: now,
                response_status: None,
                last_error: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r2e_oidc::domain::SystemClock;

    #[tokio::test]
    async fn webhook_sink_creates_one_pending_delivery_per_subscribed_endpoint() {
        let endpoints = Arc::new(EndpointRegistry::new());
        endpoints.upsert(crate::registry::WebhookEndpoint {
            id: "e1".to_string(),
            tenant_id: "t1".to_string(),
            url: "https://example.com".to_string(),
            secret: "s".to_string(),
            event_types: vec!["user.created".to_string()],
            enabled: true,
        });
        let deliveries = Arc::new(DeliveryStore::new());
        let sink = WebhookSink::new(endpoints, deliveries.clone(), Arc::new(SystemClock));

        sink.handle(&DomainEvent {
            tenant_id: "t1".to_string(),
            event_type: "user.created".to_string(),
            data: serde_json::json!({"id": "u1"}),
            metadata: serde_json::json!({}),
        })
        .await;

        assert_eq!(deliveries.len(), 1);
    }

    #[tokio::test]
    async fn webhook_sink_ignores_non_matching_events() {
        let endpoints = Arc::new(EndpointRegistry::new());
        endpoints.upsert(crate::registry::WebhookEndpoint {
            id: "e1".to_string(),
            tenant_id: "t1".to_string(),
            url: "https://example.com".to_string(),
            secret: "s".to_string(),
            event_types: vec!["user.created".to_string()],
            enabled: true,
        });
        let deliveries = Arc::new(DeliveryStore::new());
        let sink = WebhookSink::new(endpoints, deliveries.clone(), Arc::new(SystemClock));

        sink.handle(&DomainEvent {
            tenant_id: "t1".to_string(),
            event_type: "user.deleted".to_string(),
            data: serde_json::json!({}),
            metadata: serde_json::json!({}),
        })
        .await;

        assert_eq!(deliveries.len(), 0);
    }
}
