//! Tenant-scoped webhook endpoint configuration: which URL gets which event
//! types, and the secret its deliveries are signed with.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A configured remote sink. `event_types` is matched exactly against an
/// event's `event_type`; an empty set subscribes to everything the tenant
/// raises.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub enabled: bool,
}

impl WebhookEndpoint {
    fn subscribes_to(&self, event_type: &str) -> bool {
        self.enabled && (self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type))
    }
}

/// `(tenant_id, endpoint_id) -> WebhookEndpoint`. Admin-mutated, read on
/// every `Raise` — read-mostly per §5's "Shared resources" model.
#[derive(Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<(String, String), WebhookEndpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, endpoint: WebhookEndpoint) {
        let key = (endpoint.tenant_id.clone(), endpoint.id.clone());
        self.endpoints.insert(key, endpoint);
    }

    pub fn remove(&self, tenant_id: &str, endpoint_id: &str) {
        self.endpoints.remove(&(tenant_id.to_string(), endpoint_id.to_string()));
    }

    pub fn get(&self, tenant_id: &str, endpoint_id: &str) -> Option<WebhookEndpoint> {
        self.endpoints.get(&(tenant_id.to_string(), endpoint_id.to_string())).map(|e| e.value().clone())
    }

    /// Every enabled endpoint for `tenant_id` subscribed to `event_type`.
    /// Tenant-scoped so updating tenant T's endpoints never affects tenant
    /// U's dispatch, per §5.
    pub fn subscribed(&self, tenant_id: &str, event_type: &str) -> Vec<WebhookEndpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.key().0 == tenant_id && e.value().subscribes_to(event_type))
            .map(|e| e.value().clone())
            .collect()
    }
}
