//! Durable-ish delivery queue. Backed by an in-memory map here; a real
//! deployment would swap this for a database table behind the same API —
//! the retry processor only ever talks to this interface.

use dashmap::DashMap;
use r2e_oidc::domain::{WebhookDelivery, WebhookDeliveryStatus};

#[derive(Default)]
pub struct DeliveryStore {
    deliveries: DashMap<String, WebhookDelivery>,
}

impl DeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, delivery: WebhookDelivery) {
        self.deliveries.insert(delivery.id.clone(), delivery);
    }

    pub fn get(&self, id: &str) -> Option<WebhookDelivery> {
        self.deliveries.get(id).map(|e| e.value().clone())
    }

    /// Atomically claim every `Pending` delivery due for an attempt at
    /// `now`, removing each from the store. A concurrent sweep collecting
    /// the same candidate ids only succeeds at removing the one it wins the
    /// race on — the loser's `remove` returns `None` and that id is simply
    /// dropped from its batch. This is the "row-level claim" §5 requires so
    /// a delivery is never POSTed twice concurrently.
    pub fn claim_due(&self, now: i64) -> Vec<WebhookDelivery> {
        let due_ids: Vec<String> = self
            .deliveries
            .iter()
            .filter(|e| e.status == WebhookDeliveryStatus::Pending && e.next_retry_at <= now)
            .map(|e| e.id.clone())
            .collect();

        due_ids.into_iter().filter_map(|id| self.deliveries.remove(&id).map(|(_, v)| v)).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.deliveries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delivery(id: &str, next_retry_at: i64) -> WebhookDelivery {
        WebhookDelivery {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            endpoint_id: "e1".to_string(),
            event_type: "user.created".to_string(),
            payload: json!({}),
            status: WebhookDeliveryStatus::Pending,
            attempts: 0,
            next_retry_at,
            response_status: None,
            last_error: None,
        }
    }

    #[test]
    fn claim_due_only_returns_matured_pending_deliveries() {
        let store = DeliveryStore::new();
        store.put(delivery("due", 100));
        store.put(delivery("not_yet", 200));

        let claimed = store.claim_due(150);
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "due");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn claimed_delivery_is_removed_so_it_cannot_be_claimed_twice() {
        let store = DeliveryStore::new();
        store.put(delivery("due", 100));

        assert_eq!(store.claim_due(150).len(), 1);
        assert_eq!(store.claim_due(150).len(), 0);
    }

    #[test]
    fn non_pending_status_is_never_claimed() {
        let store = DeliveryStore::new();
        let mut d = delivery("done", 100);
        d.status = WebhookDeliveryStatus::Succeeded;
        store.put(d);

        assert!(store.claim_due(150).is_empty());
    }
}
