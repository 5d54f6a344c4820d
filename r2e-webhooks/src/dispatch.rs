//! Ties [`Sink`]s to an `r2e_events::EventBus`: publishers call
//! `bus.emit(DomainEvent { .. })` (the `Raise(event)` of §4.5) and every
//! attached sink runs.

use std::sync::Arc;

use r2e_events::EventBus;

use crate::sink::{DomainEvent, Sink};

pub struct EventRouter {
    sinks: Vec<Arc<dyn Sink>>,
}

impl EventRouter {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }

    async fn dispatch(&self, event: &DomainEvent) {
        for sink in &self.sinks {
            sink.handle(event).await;
        }
    }

    /// Subscribe this router as the sole `DomainEvent` handler on `bus`.
    /// `emit` fans events out to every sink concurrently (bounded by the
    /// bus's own backpressure); `emit_and_wait` additionally waits for every
    /// sink — including the webhook sink's delivery-record writes — to
    /// finish before returning.
    pub async fn attach(self: Arc<Self>, bus: &EventBus) {
        bus.subscribe(move |event: Arc<DomainEvent>| {
            let router = self.clone();
            async move {
                router.dispatch(&event).await;
            }
        })
        .await;
    }
}
