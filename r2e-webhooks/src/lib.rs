//! Event fan-out and durable webhook delivery (§4.5).
//!
//! Publishers call `bus.emit(DomainEvent { .. })` on a shared
//! `r2e_events::EventBus`; an [`EventRouter`] attached to that bus fans the
//! event out to every registered [`Sink`] — in-process (logger, audit) or
//! remote ([`WebhookSink`], which only creates a `Pending` delivery record).
//! A [`retry::retry_task`] built on `r2e-scheduler` does the actual POSTing
//! and backoff.

pub mod dispatch;
pub mod registry;
pub mod retry;
pub mod signing;
pub mod sink;
pub mod store;

pub use dispatch::EventRouter;
pub use registry::{EndpointRegistry, WebhookEndpoint};
pub use retry::{retry_task, RetryState};
pub use sink::{AuditSink, AuditWriter, DomainEvent, InMemoryAuditWriter, LoggerSink, Sink, WebhookSink};
pub use store::DeliveryStore;

pub mod prelude {
    //! Re-exports of the most commonly used webhook types.
    pub use crate::dispatch::EventRouter;
    pub use crate::registry::{EndpointRegistry, WebhookEndpoint};
    pub use crate::retry::{retry_task, RetryState};
    pub use crate::sink::{DomainEvent, LoggerSink, Sink, WebhookSink};
    pub use crate::store::DeliveryStore;
}
