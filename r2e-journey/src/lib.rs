//! Policy-driven, suspendable user authentication journey engine (§3, §4.4).
//!
//! A [`JourneyEngine`] implements `r2e_oidc::JourneyCoordinator` and is
//! wired into an `r2e_oidc::AppState` via `with_journey_coordinator`; its own
//! [`router`] exposes the HTTP surface a suspended journey resumes through
//! (posted forms and external-IdP callbacks). Each step type in a
//! [`JourneyPolicy`] is one [`StepHandler`] registered in a [`StepRegistry`];
//! the executor loop lives in [`engine`].

pub mod conditions;
pub mod context;
pub mod engine;
pub mod error;
pub mod policy;
pub mod registry;
pub mod result;
pub mod router;
pub mod services;
pub mod state;
pub mod steps;
pub mod wasm_plugin;

pub use engine::{JourneyEngine, JourneyStore, PolicyRegistry};
pub use error::JourneyError;
pub use policy::{JourneyPolicy, PolicyStep, StepType};
pub use registry::{StepHandler, StepRegistry};
pub use result::StepHandlerResult;
pub use router::router;
pub use services::TenantServices;
pub use state::{AuthenticationResult, JourneyOutcome, JourneyState};
pub use wasm_plugin::WasmPluginExecutor;

pub mod prelude {
    //! Re-exports of the most commonly used journey types.
    pub use crate::engine::{JourneyEngine, PolicyRegistry};
    pub use crate::policy::{JourneyPolicy, PolicyStep, StepType};
    pub use crate::registry::StepRegistry;
    pub use crate::router::router;
    pub use crate::services::TenantServices;
}
