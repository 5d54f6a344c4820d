//! Errors raised while advancing a journey. These never reach the wire
//! directly — the executor always converts a `Fail` outcome or an `Err`
//! here into the journey's terminal `Error` state, and the authorize flow's
//! [`r2e_oidc::resume::authorize_error_response`] renders it from there.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JourneyError {
    #[error("unknown journey_id")]
    UnknownJourney,

    #[error("journey has expired")]
    Expired,

    #[error("journey_id on the resuming form does not match the active journey")]
    JourneyIdMismatch,

    #[error("concurrent advance attempt on this journey lost the compare-and-swap")]
    StaleState,

    #[error("policy '{0}' is not registered for this tenant")]
    UnknownPolicy(String),

    #[error("policy references unknown step id '{0}'")]
    UnknownStepId(String),

    #[error("no step handler registered for type '{0}'")]
    UnknownStepType(String),

    #[error("step '{step_id}' failed: {code} {description}")]
    StepFailed {
        step_id: String,
        code: String,
        description: String,
    },

    #[error("dynamic form validation failed")]
    FormValidation(std::collections::HashMap<String, String>),

    #[error("outbound call failed: {0}")]
    OutboundCall(String),

    #[error("plugin execution failed: {0}")]
    Plugin(String),

    #[error("journey completed without an authenticated principal")]
    NeverAuthenticated,

    #[error("oidc protocol error: {0}")]
    Oidc(#[from] r2e_oidc::OidcError),
}
