//! What a step handler hands back to the executor (§4.4 step 4).

use r2e_oidc::domain::Claims;
use serde_json::Value;

/// The executor interprets exactly one of these per step invocation.
#[derive(Debug)]
pub enum StepHandlerResult {
    /// Merge `output` into `state.data`; advance to the next step.
    Success(Claims),
    /// Advance to the next step without modifying state.
    Skip,
    /// Persist state and return a UI-rendering instruction to the HTTP
    /// layer; the executor loop pauses until the next turn supplies
    /// `user_input`.
    ShowUi { view: String, model: Value },
    /// Persist state and return a redirect; the executor loop pauses until
    /// an external callback (e.g. an IdP) re-enters the journey.
    Redirect(String),
    /// Merge `output` into `state.data`, then jump to the step whose id
    /// matches `target_step_id` instead of the next sequential step.
    Branch { target_step_id: String, output: Claims },
    /// Terminate the journey as `Error` with this OAuth/OIDC-style code and
    /// description (§7: never echo user input into `description`).
    Fail { code: String, description: String },
}

impl StepHandlerResult {
    pub fn success() -> Self {
        Self::Success(Claims::new())
    }

    pub fn fail(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Fail {
            code: code.into(),
            description: description.into(),
        }
    }
}
