//! The administrator-editable shape a journey executes (§3, §4.4's "Policy
//! Step" table). A [`JourneyPolicy`] is immutable once loaded — a journey
//! only ever reads it, never mutates it; edits replace the whole policy in
//! the registry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The built-in step types from §3's Journey Policy entity and §4.4's table.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    LocalLogin,
    CompositeLogin,
    ExternalIdp,
    Mfa,
    Consent,
    ClaimsCollection,
    DynamicForm,
    TermsAcceptance,
    PasswordReset,
    CreateUser,
    UpdateUser,
    LinkAccount,
    Condition,
    Branch,
    Transform,
    ApiCall,
    Webhook,
    CustomPlugin,
    Fido2Login,
    Fido2Register,
    PasswordlessEmail,
    PasswordlessSms,
    Captcha,
}

impl StepType {
    /// Every type the spec's table marks "Suspends UI?" yes (including the
    /// conditional `terms_acceptance` and the maybe-suspending
    /// `custom_plugin`, both decided by the step itself at run time).
    pub fn may_suspend(self) -> bool {
        use StepType::*;
        matches!(
            self,
            LocalLogin
                | CompositeLogin
                | ExternalIdp
                | Mfa
                | Consent
                | ClaimsCollection
                | DynamicForm
                | TermsAcceptance
                | PasswordReset
                | CustomPlugin
                | Fido2Login
                | Fido2Register
                | PasswordlessEmail
                | PasswordlessSms
                | Captcha
        )
    }
}

/// One step within a policy: its handler type, its opaque configuration
/// (each step handler deserializes the shape it expects), an optional guard
/// (skip the step if not met), and a branch table mapping an outcome label
/// to a target step id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub conditions: Vec<ConditionClause>,
    #[serde(default)]
    pub condition_combinator: ConditionCombinator,
    /// outcome label (e.g. "true"/"false", "onTrue"/"onFalse", an api_call's
    /// response classification) -> target step id.
    #[serde(default)]
    pub branches: HashMap<String, String>,
    /// When true, a `Fail` from this step is treated as `Skip` instead of
    /// terminating the journey (§3: Policy Step's "optional flag").
    #[serde(default)]
    pub optional: bool,
}

/// An ordered sequence of [`PolicyStep`]s with branch edges (§3, GLOSSARY).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JourneyPolicy {
    pub policy_id: String,
    pub tenant_id: String,
    pub name: String,
    pub steps: Vec<PolicyStep>,
}

impl JourneyPolicy {
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn step_at(&self, index: usize) -> Option<&PolicyStep> {
        self.steps.get(index)
    }
}

/// Where a [`condition`](StepType::Condition) step's clauses read values
/// from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSource {
    Claim,
    Input,
    Data,
    Config,
    User,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Contains,
    StartsWith,
    EndsWith,
    Exists,
    Regex,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionCombinator {
    #[default]
    And,
    Or,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConditionClause {
    pub source: ConditionSource,
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Option<Value>,
}
