//! Built-in step handlers, one module per family in §3's Journey Policy
//! step-type table. Each implements [`crate::registry::StepHandler`].

pub mod api_call;
pub mod captcha;
pub mod claims_collection;
pub mod condition;
pub mod consent;
pub mod custom_plugin;
pub mod external_idp;
pub mod fido2;
pub mod local_login;
pub mod mfa;
pub mod passwordless;
pub mod password_reset;
pub mod terms_acceptance;
pub mod transform;
pub mod user_mgmt;
pub mod webhook;
