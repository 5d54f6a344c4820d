//! Deployment configuration, loaded from a YAML file (path via `--config`
//! or `R2E_CONFIG`, `.env`-friendly via `dotenvy`) and logging verbosity via
//! `RUST_LOG`.

use std::path::PathBuf;

use clap::Parser;
use r2e_journey::JourneyPolicy;
use r2e_oidc::domain::{Client, Tenant, User};
use r2e_oidc::ServerConfig;
use r2e_webhooks::WebhookEndpoint;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "r2e-authd", about = "Multi-tenant OpenID Connect / OAuth 2.0 authorization server")]
pub struct Cli {
    /// Path to the deployment's YAML configuration file.
    #[arg(long, env = "R2E_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,
}

/// Static deployment configuration. Clients/users/journey policies are
/// admin-managed data in a real deployment (a database, an admin API); here
/// they are declared up front since persistence is out of scope (§1).
#[derive(Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub server: ServerConfig,
    /// Journey state TTL (§5 default: 30 min), refreshed on every advance.
    #[serde(default = "default_journey_ttl_secs")]
    pub journey_ttl_secs: i64,
    #[serde(default)]
    pub tenants: Vec<Tenant>,
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub journey_policies: Vec<JourneyPolicy>,
    #[serde(default)]
    pub webhook_endpoints: Vec<WebhookEndpoint>,
    /// Directory `custom_plugin` steps load `.wasm` modules from. Unset
    /// means no plugin runtime is configured for this deployment.
    #[serde(default)]
    pub plugin_module_dir: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_journey_ttl_secs() -> i64 {
    1800
}

impl Settings {
    pub fn load(path: &std::path::Path) -> Result<Self, crate::error::AuthdError> {
        let raw = std::fs::read_to_string(path).map_err(|err| crate::error::AuthdError::ConfigRead {
            path: path.display().to_string(),
            source: err,
        })?;
        let settings: Settings = serde_yaml::from_str(&raw).map_err(|err| crate::error::AuthdError::ConfigParse {
            path: path.display().to_string(),
            source: err,
        })?;
        Ok(settings)
    }
}
