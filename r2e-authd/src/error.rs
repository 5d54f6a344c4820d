//! Startup-time errors. Anything that can go wrong after the server is
//! actually serving requests is handled per-crate (`OidcError`,
//! `JourneyError`) — this only covers boot.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthdError {
    #[error("reading config file {path}: {source}")]
    ConfigRead { path: String, source: std::io::Error },

    #[error("parsing config file {path}: {source}")]
    ConfigParse { path: String, source: serde_yaml::Error },

    #[error("binding {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("initializing plugin runtime: {0}")]
    PluginRuntime(#[from] r2e_journey::JourneyError),
}
