//! Binary entry point: loads configuration, wires every crate into one
//! `axum` server (§6), and serves it until a shutdown signal arrives.

mod config;
mod defaults;
mod error;

use std::sync::Arc;

use clap::Parser;
use r2e_journey::prelude::*;
use r2e_journey::services::PluginExecutor;
use r2e_journey::WasmPluginExecutor;
use r2e_oidc::domain::SystemClock;
use r2e_oidc::{AppState, InMemoryUserDirectory, UserDirectory};
use r2e_scheduler::Scheduler;
use r2e_webhooks::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Settings};
use crate::defaults::{InMemoryProvisioning, LoggingNotifier, UnconfiguredCaptcha, UnconfiguredExternalIdp, UnconfiguredFido2, UnconfiguredPlugins};
use crate::error::AuthdError;

#[tokio::main]
async fn main() -> Result<(), AuthdError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    let clock: Arc<dyn r2e_oidc::domain::Clock> = Arc::new(SystemClock);

    let users_dir = Arc::new(InMemoryUserDirectory::new());
    for user in settings.users {
        users_dir.insert(user);
    }

    let app_state = AppState::new(settings.server, clock.clone(), users_dir.clone() as Arc<dyn UserDirectory>);
    for tenant in settings.tenants {
        app_state.tenants.insert(tenant);
    }
    for client in settings.clients {
        app_state.clients.insert(client);
    }
    let app_state = Arc::new(app_state);

    let bus = r2e_events::EventBus::new();
    let endpoints = Arc::new(EndpointRegistry::new());
    for endpoint in settings.webhook_endpoints {
        endpoints.upsert(endpoint);
    }
    let deliveries = Arc::new(DeliveryStore::new());

    let event_router = Arc::new(EventRouter::new(vec![
        Arc::new(LoggerSink) as Arc<dyn Sink>,
        Arc::new(WebhookSink::new(endpoints.clone(), deliveries.clone(), clock.clone())) as Arc<dyn Sink>,
    ]));
    event_router.attach(&bus).await;

    let plugins: Arc<dyn PluginExecutor> = match &settings.plugin_module_dir {
        Some(dir) => Arc::new(WasmPluginExecutor::new(dir)?),
        None => Arc::new(UnconfiguredPlugins),
    };

    let tenant_services = Arc::new(TenantServices {
        oidc: app_state.clone(),
        users: Arc::new(InMemoryProvisioning::new(users_dir)),
        external_idp: Arc::new(UnconfiguredExternalIdp),
        fido2: Arc::new(UnconfiguredFido2),
        notifier: Arc::new(LoggingNotifier),
        plugins,
        captcha: Arc::new(UnconfiguredCaptcha),
        events: bus,
        http: reqwest::Client::new(),
    });

    let policies = PolicyRegistry::new();
    for policy in settings.journey_policies {
        policies.insert(policy);
    }

    let journey_engine = Arc::new(JourneyEngine::new(tenant_services, policies, settings.journey_ttl_secs));
    app_state.set_journey_coordinator(journey_engine.clone());

    let mut scheduler = Scheduler::new();
    scheduler.register(Box::new(retry_task(Arc::new(RetryState {
        deliveries,
        endpoints,
        clock,
        http: reqwest::Client::new(),
    }))));
    let scheduler_handle = scheduler.start();

    let router = axum::Router::new()
        .merge(r2e_oidc::router(app_state))
        .merge(r2e_journey::router(journey_engine))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|source| AuthdError::Bind { addr: settings.bind_addr.clone(), source })?;
    tracing::info!(addr = %settings.bind_addr, "r2e-authd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_handle.cancel();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
