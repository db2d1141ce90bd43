//! Partner Settlement service
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌───────────┐
//! │  Config  │───▶│  Store   │───▶│   Gateway    │───▶│   Rail    │
//! │  (YAML)  │    │(PG / mem)│    │ (axum, JWT)  │    │(HTTP/mock)│
//! └──────────┘    └──────────┘    └──────────────┘    └───────────┘
//!                        ▲
//!                        └── ReconciliationWorker (stale pending rows)
//! ```
//!
//! Usage: `partner_settlement [--env dev] [--port 8080]`

use std::sync::Arc;

use anyhow::{Context, Result};

use partner_settlement::config::{AppConfig, RailProvider, StoreBackend};
use partner_settlement::db::Database;
use partner_settlement::gateway::{self, AppState};
use partner_settlement::logging::init_logging;
use partner_settlement::payment::ReconciliationWorker;
use partner_settlement::rail::http::HttpRailConfig;
use partner_settlement::rail::{HttpRail, PaymentRail, RailRegistry};
use partner_settlement::store::{MemoryStore, PgStore, Store};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

fn build_rails(config: &AppConfig) -> Result<RailRegistry> {
    let mut registry = RailRegistry::new(config.withdrawal_rail);
    for (kind, rail) in &config.rails {
        let implementation: Arc<dyn PaymentRail> = match rail.provider {
            RailProvider::Http => Arc::new(
                HttpRail::new(HttpRailConfig {
                    base_url: rail.base_url.clone(),
                    api_key: rail.api_key.clone(),
                    timeout: rail.timeout(),
                    onboarding_return_url: rail.onboarding_return_url.clone().unwrap_or_default(),
                })
                .with_context(|| format!("rail {}", kind))?,
            ),
            #[cfg(feature = "mock-api")]
            RailProvider::Mock => {
                tracing::warn!(rail = %kind, "Using the in-process mock rail");
                Arc::new(partner_settlement::rail::MockRail::new())
            }
            #[cfg(not(feature = "mock-api"))]
            RailProvider::Mock => {
                anyhow::bail!("rails.{}: mock provider requires the mock-api feature", kind)
            }
        };
        registry.register(*kind, implementation, rail.timeout());
        tracing::info!(rail = %kind, provider = ?rail.provider, "Rail registered");
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }
    let _log_guard = init_logging(&config);

    tracing::info!(env = %env, version = env!("GIT_HASH"), "Starting partner settlement");

    let (store, db): (Arc<dyn Store>, Option<Arc<Database>>) = match config.store.backend {
        StoreBackend::Postgres => {
            let url = config
                .store
                .postgres_url
                .as_deref()
                .context("store.postgres_url is not set")?;
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.migrate().await.context("Failed to apply schema")?;
            let store: Arc<dyn Store> = Arc::new(PgStore::new(db.pool().clone()));
            (store, Some(Arc::new(db)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; nothing survives a restart");
            let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
            (store, None)
        }
    };

    let rails = build_rails(&config)?;
    let mut state = AppState::new(
        store,
        rails,
        config.fees,
        config.withdrawal_config(),
        &config.webhook,
        config.jwt_secret.clone(),
    );
    if let Some(db) = db {
        state = state.with_database(db);
    }
    let state = Arc::new(state);

    if config.reconciler.enabled {
        let worker = ReconciliationWorker::new(
            state.orchestrator.clone(),
            state.profiles.clone(),
            config.reconciler.worker_config(),
        );
        tokio::spawn(async move {
            worker.run().await;
        });
    } else {
        tracing::warn!("Reconciliation worker disabled");
    }

    gateway::run_server(&config.gateway.host, config.gateway.port, state).await
}
