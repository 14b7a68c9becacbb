use std::sync::Arc;
use std::time::Duration;

use mimalloc::MiMalloc;
use quell::config::AppConfig;
use quell::models::tenant::TenantConfig;
use quell::services::maintenance::MaintenanceReconciler;
use quell::services::tenant_config::TenantConfigCache;
use quell::services::topology_processor::TopologyProcessor;
use quell::services::workflow::TracingSink;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// M-MIMALLOC-APP: Use mimalloc as global allocator for improved performance.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "quell=debug".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration");
    tracing::info!("Starting quell correlation daemon");

    let pool = quell::db::create_pool(&config.database_url, config.database_max_connections).await?;
    quell::db::ping(&pool).await?;

    let defaults = TenantConfig {
        topology_enabled: config.topology_processor_enabled,
        topology_depth: config.topology_correlation_depth,
        topology_minimum_services: config.topology_minimum_services,
        maintenance_strategy: config.maintenance_strategy,
    };
    let tenant_configs = Arc::new(TenantConfigCache::new(
        pool.clone(),
        defaults,
        config.tenant_config_ttl_secs,
    ));
    if let Err(e) = tenant_configs.refresh_all().await {
        tracing::warn!(error = %e, "initial tenant config load failed, using defaults");
    }

    let sink = Arc::new(TracingSink);

    let topology = TopologyProcessor::new(pool.clone(), &config, tenant_configs.clone(), sink);
    if config.topology_processor_enabled {
        topology.start().await;
    } else {
        tracing::info!("topology processor disabled by configuration");
    }

    let reconciler = MaintenanceReconciler::new(pool, config.maintenance_reconcile_interval_secs);
    reconciler.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    topology.stop(SHUTDOWN_JOIN_TIMEOUT).await;
    reconciler.stop(SHUTDOWN_JOIN_TIMEOUT).await;

    Ok(())
}
