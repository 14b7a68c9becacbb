//! Short-TTL cache for per-tenant configuration.
//!
//! Reads are served from memory while fresh; a miss or stale entry forces
//! a refresh for that tenant. A refresh failure falls back to the stale
//! entry when one exists, else to process-wide defaults — tenant lookups
//! never block ingestion.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::tenant::{TenantConfig, TenantConfigRow};

pub struct TenantConfigCache {
    pool: PgPool,
    defaults: TenantConfig,
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, (TenantConfig, Instant)>>,
}

impl TenantConfigCache {
    pub fn new(pool: PgPool, defaults: TenantConfig, ttl_secs: u64) -> Self {
        Self {
            pool,
            defaults,
            ttl: Duration::from_secs(ttl_secs),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> TenantConfig {
        self.defaults
    }

    /// Resolve one tenant's configuration, refreshing on miss or expiry.
    pub async fn get(&self, tenant_id: Uuid) -> TenantConfig {
        {
            let entries = self.entries.read().await;
            if let Some((config, fetched_at)) = entries.get(&tenant_id) {
                if fetched_at.elapsed() < self.ttl {
                    return *config;
                }
            }
        }
        match self.refresh_one(tenant_id).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "tenant config refresh failed");
                let entries = self.entries.read().await;
                entries
                    .get(&tenant_id)
                    .map(|(config, _)| *config)
                    .unwrap_or(self.defaults)
            }
        }
    }

    /// Refresh every cached tenant plus all rows currently stored. Called
    /// on an interval by the owning loop.
    pub async fn refresh_all(&self) -> Result<(), CoreError> {
        let rows = sqlx::query_as::<_, TenantConfigRow>("SELECT * FROM tenant_configs")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::Lookup(format!("tenant config load failed: {e}")))?;

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        for row in rows {
            let resolved = TenantConfig::resolve(Some(&row), &self.defaults);
            entries.insert(row.tenant_id, (resolved, now));
        }
        Ok(())
    }

    async fn refresh_one(&self, tenant_id: Uuid) -> Result<TenantConfig, CoreError> {
        let row = sqlx::query_as::<_, TenantConfigRow>(
            "SELECT * FROM tenant_configs WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Lookup(format!("tenant config load failed: {e}")))?;

        let resolved = TenantConfig::resolve(row.as_ref(), &self.defaults);
        self.entries
            .write()
            .await
            .insert(tenant_id, (resolved, Instant::now()));
        Ok(resolved)
    }
}
