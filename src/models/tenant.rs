//! Per-tenant configuration overrides.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::maintenance::MaintenanceStrategy;

/// Row shape for the tenant configuration table. Nullable columns fall back
/// to process-wide defaults from [`crate::config::AppConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantConfigRow {
    pub tenant_id: Uuid,
    pub topology_enabled: Option<bool>,
    pub topology_depth: Option<i32>,
    pub topology_minimum_services: Option<i32>,
    pub maintenance_strategy: Option<String>,
}

/// Resolved per-tenant configuration after applying defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantConfig {
    pub topology_enabled: bool,
    pub topology_depth: usize,
    pub topology_minimum_services: usize,
    pub maintenance_strategy: MaintenanceStrategy,
}

impl TenantConfig {
    /// Apply a tenant's overrides on top of process-wide defaults.
    pub fn resolve(row: Option<&TenantConfigRow>, defaults: &TenantConfig) -> TenantConfig {
        let Some(row) = row else {
            return *defaults;
        };
        TenantConfig {
            topology_enabled: row.topology_enabled.unwrap_or(defaults.topology_enabled),
            topology_depth: row
                .topology_depth
                .map(|d| d.max(1) as usize)
                .unwrap_or(defaults.topology_depth),
            topology_minimum_services: row
                .topology_minimum_services
                .map(|m| m.max(1) as usize)
                .unwrap_or(defaults.topology_minimum_services),
            maintenance_strategy: row
                .maintenance_strategy
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.maintenance_strategy),
        }
    }
}
