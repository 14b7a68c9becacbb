use std::env;

use crate::models::maintenance::MaintenanceStrategy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Process-wide switch for the topology correlator loops.
    pub topology_processor_enabled: bool,
    /// Seconds between topology correlation sweeps.
    pub topology_scan_interval_secs: u64,
    /// How far back the "last alert per fingerprint" load reaches.
    pub topology_lookback_minutes: i64,
    /// Default BFS depth when a tenant carries no override.
    pub topology_correlation_depth: usize,
    /// Default minimum component size when a tenant carries no override.
    pub topology_minimum_services: usize,
    pub maintenance_strategy: MaintenanceStrategy,
    pub maintenance_reconcile_interval_secs: u64,
    /// When enabled, each dedup rule evaluation writes an audit row.
    pub dedup_tracking_enabled: bool,
    pub tenant_config_ttl_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            topology_processor_enabled: env::var("TOPOLOGY_PROCESSOR_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            topology_scan_interval_secs: env::var("TOPOLOGY_SCAN_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            topology_lookback_minutes: env::var("TOPOLOGY_LOOKBACK_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .unwrap_or(15),
            topology_correlation_depth: env::var("TOPOLOGY_CORRELATION_DEPTH")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            topology_minimum_services: env::var("TOPOLOGY_MINIMUM_SERVICES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),
            maintenance_strategy: env::var("MAINTENANCE_WINDOW_STRATEGY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(MaintenanceStrategy::Default),
            maintenance_reconcile_interval_secs: env::var("MAINTENANCE_RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            dedup_tracking_enabled: env::var("DEDUP_TRACKING_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            tenant_config_ttl_secs: env::var("TENANT_CONFIG_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_from_env_string() {
        let s: MaintenanceStrategy = "recover_previous_status".parse().unwrap();
        assert_eq!(s, MaintenanceStrategy::RecoverPreviousStatus);
    }
}
