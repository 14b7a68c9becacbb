//! Service topology models consumed by the topology correlator.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TopologyService {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub display_name: Option<String>,
}

/// Directed dependency as reported by the provider; the correlator
/// symmetrizes edges before traversal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TopologyDependency {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub service_name: String,
    pub depends_on: String,
}

/// Explicit named grouping of services, evaluated with priority over
/// automatic graph correlation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TopologyApplication {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub service_names: Vec<String>,
}

/// One tenant's topology snapshot as loaded from the provider.
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    pub services: Vec<TopologyService>,
    pub dependencies: Vec<TopologyDependency>,
    pub applications: Vec<TopologyApplication>,
}
