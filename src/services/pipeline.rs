//! Per-alert processing pipeline.
//!
//! Strings the synchronous stages together for one incoming normalized
//! alert: maintenance-window suppression, fingerprint deduplication, then
//! rule correlation. Invoked once per alert from whatever concurrency
//! context ingests alerts; alerts for different tenants run fully in
//! parallel, while same-group incident writes serialize inside the
//! correlation engine's transaction.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::alert::AlertEvent;
use crate::services::correlation_service::CorrelationEngine;
use crate::services::dedup::DedupClassification;
use crate::services::dedup_service;
use crate::services::maintenance::{self, SuppressionOutcome};
use crate::services::tenant_config::TenantConfigCache;
use crate::services::workflow::WorkflowSink;

/// Summary of one alert's trip through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub suppression: SuppressionOutcome,
    pub dedup: DedupClassification,
    /// Incidents created or updated by the rules engine.
    pub incidents: Vec<Uuid>,
}

pub struct AlertPipeline {
    pool: PgPool,
    tenant_configs: Arc<TenantConfigCache>,
    engine: CorrelationEngine,
    dedup_tracking_enabled: bool,
}

impl AlertPipeline {
    pub fn new(
        pool: PgPool,
        tenant_configs: Arc<TenantConfigCache>,
        sink: Arc<dyn WorkflowSink>,
        dedup_tracking_enabled: bool,
    ) -> Self {
        let engine = CorrelationEngine::new(pool.clone(), sink);
        Self {
            pool,
            tenant_configs,
            engine,
            dedup_tracking_enabled,
        }
    }

    /// Process one normalized alert end to end.
    ///
    /// Suppression and deduplication both fail open; only correlation
    /// persistence errors propagate, and those surface as a degraded
    /// result at the API layer rather than a dropped alert.
    pub async fn handle_alert(&self, mut alert: AlertEvent) -> Result<PipelineResult, CoreError> {
        let tenant_config = self.tenant_configs.get(alert.tenant_id).await;

        let suppression =
            maintenance::suppress(&self.pool, &mut alert, tenant_config.maintenance_strategy)
                .await;

        let annotated =
            dedup_service::apply_fail_open(&self.pool, alert, self.dedup_tracking_enabled).await;
        let dedup = annotated.classification();

        let incidents = self.engine.process_alert(&annotated).await?;

        tracing::debug!(
            tenant_id = %annotated.alert.tenant_id,
            fingerprint = %annotated.alert.fingerprint,
            suppression = ?suppression,
            dedup = dedup.as_str(),
            incidents = incidents.len(),
            "alert processed"
        );
        Ok(PipelineResult {
            suppression,
            dedup,
            incidents,
        })
    }
}
