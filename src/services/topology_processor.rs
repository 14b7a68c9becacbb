//! Interval-driven topology correlation over each enabled tenant.
//!
//! Owns its lifecycle explicitly: `start` spawns the loop, `stop` signals
//! it and joins with a bounded timeout. One bad tenant or snapshot is
//! logged and skipped — a failure must never halt the sweep.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::CoreError;
use crate::models::alert::{AlertEvent, AlertStatus, Severity};
use crate::models::correlation_rule::ResolveOn;
use crate::models::incident::{Incident, IncidentStatus, IncidentType};
use crate::models::topology::{
    TopologyApplication, TopologyDependency, TopologyService, TopologySnapshot,
};
use crate::services::correlation::next_incident_status;
use crate::services::correlation_service::{
    insert_incident_with_retry, member_statuses, upsert_membership,
};
use crate::services::tenant_config::TenantConfigCache;
use crate::services::topology::{correlate, interconnectivity_id, ApplicationGroup};
use crate::services::workflow::{IncidentAction, WorkflowSink};

pub struct TopologyProcessor {
    pool: PgPool,
    scan_interval_secs: u64,
    lookback_minutes: i64,
    tenant_configs: Arc<TenantConfigCache>,
    sink: Arc<dyn WorkflowSink>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TopologyProcessor {
    pub fn new(
        pool: PgPool,
        config: &AppConfig,
        tenant_configs: Arc<TenantConfigCache>,
        sink: Arc<dyn WorkflowSink>,
    ) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            pool,
            scan_interval_secs: config.topology_scan_interval_secs,
            lookback_minutes: config.topology_lookback_minutes,
            tenant_configs,
            sink,
            stop_tx,
            stop_rx,
            handle: tokio::sync::Mutex::new(None),
        })
    }

    /// Spawn the correlation loop.
    pub async fn start(self: &Arc<Self>) {
        let processor = Arc::clone(self);
        let mut stop_rx = self.stop_rx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(processor.scan_interval_secs));
            tracing::info!(
                interval_secs = processor.scan_interval_secs,
                "topology processor started"
            );
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => processor.run_cycle().await,
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::info!("topology processor stopped");
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Signal the loop to stop and join it with a bounded timeout.
    pub async fn stop(&self, join_timeout: std::time::Duration) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(join_timeout, handle).await.is_err() {
                tracing::warn!("topology processor did not stop within timeout");
            }
        }
    }

    /// One sweep over all tenants. Per-tenant failures are contained.
    pub async fn run_cycle(&self) {
        let tenants = match self.list_tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::error!(error = %e, "tenant listing failed, skipping cycle");
                return;
            }
        };
        for tenant_id in tenants {
            let config = self.tenant_configs.get(tenant_id).await;
            if !config.topology_enabled {
                continue;
            }
            if let Err(e) = self
                .process_tenant(tenant_id, config.topology_depth, config.topology_minimum_services)
                .await
            {
                tracing::error!(
                    tenant_id = %tenant_id,
                    error = %e,
                    "topology correlation failed for tenant, continuing"
                );
            }
        }
    }

    async fn list_tenants(&self) -> Result<Vec<Uuid>, CoreError> {
        let rows = sqlx::query_as::<_, (Uuid,)>("SELECT id FROM tenants")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Correlate one tenant's current alert set against its topology.
    pub async fn process_tenant(
        &self,
        tenant_id: Uuid,
        depth: usize,
        minimum_services: usize,
    ) -> Result<(), CoreError> {
        let snapshot = self.load_snapshot(tenant_id).await?;
        if snapshot.services.is_empty() {
            return Ok(());
        }
        let alerts = self.load_recent_alerts(tenant_id).await?;

        // Bucket the latest alert per fingerprint by declared service.
        let mut by_service: HashMap<String, Vec<AlertEvent>> = HashMap::new();
        for alert in alerts {
            let Some(service) = alert.service.clone() else {
                continue;
            };
            if alert.status.is_settled() || alert.status == AlertStatus::Maintenance {
                continue;
            }
            by_service.entry(service).or_default().push(alert);
        }
        let alerting: HashSet<String> = by_service.keys().cloned().collect();
        if alerting.is_empty() {
            return Ok(());
        }

        let correlation = correlate(&snapshot, &alerting, depth, minimum_services);

        for group in &correlation.application_groups {
            let member_alerts = collect_alerts(&by_service, &group.services);
            self.upsert_application_incident(tenant_id, group, &member_alerts)
                .await?;
        }
        for services in &correlation.components {
            let member_alerts = collect_alerts(&by_service, services);
            self.upsert_component_incident(tenant_id, services, &member_alerts)
                .await?;
        }
        Ok(())
    }

    async fn load_snapshot(&self, tenant_id: Uuid) -> Result<TopologySnapshot, CoreError> {
        let services = sqlx::query_as::<_, TopologyService>(
            "SELECT * FROM topology_services WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Lookup(format!("topology services load failed: {e}")))?;

        let dependencies = sqlx::query_as::<_, TopologyDependency>(
            "SELECT * FROM topology_dependencies WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Lookup(format!("topology dependencies load failed: {e}")))?;

        let applications = sqlx::query_as::<_, TopologyApplication>(
            "SELECT * FROM topology_applications WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Lookup(format!("topology applications load failed: {e}")))?;

        Ok(TopologySnapshot {
            services,
            dependencies,
            applications,
        })
    }

    /// Most recent alert per fingerprint within the lookback window.
    async fn load_recent_alerts(&self, tenant_id: Uuid) -> Result<Vec<AlertEvent>, CoreError> {
        let alerts = sqlx::query_as::<_, AlertEvent>(
            r#"
            SELECT DISTINCT ON (fingerprint) *
            FROM alerts
            WHERE tenant_id = $1
              AND last_received >= NOW() - make_interval(mins => $2)
            ORDER BY fingerprint, last_received DESC
            "#,
        )
        .bind(tenant_id)
        .bind(self.lookback_minutes as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Lookup(format!("recent alert load failed: {e}")))?;
        Ok(alerts)
    }

    /// One incident per application, never split.
    async fn upsert_application_incident(
        &self,
        tenant_id: Uuid,
        group: &ApplicationGroup,
        member_alerts: &[AlertEvent],
    ) -> Result<(), CoreError> {
        let existing = sqlx::query_as::<_, Incident>(
            r#"
            SELECT * FROM incidents
            WHERE tenant_id = $1 AND application_id = $2 AND incident_type = 'topology'
              AND status NOT IN ('resolved', 'merged', 'deleted')
            ORDER BY last_seen_time DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(group.application_id)
        .fetch_optional(&self.pool)
        .await?;

        self.fold_into_incident(
            tenant_id,
            existing,
            format!("Application incident: {}", group.application_name),
            Some(group.application_id),
            None,
            &group.services,
            member_alerts,
        )
        .await
    }

    async fn upsert_component_incident(
        &self,
        tenant_id: Uuid,
        services: &[String],
        member_alerts: &[AlertEvent],
    ) -> Result<(), CoreError> {
        let interconnectivity = interconnectivity_id(services);
        let existing = sqlx::query_as::<_, Incident>(
            r#"
            SELECT * FROM incidents
            WHERE tenant_id = $1 AND interconnectivity_id = $2 AND incident_type = 'topology'
              AND status NOT IN ('resolved', 'merged', 'deleted')
            ORDER BY last_seen_time DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(&interconnectivity)
        .fetch_optional(&self.pool)
        .await?;

        self.fold_into_incident(
            tenant_id,
            existing,
            format!("Connected services incident: {}", services.join(", ")),
            None,
            Some(interconnectivity),
            services,
            member_alerts,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn fold_into_incident(
        &self,
        tenant_id: Uuid,
        existing: Option<Incident>,
        name: String,
        application_id: Option<Uuid>,
        interconnectivity: Option<String>,
        services: &[String],
        member_alerts: &[AlertEvent],
    ) -> Result<(), CoreError> {
        let now = Utc::now();
        let max_severity = member_alerts
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::Info);

        match existing {
            Some(incident) => {
                let mut tx = self.pool.begin().await?;
                for alert in member_alerts {
                    upsert_membership(&mut tx, incident.id, alert).await?;
                }
                let statuses = member_statuses(&mut tx, incident.id).await?;
                let alerts_count = statuses.len() as i64;
                let severity = incident.severity.max(max_severity);
                let status = next_incident_status(incident.status, ResolveOn::All, &statuses);

                let mut affected_services = incident.affected_services.clone();
                for s in services {
                    if !affected_services.contains(s) {
                        affected_services.push(s.clone());
                    }
                }

                sqlx::query(
                    r#"
                    UPDATE incidents
                    SET status = $1, severity = $2, alerts_count = $3,
                        affected_services = $4, last_seen_time = $5,
                        end_time = CASE WHEN $1 = 'resolved' THEN $5 ELSE end_time END
                    WHERE id = $6
                    "#,
                )
                .bind(status)
                .bind(severity)
                .bind(alerts_count)
                .bind(&affected_services)
                .bind(now)
                .bind(incident.id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                let updated = Incident {
                    status,
                    severity,
                    alerts_count,
                    affected_services,
                    last_seen_time: now,
                    ..incident
                };
                self.sink.notify(tenant_id, &updated, IncidentAction::Updated);
            }
            None => {
                let incident = Incident {
                    id: Uuid::new_v4(),
                    tenant_id,
                    name,
                    status: IncidentStatus::Firing,
                    severity: max_severity,
                    incident_type: IncidentType::Topology,
                    is_candidate: false,
                    is_confirmed: true,
                    running_number: 0,
                    alerts_count: member_alerts.len() as i64,
                    affected_services: services.to_vec(),
                    rule_fingerprint: None,
                    same_incident_in_the_past_id: None,
                    merged_into_incident_id: None,
                    interconnectivity_id: interconnectivity,
                    application_id,
                    start_time: now,
                    last_seen_time: now,
                    end_time: None,
                };
                let created =
                    insert_incident_with_retry(&self.pool, incident, member_alerts).await?;
                self.sink.notify(tenant_id, &created, IncidentAction::Created);
            }
        }
        Ok(())
    }
}

fn collect_alerts(
    by_service: &HashMap<String, Vec<AlertEvent>>,
    services: &[String],
) -> Vec<AlertEvent> {
    services
        .iter()
        .flat_map(|s| by_service.get(s).cloned().unwrap_or_default())
        .collect()
}
