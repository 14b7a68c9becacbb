//! Database-backed correlation engine.
//!
//! Drives the per-alert rule evaluation path: matches enabled rules,
//! finds or creates the incident for (rule, grouping key) inside a single
//! transaction, maintains membership and lifecycle, and emits workflow
//! notifications. The pure decision logic lives in
//! [`crate::services::correlation`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use crate::cel::CelExpression;
use crate::errors::CoreError;
use crate::models::alert::{AlertEvent, AlertStatus};
use crate::models::correlation_rule::{CorrelationRule, CreateCorrelationRule};
use crate::models::incident::{Incident, IncidentStatus, IncidentType};
use crate::services::correlation::{
    accumulate_name, group_is_fresh, grouping_key, is_confirmed, next_incident_status,
    render_template, rule_fingerprint,
};
use crate::services::dedup::AnnotatedAlert;
use crate::services::workflow::{IncidentAction, WorkflowSink};

/// Retry budget for the optimistic running-number assignment. Conflicts are
/// expected under concurrency and only fatal once the budget is spent.
const RUNNING_NUMBER_ATTEMPTS: u32 = 5;
const RUNNING_NUMBER_BACKOFF_MS: u64 = 25;

/// Per-alert correlation engine. Explicitly constructed and injected; tests
/// instantiate isolated instances per case.
pub struct CorrelationEngine {
    pool: PgPool,
    sink: Arc<dyn WorkflowSink>,
}

impl CorrelationEngine {
    pub fn new(pool: PgPool, sink: Arc<dyn WorkflowSink>) -> Self {
        Self { pool, sink }
    }

    /// Run every enabled rule against a deduplicated alert.
    ///
    /// Full duplicates short-circuit: the payload is byte-identical to the
    /// previous delivery, so no correlation decision can change. Returns the
    /// ids of incidents created or updated.
    pub async fn process_alert(&self, annotated: &AnnotatedAlert) -> Result<Vec<Uuid>, CoreError> {
        if annotated.is_full_duplicate {
            tracing::debug!(
                fingerprint = %annotated.alert.fingerprint,
                "full duplicate, skipping correlation"
            );
            return Ok(Vec::new());
        }

        let alert = &annotated.alert;
        let context = alert.context();
        let rules = load_enabled_rules(&self.pool, alert.tenant_id).await?;

        let mut touched = Vec::new();
        for rule in &rules {
            // Predicates are parse-checked at creation time; a stored rule
            // failing to parse here means out-of-band tampering.
            let expr = match CelExpression::parse(&rule.definition_cel) {
                Ok(expr) => expr,
                Err(e) => {
                    tracing::error!(rule_id = %rule.id, error = %e, "stored rule no longer parses");
                    continue;
                }
            };
            match expr.evaluate(&context) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    // Evaluation errors skip this rule for this alert only.
                    tracing::warn!(
                        tenant_id = %alert.tenant_id,
                        rule_id = %rule.id,
                        fingerprint = %alert.fingerprint,
                        error = %e,
                        "rule evaluation failed, skipping rule for this alert"
                    );
                    continue;
                }
            }

            let incident_id = self.apply_rule(rule, alert, &context).await?;
            touched.push(incident_id);
        }
        Ok(touched)
    }

    /// Find or create the incident for (rule, grouping key) and fold the
    /// alert into it.
    async fn apply_rule(
        &self,
        rule: &CorrelationRule,
        alert: &AlertEvent,
        context: &serde_json::Value,
    ) -> Result<Uuid, CoreError> {
        let group_key = grouping_key(&rule.grouping_criteria, context);
        let fingerprint = rule_fingerprint(rule.id, &group_key);
        let now = Utc::now();

        // All reads and writes for this decision happen inside one
        // transaction holding the incident row lock, so two alerts landing
        // on the same group cannot race.
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, Incident>(
            r#"
            SELECT * FROM incidents
            WHERE tenant_id = $1 AND rule_fingerprint = $2
              AND status NOT IN ('merged', 'deleted')
            ORDER BY last_seen_time DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(alert.tenant_id)
        .bind(&fingerprint)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(incident) if group_is_fresh(incident.last_seen_time, now, rule.timeframe_secs) => {
                let updated = self
                    .update_incident(&mut tx, rule, incident, alert, context, now)
                    .await?;
                tx.commit().await?;
                self.sink
                    .notify(alert.tenant_id, &updated, IncidentAction::Updated);
                Ok(updated.id)
            }
            stale => {
                // Window evicted (or no incident yet): start a fresh group.
                // The creation path manages its own transaction per retry
                // attempt, so release the lock first.
                let recurrence_of = stale.map(|s| s.id);
                tx.commit().await?;
                let incident = self
                    .create_incident(rule, alert, context, &fingerprint, recurrence_of, now)
                    .await?;
                self.sink
                    .notify(alert.tenant_id, &incident, IncidentAction::Created);
                Ok(incident.id)
            }
        }
    }

    async fn update_incident(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rule: &CorrelationRule,
        incident: Incident,
        alert: &AlertEvent,
        context: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Incident, CoreError> {
        upsert_membership(tx, incident.id, alert).await?;
        let member_statuses = member_statuses(tx, incident.id).await?;

        let alerts_count = member_statuses.len() as i64;
        let severity = incident.severity.max(alert.severity);
        let confirmed = incident.is_confirmed
            || is_confirmed(rule.create_on, rule.threshold, alerts_count);

        let mut name = incident.name.clone();
        if let Some(template) = &rule.incident_name_template {
            let rendered = render_template(template, context);
            if let Some(next) = accumulate_name(&name, &rendered) {
                name = next;
            }
        }

        let mut affected_services = incident.affected_services.clone();
        if let Some(service) = &alert.service {
            if !affected_services.contains(service) {
                affected_services.push(service.clone());
            }
        }

        let status = next_incident_status(incident.status, rule.resolve_on, &member_statuses);
        let end_time = match status {
            IncidentStatus::Resolved => Some(now),
            _ => None,
        };

        sqlx::query(
            r#"
            UPDATE incidents
            SET name = $1, status = $2, severity = $3, is_candidate = $4,
                is_confirmed = $5, alerts_count = $6, affected_services = $7,
                last_seen_time = $8, end_time = $9
            WHERE id = $10
            "#,
        )
        .bind(&name)
        .bind(status)
        .bind(severity)
        .bind(!confirmed)
        .bind(confirmed)
        .bind(alerts_count)
        .bind(&affected_services)
        .bind(now)
        .bind(end_time)
        .bind(incident.id)
        .execute(&mut **tx)
        .await?;

        Ok(Incident {
            name,
            status,
            severity,
            is_candidate: !confirmed,
            is_confirmed: confirmed,
            alerts_count,
            affected_services,
            last_seen_time: now,
            end_time,
            ..incident
        })
    }

    /// Create a fresh incident with an optimistically assigned running
    /// number, retrying on uniqueness conflicts with jittered backoff.
    async fn create_incident(
        &self,
        rule: &CorrelationRule,
        alert: &AlertEvent,
        context: &serde_json::Value,
        fingerprint: &str,
        recurrence_of: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Incident, CoreError> {
        let name = match &rule.incident_name_template {
            Some(template) => render_template(template, context),
            None => rule.name.clone(),
        };
        let confirmed = is_confirmed(rule.create_on, rule.threshold, 1);
        let status = next_incident_status(IncidentStatus::Firing, rule.resolve_on, &[alert.status]);
        let incident = Incident {
            id: Uuid::new_v4(),
            tenant_id: alert.tenant_id,
            name,
            status,
            severity: alert.severity,
            incident_type: IncidentType::Rule,
            is_candidate: !confirmed,
            is_confirmed: confirmed,
            running_number: 0,
            alerts_count: 1,
            affected_services: alert.service.iter().cloned().collect(),
            rule_fingerprint: Some(fingerprint.to_string()),
            same_incident_in_the_past_id: recurrence_of,
            merged_into_incident_id: None,
            interconnectivity_id: None,
            application_id: None,
            start_time: now,
            last_seen_time: now,
            end_time: None,
        };

        insert_incident_with_retry(&self.pool, incident, std::slice::from_ref(alert)).await
    }

    /// Validate and persist a new correlation rule.
    ///
    /// The CEL predicate is parsed here, at creation time; malformed
    /// predicates never reach the evaluation path.
    pub async fn create_rule(
        &self,
        tenant_id: Uuid,
        create: CreateCorrelationRule,
    ) -> Result<CorrelationRule, CoreError> {
        create
            .validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        CelExpression::parse(&create.definition_cel)?;

        let rule = sqlx::query_as::<_, CorrelationRule>(
            r#"
            INSERT INTO correlation_rules
                (id, tenant_id, name, definition_cel, timeframe_secs, grouping_criteria,
                 create_on, resolve_on, incident_name_template, threshold, priority,
                 enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(&create.name)
        .bind(&create.definition_cel)
        .bind(create.timeframe_secs)
        .bind(&create.grouping_criteria)
        .bind(create.create_on)
        .bind(create.resolve_on)
        .bind(&create.incident_name_template)
        .bind(create.threshold.unwrap_or(1))
        .bind(create.priority.unwrap_or(0))
        .fetch_one(&self.pool)
        .await?;
        Ok(rule)
    }
}

/// Load enabled rules in evaluation order: priority, then creation order.
pub async fn load_enabled_rules(
    pool: &PgPool,
    tenant_id: Uuid,
) -> Result<Vec<CorrelationRule>, CoreError> {
    let rules = sqlx::query_as::<_, CorrelationRule>(
        r#"
        SELECT * FROM correlation_rules
        WHERE tenant_id = $1 AND enabled
        ORDER BY priority DESC, created_at ASC
        "#,
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;
    Ok(rules)
}

pub(crate) async fn upsert_membership(
    tx: &mut Transaction<'_, Postgres>,
    incident_id: Uuid,
    alert: &AlertEvent,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO incident_alerts (incident_id, fingerprint, status, joined_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (incident_id, fingerprint)
        DO UPDATE SET status = EXCLUDED.status
        "#,
    )
    .bind(incident_id)
    .bind(&alert.fingerprint)
    .bind(alert.status)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Member alert statuses in join order (oldest member first).
pub(crate) async fn member_statuses(
    tx: &mut Transaction<'_, Postgres>,
    incident_id: Uuid,
) -> Result<Vec<AlertStatus>, CoreError> {
    let rows = sqlx::query_as::<_, (AlertStatus,)>(
        "SELECT status FROM incident_alerts WHERE incident_id = $1 ORDER BY joined_at ASC",
    )
    .bind(incident_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(|(s,)| s).collect())
}

/// Insert an incident, assigning `running_number = max + 1` optimistically.
///
/// Uniqueness conflicts are retried with exponential backoff and jitter up
/// to [`RUNNING_NUMBER_ATTEMPTS`], then surfaced as `CoreError::Conflict`.
pub async fn insert_incident_with_retry(
    pool: &PgPool,
    mut incident: Incident,
    member_alerts: &[AlertEvent],
) -> Result<Incident, CoreError> {
    for attempt in 0..RUNNING_NUMBER_ATTEMPTS {
        let mut tx = pool.begin().await?;
        let next_number = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(running_number), 0) + 1 FROM incidents WHERE tenant_id = $1",
        )
        .bind(incident.tenant_id)
        .fetch_one(&mut *tx)
        .await?;
        incident.running_number = next_number;

        let inserted = insert_incident_row(&mut tx, &incident).await;
        match inserted {
            Ok(()) => {
                for alert in member_alerts {
                    upsert_membership(&mut tx, incident.id, alert).await?;
                }
                tx.commit().await?;
                return Ok(incident);
            }
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                let backoff = RUNNING_NUMBER_BACKOFF_MS * 2u64.pow(attempt)
                    + rand::thread_rng().gen_range(0..RUNNING_NUMBER_BACKOFF_MS);
                tracing::debug!(
                    tenant_id = %incident.tenant_id,
                    attempt,
                    backoff_ms = backoff,
                    "running number conflict, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(CoreError::Conflict(format!(
        "running number assignment for tenant {} exhausted {} attempts",
        incident.tenant_id, RUNNING_NUMBER_ATTEMPTS
    )))
}

async fn insert_incident_row(
    tx: &mut Transaction<'_, Postgres>,
    incident: &Incident,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO incidents
            (id, tenant_id, name, status, severity, incident_type, is_candidate,
             is_confirmed, running_number, alerts_count, affected_services,
             rule_fingerprint, same_incident_in_the_past_id, merged_into_incident_id,
             interconnectivity_id, application_id, start_time, last_seen_time, end_time)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        "#,
    )
    .bind(incident.id)
    .bind(incident.tenant_id)
    .bind(&incident.name)
    .bind(incident.status)
    .bind(incident.severity)
    .bind(incident.incident_type)
    .bind(incident.is_candidate)
    .bind(incident.is_confirmed)
    .bind(incident.running_number)
    .bind(incident.alerts_count)
    .bind(&incident.affected_services)
    .bind(&incident.rule_fingerprint)
    .bind(incident.same_incident_in_the_past_id)
    .bind(incident.merged_into_incident_id)
    .bind(&incident.interconnectivity_id)
    .bind(incident.application_id)
    .bind(incident.start_time)
    .bind(incident.last_seen_time)
    .bind(incident.end_time)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
