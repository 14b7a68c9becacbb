//! Maintenance window suppression and the status-recovery reconciler.
//!
//! The matching logic (`matching_windows`, `apply_strategy`) is pure; the
//! surrounding functions own window lookup, persistence, and the
//! reconciliation background loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cel::CelExpression;
use crate::errors::CoreError;
use crate::models::alert::{AlertEvent, AlertStatus};
use crate::models::maintenance::{MaintenanceStrategy, MaintenanceWindowRule};

/// Outcome of a suppression check for one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionOutcome {
    /// No active window matched (or the alert's status is exempt).
    None,
    /// `default` strategy: alert marked suppressed, no state retained.
    Suppressed,
    /// `recover_previous_status` strategy: alert moved to maintenance with
    /// its previous status captured for later restoration.
    EnteredMaintenance,
}

/// Find the active windows covering an alert at `now`.
///
/// A window applies when it is enabled, covers `now` in `[start, end)`,
/// its predicate matches, and the alert's status is not in the window's
/// ignore list. A window whose predicate fails to parse or evaluate is
/// skipped (fail open) rather than suppressing blindly.
pub fn matching_windows<'a>(
    windows: &'a [MaintenanceWindowRule],
    alert_status: AlertStatus,
    context: &serde_json::Value,
    now: DateTime<Utc>,
) -> Vec<&'a MaintenanceWindowRule> {
    windows
        .iter()
        .filter(|w| w.is_active(now))
        .filter(|w| !w.ignore_statuses.contains(&alert_status))
        .filter(|w| {
            let expr = match CelExpression::parse(&w.cel_query) {
                Ok(expr) => expr,
                Err(e) => {
                    tracing::warn!(window_id = %w.id, error = %e, "maintenance window predicate does not parse");
                    return false;
                }
            };
            match expr.evaluate(context) {
                Ok(matched) => matched,
                Err(e) => {
                    tracing::warn!(window_id = %w.id, error = %e, "maintenance window predicate failed to evaluate");
                    false
                }
            }
        })
        .collect()
}

/// Apply the configured strategy to a covered alert, mutating it in place.
///
/// Idempotent under `recover_previous_status`: an alert already in
/// maintenance keeps its original `previous_status` — re-entering an
/// active window must not capture `maintenance` as the status to restore.
pub fn apply_strategy(alert: &mut AlertEvent, strategy: MaintenanceStrategy) -> SuppressionOutcome {
    match strategy {
        MaintenanceStrategy::Default => {
            alert.status = AlertStatus::Suppressed;
            SuppressionOutcome::Suppressed
        }
        MaintenanceStrategy::RecoverPreviousStatus => {
            if alert.status == AlertStatus::Maintenance {
                return SuppressionOutcome::EnteredMaintenance;
            }
            if alert.previous_status.is_none() {
                alert.previous_status = Some(alert.status);
            }
            alert.status = AlertStatus::Maintenance;
            SuppressionOutcome::EnteredMaintenance
        }
    }
}

/// Load enabled windows for a tenant.
pub async fn load_windows(
    pool: &PgPool,
    tenant_id: Uuid,
) -> Result<Vec<MaintenanceWindowRule>, CoreError> {
    let windows = sqlx::query_as::<_, MaintenanceWindowRule>(
        "SELECT * FROM maintenance_windows WHERE tenant_id = $1 AND enabled",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await
    .map_err(|e| CoreError::Lookup(format!("maintenance window lookup failed: {e}")))?;
    Ok(windows)
}

/// Check an incoming alert against the tenant's windows and persist any
/// status rewrite.
///
/// A window-lookup failure fails open: the alert passes through
/// unsuppressed rather than blocking ingestion.
pub async fn suppress(
    pool: &PgPool,
    alert: &mut AlertEvent,
    strategy: MaintenanceStrategy,
) -> SuppressionOutcome {
    let windows = match load_windows(pool, alert.tenant_id).await {
        Ok(windows) => windows,
        Err(e) => {
            tracing::warn!(
                tenant_id = %alert.tenant_id,
                fingerprint = %alert.fingerprint,
                error = %e,
                "maintenance window lookup failed, alert not suppressed"
            );
            return SuppressionOutcome::None;
        }
    };

    let now = Utc::now();
    let context = alert.context();
    if matching_windows(&windows, alert.status, &context, now).is_empty() {
        return SuppressionOutcome::None;
    }

    let outcome = apply_strategy(alert, strategy);
    if let Err(e) = persist_status(pool, alert).await {
        tracing::error!(alert_id = %alert.id, error = %e, "failed to persist suppression");
    }
    outcome
}

async fn persist_status(pool: &PgPool, alert: &AlertEvent) -> Result<(), CoreError> {
    sqlx::query("UPDATE alerts SET status = $1, previous_status = $2 WHERE id = $3")
        .bind(alert.status)
        .bind(alert.previous_status)
        .bind(alert.id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reconciliation loop (recover_previous_status strategy)
// ---------------------------------------------------------------------------

/// Background job restoring alerts whose covering windows have all expired
/// or been disabled.
pub struct MaintenanceReconciler {
    pool: PgPool,
    interval_secs: u64,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceReconciler {
    pub fn new(pool: PgPool, interval_secs: u64) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            pool,
            interval_secs,
            stop_tx,
            stop_rx,
            handle: tokio::sync::Mutex::new(None),
        })
    }

    /// Spawn the reconciliation loop.
    pub async fn start(self: &Arc<Self>) {
        let reconciler = Arc::clone(self);
        let mut stop_rx = self.stop_rx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(reconciler.interval_secs));
            tracing::info!("maintenance reconciler started");
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = reconciler.run_cycle().await {
                            tracing::error!(error = %e, "maintenance reconciliation cycle failed");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::info!("maintenance reconciler stopped");
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Signal the loop to stop and join it with a bounded timeout.
    pub async fn stop(&self, join_timeout: std::time::Duration) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(join_timeout, handle).await.is_err() {
                tracing::warn!("maintenance reconciler did not stop within timeout");
            }
        }
    }

    /// One reconciliation pass over all alerts currently in maintenance.
    pub async fn run_cycle(&self) -> Result<(), CoreError> {
        let alerts = sqlx::query_as::<_, AlertEvent>(
            "SELECT * FROM alerts WHERE status = 'maintenance'",
        )
        .fetch_all(&self.pool)
        .await?;

        // Windows are fetched once per tenant per cycle.
        let mut windows_by_tenant: std::collections::HashMap<Uuid, Vec<MaintenanceWindowRule>> =
            std::collections::HashMap::new();
        let now = Utc::now();

        for alert in alerts {
            let windows = match windows_by_tenant.entry(alert.tenant_id) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(e) => {
                    match load_windows(&self.pool, alert.tenant_id).await {
                        Ok(w) => e.insert(w),
                        Err(err) => {
                            // Fail open: leave the alert in maintenance and
                            // retry next interval.
                            tracing::warn!(
                                tenant_id = %alert.tenant_id,
                                error = %err,
                                "window lookup failed during reconciliation"
                            );
                            continue;
                        }
                    }
                }
            };

            let context = alert.context();
            // Ignore-status exemption does not apply here: the alert is
            // already in maintenance and we only ask whether any active
            // window still covers it.
            let still_covered = windows
                .iter()
                .filter(|w| w.is_active(now))
                .any(|w| match CelExpression::parse(&w.cel_query) {
                    Ok(expr) => expr.evaluate(&context).unwrap_or(false),
                    Err(_) => false,
                });
            if still_covered {
                continue;
            }

            let restored = alert.previous_status.unwrap_or(AlertStatus::Firing);
            let result = sqlx::query(
                r#"
                UPDATE alerts
                SET status = $1, previous_status = NULL
                WHERE id = $2 AND status = 'maintenance'
                "#,
            )
            .bind(restored)
            .bind(alert.id)
            .execute(&self.pool)
            .await;
            match result {
                Ok(_) => {
                    tracing::info!(
                        alert_id = %alert.id,
                        tenant_id = %alert.tenant_id,
                        restored_status = %restored,
                        "restored alert after maintenance window expiry"
                    );
                }
                Err(e) => {
                    tracing::error!(alert_id = %alert.id, error = %e, "failed to restore alert");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::Severity;
    use crate::models::maintenance::default_ignore_statuses;
    use chrono::Duration;
    use serde_json::json;

    fn alert(status: AlertStatus) -> AlertEvent {
        AlertEvent {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            fingerprint: "fp".into(),
            name: "db down".into(),
            status,
            previous_status: None,
            severity: Severity::High,
            provider_id: None,
            provider_type: "prometheus".into(),
            service: Some("db".into()),
            labels: json!({}),
            payload: json!({}),
            last_received: Utc::now(),
        }
    }

    fn window(cel: &str, active: bool) -> MaintenanceWindowRule {
        let now = Utc::now();
        let (start, end) = if active {
            (now - Duration::hours(1), now + Duration::hours(1))
        } else {
            (now - Duration::hours(3), now - Duration::hours(2))
        };
        MaintenanceWindowRule {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "w".into(),
            cel_query: cel.to_string(),
            start_time: start,
            end_time: end,
            enabled: true,
            suppress: true,
            ignore_statuses: default_ignore_statuses(),
            created_at: now,
        }
    }

    #[test]
    fn active_matching_window_is_found() {
        let a = alert(AlertStatus::Firing);
        let windows = vec![window("service == 'db'", true)];
        let found = matching_windows(&windows, a.status, &a.context(), Utc::now());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn expired_window_does_not_match() {
        let a = alert(AlertStatus::Firing);
        let windows = vec![window("service == 'db'", false)];
        assert!(matching_windows(&windows, a.status, &a.context(), Utc::now()).is_empty());
    }

    #[test]
    fn ignored_status_is_exempt() {
        let a = alert(AlertStatus::Resolved);
        let windows = vec![window("service == 'db'", true)];
        assert!(matching_windows(&windows, a.status, &a.context(), Utc::now()).is_empty());
    }

    #[test]
    fn non_matching_predicate_passes_through() {
        let a = alert(AlertStatus::Firing);
        let windows = vec![window("service == 'cache'", true)];
        assert!(matching_windows(&windows, a.status, &a.context(), Utc::now()).is_empty());
    }

    #[test]
    fn unparsable_predicate_fails_open() {
        let a = alert(AlertStatus::Firing);
        let windows = vec![window("service ==", true)];
        assert!(matching_windows(&windows, a.status, &a.context(), Utc::now()).is_empty());
    }

    #[test]
    fn default_strategy_suppresses_without_state() {
        let mut a = alert(AlertStatus::Firing);
        let outcome = apply_strategy(&mut a, MaintenanceStrategy::Default);
        assert_eq!(outcome, SuppressionOutcome::Suppressed);
        assert_eq!(a.status, AlertStatus::Suppressed);
        assert_eq!(a.previous_status, None);
    }

    #[test]
    fn recover_strategy_captures_previous_status() {
        let mut a = alert(AlertStatus::Firing);
        let outcome = apply_strategy(&mut a, MaintenanceStrategy::RecoverPreviousStatus);
        assert_eq!(outcome, SuppressionOutcome::EnteredMaintenance);
        assert_eq!(a.status, AlertStatus::Maintenance);
        assert_eq!(a.previous_status, Some(AlertStatus::Firing));
    }

    #[test]
    fn recover_strategy_is_idempotent_on_reentry() {
        let mut a = alert(AlertStatus::Firing);
        apply_strategy(&mut a, MaintenanceStrategy::RecoverPreviousStatus);
        // Second pass while already in maintenance must not overwrite the
        // captured status with `maintenance`.
        apply_strategy(&mut a, MaintenanceStrategy::RecoverPreviousStatus);
        assert_eq!(a.status, AlertStatus::Maintenance);
        assert_eq!(a.previous_status, Some(AlertStatus::Firing));
    }
}
