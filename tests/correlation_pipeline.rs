//! End-to-end exercise of the pure correlation layers: maintenance window
//! matching, deduplication, rule grouping, and topology correlation over
//! in-memory data. Database-backed orchestration is covered separately.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use quell::cel::CelExpression;
use quell::models::alert::{AlertEvent, AlertStatus, Severity};
use quell::models::correlation_rule::{CreateOn, ResolveOn};
use quell::models::incident::IncidentStatus;
use quell::models::maintenance::{default_ignore_statuses, MaintenanceStrategy, MaintenanceWindowRule};
use quell::models::topology::{TopologyDependency, TopologyService, TopologySnapshot};
use quell::services::correlation::{
    group_is_fresh, grouping_key, next_incident_status, render_template, rule_fingerprint,
    should_resolve,
};
use quell::services::dedup::{classify, content_hash, DedupClassification};
use quell::services::maintenance::{apply_strategy, matching_windows, SuppressionOutcome};
use quell::services::topology::{correlate, interconnectivity_id};

fn alert(fingerprint: &str, service: &str, severity: Severity, status: AlertStatus) -> AlertEvent {
    AlertEvent {
        id: Uuid::new_v4(),
        tenant_id: Uuid::nil(),
        fingerprint: fingerprint.to_string(),
        name: format!("{service} failure"),
        status,
        previous_status: None,
        severity,
        provider_id: Some("prom-1".to_string()),
        provider_type: "prometheus".to_string(),
        service: Some(service.to_string()),
        labels: json!({"env": "prod", "service": service}),
        payload: json!({"description": format!("{service} is unhealthy")}),
        last_received: Utc::now(),
    }
}

#[test]
fn alert_flows_through_suppression_dedup_and_grouping() {
    let mut incoming = alert("fp-db-1", "db", Severity::High, AlertStatus::Firing);

    // 1. Maintenance check: an expired window must not touch the alert.
    let expired = MaintenanceWindowRule {
        id: Uuid::new_v4(),
        tenant_id: incoming.tenant_id,
        name: "old window".into(),
        cel_query: "service == 'db'".into(),
        start_time: Utc::now() - Duration::hours(4),
        end_time: Utc::now() - Duration::hours(2),
        enabled: true,
        suppress: true,
        ignore_statuses: default_ignore_statuses(),
        created_at: Utc::now(),
    };
    let covered = matching_windows(
        std::slice::from_ref(&expired),
        incoming.status,
        &incoming.context(),
        Utc::now(),
    );
    assert!(covered.is_empty());

    // 2. Dedup: first delivery is not a duplicate, identical redelivery is
    // a full duplicate, a changed payload is partial.
    let ignores = vec!["id".to_string(), "last_received".to_string()];
    let first_hash = content_hash(&incoming.context(), &ignores);
    assert_eq!(classify(&first_hash, None), DedupClassification::None);

    let mut redelivery = incoming.clone();
    redelivery.id = Uuid::new_v4();
    redelivery.last_received = Utc::now() + Duration::seconds(30);
    let redelivery_hash = content_hash(&redelivery.context(), &ignores);
    assert_eq!(
        classify(&redelivery_hash, Some(&first_hash)),
        DedupClassification::Full
    );

    let mut changed = redelivery.clone();
    changed.payload = json!({"description": "db is unhealthy", "disk": "full"});
    let changed_hash = content_hash(&changed.context(), &ignores);
    assert_eq!(
        classify(&changed_hash, Some(&first_hash)),
        DedupClassification::Partial
    );

    // 3. Rule match and grouping: the predicate matches, the grouping key
    // partitions by service, and the incident name renders from the alert.
    let rule = CelExpression::parse("severity >= 'high' && labels.env == 'prod'").unwrap();
    assert!(rule.evaluate(&incoming.context()).unwrap());

    let rule_id = Uuid::new_v4();
    let criteria = vec!["labels.service".to_string()];
    let key = grouping_key(&criteria, &incoming.context());
    assert_eq!(key, "db");
    let fingerprint = rule_fingerprint(rule_id, &key);
    assert_eq!(fingerprint, rule_fingerprint(rule_id, "db"));

    let name = render_template("{{ labels.service }} incident ({{ labels.env }})", &incoming.context());
    assert_eq!(name, "db incident (prod)");

    // 4. A second alert within the timeframe joins; outside it would not.
    let joined_at = Utc::now();
    assert!(group_is_fresh(joined_at, joined_at + Duration::seconds(500), 600));
    assert!(!group_is_fresh(joined_at, joined_at + Duration::seconds(700), 600));

    // 5. Resolution: both members must settle under resolve_on = all.
    incoming.status = AlertStatus::Resolved;
    let statuses = vec![incoming.status, AlertStatus::Firing];
    assert!(!should_resolve(ResolveOn::All, &statuses));
    let statuses = vec![AlertStatus::Resolved, AlertStatus::Resolved];
    assert_eq!(
        next_incident_status(IncidentStatus::Firing, ResolveOn::All, &statuses),
        IncidentStatus::Resolved
    );

    // Confirmation policy sanity: any vs all.
    assert!(quell::services::correlation::is_confirmed(CreateOn::Any, 3, 1));
    assert!(!quell::services::correlation::is_confirmed(CreateOn::All, 3, 1));
}

#[test]
fn maintenance_recover_cycle_preserves_previous_status() {
    let mut incoming = alert("fp-db-2", "db", Severity::Warning, AlertStatus::Acknowledged);
    let active = MaintenanceWindowRule {
        id: Uuid::new_v4(),
        tenant_id: incoming.tenant_id,
        name: "db upgrade".into(),
        cel_query: "service == 'db'".into(),
        start_time: Utc::now() - Duration::minutes(5),
        end_time: Utc::now() + Duration::minutes(55),
        enabled: true,
        suppress: true,
        // Acknowledged alerts are suppressible for this window.
        ignore_statuses: vec![AlertStatus::Resolved],
        created_at: Utc::now(),
    };

    let covered = matching_windows(
        std::slice::from_ref(&active),
        incoming.status,
        &incoming.context(),
        Utc::now(),
    );
    assert_eq!(covered.len(), 1);

    let outcome = apply_strategy(&mut incoming, MaintenanceStrategy::RecoverPreviousStatus);
    assert_eq!(outcome, SuppressionOutcome::EnteredMaintenance);
    assert_eq!(incoming.status, AlertStatus::Maintenance);
    assert_eq!(incoming.previous_status, Some(AlertStatus::Acknowledged));

    // Re-entering the window before reconciliation must not double-capture.
    apply_strategy(&mut incoming, MaintenanceStrategy::RecoverPreviousStatus);
    assert_eq!(incoming.previous_status, Some(AlertStatus::Acknowledged));

    // Reconciliation restores once no active window covers the alert.
    let still_covered = matching_windows(
        std::slice::from_ref(&active),
        incoming.status,
        &incoming.context(),
        active.end_time + Duration::seconds(1),
    );
    assert!(still_covered.is_empty());
    let restored = incoming.previous_status.take().unwrap();
    incoming.status = restored;
    assert_eq!(incoming.status, AlertStatus::Acknowledged);
}

#[test]
fn topology_pass_produces_stable_components_from_alerts() {
    let tenant = Uuid::nil();
    let services = ["gateway", "api", "db", "billing"];
    let snapshot = TopologySnapshot {
        services: services
            .iter()
            .map(|name| TopologyService {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                name: name.to_string(),
                display_name: None,
            })
            .collect(),
        dependencies: vec![
            TopologyDependency {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                service_name: "gateway".into(),
                depends_on: "api".into(),
            },
            TopologyDependency {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                service_name: "api".into(),
                depends_on: "db".into(),
            },
        ],
        applications: Vec::new(),
    };

    // Three connected services alert; billing is quiet and isolated.
    let alerting: HashSet<String> = ["db", "gateway", "api"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let result = correlate(&snapshot, &alerting, 3, 2);
    assert_eq!(result.components.len(), 1);
    assert_eq!(
        result.components[0],
        vec!["api".to_string(), "db".to_string(), "gateway".to_string()]
    );

    // The interconnectivity id is arrival-order independent.
    let reversed: HashSet<String> = ["api", "gateway", "db"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let again = correlate(&snapshot, &reversed, 3, 2);
    assert_eq!(
        interconnectivity_id(&result.components[0]),
        interconnectivity_id(&again.components[0])
    );

    // A lone alerting service below the minimum produces nothing.
    let lone: HashSet<String> = HashSet::from(["billing".to_string()]);
    assert!(correlate(&snapshot, &lone, 3, 2).components.is_empty());
}
