//! Pure correlation logic: grouping keys, rule fingerprints, incident name
//! templates, confirmation and resolution policies.
//!
//! This module contains no database access — the engine in
//! [`crate::services::correlation_service`] fetches rules and incidents and
//! persists the decisions made here.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::alert::AlertStatus;
use crate::models::correlation_rule::{CreateOn, ResolveOn};
use crate::models::incident::IncidentStatus;

/// Placeholder used when a grouping criterion is absent from an alert.
/// Missing values partition into their own group rather than erroring.
const MISSING_VALUE: &str = "";

/// Rendered value for template placeholders that resolve to nothing.
const UNRESOLVED: &str = "N/A";

/// Navigate a dotted path through nested maps, returning `None` on any
/// missing segment or non-map intermediate.
pub fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compute the grouping key for a rule against one alert.
///
/// Concatenation of the configured criteria values in order; a missing
/// value becomes an empty placeholder. Empty criteria yield the single
/// implicit group key.
pub fn grouping_key(criteria: &[String], context: &Value) -> String {
    criteria
        .iter()
        .map(|path| {
            lookup_path(context, path)
                .map(scalar_to_string)
                .unwrap_or_else(|| MISSING_VALUE.to_string())
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Stable identifier for (rule, grouping key). Not unique across time: a
/// group evicted by the timeframe window spawns a fresh incident with the
/// same fingerprint.
pub fn rule_fingerprint(rule_id: Uuid, group_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(group_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether a group is still open to new members.
///
/// Groups older than `timeframe_secs` from their last update are closed;
/// the caller starts a fresh group/incident instead.
pub fn group_is_fresh(last_seen: DateTime<Utc>, now: DateTime<Utc>, timeframe_secs: i64) -> bool {
    now - last_seen <= Duration::seconds(timeframe_secs)
}

/// Render a mustache-like incident name template against an alert.
///
/// `{{ path.to.value }}` placeholders resolve against the alert context;
/// unresolved placeholders render as `N/A`.
pub fn render_template(template: &str, context: &Value) -> String {
    // The pattern is fixed; a failure would be caught by the unit tests.
    let re = Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap();
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        lookup_path(context, &caps[1])
            .map(scalar_to_string)
            .unwrap_or_else(|| UNRESOLVED.to_string())
    })
    .into_owned()
}

/// Fold a newly rendered name into an incident's current name.
///
/// Multi-alert groups accumulate comma-joined values: the render is
/// appended only when it differs from every value already present.
/// Returns `None` when the name is unchanged.
pub fn accumulate_name(current: &str, rendered: &str) -> Option<String> {
    if current.is_empty() {
        return Some(rendered.to_string());
    }
    if current.split(", ").any(|part| part == rendered) {
        return None;
    }
    Some(format!("{current}, {rendered}"))
}

/// Whether the incident is confirmed under the rule's creation policy.
pub fn is_confirmed(create_on: CreateOn, threshold: i64, alerts_count: i64) -> bool {
    match create_on {
        CreateOn::Any => alerts_count >= 1,
        CreateOn::All => alerts_count >= threshold.max(1),
    }
}

/// Whether the member statuses satisfy the rule's resolution policy.
///
/// Statuses must be supplied in join order (oldest member first).
pub fn should_resolve(resolve_on: ResolveOn, member_statuses: &[AlertStatus]) -> bool {
    if member_statuses.is_empty() {
        return false;
    }
    match resolve_on {
        ResolveOn::All => member_statuses.iter().all(AlertStatus::is_settled),
        ResolveOn::First => member_statuses[0] == AlertStatus::Resolved,
        ResolveOn::Last => member_statuses[member_statuses.len() - 1] == AlertStatus::Resolved,
    }
}

/// Compute the incident status after a membership or member-status change.
///
/// Resolves per policy; a resolved incident reopens to firing when any
/// member fires again.
pub fn next_incident_status(
    current: IncidentStatus,
    resolve_on: ResolveOn,
    member_statuses: &[AlertStatus],
) -> IncidentStatus {
    if should_resolve(resolve_on, member_statuses) {
        return IncidentStatus::Resolved;
    }
    if current == IncidentStatus::Resolved && member_statuses.contains(&AlertStatus::Firing) {
        return IncidentStatus::Firing;
    }
    current
}
