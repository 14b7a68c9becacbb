//! Incident model: the shared mutable entity all four engines converge on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::alert::Severity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "incident_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Firing,
    Acknowledged,
    Resolved,
    Merged,
    Deleted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "incident_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IncidentType {
    /// Produced by the correlation rules engine.
    Rule,
    /// Produced by the topology correlator.
    Topology,
}

/// Incident row. Never hard-deleted: lifecycle is status-only, except
/// explicit user deletion handled outside this core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Incident {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub incident_type: IncidentType,
    /// True until the owning rule's `create_on`/threshold is satisfied.
    pub is_candidate: bool,
    pub is_confirmed: bool,
    /// Unique per tenant, assigned optimistically with retry-on-conflict.
    pub running_number: i64,
    pub alerts_count: i64,
    pub affected_services: Vec<String>,
    /// Identifies which rule + grouping key produced this incident. Not
    /// unique: a rule/group spawns a fresh incident after window eviction.
    pub rule_fingerprint: Option<String>,
    /// Weak back-reference for recurrence chains. Never an owning pointer.
    pub same_incident_in_the_past_id: Option<Uuid>,
    /// Weak reference set when this incident is merged into another.
    pub merged_into_incident_id: Option<Uuid>,
    /// Stable hash of the correlated service set (topology incidents only).
    pub interconnectivity_id: Option<String>,
    /// Set when the topology application pass produced this incident.
    pub application_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub last_seen_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Check whether an incident status transition is valid.
pub fn is_valid_transition(from: IncidentStatus, to: IncidentStatus) -> bool {
    matches!(
        (from, to),
        (IncidentStatus::Firing, IncidentStatus::Acknowledged)
            | (IncidentStatus::Firing, IncidentStatus::Resolved)
            | (IncidentStatus::Acknowledged, IncidentStatus::Firing)
            | (IncidentStatus::Acknowledged, IncidentStatus::Resolved)
            // Reopen on a member re-firing.
            | (IncidentStatus::Resolved, IncidentStatus::Firing)
            // Merge and delete can come from any live state.
            | (IncidentStatus::Firing, IncidentStatus::Merged)
            | (IncidentStatus::Acknowledged, IncidentStatus::Merged)
            | (IncidentStatus::Resolved, IncidentStatus::Merged)
            | (IncidentStatus::Firing, IncidentStatus::Deleted)
            | (IncidentStatus::Acknowledged, IncidentStatus::Deleted)
            | (IncidentStatus::Resolved, IncidentStatus::Deleted)
            | (IncidentStatus::Merged, IncidentStatus::Deleted)
    )
}

/// Walk a recurrence chain (`same_incident_in_the_past_id` hops) without
/// looping on malformed data.
///
/// `lookup` resolves one hop; the walk stops at the first `None`, at a
/// repeated id, or after `max_hops`.
pub fn walk_recurrence_chain<F>(start: Uuid, mut lookup: F, max_hops: usize) -> Vec<Uuid>
where
    F: FnMut(Uuid) -> Option<Uuid>,
{
    let mut chain = Vec::new();
    let mut visited = std::collections::HashSet::new();
    let mut current = start;
    visited.insert(current);

    for _ in 0..max_hops {
        let Some(next) = lookup(current) else {
            break;
        };
        if !visited.insert(next) {
            break;
        }
        chain.push(next);
        current = next;
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reopen_is_valid() {
        assert!(is_valid_transition(
            IncidentStatus::Resolved,
            IncidentStatus::Firing
        ));
    }

    #[test]
    fn deleted_is_terminal() {
        assert!(!is_valid_transition(
            IncidentStatus::Deleted,
            IncidentStatus::Firing
        ));
        assert!(!is_valid_transition(
            IncidentStatus::Deleted,
            IncidentStatus::Resolved
        ));
    }

    #[test]
    fn merged_only_moves_to_deleted() {
        assert!(is_valid_transition(
            IncidentStatus::Merged,
            IncidentStatus::Deleted
        ));
        assert!(!is_valid_transition(
            IncidentStatus::Merged,
            IncidentStatus::Firing
        ));
    }

    #[test]
    fn recurrence_chain_follows_links() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let links: HashMap<Uuid, Uuid> = [(a, b), (b, c)].into();

        let chain = walk_recurrence_chain(a, |id| links.get(&id).copied(), 10);
        assert_eq!(chain, vec![b, c]);
    }

    #[test]
    fn recurrence_chain_stops_on_cycle() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        // Malformed: b points back to a.
        let links: HashMap<Uuid, Uuid> = [(a, b), (b, a)].into();

        let chain = walk_recurrence_chain(a, |id| links.get(&id).copied(), 10);
        assert_eq!(chain, vec![b]);
    }

    #[test]
    fn recurrence_chain_respects_hop_cap() {
        let ids: Vec<Uuid> = (0..20).map(|_| Uuid::new_v4()).collect();
        let links: HashMap<Uuid, Uuid> =
            ids.windows(2).map(|w| (w[0], w[1])).collect();

        let chain = walk_recurrence_chain(ids[0], |id| links.get(&id).copied(), 5);
        assert_eq!(chain.len(), 5);
    }
}
