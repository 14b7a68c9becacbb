//! Workflow/automation sink contract.
//!
//! The executor itself lives outside this core; engines hand incidents to
//! the sink and move on. Notification is best-effort: implementations must
//! log and swallow their own failures, never block or fail the correlation
//! path.

use std::sync::{Arc, Mutex};

use crate::models::incident::Incident;
use uuid::Uuid;

/// Lifecycle action attached to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentAction {
    Created,
    Updated,
}

impl IncidentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

/// Sink receiving one notification per state-changing step.
///
/// Kept synchronous on purpose: implementations that need I/O enqueue the
/// notification (channel, spawn) instead of making the engines wait.
pub trait WorkflowSink: Send + Sync {
    fn notify(&self, tenant_id: Uuid, incident: &Incident, action: IncidentAction);
}

/// Default sink: structured log line per notification.
#[derive(Debug, Default)]
pub struct TracingSink;

impl WorkflowSink for TracingSink {
    fn notify(&self, tenant_id: Uuid, incident: &Incident, action: IncidentAction) {
        tracing::info!(
            tenant_id = %tenant_id,
            incident_id = %incident.id,
            action = action.as_str(),
            alerts_count = incident.alerts_count,
            "incident lifecycle notification"
        );
    }
}

/// Test sink collecting notifications in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Uuid, Uuid, IncidentAction)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(Uuid, Uuid, IncidentAction)> {
        self.events.lock().expect("sink mutex poisoned").clone()
    }
}

impl WorkflowSink for RecordingSink {
    fn notify(&self, tenant_id: Uuid, incident: &Incident, action: IncidentAction) {
        self.events
            .lock()
            .expect("sink mutex poisoned")
            .push((tenant_id, incident.id, action));
    }
}
