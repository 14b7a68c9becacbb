//! Maintenance window model and suppression strategy.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::alert::AlertStatus;

/// Tenant/process-wide suppression strategy. Not per-window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStrategy {
    /// Mark matching alerts `suppressed`; stateless per check.
    Default,
    /// Move matching alerts to `maintenance`, remembering their previous
    /// status so a reconciliation pass can restore it once the covering
    /// windows are gone.
    RecoverPreviousStatus,
}

impl FromStr for MaintenanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "recover_previous_status" => Ok(Self::RecoverPreviousStatus),
            other => Err(format!("unknown maintenance strategy '{other}'")),
        }
    }
}

/// Alert statuses exempt from suppression unless the window overrides them.
pub fn default_ignore_statuses() -> Vec<AlertStatus> {
    vec![AlertStatus::Resolved, AlertStatus::Acknowledged]
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MaintenanceWindowRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// CEL predicate selecting which alerts the window covers.
    pub cel_query: String,
    pub start_time: DateTime<Utc>,
    /// Exclusive: the window covers `[start_time, end_time)`.
    pub end_time: DateTime<Utc>,
    pub enabled: bool,
    pub suppress: bool,
    pub ignore_statuses: Vec<AlertStatus>,
    pub created_at: DateTime<Utc>,
}

impl MaintenanceWindowRule {
    /// Whether the window covers `now` and is eligible to suppress.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.suppress && self.start_time <= now && now < self.end_time
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateMaintenanceWindow {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1))]
    pub cel_query: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub suppress: Option<bool>,
    pub ignore_statuses: Option<Vec<AlertStatus>>,
}

impl CreateMaintenanceWindow {
    /// Range check on top of the derive-based field validation.
    pub fn validate_range(&self) -> Result<(), String> {
        if self.end_time <= self.start_time {
            return Err("end_time must be after start_time".to_string());
        }
        Ok(())
    }
}
