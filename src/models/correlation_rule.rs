//! Correlation rule model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// When a candidate incident becomes confirmed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "create_on", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CreateOn {
    /// Confirmed on the first matching alert.
    Any,
    /// Confirmed once `alerts_count >= threshold`.
    All,
}

/// Which member-alert transition resolves a grouped incident.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "resolve_on", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResolveOn {
    /// Every member must be resolved or suppressed.
    All,
    /// The first member (by join order) resolving resolves the incident.
    First,
    /// The most recently joined member resolving resolves the incident.
    Last,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CorrelationRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// CEL predicate; parsed and rejected at creation time if malformed.
    pub definition_cel: String,
    /// Sliding grouping window in seconds.
    pub timeframe_secs: i64,
    /// Label paths whose values partition matching alerts into groups.
    /// Empty means a single implicit group per rule.
    pub grouping_criteria: Vec<String>,
    pub create_on: CreateOn,
    pub resolve_on: ResolveOn,
    /// Mustache-like template rendered against the triggering alert;
    /// unresolved placeholders render as `N/A`.
    pub incident_name_template: Option<String>,
    /// Minimum member count for confirmation under `create_on = all`.
    pub threshold: i64,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCorrelationRule {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1))]
    pub definition_cel: String,
    #[validate(range(min = 1))]
    pub timeframe_secs: i64,
    pub grouping_criteria: Vec<String>,
    pub create_on: CreateOn,
    pub resolve_on: ResolveOn,
    pub incident_name_template: Option<String>,
    #[validate(range(min = 1))]
    pub threshold: Option<i64>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCorrelationRule {
    pub name: Option<String>,
    pub definition_cel: Option<String>,
    pub timeframe_secs: Option<i64>,
    pub grouping_criteria: Option<Vec<String>>,
    pub create_on: Option<CreateOn>,
    pub resolve_on: Option<ResolveOn>,
    pub incident_name_template: Option<String>,
    pub threshold: Option<i64>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
}
